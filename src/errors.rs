// SPDX-License-Identifier: GPL-3.0-only

//! Error types for depth sensing, reprojection and occlusion
//!
//! Per-frame passes (occlusion, mesh update) degrade by skipping and keeping
//! the previous result; explicit queries such as `uv_to_world` hand these
//! errors back to the caller as a routine "no data yet" outcome.

use std::fmt;

/// Result type alias using DepthError
pub type DepthResult<T> = Result<T, DepthError>;

/// Stage of the colour UV to world chain that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprojectionStage {
    /// Colour image UV to corrected render clip coordinate
    ColorToRenderClip,
    /// Render clip coordinate to depth image UV
    RenderClipToDepthUv,
    /// Depth image UV plus metric depth to a world point
    Unproject,
}

/// Main error type for the depth subsystem
#[derive(Debug, Clone, PartialEq)]
pub enum DepthError {
    /// No sensor frame has been received for the requested view
    DepthUnavailable { view_index: usize },
    /// Degenerate aspect ratio or zero width/height
    InvalidDimensions(String),
    /// A coordinate transform stage produced no result
    ReprojectionFailure(ReprojectionStage),
    /// Camera or depth matrices missing or not invertible
    MissingMatrixData(String),
    /// GPU resource exhaustion while (re)allocating a render target
    RenderTargetAllocationFailure(String),
    /// Occlusion passes requested out of order
    PassOrder(String),
    /// Capability not available on this adapter
    Unsupported(String),
    /// Generic GPU failure (device creation, buffer mapping)
    Gpu(String),
    /// Configuration file could not be parsed or written
    Config(String),
    /// Filesystem errors
    Io(String),
}

impl fmt::Display for ReprojectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReprojectionStage::ColorToRenderClip => write!(f, "color UV to render clip"),
            ReprojectionStage::RenderClipToDepthUv => write!(f, "render clip to depth UV"),
            ReprojectionStage::Unproject => write!(f, "depth UV to world"),
        }
    }
}

impl fmt::Display for DepthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepthError::DepthUnavailable { view_index } => {
                write!(f, "No depth data available for view {}", view_index)
            }
            DepthError::InvalidDimensions(msg) => write!(f, "Invalid dimensions: {}", msg),
            DepthError::ReprojectionFailure(stage) => {
                write!(f, "Reprojection failed at stage: {}", stage)
            }
            DepthError::MissingMatrixData(msg) => write!(f, "Missing matrix data: {}", msg),
            DepthError::RenderTargetAllocationFailure(msg) => {
                write!(f, "Render target allocation failed: {}", msg)
            }
            DepthError::PassOrder(msg) => write!(f, "Pass order violated: {}", msg),
            DepthError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            DepthError::Gpu(msg) => write!(f, "GPU error: {}", msg),
            DepthError::Config(msg) => write!(f, "Configuration error: {}", msg),
            DepthError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for DepthError {}

impl DepthError {
    /// Whether callers should treat this as a routine absence of data
    /// rather than a fault.
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            DepthError::DepthUnavailable { .. } | DepthError::ReprojectionFailure(_)
        )
    }
}

impl From<ReprojectionStage> for DepthError {
    fn from(stage: ReprojectionStage) -> Self {
        DepthError::ReprojectionFailure(stage)
    }
}

impl From<std::io::Error> for DepthError {
    fn from(err: std::io::Error) -> Self {
        DepthError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DepthError {
    fn from(err: serde_json::Error) -> Self {
        DepthError::Config(err.to_string())
    }
}

impl From<image::ImageError> for DepthError {
    fn from(err: image::ImageError) -> Self {
        DepthError::Io(err.to_string())
    }
}
