// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide constants

use serde::{Deserialize, Serialize};

/// Displaced surface grid density presets
///
/// The dense grid drives shadows and debug visualization; collider proxies
/// usually run on a coarser grid to keep physics rebuilds cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GridPreset {
    /// 40x40 vertices
    Coarse,
    /// 80x80 vertices
    Medium,
    /// 160x160 vertices (default)
    #[default]
    Dense,
}

impl GridPreset {
    /// All presets, coarsest first
    pub const ALL: [GridPreset; 3] = [GridPreset::Coarse, GridPreset::Medium, GridPreset::Dense];

    /// Get display name for the preset
    pub fn display_name(&self) -> &'static str {
        match self {
            GridPreset::Coarse => "Coarse",
            GridPreset::Medium => "Medium",
            GridPreset::Dense => "Dense",
        }
    }

    /// Vertices along each grid edge
    pub fn vertices_per_side(&self) -> u32 {
        match self {
            GridPreset::Coarse => 40,
            GridPreset::Medium => 80,
            GridPreset::Dense => surface::DENSE_GRID,
        }
    }
}

/// Depth surface constants
pub mod surface {
    /// Default dense grid edge length (vertices)
    pub const DENSE_GRID: u32 = 160;

    /// Default collider grid edge length (vertices)
    pub const COLLIDER_GRID: u32 = 40;

    /// Smallest usable grid (one quad)
    pub const MIN_GRID: u32 = 2;

    /// Vertices with `v` above this are near the sensor's upper boundary
    /// and take the previous minimum depth when hole patching is on.
    pub const UPPER_BOUNDARY_V: f32 = 0.9;

    /// Default collider rebuild rate (Hz)
    pub const COLLIDER_UPDATE_RATE_HZ: f32 = 2.0;
}

/// Occlusion pipeline constants
pub mod occlusion {
    /// Number of half-resolution blur pyramid levels
    pub const PYRAMID_LEVELS: usize = 3;

    /// Total blur passes (down then up)
    pub const BLUR_PASSES: usize = PYRAMID_LEVELS * 2;

    /// Default Kawase sample offset in source texels
    pub const BLUR_OFFSET: f32 = 1.0;

    /// Render layer index reserved for occludable geometry
    pub const OCCLUSION_LAYER: u32 = 1;
}

/// Depth sampling constants
pub mod depth {
    /// Value returned by point queries when no frame exists
    pub const NO_DATA_METERS: f32 = 0.0;

    /// Typical raw-unit scale of 16-bit depth sensors (millimetres)
    pub const MILLIMETERS_TO_METERS: f32 = 0.001;
}

/// Texture readback row alignment required by the GPU copy engine
pub const COPY_BYTES_PER_ROW_ALIGNMENT: u32 = 256;

/// Format a depth value for display (e.g., "4.10 m" or "85 cm")
pub fn format_depth(meters: f32) -> String {
    if meters <= 0.0 {
        "no data".to_string()
    } else if meters < 1.0 {
        format!("{} cm", (meters * 100.0).round() as u32)
    } else {
        format!("{:.2} m", meters)
    }
}
