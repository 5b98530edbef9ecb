// SPDX-License-Identifier: GPL-3.0-only

//! User configuration for depth sensing, the displaced surface and occlusion
//!
//! Stored as JSON under the platform config directory. A missing file yields
//! defaults; a malformed one is reported so it is not silently overwritten.

use crate::constants::{self, GridPreset};
use crate::errors::{DepthError, DepthResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Config directory name under the platform config root
const CONFIG_DIR: &str = "xr-depth";
/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Displaced surface (mesh) options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshOptions {
    /// Dense grid density
    pub dense_grid: GridPreset,
    /// Optional coarser grid used for collider proxies
    pub collider_grid: Option<u32>,
    /// Fill zero samples and the upper sensing boundary from the previous update's range
    pub patch_holes: bool,
    /// Recompute vertex normals on every update (costly)
    pub update_vertex_normals: bool,
    /// Maximum collider rebuild rate in Hz (0 disables colliders)
    pub collider_update_rate_hz: f32,
    /// Keep two alternating collider shapes
    pub dual_collider: bool,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            dense_grid: GridPreset::Dense,
            collider_grid: Some(constants::surface::COLLIDER_GRID),
            patch_holes: true,
            update_vertex_normals: false,
            collider_update_rate_hz: constants::surface::COLLIDER_UPDATE_RATE_HZ,
            dual_collider: false,
        }
    }
}

/// Occlusion mask options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcclusionOptions {
    /// Kawase sample offset in source texels
    pub blur_offset: f32,
    /// Virtual content within this distance in front of the real surface still counts as occluded
    pub edge_tolerance_m: f32,
}

impl Default for OcclusionOptions {
    fn default() -> Self {
        Self {
            blur_offset: constants::occlusion::BLUR_OFFSET,
            edge_tolerance_m: 0.0,
        }
    }
}

/// Platform-specific calibration hooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformCalibration {
    /// Multiplicative correction applied to `raw_value_to_meters` on devices
    /// whose firmware reports a wrong scale. `None` on every other platform.
    pub depth_scale_correction: Option<f32>,
}

impl PlatformCalibration {
    /// Apply the correction (if any) to a raw-to-metres factor
    pub fn correct_scale(&self, raw_value_to_meters: f32) -> f32 {
        match self.depth_scale_correction {
            Some(factor) if factor.is_finite() && factor > 0.0 => raw_value_to_meters * factor,
            _ => raw_value_to_meters,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    /// Request float32 samples instead of packed 16-bit values
    pub use_float32: bool,
    /// Run the occlusion pipeline
    pub occlusion_enabled: bool,
    /// Displaced surface options
    pub mesh: MeshOptions,
    /// Occlusion mask options
    pub occlusion: OcclusionOptions,
    /// Platform calibration hooks
    pub platform: PlatformCalibration,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            use_float32: false,
            occlusion_enabled: true,
            mesh: MeshOptions::default(),
            occlusion: OcclusionOptions::default(),
            platform: PlatformCalibration::default(),
        }
    }
}

impl DepthConfig {
    /// Default config file location, if the platform has a config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> DepthResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory on this platform, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> DepthResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: DepthConfig = serde_json::from_str(&contents)
            .map_err(|e| DepthError::Config(format!("{}: {}", path.display(), e)))?;

        info!(path = %path.display(), "Loaded depth configuration");
        Ok(config)
    }

    /// Save to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> DepthResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "Saved depth configuration");
        Ok(())
    }

    /// Save to the default location
    pub fn save(&self) -> DepthResult<()> {
        let path = Self::default_path()
            .ok_or_else(|| DepthError::Config("No config directory available".to_string()))?;
        self.save_to(&path)
    }

    /// Collider rebuild interval, or `None` when colliders are disabled
    pub fn collider_interval(&self) -> Option<std::time::Duration> {
        let rate = self.mesh.collider_update_rate_hz;
        (rate > 0.0 && rate.is_finite())
            .then(|| std::time::Duration::from_secs_f32(1.0 / rate))
    }
}
