// SPDX-License-Identifier: GPL-3.0-only

//! Shared shader utilities
//!
//! WGSL fragments shared between the depth decode and occlusion passes.
//! These are concatenated with pass-specific code at pipeline creation.

mod params;

pub use params::{BlurParams, DecodeParams, MaskParams, ViewUniforms};

/// Fullscreen triangle vertex stage
///
/// Includes:
/// - `vs_fullscreen` - Three-vertex fullscreen triangle, no vertex buffers
/// - `uv_to_clip(uv)` - Top-origin uv to render clip
pub const FULLSCREEN_VERTEX: &str = include_str!("fullscreen.wgsl");

/// Raw sensor depth decoding
///
/// Includes:
/// - `decode_raw_depth(texel, mode, raw_to_meters, near)` - Metres, 0 for no data
pub const DEPTH_DECODE_FUNCTIONS: &str = include_str!("depth_decode.wgsl");

/// Join shader fragments in order
pub fn compose(parts: &[&str]) -> String {
    parts.join("\n\n")
}
