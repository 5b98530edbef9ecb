// SPDX-License-Identifier: GPL-3.0-only

//! Uniform blocks shared with the WGSL passes
//!
//! Field order and padding mirror the WGSL structs exactly.

use crate::depth::DepthEncoding;
use glam::{Mat4, Vec2};

/// Depth decode pass parameters (`DecodeParams` in WGSL)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DecodeParams {
    /// Raw unit to metre scale
    pub raw_to_meters: f32,
    /// 0 = packed 16-bit, 1 = float, 2 = normalized inverse
    pub encoding: u32,
    /// Near plane for the inverse encoding
    pub near: f32,
    pub _pad: u32,
}

impl DecodeParams {
    pub fn new(encoding: DepthEncoding, raw_to_meters: f32) -> Self {
        Self {
            raw_to_meters,
            encoding: encoding.shader_mode(),
            near: encoding.near(),
            _pad: 0,
        }
    }
}

/// Camera block of the virtual distance pass (`ViewUniforms` in WGSL)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ViewUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

impl ViewUniforms {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
        }
    }
}

/// Mask generation parameters (`MaskParams` in WGSL)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaskParams {
    /// Render clip `(x, y, 1, 1)` to depth sensor clip
    pub depth_clip_from_render_clip: [[f32; 4]; 4],
    /// Inverse render projection, linearizes a post-process depth buffer
    pub inv_projection: [[f32; 4]; 4],
    pub raw_to_meters: f32,
    pub encoding: u32,
    pub depth_near: f32,
    /// Virtual content this close behind the real surface stays visible (metres)
    pub edge_tolerance: f32,
    /// Real depth texture size
    pub depth_size: [u32; 2],
    pub _pad: [u32; 2],
}

/// Kawase blur pass parameters (`BlurParams` in WGSL)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurParams {
    /// Half a source texel in UV units
    pub half_texel: [f32; 2],
    /// Sample offset multiplier
    pub offset: f32,
    pub _pad: f32,
}

impl BlurParams {
    /// Parameters for sampling a source of the given size
    pub fn for_source(width: u32, height: u32, offset: f32) -> Self {
        let half = Vec2::new(0.5 / width.max(1) as f32, 0.5 / height.max(1) as f32);
        Self {
            half_texel: half.to_array(),
            offset,
            _pad: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<DecodeParams>(), 16);
        assert_eq!(std::mem::size_of::<ViewUniforms>(), 128);
        assert_eq!(std::mem::size_of::<MaskParams>(), 160);
        assert_eq!(std::mem::size_of::<BlurParams>(), 16);
    }

    #[test]
    fn test_decode_params_follow_encoding() {
        let p = DecodeParams::new(DepthEncoding::NormalizedInverse { near: 0.2 }, 1.0);
        assert_eq!(p.encoding, 2);
        assert_eq!(p.near, 0.2);
    }
}
