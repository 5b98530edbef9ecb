// SPDX-License-Identifier: GPL-3.0-only

//! Real-world occlusion of virtual content
//!
//! Hides virtual pixels that sit behind real surfaces measured by the depth
//! sensor, with softened edges.

mod processor;
mod scene;
mod stage;
mod targets;

pub use processor::{
    FrameTargets, OcclusionMaskPipeline, OcclusionView, PassOutcome, SkipReason,
    mask_shader_source,
};
pub use scene::{OccludableScene, OccluderMesh, RenderLayers, occluder_vertex_layouts};
pub use stage::{OcclusionStage, StageOrderError, StageTracker};
pub use targets::{BlurPyramid, RenderTarget, pyramid_level_size};

/// Override material writing view-space distance and coverage
pub const VIRTUAL_DISTANCE_SHADER: &str = include_str!("virtual_distance.wgsl");

/// Real depth lookup and comparison, shared by both mask variants
pub const MASK_COMMON_BODY: &str = include_str!("mask_common.wgsl");

/// Mask from the virtual distance target
pub const MASK_DISTANCE_BODY: &str = include_str!("mask_distance.wgsl");

/// Mask from a supplied depth buffer
pub const MASK_DEPTH_BODY: &str = include_str!("mask_depth.wgsl");

/// Dual Kawase down/up sampling
pub const KAWASE_SHADER_BODY: &str = include_str!("kawase.wgsl");

/// Colour times normalized mask
pub const COMPOSITE_SHADER_BODY: &str = include_str!("composite.wgsl");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::common::{FULLSCREEN_VERTEX, compose};
    use crate::shaders::validate_shader;

    #[test]
    fn test_virtual_distance_shader_validates() {
        validate_shader("virtual_distance", VIRTUAL_DISTANCE_SHADER);
    }

    #[test]
    fn test_mask_distance_shader_validates() {
        validate_shader("mask_distance", &mask_shader_source(MASK_DISTANCE_BODY));
    }

    #[test]
    fn test_mask_depth_shader_validates() {
        validate_shader("mask_depth", &mask_shader_source(MASK_DEPTH_BODY));
    }

    #[test]
    fn test_kawase_shader_validates() {
        validate_shader("kawase", &compose(&[FULLSCREEN_VERTEX, KAWASE_SHADER_BODY]));
    }

    #[test]
    fn test_composite_shader_validates() {
        validate_shader("composite", &compose(&[FULLSCREEN_VERTEX, COMPOSITE_SHADER_BODY]));
    }
}
