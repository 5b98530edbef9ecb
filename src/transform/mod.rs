// SPDX-License-Identifier: GPL-3.0-only

//! Colour image UV to depth image UV to world point
//!
//! The chain composes the forward distortion model with the render camera's
//! inverse view-projection and the depth sensor's view-projection, then
//! unprojects the depth sample through the depth camera.

mod distortion;

pub use distortion::{
    AspectRatios, DistortionParams, SimulatedCamera, color_uv_to_render_clip,
};

use crate::camera::{RenderCamera, is_invertible};
use crate::depth::DepthFrameStore;
use crate::errors::{DepthError, DepthResult, ReprojectionStage};
use glam::{Mat4, Vec2, Vec3, Vec4};
use tracing::debug;

/// Homogeneous w below this is treated as a point at infinity
const MIN_W: f32 = 1e-8;

/// Map a render clip coordinate into a top-origin depth image UV
///
/// The clip point is lifted to `(x, y, 1, 1)`, taken to world space by
/// `render_world_from_clip`, then to the depth sensor's clip space by
/// `depth_clip_from_world`.
pub fn render_clip_to_depth_uv(
    clip: Vec2,
    render_world_from_clip: &Mat4,
    depth_clip_from_world: &Mat4,
) -> Option<Vec2> {
    let world = *render_world_from_clip * Vec4::new(clip.x, clip.y, 1.0, 1.0);
    let depth_clip = *depth_clip_from_world * world;
    if !depth_clip.is_finite() || depth_clip.w.abs() < MIN_W {
        return None;
    }
    let ndc = depth_clip.truncate() / depth_clip.w;
    Some(Vec2::new((ndc.x + 1.0) * 0.5, 1.0 - (ndc.y + 1.0) * 0.5))
}

/// Combined matrix taking render clip coordinates to depth clip coordinates
///
/// The GPU mask pass applies this per pixel, using the same `(x, y, 1, 1)`
/// lift as [`render_clip_to_depth_uv`].
pub fn depth_clip_from_render_clip(
    render_world_from_clip: &Mat4,
    depth_clip_from_world: &Mat4,
) -> Mat4 {
    *depth_clip_from_world * *render_world_from_clip
}

/// Scratch values reused by one transform call
///
/// Owned exclusively by the transformer and reset at the start of each call,
/// so nothing leaks from one query into the next.
#[derive(Debug, Default, Clone, Copy)]
struct TransformScratch {
    clip: Vec2,
    depth_uv: Vec2,
    near_point: Vec4,
    camera_point: Vec3,
}

impl TransformScratch {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Resolves colour-image UVs into world points using a depth frame store
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    distortion: DistortionParams,
    aspect: AspectRatios,
    simulated: Option<SimulatedCamera>,
    scratch: TransformScratch,
}

impl CoordinateTransformer {
    /// Transformer for a calibrated device camera
    pub fn new(distortion: DistortionParams, aspect: AspectRatios) -> Self {
        Self {
            distortion,
            aspect,
            simulated: None,
            scratch: TransformScratch::default(),
        }
    }

    /// Transformer for a simulated camera
    pub fn simulated(aspect: AspectRatios, camera: SimulatedCamera) -> Self {
        Self {
            distortion: DistortionParams::IDENTITY,
            aspect,
            simulated: Some(camera),
            scratch: TransformScratch::default(),
        }
    }

    /// Distortion parameters in use
    pub fn distortion(&self) -> &DistortionParams {
        &self.distortion
    }

    /// Replace the aspect ratios (e.g. after a viewport resize)
    pub fn set_aspect(&mut self, aspect: AspectRatios) {
        self.aspect = aspect;
    }

    /// Colour UV to render clip, with this transformer's calibration
    pub fn color_uv_to_render_clip(&self, uv: Vec2) -> Option<Vec2> {
        color_uv_to_render_clip(uv, &self.distortion, self.aspect, self.simulated.as_ref())
    }

    /// Colour UV to top-origin depth image UV for one view
    pub fn color_uv_to_depth_uv(
        &mut self,
        uv: Vec2,
        store: &DepthFrameStore,
        render_camera: &RenderCamera,
        view_index: usize,
    ) -> DepthResult<Vec2> {
        self.scratch.reset();

        let depth_matrices = store
            .matrices(view_index)
            .ok_or(DepthError::DepthUnavailable { view_index })?;
        if !is_invertible(&render_camera.projection) || !render_camera.world.is_finite() {
            return Err(DepthError::MissingMatrixData(
                "render camera projection".to_string(),
            ));
        }

        self.scratch.clip = self
            .color_uv_to_render_clip(uv)
            .ok_or(ReprojectionStage::ColorToRenderClip)?;
        self.scratch.depth_uv = render_clip_to_depth_uv(
            self.scratch.clip,
            &render_camera.world_from_clip(),
            &depth_matrices.view_projection,
        )
        .ok_or(ReprojectionStage::RenderClipToDepthUv)?;

        Ok(self.scratch.depth_uv)
    }

    /// Colour UV to world point
    ///
    /// Samples metric depth at the reprojected depth UV and places the point
    /// at that depth along the depth camera ray. Routine "no data" outcomes
    /// come back as `DepthUnavailable` or `ReprojectionFailure`.
    pub fn uv_to_world(
        &mut self,
        uv: Vec2,
        store: &DepthFrameStore,
        render_camera: &RenderCamera,
        view_index: usize,
    ) -> DepthResult<Vec3> {
        let depth_uv = self.color_uv_to_depth_uv(uv, store, render_camera, view_index)?;

        // Depth UV is top-origin; sampling and NDC use v pointing up
        let u = depth_uv.x;
        let v = 1.0 - depth_uv.y;

        let depth = store.sample_meters(u, v, view_index);
        if depth <= 0.0 || !depth.is_finite() {
            debug!(view_index, u, v, "No depth sample at reprojected UV");
            return Err(DepthError::DepthUnavailable { view_index });
        }

        let matrices = store
            .matrices(view_index)
            .ok_or(DepthError::DepthUnavailable { view_index })?;
        if !matrices.is_usable() {
            return Err(DepthError::MissingMatrixData(format!(
                "depth camera matrices for view {}",
                view_index
            )));
        }

        self.scratch.near_point =
            matrices.projection.inverse() * Vec4::new(2.0 * u - 1.0, 2.0 * v - 1.0, -1.0, 1.0);
        if self.scratch.near_point.w.abs() < MIN_W {
            return Err(ReprojectionStage::Unproject.into());
        }
        let point = self.scratch.near_point.truncate() / self.scratch.near_point.w;
        if point.z.abs() < MIN_W {
            return Err(ReprojectionStage::Unproject.into());
        }

        // Camera looks down -Z: scale the ray so its z equals -depth
        self.scratch.camera_point = point * (-depth / point.z);

        Ok(matrices.world().transform_point3(self.scratch.camera_point))
    }
}
