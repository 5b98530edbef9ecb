// SPDX-License-Identifier: GPL-3.0-only

//! Render camera and per-view camera matrices
//!
//! View matrices are world-to-camera; a camera's world matrix is the inverse.
//! Cameras look down -Z.

use glam::{Mat4, Vec3};

/// View, projection and combined view-projection for one camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMatrices {
    /// World to camera
    pub view: Mat4,
    /// Camera to clip
    pub projection: Mat4,
    /// World to clip (`projection * view`)
    pub view_projection: Mat4,
}

impl CameraMatrices {
    /// Build from view and projection, deriving the combined matrix
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
        }
    }

    /// Camera to world
    pub fn world(&self) -> Mat4 {
        self.view.inverse()
    }

    /// Whether every matrix is finite and the invertible ones are invertible
    pub fn is_usable(&self) -> bool {
        is_invertible(&self.view)
            && is_invertible(&self.projection)
            && self.view_projection.is_finite()
    }
}

impl Default for CameraMatrices {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// Whether a matrix is finite with a non-zero determinant
pub fn is_invertible(m: &Mat4) -> bool {
    m.is_finite() && m.determinant().abs() > f32::EPSILON * f32::EPSILON
}

/// The application's render camera for one view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderCamera {
    /// Camera to world
    pub world: Mat4,
    /// Camera to clip, in the host renderer's depth convention
    pub projection: Mat4,
    /// Drawing-buffer size in pixels
    pub viewport: (u32, u32),
}

impl RenderCamera {
    /// Camera at `world` with a right-handed perspective projection
    pub fn perspective(world: Mat4, fov_y: f32, viewport: (u32, u32), near: f32, far: f32) -> Self {
        let aspect = if viewport.1 == 0 {
            1.0
        } else {
            viewport.0 as f32 / viewport.1 as f32
        };
        Self {
            world,
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
            viewport,
        }
    }

    /// Camera at the origin looking down -Z
    pub fn at_origin(fov_y: f32, viewport: (u32, u32)) -> Self {
        Self::perspective(Mat4::IDENTITY, fov_y, viewport, 0.1, 100.0)
    }

    /// World to camera
    pub fn view(&self) -> Mat4 {
        self.world.inverse()
    }

    /// Matrices of this camera
    pub fn matrices(&self) -> CameraMatrices {
        CameraMatrices::new(self.view(), self.projection)
    }

    /// Clip to world (inverse view-projection)
    pub fn world_from_clip(&self) -> Mat4 {
        self.world * self.projection.inverse()
    }

    /// Viewport aspect ratio, `None` when degenerate
    pub fn aspect(&self) -> Option<f32> {
        (self.viewport.0 > 0 && self.viewport.1 > 0)
            .then(|| self.viewport.0 as f32 / self.viewport.1 as f32)
    }

    /// Camera position in world space
    pub fn position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }

    /// Forward direction (-Z of the camera) in world space
    pub fn forward(&self) -> Vec3 {
        -self.world.z_axis.truncate().normalize_or_zero()
    }
}
