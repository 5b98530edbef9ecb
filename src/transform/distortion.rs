// SPDX-License-Identifier: GPL-3.0-only

//! Forward lens distortion from colour-image UV to render clip space
//!
//! Radial (k1..k3) plus tangential (p1, p2) terms around a shifted centre,
//! followed by aspect fit, translation and a final zoom/stretch. There is no
//! closed-form inverse; reverse lookups can only linearize locally.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Calibration of the colour camera relative to the render camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionParams {
    /// Distortion centre offset (x), in recentred UV units
    pub xc: f32,
    /// Distortion centre offset (y)
    pub yc: f32,
    /// Radial coefficients
    pub k1: f32,
    pub k2: f32,
    pub k3: f32,
    /// Tangential coefficients
    pub p1: f32,
    pub p2: f32,
    /// Uniform zoom
    pub scale: f32,
    /// Horizontal stretch
    pub scale_x: f32,
    /// Vertical stretch
    pub scale_y: f32,
    /// Horizontal translation, in recentred UV units
    pub translate_u: f32,
    /// Vertical translation
    pub translate_v: f32,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl DistortionParams {
    /// No distortion, no fit correction beyond aspect
    pub const IDENTITY: Self = Self {
        xc: 0.0,
        yc: 0.0,
        k1: 0.0,
        k2: 0.0,
        k3: 0.0,
        p1: 0.0,
        p2: 0.0,
        scale: 1.0,
        scale_x: 1.0,
        scale_y: 1.0,
        translate_u: 0.0,
        translate_v: 0.0,
    };

    /// Apply the radial and tangential terms to a recentred point
    pub fn distort(&self, p: Vec2) -> Vec2 {
        let center = Vec2::new(self.xc, self.yc);
        let Vec2 { x, y } = p - center;

        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;

        let xd = x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        Vec2::new(xd, yd) + center
    }
}

/// Nominal aspect ratios of the colour sensor and the render target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectRatios {
    /// Colour sensor width / height
    pub sensor: f32,
    /// Render target width / height
    pub target: f32,
}

impl AspectRatios {
    /// Build from pixel sizes
    pub fn from_sizes(sensor: (u32, u32), target: (u32, u32)) -> Self {
        let ratio = |(w, h): (u32, u32)| if h == 0 { 0.0 } else { w as f32 / h as f32 };
        Self {
            sensor: ratio(sensor),
            target: ratio(target),
        }
    }

    /// Both ratios positive and finite
    pub fn is_valid(&self) -> bool {
        self.sensor.is_finite() && self.target.is_finite() && self.sensor > 0.0 && self.target > 0.0
    }
}

/// Simulated colour camera whose image is a centred crop of the viewport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedCamera {
    /// Simulated sensor width / height
    pub sensor_aspect: f32,
}

/// Map a colour-image UV (bottom-origin) to a render clip coordinate in `[-1, 1]`
///
/// A simulated camera skips the lens model and only undoes its letterboxed
/// crop. Returns `None` when an aspect ratio is zero or non-finite.
pub fn color_uv_to_render_clip(
    uv: Vec2,
    distortion: &DistortionParams,
    aspect: AspectRatios,
    simulated: Option<&SimulatedCamera>,
) -> Option<Vec2> {
    if !aspect.is_valid() {
        return None;
    }

    if let Some(sim) = simulated {
        return simulated_crop_to_clip(uv, sim.sensor_aspect, aspect.target);
    }

    let mut p = distortion.distort(uv - Vec2::splat(0.5));

    // Aspect fit: the wider image is squeezed into the narrower one
    if aspect.sensor > aspect.target {
        p.x *= aspect.sensor / aspect.target;
    } else {
        p.y *= aspect.target / aspect.sensor;
    }

    p += Vec2::new(distortion.translate_u, distortion.translate_v);
    p *= Vec2::new(
        distortion.scale * distortion.scale_x,
        distortion.scale * distortion.scale_y,
    );

    Some(p * 2.0)
}

/// Undo a simulator's centred crop of the viewport
fn simulated_crop_to_clip(uv: Vec2, sensor_aspect: f32, viewport_aspect: f32) -> Option<Vec2> {
    if !(sensor_aspect.is_finite() && sensor_aspect > 0.0) {
        return None;
    }

    let mut clip = uv * 2.0 - Vec2::ONE;
    if viewport_aspect > sensor_aspect {
        // Sensor image spans only the central part of the viewport width
        clip.x *= sensor_aspect / viewport_aspect;
    } else {
        clip.y *= viewport_aspect / sensor_aspect;
    }
    Some(clip)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn square() -> AspectRatios {
        AspectRatios {
            sensor: 1.0,
            target: 1.0,
        }
    }

    #[test]
    fn test_identity_reduces_to_linear_mapping() {
        let d = DistortionParams::IDENTITY;
        for &(u, v) in &[(0.0, 0.0), (0.25, 0.75), (0.5, 0.5), (1.0, 0.3)] {
            let clip = color_uv_to_render_clip(Vec2::new(u, v), &d, square(), None).unwrap();
            assert!((clip.x - (2.0 * u - 1.0)).abs() < EPS);
            assert!((clip.y - (2.0 * v - 1.0)).abs() < EPS);
        }
    }

    #[test]
    fn test_identity_with_wider_sensor_stretches_x_only() {
        let d = DistortionParams::IDENTITY;
        let aspect = AspectRatios {
            sensor: 16.0 / 9.0,
            target: 4.0 / 3.0,
        };
        let clip = color_uv_to_render_clip(Vec2::new(1.0, 1.0), &d, aspect, None).unwrap();
        assert!((clip.x - (16.0 / 9.0) / (4.0 / 3.0)).abs() < EPS);
        assert!((clip.y - 1.0).abs() < EPS);
    }

    #[test]
    fn test_identity_with_taller_sensor_stretches_y_only() {
        let d = DistortionParams::IDENTITY;
        let aspect = AspectRatios {
            sensor: 1.0,
            target: 2.0,
        };
        let clip = color_uv_to_render_clip(Vec2::new(0.0, 0.0), &d, aspect, None).unwrap();
        assert!((clip.x + 1.0).abs() < EPS);
        assert!((clip.y + 2.0).abs() < EPS);
    }

    #[test]
    fn test_degenerate_aspect_returns_none() {
        let d = DistortionParams::IDENTITY;
        let aspect = AspectRatios::from_sizes((640, 0), (640, 480));
        assert!(color_uv_to_render_clip(Vec2::splat(0.5), &d, aspect, None).is_none());
    }

    #[test]
    fn test_center_is_fixed_point_of_radial_terms() {
        let d = DistortionParams {
            k1: 0.3,
            k2: -0.1,
            k3: 0.05,
            ..DistortionParams::IDENTITY
        };
        let clip = color_uv_to_render_clip(Vec2::splat(0.5), &d, square(), None).unwrap();
        assert!(clip.length() < EPS);
    }

    #[test]
    fn test_positive_k1_pushes_corners_outward() {
        let d = DistortionParams {
            k1: 0.5,
            ..DistortionParams::IDENTITY
        };
        let clip = color_uv_to_render_clip(Vec2::new(1.0, 1.0), &d, square(), None).unwrap();
        assert!(clip.x > 1.0 && clip.y > 1.0);
    }

    #[test]
    fn test_tangential_terms_break_symmetry() {
        let d = DistortionParams {
            p1: 0.1,
            ..DistortionParams::IDENTITY
        };
        let a = d.distort(Vec2::new(0.2, 0.2));
        let b = d.distort(Vec2::new(-0.2, -0.2));
        assert!((a + b).length() > EPS);
    }

    #[test]
    fn test_simulated_camera_crops_wider_viewport() {
        let d = DistortionParams::IDENTITY;
        let aspect = AspectRatios {
            sensor: 1.0,
            target: 2.0,
        };
        let sim = SimulatedCamera { sensor_aspect: 1.0 };
        let clip = color_uv_to_render_clip(Vec2::new(1.0, 1.0), &d, aspect, Some(&sim)).unwrap();
        assert!((clip.x - 0.5).abs() < EPS);
        assert!((clip.y - 1.0).abs() < EPS);
    }

    #[test]
    fn test_simulated_camera_matching_aspect_is_identity() {
        let d = DistortionParams::IDENTITY;
        let sim = SimulatedCamera { sensor_aspect: 1.0 };
        let clip =
            color_uv_to_render_clip(Vec2::new(0.25, 0.75), &d, square(), Some(&sim)).unwrap();
        assert!((clip - Vec2::new(-0.5, 0.5)).length() < EPS);
    }
}
