// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for colour UV to world reprojection

use glam::{Mat4, Vec2, Vec3};
use xr_depth::depth::{CpuSamples, DepthFrameStore, SensorView};
use xr_depth::errors::ReprojectionStage;
use xr_depth::transform::{AspectRatios, CoordinateTransformer, DistortionParams, SimulatedCamera};
use xr_depth::{DepthError, RenderCamera};

const VIEWPORT: (u32, u32) = (640, 480);

fn flat_wall(camera: &RenderCamera, meters: f32) -> DepthFrameStore {
    let mut store = DepthFrameStore::new();
    store
        .update_from_cpu_samples(
            0,
            CpuSamples::F32(vec![meters; 64 * 48]),
            64,
            48,
            1.0,
            SensorView::RenderCamera,
            camera,
        )
        .unwrap();
    store
}

fn matching_transformer() -> CoordinateTransformer {
    let aspect = AspectRatios::from_sizes(VIEWPORT, VIEWPORT);
    CoordinateTransformer::simulated(
        aspect,
        SimulatedCamera {
            sensor_aspect: VIEWPORT.0 as f32 / VIEWPORT.1 as f32,
        },
    )
}

#[test]
fn test_center_uv_lands_on_the_optical_axis() {
    let camera = RenderCamera::at_origin(1.0, VIEWPORT);
    let store = flat_wall(&camera, 2.5);
    let mut transformer = matching_transformer();

    let p = transformer
        .uv_to_world(Vec2::splat(0.5), &store, &camera, 0)
        .expect("world point");
    assert!((p - Vec3::new(0.0, 0.0, -2.5)).length() < 1e-3, "got {:?}", p);
}

#[test]
fn test_off_center_points_keep_wall_depth() {
    let camera = RenderCamera::at_origin(1.0, VIEWPORT);
    let store = flat_wall(&camera, 3.0);
    let mut transformer = matching_transformer();

    for uv in [Vec2::new(0.1, 0.2), Vec2::new(0.8, 0.9), Vec2::new(0.3, 0.6)] {
        let p = transformer.uv_to_world(uv, &store, &camera, 0).unwrap();
        assert!((p.z + 3.0).abs() < 1e-3, "uv {:?} -> {:?}", uv, p);
        // Bottom-origin UV: left/below centre stays left/below the axis
        assert_eq!(p.x < 0.0, uv.x < 0.5);
        assert_eq!(p.y < 0.0, uv.y < 0.5);
    }
}

fn calibrated_transformer(distortion: DistortionParams) -> CoordinateTransformer {
    CoordinateTransformer::new(distortion, AspectRatios::from_sizes(VIEWPORT, VIEWPORT))
}

#[test]
fn test_identity_calibration_center_lands_on_axis() {
    let camera = RenderCamera::at_origin(1.0, VIEWPORT);
    let store = flat_wall(&camera, 2.5);
    let mut transformer = calibrated_transformer(DistortionParams::IDENTITY);

    let p = transformer
        .uv_to_world(Vec2::splat(0.5), &store, &camera, 0)
        .expect("world point");
    assert!((p - Vec3::new(0.0, 0.0, -2.5)).length() < 1e-3, "got {:?}", p);
}

#[test]
fn test_radial_distortion_pushes_points_outward() {
    let camera = RenderCamera::at_origin(1.0, VIEWPORT);
    let store = flat_wall(&camera, 2.0);
    let uv = Vec2::new(0.8, 0.7);

    let mut plain = calibrated_transformer(DistortionParams::IDENTITY);
    let mut barrel = calibrated_transformer(DistortionParams {
        k1: 0.5,
        ..DistortionParams::IDENTITY
    });
    let p0 = plain.uv_to_world(uv, &store, &camera, 0).unwrap();
    let p1 = barrel.uv_to_world(uv, &store, &camera, 0).unwrap();

    // r² of (0.3, 0.2) is 0.13: radial factor 1 + 0.5 * 0.13
    let expected = 1.0 + 0.5 * 0.13;
    assert!((p1.x / p0.x - expected).abs() < 1e-3, "{:?} vs {:?}", p1, p0);
    assert!((p1.y / p0.y - expected).abs() < 1e-3, "{:?} vs {:?}", p1, p0);
    assert!((p1.z - p0.z).abs() < 1e-3);

    // The centre has r = 0 and does not move
    let c = barrel.uv_to_world(Vec2::splat(0.5), &store, &camera, 0).unwrap();
    assert!(c.truncate().length() < 1e-3, "got {:?}", c);
}

#[test]
fn test_world_matrix_moves_the_point() {
    let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
    let camera = RenderCamera::perspective(world, 1.0, VIEWPORT, 0.1, 100.0);
    let store = flat_wall(&camera, 2.0);
    let mut transformer = matching_transformer();

    let p = transformer
        .uv_to_world(Vec2::splat(0.5), &store, &camera, 0)
        .unwrap();
    assert!((p - Vec3::new(1.0, 2.0, 1.0)).length() < 1e-3, "got {:?}", p);
}

#[test]
fn test_no_frame_is_depth_unavailable() {
    let camera = RenderCamera::at_origin(1.0, VIEWPORT);
    let mut transformer = matching_transformer();
    let err = transformer
        .uv_to_world(Vec2::splat(0.5), &DepthFrameStore::new(), &camera, 0)
        .unwrap_err();
    assert_eq!(err, DepthError::DepthUnavailable { view_index: 0 });
    assert!(err.is_no_data());
}

#[test]
fn test_zero_depth_is_depth_unavailable() {
    let camera = RenderCamera::at_origin(1.0, VIEWPORT);
    let store = flat_wall(&camera, 0.0);
    let mut transformer = matching_transformer();
    assert!(matches!(
        transformer.uv_to_world(Vec2::splat(0.5), &store, &camera, 0),
        Err(DepthError::DepthUnavailable { .. })
    ));
}

#[test]
fn test_degenerate_aspect_fails_at_first_stage() {
    let camera = RenderCamera::at_origin(1.0, VIEWPORT);
    let store = flat_wall(&camera, 1.0);
    let mut transformer =
        CoordinateTransformer::new(DistortionParams::IDENTITY, AspectRatios::from_sizes((0, 0), VIEWPORT));

    assert_eq!(
        transformer.uv_to_world(Vec2::splat(0.5), &store, &camera, 0),
        Err(DepthError::ReprojectionFailure(ReprojectionStage::ColorToRenderClip))
    );
}

#[test]
fn test_singular_projection_is_missing_matrix_data() {
    let good = RenderCamera::at_origin(1.0, VIEWPORT);
    let store = flat_wall(&good, 1.0);
    let broken = RenderCamera {
        projection: Mat4::ZERO,
        ..good
    };
    let mut transformer = matching_transformer();

    assert!(matches!(
        transformer.uv_to_world(Vec2::splat(0.5), &store, &broken, 0),
        Err(DepthError::MissingMatrixData(_))
    ));
}
