// SPDX-License-Identifier: GPL-3.0-only

//! GPU integration tests for the occlusion pipeline
//!
//! Every test skips when no adapter is available.

use glam::{Mat4, Vec3};
use image::RgbaImage;
use xr_depth::config::DepthConfig;
use xr_depth::depth::{CpuSamples, DepthEncoding, DepthFrameStore, SensorView};
use xr_depth::gpu::wgpu;
use xr_depth::shaders::occlusion::OcclusionStage;
use xr_depth::shaders::{
    FrameTargets, OccluderMesh, OcclusionMaskPipeline, OcclusionView, PassOutcome, RenderLayers,
    SkipReason, read_texture_async,
};
use xr_depth::{GpuContext, RenderCamera};

const SIZE: u32 = 64;

fn setup() -> Option<(GpuContext, OcclusionMaskPipeline)> {
    setup_with(&DepthConfig::default())
}

fn setup_with(config: &DepthConfig) -> Option<(GpuContext, OcclusionMaskPipeline)> {
    let ctx = match pollster::block_on(GpuContext::new_headless("xr-depth-test")) {
        Ok(ctx) => ctx,
        Err(e) => {
            println!("Skipping test (no GPU): {}", e);
            return None;
        }
    };
    match OcclusionMaskPipeline::from_config(&ctx, config) {
        Ok(pipeline) => Some((ctx, pipeline)),
        Err(e) => {
            println!("Skipping test (no GPU): {}", e);
            None
        }
    }
}

fn camera() -> RenderCamera {
    RenderCamera::at_origin(1.0, (SIZE, SIZE))
}

fn wall(camera: &RenderCamera, meters: f32) -> DepthFrameStore {
    let raw = (meters * 1000.0).round() as u16;
    let mut store = DepthFrameStore::new();
    store.begin_session();
    store
        .update_from_cpu_samples(
            0,
            CpuSamples::U16(vec![raw; 160 * 160]),
            160,
            160,
            0.001,
            SensorView::RenderCamera,
            camera,
        )
        .unwrap();
    store
}

/// Quad at 1 m, offset along X so it covers the chosen part of the view
fn occluder(ctx: &GpuContext, x_offset: f32) -> OccluderMesh {
    OccluderMesh::quad(
        &ctx.device,
        10.0,
        &[Mat4::from_translation(Vec3::new(x_offset, 0.0, -1.0))],
        RenderLayers::OCCLUSION,
    )
}

fn mask(pipeline: &mut OcclusionMaskPipeline) -> RgbaImage {
    let snapshot = pipeline.request_mask_snapshot(0).expect("mask exists");
    let image = pollster::block_on(snapshot).expect("mask readback");
    (*image).clone()
}

fn mean_channel(image: &RgbaImage, channel: usize) -> f32 {
    let sum: f32 = image.pixels().map(|p| p[channel] as f32 / 255.0).sum();
    sum / (image.width() * image.height()) as f32
}

#[test]
fn test_virtual_in_front_of_wall_is_visible() {
    let Some((ctx, mut pipeline)) = setup() else {
        return;
    };
    let camera = camera();
    let store = wall(&camera, 2.0);
    let view = OcclusionView {
        view_index: 0,
        camera: &camera,
    };

    let outcome = pipeline
        .render_occlusion_mask(&view, &store, &occluder(&ctx, 0.0))
        .unwrap();
    assert_eq!(outcome, PassOutcome::Rendered);
    assert_eq!(pipeline.stage(0), OcclusionStage::BlurPyramid);

    let image = mask(&mut pipeline);
    let center = image.get_pixel(SIZE / 2, SIZE / 2);
    assert!(center[0] >= 250, "visible r = {}", center[0]);
    assert!(center[1] >= 250, "coverage g = {}", center[1]);
}

#[test]
fn test_virtual_behind_wall_is_hidden() {
    let Some((ctx, mut pipeline)) = setup() else {
        return;
    };
    let camera = camera();
    let store = wall(&camera, 0.5);
    let view = OcclusionView {
        view_index: 0,
        camera: &camera,
    };

    pipeline
        .render_occlusion_mask(&view, &store, &occluder(&ctx, 0.0))
        .unwrap();

    let image = mask(&mut pipeline);
    let center = image.get_pixel(SIZE / 2, SIZE / 2);
    assert!(center[0] <= 5, "hidden r = {}", center[0]);
    assert!(center[1] >= 250, "coverage g = {}", center[1]);
}

#[test]
fn test_blur_keeps_average_intensity() {
    let Some((ctx, mut pipeline)) = setup() else {
        return;
    };
    let camera = camera();
    let store = wall(&camera, 2.0);
    let view = OcclusionView {
        view_index: 0,
        camera: &camera,
    };

    // Right edge of the quad on the optical axis: left half covered
    pipeline
        .render_occlusion_mask(&view, &store, &occluder(&ctx, -10.0))
        .unwrap();

    let image = mask(&mut pipeline);
    let mean = mean_channel(&image, 0);
    assert!((mean - 0.5).abs() < 0.025, "mean visibility {}", mean);
}

#[test]
fn test_blur_keeps_fully_visible_mask_constant() {
    let config = DepthConfig::default();
    let Some((ctx, mut pipeline)) = setup_with(&config) else {
        return;
    };
    // Neither side is a power of two, so pyramid levels round down
    let camera = RenderCamera::at_origin(1.0, (100, 60));
    let store = wall(&camera, 2.0);
    let view = OcclusionView {
        view_index: 0,
        camera: &camera,
    };

    pipeline
        .render_occlusion_mask(&view, &store, &occluder(&ctx, 0.0))
        .unwrap();

    let image = mask(&mut pipeline);
    assert_eq!(image.dimensions(), (100, 60));
    for (x, y, p) in image.enumerate_pixels() {
        assert!(p[0] >= 242, "r = {} at ({}, {})", p[0], x, y);
    }
}

#[test]
fn test_snapshot_holds_mask_at_request_time() {
    let Some((ctx, mut pipeline)) = setup() else {
        return;
    };
    let camera = camera();
    let scene = occluder(&ctx, 0.0);
    let view = OcclusionView {
        view_index: 0,
        camera: &camera,
    };

    pipeline
        .render_occlusion_mask(&view, &wall(&camera, 2.0), &scene)
        .unwrap();
    let visible = pipeline.request_mask_snapshot(0).unwrap();

    // Redraw the mask before the first snapshot is awaited
    pipeline
        .render_occlusion_mask(&view, &wall(&camera, 0.5), &scene)
        .unwrap();
    let hidden = pipeline.request_mask_snapshot(0).unwrap();

    let visible = pollster::block_on(visible).unwrap();
    let hidden = pollster::block_on(hidden).unwrap();
    assert!(visible.get_pixel(SIZE / 2, SIZE / 2)[0] >= 250);
    assert!(hidden.get_pixel(SIZE / 2, SIZE / 2)[0] <= 5);
}

#[test]
fn test_config_disables_occlusion() {
    let config = DepthConfig {
        occlusion_enabled: false,
        ..DepthConfig::default()
    };
    let Some((ctx, mut pipeline)) = setup_with(&config) else {
        return;
    };
    assert!(!pipeline.is_enabled());

    let camera = camera();
    let view = OcclusionView {
        view_index: 0,
        camera: &camera,
    };
    let outcome = pipeline
        .render_occlusion_mask(&view, &wall(&camera, 2.0), &occluder(&ctx, 0.0))
        .unwrap();
    assert_eq!(outcome, PassOutcome::Skipped(SkipReason::Disabled));
    assert_eq!(pipeline.mask_generation(0), 0);
}

#[test]
fn test_config_float32_upload_matches_packed() {
    let config = DepthConfig {
        use_float32: true,
        ..DepthConfig::default()
    };
    let Some((ctx, mut pipeline)) = setup_with(&config) else {
        return;
    };
    let camera = camera();
    let scene = occluder(&ctx, 0.0);
    let view = OcclusionView {
        view_index: 0,
        camera: &camera,
    };

    pipeline
        .render_occlusion_mask(&view, &wall(&camera, 0.5), &scene)
        .unwrap();
    assert_eq!(pipeline.upload_encoding(0), Some(DepthEncoding::Float32));
    assert!(mask(&mut pipeline).get_pixel(SIZE / 2, SIZE / 2)[0] <= 5);

    pipeline.set_float32_upload(false);
    pipeline
        .render_occlusion_mask(&view, &wall(&camera, 2.0), &scene)
        .unwrap();
    assert_eq!(pipeline.upload_encoding(0), Some(DepthEncoding::Packed16));
    assert!(mask(&mut pipeline).get_pixel(SIZE / 2, SIZE / 2)[0] >= 250);
}

#[test]
fn test_missing_depth_keeps_previous_mask() {
    let Some((ctx, mut pipeline)) = setup() else {
        return;
    };
    let camera = camera();
    let store = wall(&camera, 2.0);
    let scene = occluder(&ctx, 0.0);

    let first = OcclusionView {
        view_index: 0,
        camera: &camera,
    };
    pipeline.render_occlusion_mask(&first, &store, &scene).unwrap();
    let generation = pipeline.mask_generation(0);
    assert!(generation > 0);

    let empty = DepthFrameStore::new();
    let outcome = pipeline.render_occlusion_mask(&first, &empty, &scene).unwrap();
    assert_eq!(outcome, PassOutcome::Skipped(SkipReason::NoRealDepth));
    assert_eq!(pipeline.mask_generation(0), generation);
    assert!(pipeline.mask_texture(0).is_some());
}

#[test]
fn test_disabled_pipeline_skips() {
    let Some((ctx, mut pipeline)) = setup() else {
        return;
    };
    let camera = camera();
    let store = wall(&camera, 2.0);
    pipeline.set_enabled(false);

    let view = OcclusionView {
        view_index: 0,
        camera: &camera,
    };
    let outcome = pipeline
        .render_occlusion_mask(&view, &store, &occluder(&ctx, 0.0))
        .unwrap();
    assert_eq!(outcome, PassOutcome::Skipped(SkipReason::Disabled));
    assert_eq!(pipeline.mask_generation(0), 0);
}

fn white_texture(ctx: &GpuContext) -> wgpu::Texture {
    let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("test_color"),
        size: wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    ctx.queue.write_texture(
        texture.as_image_copy(),
        &vec![255u8; (SIZE * SIZE * 4) as usize],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(SIZE * 4),
            rows_per_image: Some(SIZE),
        },
        wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
    );
    texture
}

fn composite_center(real_depth: f32) -> Option<[u8; 4]> {
    let (ctx, mut pipeline) = setup()?;
    let camera = camera();
    let store = wall(&camera, real_depth);
    let view = OcclusionView {
        view_index: 0,
        camera: &camera,
    };

    pipeline
        .render_occlusion_mask(&view, &store, &occluder(&ctx, 0.0))
        .unwrap();

    let color = white_texture(&ctx);
    let destination = white_texture(&ctx);
    let outcome = pipeline
        .apply_to_frame(
            &view,
            &store,
            FrameTargets {
                source_color: &color,
                source_depth: None,
                destination: Some(&destination),
            },
        )
        .unwrap();
    assert_eq!(outcome, PassOutcome::Rendered);
    assert_eq!(pipeline.stage(0), OcclusionStage::Idle);

    let bytes =
        pollster::block_on(read_texture_async(&ctx.device, &ctx.queue, &destination, 4)).unwrap();
    let i = (((SIZE / 2) * SIZE + SIZE / 2) * 4) as usize;
    Some([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
}

#[test]
fn test_composite_keeps_visible_color() {
    let Some(pixel) = composite_center(2.0) else {
        return;
    };
    assert!(pixel[0] >= 250 && pixel[1] >= 250 && pixel[2] >= 250, "{:?}", pixel);
}

#[test]
fn test_composite_hides_occluded_color() {
    let Some(pixel) = composite_center(0.5) else {
        return;
    };
    assert!(pixel[0] <= 5 && pixel[1] <= 5 && pixel[2] <= 5, "{:?}", pixel);
}
