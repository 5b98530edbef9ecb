// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for depth inspection
//!
//! This module provides command-line functionality for:
//! - Point queries on a raw depth dump
//! - Building the displaced surface from a dump
//! - Rendering an occlusion mask on a headless GPU
//! - Showing the effective configuration

use crate::{DumpArgs, RawFormat};
use glam::{Mat4, Vec2, Vec3};
use std::path::{Path, PathBuf};
use xr_depth::config::DepthConfig;
use xr_depth::constants::depth::MILLIMETERS_TO_METERS;
use xr_depth::constants::format_depth;
use xr_depth::depth::{CpuSamples, DepthFrameStore, SensorView};
use xr_depth::pipelines::save_snapshot;
use xr_depth::shaders::{OccluderMesh, OcclusionMaskPipeline, OcclusionView, PassOutcome, RenderLayers};
use xr_depth::surface::DepthSurfaceBuilder;
use xr_depth::transform::{AspectRatios, CoordinateTransformer, SimulatedCamera};
use xr_depth::{GpuContext, GridPreset, RenderCamera};

/// Grid of the synthetic depth frame used by the `occlusion` command
const SYNTHETIC_DEPTH_SIZE: u32 = 160;

/// Load the config from `path`, or from the default location
pub fn load_config(path: Option<&Path>) -> Result<DepthConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => DepthConfig::load_from(path)?,
        None => DepthConfig::load()?,
    };
    Ok(config)
}

/// Print metric depth (and optionally the world point) at a coordinate
pub fn sample(
    config: &DepthConfig,
    dump: &DumpArgs,
    u: f32,
    v: f32,
    world: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (store, camera) = load_dump(config, dump)?;

    let meters = store.sample_meters(u, v, 0);
    println!("Depth at ({:.3}, {:.3}): {}", u, v, format_depth(meters));

    if world {
        let aspect = AspectRatios::from_sizes((dump.width, dump.height), camera.viewport);
        let sensor = SimulatedCamera {
            sensor_aspect: dump.width as f32 / dump.height as f32,
        };
        let mut transformer = CoordinateTransformer::simulated(aspect, sensor);

        match transformer.uv_to_world(Vec2::new(u, v), &store, &camera, 0) {
            Ok(p) => println!("World point: ({:.3}, {:.3}, {:.3})", p.x, p.y, p.z),
            Err(e) if e.is_no_data() => println!("World point: no data ({})", e),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Build the displaced surface from a dump and print a summary
pub fn mesh(
    config: &DepthConfig,
    dump: &DumpArgs,
    grid: Option<GridPreset>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (store, camera) = load_dump(config, dump)?;

    let mut options = config.mesh.clone();
    if let Some(grid) = grid {
        options.dense_grid = grid;
    }

    let mut builder = DepthSurfaceBuilder::new(&options)?;
    let update = builder.update(&store, 0, &camera)?;
    let mesh = builder.mesh();

    println!(
        "Surface: {}x{} vertices ({} grid), {} triangles",
        mesh.cols(),
        mesh.rows(),
        options.dense_grid.display_name(),
        mesh.indices().len() / 3
    );
    match update.range {
        Some(range) => println!(
            "Depth range: {} - {}",
            format_depth(range.min),
            format_depth(range.max)
        ),
        None => println!("Depth range: no valid samples"),
    }
    println!("Patched vertices: {}", update.patched);

    let center = mesh.positions()[mesh.vertex_count() / 2];
    println!(
        "Center vertex: ({:.3}, {:.3}, {:.3})",
        center.x, center.y, center.z
    );

    Ok(())
}

/// Render a mask for a quad in front of a flat wall and save it
pub fn occlusion(
    config: &DepthConfig,
    size: (u32, u32),
    real_depth: f32,
    occluder_distance: f32,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if size.0 == 0 || size.1 == 0 {
        return Err("Mask size must be non-zero".into());
    }

    let output_dir = output.unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&output_dir)?;

    // Create async runtime for the GPU readback and PNG encoding
    let rt = tokio::runtime::Runtime::new()?;
    let path = rt.block_on(async {
        let ctx = GpuContext::new_headless("xr-depth-cli").await?;
        println!(
            "Using GPU: {} ({:?})",
            ctx.info.adapter_name, ctx.info.backend
        );

        let camera = RenderCamera::at_origin(60f32.to_radians(), size);

        let mut store = DepthFrameStore::with_calibration(config.platform.clone());
        store.begin_session();
        let raw = (real_depth / MILLIMETERS_TO_METERS)
            .round()
            .clamp(0.0, u16::MAX as f32) as u16;
        let count = (SYNTHETIC_DEPTH_SIZE * SYNTHETIC_DEPTH_SIZE) as usize;
        store.update_from_cpu_samples(
            0,
            CpuSamples::U16(vec![raw; count]),
            SYNTHETIC_DEPTH_SIZE,
            SYNTHETIC_DEPTH_SIZE,
            MILLIMETERS_TO_METERS,
            SensorView::RenderCamera,
            &camera,
        )?;

        let mut pipeline = OcclusionMaskPipeline::from_config(&ctx, config)?;
        let model = Mat4::from_translation(Vec3::new(0.0, 0.0, -occluder_distance));
        let quad = OccluderMesh::quad(
            &ctx.device,
            0.25 * occluder_distance,
            &[model],
            RenderLayers::OCCLUSION,
        );

        let view = OcclusionView {
            view_index: 0,
            camera: &camera,
        };
        match pipeline.render_occlusion_mask(&view, &store, &quad)? {
            PassOutcome::Rendered => {}
            PassOutcome::Skipped(reason) => {
                return Err(format!("Occlusion pass skipped: {:?}", reason).into());
            }
        }

        let snapshot = pipeline.request_mask_snapshot(0)?;
        let path = save_snapshot(snapshot, &output_dir, 0).await?;
        Ok::<PathBuf, Box<dyn std::error::Error>>(path)
    })?;

    println!("Mask saved: {}", path.display());
    Ok(())
}

/// Print the configuration and where it comes from
pub fn show_config(
    config: &DepthConfig,
    path: Option<&Path>,
    init: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = path.map(Path::to_path_buf).or_else(DepthConfig::default_path);

    match &path {
        Some(path) if init && !path.exists() => {
            config.save_to(path)?;
            println!("Config written: {}", path.display());
        }
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: none (no config directory on this platform)"),
    }

    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Read a raw dump into a fresh store as view 0
fn load_dump(
    config: &DepthConfig,
    dump: &DumpArgs,
) -> Result<(DepthFrameStore, RenderCamera), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(&dump.input)?;
    let samples = match dump.format {
        RawFormat::U16 => CpuSamples::U16(
            bytes
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect(),
        ),
        RawFormat::F32 => CpuSamples::F32(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
    };

    let camera = RenderCamera::at_origin(dump.fov.to_radians(), (dump.width, dump.height));

    let mut store = DepthFrameStore::with_calibration(config.platform.clone());
    store.begin_session();
    store.update_from_cpu_samples(
        0,
        samples,
        dump.width,
        dump.height,
        dump.scale,
        SensorView::RenderCamera,
        &camera,
    )?;

    Ok((store, camera))
}
