// SPDX-License-Identifier: GPL-3.0-only

//! Occlusion mask pipeline
//!
//! Per view and per frame:
//! 1. Acquire virtual depth (override-material re-render, or a supplied
//!    depth buffer in post-process mode)
//! 2. Compare against the real sensor depth into a coverage-carrying mask
//! 3. Soften the mask with a three-level dual Kawase pyramid
//! 4. Multiply the rendered colour by the mask
//!
//! Mask targets are per view and persist between frames; the virtual
//! distance target and the blur pyramid are shared and reused view after
//! view.

use super::scene::{OccludableScene, RenderLayers, occluder_vertex_layouts};
use super::stage::{OcclusionStage, StageTracker};
use super::targets::{BlurPyramid, RenderTarget, SAMPLED_TARGET_USAGE};
use super::{
    COMPOSITE_SHADER_BODY, KAWASE_SHADER_BODY, MASK_COMMON_BODY, MASK_DEPTH_BODY,
    MASK_DISTANCE_BODY, VIRTUAL_DISTANCE_SHADER,
};
use crate::camera::RenderCamera;
use crate::config::{DepthConfig, OcclusionOptions};
use crate::constants::occlusion::{BLUR_PASSES, PYRAMID_LEVELS};
use crate::depth::{DepthEncoding, DepthFrameStore, DepthSource};
use crate::errors::{DepthError, DepthResult};
use crate::gpu::{GpuContext, wgpu};
use crate::pipelines::snapshot::{SharedSnapshot, SnapshotCache, texture_snapshot};
use crate::shaders::common::{
    BlurParams, DEPTH_DECODE_FUNCTIONS, FULLSCREEN_VERTEX, MaskParams, ViewUniforms, compose,
};
use crate::shaders::depth::upload_depth_texture;
use crate::shaders::gpu_utils::{
    create_fullscreen_pipeline, depth_texture_entry, draw_fullscreen, linear_clamp_sampler,
    sampler_entry, texture_entry, uniform_entry,
};
use crate::transform::depth_clip_from_render_clip;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const VIRTUAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg32Float;
const VIRTUAL_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const MASK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// One view of the current frame
#[derive(Debug, Clone, Copy)]
pub struct OcclusionView<'a> {
    /// Eye / view index into the depth store
    pub view_index: usize,
    /// Camera the virtual content is rendered with
    pub camera: &'a RenderCamera,
}

/// Colour (and optionally depth) of an already rendered frame
#[derive(Debug, Clone, Copy)]
pub struct FrameTargets<'a> {
    /// Rendered colour; must allow `TEXTURE_BINDING`, plus `COPY_SRC` and
    /// `RENDER_ATTACHMENT` when compositing in place
    pub source_color: &'a wgpu::Texture,
    /// Depth buffer of the same render; selects post-process mode
    pub source_depth: Option<&'a wgpu::Texture>,
    /// Output; `None` composites into `source_color`
    pub destination: Option<&'a wgpu::Texture>,
}

/// Why a pass did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Occlusion is switched off
    Disabled,
    /// No real depth for this view yet; the previous mask is kept
    NoRealDepth,
}

/// Result of a per-frame pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Rendered,
    Skipped(SkipReason),
}

/// Real depth inputs for one view
struct RealDepth {
    view: wgpu::TextureView,
    encoding: DepthEncoding,
    raw_to_meters: f32,
    size: [u32; 2],
    depth_clip_from_world: glam::Mat4,
}

/// CPU depth samples uploaded to a texture
struct Upload {
    sequence: u64,
    encoding: DepthEncoding,
    texture: wgpu::Texture,
}

/// Persistent per-view state
struct ViewState {
    mask: RenderTarget,
    tracker: StageTracker,
    /// Bumped whenever a new mask is written
    generation: u64,
    /// CPU frame uploaded for the GPU passes, keyed by frame sequence
    upload: Option<Upload>,
}

impl ViewState {
    fn new() -> Self {
        Self {
            mask: RenderTarget::new("occlusion_mask_texture", MASK_FORMAT, SAMPLED_TARGET_USAGE),
            tracker: StageTracker::default(),
            generation: 0,
            upload: None,
        }
    }
}

/// Which virtual depth strategy a mask pass reads from
enum VirtualSource<'a> {
    Distance,
    DepthBuffer(&'a wgpu::Texture),
}

/// Scene stand-in for post-process mode, where nothing is re-rendered
struct NoOccluders;

impl OccludableScene for NoOccluders {
    fn draw_occluders(&self, _pass: &mut wgpu::RenderPass<'_>, _layers: RenderLayers) {}
}

/// GPU occlusion mask pipeline
pub struct OcclusionMaskPipeline {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    options: OcclusionOptions,
    enabled: bool,
    /// Upload 16-bit CPU depth as `R32Float`
    float32_upload: bool,

    // Virtual distance pass
    virtual_pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    virtual_color: RenderTarget,
    virtual_depth: RenderTarget,

    // Mask generation
    mask_distance_layout: wgpu::BindGroupLayout,
    mask_depth_layout: wgpu::BindGroupLayout,
    mask_distance_pipeline: wgpu::RenderPipeline,
    mask_depth_pipeline: wgpu::RenderPipeline,
    mask_params_buffer: wgpu::Buffer,

    // Blur pyramid
    blur_layout: wgpu::BindGroupLayout,
    blur_down_pipeline: wgpu::RenderPipeline,
    blur_up_pipeline: wgpu::RenderPipeline,
    blur_buffers: Vec<wgpu::Buffer>,
    pyramid: BlurPyramid,
    sampler: wgpu::Sampler,

    // Composite
    composite_shader: wgpu::ShaderModule,
    composite_layout: wgpu::BindGroupLayout,
    composite_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    composite_scratch: RenderTarget,
    /// All-zero mask: zero coverage composites as pass-through
    neutral_mask: wgpu::TextureView,

    views: Vec<ViewState>,
    snapshots: SnapshotCache,
}

impl OcclusionMaskPipeline {
    /// Build every pass of the pipeline on the given device
    pub fn new(ctx: &GpuContext, options: OcclusionOptions) -> DepthResult<Self> {
        for format in [VIRTUAL_FORMAT, MASK_FORMAT] {
            if !ctx.supports_format(format, SAMPLED_TARGET_USAGE) {
                return Err(DepthError::Unsupported(format!(
                    "{} cannot render to {:?}",
                    ctx.info.adapter_name, format
                )));
            }
        }

        info!(adapter = %ctx.info.adapter_name, "Initializing occlusion mask pipeline");

        let device = ctx.device.clone();
        let queue = ctx.queue.clone();

        // Virtual distance pass
        let virtual_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("occlusion_virtual_distance_shader"),
            source: wgpu::ShaderSource::Wgsl(VIRTUAL_DISTANCE_SHADER.into()),
        });
        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("occlusion_camera_bind_group_layout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX)],
        });
        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("occlusion_camera_uniform_buffer"),
            size: std::mem::size_of::<ViewUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("occlusion_camera_bind_group"),
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });
        let virtual_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("occlusion_virtual_pipeline_layout"),
            bind_group_layouts: &[&camera_layout],
            push_constant_ranges: &[],
        });
        let vertex_layouts = occluder_vertex_layouts();
        let virtual_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("occlusion_virtual_pipeline"),
            layout: Some(&virtual_layout),
            vertex: wgpu::VertexState {
                module: &virtual_shader,
                entry_point: Some("vs_main"),
                buffers: &vertex_layouts,
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: Some(wgpu::DepthStencilState {
                format: VIRTUAL_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &virtual_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: VIRTUAL_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        // Mask generation, one variant per virtual depth strategy
        let mask_distance_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("occlusion_mask_distance_bind_group_layout"),
            entries: &[
                texture_entry(0, false),
                texture_entry(1, false),
                uniform_entry(2, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let mask_depth_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("occlusion_mask_depth_bind_group_layout"),
            entries: &[
                depth_texture_entry(0),
                texture_entry(1, false),
                uniform_entry(2, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let mask_distance_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("occlusion_mask_distance_shader"),
            source: wgpu::ShaderSource::Wgsl(mask_shader_source(MASK_DISTANCE_BODY).into()),
        });
        let mask_depth_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("occlusion_mask_depth_shader"),
            source: wgpu::ShaderSource::Wgsl(mask_shader_source(MASK_DEPTH_BODY).into()),
        });
        let mask_distance_pipeline = create_fullscreen_pipeline(
            &device,
            "occlusion_mask_distance_pipeline",
            &mask_distance_shader,
            &mask_distance_layout,
            "fs_mask",
            MASK_FORMAT,
        );
        let mask_depth_pipeline = create_fullscreen_pipeline(
            &device,
            "occlusion_mask_depth_pipeline",
            &mask_depth_shader,
            &mask_depth_layout,
            "fs_mask",
            MASK_FORMAT,
        );
        let mask_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("occlusion_mask_uniform_buffer"),
            size: std::mem::size_of::<MaskParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Blur pyramid
        let blur_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("occlusion_blur_bind_group_layout"),
            entries: &[
                texture_entry(0, true),
                sampler_entry(1),
                uniform_entry(2, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let blur_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("occlusion_kawase_shader"),
            source: wgpu::ShaderSource::Wgsl(
                compose(&[FULLSCREEN_VERTEX, KAWASE_SHADER_BODY]).into(),
            ),
        });
        let blur_down_pipeline = create_fullscreen_pipeline(
            &device,
            "occlusion_blur_down_pipeline",
            &blur_shader,
            &blur_layout,
            "fs_down",
            MASK_FORMAT,
        );
        let blur_up_pipeline = create_fullscreen_pipeline(
            &device,
            "occlusion_blur_up_pipeline",
            &blur_shader,
            &blur_layout,
            "fs_up",
            MASK_FORMAT,
        );
        // One uniform buffer per pass so all six can be encoded together
        let blur_buffers = (0..BLUR_PASSES)
            .map(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("occlusion_blur_uniform_buffer_{}", i)),
                    size: std::mem::size_of::<BlurParams>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        let sampler = linear_clamp_sampler(&device, "occlusion_blur_sampler");

        // Composite
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("occlusion_composite_shader"),
            source: wgpu::ShaderSource::Wgsl(
                compose(&[FULLSCREEN_VERTEX, COMPOSITE_SHADER_BODY]).into(),
            ),
        });
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("occlusion_composite_bind_group_layout"),
            entries: &[
                texture_entry(0, false),
                texture_entry(1, true),
                sampler_entry(2),
            ],
        });

        let neutral = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("occlusion_neutral_mask"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: MASK_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let neutral_mask = neutral.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            device,
            queue,
            options,
            enabled: true,
            float32_upload: false,
            virtual_pipeline,
            camera_buffer,
            camera_bind_group,
            virtual_color: RenderTarget::new(
                "occlusion_virtual_distance_texture",
                VIRTUAL_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            ),
            virtual_depth: RenderTarget::new(
                "occlusion_virtual_depth_texture",
                VIRTUAL_DEPTH_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            ),
            mask_distance_layout,
            mask_depth_layout,
            mask_distance_pipeline,
            mask_depth_pipeline,
            mask_params_buffer,
            blur_layout,
            blur_down_pipeline,
            blur_up_pipeline,
            blur_buffers,
            pyramid: BlurPyramid::new(MASK_FORMAT),
            sampler,
            composite_shader,
            composite_layout,
            composite_pipelines: HashMap::new(),
            composite_scratch: RenderTarget::new(
                "occlusion_composite_scratch",
                wgpu::TextureFormat::Rgba8Unorm,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            ),
            neutral_mask,
            views: Vec::new(),
            snapshots: SnapshotCache::default(),
        })
    }

    /// Build the pipeline with the occlusion and precision switches of `config`
    pub fn from_config(ctx: &GpuContext, config: &DepthConfig) -> DepthResult<Self> {
        let mut pipeline = Self::new(ctx, config.occlusion.clone())?;
        pipeline.set_enabled(config.occlusion_enabled);
        pipeline.set_float32_upload(config.use_float32);
        Ok(pipeline)
    }

    /// Upload 16-bit CPU depth as float instead of packed bytes
    ///
    /// Takes effect with the next frame of each view.
    pub fn set_float32_upload(&mut self, float32: bool) {
        self.float32_upload = float32;
    }

    pub fn float32_upload(&self) -> bool {
        self.float32_upload
    }

    /// Encoding of the last CPU depth upload for a view
    pub fn upload_encoding(&self, view_index: usize) -> Option<DepthEncoding> {
        self.views
            .get(view_index)
            .and_then(|v| v.upload.as_ref())
            .map(|u| u.encoding)
    }

    /// Switch occlusion on or off; when off, compositing passes colour through
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            info!(enabled, "Occlusion toggled");
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn options(&self) -> &OcclusionOptions {
        &self.options
    }

    /// Current stage of a view
    pub fn stage(&self, view_index: usize) -> OcclusionStage {
        self.views
            .get(view_index)
            .map(|v| v.tracker.stage())
            .unwrap_or_default()
    }

    /// Latest mask of a view (`r = visible * coverage`, `g = coverage`)
    pub fn mask_texture(&self, view_index: usize) -> Option<&Arc<wgpu::Texture>> {
        self.views
            .get(view_index)
            .filter(|v| v.generation > 0)
            .and_then(|v| v.mask.texture())
    }

    /// Number of masks written for a view so far
    pub fn mask_generation(&self, view_index: usize) -> u64 {
        self.views.get(view_index).map(|v| v.generation).unwrap_or(0)
    }

    /// Re-render the occludable scene and produce this view's blurred mask
    ///
    /// Runs acquire, mask and blur; [`Self::apply_to_frame`] composites.
    pub fn render_occlusion_mask<S>(
        &mut self,
        view: &OcclusionView<'_>,
        store: &DepthFrameStore,
        scene: &S,
    ) -> DepthResult<PassOutcome>
    where
        S: OccludableScene + ?Sized,
    {
        if !self.enabled {
            debug!(view_index = view.view_index, "Occlusion disabled, skipping mask");
            return Ok(PassOutcome::Skipped(SkipReason::Disabled));
        }
        let (width, height) = viewport_size(view.camera)?;

        self.ensure_view(view.view_index);
        let Some(real) = self.real_depth(view.view_index, store)? else {
            debug!(view_index = view.view_index, "No real depth, keeping previous mask");
            return Ok(PassOutcome::Skipped(SkipReason::NoRealDepth));
        };

        let result = self.run_mask_passes(view, &real, width, height, VirtualSource::Distance, scene);
        self.finish_mask_passes(view.view_index, result)
    }

    /// Composite a rendered frame with this view's mask
    ///
    /// With `source_depth` set, the mask is first rebuilt from that depth
    /// buffer (post-process mode). Otherwise the mask from
    /// [`Self::render_occlusion_mask`], or the one persisted from an
    /// earlier frame, is used.
    pub fn apply_to_frame(
        &mut self,
        view: &OcclusionView<'_>,
        store: &DepthFrameStore,
        frame: FrameTargets<'_>,
    ) -> DepthResult<PassOutcome> {
        let color = frame.source_color;
        let (width, height) = (color.width(), color.height());
        if let Some(dest) = frame.destination {
            if dest.width() != width || dest.height() != height {
                return Err(DepthError::InvalidDimensions(format!(
                    "composite {}x{} into {}x{}",
                    width,
                    height,
                    dest.width(),
                    dest.height()
                )));
            }
        }

        self.ensure_view(view.view_index);

        let mut outcome = PassOutcome::Rendered;
        if self.enabled {
            if let Some(depth) = frame.source_depth {
                match self.real_depth(view.view_index, store)? {
                    Some(real) => {
                        let result = self.run_mask_passes(
                            view,
                            &real,
                            width,
                            height,
                            VirtualSource::DepthBuffer(depth),
                            &NoOccluders,
                        );
                        self.finish_mask_passes(view.view_index, result)?;
                    }
                    None => {
                        debug!(view_index = view.view_index, "No real depth, compositing previous mask");
                        outcome = PassOutcome::Skipped(SkipReason::NoRealDepth);
                    }
                }
            }
        } else {
            outcome = PassOutcome::Skipped(SkipReason::Disabled);
            if frame.destination.is_none() {
                // Pass-through in place is a no-op
                return Ok(outcome);
            }
        }

        let tracker = &mut self.views[view.view_index].tracker;
        tracker.advance(OcclusionStage::Composite)?;

        let result = self.composite(view.view_index, frame);
        let tracker = &mut self.views[view.view_index].tracker;
        match result {
            Ok(()) => {
                tracker.advance(OcclusionStage::Idle)?;
                Ok(outcome)
            }
            Err(e) => {
                warn!(view_index = view.view_index, error = %e, "Occlusion composite failed");
                tracker.abort();
                Err(e)
            }
        }
    }

    /// Read this view's current mask back as an image
    ///
    /// The copy is queued immediately, so later mask passes do not change
    /// the result. Callers requesting the same mask share one readback.
    pub fn request_mask_snapshot(&mut self, view_index: usize) -> DepthResult<SharedSnapshot> {
        let texture = self
            .mask_texture(view_index)
            .cloned()
            .ok_or(DepthError::DepthUnavailable { view_index })?;
        let generation = self.mask_generation(view_index);
        let (device, queue) = (self.device.clone(), &self.queue);

        Ok(self.snapshots.get_or_start(view_index, generation, || {
            texture_snapshot(device, queue, &texture)
        }))
    }

    fn ensure_view(&mut self, view_index: usize) {
        if self.views.len() <= view_index {
            self.views.resize_with(view_index + 1, ViewState::new);
        }
    }

    /// Real depth texture and calibration of a view, uploading CPU frames
    fn real_depth(
        &mut self,
        view_index: usize,
        store: &DepthFrameStore,
    ) -> DepthResult<Option<RealDepth>> {
        let Some(frame) = store.frame(view_index) else {
            return Ok(None);
        };

        let (texture_view, encoding) = match &frame.source {
            DepthSource::Gpu { handle, .. } => (
                handle
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default()),
                handle.encoding,
            ),
            DepthSource::Cpu(samples) => {
                let samples = samples.for_upload(self.float32_upload);
                let encoding = samples.encoding();
                let state = &mut self.views[view_index];
                let fresh = matches!(
                    &state.upload,
                    Some(u) if u.sequence == frame.sequence && u.encoding == encoding
                );
                if !fresh {
                    let texture = upload_depth_texture(
                        &self.device,
                        &self.queue,
                        &samples,
                        frame.width,
                        frame.height,
                    )?;
                    state.upload = Some(Upload {
                        sequence: frame.sequence,
                        encoding,
                        texture,
                    });
                }
                let view = state
                    .upload
                    .as_ref()
                    .map(|u| u.texture.create_view(&wgpu::TextureViewDescriptor::default()))
                    .ok_or(DepthError::DepthUnavailable { view_index })?;
                (view, encoding)
            }
        };

        Ok(Some(RealDepth {
            view: texture_view,
            encoding,
            raw_to_meters: frame.raw_value_to_meters,
            size: [frame.width, frame.height],
            depth_clip_from_world: frame.matrices.view_projection,
        }))
    }

    /// Acquire, mask and blur for one view, in order
    fn run_mask_passes<S>(
        &mut self,
        view: &OcclusionView<'_>,
        real: &RealDepth,
        width: u32,
        height: u32,
        source: VirtualSource<'_>,
        scene: &S,
    ) -> DepthResult<()>
    where
        S: OccludableScene + ?Sized,
    {
        let view_index = view.view_index;
        if self.views[view_index].tracker.has_pending_mask() {
            debug!(view_index, "Previous mask was never composited");
            self.views[view_index].tracker.abort();
        }
        self.views[view_index]
            .tracker
            .advance(OcclusionStage::AcquireVirtualDepth)?;

        // Resize before any pass writes to the targets
        self.views[view_index]
            .mask
            .ensure(&self.device, width, height, MASK_FORMAT)?;
        self.pyramid.ensure(&self.device, width, height)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("occlusion_encoder"),
            });

        if let VirtualSource::Distance = source {
            self.virtual_color
                .ensure(&self.device, width, height, VIRTUAL_FORMAT)?;
            self.virtual_depth
                .ensure(&self.device, width, height, VIRTUAL_DEPTH_FORMAT)?;
            self.encode_virtual_distance(&mut encoder, view.camera, scene)?;
        }

        self.views[view_index]
            .tracker
            .advance(OcclusionStage::GenerateMask)?;
        self.encode_mask(&mut encoder, view_index, view.camera, real, &source)?;

        self.views[view_index]
            .tracker
            .advance(OcclusionStage::BlurPyramid)?;
        self.encode_blur(&mut encoder, view_index)?;

        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn finish_mask_passes(
        &mut self,
        view_index: usize,
        result: DepthResult<()>,
    ) -> DepthResult<PassOutcome> {
        let state = &mut self.views[view_index];
        match result {
            Ok(()) => {
                state.generation += 1;
                Ok(PassOutcome::Rendered)
            }
            Err(e) => {
                warn!(view_index, error = %e, "Occlusion mask pass failed, retrying next frame");
                state.tracker.abort();
                Err(e)
            }
        }
    }

    fn encode_virtual_distance<S>(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        camera: &RenderCamera,
        scene: &S,
    ) -> DepthResult<()>
    where
        S: OccludableScene + ?Sized,
    {
        let (Some(color), Some(depth)) = (self.virtual_color.view(), self.virtual_depth.view())
        else {
            return Err(DepthError::RenderTargetAllocationFailure(
                "virtual distance targets missing".to_string(),
            ));
        };

        let uniforms = ViewUniforms::new(camera.view(), camera.projection);
        self.queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&uniforms));

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("occlusion_virtual_distance_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.virtual_pipeline);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        scene.draw_occluders(&mut pass, RenderLayers::OCCLUSION);
        Ok(())
    }

    fn encode_mask(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        view_index: usize,
        camera: &RenderCamera,
        real: &RealDepth,
        source: &VirtualSource<'_>,
    ) -> DepthResult<()> {
        let params = MaskParams {
            depth_clip_from_render_clip: depth_clip_from_render_clip(
                &camera.world_from_clip(),
                &real.depth_clip_from_world,
            )
            .to_cols_array_2d(),
            inv_projection: camera.projection.inverse().to_cols_array_2d(),
            raw_to_meters: real.raw_to_meters,
            encoding: real.encoding.shader_mode(),
            depth_near: real.encoding.near(),
            edge_tolerance: self.options.edge_tolerance_m,
            depth_size: real.size,
            _pad: [0; 2],
        };
        self.queue
            .write_buffer(&self.mask_params_buffer, 0, bytemuck::bytes_of(&params));

        let target = self.views[view_index]
            .mask
            .view()
            .ok_or_else(|| DepthError::RenderTargetAllocationFailure("mask target missing".into()))?;

        let depth_view;
        let (pipeline, layout, virtual_view) = match source {
            VirtualSource::Distance => (
                &self.mask_distance_pipeline,
                &self.mask_distance_layout,
                self.virtual_color.view().ok_or_else(|| {
                    DepthError::RenderTargetAllocationFailure("virtual target missing".into())
                })?,
            ),
            VirtualSource::DepthBuffer(texture) => {
                depth_view = texture.create_view(&wgpu::TextureViewDescriptor {
                    aspect: wgpu::TextureAspect::DepthOnly,
                    ..Default::default()
                });
                (&self.mask_depth_pipeline, &self.mask_depth_layout, &depth_view)
            }
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("occlusion_mask_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(virtual_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&real.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.mask_params_buffer.as_entire_binding(),
                },
            ],
        });

        draw_fullscreen(encoder, "occlusion_mask_pass", pipeline, &bind_group, target);
        Ok(())
    }

    /// Three downsamples into the pyramid, three upsamples back into the mask
    fn encode_blur(&self, encoder: &mut wgpu::CommandEncoder, view_index: usize) -> DepthResult<()> {
        let missing = || DepthError::RenderTargetAllocationFailure("blur target missing".into());
        let mask = &self.views[view_index].mask;

        let mut chain: Vec<&RenderTarget> = Vec::with_capacity(PYRAMID_LEVELS + 1);
        chain.push(mask);
        for i in 0..PYRAMID_LEVELS {
            chain.push(self.pyramid.level(i));
        }

        // (source, destination, pipeline): down mask->p0->p1->p2, up p2->p1->p0->mask
        let mut passes = Vec::with_capacity(BLUR_PASSES);
        for i in 0..PYRAMID_LEVELS {
            passes.push((chain[i], chain[i + 1], &self.blur_down_pipeline));
        }
        for i in (0..PYRAMID_LEVELS).rev() {
            passes.push((chain[i + 1], chain[i], &self.blur_up_pipeline));
        }

        for (i, (source, destination, pipeline)) in passes.into_iter().enumerate() {
            let dims = source.dimensions();
            let params = BlurParams::for_source(dims.width, dims.height, self.options.blur_offset);
            self.queue
                .write_buffer(&self.blur_buffers[i], 0, bytemuck::bytes_of(&params));

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("occlusion_blur_bind_group"),
                layout: &self.blur_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(
                            source.view().ok_or_else(missing)?,
                        ),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.blur_buffers[i].as_entire_binding(),
                    },
                ],
            });

            draw_fullscreen(
                encoder,
                "occlusion_blur_pass",
                pipeline,
                &bind_group,
                destination.view().ok_or_else(missing)?,
            );
        }
        Ok(())
    }

    /// Composite pipelines are cached per destination format
    fn ensure_composite_pipeline(&mut self, format: wgpu::TextureFormat) {
        let device = &self.device;
        let shader = &self.composite_shader;
        let layout = &self.composite_layout;
        self.composite_pipelines.entry(format).or_insert_with(|| {
            debug!(format = ?format, "Creating composite pipeline");
            create_fullscreen_pipeline(
                device,
                "occlusion_composite_pipeline",
                shader,
                layout,
                "fs_composite",
                format,
            )
        });
    }

    fn composite(&mut self, view_index: usize, frame: FrameTargets<'_>) -> DepthResult<()> {
        let color = frame.source_color;
        let (width, height) = (color.width(), color.height());
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("occlusion_composite_encoder"),
            });

        // In place: read from a copy, write over the original
        let (input_view, output_texture) = match frame.destination {
            Some(dest) => (color.create_view(&wgpu::TextureViewDescriptor::default()), dest),
            None => {
                self.composite_scratch
                    .ensure(&self.device, width, height, color.format())?;
                let scratch = self
                    .composite_scratch
                    .texture()
                    .ok_or_else(|| {
                        DepthError::RenderTargetAllocationFailure("composite scratch missing".into())
                    })?
                    .clone();
                encoder.copy_texture_to_texture(
                    color.as_image_copy(),
                    scratch.as_image_copy(),
                    size,
                );
                (
                    scratch.create_view(&wgpu::TextureViewDescriptor::default()),
                    color,
                )
            }
        };
        let output_view = output_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let format = output_texture.format();
        self.ensure_composite_pipeline(format);

        let use_mask = self.enabled && self.views[view_index].generation > 0;
        let mask_view = if use_mask {
            self.views[view_index].mask.view().unwrap_or(&self.neutral_mask)
        } else {
            &self.neutral_mask
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("occlusion_composite_bind_group"),
            layout: &self.composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(mask_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let pipeline = self
            .composite_pipelines
            .get(&format)
            .ok_or_else(|| DepthError::Gpu(format!("no composite pipeline for {:?}", format)))?;

        draw_fullscreen(
            &mut encoder,
            "occlusion_composite_pass",
            pipeline,
            &bind_group,
            &output_view,
        );
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

/// Mask shader for one virtual depth strategy
pub fn mask_shader_source(variant_body: &str) -> String {
    compose(&[
        FULLSCREEN_VERTEX,
        DEPTH_DECODE_FUNCTIONS,
        MASK_COMMON_BODY,
        variant_body,
    ])
}

fn viewport_size(camera: &RenderCamera) -> DepthResult<(u32, u32)> {
    let (width, height) = camera.viewport;
    if width == 0 || height == 0 {
        warn!(width, height, "Zero-sized occlusion viewport");
        return Err(DepthError::InvalidDimensions(format!(
            "viewport {}x{}",
            width, height
        )));
    }
    Ok((width, height))
}
