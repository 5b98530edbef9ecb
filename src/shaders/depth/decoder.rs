// SPDX-License-Identifier: GPL-3.0-only

//! Depth decode pass: sensor texture to `R32Float` metres

use super::decode_shader_source;
use crate::depth::{CpuSamples, GpuDepthHandle};
use crate::errors::{DepthError, DepthResult};
use crate::gpu::{GpuContext, wgpu};
use crate::shaders::common::DecodeParams;
use crate::shaders::gpu_processor::{allocate_scoped, allocate_scoped_now, read_texture_async};
use crate::shaders::gpu_utils::{
    create_fullscreen_pipeline, create_target_texture, draw_fullscreen, texture_entry,
    uniform_entry,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const METERS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Decodes sensor depth textures into metres
///
/// Resolved once per device. Adapters that cannot render into `R32Float`
/// get `DepthError::Unsupported` from [`DepthDecoder::resolve`] instead of
/// failing on every frame.
pub struct DepthDecoder {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
}

impl std::fmt::Debug for DepthDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthDecoder").finish_non_exhaustive()
    }
}

impl DepthDecoder {
    /// Check adapter capabilities and build the decode pipeline
    pub fn resolve(ctx: &GpuContext) -> DepthResult<Self> {
        let needed = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        if !ctx.supports_format(METERS_FORMAT, needed) {
            warn!(
                adapter = %ctx.info.adapter_name,
                "Adapter cannot render to R32Float, GPU depth decode unavailable"
            );
            return Err(DepthError::Unsupported(format!(
                "{} cannot render to {:?}",
                ctx.info.adapter_name, METERS_FORMAT
            )));
        }

        info!(adapter = %ctx.info.adapter_name, "Initializing GPU depth decoder");

        let device = ctx.device.clone();
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("depth_decode_shader"),
            source: wgpu::ShaderSource::Wgsl(decode_shader_source().into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("depth_decode_bind_group_layout"),
            entries: &[
                // Raw sensor depth
                texture_entry(0, false),
                // Decode parameters
                uniform_entry(1, wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let pipeline = create_fullscreen_pipeline(
            &device,
            "depth_decode_pipeline",
            &shader,
            &bind_group_layout,
            "fs_decode",
            METERS_FORMAT,
        );

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("depth_decode_uniform_buffer"),
            size: std::mem::size_of::<DecodeParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue: ctx.queue.clone(),
            pipeline,
            bind_group_layout,
            uniform_buffer,
        })
    }

    /// Decode a sensor texture and read the metres back, row 0 at the top
    pub async fn decode_to_cpu(
        &self,
        handle: &GpuDepthHandle,
        raw_value_to_meters: f32,
    ) -> DepthResult<Vec<f32>> {
        let (width, height) = (handle.width(), handle.height());
        if width == 0 || height == 0 {
            return Err(DepthError::InvalidDimensions(format!(
                "depth texture {}x{}",
                width, height
            )));
        }

        debug!(width, height, encoding = ?handle.encoding, "Decoding GPU depth frame");

        let params = DecodeParams::new(handle.encoding, raw_value_to_meters);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));

        let target = allocate_scoped(&self.device, "depth decode target", || {
            create_target_texture(&self.device, "depth_meters_texture", width, height, METERS_FORMAT)
        })
        .await?;
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let source_view = handle
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("depth_decode_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("depth_decode_encoder"),
            });
        draw_fullscreen(
            &mut encoder,
            "depth_decode_pass",
            &self.pipeline,
            &bind_group,
            &target_view,
        );
        self.queue.submit(Some(encoder.finish()));

        let bytes = read_texture_async(&self.device, &self.queue, &target, 4).await?;
        Ok(bytemuck::pod_collect_to_vec::<u8, f32>(&bytes))
    }
}

/// Upload CPU samples into a sampleable texture in their native encoding
pub fn upload_depth_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    samples: &CpuSamples,
    width: u32,
    height: u32,
) -> DepthResult<wgpu::Texture> {
    if samples.len() != width as usize * height as usize || width == 0 || height == 0 {
        return Err(DepthError::InvalidDimensions(format!(
            "{} samples for {}x{}",
            samples.len(),
            width,
            height
        )));
    }

    let format = samples.encoding().texture_format();
    let bytes_per_pixel = match samples {
        CpuSamples::U16(_) => 2,
        CpuSamples::F32(_) => 4,
    };
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };

    let texture = allocate_scoped_now(device, "depth upload texture", || {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_upload_texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    })?;

    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        samples.as_bytes(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * bytes_per_pixel),
            rows_per_image: Some(height),
        },
        size,
    );

    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::DepthEncoding;

    #[tokio::test]
    async fn test_decode_packed16_matches_cpu_scale() {
        let ctx = match GpuContext::new_headless("depth_decode_test").await {
            Ok(ctx) => ctx,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let decoder = match DepthDecoder::resolve(&ctx) {
            Ok(d) => d,
            Err(e) => {
                println!("Skipping test (unsupported): {}", e);
                return;
            }
        };

        let samples = CpuSamples::U16(vec![4096, 0, 1500, 65535]);
        let texture = upload_depth_texture(&ctx.device, &ctx.queue, &samples, 2, 2).unwrap();
        let handle = GpuDepthHandle::new(Arc::new(texture), DepthEncoding::Packed16);

        let meters = decoder.decode_to_cpu(&handle, 0.001).await.unwrap();
        let expected = [4.096, 0.0, 1.5, 65.535];
        for (got, want) in meters.iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "got {} want {}", got, want);
        }
    }

    #[test]
    fn test_decode_shader_validates() {
        crate::shaders::validate_shader("depth_decode", &decode_shader_source());
    }
}
