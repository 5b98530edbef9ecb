// SPDX-License-Identifier: GPL-3.0-only

//! Render targets owned by the occlusion pipeline
//!
//! A [`RenderTarget`] keeps its identity for the life of the pipeline; when
//! the drawing buffer changes size only the texture behind it is replaced.

use crate::constants::occlusion::PYRAMID_LEVELS;
use crate::errors::DepthResult;
use crate::gpu::wgpu;
use crate::shaders::CachedDimensions;
use crate::shaders::gpu_processor::allocate_scoped_now;
use std::sync::Arc;
use tracing::debug;

/// Usage of color targets that are also sampled, copied and read back
pub const SAMPLED_TARGET_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// A resizable 2D render target
pub struct RenderTarget {
    label: &'static str,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
    dims: CachedDimensions,
    texture: Option<Arc<wgpu::Texture>>,
    view: Option<wgpu::TextureView>,
}

impl RenderTarget {
    pub fn new(label: &'static str, format: wgpu::TextureFormat, usage: wgpu::TextureUsages) -> Self {
        Self {
            label,
            format,
            usage,
            dims: CachedDimensions::default(),
            texture: None,
            view: None,
        }
    }

    /// Make the target `width` x `height` in `format`
    ///
    /// Returns `true` when the texture was (re)allocated. On allocation
    /// failure the target is left empty so the next frame retries.
    pub fn ensure(
        &mut self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> DepthResult<bool> {
        if self.texture.is_some() && !self.dims.needs_update(width, height) && self.format == format
        {
            return Ok(false);
        }

        debug!(
            label = self.label,
            width,
            height,
            format = ?format,
            "Resizing occlusion render target"
        );

        self.texture = None;
        self.view = None;
        self.dims = CachedDimensions::default();

        let texture = allocate_scoped_now(device, self.label, || {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(self.label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: self.usage,
                view_formats: &[],
            })
        })?;

        self.view = Some(texture.create_view(&wgpu::TextureViewDescriptor::default()));
        self.texture = Some(Arc::new(texture));
        self.format = format;
        self.dims.update(width, height);
        Ok(true)
    }

    pub fn texture(&self) -> Option<&Arc<wgpu::Texture>> {
        self.texture.as_ref()
    }

    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.view.as_ref()
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn dimensions(&self) -> CachedDimensions {
        self.dims
    }
}

/// Size of pyramid level `level` (0 = first half-resolution level)
pub fn pyramid_level_size(width: u32, height: u32, level: usize) -> (u32, u32) {
    let shift = (level + 1) as u32;
    ((width >> shift).max(1), (height >> shift).max(1))
}

/// Half-resolution blur levels, shared by all views
pub struct BlurPyramid {
    levels: [RenderTarget; PYRAMID_LEVELS],
}

impl BlurPyramid {
    pub fn new(format: wgpu::TextureFormat) -> Self {
        Self {
            levels: std::array::from_fn(|_| {
                RenderTarget::new("occlusion_blur_level", format, SAMPLED_TARGET_USAGE)
            }),
        }
    }

    /// Size every level for a `width` x `height` mask
    pub fn ensure(&mut self, device: &wgpu::Device, width: u32, height: u32) -> DepthResult<()> {
        for (i, level) in self.levels.iter_mut().enumerate() {
            let (w, h) = pyramid_level_size(width, height, i);
            let format = level.format();
            level.ensure(device, w, h, format)?;
        }
        Ok(())
    }

    pub fn level(&self, index: usize) -> &RenderTarget {
        &self.levels[index]
    }
}
