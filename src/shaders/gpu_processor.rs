// SPDX-License-Identifier: GPL-3.0-only

//! Shared GPU processor infrastructure
//!
//! Provides common functionality for the decode and occlusion passes:
//! - Target allocation with dimension caching
//! - Allocation failure capture through error scopes
//! - Async texture readback with row padding removed

use crate::constants::COPY_BYTES_PER_ROW_ALIGNMENT;
use crate::errors::{DepthError, DepthResult};
use crate::gpu::wgpu;
use futures::FutureExt;

/// Cached resource dimensions - avoids reallocation when dimensions match
///
/// Used by processors to track if targets need to be recreated when
/// input/output dimensions change.
#[derive(Default, Clone, Copy, PartialEq, Debug)]
pub struct CachedDimensions {
    pub width: u32,
    pub height: u32,
}

impl CachedDimensions {
    /// Create new cached dimensions
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if dimensions have changed and need update
    pub fn needs_update(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }

    /// Update cached dimensions
    pub fn update(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Check if dimensions are initialized (non-zero)
    pub fn is_initialized(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Bytes per row rounded up to the copy alignment
#[inline]
pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let align = COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * bytes_per_pixel).div_ceil(align) * align
}

/// Drop the per-row padding of a texture copy
pub fn strip_row_padding(data: &[u8], width: u32, height: u32, bytes_per_pixel: u32) -> Vec<u8> {
    let padded = padded_bytes_per_row(width, bytes_per_pixel) as usize;
    let unpadded = (width * bytes_per_pixel) as usize;
    let mut out = Vec::with_capacity(unpadded * height as usize);
    for row in data.chunks(padded).take(height as usize) {
        out.extend_from_slice(&row[..unpadded.min(row.len())]);
    }
    out
}

/// Run allocations inside an out-of-memory error scope
///
/// Any allocation failure raised by `allocate` is reported as
/// `RenderTargetAllocationFailure` instead of reaching the device's
/// uncaptured error handler.
pub async fn allocate_scoped<T>(
    device: &wgpu::Device,
    what: &str,
    allocate: impl FnOnce() -> T,
) -> DepthResult<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = allocate();
    // Both scopes are popped here, before anything is awaited
    let validation = device.pop_error_scope();
    let oom = device.pop_error_scope();
    let (validation, oom) = futures::join!(validation, oom);

    match oom.or(validation) {
        Some(e) => Err(DepthError::RenderTargetAllocationFailure(format!(
            "{}: {}",
            what, e
        ))),
        None => Ok(value),
    }
}

/// [`allocate_scoped`] for the synchronous per-frame path
///
/// Native backends resolve error scopes as soon as they are popped, so this
/// never blocks the render thread.
pub fn allocate_scoped_now<T>(
    device: &wgpu::Device,
    what: &str,
    allocate: impl FnOnce() -> T,
) -> DepthResult<T> {
    allocate_scoped(device, what, allocate)
        .now_or_never()
        .unwrap_or_else(|| {
            Err(DepthError::Gpu(format!(
                "{}: error scope did not resolve synchronously",
                what
            )))
        })
}

/// Helper for async buffer readback (map, poll, read, unmap)
///
/// # Arguments
/// * `device` - The wgpu device for polling
/// * `buffer` - The buffer to read from (must be MAP_READ)
///
/// # Returns
/// The buffer contents as a Vec<u8>
pub async fn read_buffer_async(device: &wgpu::Device, buffer: &wgpu::Buffer) -> DepthResult<Vec<u8>> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| DepthError::Gpu(format!("Device poll failed: {}", e)))?;

    receiver
        .await
        .map_err(|_| DepthError::Gpu("Failed to receive buffer mapping".to_string()))?
        .map_err(|e| DepthError::Gpu(format!("Failed to map buffer: {:?}", e)))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

/// Texture copy already on the queue, waiting to be mapped
///
/// The copy is recorded and submitted when this is created, so later
/// passes writing to the same texture cannot change what it reads.
pub struct PendingReadback {
    staging: wgpu::Buffer,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
}

impl PendingReadback {
    /// Record and submit a copy of the whole texture into a MAP_READ buffer
    pub fn submit(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
        bytes_per_pixel: u32,
    ) -> Self {
        let (width, height) = (texture.width(), texture.height());
        let padded = padded_bytes_per_row(width, bytes_per_pixel);

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging_buffer"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        Self {
            staging,
            width,
            height,
            bytes_per_pixel,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Map the staging buffer and return tightly packed rows
    pub async fn read(self, device: &wgpu::Device) -> DepthResult<Vec<u8>> {
        let data = read_buffer_async(device, &self.staging).await?;
        Ok(strip_row_padding(
            &data,
            self.width,
            self.height,
            self.bytes_per_pixel,
        ))
    }
}

/// Copy a whole 2D texture into a fresh MAP_READ buffer and read it back
///
/// Returns tightly packed rows.
pub async fn read_texture_async(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    bytes_per_pixel: u32,
) -> DepthResult<Vec<u8>> {
    PendingReadback::submit(device, queue, texture, bytes_per_pixel)
        .read(device)
        .await
}
