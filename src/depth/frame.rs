// SPDX-License-Identifier: GPL-3.0-only

//! Depth frame data model
//!
//! A frame is one sensor update for one view. Its samples arrive either as a
//! CPU buffer or as a GPU texture; both shapes sit behind [`DepthSource`].

use crate::camera::CameraMatrices;
use crate::gpu::wgpu;
use glam::Mat4;
use std::borrow::Cow;
use std::sync::Arc;

/// CPU-side depth samples in raw sensor units, row-major, row 0 at the top
#[derive(Debug, Clone, PartialEq)]
pub enum CpuSamples {
    /// Packed 16-bit raw values
    U16(Vec<u16>),
    /// Float raw values (already metres when the scale is 1.0)
    F32(Vec<f32>),
}

impl CpuSamples {
    /// Number of samples
    pub fn len(&self) -> usize {
        match self {
            CpuSamples::U16(s) => s.len(),
            CpuSamples::F32(s) => s.len(),
        }
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw value at a flat index, `None` when out of range
    #[inline]
    pub fn raw(&self, index: usize) -> Option<f32> {
        match self {
            CpuSamples::U16(s) => s.get(index).map(|&v| v as f32),
            CpuSamples::F32(s) => s.get(index).copied(),
        }
    }

    /// Encoding these samples use when uploaded to the GPU
    pub fn encoding(&self) -> DepthEncoding {
        match self {
            CpuSamples::U16(_) => DepthEncoding::Packed16,
            CpuSamples::F32(_) => DepthEncoding::Float32,
        }
    }

    /// Samples in the layout used for GPU upload
    ///
    /// With `float32` set, 16-bit values are widened to float so the upload
    /// uses `R32Float` instead of packed `Rg8Unorm`. Float samples are never
    /// narrowed.
    pub fn for_upload(&self, float32: bool) -> Cow<'_, CpuSamples> {
        match self {
            CpuSamples::U16(s) if float32 => {
                Cow::Owned(CpuSamples::F32(s.iter().map(|&v| v as f32).collect()))
            }
            _ => Cow::Borrowed(self),
        }
    }

    /// Bytes as laid out in the matching GPU texture format
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CpuSamples::U16(s) => bytemuck::cast_slice(s),
            CpuSamples::F32(s) => bytemuck::cast_slice(s),
        }
    }
}

/// How depth values are encoded in a GPU texture
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthEncoding {
    /// 16-bit raw units split little-endian over the two channels of `Rg8Unorm`
    Packed16,
    /// Raw units in `R32Float`
    Float32,
    /// Normalized inverse depth in `R32Float`: metres = `near / (1 - value)`
    NormalizedInverse { near: f32 },
}

impl DepthEncoding {
    /// Texture format carrying this encoding
    pub fn texture_format(&self) -> wgpu::TextureFormat {
        match self {
            DepthEncoding::Packed16 => wgpu::TextureFormat::Rg8Unorm,
            DepthEncoding::Float32 | DepthEncoding::NormalizedInverse { .. } => {
                wgpu::TextureFormat::R32Float
            }
        }
    }

    /// Shader-side selector
    pub fn shader_mode(&self) -> u32 {
        match self {
            DepthEncoding::Packed16 => 0,
            DepthEncoding::Float32 => 1,
            DepthEncoding::NormalizedInverse { .. } => 2,
        }
    }

    /// Near plane used by the inverse encoding (0 otherwise)
    pub fn near(&self) -> f32 {
        match self {
            DepthEncoding::NormalizedInverse { near } => *near,
            _ => 0.0,
        }
    }
}

/// Opaque GPU depth texture delivered by the sensor
#[derive(Debug, Clone)]
pub struct GpuDepthHandle {
    /// Sensor texture, owned by the platform
    pub texture: Arc<wgpu::Texture>,
    /// Encoding of the texel values
    pub encoding: DepthEncoding,
}

impl GpuDepthHandle {
    /// Wrap a texture
    pub fn new(texture: Arc<wgpu::Texture>, encoding: DepthEncoding) -> Self {
        Self { texture, encoding }
    }

    /// Texture width in texels
    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    /// Texture height in texels
    pub fn height(&self) -> u32 {
        self.texture.height()
    }
}

/// Where a frame's samples live
#[derive(Debug, Clone)]
pub enum DepthSource {
    /// In-memory buffer
    Cpu(CpuSamples),
    /// GPU texture, with the metres read back by a decode pass once requested
    Gpu {
        handle: GpuDepthHandle,
        readback: Option<Vec<f32>>,
    },
}

/// One sensor update for one view
#[derive(Debug, Clone)]
pub struct DepthFrame {
    /// Width in samples
    pub width: u32,
    /// Height in samples
    pub height: u32,
    /// Sample storage
    pub source: DepthSource,
    /// Scale from raw units to metres, per frame
    pub raw_value_to_meters: f32,
    /// Depth camera matrices valid for this frame
    pub matrices: CameraMatrices,
    /// Monotonic update counter assigned by the store
    pub sequence: u64,
}

impl DepthFrame {
    /// Metric depth at a sample coordinate, `None` outside the buffer or
    /// when a GPU frame has not been read back yet
    #[inline]
    pub fn meters_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        match &self.source {
            DepthSource::Cpu(samples) => samples.raw(index).map(|r| r * self.raw_value_to_meters),
            DepthSource::Gpu {
                readback: Some(meters),
                ..
            } => meters.get(index).copied(),
            DepthSource::Gpu { readback: None, .. } => None,
        }
    }

    /// Whether point queries can be answered from CPU memory
    pub fn is_cpu_queryable(&self) -> bool {
        match &self.source {
            DepthSource::Cpu(_) => true,
            DepthSource::Gpu { readback, .. } => readback.is_some(),
        }
    }

    /// GPU handle, if delivered through the GPU path
    pub fn gpu_handle(&self) -> Option<&GpuDepthHandle> {
        match &self.source {
            DepthSource::Gpu { handle, .. } => Some(handle),
            DepthSource::Cpu(_) => None,
        }
    }

    /// CPU samples, if delivered through the CPU path
    pub fn cpu_samples(&self) -> Option<&CpuSamples> {
        match &self.source {
            DepthSource::Cpu(samples) => Some(samples),
            DepthSource::Gpu { .. } => None,
        }
    }
}

/// Sensor-side matrices reported with an update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorView {
    /// The sensor provides its own view and projection
    Native { view: Mat4, projection: Mat4 },
    /// Pose is tracked but the sensor has no matrices of its own; the render
    /// camera's are used
    RenderCamera,
    /// Sensor pose is missing for this update
    Missing,
}
