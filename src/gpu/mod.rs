// SPDX-License-Identifier: GPL-3.0-only

//! GPU device setup for the depth and occlusion passes
//!
//! The host XR renderer normally owns the device; [`GpuContext::from_parts`]
//! adopts it. Tools and tests create their own with
//! [`GpuContext::new_headless`].

use crate::errors::{DepthError, DepthResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Re-export wgpu so every GPU module names the same version
pub use wgpu;

/// Information about the GPU device in use
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, Metal, DX12, etc.)
    pub backend: wgpu::Backend,
    /// Whether the adapter is a software rasterizer
    pub is_software: bool,
}

impl GpuDeviceInfo {
    fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        Self {
            adapter_name: info.name,
            backend: info.backend,
            is_software: info.device_type == wgpu::DeviceType::Cpu,
        }
    }
}

/// Adapter, device and queue shared by every GPU pass of a session
#[derive(Clone)]
pub struct GpuContext {
    pub adapter: Arc<wgpu::Adapter>,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub info: GpuDeviceInfo,
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext").field("info", &self.info).finish()
    }
}

impl GpuContext {
    /// Create a device without a surface
    ///
    /// # Arguments
    ///
    /// * `label` - A label for the device (for debugging)
    pub async fn new_headless(label: &str) -> DepthResult<Self> {
        info!(label = label, "Creating headless GPU device");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| DepthError::Gpu(format!("Failed to find suitable GPU adapter: {}", e)))?;

        let info = GpuDeviceInfo::from_adapter(&adapter);
        info!(
            adapter = %info.adapter_name,
            backend = ?info.backend,
            software = info.is_software,
            "GPU adapter selected"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|e| DepthError::Gpu(format!("Failed to create GPU device: {}", e)))?;

        debug!(label = label, "GPU device created");

        Ok(Self {
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
            info,
        })
    }

    /// Adopt a device owned by the host renderer
    pub fn from_parts(
        adapter: Arc<wgpu::Adapter>,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
    ) -> Self {
        let info = GpuDeviceInfo::from_adapter(&adapter);
        info!(
            adapter = %info.adapter_name,
            backend = ?info.backend,
            "Using host GPU device"
        );
        Self {
            adapter,
            device,
            queue,
            info,
        }
    }

    /// Whether a texture format can be used with the given usages on this adapter
    pub fn supports_format(&self, format: wgpu::TextureFormat, usages: wgpu::TextureUsages) -> bool {
        self.adapter
            .get_texture_format_features(format)
            .allowed_usages
            .contains(usages)
    }
}
