// SPDX-License-Identifier: GPL-3.0-only

//! Host scene hook for the virtual distance pass
//!
//! The pipeline binds its distance-writing override material, then hands the
//! render pass to the host, which issues draws for whatever geometry sits on
//! the requested layers. Vertex slot 0 carries `Float32x3` positions and
//! slot 1 per-instance model matrices (four `Float32x4` columns).

use crate::constants::occlusion::OCCLUSION_LAYER;
use crate::gpu::wgpu;
use crate::gpu::wgpu::util::DeviceExt;
use glam::{Mat4, Vec3};

/// Bitmask of render layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RenderLayers(u32);

impl RenderLayers {
    /// No layers
    pub const NONE: Self = Self(0);
    /// Default layer only
    pub const DEFAULT: Self = Self(1);
    /// Occludable geometry only
    pub const OCCLUSION: Self = Self(1 << OCCLUSION_LAYER);

    /// Exactly one layer
    pub fn only(layer: u32) -> Self {
        Self(1u32.checked_shl(layer).unwrap_or(0))
    }

    /// Add a layer
    pub fn with(self, layer: u32) -> Self {
        Self(self.0 | Self::only(layer).0)
    }

    pub fn contains(&self, layer: u32) -> bool {
        self.0 & Self::only(layer).0 != 0
    }

    pub fn intersects(&self, other: RenderLayers) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Geometry the occlusion pass can re-render with its override material
pub trait OccludableScene {
    /// Issue draws for the geometry on `layers`
    ///
    /// Pipeline and camera bind group are already set; implementations only
    /// bind vertex/index buffers and draw.
    fn draw_occluders(&self, pass: &mut wgpu::RenderPass<'_>, layers: RenderLayers);
}

impl<F> OccludableScene for F
where
    F: Fn(&mut wgpu::RenderPass<'_>, RenderLayers),
{
    fn draw_occluders(&self, pass: &mut wgpu::RenderPass<'_>, layers: RenderLayers) {
        self(pass, layers)
    }
}

impl<T: OccludableScene> OccludableScene for [T] {
    fn draw_occluders(&self, pass: &mut wgpu::RenderPass<'_>, layers: RenderLayers) {
        for item in self {
            item.draw_occluders(pass, layers);
        }
    }
}

impl<T: OccludableScene> OccludableScene for Vec<T> {
    fn draw_occluders(&self, pass: &mut wgpu::RenderPass<'_>, layers: RenderLayers) {
        self.as_slice().draw_occluders(pass, layers);
    }
}

/// Vertex layouts expected by the virtual distance pipeline
pub fn occluder_vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 2] {
    const POSITION: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
    const INSTANCE: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        1 => Float32x4,
        2 => Float32x4,
        3 => Float32x4,
        4 => Float32x4
    ];
    [
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &POSITION,
        },
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 16]>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &INSTANCE,
        },
    ]
}

/// Indexed, instanced triangle mesh on a set of render layers
pub struct OccluderMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    instance_buffer: wgpu::Buffer,
    index_count: u32,
    instance_count: u32,
    pub layers: RenderLayers,
}

impl OccluderMesh {
    /// Upload geometry; each entry of `instances` is a model-to-world matrix
    pub fn new(
        device: &wgpu::Device,
        positions: &[Vec3],
        indices: &[u32],
        instances: &[Mat4],
        layers: RenderLayers,
    ) -> Self {
        let vertices: Vec<[f32; 3]> = positions.iter().map(|p| p.to_array()).collect();
        let models: Vec<[f32; 16]> = instances.iter().map(|m| m.to_cols_array()).collect();

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("occluder_vertex_buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("occluder_index_buffer"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let instance_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("occluder_instance_buffer"),
            contents: bytemuck::cast_slice(&models),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            vertex_buffer,
            index_buffer,
            instance_buffer,
            index_count: indices.len() as u32,
            instance_count: instances.len() as u32,
            layers,
        }
    }

    /// Axis-aligned quad of the given half extent in the XY plane, facing +Z
    pub fn quad(
        device: &wgpu::Device,
        half_extent: f32,
        instances: &[Mat4],
        layers: RenderLayers,
    ) -> Self {
        let h = half_extent;
        let positions = [
            Vec3::new(-h, -h, 0.0),
            Vec3::new(h, -h, 0.0),
            Vec3::new(h, h, 0.0),
            Vec3::new(-h, h, 0.0),
        ];
        Self::new(device, &positions, &[0, 1, 2, 0, 2, 3], instances, layers)
    }
}

impl OccludableScene for OccluderMesh {
    fn draw_occluders(&self, pass: &mut wgpu::RenderPass<'_>, layers: RenderLayers) {
        if !self.layers.intersects(layers) || self.index_count == 0 || self.instance_count == 0 {
            return;
        }
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_vertex_buffer(1, self.instance_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.index_count, 0, 0..self.instance_count);
    }
}
