// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-topology grid mesh
//!
//! UVs and indices are built once; only positions and normals change when
//! the surface is displaced.

use crate::errors::{DepthError, DepthResult};
use glam::{Vec2, Vec3};

/// Dense grid whose vertex positions follow the depth frame
#[derive(Debug, Clone)]
pub struct DepthSurfaceMesh {
    cols: u32,
    rows: u32,
    pub(crate) uvs: Vec<Vec2>,
    pub(crate) positions: Vec<Vec3>,
    pub(crate) normals: Vec<Vec3>,
    indices: Vec<u32>,
}

impl DepthSurfaceMesh {
    /// Build a `cols` x `rows` vertex grid spanning UV `[0, 1]^2`
    ///
    /// Row 0 sits at `v = 0` (bottom); triangles wind counter-clockwise
    /// when seen from the camera.
    pub fn grid(cols: u32, rows: u32) -> DepthResult<Self> {
        if cols < 2 || rows < 2 {
            return Err(DepthError::InvalidDimensions(format!(
                "surface grid {}x{} needs at least 2x2 vertices",
                cols, rows
            )));
        }

        let vertex_count = (cols * rows) as usize;
        let mut uvs = Vec::with_capacity(vertex_count);
        for r in 0..rows {
            for c in 0..cols {
                uvs.push(Vec2::new(
                    c as f32 / (cols - 1) as f32,
                    r as f32 / (rows - 1) as f32,
                ));
            }
        }

        let mut indices = Vec::with_capacity(((cols - 1) * (rows - 1) * 6) as usize);
        for r in 0..rows - 1 {
            for c in 0..cols - 1 {
                let a = r * cols + c;
                let b = a + 1;
                let d = a + cols;
                let e = d + 1;
                indices.extend_from_slice(&[a, b, d, b, e, d]);
            }
        }

        Ok(Self {
            cols,
            rows,
            uvs,
            positions: vec![Vec3::ZERO; vertex_count],
            normals: vec![Vec3::Z; vertex_count],
            indices,
        })
    }

    /// Vertices along U
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Vertices along V
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Per-vertex UVs (immutable)
    pub fn uvs(&self) -> &[Vec2] {
        &self.uvs
    }

    /// Camera-space vertex positions from the last update
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Vertex normals (only refreshed when normal updates are enabled)
    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    /// Triangle list indices (immutable)
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.uvs.len()
    }

    /// Recompute smooth vertex normals from the current positions
    pub fn recompute_normals(&mut self) {
        self.normals.iter_mut().for_each(|n| *n = Vec3::ZERO);

        for tri in self.indices.chunks_exact(3) {
            let (ia, ib, ic) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            let (a, b, c) = (self.positions[ia], self.positions[ib], self.positions[ic]);
            // Area-weighted face normal
            let face = (b - a).cross(c - a);
            self.normals[ia] += face;
            self.normals[ib] += face;
            self.normals[ic] += face;
        }

        for n in &mut self.normals {
            *n = n.try_normalize().unwrap_or(Vec3::Z);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_topology() {
        let mesh = DepthSurfaceMesh::grid(3, 2).unwrap();
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.indices().len(), 2 * 6);
        assert_eq!(mesh.uvs()[0], Vec2::ZERO);
        assert_eq!(mesh.uvs()[5], Vec2::ONE);
        assert!(mesh.indices().iter().all(|&i| (i as usize) < mesh.vertex_count()));
    }

    #[test]
    fn test_rejects_degenerate_grid() {
        assert!(DepthSurfaceMesh::grid(1, 10).is_err());
    }

    #[test]
    fn test_flat_grid_normals_face_camera() {
        let mut mesh = DepthSurfaceMesh::grid(4, 4).unwrap();
        let uvs = mesh.uvs().to_vec();
        for (p, uv) in mesh.positions.iter_mut().zip(uvs) {
            *p = Vec3::new(uv.x, uv.y, -2.0);
        }
        mesh.recompute_normals();
        for n in mesh.normals() {
            assert!((*n - Vec3::Z).length() < 1e-5);
        }
    }
}
