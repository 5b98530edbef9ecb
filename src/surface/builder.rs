// SPDX-License-Identifier: GPL-3.0-only

//! Grid displacement from the latest depth frame

use super::collider::{ColliderHost, ColliderUpdater};
use super::mesh::DepthSurfaceMesh;
use crate::camera::{RenderCamera, is_invertible};
use crate::config::MeshOptions;
use crate::constants::surface::{MIN_GRID, UPPER_BOUNDARY_V};
use crate::depth::{DepthFrame, DepthFrameStore, nearest_texel};
use crate::errors::{DepthError, DepthResult};
use glam::{Mat4, Vec3, Vec4};
use std::time::Instant;
use tracing::{debug, trace};

/// Smallest |w| or |z| accepted when unprojecting a grid vertex
const MIN_W: f32 = 1e-6;

/// Depth range observed in one update, zero samples excluded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub min: f32,
    pub max: f32,
}

impl DepthRange {
    fn include(range: Option<Self>, meters: f32) -> Option<Self> {
        Some(match range {
            Some(r) => Self {
                min: r.min.min(meters),
                max: r.max.max(meters),
            },
            None => Self {
                min: meters,
                max: meters,
            },
        })
    }
}

/// Summary of one [`DepthSurfaceBuilder::update`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceUpdate {
    /// Sequence number of the frame the surface now reflects
    pub sequence: u64,
    /// Range of valid samples, `None` when the frame held no valid sample
    pub range: Option<DepthRange>,
    /// Vertices whose depth came from the previous range
    pub patched: usize,
    /// Whether normals were recomputed
    pub normals_updated: bool,
}

/// Turns depth frames into a displaced grid surface
///
/// Vertex positions are in the render camera's space; place the mesh with
/// the camera's world matrix. When a frame cannot be used the previous
/// positions stay in place.
pub struct DepthSurfaceBuilder {
    options: MeshOptions,
    mesh: DepthSurfaceMesh,
    collider_mesh: Option<DepthSurfaceMesh>,
    range: Option<DepthRange>,
    last_sequence: Option<u64>,
}

impl DepthSurfaceBuilder {
    pub fn new(options: &MeshOptions) -> DepthResult<Self> {
        let side = options.dense_grid.vertices_per_side();
        let mesh = DepthSurfaceMesh::grid(side, side)?;

        let collider_mesh = match options.collider_grid {
            Some(n) if n >= MIN_GRID && n < side => Some(DepthSurfaceMesh::grid(n, n)?),
            Some(n) if n < MIN_GRID => {
                return Err(DepthError::InvalidDimensions(format!(
                    "collider grid {} needs at least {} vertices per side",
                    n, MIN_GRID
                )));
            }
            // Equal to or denser than the render grid: reuse the render grid
            _ => None,
        };

        debug!(
            dense = side,
            collider = ?options.collider_grid,
            patch_holes = options.patch_holes,
            "Created depth surface builder"
        );

        Ok(Self {
            options: options.clone(),
            mesh,
            collider_mesh,
            range: None,
            last_sequence: None,
        })
    }

    /// Displace the grid from the latest frame of `view_index`
    ///
    /// Errors leave the mesh as it was: `DepthUnavailable` when the view has
    /// no CPU-queryable frame, `MissingMatrixData` when the render camera's
    /// projection cannot be inverted.
    pub fn update(
        &mut self,
        store: &DepthFrameStore,
        view_index: usize,
        camera: &RenderCamera,
    ) -> DepthResult<SurfaceUpdate> {
        let frame = store
            .frame(view_index)
            .ok_or(DepthError::DepthUnavailable { view_index })?;
        if !frame.is_cpu_queryable() {
            debug!(view_index, "GPU depth frame not read back, surface left unchanged");
            return Err(DepthError::DepthUnavailable { view_index });
        }
        if !is_invertible(&camera.projection) {
            return Err(DepthError::MissingMatrixData(
                "render camera projection is not invertible".to_string(),
            ));
        }
        let inverse_projection = camera.projection.inverse();

        let patch_holes = self.options.patch_holes;
        let previous = patch_holes.then_some(self.range).flatten();
        let (range, patched) =
            displace(&mut self.mesh, frame, &inverse_projection, patch_holes, previous);
        if let Some(collider_mesh) = &mut self.collider_mesh {
            displace(collider_mesh, frame, &inverse_projection, patch_holes, previous);
        }

        if self.options.update_vertex_normals {
            self.mesh.recompute_normals();
            if let Some(collider_mesh) = &mut self.collider_mesh {
                collider_mesh.recompute_normals();
            }
        }

        // An all-zero frame keeps the last range for patching
        if range.is_some() {
            self.range = range;
        }
        self.last_sequence = Some(frame.sequence);

        trace!(
            view_index,
            sequence = frame.sequence,
            ?range,
            patched,
            "Depth surface updated"
        );

        Ok(SurfaceUpdate {
            sequence: frame.sequence,
            range,
            patched,
            normals_updated: self.options.update_vertex_normals,
        })
    }

    /// Rebuild the collision proxy if `updater`'s rate limit allows it
    pub fn update_collider<H: ColliderHost>(
        &self,
        updater: &mut ColliderUpdater<H::Shape>,
        host: &mut H,
        now: Instant,
    ) -> DepthResult<bool> {
        if self.last_sequence.is_none() {
            return Ok(false);
        }
        updater.update(host, self.collider_mesh(), now)
    }

    /// Render-resolution surface
    pub fn mesh(&self) -> &DepthSurfaceMesh {
        &self.mesh
    }

    /// Surface used for collision proxies (the render mesh when no coarser
    /// grid is configured)
    pub fn collider_mesh(&self) -> &DepthSurfaceMesh {
        self.collider_mesh.as_ref().unwrap_or(&self.mesh)
    }

    /// Depth range of the most recent update with valid samples
    pub fn depth_range(&self) -> Option<DepthRange> {
        self.range
    }

    /// Sequence number of the frame last applied
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn options(&self) -> &MeshOptions {
        &self.options
    }
}

/// Write displaced positions into `mesh`
///
/// Returns the range of valid (non-zero) samples and the number of vertices
/// that took their depth from `previous`. With `patch_holes` set, samples in
/// the upper boundary band are left out of the range since those vertices
/// are placed at the previous minimum instead.
fn displace(
    mesh: &mut DepthSurfaceMesh,
    frame: &DepthFrame,
    inverse_projection: &Mat4,
    patch_holes: bool,
    previous: Option<DepthRange>,
) -> (Option<DepthRange>, usize) {
    let mut range = None;
    let mut patched = 0;

    for (uv, position) in mesh.uvs.iter().zip(mesh.positions.iter_mut()) {
        let (x, y) = nearest_texel(uv.x, uv.y, frame.width, frame.height);
        let sample = frame
            .meters_at(x, y)
            .filter(|m| m.is_finite() && *m > 0.0)
            .unwrap_or(0.0);
        let boundary = uv.y > UPPER_BOUNDARY_V;
        if sample > 0.0 && !(patch_holes && boundary) {
            range = DepthRange::include(range, sample);
        }

        let depth = match previous {
            Some(prev) if boundary => {
                patched += 1;
                prev.min
            }
            Some(prev) if sample == 0.0 => {
                patched += 1;
                prev.max
            }
            _ => sample,
        };

        *position = unproject(uv.x, uv.y, depth, inverse_projection).unwrap_or(Vec3::ZERO);
    }

    (range, patched)
}

/// Camera-space point at `depth` metres along the ray through `(u, v)`
fn unproject(u: f32, v: f32, depth: f32, inverse_projection: &Mat4) -> Option<Vec3> {
    let near = *inverse_projection * Vec4::new(2.0 * u - 1.0, 2.0 * v - 1.0, -1.0, 1.0);
    if near.w.abs() < MIN_W {
        return None;
    }
    let point = near.truncate() / near.w;
    if point.z.abs() < MIN_W {
        return None;
    }
    Some(point * (-depth / point.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unproject_center_lies_on_axis() {
        let camera = RenderCamera::at_origin(1.0, (640, 480));
        let p = unproject(0.5, 0.5, 3.0, &camera.projection.inverse()).unwrap();
        assert!(p.x.abs() < 1e-4 && p.y.abs() < 1e-4);
        assert!((p.z + 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_unproject_keeps_depth_off_axis() {
        let camera = RenderCamera::at_origin(1.2, (640, 480));
        let p = unproject(0.9, 0.2, 2.0, &camera.projection.inverse()).unwrap();
        assert!((p.z + 2.0).abs() < 1e-4);
        assert!(p.x > 0.0 && p.y < 0.0);
    }

    #[test]
    fn test_range_include() {
        let r = DepthRange::include(None, 2.0);
        let r = DepthRange::include(r, 1.0);
        let r = DepthRange::include(r, 3.0).unwrap();
        assert_eq!((r.min, r.max), (1.0, 3.0));
    }

    #[test]
    fn test_collider_grid_smaller_than_two_is_rejected() {
        let options = MeshOptions {
            collider_grid: Some(1),
            ..MeshOptions::default()
        };
        assert!(matches!(
            DepthSurfaceBuilder::new(&options),
            Err(DepthError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_collider_grid_falls_back_to_render_grid() {
        let options = MeshOptions {
            collider_grid: None,
            ..MeshOptions::default()
        };
        let builder = DepthSurfaceBuilder::new(&options).unwrap();
        assert_eq!(builder.collider_mesh().vertex_count(), builder.mesh().vertex_count());
    }
}
