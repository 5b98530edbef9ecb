// SPDX-License-Identifier: GPL-3.0-only

//! Displaced depth surface
//!
//! A fixed grid whose vertices are pushed out to the measured depth every
//! update. The result feeds shadow casting, debug views and collision
//! proxies.

mod builder;
mod collider;
mod mesh;

pub use builder::{DepthRange, DepthSurfaceBuilder, SurfaceUpdate};
pub use collider::{ColliderHost, ColliderUpdater};
pub use mesh::DepthSurfaceMesh;
