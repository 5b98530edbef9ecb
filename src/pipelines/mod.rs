// SPDX-License-Identifier: GPL-3.0-only

//! Off-frame work that leaves the render loop
//!
//! Mask readback and PNG export run as futures so the per-frame passes never
//! wait on the GPU. Encoding happens on a blocking task.
//!
//! - [`snapshot`]: shared mask readback and still-image export

pub mod snapshot;

pub use snapshot::{SharedSnapshot, SnapshotCache, save_snapshot, snapshot_filename};
