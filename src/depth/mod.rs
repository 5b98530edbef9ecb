// SPDX-License-Identifier: GPL-3.0-only

//! Depth frame ingestion and point queries
//!
//! Sensor updates arrive through two producer shapes (CPU buffers and GPU
//! textures) and are reconciled into one [`DepthFrameStore`] surface.

mod frame;
mod store;

pub use frame::{
    CpuSamples, DepthEncoding, DepthFrame, DepthSource, GpuDepthHandle, SensorView,
};
pub use store::{DepthFrameStore, nearest_texel};
