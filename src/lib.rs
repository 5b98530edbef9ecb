// SPDX-License-Identifier: GPL-3.0-only

//! XR Depth - depth sensing and real-world occlusion for mixed-reality renderers
//!
//! This library turns per-frame depth sensor output into metric point
//! queries, a displaced surface mesh and a soft occlusion mask that hides
//! virtual content behind real objects.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`depth`]: Depth frame ingestion and the per-view [`DepthFrameStore`]
//! - [`transform`]: Colour-image UV to depth UV and world-point reprojection
//! - [`surface`]: Displaced grid mesh and throttled collider rebuilds
//! - [`shaders`]: GPU passes (depth decode, occlusion mask, blur, composite)
//! - [`pipelines`]: Mask readback and still-image export
//! - [`clients`]: Reference counting of depth consumers
//! - [`config`]: User configuration handling
//!
//! # Frame order
//!
//! ```text
//! sensor ──▶ DepthFrameStore ──┬──▶ DepthSurfaceBuilder
//!                              └──▶ OcclusionMaskPipeline ──▶ composite
//! ```
//!
//! The store must be updated before the surface or the occlusion pass run
//! in the same frame.

pub mod camera;
pub mod clients;
pub mod config;
pub mod constants;
pub mod depth;
pub mod errors;
pub mod gpu;
pub mod pipelines;
pub mod shaders;
pub mod surface;
pub mod transform;

// Re-export commonly used types
pub use camera::{CameraMatrices, RenderCamera};
pub use clients::{ClientRefCounter, DepthClientToken, SensorStreamControl};
pub use config::DepthConfig;
pub use constants::GridPreset;
pub use depth::{CpuSamples, DepthEncoding, DepthFrameStore, GpuDepthHandle, SensorView};
pub use errors::{DepthError, DepthResult};
pub use gpu::GpuContext;
pub use shaders::{
    DepthDecoder, FrameTargets, OccludableScene, OccluderMesh, OcclusionMaskPipeline,
    OcclusionView, PassOutcome, RenderLayers,
};
pub use surface::{DepthSurfaceBuilder, DepthSurfaceMesh};
pub use transform::CoordinateTransformer;
