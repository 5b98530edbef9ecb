// SPDX-License-Identifier: GPL-3.0-only
//! GPU passes and their shaders
//!
//! - [`depth`]: sensor depth texture decoding to metres
//! - [`occlusion`]: virtual distance, mask, blur pyramid and composite
//!
//! WGSL is split into shared fragments (see [`common`]) that each pass
//! concatenates with its own entry points.

pub mod common;
pub mod depth;
mod gpu_processor;
pub mod gpu_utils;
pub mod occlusion;

pub use gpu_processor::{
    CachedDimensions, PendingReadback, allocate_scoped, allocate_scoped_now,
    padded_bytes_per_row, read_buffer_async, read_texture_async, strip_row_padding,
};

pub use depth::DepthDecoder;
pub use occlusion::{
    FrameTargets, OccludableScene, OccluderMesh, OcclusionMaskPipeline, OcclusionStage,
    OcclusionView, PassOutcome, RenderLayers, SkipReason,
};

/// Parse and validate a WGSL module, panicking with the shader name on error
#[cfg(test)]
pub(crate) fn validate_shader(name: &str, source: &str) {
    let result = naga::front::wgsl::parse_str(source);
    match result {
        Ok(module) => {
            // Validate the parsed module
            let info = naga::valid::Validator::new(
                naga::valid::ValidationFlags::all(),
                naga::valid::Capabilities::all(),
            )
            .validate(&module);

            if let Err(e) = info {
                panic!("Shader '{}' validation failed: {:?}", name, e);
            }
        }
        Err(e) => {
            panic!("Shader '{}' parse failed: {:?}", name, e);
        }
    }
}
