// SPDX-License-Identifier: GPL-3.0-only

//! GPU depth decoding
//!
//! Sensor depth textures come in several encodings. The decoder turns any of
//! them into metres, either on the GPU for the occlusion pass or read back
//! to the CPU for point queries.

mod decoder;

pub use decoder::{DepthDecoder, upload_depth_texture};

use super::common::{DEPTH_DECODE_FUNCTIONS, FULLSCREEN_VERTEX, compose};

/// Decode pass fragment stage, without shared fragments
pub const DECODE_SHADER_BODY: &str = include_str!("decode.wgsl");

/// Complete decode shader source
pub fn decode_shader_source() -> String {
    compose(&[FULLSCREEN_VERTEX, DEPTH_DECODE_FUNCTIONS, DECODE_SHADER_BODY])
}
