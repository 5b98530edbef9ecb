// SPDX-License-Identifier: GPL-3.0-only

//! Per-view depth frame storage
//!
//! The store is owned by the session and passed by reference to every
//! consumer. Frames are replaced wholesale on each sensor update and kept
//! between updates, so point queries never see a half-written frame.

use super::frame::{CpuSamples, DepthFrame, DepthSource, GpuDepthHandle, SensorView};
use crate::camera::{CameraMatrices, RenderCamera};
use crate::config::PlatformCalibration;
use crate::constants::depth::NO_DATA_METERS;
use crate::errors::{DepthError, DepthResult};
use crate::shaders::depth::DepthDecoder;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Frame sequence numbers are unique across stores, so GPU uploads keyed
/// by them never alias between two stores
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Owns the latest depth frame of every view
#[derive(Debug, Default)]
pub struct DepthFrameStore {
    frames: Vec<Option<DepthFrame>>,
    calibration: PlatformCalibration,
    session_active: bool,
}

impl DepthFrameStore {
    /// Create an empty store with no platform calibration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store applying the given platform calibration
    pub fn with_calibration(calibration: PlatformCalibration) -> Self {
        Self {
            calibration,
            ..Self::default()
        }
    }

    /// Start a sensing session
    pub fn begin_session(&mut self) {
        info!("Depth session started");
        self.frames.clear();
        self.session_active = true;
    }

    /// End the session and drop every stored frame
    pub fn end_session(&mut self) {
        info!(views = self.frames.len(), "Depth session ended");
        self.frames.clear();
        self.session_active = false;
    }

    /// Whether a session is running
    pub fn is_session_active(&self) -> bool {
        self.session_active
    }

    /// Replace the stored frame for a view
    ///
    /// View slots grow as new indices arrive and never shrink.
    pub fn update(&mut self, view_index: usize, mut frame: DepthFrame) {
        if self.frames.len() <= view_index {
            self.frames.resize_with(view_index + 1, || None);
        }
        frame.sequence = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.frames[view_index] = Some(frame);
    }

    /// Ingest a CPU sample buffer
    #[allow(clippy::too_many_arguments)]
    pub fn update_from_cpu_samples(
        &mut self,
        view_index: usize,
        samples: CpuSamples,
        width: u32,
        height: u32,
        raw_value_to_meters: f32,
        sensor: SensorView,
        render_camera: &RenderCamera,
    ) -> DepthResult<()> {
        if width == 0 || height == 0 {
            warn!(view_index, width, height, "Ignoring depth frame with zero size");
            return Err(DepthError::InvalidDimensions(format!(
                "depth frame {}x{}",
                width, height
            )));
        }

        let expected = width as usize * height as usize;
        if samples.len() != expected {
            warn!(
                view_index,
                actual = samples.len(),
                expected,
                width,
                height,
                "Depth sample count mismatch"
            );
            return Err(DepthError::InvalidDimensions(format!(
                "{} samples for {}x{}",
                samples.len(),
                width,
                height
            )));
        }

        let matrices = resolve_matrices(view_index, sensor, render_camera)?;

        self.update(
            view_index,
            DepthFrame {
                width,
                height,
                source: DepthSource::Cpu(samples),
                raw_value_to_meters: self.calibration.correct_scale(raw_value_to_meters),
                matrices,
                sequence: 0,
            },
        );
        Ok(())
    }

    /// Ingest a GPU depth texture
    pub fn update_from_gpu_handle(
        &mut self,
        view_index: usize,
        handle: GpuDepthHandle,
        raw_value_to_meters: f32,
        sensor: SensorView,
        render_camera: &RenderCamera,
    ) -> DepthResult<()> {
        let (width, height) = (handle.width(), handle.height());
        if width == 0 || height == 0 {
            warn!(view_index, "Ignoring zero-sized depth texture");
            return Err(DepthError::InvalidDimensions(format!(
                "depth texture {}x{}",
                width, height
            )));
        }

        let matrices = resolve_matrices(view_index, sensor, render_camera)?;

        self.update(
            view_index,
            DepthFrame {
                width,
                height,
                source: DepthSource::Gpu {
                    handle,
                    readback: None,
                },
                raw_value_to_meters: self.calibration.correct_scale(raw_value_to_meters),
                matrices,
                sequence: 0,
            },
        );
        Ok(())
    }

    /// Read a GPU frame back into CPU memory through the decode pass
    ///
    /// Does nothing for CPU frames or frames already read back.
    pub async fn materialize_cpu(
        &mut self,
        view_index: usize,
        decoder: &DepthDecoder,
    ) -> DepthResult<()> {
        let frame = self
            .frames
            .get_mut(view_index)
            .and_then(Option::as_mut)
            .ok_or(DepthError::DepthUnavailable { view_index })?;

        let scale = frame.raw_value_to_meters;
        if let DepthSource::Gpu { handle, readback } = &mut frame.source {
            if readback.is_none() {
                let meters = decoder.decode_to_cpu(handle, scale).await?;
                debug!(
                    view_index,
                    samples = meters.len(),
                    "Materialized GPU depth frame"
                );
                *readback = Some(meters);
            }
        }
        Ok(())
    }

    /// Metric depth at a normalized coordinate
    ///
    /// Nearest sample, `v` pointing up (v = 1 is image row 0), both axes
    /// clamped to the buffer. Returns `0.0` when the view has no frame or the
    /// frame is not CPU-queryable.
    pub fn sample_meters(&self, u: f32, v: f32, view_index: usize) -> f32 {
        let Some(frame) = self.frame(view_index) else {
            return NO_DATA_METERS;
        };
        let (x, y) = nearest_texel(u, v, frame.width, frame.height);
        frame.meters_at(x, y).unwrap_or(NO_DATA_METERS)
    }

    /// Latest frame for a view
    pub fn frame(&self, view_index: usize) -> Option<&DepthFrame> {
        self.frames.get(view_index).and_then(Option::as_ref)
    }

    /// Whether any frame has ever arrived for this view
    pub fn has_frame(&self, view_index: usize) -> bool {
        self.frame(view_index).is_some()
    }

    /// Depth camera matrices of a view
    pub fn matrices(&self, view_index: usize) -> Option<&CameraMatrices> {
        self.frame(view_index).map(|f| &f.matrices)
    }

    /// Number of view slots allocated so far
    pub fn view_count(&self) -> usize {
        self.frames.len()
    }
}

/// Nearest sample for a bottom-origin normalized coordinate
#[inline]
pub fn nearest_texel(u: f32, v: f32, width: u32, height: u32) -> (u32, u32) {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    // NaN falls through the clamp and saturates to 0 on the cast
    let x = (u * width as f32).clamp(0.0, max_x).round() as u32;
    let y = ((1.0 - v) * height as f32).clamp(0.0, max_y).round() as u32;
    (x.min(width.saturating_sub(1)), y.min(height.saturating_sub(1)))
}

fn resolve_matrices(
    view_index: usize,
    sensor: SensorView,
    render_camera: &RenderCamera,
) -> DepthResult<CameraMatrices> {
    match sensor {
        SensorView::Native { view, projection } => Ok(CameraMatrices::new(view, projection)),
        SensorView::RenderCamera => Ok(render_camera.matrices()),
        SensorView::Missing => {
            warn!(view_index, "Sensor pose missing, skipping depth update");
            Err(DepthError::MissingMatrixData(format!(
                "no sensor pose for view {}",
                view_index
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> RenderCamera {
        RenderCamera::at_origin(1.0, (640, 480))
    }

    #[test]
    fn test_nearest_texel_clamps() {
        assert_eq!(nearest_texel(0.0, 1.0, 4, 4), (0, 0));
        assert_eq!(nearest_texel(1.0, 0.0, 4, 4), (3, 3));
        assert_eq!(nearest_texel(-5.0, 7.0, 4, 4), (0, 0));
        assert_eq!(nearest_texel(f32::NAN, f32::NAN, 4, 4), (0, 0));
    }

    #[test]
    fn test_view_slots_grow_and_never_shrink() {
        let mut store = DepthFrameStore::new();
        store
            .update_from_cpu_samples(
                2,
                CpuSamples::U16(vec![1; 4]),
                2,
                2,
                0.001,
                SensorView::RenderCamera,
                &camera(),
            )
            .unwrap();
        assert_eq!(store.view_count(), 3);
        assert!(!store.has_frame(0));
        assert!(store.has_frame(2));

        store
            .update_from_cpu_samples(
                0,
                CpuSamples::U16(vec![1; 4]),
                2,
                2,
                0.001,
                SensorView::RenderCamera,
                &camera(),
            )
            .unwrap();
        assert_eq!(store.view_count(), 3);
    }

    #[test]
    fn test_missing_pose_keeps_previous_frame() {
        let mut store = DepthFrameStore::new();
        store
            .update_from_cpu_samples(
                0,
                CpuSamples::U16(vec![1000; 4]),
                2,
                2,
                0.001,
                SensorView::RenderCamera,
                &camera(),
            )
            .unwrap();

        let result = store.update_from_cpu_samples(
            0,
            CpuSamples::U16(vec![2000; 4]),
            2,
            2,
            0.001,
            SensorView::Missing,
            &camera(),
        );
        assert!(matches!(result, Err(DepthError::MissingMatrixData(_))));
        assert!((store.sample_meters(0.5, 0.5, 0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sequence_increases() {
        let mut store = DepthFrameStore::new();
        let mut other = DepthFrameStore::new();
        let mut seen = Vec::new();
        for _ in 0..3 {
            for s in [&mut store, &mut other] {
                s.update_from_cpu_samples(
                    0,
                    CpuSamples::F32(vec![1.0]),
                    1,
                    1,
                    1.0,
                    SensorView::RenderCamera,
                    &camera(),
                )
                .unwrap();
                seen.push(s.frame(0).unwrap().sequence);
            }
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "{:?}", seen);
    }

    #[test]
    fn test_end_session_drops_frames() {
        let mut store = DepthFrameStore::new();
        store.begin_session();
        store
            .update_from_cpu_samples(
                0,
                CpuSamples::F32(vec![1.0]),
                1,
                1,
                1.0,
                SensorView::RenderCamera,
                &camera(),
            )
            .unwrap();
        store.end_session();
        assert!(!store.is_session_active());
        assert_eq!(store.sample_meters(0.5, 0.5, 0), 0.0);
    }
}
