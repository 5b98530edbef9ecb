// SPDX-License-Identifier: GPL-3.0-only

//! Still-image export of occlusion masks
//!
//! The readback is requested once and shared: every caller awaiting the
//! same snapshot receives the same decoded image. Requests cannot be
//! cancelled once made.

use crate::errors::{DepthError, DepthResult};
use crate::gpu::wgpu;
use crate::shaders::PendingReadback;
use futures::FutureExt;
use futures::future::{LocalBoxFuture, Shared};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Pending or resolved image readback
pub type SharedSnapshot = Shared<LocalBoxFuture<'static, DepthResult<Arc<RgbaImage>>>>;

/// Start reading an `Rgba8Unorm` texture back as an image
///
/// The texture copy is submitted before this returns, so the snapshot holds
/// the contents at request time even if the texture is redrawn before the
/// future is first polled. Only mapping and decoding wait for the await.
pub fn texture_snapshot(
    device: Arc<wgpu::Device>,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> SharedSnapshot {
    let pending = PendingReadback::submit(&device, queue, texture, 4);
    async move {
        let (width, height) = pending.dimensions();
        debug!(width, height, "Reading back mask snapshot");

        let bytes = pending.read(&device).await?;
        RgbaImage::from_raw(width, height, bytes)
            .map(Arc::new)
            .ok_or_else(|| DepthError::Gpu("Failed to create image from GPU buffer".to_string()))
    }
    .boxed_local()
    .shared()
}

/// One snapshot per mask version
///
/// Repeated requests for the same view and mask generation return the
/// in-flight (or finished) readback instead of starting another.
#[derive(Default)]
pub struct SnapshotCache {
    key: Option<(usize, u64)>,
    snapshot: Option<SharedSnapshot>,
}

impl SnapshotCache {
    pub fn get_or_start(
        &mut self,
        view_index: usize,
        generation: u64,
        start: impl FnOnce() -> SharedSnapshot,
    ) -> SharedSnapshot {
        if self.key == Some((view_index, generation)) {
            if let Some(snapshot) = &self.snapshot {
                return snapshot.clone();
            }
        }

        let snapshot = start();
        self.key = Some((view_index, generation));
        self.snapshot = Some(snapshot.clone());
        snapshot
    }

    /// Forget the cached snapshot
    pub fn clear(&mut self) {
        self.key = None;
        self.snapshot = None;
    }
}

/// Timestamped file name for a mask export
pub fn snapshot_filename(view_index: usize) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    format!("MASK_{}_view{}.png", timestamp, view_index)
}

/// Await a snapshot and write it as PNG into `output_dir`
pub async fn save_snapshot(
    snapshot: SharedSnapshot,
    output_dir: &Path,
    view_index: usize,
) -> DepthResult<PathBuf> {
    let image = snapshot.await?;
    let filepath = output_dir.join(snapshot_filename(view_index));

    info!(path = %filepath.display(), "Saving mask snapshot");

    // Encoding is CPU-bound
    let target = filepath.clone();
    tokio::task::spawn_blocking(move || image.save(&target).map_err(DepthError::from))
        .await
        .map_err(|e| DepthError::Io(format!("Save task error: {}", e)))??;

    Ok(filepath)
}
