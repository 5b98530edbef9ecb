// SPDX-License-Identifier: GPL-3.0-only

//! Per-view pass ordering
//!
//! `Idle -> AcquireVirtualDepth -> GenerateMask -> BlurPyramid -> Composite -> Idle`
//!
//! Compositing straight from `Idle` is allowed: it reuses the mask that
//! persisted from an earlier frame. Any stage may fall back to `Idle` when a
//! pass is skipped or fails.

use crate::errors::DepthError;
use std::fmt;

/// Stage of the occlusion pipeline for one view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OcclusionStage {
    #[default]
    Idle,
    AcquireVirtualDepth,
    GenerateMask,
    BlurPyramid,
    Composite,
}

impl OcclusionStage {
    /// Whether moving from `self` to `next` keeps the pass order
    pub fn can_advance_to(self, next: OcclusionStage) -> bool {
        use OcclusionStage::*;
        matches!(
            (self, next),
            (Idle, AcquireVirtualDepth)
                | (AcquireVirtualDepth, GenerateMask)
                | (GenerateMask, BlurPyramid)
                | (BlurPyramid, Composite)
                | (Idle, Composite)
                | (Composite, Idle)
        )
    }
}

impl fmt::Display for OcclusionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OcclusionStage::Idle => "idle",
            OcclusionStage::AcquireVirtualDepth => "acquire virtual depth",
            OcclusionStage::GenerateMask => "generate mask",
            OcclusionStage::BlurPyramid => "blur pyramid",
            OcclusionStage::Composite => "composite",
        };
        f.write_str(name)
    }
}

/// Rejected stage transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOrderError {
    pub from: OcclusionStage,
    pub to: OcclusionStage,
}

impl fmt::Display for StageOrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "occlusion stage {} cannot follow {}", self.to, self.from)
    }
}

impl From<StageOrderError> for DepthError {
    fn from(err: StageOrderError) -> Self {
        DepthError::PassOrder(err.to_string())
    }
}

/// Tracks the current stage of one view
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTracker {
    stage: OcclusionStage,
}

impl StageTracker {
    pub fn stage(&self) -> OcclusionStage {
        self.stage
    }

    /// Move to `next`, rejecting out-of-order transitions
    pub fn advance(&mut self, next: OcclusionStage) -> Result<(), StageOrderError> {
        if !self.stage.can_advance_to(next) {
            return Err(StageOrderError {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        Ok(())
    }

    /// Drop back to `Idle` after a skipped or failed pass
    pub fn abort(&mut self) {
        self.stage = OcclusionStage::Idle;
    }

    /// Whether a blurred mask is waiting to be composited
    pub fn has_pending_mask(&self) -> bool {
        self.stage == OcclusionStage::BlurPyramid
    }
}
