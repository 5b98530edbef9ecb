// SPDX-License-Identifier: GPL-3.0-only

//! Reference counting of depth consumers
//!
//! The sensor stream should run only while some subsystem needs it. Each
//! consumer holds a [`DepthClientToken`]; the [`ClientRefCounter`] pauses
//! or resumes the stream when the set of tokens becomes empty or non-empty.

use crate::errors::DepthResult;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity of one subsystem that needs depth sensing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthClientToken(Uuid);

impl DepthClientToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DepthClientToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DepthClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-side control over the depth sensor stream
pub trait SensorStreamControl {
    /// Stop delivering depth frames
    ///
    /// # Returns
    /// * `Ok(())` - The stream is paused
    /// * `Err(DepthError)` - The request failed and the stream state is unchanged
    fn pause(&mut self) -> DepthResult<()>;

    /// Resume delivering depth frames
    fn resume(&mut self) -> DepthResult<()>;
}

/// Pauses the sensor stream when nobody needs depth
///
/// Until the host reports the sensor state with [`set_sensor_state`]
/// (after probing that pause and resume are available) token changes are
/// only recorded. Afterwards every change issues at most one request, and
/// only when the sensor state and the client set disagree.
///
/// [`set_sensor_state`]: ClientRefCounter::set_sensor_state
pub struct ClientRefCounter<C: SensorStreamControl> {
    control: C,
    clients: HashSet<DepthClientToken>,
    /// Last known sensor state; `None` before the first probe
    sensor_active: Option<bool>,
}

impl<C: SensorStreamControl> ClientRefCounter<C> {
    pub fn new(control: C) -> Self {
        Self {
            control,
            clients: HashSet::new(),
            sensor_active: None,
        }
    }

    /// Register a consumer
    ///
    /// Adding a token twice is a no-op. Returns `Ok(true)` when the token
    /// was new. The token stays registered even if resuming fails.
    pub fn add_client(&mut self, token: DepthClientToken) -> DepthResult<bool> {
        if !self.clients.insert(token) {
            return Ok(false);
        }
        debug!(%token, clients = self.clients.len(), "Depth client added");
        self.reconcile()?;
        Ok(true)
    }

    /// Unregister a consumer
    ///
    /// Returns `Ok(true)` when the token was present.
    pub fn remove_client(&mut self, token: &DepthClientToken) -> DepthResult<bool> {
        if !self.clients.remove(token) {
            return Ok(false);
        }
        debug!(%token, clients = self.clients.len(), "Depth client removed");
        self.reconcile()?;
        Ok(true)
    }

    /// Record the sensor state found by a pause/resume capability probe
    ///
    /// Starts state tracking; no request is issued here. Call
    /// [`reconcile`](Self::reconcile) to act on clients registered earlier.
    pub fn set_sensor_state(&mut self, active: bool) {
        if self.sensor_active.is_none() {
            info!(active, "Depth sensor pause/resume available");
        }
        self.sensor_active = Some(active);
    }

    /// Issue a pause or resume if the sensor state disagrees with the client set
    ///
    /// Returns `Ok(true)` when a request was made. On failure the tracked
    /// state is left as it was so the next change retries.
    pub fn reconcile(&mut self) -> DepthResult<bool> {
        let Some(active) = self.sensor_active else {
            return Ok(false);
        };
        let wanted = self.has_clients();
        if active == wanted {
            return Ok(false);
        }

        let result = if wanted {
            self.control.resume()
        } else {
            self.control.pause()
        };
        if let Err(e) = result {
            warn!(error = %e, resume = wanted, "Depth sensor state change failed");
            return Err(e);
        }

        info!(active = wanted, "Depth sensor stream {}", if wanted { "resumed" } else { "paused" });
        self.sensor_active = Some(wanted);
        Ok(true)
    }

    pub fn has_clients(&self) -> bool {
        !self.clients.is_empty()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn contains(&self, token: &DepthClientToken) -> bool {
        self.clients.contains(token)
    }

    /// Tracked sensor state, `None` before the first probe
    pub fn sensor_active(&self) -> Option<bool> {
        self.sensor_active
    }

    pub fn control(&self) -> &C {
        &self.control
    }
}
