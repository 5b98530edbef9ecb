// SPDX-License-Identifier: GPL-3.0-only

//! Collision proxy regeneration
//!
//! The physics engine stays outside this crate; it plugs in through
//! [`ColliderHost`]. Rebuilds are throttled by wall-clock time so a fast
//! frame rate does not translate into physics-world churn.

use super::mesh::DepthSurfaceMesh;
use crate::config::DepthConfig;
use crate::errors::DepthResult;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Physics world that owns collision shapes built from the surface
pub trait ColliderHost {
    /// Host-side handle of an inserted shape
    type Shape;

    /// Build a shape from the mesh and add it to the world
    fn insert(&mut self, mesh: &DepthSurfaceMesh) -> DepthResult<Self::Shape>;

    /// Take a shape out of the world
    fn remove(&mut self, shape: Self::Shape);
}

/// Throttled collider rebuilds with one or two live shapes
///
/// New shapes are always inserted before the shape they supersede is
/// removed. In dual mode the superseded shape stays in the world until the
/// rebuild after next, so the physics step never sees a freshly swapped
/// world; each slot is then reused every other rebuild.
pub struct ColliderUpdater<S> {
    interval: Option<Duration>,
    dual: bool,
    slots: [Option<S>; 2],
    active: usize,
    last_update: Option<Instant>,
}

impl<S> ColliderUpdater<S> {
    /// Updater limited to `rate_hz` rebuilds per second; `0` disables it
    pub fn new(rate_hz: f32, dual: bool) -> Self {
        let interval = (rate_hz.is_finite() && rate_hz > 0.0)
            .then(|| Duration::from_secs_f32(1.0 / rate_hz));
        Self::with_interval(interval, dual)
    }

    /// Updater using the configured rate and slot mode
    pub fn from_config(config: &DepthConfig) -> Self {
        Self::with_interval(config.collider_interval(), config.mesh.dual_collider)
    }

    fn with_interval(interval: Option<Duration>, dual: bool) -> Self {
        Self {
            interval,
            dual,
            slots: [None, None],
            active: 0,
            last_update: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Whether a rebuild is allowed at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        self.last_update
            .map(|t| now.saturating_duration_since(t) >= interval)
            .unwrap_or(true)
    }

    /// Rebuild the collider from `mesh` if the throttle allows it
    ///
    /// Returns `true` when a new shape was inserted. A failed build keeps
    /// the current shape and does not consume the time slot.
    pub fn update<H>(&mut self, host: &mut H, mesh: &DepthSurfaceMesh, now: Instant) -> DepthResult<bool>
    where
        H: ColliderHost<Shape = S>,
    {
        if !self.is_due(now) {
            return Ok(false);
        }

        let shape = match host.insert(mesh) {
            Ok(shape) => shape,
            Err(e) => {
                warn!(error = %e, "Collider rebuild failed, keeping previous shape");
                return Err(e);
            }
        };

        // Dual mode leaves the previous shape in place for one more cycle
        let target = if self.dual { 1 - self.active } else { self.active };
        if let Some(old) = self.slots[target].take() {
            host.remove(old);
        }
        self.slots[target] = Some(shape);
        self.active = target;
        self.last_update = Some(now);

        debug!(slot = target, dual = self.dual, "Collider rebuilt");
        Ok(true)
    }

    /// Shape currently in use
    pub fn active_shape(&self) -> Option<&S> {
        self.slots[self.active].as_ref()
    }

    /// Number of shapes currently held in the world
    pub fn live_shapes(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Remove every shape from the world
    pub fn clear<H>(&mut self, host: &mut H)
    where
        H: ColliderHost<Shape = S>,
    {
        for slot in &mut self.slots {
            if let Some(shape) = slot.take() {
                host.remove(shape);
            }
        }
        self.last_update = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DepthError;

    #[derive(Default)]
    struct CountingHost {
        next: u32,
        live: Vec<u32>,
        fail: bool,
    }

    impl ColliderHost for CountingHost {
        type Shape = u32;

        fn insert(&mut self, _mesh: &DepthSurfaceMesh) -> DepthResult<u32> {
            if self.fail {
                return Err(DepthError::Gpu("no physics".to_string()));
            }
            self.next += 1;
            self.live.push(self.next);
            Ok(self.next)
        }

        fn remove(&mut self, shape: u32) {
            self.live.retain(|s| *s != shape);
        }
    }

    fn mesh() -> DepthSurfaceMesh {
        DepthSurfaceMesh::grid(2, 2).unwrap()
    }

    #[test]
    fn test_rebuilds_are_throttled_by_wall_clock() {
        let mut host = CountingHost::default();
        let mut updater = ColliderUpdater::new(2.0, false);
        let start = Instant::now();
        let mesh = mesh();

        assert!(updater.update(&mut host, &mesh, start).unwrap());
        assert!(!updater.update(&mut host, &mesh, start + Duration::from_millis(100)).unwrap());
        assert!(!updater.update(&mut host, &mesh, start + Duration::from_millis(499)).unwrap());
        assert!(updater.update(&mut host, &mesh, start + Duration::from_millis(500)).unwrap());
        assert_eq!(host.live, vec![2]);
    }

    #[test]
    fn test_single_slot_replaces_shape() {
        let mut host = CountingHost::default();
        let mut updater = ColliderUpdater::new(1000.0, false);
        let start = Instant::now();
        let mesh = mesh();
        for i in 0..3 {
            updater.update(&mut host, &mesh, start + Duration::from_secs(i)).unwrap();
            assert_eq!(updater.live_shapes(), 1);
        }
        assert_eq!(updater.active_shape(), Some(&3));
    }

    #[test]
    fn test_dual_slot_keeps_previous_shape_one_cycle() {
        let mut host = CountingHost::default();
        let mut updater = ColliderUpdater::new(1000.0, true);
        let start = Instant::now();
        let mesh = mesh();

        updater.update(&mut host, &mesh, start).unwrap();
        updater.update(&mut host, &mesh, start + Duration::from_secs(1)).unwrap();
        assert_eq!(updater.active_shape(), Some(&2));
        assert_eq!(host.live, vec![1, 2]);

        updater.update(&mut host, &mesh, start + Duration::from_secs(2)).unwrap();
        assert_eq!(updater.active_shape(), Some(&3));
        assert_eq!(host.live, vec![2, 3]);
        assert_eq!(updater.live_shapes(), 2);
    }

    #[test]
    fn test_from_config_follows_mesh_options() {
        let mut config = DepthConfig::default();
        config.mesh.dual_collider = true;
        let updater = ColliderUpdater::<u32>::from_config(&config);
        assert!(updater.is_enabled());
        assert!(updater.dual);

        config.mesh.collider_update_rate_hz = 0.0;
        assert!(!ColliderUpdater::<u32>::from_config(&config).is_enabled());
    }

    #[test]
    fn test_zero_rate_disables() {
        let mut host = CountingHost::default();
        let mut updater = ColliderUpdater::<u32>::new(0.0, false);
        assert!(!updater.is_enabled());
        assert!(!updater.update(&mut host, &mesh(), Instant::now()).unwrap());
        assert!(host.live.is_empty());
    }

    #[test]
    fn test_failed_build_keeps_previous_shape() {
        let mut host = CountingHost::default();
        let mut updater = ColliderUpdater::new(1000.0, false);
        let start = Instant::now();
        let mesh = mesh();
        updater.update(&mut host, &mesh, start).unwrap();

        host.fail = true;
        assert!(updater.update(&mut host, &mesh, start + Duration::from_secs(1)).is_err());
        assert_eq!(updater.active_shape(), Some(&1));
        assert!(updater.is_due(start + Duration::from_secs(1)));
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut host = CountingHost::default();
        let mut updater = ColliderUpdater::new(1000.0, true);
        updater.update(&mut host, &mesh(), Instant::now()).unwrap();
        updater.clear(&mut host);
        assert!(host.live.is_empty());
        assert_eq!(updater.live_shapes(), 0);
    }
}
