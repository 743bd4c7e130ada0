//! [`Watchdog`] – liveness monitor for long-running loop components.
//!
//! The control loop beats once per completed tick.  A controller call that
//! never returns stops the beats, and [`Watchdog::stalled`] starts reporting
//! the component once its deadline has passed.  The watchdog only observes;
//! nothing is cancelled on the component's behalf.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Health state reported for a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Beat within its deadline.
    Healthy,
    /// Missed its deadline, or was never registered.
    Stalled,
}

struct Deadline {
    last_beat: Instant,
    timeout: Duration,
}

impl Deadline {
    fn expired(&self) -> bool {
        self.last_beat.elapsed() > self.timeout
    }
}

/// Tracks heartbeats from registered components.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hostvisor_kernel::watchdog::{ComponentHealth, Watchdog};
///
/// let mut wd = Watchdog::new();
/// wd.register("control_loop", Duration::from_secs(21));
/// wd.beat("control_loop");
///
/// assert_eq!(wd.health("control_loop"), ComponentHealth::Healthy);
/// assert!(wd.stalled().is_empty());
/// ```
#[derive(Default)]
pub struct Watchdog {
    components: HashMap<String, Deadline>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `component` with the given deadline.  The clock starts
    /// now; registering again resets it.
    pub fn register(&mut self, component: &str, timeout: Duration) {
        self.components.insert(
            component.to_string(),
            Deadline {
                last_beat: Instant::now(),
                timeout,
            },
        );
    }

    /// Stop watching `component`, e.g. after it shut down cleanly.
    pub fn deregister(&mut self, component: &str) {
        self.components.remove(component);
    }

    /// Record a heartbeat.  Unknown components are ignored.
    pub fn beat(&mut self, component: &str) {
        if let Some(deadline) = self.components.get_mut(component) {
            deadline.last_beat = Instant::now();
        }
    }

    pub fn health(&self, component: &str) -> ComponentHealth {
        match self.components.get(component) {
            Some(deadline) if !deadline.expired() => ComponentHealth::Healthy,
            _ => ComponentHealth::Stalled,
        }
    }

    /// IDs of every registered component whose deadline has passed, sorted.
    pub fn stalled(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .components
            .iter()
            .filter(|(_, deadline)| deadline.expired())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
