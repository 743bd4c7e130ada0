use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Point-in-time snapshot of the physical host, produced fresh on every tick.
///
/// `stats` hold observed values (memory figures in KiB); `controls` hold the
/// outputs a policy wrote for the controllers to apply on the same tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSample {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,
    #[serde(default)]
    pub controls: BTreeMap<String, f64>,
}

impl HostSample {
    pub fn new(stats: BTreeMap<String, f64>) -> Self {
        Self {
            timestamp: Utc::now(),
            stats,
            controls: BTreeMap::new(),
        }
    }

    pub fn stat(&self, key: &str) -> Option<f64> {
        self.stats.get(key).copied()
    }

    pub fn control(&self, key: &str) -> Option<f64> {
        self.controls.get(key).copied()
    }

    pub fn set_control(&mut self, key: impl Into<String>, value: f64) {
        self.controls.insert(key.into(), value);
    }
}

/// Snapshot of one guest workload, taken on the same tick as the host sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestSample {
    /// Hypervisor-assigned domain UUID.
    pub id: Uuid,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,
    #[serde(default)]
    pub controls: BTreeMap<String, f64>,
}

impl GuestSample {
    pub fn new(id: Uuid, name: impl Into<String>, stats: BTreeMap<String, f64>) -> Self {
        Self {
            id,
            name: name.into(),
            timestamp: Utc::now(),
            stats,
            controls: BTreeMap::new(),
        }
    }

    pub fn stat(&self, key: &str) -> Option<f64> {
        self.stats.get(key).copied()
    }

    pub fn control(&self, key: &str) -> Option<f64> {
        self.controls.get(key).copied()
    }

    pub fn set_control(&mut self, key: impl Into<String>, value: f64) {
        self.controls.insert(key.into(), value);
    }
}

/// Outcome of running the policy set against one tick's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The policy wants the controllers to act on this tick.
    Proceed,
    /// The policy explicitly said no action is needed.
    Skip,
    /// No policy set was supplied; nothing can ask for action.
    Unconfigured,
}

impl Verdict {
    /// Only [`Verdict::Proceed`] lets a control pass reach the controllers.
    pub fn permits_dispatch(self) -> bool {
        matches!(self, Verdict::Proceed)
    }
}

/// Global error type spanning plugin resolution, configuration, controller
/// and hypervisor failures.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum HostvisorError {
    #[error("Unknown controller: {0}")]
    UnknownController(String),

    #[error("Controller {controller} failed: {details}")]
    ControllerFailed { controller: String, details: String },

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Hypervisor request for guest {guest} failed: {details}")]
    Hypervisor { guest: String, details: String },

    #[error("I/O Error: {0}")]
    Io(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn host_sample_controls_start_empty() {
        let host = HostSample::new(stats(&[("mem_total", 1024.0)]));
        assert_eq!(host.stat("mem_total"), Some(1024.0));
        assert!(host.controls.is_empty());
        assert_eq!(host.control("ksm_run"), None);
    }

    #[test]
    fn set_control_overwrites_previous_value() {
        let mut guest = GuestSample::new(Uuid::new_v4(), "vm-a", BTreeMap::new());
        guest.set_control("balloon_target", 2048.0);
        guest.set_control("balloon_target", 4096.0);
        assert_eq!(guest.control("balloon_target"), Some(4096.0));
    }

    #[test]
    fn guest_sample_roundtrip_keeps_identity() {
        let mut guest = GuestSample::new(Uuid::new_v4(), "vm-b", stats(&[("balloon_cur", 512.0)]));
        guest.set_control("balloon_target", 256.0);
        let json = serde_json::to_string(&guest).unwrap();
        let back: GuestSample = serde_json::from_str(&json).unwrap();
        assert_eq!(guest, back);
    }

    #[test]
    fn host_sample_without_controls_field_deserializes() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","stats":{"mem_free":10.0}}"#;
        let host: HostSample = serde_json::from_str(json).unwrap();
        assert_eq!(host.stat("mem_free"), Some(10.0));
        assert!(host.controls.is_empty());
    }

    #[test]
    fn only_proceed_permits_dispatch() {
        assert!(Verdict::Proceed.permits_dispatch());
        assert!(!Verdict::Skip.permits_dispatch());
        assert!(!Verdict::Unconfigured.permits_dispatch());
    }

    #[test]
    fn hostvisor_error_display() {
        let err = HostvisorError::UnknownController("nosuch".to_string());
        assert!(err.to_string().contains("nosuch"));

        let err2 = HostvisorError::ControllerFailed {
            controller: "ksm".to_string(),
            details: "permission denied".to_string(),
        };
        assert!(err2.to_string().contains("ksm"));
        assert!(err2.to_string().contains("permission denied"));
    }
}
