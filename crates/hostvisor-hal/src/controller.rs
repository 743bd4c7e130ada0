//! The `Controller` contract for pluggable actuators.
//!
//! A controller is built once, when the control loop initialises, from the
//! shared [`ControllerContext`].  It is then handed every qualifying tick's
//! samples through [`Controller::process`].  Controllers apply the controls a
//! policy wrote into the samples; they do not decide the values themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use hostvisor_types::{GuestSample, HostSample, HostvisorError};

use crate::hypervisor::Hypervisor;
use crate::monitor::{GuestManager, HostMonitor};

/// A pluggable actuator invoked once per qualifying tick.
pub trait Controller: Send {
    /// Stable identifier, matching the name it is registered under.
    fn name(&self) -> &str;

    /// Apply this tick's controls.
    ///
    /// Blocking I/O is allowed here.  On a multi-threaded Tokio runtime the
    /// loop runs the pass under `block_in_place`, so a slow call parks only
    /// the loop's own thread.  A call that never returns still stalls the
    /// loop.
    ///
    /// # Errors
    ///
    /// Any error is logged by the loop; the remaining controllers still run.
    fn process(&mut self, host: &HostSample, guests: &[GuestSample]) -> Result<(), HostvisorError>;
}

/// Read-only view of the process configuration handed to controllers.
pub trait ConfigSource: Send + Sync {
    fn lookup(&self, section: &str, key: &str) -> Option<String>;
}

impl ConfigSource for BTreeMap<(String, String), String> {
    fn lookup(&self, section: &str, key: &str) -> Option<String> {
        self.get(&(section.to_string(), key.to_string())).cloned()
    }
}

/// Property bag shared by every controller factory.
#[derive(Clone)]
pub struct ControllerContext {
    pub hypervisor: Arc<dyn Hypervisor>,
    pub host_monitor: Arc<dyn HostMonitor>,
    pub guest_manager: Arc<dyn GuestManager>,
    pub config: Arc<dyn ConfigSource>,
}

impl ControllerContext {
    /// Convenience accessor: `section.key` from the configuration, if set.
    pub fn setting(&self, section: &str, key: &str) -> Option<String> {
        self.config.lookup(section, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_config_source_looks_up_by_section_and_key() {
        let mut map = BTreeMap::new();
        map.insert(
            ("ksm".to_string(), "sysfs-dir".to_string()),
            "/tmp/ksm".to_string(),
        );
        assert_eq!(map.lookup("ksm", "sysfs-dir").as_deref(), Some("/tmp/ksm"));
        assert_eq!(map.lookup("main", "sysfs-dir"), None);
    }
}
