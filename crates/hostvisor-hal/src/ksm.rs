//! [`KsmController`] – applies kernel same-page merging tunables.
//!
//! The policy expresses KSM settings as host controls.  Each one maps to a
//! file under the KSM sysfs directory (`/sys/kernel/mm/ksm` unless
//! `ksm.sysfs-dir` says otherwise):
//!
//! | Host control | File |
//! |---|---|
//! | `ksm_run` | `run` |
//! | `ksm_pages_to_scan` | `pages_to_scan` |
//! | `ksm_sleep_millisecs` | `sleep_millisecs` |
//! | `ksm_merge_across_nodes` | `merge_across_nodes` |
//!
//! A value is only written when it differs from the last value this
//! controller wrote.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use hostvisor_types::{GuestSample, HostSample, HostvisorError};
use tracing::info;

use crate::controller::{Controller, ControllerContext};

/// Registry name of the KSM controller.
pub const NAME: &str = "ksm";

pub const DEFAULT_SYSFS_DIR: &str = "/sys/kernel/mm/ksm";

const TUNABLES: [&str; 4] = [
    "ksm_run",
    "ksm_pages_to_scan",
    "ksm_sleep_millisecs",
    "ksm_merge_across_nodes",
];

pub struct KsmController {
    sysfs_dir: PathBuf,
    last_written: HashMap<&'static str, i64>,
}

impl KsmController {
    pub fn new(sysfs_dir: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_dir: sysfs_dir.into(),
            last_written: HashMap::new(),
        }
    }

    /// Factory used by the plugin registry.
    pub fn instance(ctx: &ControllerContext) -> Result<Box<dyn Controller>, HostvisorError> {
        let dir = ctx
            .setting("ksm", "sysfs-dir")
            .unwrap_or_else(|| DEFAULT_SYSFS_DIR.to_string());
        Ok(Box::new(Self::new(dir)))
    }
}

impl Controller for KsmController {
    fn name(&self) -> &str {
        NAME
    }

    fn process(&mut self, host: &HostSample, _guests: &[GuestSample]) -> Result<(), HostvisorError> {
        for control in TUNABLES {
            let Some(value) = host.control(control) else {
                continue;
            };
            let value = value.round() as i64;
            if self.last_written.get(control) == Some(&value) {
                continue;
            }
            let file_name = control.strip_prefix("ksm_").unwrap_or(control);
            let path = self.sysfs_dir.join(file_name);
            fs::write(&path, format!("{value}\n"))
                .map_err(|e| HostvisorError::Io(format!("writing {}: {e}", path.display())))?;
            self.last_written.insert(control, value);
            info!(tunable = file_name, value, "ksm tunable written");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn host_with(controls: &[(&str, f64)]) -> HostSample {
        let mut host = HostSample::new(BTreeMap::new());
        for (k, v) in controls {
            host.set_control(*k, *v);
        }
        host
    }

    fn read(dir: &std::path::Path, file: &str) -> String {
        fs::read_to_string(dir.join(file)).expect("tunable file")
    }

    #[test]
    fn writes_requested_tunables() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut ksm = KsmController::new(dir.path());
        ksm.process(&host_with(&[("ksm_run", 1.0), ("ksm_pages_to_scan", 64.0)]), &[])
            .unwrap();
        assert_eq!(read(dir.path(), "run"), "1\n");
        assert_eq!(read(dir.path(), "pages_to_scan"), "64\n");
        assert!(!dir.path().join("sleep_millisecs").exists());
    }

    #[test]
    fn unchanged_value_is_not_rewritten() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut ksm = KsmController::new(dir.path());
        ksm.process(&host_with(&[("ksm_run", 1.0)]), &[]).unwrap();

        // An outside writer changes the file; the same control must not clobber it.
        fs::write(dir.path().join("run"), "0\n").unwrap();
        ksm.process(&host_with(&[("ksm_run", 1.0)]), &[]).unwrap();
        assert_eq!(read(dir.path(), "run"), "0\n");

        ksm.process(&host_with(&[("ksm_run", 2.0)]), &[]).unwrap();
        assert_eq!(read(dir.path(), "run"), "2\n");
    }

    #[test]
    fn no_controls_means_no_writes() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut ksm = KsmController::new(dir.path());
        ksm.process(&host_with(&[]), &[]).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unwritable_directory_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut ksm = KsmController::new(dir.path().join("missing"));
        let result = ksm.process(&host_with(&[("ksm_run", 1.0)]), &[]);
        assert!(matches!(result, Err(HostvisorError::Io(_))));
    }
}
