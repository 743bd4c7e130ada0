//! Dry-run hypervisor for hosts without a hypervisor connection and for
//! tests.
//!
//! [`DryRunHypervisor`] accepts every request, logs it, and records it so the
//! full loop can run headless while showing what it *would* have done.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use hostvisor_hal::{DryRunHypervisor, Hypervisor};
//! use hostvisor_types::GuestSample;
//!
//! let hv = DryRunHypervisor::new();
//! let guest = GuestSample::new(uuid::Uuid::new_v4(), "vm-a", BTreeMap::new());
//! hv.set_balloon_target(&guest, 1_048_576).expect("dry run never fails");
//! assert_eq!(hv.requests(), vec![(guest.id, 1_048_576)]);
//! ```

use std::sync::{Mutex, PoisonError};

use hostvisor_types::{GuestSample, HostvisorError};
use tracing::info;
use uuid::Uuid;

use crate::hypervisor::Hypervisor;

/// A [`Hypervisor`] that records balloon requests instead of applying them.
/// Always succeeds.
#[derive(Default)]
pub struct DryRunHypervisor {
    requests: Mutex<Vec<(Uuid, u64)>>,
}

impl DryRunHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(guest id, target KiB)` request received so far, oldest first.
    pub fn requests(&self) -> Vec<(Uuid, u64)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Hypervisor for DryRunHypervisor {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn set_balloon_target(
        &self,
        guest: &GuestSample,
        target_kib: u64,
    ) -> Result<(), HostvisorError> {
        info!(guest = %guest.name, id = %guest.id, target_kib, "[dry-run] balloon target");
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((guest.id, target_kib));
        Ok(())
    }
}
