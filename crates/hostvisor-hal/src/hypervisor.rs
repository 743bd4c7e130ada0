//! Generic `Hypervisor` trait: the handle controllers use to change guest
//! resources.
//!
//! A libvirt-backed implementation lives outside this workspace; the loop and
//! the built-in controllers only ever talk to the trait, so a
//! [`DryRunHypervisor`][crate::sim::DryRunHypervisor] can stand in for it.

use hostvisor_types::{GuestSample, HostvisorError};

/// Connection to the hypervisor managing the guests on this host.
pub trait Hypervisor: Send + Sync {
    /// Short name for log output, e.g. `"qemu:///system"` or `"dry-run"`.
    fn name(&self) -> &str;

    /// Ask the guest's balloon driver to settle at `target_kib` KiB.
    ///
    /// # Errors
    ///
    /// Returns [`HostvisorError::Hypervisor`] when the request is rejected
    /// (unknown domain, guest without a balloon device, connection lost).
    fn set_balloon_target(&self, guest: &GuestSample, target_kib: u64)
    -> Result<(), HostvisorError>;
}
