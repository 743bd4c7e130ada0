//! `hostvisor-hal` – Host Abstraction Layer
//!
//! Everything the control loop touches on the host side sits behind a trait
//! here, so the loop never knows whether it talks to a real hypervisor or a
//! dry-run stub.
//!
//! # Modules
//!
//! - [`controller`] – the [`Controller`] contract and the
//!   [`ControllerContext`] property bag every controller is built from.
//! - [`registry`] – [`PluginRegistry`]: resolves configured controller names
//!   to factories and instantiates them in configuration order.
//! - [`monitor`] – the [`HostMonitor`] and [`GuestManager`] sample sources,
//!   with a `/proc/meminfo` reader and a fixed guest list.
//! - [`hypervisor`] – the [`Hypervisor`] handle controllers actuate through.
//! - [`balloon`] / [`ksm`] – the built-in `balloon` and `ksm` controllers.
//! - [`sim`] – [`DryRunHypervisor`][sim::DryRunHypervisor], which logs and
//!   records requests instead of applying them.

pub mod balloon;
pub mod controller;
pub mod hypervisor;
pub mod ksm;
pub mod monitor;
pub mod registry;
pub mod sim;

pub use balloon::BalloonController;
pub use controller::{ConfigSource, Controller, ControllerContext};
pub use hypervisor::Hypervisor;
pub use ksm::KsmController;
pub use monitor::{GuestManager, HostMonitor, MeminfoMonitor, StaticGuestManager};
pub use registry::{ControllerFactory, PluginRegistry, parse_controller_names};
pub use sim::DryRunHypervisor;
