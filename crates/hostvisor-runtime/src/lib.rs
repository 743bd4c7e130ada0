//! `hostvisor-runtime` – The Control Loop
//!
//! Wires the sample sources, the policy gate and the loaded controllers into
//! one periodic scheduler.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`][control_loop::ControlLoop]:
//!   loads controllers once, then every interval samples the host and the
//!   guests, asks the [`PolicyGate`] for a verdict and dispatches the
//!   controllers in configuration order.  [`start`][control_loop::ControlLoop::start]
//!   returns a [`LoopHandle`][control_loop::LoopHandle] for stopping and
//!   joining the background task.
//! - [`config`] – [`ConfigStore`][config::ConfigStore]:
//!   shared section/key/value configuration loaded from TOML and
//!   `HOSTVISOR_*` environment variables.  Flipping `main.running` to `0`
//!   stops a running loop at its next wake.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   installs the global `tracing` subscriber with optional JSON output and
//!   OTLP span export.

pub mod config;
pub mod control_loop;
pub mod telemetry;

pub use config::ConfigStore;
pub use control_loop::{Collaborators, ControlLoop, LoopHandle, LoopState, TickOutcome};
pub use telemetry::{TracerProviderGuard, init_tracing};

// Re-exported so embedders can supply a custom gate without a direct
// dependency on hostvisor-kernel.
pub use hostvisor_kernel::{PolicyGate, PolicySet, RuleGate};
