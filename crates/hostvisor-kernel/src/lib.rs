//! `hostvisor-kernel` – Policy & Supervision
//!
//! Decides whether a tick warrants action and notices when the loop stops
//! making progress. It does not actuate anything itself.
//!
//! # Modules
//!
//! - [`policy`] – [`PolicySet`][policy::PolicySet] and the [`Rule`][policy::Rule]
//!   trait, plus [`RuleGate`][policy::RuleGate], the default
//!   [`PolicyGate`][policy::PolicyGate] that turns one tick's samples into a
//!   [`Verdict`][hostvisor_types::Verdict].
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]:
//!   tracks heartbeats from the control loop so a supervisor can spot a
//!   controller call that never returns.

pub mod policy;
pub mod watchdog;

pub use policy::{FreeMemoryRule, PolicyGate, PolicySet, Rule, RuleGate};
pub use watchdog::{ComponentHealth, Watchdog};
