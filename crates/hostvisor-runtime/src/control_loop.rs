//! [`ControlLoop`] – the periodic sample → policy → controller scheduler.
//!
//! Lifecycle: **Initializing** → **Running** → **Stopped**.
//!
//! 1. **Initializing** – [`ControlLoop::new`] loads the configured
//!    controllers through the [`PluginRegistry`] and reads the tick interval
//!    once.  The loop is inert afterwards: nothing runs until
//!    [`ControlLoop::start`] is called, so it can be inspected or driven one
//!    [`tick`][ControlLoop::tick] at a time.
//! 2. **Running** – the background task sleeps for the interval, checks
//!    liveness, then performs one control pass.  Liveness means the
//!    cancellation token has not fired *and* `main.running` still reads `1`.
//! 3. **Stopped** – reached at the first wake where liveness is gone.  No
//!    control pass runs after that point.
//!
//! # Control pass
//!
//! 1. **Sample host** – an absent sample ends the pass silently.
//! 2. **Sample guests** – always from the same tick as the host sample.
//! 3. **Gate** – the [`PolicyGate`] may write controls into the samples; any
//!    verdict other than [`Verdict::Proceed`] ends the pass silently.
//! 4. **Dispatch** – every controller's `process()` runs in configuration
//!    order.  A failing controller is logged and the rest still run.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hostvisor_hal::{DryRunHypervisor, MeminfoMonitor, PluginRegistry, StaticGuestManager};
//! use hostvisor_kernel::{PolicySet, RuleGate};
//! use hostvisor_runtime::{Collaborators, ConfigStore, ControlLoop};
//!
//! # async fn demo() -> Result<(), hostvisor_types::HostvisorError> {
//! let collaborators = Collaborators {
//!     host_monitor: Arc::new(MeminfoMonitor::default()),
//!     guest_manager: Arc::new(StaticGuestManager::default()),
//!     hypervisor: Arc::new(DryRunHypervisor::new()),
//!     gate: Box::new(RuleGate),
//! };
//! let control = ControlLoop::new(
//!     ConfigStore::new(),
//!     Some(PolicySet::new()),
//!     collaborators,
//!     &PluginRegistry::with_builtins(),
//! )?;
//! let handle = control.start();
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hostvisor_hal::{
    Controller, ControllerContext, GuestManager, HostMonitor, Hypervisor, PluginRegistry,
};
use hostvisor_kernel::{PolicyGate, PolicySet, Watchdog};
use hostvisor_types::{HostvisorError, Verdict};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::config::{CONTROLLERS, ConfigStore, INTERVAL, MAIN};

/// Watchdog component ID the loop beats under.
pub const LOOP_COMPONENT: &str = "control_loop";

/// Slack added on top of two intervals before the loop counts as stalled.
const STALL_GRACE: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    Stopped,
}

/// What one control pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The host monitor had no fresh data.
    HostUnavailable,
    /// The gate did not permit dispatch.
    Skipped(Verdict),
    /// Controllers ran; `failed` of the `invoked` returned an error.
    Dispatched { invoked: usize, failed: usize },
}

/// The collaborators the loop samples, gates and actuates through.
pub struct Collaborators {
    pub host_monitor: Arc<dyn HostMonitor>,
    pub guest_manager: Arc<dyn GuestManager>,
    /// Handed to every controller through the [`ControllerContext`].
    pub hypervisor: Arc<dyn Hypervisor>,
    pub gate: Box<dyn PolicyGate>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct ControlLoop {
    config: ConfigStore,
    policy: Option<PolicySet>,
    host_monitor: Arc<dyn HostMonitor>,
    guest_manager: Arc<dyn GuestManager>,
    gate: Box<dyn PolicyGate>,
    /// Fixed for the loop's lifetime, in configuration order.
    controllers: Vec<Box<dyn Controller>>,
    interval: Duration,
    stall_timeout: Duration,
    ticks: u64,
    cancel: CancellationToken,
    state: watch::Sender<LoopState>,
    watchdog: Arc<Mutex<Watchdog>>,
}

impl ControlLoop {
    /// Run the Initializing phase: read the interval, load the controllers
    /// named in `main.controllers`, and return an inert loop.
    ///
    /// An absent `policy` is logged but not an error; every pass will then
    /// be skipped with [`Verdict::Unconfigured`].
    ///
    /// # Errors
    ///
    /// Returns [`HostvisorError::Config`] when `main.controllers` is missing
    /// or `main.system-controller-interval` is not a positive integer.
    pub fn new(
        config: ConfigStore,
        policy: Option<PolicySet>,
        collaborators: Collaborators,
        registry: &PluginRegistry,
    ) -> Result<Self, HostvisorError> {
        let (state, _) = watch::channel(LoopState::Initializing);

        if policy.is_none() {
            warn!("no policy set configured; controllers will not be invoked");
        }

        let interval_secs = config.get_int(MAIN, INTERVAL)?;
        if interval_secs <= 0 {
            return Err(HostvisorError::Config(format!(
                "{MAIN}.{INTERVAL} must be a positive number of seconds, got {interval_secs}"
            )));
        }
        let interval = Duration::from_secs(interval_secs.unsigned_abs());

        let hypervisor = collaborators.hypervisor.name().to_string();
        let ctx = ControllerContext {
            hypervisor: collaborators.hypervisor,
            host_monitor: Arc::clone(&collaborators.host_monitor),
            guest_manager: Arc::clone(&collaborators.guest_manager),
            config: Arc::new(config.clone()),
        };
        let controllers = registry.load(&config.get(MAIN, CONTROLLERS)?, &ctx);

        let names: Vec<&str> = controllers.iter().map(|c| c.name()).collect();
        info!(controllers = ?names, interval_secs, %hypervisor, "control loop initialised");

        Ok(Self {
            config,
            policy,
            host_monitor: collaborators.host_monitor,
            guest_manager: collaborators.guest_manager,
            gate: collaborators.gate,
            controllers,
            interval,
            stall_timeout: interval * 2 + STALL_GRACE,
            ticks: 0,
            cancel: CancellationToken::new(),
            state,
            watchdog: Arc::new(Mutex::new(Watchdog::new())),
        })
    }

    /// Override how long the loop may go without finishing a tick before
    /// [`LoopHandle::stalled`] reports it.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Names of the active controllers, in dispatch order.
    pub fn controller_names(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.name()).collect()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn has_policy(&self) -> bool {
        self.policy.is_some()
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Number of control passes performed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Token that stops the loop at its next wake once cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// `true` while neither the token nor `main.running` asks to stop.
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.config.is_running()
    }

    // -------------------------------------------------------------------------
    // Control pass
    // -------------------------------------------------------------------------

    /// Perform one control pass.
    pub fn tick(&mut self) -> TickOutcome {
        self.ticks += 1;
        let span = info_span!("control_pass", tick = self.ticks);
        let _enter = span.enter();

        let Some(mut host) = self.host_monitor.interrogate() else {
            debug!("host sample unavailable; skipping pass");
            return TickOutcome::HostUnavailable;
        };
        let mut guests = self.guest_manager.interrogate();

        let verdict = self
            .gate
            .evaluate(self.policy.as_ref(), &mut host, &mut guests);
        if !verdict.permits_dispatch() {
            debug!(?verdict, "policy did not request action");
            return TickOutcome::Skipped(verdict);
        }

        let mut failed = 0;
        for controller in &mut self.controllers {
            if let Err(e) = controller.process(&host, &guests) {
                failed += 1;
                warn!(controller = controller.name(), error = %e, "controller failed; continuing");
            }
        }
        TickOutcome::Dispatched {
            invoked: self.controllers.len(),
            failed,
        }
    }

    // -------------------------------------------------------------------------
    // Running
    // -------------------------------------------------------------------------

    /// Spawn the Running phase on a Tokio task and return its handle.
    ///
    /// Dropping the handle detaches the task; it keeps ticking until
    /// stopped or the process exits.
    pub fn start(self) -> LoopHandle {
        let cancel = self.cancel.clone();
        let state = self.state.subscribe();
        let watchdog = Arc::clone(&self.watchdog);
        let task = tokio::spawn(self.run());
        LoopHandle {
            cancel,
            state,
            watchdog,
            task,
        }
    }

    /// Drive the loop on the current task until liveness is lost.
    ///
    /// On a multi-threaded runtime each pass runs under
    /// [`block_in_place`][tokio::task::block_in_place], so controllers doing
    /// blocking I/O do not starve other tasks.
    pub async fn run(mut self) {
        self.state.send_replace(LoopState::Running);
        self.watchdog()
            .register(LOOP_COMPONENT, self.stall_timeout);
        info!(interval_secs = self.interval.as_secs(), "control loop running");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.cancel.cancelled() => {}
            }
            if !self.is_live() {
                break;
            }
            let outcome = match Handle::current().runtime_flavor() {
                RuntimeFlavor::MultiThread => tokio::task::block_in_place(|| self.tick()),
                _ => self.tick(),
            };
            debug!(?outcome, "control pass finished");
            self.watchdog().beat(LOOP_COMPONENT);
        }

        self.watchdog().deregister(LOOP_COMPONENT);
        self.state.send_replace(LoopState::Stopped);
        info!(ticks = self.ticks, "control loop stopped");
    }

    fn watchdog(&self) -> std::sync::MutexGuard<'_, Watchdog> {
        self.watchdog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LoopHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Owner-side view of a started [`ControlLoop`].
pub struct LoopHandle {
    cancel: CancellationToken,
    state: watch::Receiver<LoopState>,
    watchdog: Arc<Mutex<Watchdog>>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    /// Ask the loop to stop at its next wake.  An in-flight pass finishes.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Components whose heartbeat deadline has passed, e.g. because a
    /// controller call never returned.
    pub fn stalled(&self) -> Vec<String> {
        self.watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stalled()
    }

    /// Wait until the loop has reached `state`.
    pub async fn wait_for(&mut self, state: LoopState) {
        // The sender lives inside the task; once it is dropped the state can
        // no longer change.
        let _ = self.state.wait_for(|s| *s == state).await;
    }

    /// Wait for the background task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`HostvisorError::TaskFailed`] if the task panicked or was
    /// aborted.
    pub async fn join(self) -> Result<(), HostvisorError> {
        self.task
            .await
            .map_err(|e| HostvisorError::TaskFailed(e.to_string()))
    }

    /// [`stop`][Self::stop] followed by [`join`][Self::join].
    pub async fn shutdown(self) -> Result<(), HostvisorError> {
        self.stop();
        self.join().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
