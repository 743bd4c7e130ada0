//! `hostvisord` – the hostvisor daemon.
//!
//! 1. Installs logging and optional OTLP export.
//! 2. Builds the configuration: defaults, then the TOML file, then
//!    `HOSTVISOR_*` environment variables, then command-line flags.
//! 3. Loads the configured controllers and starts the control loop against
//!    `/proc/meminfo`, an empty guest list and the dry-run hypervisor.
//! 4. Stops the loop on **Ctrl-C** / SIGTERM and waits for it to finish.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use hostvisor_hal::{DryRunHypervisor, MeminfoMonitor, PluginRegistry, StaticGuestManager};
use hostvisor_kernel::{FreeMemoryRule, PolicySet, RuleGate};
use hostvisor_runtime::config::{CONTROLLERS, INTERVAL, MAIN};
use hostvisor_runtime::{Collaborators, ConfigStore, ControlLoop, LoopHandle, init_tracing};
use hostvisor_types::HostvisorError;

const DEFAULT_CONFIG_PATH: &str = "/etc/hostvisor/hostvisor.toml";
const STALL_CHECK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "hostvisord", version, about = "Host resource policy daemon")]
struct Opts {
    /// TOML configuration file; a missing file means built-in defaults.
    #[arg(long, env = "HOSTVISOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Seconds between control passes (overrides main.system-controller-interval).
    #[arg(long)]
    interval: Option<u64>,

    /// Comma-separated controller names (overrides main.controllers).
    #[arg(long)]
    controllers: Option<String>,

    /// Fraction of host memory that must stay available before controllers act.
    #[arg(long, default_value_t = 0.2)]
    min_free_ratio: f64,

    /// Start without a policy set; controllers are loaded but never invoked.
    #[arg(long, default_value_t = false)]
    no_policy: bool,
}

fn main() -> ExitCode {
    let opts = Opts::parse();
    let _guard = init_tracing("hostvisord");

    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hostvisord: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(opts: Opts) -> Result<(), HostvisorError> {
    let config = ConfigStore::load_from(&opts.config)?;
    config.apply_env_overrides();
    apply_cli_overrides(&opts, &config);

    let meminfo_path = config.get("host", "meminfo-path")?;
    info!(config = %opts.config.display(), meminfo = %meminfo_path, "starting hostvisord");
    let collaborators = Collaborators {
        host_monitor: Arc::new(MeminfoMonitor::new(meminfo_path)),
        guest_manager: Arc::new(StaticGuestManager::default()),
        hypervisor: Arc::new(DryRunHypervisor::new()),
        gate: Box::new(RuleGate),
    };
    let control = ControlLoop::new(
        config,
        build_policy(&opts),
        collaborators,
        &PluginRegistry::with_builtins(),
    )?;

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let token = control.cancellation_token();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("shutdown signal received; stopping control loop");
        token.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the daemon with SIGKILL");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| HostvisorError::Io(format!("failed to start async runtime: {e}")))?;

    runtime.block_on(async move {
        let handle = control.start();
        supervise(handle, STALL_CHECK_PERIOD).await.map(|_| ())
    })
}

/// Wait for the loop to finish, warning about stalled components every
/// `period`.  Returns how many checks found a stall.
async fn supervise(handle: LoopHandle, period: Duration) -> Result<usize, HostvisorError> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stalled_checks = 0;
    while !handle.is_finished() {
        ticker.tick().await;
        let stalled = handle.stalled();
        if !stalled.is_empty() {
            stalled_checks += 1;
            warn!(components = ?stalled, "control loop missed its heartbeat deadline");
        }
    }
    handle.join().await?;
    Ok(stalled_checks)
}

/// Command-line flags take precedence over the file and the environment.
fn apply_cli_overrides(opts: &Opts, config: &ConfigStore) {
    if let Some(interval) = opts.interval {
        config.set(MAIN, INTERVAL, interval.to_string());
    }
    if let Some(controllers) = &opts.controllers {
        config.set(MAIN, CONTROLLERS, controllers.as_str());
    }
}

fn build_policy(opts: &Opts) -> Option<PolicySet> {
    if opts.no_policy {
        return None;
    }
    let mut policy = PolicySet::new();
    policy.add_rule(Box::new(FreeMemoryRule {
        min_free_ratio: opts.min_free_ratio,
    }));
    Some(policy)
}
