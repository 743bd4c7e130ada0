//! [`ConfigStore`] – process-wide section/key/value configuration.
//!
//! The store is seeded with defaults, overlaid with a TOML file whose tables
//! are sections, and finally with `HOSTVISOR_<SECTION>_<KEY>` environment
//! variables.  Clones share one underlying map, so a value changed through
//! [`ConfigStore::set`] is visible to every holder, including a running
//! control loop reading `main.running`.
//!
//! ```toml
//! [main]
//! controllers = "balloon, ksm"
//! system-controller-interval = 5
//! running = 1
//!
//! [ksm]
//! sysfs-dir = "/sys/kernel/mm/ksm"
//! ```
//!
//! # Environment variables
//!
//! | Variable | Key |
//! |---|---|
//! | `HOSTVISOR_MAIN_CONTROLLERS` | `main.controllers` |
//! | `HOSTVISOR_MAIN_SYSTEM_CONTROLLER_INTERVAL` | `main.system-controller-interval` |
//! | `HOSTVISOR_KSM_SYSFS_DIR` | `ksm.sysfs-dir` |
//!
//! Only keys that already exist (defaults or file) can be overridden.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use hostvisor_hal::ConfigSource;
use hostvisor_types::HostvisorError;

pub const MAIN: &str = "main";
pub const CONTROLLERS: &str = "controllers";
pub const INTERVAL: &str = "system-controller-interval";
pub const RUNNING: &str = "running";

const ENV_PREFIX: &str = "HOSTVISOR_";

type Sections = BTreeMap<String, BTreeMap<String, String>>;

fn defaults() -> Sections {
    let mut sections = Sections::new();
    let mut set = |section: &str, key: &str, value: &str| {
        sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    };
    set(MAIN, CONTROLLERS, "balloon");
    set(MAIN, INTERVAL, "10");
    set(MAIN, RUNNING, "1");
    set("host", "meminfo-path", "/proc/meminfo");
    set("ksm", "sysfs-dir", hostvisor_hal::ksm::DEFAULT_SYSFS_DIR);
    sections
}

/// Shared, externally mutable configuration.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    sections: Arc<RwLock<Sections>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self {
            sections: Arc::new(RwLock::new(defaults())),
        }
    }
}

impl ConfigStore {
    /// A store holding only the built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the tables of `raw`.
    pub fn from_toml_str(raw: &str) -> Result<Self, HostvisorError> {
        let table: toml::Table = toml::from_str(raw)
            .map_err(|e| HostvisorError::Config(format!("failed to parse config: {e}")))?;
        let store = Self::new();
        for (section, value) in table {
            let toml::Value::Table(entries) = value else {
                return Err(HostvisorError::Config(format!(
                    "top-level key '{section}' must be a [section] table"
                )));
            };
            for (key, value) in entries {
                store.set(&section, &key, scalar_to_string(&section, &key, value)?);
            }
        }
        Ok(store)
    }

    /// Load `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, HostvisorError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path).map_err(|e| {
            HostvisorError::Config(format!("failed to read config at {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `HOSTVISOR_*` overrides from the process environment.
    pub fn apply_env_overrides(&self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `HOSTVISOR_<SECTION>_<KEY>` pairs.  Unknown keys are ignored.
    pub fn apply_overrides<I>(&self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some((section, key)) = rest.split_once('_') else {
                continue;
            };
            let section = section.to_lowercase();
            let key = key.to_lowercase().replace('_', "-");
            if self.contains(&section, &key) {
                self.set(&section, &key, value);
            }
        }
    }

    pub fn contains(&self, section: &str, key: &str) -> bool {
        self.read()
            .get(section)
            .is_some_and(|entries| entries.contains_key(key))
    }

    /// Read `section.key` as a string.
    pub fn get(&self, section: &str, key: &str) -> Result<String, HostvisorError> {
        self.read()
            .get(section)
            .and_then(|entries| entries.get(key))
            .cloned()
            .ok_or_else(|| HostvisorError::Config(format!("missing key {section}.{key}")))
    }

    /// Read `section.key` as an integer.
    pub fn get_int(&self, section: &str, key: &str) -> Result<i64, HostvisorError> {
        let raw = self.get(section, key)?;
        raw.trim().parse::<i64>().map_err(|_| {
            HostvisorError::Config(format!("{section}.{key} is not an integer: '{raw}'"))
        })
    }

    pub fn set(&self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// `true` while `main.running` reads as `1`.  A missing or malformed
    /// value counts as not running.
    pub fn is_running(&self) -> bool {
        matches!(self.get_int(MAIN, RUNNING), Ok(1))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Sections> {
        self.sections.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigSource for ConfigStore {
    fn lookup(&self, section: &str, key: &str) -> Option<String> {
        self.get(section, key).ok()
    }
}

fn scalar_to_string(section: &str, key: &str, value: toml::Value) -> Result<String, HostvisorError> {
    match value {
        toml::Value::String(s) => Ok(s),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(if b { "1" } else { "0" }.to_string()),
        toml::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(s) => Ok(s),
                other => Err(HostvisorError::Config(format!(
                    "{section}.{key}: list entries must be strings, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|names| names.join(", ")),
        other => Err(HostvisorError::Config(format!(
            "{section}.{key}: unsupported value {other}"
        ))),
    }
}
