//! Sample sources: [`HostMonitor`] and [`GuestManager`].
//!
//! Both are interrogated once per tick.  A host monitor may answer `None`
//! when it has no fresh data yet; the loop then skips the tick without
//! complaint.  A guest manager always answers, possibly with an empty list.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use hostvisor_types::{GuestSample, HostSample};
use tracing::debug;

/// Produces one [`HostSample`] per call, or `None` when no data is ready.
pub trait HostMonitor: Send + Sync {
    fn interrogate(&self) -> Option<HostSample>;
}

/// Produces the current guest snapshots, in a stable order.
pub trait GuestManager: Send + Sync {
    fn interrogate(&self) -> Vec<GuestSample>;
}

// ────────────────────────────────────────────────────────────────────────────
// MeminfoMonitor
// ────────────────────────────────────────────────────────────────────────────

/// `/proc/meminfo` field → sample stat key.  Values stay in KiB.
const MEMINFO_FIELDS: [(&str, &str); 6] = [
    ("MemTotal", "mem_total"),
    ("MemFree", "mem_free"),
    ("MemAvailable", "mem_available"),
    ("Cached", "cached"),
    ("SwapTotal", "swap_total"),
    ("SwapFree", "swap_free"),
];

/// [`HostMonitor`] backed by a `/proc/meminfo`-format file.
///
/// An unreadable file, or one without a `MemTotal` line, yields `None`.
pub struct MeminfoMonitor {
    path: PathBuf,
}

impl MeminfoMonitor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for MeminfoMonitor {
    fn default() -> Self {
        Self::new("/proc/meminfo")
    }
}

impl HostMonitor for MeminfoMonitor {
    fn interrogate(&self) -> Option<HostSample> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "meminfo not readable");
                return None;
            }
        };
        let stats = parse_meminfo(&raw);
        if !stats.contains_key("mem_total") {
            return None;
        }
        Some(HostSample::new(stats))
    }
}

/// Parse `Key:   value kB` lines, keeping only the fields in
/// [`MEMINFO_FIELDS`].
pub(crate) fn parse_meminfo(raw: &str) -> BTreeMap<String, f64> {
    let mut stats = BTreeMap::new();
    for line in raw.lines() {
        let Some((field, rest)) = line.split_once(':') else {
            continue;
        };
        let Some((_, key)) = MEMINFO_FIELDS.iter().find(|(f, _)| *f == field.trim()) else {
            continue;
        };
        if let Some(value) = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
        {
            stats.insert(key.to_string(), value);
        }
    }
    stats
}

// ────────────────────────────────────────────────────────────────────────────
// StaticGuestManager
// ────────────────────────────────────────────────────────────────────────────

/// [`GuestManager`] serving a fixed guest list.
///
/// Used on hosts without a hypervisor connection (empty list) and by tests.
/// Each interrogation returns copies stamped with the current time.
#[derive(Default)]
pub struct StaticGuestManager {
    guests: Mutex<Vec<GuestSample>>,
}

impl StaticGuestManager {
    pub fn new(guests: Vec<GuestSample>) -> Self {
        Self {
            guests: Mutex::new(guests),
        }
    }

    /// Swap in a new guest list; visible from the next interrogation on.
    pub fn replace(&self, guests: Vec<GuestSample>) {
        *self.guests.lock().unwrap_or_else(PoisonError::into_inner) = guests;
    }
}

impl GuestManager for StaticGuestManager {
    fn interrogate(&self) -> Vec<GuestSample> {
        let guests = self.guests.lock().unwrap_or_else(PoisonError::into_inner);
        guests
            .iter()
            .cloned()
            .map(|mut g| {
                g.timestamp = Utc::now();
                g
            })
            .collect()
    }
}
