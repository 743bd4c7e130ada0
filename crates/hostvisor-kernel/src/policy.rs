//! [`PolicySet`] – ordered rule set gating every control pass.
//!
//! Each tick the control loop hands the fresh host and guest samples to a
//! [`PolicyGate`].  The default gate, [`RuleGate`], runs every [`Rule`] of the
//! configured [`PolicySet`] in insertion order.  A rule may write controls
//! into the samples (for example a balloon target) and reports one of three
//! opinions:
//!
//! | Rule result | Meaning |
//! |---|---|
//! | `Some(false)` | No action is needed this tick. Evaluation stops, verdict is [`Verdict::Skip`]. |
//! | `Some(true)` | Action is wanted. |
//! | `None` | No opinion (e.g. the stats the rule needs are missing). |
//!
//! Anything short of an explicit `Some(false)` lets the pass proceed.  When
//! no policy set was configured at all the gate answers
//! [`Verdict::Unconfigured`].
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use hostvisor_kernel::{FreeMemoryRule, PolicyGate, PolicySet, RuleGate};
//! use hostvisor_types::{HostSample, Verdict};
//!
//! let mut policy = PolicySet::new();
//! policy.add_rule(Box::new(FreeMemoryRule { min_free_ratio: 0.2 }));
//!
//! let stats: BTreeMap<String, f64> =
//!     [("mem_total".to_string(), 1000.0), ("mem_available".to_string(), 100.0)].into();
//! let mut host = HostSample::new(stats);
//!
//! let verdict = RuleGate.evaluate(Some(&policy), &mut host, &mut []);
//! assert_eq!(verdict, Verdict::Proceed);
//! assert_eq!(host.control("ksm_run"), Some(1.0));
//! ```

use hostvisor_types::{GuestSample, HostSample, Verdict};
use tracing::debug;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single policy rule evaluated against one tick's samples.
///
/// Implement this trait to add custom policy and register it on a
/// [`PolicySet`] via [`PolicySet::add_rule`].
pub trait Rule: Send + Sync {
    /// Human-readable name used in log output.
    fn name(&self) -> &str;

    /// Inspect the samples, optionally write controls into them, and return
    /// the rule's opinion (see the module docs for the meaning of each value).
    fn evaluate(&self, host: &mut HostSample, guests: &mut [GuestSample]) -> Option<bool>;
}

// ────────────────────────────────────────────────────────────────────────────
// PolicySet
// ────────────────────────────────────────────────────────────────────────────

/// Ordered collection of [`Rule`]s.  Owned by whoever builds the control loop
/// and never mutated by it.
#[derive(Default)]
pub struct PolicySet {
    rules: Vec<Box<dyn Rule>>,
}

impl PolicySet {
    /// Create an empty policy set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new [`Rule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule in order.  The first explicit `Some(false)` ends
    /// evaluation with [`Verdict::Skip`]; otherwise the verdict is
    /// [`Verdict::Proceed`].
    pub fn evaluate(&self, host: &mut HostSample, guests: &mut [GuestSample]) -> Verdict {
        for rule in &self.rules {
            if rule.evaluate(host, guests) == Some(false) {
                debug!(rule = rule.name(), "rule reported no action needed");
                return Verdict::Skip;
            }
        }
        Verdict::Proceed
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PolicyGate
// ────────────────────────────────────────────────────────────────────────────

/// Decides, once per tick, whether the controllers should run.
pub trait PolicyGate: Send + Sync {
    fn evaluate(
        &self,
        policy: Option<&PolicySet>,
        host: &mut HostSample,
        guests: &mut [GuestSample],
    ) -> Verdict;
}

/// Default [`PolicyGate`]: delegates to [`PolicySet::evaluate`] and reports
/// [`Verdict::Unconfigured`] when no policy set exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleGate;

impl PolicyGate for RuleGate {
    fn evaluate(
        &self,
        policy: Option<&PolicySet>,
        host: &mut HostSample,
        guests: &mut [GuestSample],
    ) -> Verdict {
        match policy {
            Some(set) => set.evaluate(host, guests),
            None => Verdict::Unconfigured,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Switches page merging on while available memory is below a fraction of
/// total memory, and back off once it recovers.
///
/// Below the threshold it sets the host control `ksm_run = 1` and asks for
/// action.  At or above it, it sets `ksm_run = 0` and has no opinion, so the
/// pass still reaches the controllers and KSM is turned off again.  Missing
/// or zero stats yield no opinion and no control.
pub struct FreeMemoryRule {
    pub min_free_ratio: f64,
}

impl Rule for FreeMemoryRule {
    fn name(&self) -> &str {
        "free_memory"
    }

    fn evaluate(&self, host: &mut HostSample, _guests: &mut [GuestSample]) -> Option<bool> {
        let total = host.stat("mem_total")?;
        let available = host.stat("mem_available")?;
        if total <= 0.0 {
            return None;
        }
        if available / total >= self.min_free_ratio {
            host.set_control("ksm_run", 0.0);
            return None;
        }
        host.set_control("ksm_run", 1.0);
        Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn host(total: f64, available: f64) -> HostSample {
        let stats: BTreeMap<String, f64> = [
            ("mem_total".to_string(), total),
            ("mem_available".to_string(), available),
        ]
        .into();
        HostSample::new(stats)
    }

    struct FixedRule {
        answer: Option<bool>,
        calls: Arc<AtomicUsize>,
    }

    impl Rule for FixedRule {
        fn name(&self) -> &str {
            "fixed"
        }

        fn evaluate(&self, _host: &mut HostSample, _guests: &mut [GuestSample]) -> Option<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn fixed(answer: Option<bool>) -> (Box<dyn Rule>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(FixedRule {
                answer,
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }

    #[test]
    fn absent_policy_is_unconfigured() {
        let mut h = host(100.0, 50.0);
        assert_eq!(RuleGate.evaluate(None, &mut h, &mut []), Verdict::Unconfigured);
    }

    #[test]
    fn empty_policy_proceeds() {
        let mut h = host(100.0, 50.0);
        let set = PolicySet::new();
        assert!(set.is_empty());
        assert_eq!(RuleGate.evaluate(Some(&set), &mut h, &mut []), Verdict::Proceed);
    }

    #[test]
    fn no_opinion_is_not_a_skip() {
        let (rule, _) = fixed(None);
        let mut set = PolicySet::new();
        set.add_rule(rule);
        let mut h = host(100.0, 50.0);
        assert_eq!(set.evaluate(&mut h, &mut []), Verdict::Proceed);
    }

    #[test]
    fn explicit_false_skips_and_short_circuits() {
        let (first, _) = fixed(Some(false));
        let (second, second_calls) = fixed(Some(true));
        let mut set = PolicySet::new();
        set.add_rule(first);
        set.add_rule(second);
        assert_eq!(set.len(), 2);

        let mut h = host(100.0, 50.0);
        assert_eq!(set.evaluate(&mut h, &mut []), Verdict::Skip);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn later_false_still_skips() {
        let (first, first_calls) = fixed(Some(true));
        let (second, _) = fixed(Some(false));
        let mut set = PolicySet::new();
        set.add_rule(first);
        set.add_rule(second);

        let mut h = host(100.0, 50.0);
        assert_eq!(set.evaluate(&mut h, &mut []), Verdict::Skip);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn free_memory_rule_turns_ksm_off_when_plenty_available() {
        let rule = FreeMemoryRule { min_free_ratio: 0.2 };
        let mut h = host(1000.0, 500.0);
        assert_eq!(rule.evaluate(&mut h, &mut []), None);
        assert_eq!(h.control("ksm_run"), Some(0.0));
    }

    #[test]
    fn recovered_memory_still_reaches_controllers() {
        let mut set = PolicySet::new();
        set.add_rule(Box::new(FreeMemoryRule { min_free_ratio: 0.2 }));

        let mut tight = host(1000.0, 100.0);
        assert_eq!(set.evaluate(&mut tight, &mut []), Verdict::Proceed);
        assert_eq!(tight.control("ksm_run"), Some(1.0));

        let mut relaxed = host(1000.0, 900.0);
        assert_eq!(set.evaluate(&mut relaxed, &mut []), Verdict::Proceed);
        assert_eq!(relaxed.control("ksm_run"), Some(0.0));
    }

    #[test]
    fn free_memory_rule_requests_ksm_under_pressure() {
        let rule = FreeMemoryRule { min_free_ratio: 0.2 };
        let mut h = host(1000.0, 150.0);
        assert_eq!(rule.evaluate(&mut h, &mut []), Some(true));
        assert_eq!(h.control("ksm_run"), Some(1.0));
    }

    #[test]
    fn free_memory_rule_has_no_opinion_without_stats() {
        let rule = FreeMemoryRule { min_free_ratio: 0.2 };
        let mut h = HostSample::new(BTreeMap::new());
        assert_eq!(rule.evaluate(&mut h, &mut []), None);

        let mut zero = host(0.0, 0.0);
        assert_eq!(rule.evaluate(&mut zero, &mut []), None);
    }

    #[test]
    fn rules_may_write_guest_controls() {
        struct ShrinkAll;
        impl Rule for ShrinkAll {
            fn name(&self) -> &str {
                "shrink_all"
            }
            fn evaluate(&self, _host: &mut HostSample, guests: &mut [GuestSample]) -> Option<bool> {
                for g in guests.iter_mut() {
                    let cur = g.stat("balloon_cur")?;
                    g.set_control("balloon_target", cur / 2.0);
                }
                Some(true)
            }
        }

        let mut set = PolicySet::new();
        set.add_rule(Box::new(ShrinkAll));
        let stats: BTreeMap<String, f64> = [("balloon_cur".to_string(), 2048.0)].into();
        let mut guests = vec![GuestSample::new(uuid::Uuid::new_v4(), "vm", stats)];
        let mut h = host(100.0, 10.0);

        assert_eq!(set.evaluate(&mut h, &mut guests), Verdict::Proceed);
        assert_eq!(guests[0].control("balloon_target"), Some(1024.0));
    }
}
