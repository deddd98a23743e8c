//! Requeue policy and per-object backoff.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use crate::config::ManagerOptions;

/// When to run an object again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// Steady state, after a run that found nothing to do.
    pub poll_interval: Duration,
    /// After a successful create or update, to confirm the change.
    pub post_mutation_wait: Duration,
    /// After a pre-delete hook asked to wait.
    pub veto_wait: Duration,
    pub backoff_base: Duration,
    pub backoff_ceiling: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            post_mutation_wait: Duration::from_secs(1),
            veto_wait: Duration::from_secs(5),
            backoff_base: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(30),
        }
    }
}

impl From<&ManagerOptions> for RequeuePolicy {
    fn from(opts: &ManagerOptions) -> Self {
        Self {
            poll_interval: opts.poll_interval,
            post_mutation_wait: opts.post_mutation_wait,
            veto_wait: opts.veto_wait,
            backoff_base: opts.backoff_base,
            backoff_ceiling: opts.backoff_ceiling,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    failures: u32,
    vetoes: u32,
}

/// Per-key exponential backoff with jitter.
///
/// The n-th consecutive failure waits `base * 2^(n-1)`, scaled by a random
/// factor in `0.5..1.5` and never longer than the ceiling. Deletion vetoes
/// are counted separately and never affect the failure delay.
pub struct Backoff<K> {
    base: Duration,
    ceiling: Duration,
    jitter: bool,
    counters: Mutex<HashMap<K, Counters>>,
}

impl<K: Eq + Hash + Clone> Backoff<K> {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            jitter: true,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic delays.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    fn with_counters<T>(&self, f: impl FnOnce(&mut HashMap<K, Counters>) -> T) -> T {
        match self.counters.lock() {
            Ok(mut counters) => f(&mut counters),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Record a failure for `key` and return how long to wait.
    pub fn next_delay(&self, key: &K) -> Duration {
        let failures = self.with_counters(|counters| {
            let entry = counters.entry(key.clone()).or_default();
            entry.failures = entry.failures.saturating_add(1);
            entry.failures
        });
        self.delay_for(failures)
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &K) -> u32 {
        self.with_counters(|counters| counters.get(key).map_or(0, |c| c.failures))
    }

    fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let raw = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.ceiling)
            .min(self.ceiling);

        if !self.jitter {
            return raw;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(raw.as_secs_f64() * factor).min(self.ceiling)
    }

    /// Forget failures after a successful run.
    pub fn reset(&self, key: &K) {
        self.with_counters(|counters| {
            if let Some(c) = counters.get_mut(key) {
                c.failures = 0;
            }
        });
    }

    /// Record a deletion veto and return the consecutive count.
    pub fn record_veto(&self, key: &K) -> u32 {
        self.with_counters(|counters| {
            let entry = counters.entry(key.clone()).or_default();
            entry.vetoes = entry.vetoes.saturating_add(1);
            entry.vetoes
        })
    }

    pub fn reset_vetoes(&self, key: &K) {
        self.with_counters(|counters| {
            if let Some(c) = counters.get_mut(key) {
                c.vetoes = 0;
            }
        });
    }

    /// Drop all state for a key that no longer exists.
    pub fn forget(&self, key: &K) {
        self.with_counters(|counters| {
            counters.remove(key);
        });
    }
}
