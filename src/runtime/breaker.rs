//! Per-module circuit breakers.
//!
//! A breaker guards one module name across every run in the process. It
//! counts consecutive failures while `Closed`; at the threshold it opens
//! and rejects calls outright for `reset_duration`; it then admits a
//! bounded number of half-open probes, closing again only when all of them
//! succeed.
//!
//! The registry is process-wide, keyed by module name, initialized lazily,
//! and tolerant of insertion races (first insert wins, the rest share it).

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Call rejected because the breaker is open
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit breaker open for module '{0}'")]
pub struct CircuitOpenError(pub String);

/// Breaker tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long an open breaker rejects before probing
    pub reset_duration: Duration,
    /// Concurrent probes admitted while half-open
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_duration: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen { in_flight: u32 },
}

/// Snapshot of one breaker for `all_stats`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerStats {
    pub state: String,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// State machine limiting calls to one module after repeated failures.
pub struct CircuitBreaker {
    module_name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
}

impl CircuitBreaker {
    /// Closed breaker for `module_name`
    pub fn new(module_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            module_name: module_name.into(),
            config,
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    /// Admission check. Open breakers reject immediately; half-open ones
    /// admit up to the probe budget.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed { .. } => Ok(()),
            BreakerState::Open { since } => {
                if since.elapsed() >= self.config.reset_duration {
                    *state = BreakerState::HalfOpen { in_flight: 1 };
                    Ok(())
                } else {
                    Err(CircuitOpenError(self.module_name.clone()))
                }
            }
            BreakerState::HalfOpen { in_flight } => {
                if in_flight < self.config.half_open_max_probes.max(1) {
                    *state = BreakerState::HalfOpen {
                        in_flight: in_flight + 1,
                    };
                    Ok(())
                } else {
                    Err(CircuitOpenError(self.module_name.clone()))
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed { .. } => {
                *state = BreakerState::Closed {
                    consecutive_failures: 0,
                };
            }
            BreakerState::HalfOpen { in_flight } => {
                // Every admitted probe succeeded once the last one lands;
                // a failure would already have reopened the breaker.
                if in_flight <= 1 {
                    *state = BreakerState::Closed {
                        consecutive_failures: 0,
                    };
                } else {
                    *state = BreakerState::HalfOpen {
                        in_flight: in_flight - 1,
                    };
                }
            }
            BreakerState::Open { .. } => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    *state = BreakerState::Open {
                        since: Instant::now(),
                    };
                } else {
                    *state = BreakerState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            BreakerState::HalfOpen { .. } => {
                *state = BreakerState::Open {
                    since: Instant::now(),
                };
            }
            BreakerState::Open { .. } => {}
        }
    }

    /// Current state name: "Closed", "Open", or "HalfOpen"
    pub fn state_name(&self) -> &'static str {
        match *self.state.lock() {
            BreakerState::Closed { .. } => "Closed",
            BreakerState::Open { .. } => "Open",
            BreakerState::HalfOpen { .. } => "HalfOpen",
        }
    }

    /// Snapshot for reporting
    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            state: self.state_name().to_string(),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide registry of breakers keyed by module name.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        BreakerRegistry::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static BreakerRegistry {
        static REGISTRY: OnceLock<BreakerRegistry> = OnceLock::new();
        REGISTRY.get_or_init(BreakerRegistry::new)
    }

    /// The breaker for `module_name`, created with `config` on first use
    pub fn for_module(
        &self,
        module_name: &str,
        config: &CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(module_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(module_name, config.clone())))
            .clone()
    }

    /// Snapshot of every registered breaker
    pub fn all_stats(&self) -> BTreeMap<String, BreakerStats> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, reset_ms: u64, probes: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_duration: Duration::from_millis(reset_ms),
            half_open_max_probes: probes,
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new("m", config(3, 1000, 1));
        for _ in 0..2 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
        }
        assert_eq!(breaker.state_name(), "Closed");

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state_name(), "Open");
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let breaker = CircuitBreaker::new("m", config(2, 1000, 1));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state_name(), "Closed");
    }

    #[test]
    fn test_half_open_probe_success_closes() {
        let breaker = CircuitBreaker::new("m", config(1, 0, 1));
        breaker.record_failure();
        assert_eq!(breaker.state_name(), "Open");

        // reset_duration of zero: the next acquire is a probe
        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state_name(), "HalfOpen");

        breaker.record_success();
        assert_eq!(breaker.state_name(), "Closed");
    }

    #[test]
    fn test_half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("m", config(1, 0, 1));
        breaker.record_failure();
        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state_name(), "Open");
    }

    #[test]
    fn test_half_open_probe_budget() {
        let breaker = CircuitBreaker::new("m", config(1, 0, 2));
        breaker.record_failure();

        breaker.try_acquire().unwrap();
        breaker.try_acquire().unwrap();
        // Budget of two exhausted
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_registry_stats() {
        let registry = BreakerRegistry::new();
        let breaker = registry.for_module("alpha", &CircuitBreakerConfig::default());
        breaker.record_success();
        breaker.record_failure();

        let stats = registry.all_stats();
        assert_eq!(stats["alpha"].total_successes, 1);
        assert_eq!(stats["alpha"].total_failures, 1);
        assert_eq!(stats["alpha"].state, "Closed");
    }
}
