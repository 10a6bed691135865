//! Execution wrappers around a module invocation.
//!
//! Composition, outside in: fallback(retry(timeout(body))). The timeout
//! bounds each attempt; retry re-runs failed attempts with a backoff delay
//! between them; fallback converts a final failure into a successful firing
//! carrying a substitute value. A panic inside the body is caught and
//! treated as that attempt's failure.

use super::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpenError};
use crate::module::{ModuleError, ModuleOutput, ModuleResult};
use crate::value::CValue;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Delay growth between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay every time
    #[default]
    Fixed,
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

impl BackoffStrategy {
    /// Wire name ("fixed" | "linear" | "exponential")
    pub fn name(&self) -> &'static str {
        match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
        }
    }

    /// Parse a wire name
    pub fn parse(name: &str) -> Option<BackoffStrategy> {
        match name {
            "fixed" => Some(BackoffStrategy::Fixed),
            "linear" => Some(BackoffStrategy::Linear),
            "exponential" => Some(BackoffStrategy::Exponential),
            _ => None,
        }
    }
}

/// Delay to sleep between attempts `attempt` and `attempt + 1` (1-based),
/// capped at `max_delay` when provided.
pub fn compute_delay(
    base: Duration,
    attempt: u32,
    strategy: BackoffStrategy,
    max_delay: Option<Duration>,
) -> Duration {
    let raw = match strategy {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base.saturating_mul(attempt),
        BackoffStrategy::Exponential => {
            let shift = attempt.saturating_sub(1).min(31);
            base.saturating_mul(1u32 << shift)
        }
    };
    match max_delay {
        Some(cap) => raw.min(cap),
        None => raw,
    }
}

/// Retry budget exhausted; every attempt's error is retained
#[derive(Debug, Clone)]
pub struct RetryExhausted {
    /// Attempts made, including the first
    pub total_attempts: u32,
    /// Per-attempt error messages, in attempt order
    pub errors: Vec<String>,
    /// True when the final attempt failed by timeout
    pub last_was_timeout: bool,
}

impl RetryExhausted {
    /// Multi-line report enumerating each attempt's error
    pub fn detailed_message(&self) -> String {
        let mut message = format!("all {} attempts failed", self.total_attempts);
        for (index, error) in self.errors.iter().enumerate() {
            message.push_str(&format!("\n  attempt {}: {}", index + 1, error));
        }
        message
    }
}

impl fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "retry exhausted after {} attempts", self.total_attempts)
    }
}

/// Terminal wrapper failure
#[derive(Error, Debug, Clone)]
pub enum WrapperError {
    /// Single attempt (no retries) exceeded its timeout
    #[error("module timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// All attempts failed
    #[error("{0}")]
    RetryExhausted(RetryExhausted),

    /// Rejected by the circuit breaker without running
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Module error with no retries configured
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// Body panicked with no retries configured
    #[error("module panicked: {0}")]
    Panicked(String),
}

impl WrapperError {
    /// True when the terminal failure was a timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            WrapperError::Timeout { .. } => true,
            WrapperError::RetryExhausted(info) => info.last_was_timeout,
            _ => false,
        }
    }
}

/// Hook invoked before each retry: (attempt just failed, its error)
pub type RetryHook = Arc<dyn Fn(u32, &str) + Send + Sync>;

/// Hook invoked when the fallback value substitutes a failure
pub type FallbackHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-module invocation options.
#[derive(Clone, Default)]
pub struct ModuleCallOptions {
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
    /// Retries after the first failed attempt
    pub retry: u32,
    /// Base delay between attempts
    pub delay: Option<Duration>,
    pub backoff: BackoffStrategy,
    /// Cap applied to the computed delay
    pub max_delay: Option<Duration>,
    /// Substitute value when the final outcome is failure
    pub fallback: Option<CValue>,
    /// Spawn-order hint within a batch; higher fires first. Not preemptive.
    pub priority: i32,
    /// Breaker configuration; `None` disables the breaker for this module
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub on_retry: Option<RetryHook>,
    pub on_fallback: Option<FallbackHook>,
}

impl fmt::Debug for ModuleCallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCallOptions")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("delay", &self.delay)
            .field("backoff", &self.backoff)
            .field("max_delay", &self.max_delay)
            .field("fallback", &self.fallback)
            .field("priority", &self.priority)
            .field("circuit_breaker", &self.circuit_breaker)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ModuleCallOptions {
    // Hooks are host callables; equality covers the serializable knobs
    fn eq(&self, other: &Self) -> bool {
        self.timeout == other.timeout
            && self.retry == other.retry
            && self.delay == other.delay
            && self.backoff == other.backoff
            && self.max_delay == other.max_delay
            && self.fallback == other.fallback
            && self.priority == other.priority
            && self.circuit_breaker == other.circuit_breaker
    }
}

/// Outcome of a wrapped invocation
pub enum CallOutcome {
    /// Body succeeded
    Success {
        output: ModuleOutput,
        latency: Duration,
        attempts: u32,
    },
    /// Body failed but the fallback value substitutes
    Fallback {
        value: CValue,
        error: String,
        latency: Duration,
        attempts: u32,
    },
    /// Terminal failure
    Failure {
        error: WrapperError,
        latency: Duration,
    },
}

async fn run_attempt(
    body: &(dyn Fn() -> BoxFuture<'static, ModuleResult<ModuleOutput>> + Send + Sync),
    timeout: Option<Duration>,
) -> Result<ModuleOutput, (String, bool)> {
    let attempt = std::panic::AssertUnwindSafe(body()).catch_unwind();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(inner) => inner,
            Err(_) => {
                return Err((format!("module timed out after {limit:?}"), true));
            }
        },
        None => attempt.await,
    };
    match outcome {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(error)) => Err((error.to_string(), false)),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic with non-string payload".to_string());
            Err((format!("module panicked: {message}"), false))
        }
    }
}

/// Invoke `body` under the configured wrappers. The optional `breaker`
/// guards the whole invocation as one call.
pub async fn call_with_options(
    body: &(dyn Fn() -> BoxFuture<'static, ModuleResult<ModuleOutput>> + Send + Sync),
    options: &ModuleCallOptions,
    breaker: Option<&CircuitBreaker>,
) -> CallOutcome {
    let started = Instant::now();

    if let Some(breaker) = breaker {
        if let Err(open) = breaker.try_acquire() {
            return CallOutcome::Failure {
                error: WrapperError::CircuitOpen(open),
                latency: started.elapsed(),
            };
        }
    }

    let total_attempts = options.retry + 1;
    let mut errors: Vec<String> = Vec::new();
    let mut last_was_timeout = false;

    for attempt in 1..=total_attempts {
        match run_attempt(body, options.timeout).await {
            Ok(output) => {
                if let Some(breaker) = breaker {
                    breaker.record_success();
                }
                return CallOutcome::Success {
                    output,
                    latency: started.elapsed(),
                    attempts: attempt,
                };
            }
            Err((message, timed_out)) => {
                last_was_timeout = timed_out;
                errors.push(message.clone());
                if attempt < total_attempts {
                    if let Some(hook) = &options.on_retry {
                        hook(attempt, &message);
                    }
                    let base = options.delay.unwrap_or(Duration::ZERO);
                    let pause = compute_delay(base, attempt, options.backoff, options.max_delay);
                    if !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }
    }

    if let Some(breaker) = breaker {
        breaker.record_failure();
    }

    let error = if total_attempts == 1 && last_was_timeout {
        WrapperError::Timeout {
            timeout: options.timeout.unwrap_or(Duration::ZERO),
        }
    } else if total_attempts == 1 {
        WrapperError::Module(ModuleError::Failed(
            errors.first().cloned().unwrap_or_default(),
        ))
    } else {
        WrapperError::RetryExhausted(RetryExhausted {
            total_attempts,
            errors: errors.clone(),
            last_was_timeout,
        })
    };

    if let Some(fallback) = &options.fallback {
        let message = error.to_string();
        if let Some(hook) = &options.on_fallback {
            hook(&message);
        }
        return CallOutcome::Fallback {
            value: fallback.clone(),
            error: message,
            latency: started.elapsed(),
            attempts: total_attempts,
        };
    }

    CallOutcome::Failure {
        error,
        latency: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CValue;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn always_fail_body(
        counter: Arc<AtomicU32>,
    ) -> impl Fn() -> BoxFuture<'static, ModuleResult<ModuleOutput>> + Send + Sync {
        move || -> BoxFuture<'static, ModuleResult<ModuleOutput>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(ModuleError::Failed("boom".to_string())) })
        }
    }

    #[test]
    fn test_compute_delay_laws() {
        let base = Duration::from_millis(100);

        assert_eq!(
            compute_delay(base, 3, BackoffStrategy::Fixed, None),
            Duration::from_millis(100)
        );
        assert_eq!(
            compute_delay(base, 3, BackoffStrategy::Linear, None),
            Duration::from_millis(300)
        );
        assert_eq!(
            compute_delay(base, 1, BackoffStrategy::Exponential, None),
            Duration::from_millis(100)
        );
        assert_eq!(
            compute_delay(base, 4, BackoffStrategy::Exponential, None),
            Duration::from_millis(800)
        );
        assert_eq!(
            compute_delay(
                base,
                4,
                BackoffStrategy::Exponential,
                Some(Duration::from_millis(250))
            ),
            Duration::from_millis(250)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_count_and_exhaustion() {
        let counter = Arc::new(AtomicU32::new(0));
        let body = always_fail_body(Arc::clone(&counter));
        let options = ModuleCallOptions {
            retry: 2,
            ..ModuleCallOptions::default()
        };

        let outcome = call_with_options(&body, &options, None).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        match outcome {
            CallOutcome::Failure {
                error: WrapperError::RetryExhausted(info),
                ..
            } => {
                assert_eq!(info.total_attempts, 3);
                assert_eq!(info.errors.len(), 3);
                let detailed = info.detailed_message();
                assert!(detailed.contains("attempt 1: boom"));
                assert!(detailed.contains("attempt 3: boom"));
            }
            _ => panic!("expected retry exhaustion"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_substitutes_failure() {
        let counter = Arc::new(AtomicU32::new(0));
        let body = always_fail_body(Arc::clone(&counter));
        let options = ModuleCallOptions {
            retry: 2,
            fallback: Some(CValue::str("dflt")),
            ..ModuleCallOptions::default()
        };

        let outcome = call_with_options(&body, &options, None).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        match outcome {
            CallOutcome::Fallback {
                value, attempts, ..
            } => {
                assert_eq!(value, CValue::str("dflt"));
                assert_eq!(attempts, 3);
            }
            _ => panic!("expected fallback outcome"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_retries() {
        let body = || -> BoxFuture<'static, ModuleResult<ModuleOutput>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ModuleOutput::default())
            })
        };
        let options = ModuleCallOptions {
            timeout: Some(Duration::from_millis(50)),
            ..ModuleCallOptions::default()
        };

        let outcome = call_with_options(&body, &options, None).await;
        match outcome {
            CallOutcome::Failure { error, .. } => {
                assert!(error.is_timeout());
                assert!(matches!(error, WrapperError::Timeout { .. }));
            }
            _ => panic!("expected timeout failure"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_hook_fires_between_attempts() {
        let hook_calls = Arc::new(AtomicU32::new(0));
        let hook_calls_inner = Arc::clone(&hook_calls);
        let counter = Arc::new(AtomicU32::new(0));
        let body = always_fail_body(counter);
        let options = ModuleCallOptions {
            retry: 2,
            on_retry: Some(Arc::new(move |_, _| {
                hook_calls_inner.fetch_add(1, Ordering::SeqCst);
            })),
            ..ModuleCallOptions::default()
        };

        let _ = call_with_options(&body, &options, None).await;
        // Two retries means the hook fires twice (never after the last)
        assert_eq!(hook_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let body = || -> BoxFuture<'static, ModuleResult<ModuleOutput>> {
            Box::pin(async { panic!("kaboom") })
        };
        let outcome = call_with_options(&body, &ModuleCallOptions::default(), None).await;
        match outcome {
            CallOutcome::Failure { error, .. } => {
                assert!(error.to_string().contains("kaboom"));
            }
            _ => panic!("expected panic capture"),
        }
    }

    #[tokio::test]
    async fn test_breaker_rejection_short_circuits() {
        let breaker = CircuitBreaker::new(
            "m",
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_duration: Duration::from_secs(60),
                half_open_max_probes: 1,
            },
        );
        breaker.record_failure();

        let counter = Arc::new(AtomicU32::new(0));
        let body = always_fail_body(Arc::clone(&counter));
        let outcome =
            call_with_options(&body, &ModuleCallOptions::default(), Some(&breaker)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(matches!(
            outcome,
            CallOutcome::Failure {
                error: WrapperError::CircuitOpen(_),
                ..
            }
        ));
    }
}
