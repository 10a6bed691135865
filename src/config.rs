//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - constellation.toml (default configuration)
//! - constellation.local.toml (git-ignored local overrides)
//! - Environment variables (CONSTELLATION_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # constellation.toml
//! [runtime]
//! max_concurrency = 8
//!
//! [resilience]
//! retry = 2
//! backoff = "exponential"
//!
//! [suspension]
//! data_dir = "/var/lib/constellation/suspensions"
//! codec_validation = true
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! CONSTELLATION_RUNTIME__MAX_CONCURRENCY=16
//! CONSTELLATION_LOGGING__LEVEL=debug
//! ```

use crate::runtime::{BackoffStrategy, CircuitBreakerConfig, ModuleCallOptions};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub suspension: SuspensionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Concurrent module bodies per run (0 = one per CPU core)
    #[serde(default)]
    pub max_concurrency: usize,

    /// Default per-attempt module timeout in milliseconds (0 = none)
    #[serde(default)]
    pub module_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_concurrency: 0,
            module_timeout_ms: 0,
        }
    }
}

/// Default wrapper knobs applied to modules without their own options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Retries after the first failed attempt
    #[serde(default)]
    pub retry: u32,

    /// Base delay between attempts in milliseconds
    #[serde(default)]
    pub delay_ms: u64,

    /// Backoff strategy: "fixed", "linear", or "exponential"
    #[serde(default = "default_backoff")]
    pub backoff: String,

    /// Delay cap in milliseconds (0 = uncapped)
    #[serde(default)]
    pub max_delay_ms: u64,

    /// Circuit breaker defaults
    #[serde(default)]
    pub breaker: BreakerConfig,
}

fn default_backoff() -> String {
    "fixed".to_string()
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        ResilienceConfig {
            retry: 0,
            delay_ms: 0,
            backoff: default_backoff(),
            max_delay_ms: 0,
            breaker: BreakerConfig::default(),
        }
    }
}

/// Circuit breaker section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Attach a breaker to every module by default
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_duration_ms")]
    pub reset_duration_ms: u64,

    #[serde(default = "default_half_open_probes")]
    pub half_open_max_probes: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_duration_ms() -> u64 {
    30_000
}
fn default_half_open_probes() -> u32 {
    1
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            enabled: false,
            failure_threshold: default_failure_threshold(),
            reset_duration_ms: default_reset_duration_ms(),
            half_open_max_probes: default_half_open_probes(),
        }
    }
}

/// Suspension store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionConfig {
    /// Directory for the file store
    pub data_dir: PathBuf,

    /// Round-trip every snapshot through the codec before committing
    #[serde(default)]
    pub codec_validation: bool,
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        SuspensionConfig {
            data_dir: PathBuf::from("./suspensions"),
            codec_validation: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. constellation.toml (base configuration)
    /// 2. constellation.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (CONSTELLATION_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("constellation.toml"))
            .merge(Toml::file("constellation.local.toml"))
            .merge(Env::prefixed("CONSTELLATION_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CONSTELLATION_").split("__"))
            .extract()
    }

    /// The wrapper defaults implied by the resilience section
    pub fn default_call_options(&self) -> ModuleCallOptions {
        let nonzero_ms = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        ModuleCallOptions {
            timeout: nonzero_ms(self.runtime.module_timeout_ms),
            retry: self.resilience.retry,
            delay: nonzero_ms(self.resilience.delay_ms),
            backoff: BackoffStrategy::parse(&self.resilience.backoff)
                .unwrap_or(BackoffStrategy::Fixed),
            max_delay: nonzero_ms(self.resilience.max_delay_ms),
            fallback: None,
            priority: 0,
            circuit_breaker: self.resilience.breaker.enabled.then(|| {
                CircuitBreakerConfig {
                    failure_threshold: self.resilience.breaker.failure_threshold,
                    reset_duration: Duration::from_millis(
                        self.resilience.breaker.reset_duration_ms,
                    ),
                    half_open_max_probes: self.resilience.breaker.half_open_max_probes,
                }
            }),
            on_retry: None,
            on_fallback: None,
        }
    }

    /// Effective scheduler concurrency cap
    pub fn max_concurrency(&self) -> usize {
        if self.runtime.max_concurrency == 0 {
            num_cpus::get().max(1)
        } else {
            self.runtime.max_concurrency
        }
    }
}

/// Install the global tracing subscriber per the logging section. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing(logging: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if logging.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // A subscriber installed by the host wins
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.runtime.max_concurrency, 0);
        assert!(config.max_concurrency() >= 1);
        assert_eq!(config.resilience.backoff, "fixed");
        assert_eq!(config.suspension.data_dir, PathBuf::from("./suspensions"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[runtime]"));
        assert!(toml_str.contains("[resilience]"));
        assert!(toml_str.contains("[suspension]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn test_default_call_options_map_zero_to_none() {
        let config = Config::default();
        let options = config.default_call_options();
        assert_eq!(options.timeout, None);
        assert_eq!(options.retry, 0);
        assert!(options.circuit_breaker.is_none());
    }

    #[test]
    fn test_breaker_section_enables_breaker() {
        let mut config = Config::default();
        config.resilience.breaker.enabled = true;
        config.resilience.breaker.failure_threshold = 2;
        let options = config.default_call_options();
        let breaker = options.circuit_breaker.unwrap();
        assert_eq!(breaker.failure_threshold, 2);
    }
}
