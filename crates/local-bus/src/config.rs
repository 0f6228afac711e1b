//! Bus configuration and validation.
//!
//! # Example
//!
//! ```ignore
//! use local_bus::BusConfigBuilder;
//! use std::time::Duration;
//!
//! let config = BusConfigBuilder::new()
//!     .max_concurrency(8)
//!     .handler_timeout(Duration::from_secs(2))
//!     .build()?;
//! ```

use std::time::Duration;

use crate::error::ConfigError;

/// Default cap on independent handlers running at once per publish.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Default time started handlers get to finish after a publish is cancelled.
pub const DEFAULT_CANCELLATION_GRACE: Duration = Duration::from_millis(250);

/// Dispatch tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Maximum independent handlers running concurrently within one publish.
    /// `usize::MAX` effectively removes the cap.
    pub max_concurrency: usize,
    /// Default per-handler deadline (`None` = wait indefinitely).
    pub handler_timeout: Option<Duration>,
    /// After cancellation, how long to wait for started handlers before
    /// reporting them as timed out.
    pub cancellation_grace: Duration,
    /// Render each published envelope through the serialization chain and log
    /// it at `debug`.
    pub log_payloads: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            handler_timeout: None,
            cancellation_grace: DEFAULT_CANCELLATION_GRACE,
            log_payloads: false,
        }
    }
}

impl BusConfig {
    /// # Errors
    ///
    /// - `ZeroConcurrency` when `max_concurrency == 0`
    /// - `ZeroHandlerTimeout` when `handler_timeout == Some(0)`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.handler_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroHandlerTimeout);
        }
        Ok(())
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn with_log_payloads(mut self, enabled: bool) -> Self {
        self.log_payloads = enabled;
        self
    }
}

/// Builder for [`BusConfig`] with validation.
#[derive(Debug, Default)]
pub struct BusConfigBuilder {
    max_concurrency: Option<usize>,
    handler_timeout: Option<Duration>,
    cancellation_grace: Option<Duration>,
    log_payloads: Option<bool>,
}

impl BusConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn cancellation_grace(mut self, grace: Duration) -> Self {
        self.cancellation_grace = Some(grace);
        self
    }

    pub fn log_payloads(mut self, enabled: bool) -> Self {
        self.log_payloads = Some(enabled);
        self
    }

    pub fn build(self) -> Result<BusConfig, ConfigError> {
        let defaults = BusConfig::default();

        let config = BusConfig {
            max_concurrency: self.max_concurrency.unwrap_or(defaults.max_concurrency),
            handler_timeout: self.handler_timeout.or(defaults.handler_timeout),
            cancellation_grace: self.cancellation_grace.unwrap_or(defaults.cancellation_grace),
            log_payloads: self.log_payloads.unwrap_or(defaults.log_payloads),
        };

        config.validate()?;
        Ok(config)
    }
}
