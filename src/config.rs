//! Tunables for the sync engine and paginated queries.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::{
    DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_REFRESH_LIMIT, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_SIZE,
    DEFAULT_RATE_LIMIT_BUFFER_MS, DEFAULT_RATE_LIMIT_MS, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_SAVED_DISPLAY_MS, MAX_RETRY_AFTER_SECS,
};

// ============================================================================
// Sync engine options
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Quiet period before a debounced save fires.
    pub debounce_ms: u64,
    /// Automatic retries after the first failed attempt.
    pub max_retries: u32,
    /// Fixed (not exponential) delay between retries.
    pub retry_delay_ms: u64,
    /// How long `Saved` is shown before falling back to `Idle`.
    pub saved_display_ms: u64,
    /// Wait used when a rate-limit response carries no `retry_after`.
    pub default_rate_limit_ms: u64,
    /// Added on top of the server's `retry_after` before trying again.
    pub rate_limit_buffer_ms: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            saved_display_ms: DEFAULT_SAVED_DISPLAY_MS,
            default_rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            rate_limit_buffer_ms: DEFAULT_RATE_LIMIT_BUFFER_MS,
        }
    }
}

impl SyncOptions {
    #[must_use]
    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.debounce_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub const fn saved_display(&self) -> Duration {
        Duration::from_millis(self.saved_display_ms)
    }

    #[must_use]
    pub const fn default_rate_limit(&self) -> Duration {
        Duration::from_millis(self.default_rate_limit_ms)
    }

    #[must_use]
    pub const fn rate_limit_buffer(&self) -> Duration {
        Duration::from_millis(self.rate_limit_buffer_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_delay_ms == 0 && self.max_retries > 0 {
            return Err(ConfigError::Invalid(
                "retry_delay_ms must be > 0 when retries are enabled".into(),
            ));
        }
        if self.default_rate_limit_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_rate_limit_ms must be > 0".into(),
            ));
        }
        let max_wait_ms = MAX_RETRY_AFTER_SECS * 1000;
        if self.default_rate_limit_ms > max_wait_ms || self.rate_limit_buffer_ms > max_wait_ms {
            return Err(ConfigError::Invalid(format!(
                "rate limit waits must not exceed {max_wait_ms} ms"
            )));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

// ============================================================================
// Pagination options
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationOptions {
    pub page_size: usize,
    /// Upper bound on the single request `refresh()` issues to re-fetch
    /// everything shown so far.
    pub max_refresh_limit: usize,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_refresh_limit: DEFAULT_MAX_REFRESH_LIMIT,
        }
    }
}

impl PaginationOptions {
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_max_refresh_limit(mut self, limit: usize) -> Self {
        self.max_refresh_limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be > 0".into()));
        }
        if self.max_refresh_limit < self.page_size {
            return Err(ConfigError::Invalid(format!(
                "max_refresh_limit ({}) must be at least page_size ({})",
                self.max_refresh_limit, self.page_size
            )));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
