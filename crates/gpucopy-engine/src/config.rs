//! Engine configuration.
//!
//! Defaults match the hardware contract; environment variables can tighten
//! them for debugging.
//!
//! # Environment Variables
//!
//! - `GPUCOPY_TIMEOUT_MS` - Completion wait timeout in milliseconds
//! - `GPUCOPY_MAX_LINEAR_MB` - Cap on a single device buffer, in megabytes
//! - `GPUCOPY_DISABLE` - Report every copy as not accelerable ("1" or "true")

use std::env;
use std::time::Duration;

use crate::device::MAX_LINEAR_SIZE;

/// Default wait timeout before a dispatch is treated as a device hang.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Runtime settings of a [`CopyEngine`](crate::CopyEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Timeout of the final completion wait of each request.
    pub timeout: Duration,
    /// Optional cap below the device's linear size limit.
    pub max_linear_size: Option<usize>,
    /// When `false`, `can_accelerate` always answers no.
    pub enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_linear_size: None,
            enabled: true,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup` (an environment-like key/value source).
    ///
    /// Unparsable or out-of-range values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = lookup("GPUCOPY_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&ms| ms > 0)
        {
            self.timeout = Duration::from_millis(ms);
        }
        if let Some(mb) = lookup("GPUCOPY_MAX_LINEAR_MB")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&mb| mb > 0)
        {
            self.max_linear_size = Some((mb * 1024 * 1024).min(MAX_LINEAR_SIZE));
        }
        if let Some(v) = lookup("GPUCOPY_DISABLE") {
            if v == "1" || v.eq_ignore_ascii_case("true") {
                self.enabled = false;
            }
        }
        self
    }

    /// Sets the wait timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Caps the size of a single device buffer.
    pub fn max_linear_size(mut self, bytes: usize) -> Self {
        self.max_linear_size = Some(bytes);
        self
    }

    /// Enables or disables acceleration.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Effective buffer limit given the device's own limit.
    pub fn effective_linear_size(&self, device_limit: usize) -> usize {
        match self.max_linear_size {
            Some(cap) => cap.min(device_limit),
            None => device_limit,
        }
    }
}
