//! Reconnection delay strategy.

use crate::domain::config::ConfigError;
use crate::DEFAULT_RECONNECT_DELAY_MS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long to wait before each reconnection attempt.
///
/// Attempts are numbered from 1. The default is a constant 3000 ms delay
/// retried forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same delay before every attempt.
    Constant {
        delay_ms: u64,
        /// Give up after this many attempts. `None` retries forever.
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    /// `base_ms * multiplier^(attempt - 1)`, capped at `max_ms`.
    Exponential {
        base_ms: u64,
        multiplier: f64,
        max_ms: u64,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::constant(DEFAULT_RECONNECT_DELAY_MS)
    }
}

impl BackoffPolicy {
    /// Constant delay, no attempt limit.
    pub fn constant(delay_ms: u64) -> Self {
        Self::Constant {
            delay_ms,
            max_attempts: None,
        }
    }

    /// Delay before attempt number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant { delay_ms, .. } => Duration::from_millis(*delay_ms),
            Self::Exponential {
                base_ms,
                multiplier,
                max_ms,
                ..
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let scaled = (*base_ms as f64) * multiplier.powi(exponent);
                let capped = scaled.min(*max_ms as f64);
                Duration::from_millis(capped as u64)
            }
        }
    }

    /// Whether attempt number `attempt` may be made.
    pub fn allows(&self, attempt: u32) -> bool {
        let limit = match self {
            Self::Constant { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                *max_attempts
            }
        };
        limit.map_or(true, |max| attempt <= max)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Constant { delay_ms, .. } => {
                if *delay_ms == 0 {
                    return Err(ConfigError::InvalidBackoff(
                        "delay_ms must be greater than 0".into(),
                    ));
                }
            }
            Self::Exponential {
                base_ms,
                multiplier,
                max_ms,
                ..
            } => {
                if *base_ms == 0 {
                    return Err(ConfigError::InvalidBackoff(
                        "base_ms must be greater than 0".into(),
                    ));
                }
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err(ConfigError::InvalidBackoff(format!(
                        "multiplier must be at least 1.0, got {multiplier}"
                    )));
                }
                if max_ms < base_ms {
                    return Err(ConfigError::InvalidBackoff(format!(
                        "max_ms ({max_ms}) must not be below base_ms ({base_ms})"
                    )));
                }
            }
        }
        Ok(())
    }
}
