//! Retry policy and backoff math.
//!
//! Only the sync building blocks live here. The async retry loop that sleeps
//! between attempts belongs to the runtime crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default total attempts for the finalize step.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default delay cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 8_000;

/// Bounded exponential backoff.
///
/// `max_attempts` counts every attempt including the first, so the default
/// policy waits `500ms` then `1000ms` before giving up after three tries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff in ms.
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in ms.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the zero-based `attempt` fails.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
        ))
    }

    /// Whether another attempt is allowed after `attempts_made` tries.
    #[must_use]
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }
}

/// Exponential backoff: `min(max_delay, base_delay * 2^attempt)`.
///
/// `attempt` is zero-based. Saturates instead of overflowing.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    exponential.min(max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
