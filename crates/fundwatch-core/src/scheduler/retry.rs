// # Retry State Machine
//
// Pure bookkeeping of a campaign poller's retry mode. The scheduler asks
// `begin_tick` whether a tick may call the service and reports the outcome
// with `record_success` / `record_failure`.
//
// | current mode | condition | next |
// |---|---|---|
// | None | success | None, attempt 0 |
// | None | 5xx / transport | Backoff, attempt 1 |
// | None, Backoff | 401 | Once, attempt 1 |
// | Backoff | attempt > max_retries | Shutdown |
// | Once | failure | Shutdown |
// | any | 404, 422, other 4xx, unclassified | Shutdown |
// | Backoff, Once | success | None, attempt 0 |

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::PollerConfig;
use crate::error::RetryClass;

/// Retry disposition of a campaign poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Polling normally
    #[default]
    None,
    /// Transient failures, polling with exponential backoff
    Backoff,
    /// Authentication failure, one more attempt allowed
    Once,
    /// Terminal, the poller stops
    Shutdown,
}

impl std::fmt::Display for RetryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RetryMode::None => "none",
            RetryMode::Backoff => "backoff",
            RetryMode::Once => "once",
            RetryMode::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Backoff limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry `attempt`: `min(initial × 2^attempt, max)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl From<&PollerConfig> for RetryPolicy {
    fn from(config: &PollerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PollerConfig::default())
    }
}

/// What a tick is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Call the service
    Poll,
    /// Still inside the backoff delay, do nothing
    Skip,
    /// Retries exhausted, stop the poller
    Shutdown,
}

/// Retry status of one campaign poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollerStatus {
    /// When the service was last called
    pub last_polling_timestamp: Option<Instant>,
    /// Consecutive attempts since entering the current retry mode
    pub retry_attempt: u32,
    pub retry_mode: RetryMode,
}

impl PollerStatus {
    /// Decide whether the tick at `now` may poll
    ///
    /// Outside `None` mode the tick is skipped until the backoff delay has
    /// elapsed since the last attempt; past the gate the attempt counter is
    /// incremented before polling.
    pub fn begin_tick(&mut self, now: Instant, policy: &RetryPolicy) -> TickDecision {
        match self.retry_mode {
            RetryMode::Shutdown => return TickDecision::Shutdown,
            RetryMode::None => {}
            RetryMode::Backoff | RetryMode::Once => {
                if let Some(last) = self.last_polling_timestamp
                    && now < last + policy.delay(self.retry_attempt)
                {
                    return TickDecision::Skip;
                }

                self.retry_attempt = self.retry_attempt.saturating_add(1);
                if self.retry_mode == RetryMode::Backoff && self.retry_attempt > policy.max_retries {
                    self.retry_mode = RetryMode::Shutdown;
                    return TickDecision::Shutdown;
                }
            }
        }

        self.last_polling_timestamp = Some(now);
        TickDecision::Poll
    }

    /// Record a successful tick; returns the previous mode if it changed
    pub fn record_success(&mut self) -> Option<RetryMode> {
        let previous = self.retry_mode;
        self.retry_mode = RetryMode::None;
        self.retry_attempt = 0;
        (previous != RetryMode::None).then_some(previous)
    }

    /// Record a failed tick; returns the previous mode if it changed
    pub fn record_failure(&mut self, class: RetryClass) -> Option<RetryMode> {
        let previous = self.retry_mode;

        let (mode, attempt) = match (previous, class) {
            (RetryMode::Shutdown, _) | (_, RetryClass::Shutdown) | (RetryMode::Once, _) => {
                (RetryMode::Shutdown, self.retry_attempt)
            }
            (RetryMode::None | RetryMode::Backoff, RetryClass::Once) => (RetryMode::Once, 1),
            (RetryMode::None, RetryClass::Backoff) => (RetryMode::Backoff, 1),
            (RetryMode::Backoff, RetryClass::Backoff) => (RetryMode::Backoff, self.retry_attempt),
        };

        self.retry_mode = mode;
        self.retry_attempt = attempt;
        (previous != mode).then_some(previous)
    }
}
