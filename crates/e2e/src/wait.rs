//! Bounded, condition-based waits
//!
//! Every suspension point in the harness goes through here or through a
//! driver call carrying an explicit timeout. There is no fixed-sleep helper.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::{HarnessError, HarnessResult};

/// No wait may exceed this, whatever the configuration says
pub const ABSOLUTE_MAX: Duration = Duration::from_secs(90);

/// Timeout budget by operation weight, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub short_ms: u64,
    pub medium_ms: u64,
    pub long_ms: u64,
    pub api_response_ms: u64,
    pub authentication_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            short_ms: 5_000,
            medium_ms: 10_000,
            long_ms: 30_000,
            api_response_ms: 10_000,
            authentication_ms: 15_000,
            poll_interval_ms: 100,
        }
    }
}

impl Timeouts {
    /// Tight budget for in-process tests
    pub fn fast() -> Self {
        Self {
            short_ms: 200,
            medium_ms: 300,
            long_ms: 500,
            api_response_ms: 300,
            authentication_ms: 300,
            poll_interval_ms: 10,
        }
    }

    pub fn short(&self) -> Duration {
        clamp(self.short_ms)
    }

    pub fn medium(&self) -> Duration {
        clamp(self.medium_ms)
    }

    pub fn long(&self) -> Duration {
        clamp(self.long_ms)
    }

    pub fn api_response(&self) -> Duration {
        clamp(self.api_response_ms)
    }

    pub fn authentication(&self) -> Duration {
        clamp(self.authentication_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn clamp(ms: u64) -> Duration {
    Duration::from_millis(ms).min(ABSOLUTE_MAX)
}

/// Poll `condition` until it returns `true` or `timeout` elapses.
///
/// The condition is always evaluated at least once. Errors from the
/// condition abort the wait immediately.
pub async fn wait_until<F, Fut>(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut condition: F,
) -> HarnessResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<bool>>,
{
    let timeout = timeout.min(ABSOLUTE_MAX);
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if condition().await? {
            trace!("{} satisfied after {} attempt(s)", what, attempts);
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(HarnessError::Timeout {
                what: what.to_string(),
                timeout_ms: timeout.as_millis() as u64,
                context: format!("{attempts} checks"),
            });
        }
        tokio::time::sleep(poll).await;
    }
}

/// Run `fut` with a deadline, mapping expiry to a harness timeout
pub async fn with_deadline<T, Fut>(what: &str, timeout: Duration, fut: Fut) -> HarnessResult<T>
where
    Fut: Future<Output = HarnessResult<T>>,
{
    let timeout = timeout.min(ABSOLUTE_MAX);
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(HarnessError::Timeout {
            what: what.to_string(),
            timeout_ms: timeout.as_millis() as u64,
            context: "deadline elapsed".to_string(),
        }),
    }
}
