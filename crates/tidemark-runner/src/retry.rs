use std::time::Duration;

use tidemark_common::{Error, Result};
use tidemark_db::Connection;
use tracing::{info, warn};

/// Bounded exponential backoff for waiting on a target to become reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor).min(self.max_backoff_ms))
    }
}

/// Open a connection and confirm it answers, retrying with backoff.
pub async fn connect_with_retry<F>(
    target: &str,
    policy: &RetryPolicy,
    mut open: F,
) -> Result<Box<dyn Connection>>
where
    F: FnMut() -> Result<Box<dyn Connection>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let outcome = open().and_then(|mut conn| {
            conn.ping()?;
            Ok(conn)
        });
        match outcome {
            Ok(conn) => {
                if attempt > 1 {
                    info!("target {target} ready after {attempt} attempts");
                }
                return Ok(conn);
            }
            Err(e) => {
                warn!("target {target} not ready (attempt {attempt}/{attempts}): {e}");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay(attempt)).await;
                }
            }
        }
    }

    Err(Error::Database(format!(
        "target {target} unreachable after {attempts} attempts: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}
