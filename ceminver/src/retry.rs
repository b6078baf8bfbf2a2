//! Bounded retry with exponential backoff for transient probe failures.
//!
//! Only `TransientError` outcomes are retried; `Pass`/`Fail` verdicts return
//! immediately. When the budget is exhausted the terminal transient result is
//! handed back unchanged so the caller can treat the version as "unknown"
//! rather than failed.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{SearchError, SearchResult};
use crate::models::{CompilerVersion, ProbeOutcome, ProbeResult, Snippet};
use crate::probe::CompileProbe;

/// Retry/backoff parameters for one probe.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    /// Backoff before the first retry
    pub base_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
    /// Jitter fraction applied to each delay, e.g. 0.2 for ±20%
    pub jitter: f64,
    /// Cap for server-directed backoff hints (Retry-After), which may
    /// legitimately exceed `max_delay`
    pub server_hint_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter: 0.2,
            server_hint_cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the retry following attempt number `attempt` (1-based),
    /// exponential and capped, with jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        if self.jitter <= 0.0 {
            return capped;
        }
        let spread = capped.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((capped.as_secs_f64() + offset).max(0.0))
    }
}

/// Run one probe with bounded retries on transient failures.
///
/// Sleeps are raced against `cancel` so a cancelled session never waits out
/// a backoff. Returns `Err(SearchError::Cancelled)` on cancellation; every
/// other path yields the probe's own result.
pub async fn probe_with_retry(
    probe: &dyn CompileProbe,
    snippet: &Snippet,
    version: &CompilerVersion,
    user_arguments: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> SearchResult<ProbeResult> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let result = probe.probe(snippet, version, user_arguments).await?;
        match result.outcome {
            ProbeOutcome::Pass | ProbeOutcome::Fail => return Ok(result),
            ProbeOutcome::TransientError => {
                if attempt >= max_attempts {
                    warn!(
                        compiler_id = %version.compiler_id,
                        attempts = attempt,
                        "retry budget exhausted, verdict unknown"
                    );
                    return Ok(result);
                }
                // Honor a server-provided backoff hint when it is longer
                // than ours; such waits get their own, larger cap.
                let mut delay = policy.delay_for(attempt);
                if let Some(hint) = result.retry_after {
                    delay = delay.max(hint.min(policy.server_hint_cap));
                }
                warn!(
                    compiler_id = %version.compiler_id,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = result.diagnostic.as_deref().unwrap_or("transient failure"),
                    "transient probe failure, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SearchError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
