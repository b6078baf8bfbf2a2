//! Search session configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Top-level configuration for a search session.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Base URL of the Compiler-Explorer-style service
    pub base_url: String,
    /// Per-request timeout for one compile probe
    pub request_timeout: Duration,
    /// Cap on simultaneous outbound probes across the whole session
    pub max_concurrent_probes: usize,
    /// Retry/backoff policy for transient probe failures
    pub retry: RetryPolicy,
    /// Extra re-probe rounds the engine grants a version whose retry
    /// budget exhausted before giving up on the task
    pub transient_reprobes: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("CEMINVER_BASE_URL")
                .unwrap_or_else(|_| "https://godbolt.org".into()),
            request_timeout: Duration::from_secs(env_u64("CEMINVER_TIMEOUT_SECS", 45)),
            max_concurrent_probes: env_u64("CEMINVER_MAX_CONCURRENT", 4) as usize,
            retry: RetryPolicy::default(),
            transient_reprobes: 1,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
