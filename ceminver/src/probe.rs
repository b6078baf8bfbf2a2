//! Compile probe client for the remote Compiler-Explorer-style service.
//!
//! All transport detail lives here: one [`CompileProbe::probe`] call issues
//! one outbound compile request and classifies the response into
//! `Pass`/`Fail`/`TransientError`. Network failures, timeouts, 408/429/5xx
//! statuses and malformed bodies are never reported as compile failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::{SearchError, SearchResult};
use crate::models::{CompilerVersion, ProbeResult, Snippet};

/// One compile attempt against the remote service.
///
/// Implementations return `Err` only for caller mistakes or cancellation;
/// service-level trouble is data (`ProbeOutcome::TransientError`).
#[async_trait]
pub trait CompileProbe: Send + Sync {
    async fn probe(
        &self,
        snippet: &Snippet,
        version: &CompilerVersion,
        user_arguments: &str,
    ) -> SearchResult<ProbeResult>;
}

/// HTTP client for the Compiler Explorer compile API.
pub struct CeClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

/// Compile endpoint response body (the fields the verdict needs).
#[derive(Debug, Deserialize)]
struct CompileResponse {
    #[serde(default = "missing_code")]
    code: i64,
    #[serde(default)]
    stderr: Vec<OutputLine>,
}

fn missing_code() -> i64 {
    -1
}

#[derive(Debug, Deserialize)]
struct OutputLine {
    #[serde(default)]
    text: String,
}

fn stderr_text(resp: &CompileResponse) -> Option<String> {
    let joined = resp
        .stderr
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl CeClient {
    pub fn new(config: &SearchConfig) -> SearchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SearchError::transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
        })
    }

    /// Map a service-level failure into a probe result: retryable errors
    /// become `TransientError` data with the error's own display text as
    /// the diagnostic, anything else propagates.
    fn classify_error(
        version: &CompilerVersion,
        err: SearchError,
        elapsed: Duration,
    ) -> SearchResult<ProbeResult> {
        if err.is_retryable() {
            Ok(ProbeResult::transient(
                version.clone(),
                err.to_string(),
                elapsed,
            ))
        } else {
            Err(err)
        }
    }

    /// Compile request body. Asm output is skipped; only the exit code and
    /// stderr matter for a verdict.
    fn compile_payload(snippet: &Snippet, user_arguments: &str) -> serde_json::Value {
        json!({
            "source": snippet.source,
            "options": {
                "userArguments": user_arguments,
                "compilerOptions": {
                    "skipAsm": true,
                    "executorRequest": false,
                    "overrides": [],
                },
                "filters": {
                    "binary": false,
                    "execute": false,
                    "labels": true,
                    "directives": true,
                    "commentOnly": true,
                    "trim": true,
                },
                "tools": [],
                "libraries": [],
            },
            "lang": snippet.language,
            "allowStoreCodeDebug": true,
        })
    }
}

#[async_trait]
impl CompileProbe for CeClient {
    async fn probe(
        &self,
        snippet: &Snippet,
        version: &CompilerVersion,
        user_arguments: &str,
    ) -> SearchResult<ProbeResult> {
        if snippet.source.trim().is_empty() {
            return Err(SearchError::EmptySnippet);
        }

        let url = format!("{}/api/compiler/{}/compile", self.base_url, version.compiler_id);
        let start = Instant::now();
        debug!(
            compiler_id = %version.compiler_id,
            args = user_arguments,
            source_len = snippet.source.len(),
            "issuing compile probe"
        );

        let response = match self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&Self::compile_payload(snippet, user_arguments))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let err = SearchError::from_reqwest(&e, self.request_timeout.as_secs());
                warn!(compiler_id = %version.compiler_id, error = %err, "probe transport failure");
                return Self::classify_error(version, err, start.elapsed());
            }
        };

        let status = response.status();
        if is_retryable_status(status.as_u16()) {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok())
                .map(Duration::from_secs_f64);
            warn!(
                compiler_id = %version.compiler_id,
                status = status.as_u16(),
                retry_after_secs = retry_after.map(|d| d.as_secs_f64()),
                "retryable HTTP status from compile service"
            );
            let err = if status.as_u16() == 429 {
                SearchError::RateLimited {
                    retry_after_secs: retry_after.map(|d| d.as_secs_f64()),
                }
            } else {
                SearchError::transport(format!("HTTP {status} from compile service"))
            };
            let mut result = Self::classify_error(version, err, start.elapsed())?;
            if let Some(delay) = retry_after {
                result = result.with_retry_after(delay);
            }
            return Ok(result);
        }
        if !status.is_success() {
            // The compile endpoint reports verdicts in the body, not via
            // HTTP status; anything else is the service misbehaving.
            return Self::classify_error(
                version,
                SearchError::transport(format!("unexpected HTTP status {status}")),
                start.elapsed(),
            );
        }

        let parsed: CompileResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                return Self::classify_error(
                    version,
                    SearchError::malformed(e.to_string()),
                    start.elapsed(),
                );
            }
        };

        let elapsed = start.elapsed();
        let diagnostic = stderr_text(&parsed);
        debug!(
            compiler_id = %version.compiler_id,
            code = parsed.code,
            elapsed_ms = elapsed.as_millis() as u64,
            "probe verdict received"
        );
        if parsed.code == 0 {
            Ok(ProbeResult::pass(version.clone(), diagnostic, elapsed))
        } else {
            Ok(ProbeResult::fail(version.clone(), diagnostic, elapsed))
        }
    }
}

fn is_retryable_status(code: u16) -> bool {
    matches!(code, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Probe decorator that caps simultaneous outbound requests.
///
/// Every search task of a session shares one semaphore, so total network
/// concurrency stays bounded no matter how many targets are searched.
pub struct ThrottledProbe {
    inner: Arc<dyn CompileProbe>,
    permits: Arc<Semaphore>,
}

impl ThrottledProbe {
    pub fn new(inner: Arc<dyn CompileProbe>, permits: Arc<Semaphore>) -> Self {
        Self { inner, permits }
    }
}

#[async_trait]
impl CompileProbe for ThrottledProbe {
    async fn probe(
        &self,
        snippet: &Snippet,
        version: &CompilerVersion,
        user_arguments: &str,
    ) -> SearchResult<ProbeResult> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SearchError::Cancelled)?;
        self.inner.probe(snippet, version, user_arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProbeOutcome;

    #[test]
    fn test_error_classification_into_probe_results() {
        let version = CompilerVersion::new("g122", "gcc 12.2", Some("12.2".into()));

        let result = CeClient::classify_error(
            &version,
            SearchError::RateLimited {
                retry_after_secs: Some(1.5),
            },
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(result.outcome, ProbeOutcome::TransientError);
        assert!(result.diagnostic.unwrap().contains("rate limited"));

        let result =
            CeClient::classify_error(&version, SearchError::malformed("truncated"), Duration::ZERO)
                .unwrap();
        assert_eq!(result.outcome, ProbeOutcome::TransientError);
        assert!(result.diagnostic.unwrap().contains("malformed response"));

        // Non-retryable errors propagate instead of becoming data.
        assert!(matches!(
            CeClient::classify_error(&version, SearchError::EmptySnippet, Duration::ZERO),
            Err(SearchError::EmptySnippet)
        ));
    }

    #[test]
    fn test_compile_payload_shape() {
        let snippet = Snippet::new("int main() {}").unwrap();
        let payload = CeClient::compile_payload(&snippet, "-std=c++17 -fsyntax-only");
        assert_eq!(payload["lang"], "c++");
        assert_eq!(
            payload["options"]["userArguments"],
            "-std=c++17 -fsyntax-only"
        );
        assert_eq!(payload["options"]["compilerOptions"]["skipAsm"], true);
        assert_eq!(payload["options"]["filters"]["execute"], false);
    }

    #[test]
    fn test_compile_response_parsing() {
        let body = r#"{
            "code": 1,
            "stderr": [
                {"text": "error: expected ';'"},
                {"text": "1 error generated."}
            ],
            "stdout": []
        }"#;
        let parsed: CompileResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.code, 1);
        let text = stderr_text(&parsed).unwrap();
        assert!(text.contains("expected ';'"));
        assert!(text.contains("1 error generated."));
    }

    #[test]
    fn test_compile_response_missing_fields() {
        let parsed: CompileResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.code, -1);
        assert!(stderr_text(&parsed).is_none());
    }

    #[test]
    fn test_retryable_statuses() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(code), "{code} should be retryable");
        }
        for code in [200, 400, 404] {
            assert!(!is_retryable_status(code), "{code} should not be retryable");
        }
    }
}
