//! Monotonic binary search over an ordered compiler version list.
//!
//! One [`VersionSearch`] owns all mutable state for one target's search.
//! Probes are strictly sequential — each verdict decides the next index —
//! and the state machine is:
//!
//! ```text
//! Running(lo, hi) ──► Found(version)
//!                 ├─► NotFound
//!                 ├─► Inconsistent(minimal passing seen)
//!                 ├─► Cancelled
//!                 └─► Error(message)
//! ```
//!
//! Monotonicity (once a version passes, every newer one passes) is assumed
//! for the O(log N) bound but never trusted blindly: after a candidate is
//! found the engine confirms the next-newer index and falls back to a
//! bounded linear scan when the assumption is violated, surfacing
//! `Inconsistent` instead of a silently wrong answer.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::models::{
    CompilerTarget, ProbeOutcome, ProbeResult, Snippet, TaskReport, TaskSnapshot, TaskStatus,
    VersionList,
};
use crate::probe::CompileProbe;
use crate::retry::{probe_with_retry, RetryPolicy};

/// One target's search: version list, probe configuration, and the
/// exclusive mutable state the run accumulates.
pub struct VersionSearch {
    target: CompilerTarget,
    versions: VersionList,
    snippet: Snippet,
    user_arguments: String,
    policy: RetryPolicy,
    transient_reprobes: u32,
}

/// Mutable per-run state. History is append-only; bounds only narrow.
struct TaskState {
    lo: usize,
    hi: usize,
    candidate: Option<usize>,
    history: Vec<ProbeResult>,
    memo: HashMap<usize, ProbeOutcome>,
    probes_issued: u32,
    last_diagnostic: Option<String>,
}

impl TaskState {
    fn new(version_count: usize) -> Self {
        Self {
            lo: 0,
            hi: version_count.saturating_sub(1),
            candidate: None,
            history: Vec::new(),
            memo: HashMap::new(),
            probes_issued: 0,
            last_diagnostic: None,
        }
    }
}

/// Outcome of resolving one index, after retries and re-probes.
enum Probed {
    Verdict(ProbeOutcome),
    Cancelled,
    Unresolved(String),
}

/// Result of the post-search monotonicity check
enum Verification {
    Consistent,
    Violated,
    Cancelled,
    Unresolved(String),
}

impl VersionSearch {
    pub fn new(
        target: CompilerTarget,
        versions: VersionList,
        snippet: Snippet,
        user_arguments: String,
        policy: RetryPolicy,
        transient_reprobes: u32,
    ) -> Self {
        Self {
            target,
            versions,
            snippet,
            user_arguments,
            policy,
            transient_reprobes,
        }
    }

    pub fn target(&self) -> &CompilerTarget {
        &self.target
    }

    /// Drive the search to a terminal state.
    ///
    /// `observe` receives a fresh snapshot after every probe and once at the
    /// end; the orchestrator forwards these to watch channels and the event
    /// bus. Cancellation is checked before each probe; an in-flight request
    /// is left to finish or time out naturally.
    pub async fn run(
        &self,
        probe: &dyn CompileProbe,
        cancel: &CancellationToken,
        mut observe: impl FnMut(TaskSnapshot),
    ) -> TaskReport {
        let n = self.versions.len();
        info!(target = %self.target, versions = n, "version search starting");

        let mut state = TaskState::new(n);
        if n == 0 {
            return self.finish(state, TaskStatus::NotFound, &mut observe);
        }

        // Inclusive bounds; lo tracked past hi via the loop guard below
        // rather than letting the usize underflow at hi = -1.
        let mut lo: i64 = 0;
        let mut hi: i64 = n as i64 - 1;

        let interrupted = loop {
            if lo > hi {
                break None;
            }
            if cancel.is_cancelled() {
                break Some(TaskStatus::Cancelled);
            }
            state.lo = lo as usize;
            state.hi = hi as usize;

            let mid = (lo + (hi - lo) / 2) as usize;
            match self
                .resolve_index(mid, &mut state, probe, cancel, &mut observe)
                .await
            {
                Probed::Verdict(ProbeOutcome::Pass) => {
                    state.candidate = Some(mid);
                    hi = mid as i64 - 1;
                }
                Probed::Verdict(ProbeOutcome::Fail) => {
                    lo = mid as i64 + 1;
                }
                // resolve_index only yields Pass/Fail verdicts
                Probed::Verdict(ProbeOutcome::TransientError) => {
                    break Some(TaskStatus::Error {
                        message: "unresolved transient verdict".into(),
                    });
                }
                Probed::Cancelled => break Some(TaskStatus::Cancelled),
                Probed::Unresolved(message) => break Some(TaskStatus::Error { message }),
            }
        };

        if let Some(status) = interrupted {
            return self.finish(state, status, &mut observe);
        }

        let status = match state.candidate {
            None => TaskStatus::NotFound,
            Some(c) => {
                match self
                    .verify_candidate(c, &mut state, probe, cancel, &mut observe)
                    .await
                {
                    Verification::Consistent => TaskStatus::Found {
                        version: self.versions.as_slice()[c].clone(),
                    },
                    Verification::Violated => {
                        self.fallback_scan(c, &mut state, probe, cancel, &mut observe)
                            .await
                    }
                    Verification::Cancelled => TaskStatus::Cancelled,
                    Verification::Unresolved(message) => TaskStatus::Error { message },
                }
            }
        };
        self.finish(state, status, &mut observe)
    }

    /// Resolve the verdict at one index, consulting the memo first so a
    /// revisited index never re-issues a request. Grants the version a few
    /// extra full retry rounds when the wrapper's budget exhausts.
    async fn resolve_index(
        &self,
        idx: usize,
        state: &mut TaskState,
        probe: &dyn CompileProbe,
        cancel: &CancellationToken,
        observe: &mut impl FnMut(TaskSnapshot),
    ) -> Probed {
        if let Some(outcome) = state.memo.get(&idx) {
            return Probed::Verdict(*outcome);
        }
        let version = &self.versions.as_slice()[idx];

        let mut rounds = 0;
        loop {
            if cancel.is_cancelled() {
                return Probed::Cancelled;
            }
            let result = match probe_with_retry(
                probe,
                &self.snippet,
                version,
                &self.user_arguments,
                &self.policy,
                cancel,
            )
            .await
            {
                Ok(result) => result,
                Err(SearchError::Cancelled) => return Probed::Cancelled,
                Err(e) => return Probed::Unresolved(e.to_string()),
            };

            state.probes_issued += 1;
            if let Some(d) = &result.diagnostic {
                state.last_diagnostic = Some(d.clone());
            }
            let outcome = result.outcome;
            state.history.push(result);
            observe(self.snapshot(
                state,
                TaskStatus::Running {
                    lo: state.lo,
                    hi: state.hi,
                },
            ));
            debug!(
                target = %self.target,
                index = idx,
                version = %version.compiler_id,
                outcome = %outcome,
                "probe resolved"
            );

            match outcome {
                ProbeOutcome::Pass | ProbeOutcome::Fail => {
                    state.memo.insert(idx, outcome);
                    return Probed::Verdict(outcome);
                }
                ProbeOutcome::TransientError => {
                    if rounds >= self.transient_reprobes {
                        let err = SearchError::ExhaustedRetries {
                            attempts: self.policy.max_attempts.max(1)
                                * (self.transient_reprobes + 1),
                            last: state
                                .last_diagnostic
                                .clone()
                                .unwrap_or_else(|| "transient failure".into()),
                        };
                        warn!(
                            target = %self.target,
                            version = %version.compiler_id,
                            "verdict unresolved after retries and re-probes"
                        );
                        return Probed::Unresolved(err.to_string());
                    }
                    rounds += 1;
                    warn!(
                        target = %self.target,
                        version = %version.compiler_id,
                        round = rounds,
                        "re-probing after exhausted retry budget"
                    );
                }
            }
        }
    }

    /// Check the monotonicity assumption around candidate `c`.
    ///
    /// Pure binary search can never record a Fail above its own candidate
    /// (a newer Fail moves `lo` past it first), so history alone cannot
    /// catch a regression. One confirmation of index c+1 — free when the
    /// search already probed it — closes that gap at constant extra cost.
    async fn verify_candidate(
        &self,
        c: usize,
        state: &mut TaskState,
        probe: &dyn CompileProbe,
        cancel: &CancellationToken,
        observe: &mut impl FnMut(TaskSnapshot),
    ) -> Verification {
        if state
            .memo
            .iter()
            .any(|(&idx, &out)| idx > c && out == ProbeOutcome::Fail)
        {
            return Verification::Violated;
        }
        let next = c + 1;
        if next >= self.versions.len() {
            return Verification::Consistent;
        }
        // Snapshots emitted here report the region still in play.
        state.lo = next;
        state.hi = self.versions.len() - 1;
        match self.resolve_index(next, state, probe, cancel, observe).await {
            Probed::Verdict(ProbeOutcome::Fail) => Verification::Violated,
            Probed::Verdict(_) => Verification::Consistent,
            Probed::Cancelled => Verification::Cancelled,
            Probed::Unresolved(message) => Verification::Unresolved(message),
        }
    }

    /// Bounded linear fallback after a detected monotonicity violation:
    /// scan upward from the candidate until passing resumes or the list is
    /// exhausted, then report the minimal passing version seen with the
    /// inconsistency flagged.
    async fn fallback_scan(
        &self,
        c: usize,
        state: &mut TaskState,
        probe: &dyn CompileProbe,
        cancel: &CancellationToken,
        observe: &mut impl FnMut(TaskSnapshot),
    ) -> TaskStatus {
        warn!(
            target = %self.target,
            candidate = %self.versions.as_slice()[c].compiler_id,
            "monotonicity violated, falling back to linear scan"
        );
        for idx in (c + 1)..self.versions.len() {
            state.lo = idx;
            state.hi = self.versions.len() - 1;
            match self.resolve_index(idx, state, probe, cancel, observe).await {
                Probed::Verdict(ProbeOutcome::Pass) => break,
                Probed::Verdict(_) => continue,
                Probed::Cancelled => return TaskStatus::Cancelled,
                Probed::Unresolved(message) => return TaskStatus::Error { message },
            }
        }
        let minimal = state
            .memo
            .iter()
            .filter(|(_, &out)| out == ProbeOutcome::Pass)
            .map(|(&idx, _)| idx)
            .min();
        TaskStatus::Inconsistent {
            version: minimal.map(|idx| self.versions.as_slice()[idx].clone()),
        }
    }

    fn snapshot(&self, state: &TaskState, status: TaskStatus) -> TaskSnapshot {
        TaskSnapshot {
            target: self.target.clone(),
            status,
            candidate: state
                .candidate
                .map(|idx| self.versions.as_slice()[idx].clone()),
            probes_issued: state.probes_issued,
            last_diagnostic: state.last_diagnostic.clone(),
        }
    }

    fn finish(
        &self,
        state: TaskState,
        status: TaskStatus,
        observe: &mut impl FnMut(TaskSnapshot),
    ) -> TaskReport {
        info!(
            target = %self.target,
            status = %status,
            probes = state.probes_issued,
            "version search finished"
        );
        observe(self.snapshot(&state, status.clone()));
        TaskReport {
            target: self.target.clone(),
            status,
            candidate: state
                .candidate
                .map(|idx| self.versions.as_slice()[idx].clone()),
            probes_issued: state.probes_issued,
            last_diagnostic: state.last_diagnostic,
            history: state.history,
        }
    }
}
