//! Concurrent session orchestration.
//!
//! One spawned task per (target, version list) pair, each driving its own
//! [`VersionSearch`] sequentially. Tasks share nothing mutable: the snippet
//! is read-only behind an `Arc`, every task owns its bounds and history
//! exclusively, and the orchestrator only ever reads immutable snapshots.
//! A session-wide semaphore caps simultaneous outbound probes.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::engine::VersionSearch;
use crate::events::{ProgressBus, SearchEvent};
use crate::flags;
use crate::models::{CompilerTarget, Snippet, TaskReport, TaskSnapshot, VersionList};
use crate::probe::{CompileProbe, ThrottledProbe};

/// Spawns and supervises one search session at a time.
pub struct SearchOrchestrator {
    probe: Arc<dyn CompileProbe>,
    config: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(probe: Arc<dyn CompileProbe>, config: SearchConfig) -> Self {
        Self { probe, config }
    }

    /// Start one search task per target. Returns immediately; progress is
    /// observable through the session while tasks run.
    pub fn start_session(
        &self,
        snippet: Snippet,
        targets: Vec<(CompilerTarget, VersionList)>,
    ) -> SearchSession {
        let session_id = Uuid::new_v4().to_string();
        let bus = ProgressBus::new();
        let cancel = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_probes.max(1)));
        let snippet = Arc::new(snippet);

        info!(
            session_id = %session_id,
            targets = targets.len(),
            max_concurrent = self.config.max_concurrent_probes,
            "search session starting"
        );
        bus.publish(SearchEvent::SessionStarted {
            session_id: session_id.clone(),
            targets: targets.len(),
            timestamp: Utc::now(),
        });

        let mut join_set = JoinSet::new();
        let mut tasks = Vec::with_capacity(targets.len());

        for (target, versions) in targets {
            let (tx, rx) = watch::channel(TaskSnapshot::initial(target.clone(), versions.len()));
            tasks.push(TaskHandle {
                target: target.clone(),
                rx,
            });

            let user_arguments = flags::user_arguments(
                &target.family,
                snippet.std.as_deref(),
                snippet.extra_flags.as_deref(),
            );
            let search = VersionSearch::new(
                target.clone(),
                versions,
                (*snippet).clone(),
                user_arguments,
                self.config.retry.clone(),
                self.config.transient_reprobes,
            );
            let probe: Arc<dyn CompileProbe> =
                Arc::new(ThrottledProbe::new(self.probe.clone(), permits.clone()));
            let cancel = cancel.clone();
            let bus = bus.clone();
            let session_id = session_id.clone();

            join_set.spawn(async move {
                let report = search
                    .run(probe.as_ref(), &cancel, |snapshot| {
                        let _ = tx.send(snapshot.clone());
                        bus.publish(SearchEvent::TaskUpdated {
                            session_id: session_id.clone(),
                            snapshot,
                            timestamp: Utc::now(),
                        });
                    })
                    .await;
                bus.publish(SearchEvent::TaskFinished {
                    session_id,
                    target: report.target.clone(),
                    status: report.status.clone(),
                    probes_issued: report.probes_issued,
                    timestamp: Utc::now(),
                });
                report
            });
        }

        SearchSession {
            id: session_id,
            cancel,
            bus,
            tasks,
            join_set,
        }
    }
}

/// Latest-snapshot handle for one task
struct TaskHandle {
    target: CompilerTarget,
    rx: watch::Receiver<TaskSnapshot>,
}

/// One user-initiated run: a set of concurrent search tasks plus the
/// shared cancellation token and event bus.
pub struct SearchSession {
    id: String,
    cancel: CancellationToken,
    bus: ProgressBus,
    tasks: Vec<TaskHandle>,
    join_set: JoinSet<TaskReport>,
}

impl SearchSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request cooperative cancellation. Every task checks the token before
    /// issuing a new probe; in-flight requests finish or time out naturally.
    pub fn cancel(&self) {
        info!(session_id = %self.id, "session cancellation requested");
        self.cancel.cancel();
    }

    /// Clone of the session's cancellation token, e.g. for a Ctrl-C handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latest snapshot of every task. Restartable: each call reads the
    /// current state, never a historical replay.
    pub fn progress(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(|t| t.rx.borrow().clone()).collect()
    }

    /// Whether every task has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.rx.borrow().status.is_terminal())
    }

    /// Subscribe to the session's progress event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SearchEvent> {
        self.bus.subscribe()
    }

    /// Await completion of every task and collect the final reports,
    /// ordered by target. A failing or cancelled task still yields its
    /// report; a panicked task is logged and skipped.
    pub async fn wait(mut self) -> Vec<TaskReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.join_set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => warn!(session_id = %self.id, error = %e, "search task panicked"),
            }
        }
        reports.sort_by(|a, b| a.target.cmp(&b.target));
        info!(
            session_id = %self.id,
            completed = reports.len(),
            "search session finished"
        );
        self.bus.publish(SearchEvent::SessionFinished {
            session_id: self.id.clone(),
            completed: reports.len(),
            timestamp: Utc::now(),
        });
        reports
    }
}
