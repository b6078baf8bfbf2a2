//! End-to-end tests for the binary search engine against scripted probes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ceminver::{
    CompileProbe, CompilerTarget, CompilerVersion, ProbeOutcome, ProbeResult, RetryPolicy,
    SearchResult, Snippet, TaskStatus, VersionList, VersionSearch,
};

fn target() -> CompilerTarget {
    CompilerTarget::new("gcc", "x86-64", "x86-64 gcc")
}

fn snippet() -> Snippet {
    Snippet::new("int main() { return 0; }").unwrap()
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        jitter: 0.0,
        ..Default::default()
    }
}

/// Version list g0..g{n-1} with semvers "1.0".."n.0"
fn versions(n: usize) -> VersionList {
    VersionList::new(
        (0..n)
            .map(|i| {
                CompilerVersion::new(format!("g{i}"), format!("gcc {i}"), Some(format!("{}.0", i + 1)))
            })
            .collect(),
    )
}

fn search(n: usize) -> VersionSearch {
    VersionSearch::new(
        target(),
        versions(n),
        snippet(),
        "-fsyntax-only".into(),
        policy(),
        1,
    )
}

/// Probe whose verdicts follow a per-version script. The last entry of a
/// script repeats once consumed, so `[TransientError]` means "transient
/// forever". Also counts calls per version to show revisits are memoized.
struct ScriptedProbe {
    scripts: Mutex<HashMap<String, Vec<ProbeOutcome>>>,
    per_version_calls: Mutex<HashMap<String, u32>>,
    calls: AtomicU32,
}

impl ScriptedProbe {
    /// One constant verdict per list index
    fn fixed(verdicts: &[ProbeOutcome]) -> Self {
        Self::sequences(verdicts.iter().map(|&v| vec![v]).collect())
    }

    /// Per-index call sequences, index i keyed by compiler id "g{i}"
    fn sequences(scripts: Vec<Vec<ProbeOutcome>>) -> Self {
        let scripts = scripts
            .into_iter()
            .enumerate()
            .map(|(i, seq)| (format!("g{i}"), seq))
            .collect();
        Self {
            scripts: Mutex::new(scripts),
            per_version_calls: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_calls_per_version(&self) -> u32 {
        self.per_version_calls
            .lock()
            .unwrap()
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CompileProbe for ScriptedProbe {
    async fn probe(
        &self,
        _snippet: &Snippet,
        version: &CompilerVersion,
        _user_arguments: &str,
    ) -> SearchResult<ProbeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .per_version_calls
            .lock()
            .unwrap()
            .entry(version.compiler_id.clone())
            .or_insert(0) += 1;
        let outcome = {
            let mut scripts = self.scripts.lock().unwrap();
            let seq = scripts
                .get_mut(&version.compiler_id)
                .unwrap_or_else(|| panic!("unscripted version {}", version.compiler_id));
            if seq.len() > 1 {
                seq.remove(0)
            } else {
                seq[0]
            }
        };
        Ok(match outcome {
            ProbeOutcome::Pass => ProbeResult::pass(version.clone(), None, Duration::ZERO),
            ProbeOutcome::Fail => ProbeResult::fail(
                version.clone(),
                Some("error: expected ';'".into()),
                Duration::ZERO,
            ),
            ProbeOutcome::TransientError => {
                ProbeResult::transient(version.clone(), "HTTP 503", Duration::ZERO)
            }
        })
    }
}

use ProbeOutcome::{Fail as F, Pass as P, TransientError as T};

#[tokio::test]
async fn test_finds_minimal_passing_version() {
    // Versions g0..g5; everything from g3 up passes.
    let probe = ScriptedProbe::fixed(&[F, F, F, P, P, P]);
    let report = search(6)
        .run(&probe, &CancellationToken::new(), |_| {})
        .await;

    match &report.status {
        TaskStatus::Found { version } => assert_eq!(version.compiler_id, "g3"),
        other => panic!("expected Found, got {other:?}"),
    }
    assert!(probe.calls() <= 4, "too many probes: {}", probe.calls());
    assert_eq!(probe.max_calls_per_version(), 1);
}

#[tokio::test]
async fn test_empty_version_list_is_not_found_without_probes() {
    let probe = ScriptedProbe::fixed(&[]);
    let report = search(0)
        .run(&probe, &CancellationToken::new(), |_| {})
        .await;
    assert_eq!(report.status, TaskStatus::NotFound);
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_nothing_passes_is_not_found() {
    let probe = ScriptedProbe::fixed(&[F, F, F, F, F, F]);
    let report = search(6)
        .run(&probe, &CancellationToken::new(), |_| {})
        .await;
    assert_eq!(report.status, TaskStatus::NotFound);
    assert!(report.candidate.is_none());
}

#[tokio::test]
async fn test_everything_passes_finds_oldest() {
    let probe = ScriptedProbe::fixed(&[P, P, P, P, P, P]);
    let report = search(6)
        .run(&probe, &CancellationToken::new(), |_| {})
        .await;
    match &report.status {
        TaskStatus::Found { version } => assert_eq!(version.compiler_id, "g0"),
        other => panic!("expected Found, got {other:?}"),
    }
}

/// Pass exactly when the index is at or above a threshold
struct ThresholdProbe {
    min_pass: usize,
    calls: AtomicU32,
}

#[async_trait]
impl CompileProbe for ThresholdProbe {
    async fn probe(
        &self,
        _snippet: &Snippet,
        version: &CompilerVersion,
        _user_arguments: &str,
    ) -> SearchResult<ProbeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let idx: usize = version.compiler_id[1..].parse().unwrap();
        Ok(if idx >= self.min_pass {
            ProbeResult::pass(version.clone(), None, Duration::ZERO)
        } else {
            ProbeResult::fail(version.clone(), None, Duration::ZERO)
        })
    }
}

#[tokio::test]
async fn test_probe_count_stays_logarithmic() {
    for n in [1usize, 2, 3, 7, 8, 31, 64, 100] {
        for min_pass in [0, n / 2, n - 1, n] {
            let probe = ThresholdProbe {
                min_pass,
                calls: AtomicU32::new(0),
            };
            let report = search(n)
                .run(&probe, &CancellationToken::new(), |_| {})
                .await;

            let bound = (n as f64).log2().ceil() as u32 + 2;
            assert!(
                probe.calls.load(Ordering::SeqCst) <= bound,
                "n={n} min_pass={min_pass}: {} probes > bound {bound}",
                probe.calls.load(Ordering::SeqCst),
            );
            match (&report.status, min_pass < n) {
                (TaskStatus::Found { version }, true) => {
                    assert_eq!(version.compiler_id, format!("g{min_pass}"));
                }
                (TaskStatus::NotFound, false) => {}
                (other, _) => panic!("n={n} min_pass={min_pass}: unexpected {other:?}"),
            }
        }
    }
}

#[tokio::test]
async fn test_same_inputs_give_same_run() {
    let run = || async {
        let probe = ScriptedProbe::fixed(&[F, F, P, F, P, P, P, P]);
        let report = search(8)
            .run(&probe, &CancellationToken::new(), |_| {})
            .await;
        (report.status.as_str(), report.probes_issued, probe.calls())
    };
    assert_eq!(run().await, run().await);
}

#[tokio::test]
async fn test_non_monotonic_verdicts_are_flagged() {
    // g1 passes but g2 fails again: the service contradicts itself.
    let probe = ScriptedProbe::fixed(&[F, P, F, P]);
    let report = search(4)
        .run(&probe, &CancellationToken::new(), |_| {})
        .await;
    match &report.status {
        TaskStatus::Inconsistent { version } => {
            let version = version.as_ref().expect("a passing version was seen");
            assert_eq!(version.compiler_id, "g1");
        }
        other => panic!("expected Inconsistent, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_blips_do_not_change_the_answer() {
    // g1 needs two retries before its Pass comes through.
    let probe = ScriptedProbe::sequences(vec![vec![F], vec![T, T, P], vec![P], vec![P]]);
    let report = search(4)
        .run(&probe, &CancellationToken::new(), |_| {})
        .await;
    match &report.status {
        TaskStatus::Found { version } => assert_eq!(version.compiler_id, "g1"),
        other => panic!("expected Found, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_version_errors_but_keeps_candidate() {
    // g2..g4 pass, g0 fails, g1 never answers: the task must surface an
    // error while preserving the best candidate found before it.
    let probe = ScriptedProbe::fixed(&[F, T, P, P, P]);
    let report = search(5)
        .run(&probe, &CancellationToken::new(), |_| {})
        .await;
    match &report.status {
        TaskStatus::Error { message } => {
            assert!(message.contains("retries exhausted"), "got: {message}");
            assert!(message.contains("HTTP 503"), "got: {message}");
        }
        other => panic!("expected Error, got {other:?}"),
    }
    let candidate = report.candidate.expect("candidate preserved");
    assert_eq!(candidate.compiler_id, "g2");
}

#[tokio::test]
async fn test_snapshots_track_the_fallback_scan() {
    let probe = ScriptedProbe::fixed(&[F, P, F, P]);
    let mut snapshots = Vec::new();
    let report = search(4)
        .run(&probe, &CancellationToken::new(), |s| snapshots.push(s))
        .await;
    assert!(matches!(report.status, TaskStatus::Inconsistent { .. }));

    // Probes at indices 1 and 0 (search), 2 (confirmation), 3 (scan); the
    // reported range must follow the scan instead of freezing at the last
    // binary-search window.
    let running: Vec<(usize, usize)> = snapshots
        .iter()
        .filter_map(|s| match s.status {
            TaskStatus::Running { lo, hi } => Some((lo, hi)),
            _ => None,
        })
        .collect();
    assert_eq!(running, vec![(0, 3), (0, 0), (2, 3), (3, 3)]);
}

#[tokio::test]
async fn test_cancelled_before_start_issues_no_probes() {
    let probe = ScriptedProbe::fixed(&[P, P, P, P]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = search(4).run(&probe, &cancel, |_| {}).await;
    assert_eq!(report.status, TaskStatus::Cancelled);
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_observer_sees_every_probe_and_the_terminal_state() {
    let probe = ScriptedProbe::fixed(&[F, F, P, P, P, P]);
    let mut snapshots = Vec::new();
    let report = search(6)
        .run(&probe, &CancellationToken::new(), |s| snapshots.push(s))
        .await;

    // One snapshot per probe plus the terminal one
    assert_eq!(snapshots.len() as u32, report.probes_issued + 1);
    let counts: Vec<u32> = snapshots.iter().map(|s| s.probes_issued).collect();
    assert!(counts.windows(2).all(|w| w[0] <= w[1]));
    assert!(snapshots.last().unwrap().status.is_terminal());
    assert_eq!(report.history.len() as u32, report.probes_issued);
}
