//! Data model for version searches.
//!
//! A search session fans out over several [`CompilerTarget`]s; each target
//! carries a [`VersionList`] ordered oldest→newest, and every compile attempt
//! at one version is recorded as a [`ProbeResult`]. Task lifecycle state is
//! captured by [`TaskStatus`] and surfaced to callers as [`TaskSnapshot`]s.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};

/// An immutable source snippet plus optional compile configuration.
///
/// Shared read-only across all tasks of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    /// Source text to compile
    pub source: String,
    /// Language identifier understood by the remote service
    pub language: String,
    /// Language standard, e.g. "c++17" (optional)
    pub std: Option<String>,
    /// Extra user flags appended to every probe (optional)
    pub extra_flags: Option<String>,
}

impl Snippet {
    /// Create a C++ snippet. Rejects empty source up front so no probe is
    /// ever issued for it.
    pub fn new(source: impl Into<String>) -> SearchResult<Self> {
        let source = source.into();
        if source.trim().is_empty() {
            return Err(SearchError::EmptySnippet);
        }
        Ok(Self {
            source,
            language: "c++".to_string(),
            std: None,
            extra_flags: None,
        })
    }

    /// Set the language standard
    pub fn with_std(mut self, std: impl Into<String>) -> Self {
        self.std = Some(std.into());
        self
    }

    /// Set extra user flags
    pub fn with_extra_flags(mut self, flags: impl Into<String>) -> Self {
        self.extra_flags = Some(flags.into());
        self
    }
}

/// Identifies one (compiler family, platform, series) search group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompilerTarget {
    /// Compiler family token, e.g. "gcc", "clang", "msvc"
    pub family: String,
    /// Target platform label, e.g. "x86-64", "aarch64"
    pub platform: String,
    /// Human-readable series label, e.g. "x86-64 gcc"
    pub series: String,
}

impl CompilerTarget {
    pub fn new(
        family: impl Into<String>,
        platform: impl Into<String>,
        series: impl Into<String>,
    ) -> Self {
        Self {
            family: family.into(),
            platform: platform.into(),
            series: series.into(),
        }
    }
}

impl std::fmt::Display for CompilerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.family, self.platform, self.series)
    }
}

/// One selectable compiler entry on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerVersion {
    /// Remote service compiler id, e.g. "g122"
    pub compiler_id: String,
    /// Display name, e.g. "x86-64 gcc 12.2"
    pub name: String,
    /// Version string as reported by the service; not strict semver
    pub semver: Option<String>,
}

impl CompilerVersion {
    pub fn new(
        compiler_id: impl Into<String>,
        name: impl Into<String>,
        semver: Option<String>,
    ) -> Self {
        Self {
            compiler_id: compiler_id.into(),
            name: name.into(),
            semver,
        }
    }

    /// Sort key for this entry's version string
    pub fn semver_key(&self) -> SemverKey {
        semver_key(self.semver.as_deref())
    }
}

impl std::fmt::Display for CompilerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.semver {
            Some(v) => write!(f, "{} ({})", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Ordering key for service version strings.
///
/// The service's "semver" field is loose: values like "trunk" or "nightly"
/// must sort newest, and suffixes like "12.0 trunk" slightly above "12.0".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemverKey {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub tweak: u32,
    pub rest: String,
}

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)(?:\.(\d+))?(?:\.(\d+))?(.*)$").expect("static regex"))
}

const DEV_TOKENS: [&str; 6] = ["trunk", "head", "git", "snapshot", "nightly", "tip"];

/// Parse a loose version string into a totally ordered key.
pub fn semver_key(s: Option<&str>) -> SemverKey {
    let Some(s) = s else {
        return SemverKey {
            major: 0,
            minor: 0,
            patch: 0,
            tweak: 0,
            rest: String::new(),
        };
    };
    let trimmed = s.trim();
    let lower = trimmed.to_lowercase();
    let starts_numeric = trimmed.chars().next().is_some_and(|c| c.is_ascii_digit());
    if !starts_numeric && DEV_TOKENS.iter().any(|t| lower.contains(t)) {
        // Pure development builds sort newest.
        return SemverKey {
            major: 9999,
            minor: 9999,
            patch: 9999,
            tweak: 9999,
            rest: lower,
        };
    }
    let Some(caps) = numeric_re().captures(trimmed) else {
        return SemverKey {
            major: 0,
            minor: 0,
            patch: 0,
            tweak: 0,
            rest: trimmed.to_string(),
        };
    };
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0)
    };
    let rest = caps
        .get(4)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let rest_lower = rest.to_lowercase();
    let tweak = if rest_lower.contains("trunk") || rest_lower.contains("git") {
        1
    } else {
        0
    };
    SemverKey {
        major: part(1),
        minor: part(2),
        patch: part(3),
        tweak,
        rest,
    }
}

/// Ordered sequence of versions for one target, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionList(Vec<CompilerVersion>);

impl VersionList {
    /// Wrap an already oldest→newest ordered list. Ordering is the caller's
    /// contract; see [`VersionList::sorted_oldest_first`] when it is not.
    pub fn new(versions: Vec<CompilerVersion>) -> Self {
        Self(versions)
    }

    /// Sort by version key so the oldest entry comes first.
    pub fn sorted_oldest_first(mut versions: Vec<CompilerVersion>) -> Self {
        versions.sort_by_key(|v| v.semver_key());
        Self(versions)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&CompilerVersion> {
        self.0.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompilerVersion> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[CompilerVersion] {
        &self.0
    }
}

/// Outcome of one compile attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The snippet built successfully at this version
    Pass,
    /// The compiler genuinely rejected the snippet (valid search data)
    Fail,
    /// Network/service failure; the verdict at this version is unknown
    TransientError,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::TransientError => "transient_error",
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable record of one compile attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub version: CompilerVersion,
    pub outcome: ProbeOutcome,
    /// Compiler stderr (or transport error text for transient failures)
    pub diagnostic: Option<String>,
    pub elapsed: Duration,
    /// Server-provided backoff hint (Retry-After), if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
}

impl ProbeResult {
    pub fn pass(version: CompilerVersion, diagnostic: Option<String>, elapsed: Duration) -> Self {
        Self {
            version,
            outcome: ProbeOutcome::Pass,
            diagnostic,
            elapsed,
            retry_after: None,
        }
    }

    pub fn fail(version: CompilerVersion, diagnostic: Option<String>, elapsed: Duration) -> Self {
        Self {
            version,
            outcome: ProbeOutcome::Fail,
            diagnostic,
            elapsed,
            retry_after: None,
        }
    }

    pub fn transient(
        version: CompilerVersion,
        diagnostic: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            version,
            outcome: ProbeOutcome::TransientError,
            diagnostic: Some(diagnostic.into()),
            elapsed,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }
}

/// Lifecycle state of one search task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Binary search in progress over the inclusive index range [lo, hi]
    Running { lo: usize, hi: usize },
    /// Minimal passing version located
    Found { version: CompilerVersion },
    /// No version in the list passes
    NotFound,
    /// Monotonicity violated; `version` is the minimal passing version
    /// observed, if any passed at all
    Inconsistent { version: Option<CompilerVersion> },
    /// Session cancelled before this task finished
    Cancelled,
    /// Retry budget exhausted; partial progress preserved in the snapshot
    Error { message: String },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running { .. } => "running",
            Self::Found { .. } => "found",
            Self::NotFound => "not_found",
            Self::Inconsistent { .. } => "inconsistent",
            Self::Cancelled => "cancelled",
            Self::Error { .. } => "error",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of one task, consumable by the presentation layer.
///
/// Each read yields the latest state, not a historical replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub target: CompilerTarget,
    pub status: TaskStatus,
    /// Best known passing version so far
    pub candidate: Option<CompilerVersion>,
    pub probes_issued: u32,
    pub last_diagnostic: Option<String>,
}

impl TaskSnapshot {
    /// Initial snapshot before the first probe
    pub fn initial(target: CompilerTarget, version_count: usize) -> Self {
        Self {
            target,
            status: TaskStatus::Running {
                lo: 0,
                hi: version_count.saturating_sub(1),
            },
            candidate: None,
            probes_issued: 0,
            last_diagnostic: None,
        }
    }
}

/// Final report for one task: terminal snapshot plus the append-only
/// probe history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub target: CompilerTarget,
    pub status: TaskStatus,
    pub candidate: Option<CompilerVersion>,
    pub probes_issued: u32,
    pub last_diagnostic: Option<String>,
    pub history: Vec<ProbeResult>,
}

impl TaskReport {
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            target: self.target.clone(),
            status: self.status.clone(),
            candidate: self.candidate.clone(),
            probes_issued: self.probes_issued,
            last_diagnostic: self.last_diagnostic.clone(),
        }
    }
}
