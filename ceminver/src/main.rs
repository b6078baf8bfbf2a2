//! ceminver CLI — search many Compiler Explorer targets for the oldest
//! compiler version that still accepts a C++ snippet.
//!
//! Version lists are supplied pre-fetched in a JSON file; this binary only
//! drives the search and prints a per-target summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ceminver::{
    CeClient, CompilerTarget, CompilerVersion, SearchConfig, SearchOrchestrator, Snippet,
    TaskStatus, VersionList,
};

#[derive(Parser)]
#[command(name = "ceminver", about = "Find the oldest compiler version that builds a snippet")]
struct Args {
    /// C++ source file to probe
    #[arg(long)]
    source: PathBuf,

    /// JSON file with targets and their version lists
    #[arg(long)]
    targets: PathBuf,

    /// Language standard, e.g. c++17
    #[arg(long)]
    std: Option<String>,

    /// Extra compiler flags appended to every probe
    #[arg(long)]
    flags: Option<String>,

    /// Base URL of the compile service
    #[arg(long)]
    base_url: Option<String>,

    /// Cap on simultaneous outbound probes
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Sort each version list oldest-first by its version strings instead
    /// of trusting the file order
    #[arg(long)]
    sort_versions: bool,
}

/// On-disk shape of the targets file
#[derive(Deserialize)]
struct TargetsFile {
    targets: Vec<TargetEntry>,
}

#[derive(Deserialize)]
struct TargetEntry {
    family: String,
    platform: String,
    series: String,
    versions: Vec<VersionEntry>,
}

#[derive(Deserialize)]
struct VersionEntry {
    id: String,
    name: String,
    #[serde(default)]
    semver: Option<String>,
}

fn load_targets(path: &PathBuf, sort_versions: bool) -> Result<Vec<(CompilerTarget, VersionList)>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read targets file {}", path.display()))?;
    let parsed: TargetsFile = serde_json::from_str(&raw)
        .with_context(|| format!("invalid targets JSON in {}", path.display()))?;

    Ok(parsed
        .targets
        .into_iter()
        .map(|entry| {
            let target = CompilerTarget::new(entry.family, entry.platform, entry.series);
            let versions: Vec<CompilerVersion> = entry
                .versions
                .into_iter()
                .map(|v| CompilerVersion::new(v.id, v.name, v.semver))
                .collect();
            let list = if sort_versions {
                VersionList::sorted_oldest_first(versions)
            } else {
                VersionList::new(versions)
            };
            (target, list)
        })
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let source = std::fs::read_to_string(&args.source)
        .with_context(|| format!("failed to read source file {}", args.source.display()))?;
    let mut snippet = Snippet::new(source).context("snippet rejected")?;
    if let Some(std) = &args.std {
        snippet = snippet.with_std(std);
    }
    if let Some(flags) = &args.flags {
        snippet = snippet.with_extra_flags(flags);
    }

    let mut config = SearchConfig::default();
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(max) = args.max_concurrent {
        config.max_concurrent_probes = max;
    }
    if let Some(secs) = args.timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }

    let targets = load_targets(&args.targets, args.sort_versions)?;
    info!(targets = targets.len(), base_url = %config.base_url, "starting search");

    let client = Arc::new(CeClient::new(&config).context("failed to build compile client")?);
    let orchestrator = SearchOrchestrator::new(client, config);
    let session = orchestrator.start_session(snippet, targets);

    // Ctrl-C requests cooperative cancellation; in-flight probes finish.
    let cancel = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling session");
            cancel.cancel();
        }
    });

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(event = event.event_type(), "progress");
        }
    });

    let reports = session.wait().await;

    let mut failures = 0usize;
    println!("{:<40} {:<14} {:<28} probes", "target", "status", "minimal version");
    for report in &reports {
        let version = match &report.status {
            TaskStatus::Found { version } => version.to_string(),
            TaskStatus::Inconsistent {
                version: Some(version),
            } => format!("{version} (inconsistent)"),
            _ => "-".to_string(),
        };
        if matches!(report.status, TaskStatus::Error { .. }) {
            failures += 1;
        }
        println!(
            "{:<40} {:<14} {:<28} {}",
            report.target.to_string(),
            report.status.as_str(),
            version,
            report.probes_issued
        );
    }

    if failures > 0 {
        anyhow::bail!("{failures} target search(es) ended in error");
    }
    Ok(())
}
