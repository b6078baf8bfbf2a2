//! ceminver — minimum-compiler-version search over Compiler Explorer
//!
//! Given a C++ snippet and, per target, an ordered oldest→newest list of
//! compiler versions hosted on a Compiler-Explorer-style service, find the
//! oldest version that still compiles the snippet with as few remote
//! requests as possible.
//!
//! # Structure
//!
//! - [`probe`]: one compile request → Pass/Fail/TransientError verdict
//! - [`retry`]: bounded exponential backoff around transient failures
//! - [`engine`]: monotonic binary search with inconsistency detection
//! - [`orchestrator`]: one concurrent task per target, shared probe cap,
//!   cooperative cancellation, progress snapshots and events
//!
//! # Usage
//!
//! ```rust,ignore
//! let client = Arc::new(CeClient::new(&config)?);
//! let orchestrator = SearchOrchestrator::new(client, config);
//! let session = orchestrator.start_session(snippet, targets);
//! let reports = session.wait().await;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod flags;
pub mod models;
pub mod orchestrator;
pub mod probe;
pub mod retry;

pub use config::SearchConfig;
pub use engine::VersionSearch;
pub use error::{SearchError, SearchResult};
pub use events::{ProgressBus, SearchEvent};
pub use models::{
    CompilerTarget, CompilerVersion, ProbeOutcome, ProbeResult, Snippet, TaskReport, TaskSnapshot,
    TaskStatus, VersionList,
};
pub use orchestrator::{SearchOrchestrator, SearchSession};
pub use probe::{CeClient, CompileProbe, ThrottledProbe};
pub use retry::{probe_with_retry, RetryPolicy};
