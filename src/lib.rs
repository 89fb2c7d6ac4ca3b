//! # tabrecon
//!
//! Key-based reconciliation of two tabular datasets and scheduled monitoring
//! of their consistency against threshold rules.

pub mod cli;
pub mod commands;
pub mod compare;
pub mod config;
pub mod cron;
pub mod dataset;
pub mod duckdb_source;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod output;
pub mod partition;
pub mod progress;
pub mod report;
pub mod rule;
pub mod scheduler;
pub mod schema;
pub mod source;
pub mod workspace;

pub use dataset::{DatasetRef, RowKey, RowSnapshot};
pub use engine::{DiffEngine, DiffStats, EngineConfig};
pub use error::{DiffError, DiffErrorKind, ReconError, Result};
pub use monitor::{Monitor, MonitorRegistry, MonitorResult, MonitorRule, RunOutcome};
pub use report::ReportSummary;
pub use rule::{evaluate, CheckResult, Operator, Outcome, Rule};
pub use source::{CancelToken, SourceResolver, TabularSource};
pub use workspace::ReconWorkspace;

/// Current format version for tabrecon config files
pub const FORMAT_VERSION: &str = "1.0.0";

/// Default target rows per chunk
pub const DEFAULT_CHUNK_SIZE: u64 = 10000;

/// Default cap on chunks per worker thread
pub const DEFAULT_MAX_CHUNKS_PER_WORKER: usize = 8;

/// Default number of results kept per monitor
pub const DEFAULT_HISTORY_RETENTION: usize = 100;

/// Default per-run deadline in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
