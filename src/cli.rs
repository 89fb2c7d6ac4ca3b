//! Command-line interface for tabrecon

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tabrecon")]
#[command(about = "Key-based dataset reconciliation and consistency monitoring")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override workspace location
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize tabrecon workspace
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Run registered monitors once and report (exit code 1 unless all pass)
    Run {
        /// Only run these monitors (repeatable); defaults to all
        #[arg(long = "rule")]
        rules: Vec<String>,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,

        /// Per-run deadline in seconds, overriding the configured default
        #[arg(long, value_parser = validate_positive_secs)]
        timeout: Option<u64>,
    },

    /// Compare two datasets once without registering a monitor
    Compare {
        /// Source table or data file
        #[arg(long)]
        source: String,

        /// Target table or data file
        #[arg(long)]
        target: String,

        /// Key column (repeatable, order matters)
        #[arg(long = "key", required = true)]
        keys: Vec<String>,

        /// Compare columns, paired positionally on both sides
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        columns: Vec<String>,

        /// Source database (DuckDB file); in-memory when omitted
        #[arg(long)]
        database: Option<String>,

        /// Target database; defaults to --database
        #[arg(long)]
        target_database: Option<String>,

        /// Rule: "exact", or metric/operator/value such as "diff_percent>0.1"
        #[arg(long, default_value = "exact")]
        rule: String,

        /// Only compare row totals (requires a row_count_delta rule)
        #[arg(long)]
        count_only: bool,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,

        /// Deadline in seconds
        #[arg(long, value_parser = validate_positive_secs)]
        timeout: Option<u64>,
    },

    /// Register or replace a monitor in the workspace configuration
    Add {
        /// Monitor name
        name: String,

        #[arg(long)]
        source: String,

        #[arg(long)]
        target: String,

        /// Key column (repeatable, order matters)
        #[arg(long = "key", required = true)]
        keys: Vec<String>,

        /// Compare columns, paired positionally on both sides
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        columns: Vec<String>,

        #[arg(long)]
        database: Option<String>,

        #[arg(long)]
        target_database: Option<String>,

        /// Rule: "exact", or metric/operator/value such as "diff_percent>0.1"
        #[arg(long, default_value = "exact")]
        rule: String,

        /// 5-field cron expression, evaluated in UTC
        #[arg(long)]
        schedule: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Only compare row totals (requires a row_count_delta rule)
        #[arg(long)]
        count_only: bool,

        /// Replace an existing monitor with the same name
        #[arg(long)]
        replace: bool,
    },

    /// Remove a monitor from the workspace configuration
    Remove {
        /// Monitor name
        name: String,
    },

    /// Start the scheduler in the foreground
    ///
    /// Monitors are read from the configuration once at startup. Changes made
    /// with `add` or `remove` take effect after the scheduler is restarted.
    Schedule {
        /// Stop after this many seconds
        #[arg(long, value_parser = validate_positive_secs)]
        max_runtime: Option<u64>,
    },

    /// List registered monitors with their next fire time
    List {
        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Show recorded results of a monitor
    History {
        /// Monitor name
        rule: String,

        /// Show only the most recent N results
        #[arg(long)]
        limit: Option<usize>,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Validate JSON records against a named schema
    Validate {
        /// Schema identifier (`$id` or file stem)
        #[arg(long)]
        schema: String,

        /// JSON file holding one record or an array of records
        #[arg(long)]
        record: PathBuf,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },
}

/// Parse output format string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid output format: {}. Use 'pretty' or 'json'", s)),
        }
    }
}

/// Validate that a duration in seconds is greater than 0
fn validate_positive_secs(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|_| format!("Invalid duration: '{}'. Must be a positive number of seconds.", s))?;

    if secs == 0 {
        return Err("Duration must be greater than 0".to_string());
    }

    Ok(secs)
}
