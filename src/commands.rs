//! Command implementations for tabrecon CLI

use crate::cli::{Commands, OutputFormat};
use crate::config::AppConfig;
use crate::cron::CronSchedule;
use crate::dataset::DatasetRef;
use crate::duckdb_source::DuckDbResolver;
use crate::engine::DiffEngine;
use crate::error::{ReconError, Result};
use crate::monitor::{CheckMode, Monitor, MonitorResult, MonitorRule, RunOutcome};
use crate::output::{JsonFormatter, MonitorSummary, PrettyPrinter};
use crate::progress::ProgressReporter;
use crate::report::ReportSummary;
use crate::rule::{evaluate, CheckResult, Rule};
use crate::scheduler::Scheduler;
use crate::schema::{JsonSchemaRegistry, SchemaValidator};
use crate::source::{CancelToken, SourceResolver};
use crate::workspace::ReconWorkspace;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default schema directory, relative to the workspace root
const DEFAULT_SCHEMAS_DIR: &str = "schemas";

/// Execute a command, returning the process exit code
pub fn execute_command(command: Commands, workspace_path: Option<&Path>) -> Result<i32> {
    match command {
        Commands::Init { force } => init_command(workspace_path, force),
        Commands::Run { rules, format, timeout } => run_command(workspace_path, &rules, &format, timeout),
        Commands::Compare {
            source,
            target,
            keys,
            columns,
            database,
            target_database,
            rule,
            count_only,
            format,
            timeout,
        } => {
            let (source, target) = dataset_pair(&source, &target, &keys, &columns, database, target_database)?;
            compare_command(workspace_path, source, target, &rule, count_only, &format, timeout)
        }
        Commands::Add {
            name,
            source,
            target,
            keys,
            columns,
            database,
            target_database,
            rule,
            schedule,
            description,
            count_only,
            replace,
        } => {
            let (source, target) = dataset_pair(&source, &target, &keys, &columns, database, target_database)?;
            let rule = parse_rule(&rule)?;
            let mode = if count_only { CheckMode::RowCount } else { CheckMode::Diff };
            let monitor = MonitorRule::new(name, source, target, rule, schedule)
                .with_description(description)
                .with_mode(mode);
            add_command(workspace_path, monitor, replace)
        }
        Commands::Remove { name } => remove_command(workspace_path, &name),
        Commands::Schedule { max_runtime } => schedule_command(workspace_path, max_runtime),
        Commands::List { format } => list_command(workspace_path, &format),
        Commands::History { rule, limit, format } => history_command(workspace_path, &rule, limit, &format),
        Commands::Validate { schema, record, format } => validate_command(workspace_path, &schema, &record, &format),
    }
}

/// Initialize tabrecon workspace
fn init_command(workspace_path: Option<&Path>, force: bool) -> Result<i32> {
    let current_dir = std::env::current_dir()?;
    let root = workspace_path.unwrap_or(&current_dir);

    // Always create in the given directory rather than searching parents
    let workspace = ReconWorkspace::create_new(root.to_path_buf())?;
    if force {
        workspace.create_config_with_force(true)?;
    }

    println!("✅ Initialized tabrecon workspace at: {}", workspace.root.display());
    println!("├─ Config: {}", workspace.config_path().display());
    println!("└─ History: {}", workspace.history_dir.display());
    Ok(0)
}

/// Run monitors once and report
fn run_command(workspace_path: Option<&Path>, rules: &[String], format: &str, timeout: Option<u64>) -> Result<i32> {
    let format = parse_format(format)?;
    let workspace = ReconWorkspace::open(workspace_path)?;
    let config = workspace.load_config()?;
    let monitor = build_monitor(&workspace, &config)?;
    let timeout = timeout.map(Duration::from_secs);

    let mut progress = match format {
        OutputFormat::Pretty => ProgressReporter::new_for_run(if rules.is_empty() {
            monitor.registry().len()
        } else {
            rules.len()
        }),
        OutputFormat::Json => ProgressReporter::new_minimal(),
    };

    let outcomes: Vec<(String, Result<RunOutcome>)> = if rules.is_empty() {
        monitor.run_all(timeout)
    } else {
        for name in rules {
            if monitor.registry().get(name).is_none() {
                return Err(ReconError::rule_not_found(name));
            }
        }
        rules
            .iter()
            .map(|name| (name.clone(), monitor.run_now(name, timeout)))
            .collect()
    };
    progress.finish("Monitors finished");

    let mut results: Vec<MonitorResult> = Vec::with_capacity(outcomes.len());
    for (name, outcome) in outcomes {
        match outcome? {
            RunOutcome::Completed(result) => results.push(result),
            RunOutcome::Skipped => log::warn!("Monitor '{}' was already running; skipped", name),
        }
    }

    let summary = ReportSummary::from_results(&results);
    match format {
        OutputFormat::Pretty => PrettyPrinter::print_report(&results, &summary),
        OutputFormat::Json => println!("{}", JsonFormatter::format_report(&results, &summary)?),
    }
    Ok(summary.exit_code())
}

/// One-off comparison of two datasets
fn compare_command(
    workspace_path: Option<&Path>,
    source: DatasetRef,
    target: DatasetRef,
    rule: &str,
    count_only: bool,
    format: &str,
    timeout: Option<u64>,
) -> Result<i32> {
    let format = parse_format(format)?;
    let rule = parse_rule(rule)?;
    if count_only && rule.needs_key_diff() {
        return Err(ReconError::invalid_input(format!(
            "--count-only requires a row_count_delta rule, not {}",
            rule.metric_name()
        )));
    }

    // Engine settings come from the workspace when there is one
    let config = match ReconWorkspace::open(workspace_path) {
        Ok(workspace) => workspace.load_config()?,
        Err(_) => {
            let mut config = AppConfig::default();
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config
        }
    };
    let engine = DiffEngine::new(config.engine.clone())?;
    let resolver = DuckDbResolver::new();
    let check_name = format!("{} → {}", source.name(), target.name());
    let cancel = match timeout.map(Duration::from_secs).or_else(|| config.timeout()) {
        Some(t) => CancelToken::with_timeout(t),
        None => CancelToken::unbounded(),
    };

    let mut progress = match format {
        OutputFormat::Pretty if !count_only => ProgressReporter::new_for_compare(&check_name),
        _ => ProgressReporter::new_minimal(),
    };

    let stats = resolver.open(&source).and_then(|source_handle| {
        let target_handle = resolver.open(&target)?;
        if count_only {
            engine.count_rows(source_handle.as_ref(), target_handle.as_ref(), &cancel)
        } else {
            let on_chunk = |done: usize, total: usize| progress.update_chunks(done, total);
            engine.compare_with_progress(source_handle.as_ref(), target_handle.as_ref(), &cancel, Some(&on_chunk))
        }
    });
    progress.finish("Comparison finished");

    let result = match stats {
        Ok(stats) => evaluate(&check_name, &stats, &rule, Utc::now()),
        Err(error) => CheckResult::errored(&check_name, &rule, error, Utc::now()),
    };
    let results = [result];
    let summary = ReportSummary::from_results(&results);
    match format {
        OutputFormat::Pretty => PrettyPrinter::print_report(&results, &summary),
        OutputFormat::Json => println!("{}", JsonFormatter::format_report(&results, &summary)?),
    }
    Ok(summary.exit_code())
}

/// Register a monitor in the workspace configuration
fn add_command(workspace_path: Option<&Path>, monitor: MonitorRule, replace: bool) -> Result<i32> {
    let workspace = ReconWorkspace::open(workspace_path)?;
    let mut config = workspace.load_config()?;

    // Validate against a registry built from the current configuration
    let registry = config.build_registry()?;
    let replaced = if replace {
        registry.upsert_rule(monitor.clone())?
    } else {
        registry.add_rule(monitor.clone())?;
        false
    };

    let name = monitor.name.clone();
    let schedule = monitor.schedule.clone();
    match config.monitors.iter_mut().find(|m| m.name == monitor.name) {
        Some(existing) => *existing = monitor,
        None => config.monitors.push(monitor),
    }
    workspace.save_config(&config)?;

    let verb = if replaced { "Replaced" } else { "Added" };
    println!("✅ {} monitor '{}' ({})", verb, name, schedule);
    Ok(0)
}

/// Remove a monitor from the workspace configuration
fn remove_command(workspace_path: Option<&Path>, name: &str) -> Result<i32> {
    let workspace = ReconWorkspace::open(workspace_path)?;
    let mut config = workspace.load_config()?;

    let before = config.monitors.len();
    config.monitors.retain(|m| m.name != name);
    if config.monitors.len() == before {
        return Err(ReconError::rule_not_found(name));
    }
    workspace.save_config(&config)?;

    println!("✅ Removed monitor '{}'", name);
    Ok(0)
}

/// Run the scheduler in the foreground
fn schedule_command(workspace_path: Option<&Path>, max_runtime: Option<u64>) -> Result<i32> {
    let workspace = ReconWorkspace::open(workspace_path)?;
    let config = workspace.load_config()?;
    let monitor = Arc::new(build_monitor(&workspace, &config)?);

    if monitor.registry().is_empty() {
        println!("No monitors registered. Add one with `tabrecon add`.");
        return Ok(0);
    }

    PrettyPrinter::print_monitor_list(&summarize_monitors(&workspace, &config)?);
    let handle = Scheduler::spawn(Arc::clone(&monitor))?;

    match max_runtime {
        Some(secs) => {
            std::thread::sleep(Duration::from_secs(secs));
            handle.shutdown();
            Ok(0)
        }
        None => loop {
            std::thread::park();
        },
    }
}

/// List registered monitors
fn list_command(workspace_path: Option<&Path>, format: &str) -> Result<i32> {
    let format = parse_format(format)?;
    let workspace = ReconWorkspace::open(workspace_path)?;
    let config = workspace.load_config()?;
    let monitors = summarize_monitors(&workspace, &config)?;

    match format {
        OutputFormat::Pretty => PrettyPrinter::print_monitor_list(&monitors),
        OutputFormat::Json => println!("{}", JsonFormatter::format(&monitors)?),
    }
    Ok(0)
}

/// Show recorded results of one monitor
fn history_command(workspace_path: Option<&Path>, rule: &str, limit: Option<usize>, format: &str) -> Result<i32> {
    let format = parse_format(format)?;
    let workspace = ReconWorkspace::open(workspace_path)?;
    let config = workspace.load_config()?;

    let mut results = workspace.load_history(rule)?;
    if results.is_empty() && config.monitor(rule).is_none() {
        return Err(ReconError::rule_not_found(rule));
    }
    if let Some(limit) = limit {
        let skip = results.len().saturating_sub(limit);
        results.drain(..skip);
    }

    match format {
        OutputFormat::Pretty => PrettyPrinter::print_history(rule, &results),
        OutputFormat::Json => println!("{}", JsonFormatter::format(&results)?),
    }
    Ok(0)
}

/// Validate records against a named schema
fn validate_command(workspace_path: Option<&Path>, schema: &str, record: &Path, format: &str) -> Result<i32> {
    let format = parse_format(format)?;
    let workspace = ReconWorkspace::open(workspace_path)?;
    let config = workspace.load_config()?;

    let schemas_dir = workspace.resolve(
        config
            .schemas_dir
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_SCHEMAS_DIR)),
    );
    let registry = JsonSchemaRegistry::load_dir(&schemas_dir)?;

    let content = std::fs::read_to_string(record).map_err(|e| {
        ReconError::invalid_input(format!("cannot read record file {}: {}", record.display(), e))
    })?;
    let parsed: serde_json::Value = serde_json::from_str(&content)?;
    let records = match parsed {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };

    let results: Vec<_> = records.iter().map(|r| registry.validate(schema, r)).collect();
    match format {
        OutputFormat::Pretty => PrettyPrinter::print_validation(&results),
        OutputFormat::Json => println!("{}", JsonFormatter::format(&results)?),
    }
    Ok(if results.iter().all(|r| r.valid) { 0 } else { 1 })
}

/// Registry, engine and DuckDB resolver wired to the workspace history
fn build_monitor(workspace: &ReconWorkspace, config: &AppConfig) -> Result<Monitor> {
    let registry = Arc::new(config.build_registry()?);
    workspace.restore_history(&registry)?;
    let engine = Arc::new(DiffEngine::new(config.engine.clone())?);

    let monitor = Monitor::new(registry, engine, Arc::new(DuckDbResolver::new()))
        .with_sink(Arc::new(workspace.clone()));
    Ok(match config.timeout() {
        Some(timeout) => monitor.with_default_timeout(timeout),
        None => monitor,
    })
}

fn summarize_monitors(workspace: &ReconWorkspace, config: &AppConfig) -> Result<Vec<MonitorSummary>> {
    let now = Utc::now();
    let mut summaries = Vec::with_capacity(config.monitors.len());
    for monitor in &config.monitors {
        let next_fire = CronSchedule::parse(&monitor.schedule).ok().and_then(|s| s.next_after(now));
        let history = workspace.load_history(&monitor.name)?;
        let last = history.last();
        summaries.push(MonitorSummary {
            name: monitor.name.clone(),
            description: monitor.description.clone(),
            source: monitor.source.to_string(),
            target: monitor.target.to_string(),
            rule: monitor.rule.to_string(),
            schedule: monitor.schedule.clone(),
            next_fire,
            last_outcome: last.map(MonitorResult::outcome),
            last_run: last.map(|r| r.started_at),
        });
    }
    Ok(summaries)
}

fn dataset_pair(
    source: &str,
    target: &str,
    keys: &[String],
    columns: &[String],
    database: Option<String>,
    target_database: Option<String>,
) -> Result<(DatasetRef, DatasetRef)> {
    let mut source_ref = DatasetRef::new(source, keys.iter().cloned(), columns.iter().cloned())?;
    let mut target_ref = DatasetRef::new(target, keys.iter().cloned(), columns.iter().cloned())?;
    if let Some(db) = &database {
        source_ref = source_ref.with_connection(resolve_database(db));
    }
    if let Some(db) = target_database.as_ref().or(database.as_ref()) {
        target_ref = target_ref.with_connection(resolve_database(db));
    }
    Ok((source_ref, target_ref))
}

/// Absolute database paths keep monitors stable across working directories
fn resolve_database(db: &str) -> String {
    let path = PathBuf::from(db);
    if db == crate::duckdb_source::IN_MEMORY || path.is_absolute() {
        return db.to_string();
    }
    path.canonicalize()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| db.to_string())
}

fn parse_rule(rule: &str) -> Result<Rule> {
    rule.parse::<Rule>().map_err(ReconError::invalid_input)
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    OutputFormat::parse(format).map_err(ReconError::invalid_input)
}
