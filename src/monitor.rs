//! Monitor rules, run history, the rule registry and the run executor

use crate::compare::pair_columns;
use crate::cron::CronSchedule;
use crate::dataset::DatasetRef;
use crate::engine::{DiffEngine, DiffStats};
use crate::error::{DiffError, ReconError, Result};
use crate::rule::{evaluate, CheckResult, Outcome, Rule};
use crate::source::{CancelToken, SourceResolver};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What a monitor collects before evaluating its rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    /// Key-level diff through the engine
    #[default]
    Diff,
    /// Row totals only; requires a row-count-delta rule
    RowCount,
}

/// A named, scheduled reconciliation check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source: DatasetRef,
    pub target: DatasetRef,
    pub rule: Rule,
    pub schedule: String,
    #[serde(default)]
    pub mode: CheckMode,
}

impl MonitorRule {
    pub fn new(
        name: impl Into<String>,
        source: DatasetRef,
        target: DatasetRef,
        rule: Rule,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            source,
            target,
            rule,
            schedule: schedule.into(),
            mode: CheckMode::Diff,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_mode(mut self, mode: CheckMode) -> Self {
        self.mode = mode;
        self
    }

    /// Registration-time checks. Returns the parsed schedule.
    pub fn validate(&self) -> Result<CronSchedule> {
        if self.name.trim().is_empty() {
            return Err(ReconError::config("monitor rule name must not be empty"));
        }
        self.rule.validate()?;
        pair_columns(&self.source, &self.target)
            .map_err(|e| ReconError::config(format!("monitor '{}': {}", self.name, e.cause)))?;
        if self.mode == CheckMode::RowCount && self.rule.needs_key_diff() {
            return Err(ReconError::config(format!(
                "monitor '{}': row-count mode only supports row_count_delta rules, not {}",
                self.name,
                self.rule.metric_name()
            )));
        }
        CronSchedule::parse(&self.schedule)
            .map_err(|e| ReconError::config(format!("monitor '{}': {}", self.name, e)))
    }
}

/// One execution of a monitor rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorResult {
    pub run_id: Uuid,
    pub rule_name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub result: CheckResult,
}

impl MonitorResult {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn outcome(&self) -> Outcome {
        self.result.outcome
    }
}

impl AsRef<CheckResult> for MonitorResult {
    fn as_ref(&self) -> &CheckResult {
        &self.result
    }
}

/// Bounded, chronologically ordered results for one rule
#[derive(Debug, Clone)]
pub struct MonitorHistory {
    retention: usize,
    entries: VecDeque<MonitorResult>,
}

impl MonitorHistory {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Append, evicting the oldest entries past retention
    pub fn push(&mut self, result: MonitorResult) {
        self.entries.push_back(result);
        while self.entries.len() > self.retention {
            self.entries.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&MonitorResult> {
        self.entries.back()
    }

    pub fn snapshot(&self) -> Vec<MonitorResult> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Execution state of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    /// Execution error being reported; returns to `Idle` right after
    Failed,
}

/// Per-rule mutable state. The executor holding the run guard is the only writer.
#[derive(Debug)]
pub struct RuleState {
    status: Mutex<RunStatus>,
    history: RwLock<MonitorHistory>,
}

impl RuleState {
    fn new(retention: usize) -> Self {
        Self {
            status: Mutex::new(RunStatus::Idle),
            history: RwLock::new(MonitorHistory::new(retention)),
        }
    }

    pub fn status(&self) -> RunStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the single-flight slot, or `None` if a run is in progress
    fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == RunStatus::Running {
            return None;
        }
        *status = RunStatus::Running;
        Some(RunGuard {
            state: Arc::clone(self),
        })
    }

    pub fn history(&self) -> Vec<MonitorResult> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    fn record(&self, result: MonitorResult) {
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result);
    }

    fn set_status(&self, next: RunStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// Held for the duration of one run; releases the slot on drop
struct RunGuard {
    state: Arc<RuleState>,
}

impl RunGuard {
    fn complete(self, result: MonitorResult) {
        if result.outcome() == Outcome::Errored {
            self.state.set_status(RunStatus::Failed);
        }
        self.state.record(result);
        // Drop returns the rule to Idle
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.set_status(RunStatus::Idle);
    }
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    rule: Arc<MonitorRule>,
    schedule: CronSchedule,
    state: Arc<RuleState>,
}

/// Named monitor rules. Safe to mutate while the scheduler is running.
#[derive(Debug)]
pub struct MonitorRegistry {
    rules: RwLock<IndexMap<String, RegistryEntry>>,
    retention: usize,
    generation: Mutex<u64>,
    changed: Condvar,
}

impl MonitorRegistry {
    pub fn new(retention: usize) -> Self {
        Self {
            rules: RwLock::new(IndexMap::new()),
            retention: retention.max(1),
            generation: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Register a new rule. Fails if the name is taken.
    pub fn add_rule(&self, rule: MonitorRule) -> Result<()> {
        let schedule = rule.validate()?;
        {
            let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            if rules.contains_key(&rule.name) {
                return Err(ReconError::config(format!(
                    "monitor rule '{}' is already registered",
                    rule.name
                )));
            }
            log::info!("Registered monitor rule '{}' ({})", rule.name, schedule);
            rules.insert(
                rule.name.clone(),
                RegistryEntry {
                    rule: Arc::new(rule),
                    schedule,
                    state: Arc::new(RuleState::new(self.retention)),
                },
            );
        }
        self.notify();
        Ok(())
    }

    /// Replace an existing rule by name, keeping its history and run state.
    pub fn replace_rule(&self, rule: MonitorRule) -> Result<()> {
        let schedule = rule.validate()?;
        {
            let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            let entry = rules
                .get_mut(&rule.name)
                .ok_or_else(|| ReconError::rule_not_found(&rule.name))?;
            log::info!("Replaced monitor rule '{}' ({})", rule.name, schedule);
            entry.rule = Arc::new(rule);
            entry.schedule = schedule;
        }
        self.notify();
        Ok(())
    }

    /// Add or replace. Returns `true` when an existing rule was replaced.
    pub fn upsert_rule(&self, rule: MonitorRule) -> Result<bool> {
        let exists = self.get(&rule.name).is_some();
        if exists {
            self.replace_rule(rule)?;
        } else {
            self.add_rule(rule)?;
        }
        Ok(exists)
    }

    /// Unregister a rule. An in-flight run finishes but is no longer visible.
    pub fn remove_rule(&self, name: &str) -> Result<Arc<MonitorRule>> {
        let removed = {
            let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            rules
                .shift_remove(name)
                .ok_or_else(|| ReconError::rule_not_found(name))?
        };
        log::info!("Removed monitor rule '{}'", name);
        self.notify();
        Ok(removed.rule)
    }

    pub fn get(&self, name: &str) -> Option<Arc<MonitorRule>> {
        self.read().get(name).map(|e| Arc::clone(&e.rule))
    }

    /// Rule names in registration order
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn status(&self, name: &str) -> Result<RunStatus> {
        self.state(name).map(|s| s.status())
    }

    /// Immutable snapshot of a rule's history, oldest first
    pub fn history(&self, name: &str) -> Result<Vec<MonitorResult>> {
        self.state(name).map(|s| s.history())
    }

    /// Preload history, e.g. from a persisted store
    pub fn seed_history(&self, name: &str, results: impl IntoIterator<Item = MonitorResult>) -> Result<()> {
        let state = self.state(name)?;
        for result in results {
            state.record(result);
        }
        Ok(())
    }

    /// Current `(name, schedule)` pairs
    pub fn schedules(&self) -> Vec<(String, CronSchedule)> {
        self.read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.schedule.clone()))
            .collect()
    }

    /// Bumped on every registration change
    pub fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the generation moves past `seen` or `timeout` elapses.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> u64 {
        let guard = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |generation| *generation == seen)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Wake anyone blocked in [`wait_for_change`](Self::wait_for_change)
    pub fn notify(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        self.changed.notify_all();
    }

    fn entry(&self, name: &str) -> Option<(Arc<MonitorRule>, Arc<RuleState>)> {
        self.read()
            .get(name)
            .map(|e| (Arc::clone(&e.rule), Arc::clone(&e.state)))
    }

    fn state(&self, name: &str) -> Result<Arc<RuleState>> {
        self.entry(name)
            .map(|(_, state)| state)
            .ok_or_else(|| ReconError::rule_not_found(name))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, RegistryEntry>> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receives every completed run, e.g. to persist it
pub trait HistorySink: Send + Sync {
    fn record(&self, result: &MonitorResult, retention: usize) -> Result<()>;
}

/// Result of a trigger
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(MonitorResult),
    /// The rule was already running; nothing was started
    Skipped,
}

impl RunOutcome {
    pub fn result(&self) -> Option<&MonitorResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Skipped => None,
        }
    }
}

/// Executes registered rules: resolve sources, diff, evaluate, record.
pub struct Monitor {
    registry: Arc<MonitorRegistry>,
    engine: Arc<DiffEngine>,
    resolver: Arc<dyn SourceResolver>,
    default_timeout: Option<Duration>,
    sink: Option<Arc<dyn HistorySink>>,
}

impl Monitor {
    pub fn new(registry: Arc<MonitorRegistry>, engine: Arc<DiffEngine>, resolver: Arc<dyn SourceResolver>) -> Self {
        Self {
            registry,
            engine,
            resolver,
            default_timeout: None,
            sink: None,
        }
    }

    /// Deadline applied when a trigger does not specify one
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<MonitorRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<DiffEngine> {
        &self.engine
    }

    /// Synchronous out-of-band run honoring single-flight.
    pub fn run_now(&self, name: &str, timeout: Option<Duration>) -> Result<RunOutcome> {
        let (rule, state) = self
            .registry
            .entry(name)
            .ok_or_else(|| ReconError::rule_not_found(name))?;

        let guard = match state.try_begin() {
            Some(guard) => guard,
            None => {
                log::warn!("Skipped run of '{}': previous run still in progress", name);
                return Ok(RunOutcome::Skipped);
            }
        };

        let result = self.execute(&rule, timeout);
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(&result, self.registry.retention()) {
                log::warn!("Failed to persist result of '{}': {}", name, e);
            }
        }
        guard.complete(result.clone());
        Ok(RunOutcome::Completed(result))
    }

    /// Run every registered rule once, concurrently. Results follow
    /// registration order.
    pub fn run_all(&self, timeout: Option<Duration>) -> Vec<(String, Result<RunOutcome>)> {
        let names = self.registry.names();
        std::thread::scope(|scope| {
            let handles: Vec<_> = names
                .iter()
                .map(|name| scope.spawn(move || self.run_now(name, timeout)))
                .collect();
            names
                .iter()
                .zip(handles)
                .map(|(name, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        Err(ReconError::config(format!("run of '{}' panicked", name)))
                    });
                    (name.clone(), outcome)
                })
                .collect()
        })
    }

    fn execute(&self, rule: &MonitorRule, timeout: Option<Duration>) -> MonitorResult {
        let started = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let cancel = match timeout.or(self.default_timeout) {
            Some(t) => CancelToken::with_timeout(t),
            None => CancelToken::unbounded(),
        };

        log::info!("Running monitor '{}' ({} -> {})", rule.name, rule.source, rule.target);
        let result = match self.collect(rule, &cancel) {
            Ok(stats) => evaluate(&rule.name, &stats, &rule.rule, Utc::now()),
            Err(error) => {
                log::error!("Monitor '{}' could not run: {}", rule.name, error);
                CheckResult::errored(&rule.name, &rule.rule, error, Utc::now())
            }
        };

        match result.outcome {
            Outcome::Passed => log::info!("Monitor '{}' passed: {}", rule.name, result.message),
            Outcome::Failed => log::warn!("Monitor '{}' failed: {}", rule.name, result.message),
            Outcome::Errored => {}
        }

        MonitorResult {
            run_id,
            rule_name: rule.name.clone(),
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            result,
        }
    }

    fn collect(&self, rule: &MonitorRule, cancel: &CancelToken) -> std::result::Result<DiffStats, DiffError> {
        let source = self.resolver.open(&rule.source)?;
        let target = self.resolver.open(&rule.target)?;
        match rule.mode {
            CheckMode::Diff => self.engine.compare(source.as_ref(), target.as_ref(), cancel),
            CheckMode::RowCount => self.engine.count_rows(source.as_ref(), target.as_ref(), cancel),
        }
    }
}
