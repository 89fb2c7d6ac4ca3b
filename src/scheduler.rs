//! Cron-driven dispatch of monitor rules
//!
//! One thread owns a table of next fire times and sleeps until the earliest
//! one, waking early when the registry changes. Each due rule runs on its own
//! thread; a tick that lands while the previous run is still going is dropped.

use crate::cron::CronSchedule;
use crate::error::{ReconError, Result};
use crate::monitor::{Monitor, RunOutcome, RunStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound on a single sleep, so clock jumps are picked up
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Next fire time per rule, kept in step with the registry
#[derive(Debug, Default)]
pub struct ScheduleTable {
    entries: HashMap<String, (CronSchedule, DateTime<Utc>)>,
}

impl ScheduleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop removed rules, add new ones and recompute rules whose schedule changed
    pub fn sync(&mut self, schedules: Vec<(String, CronSchedule)>, now: DateTime<Utc>) {
        let mut next = HashMap::with_capacity(schedules.len());
        for (name, schedule) in schedules {
            let fire_at = match self.entries.remove(&name) {
                Some((previous, fire_at)) if previous == schedule => Some(fire_at),
                _ => schedule.next_after(now),
            };
            match fire_at {
                Some(fire_at) => {
                    next.insert(name, (schedule, fire_at));
                }
                None => log::warn!("Schedule '{}' of '{}' has no upcoming fire time", schedule, name),
            }
        }
        self.entries = next;
    }

    /// Names due at `now`, advancing each to its following fire time.
    /// Missed ticks collapse into one.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut due = Vec::new();
        let mut exhausted = Vec::new();
        for (name, (schedule, fire_at)) in self.entries.iter_mut() {
            if *fire_at > now {
                continue;
            }
            due.push(name.clone());
            match schedule.next_after(now) {
                Some(next) => *fire_at = next,
                None => exhausted.push(name.clone()),
            }
        }
        for name in exhausted {
            self.entries.remove(&name);
        }
        due.sort();
        due
    }

    pub fn next_fire(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries.get(name).map(|(_, fire_at)| *fire_at)
    }

    /// Earliest pending fire time
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.entries.values().map(|(_, fire_at)| *fire_at).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Starts the dispatch loop for a [`Monitor`].
pub struct Scheduler;

impl Scheduler {
    pub fn spawn(monitor: Arc<Monitor>) -> Result<SchedulerHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let loop_monitor = Arc::clone(&monitor);
        let thread = thread::Builder::new()
            .name("tabrecon-scheduler".to_string())
            .spawn(move || run_loop(loop_monitor, flag))
            .map_err(|e| ReconError::config(format!("failed to start scheduler thread: {}", e)))?;

        log::info!("Scheduler started with {} monitor rule(s)", monitor.registry().len());
        Ok(SchedulerHandle {
            monitor,
            shutdown,
            thread: Some(thread),
        })
    }

    /// One scheduling pass at `now`: bring `table` in step with the registry
    /// and start a run for every due rule that is not already running.
    pub fn tick(monitor: &Arc<Monitor>, table: &mut ScheduleTable, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        table.sync(monitor.registry().schedules(), now);
        table
            .take_due(now)
            .into_iter()
            .filter_map(|name| dispatch(monitor, &name))
            .collect()
    }
}

/// Running scheduler. Dropping it stops the loop.
pub struct SchedulerHandle {
    monitor: Arc<Monitor>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<Vec<JoinHandle<()>>>>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stop dispatching and wait for in-flight runs to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.monitor.registry().notify();
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(in_flight) => {
                    for run in in_flight {
                        let _ = run.join();
                    }
                }
                Err(_) => log::error!("Scheduler thread panicked"),
            }
            log::info!("Scheduler stopped");
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(monitor: Arc<Monitor>, shutdown: Arc<AtomicBool>) -> Vec<JoinHandle<()>> {
    let registry = Arc::clone(monitor.registry());
    let mut table = ScheduleTable::new();
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
    let mut seen = registry.generation();

    while !shutdown.load(Ordering::SeqCst) {
        in_flight.extend(Scheduler::tick(&monitor, &mut table, Utc::now()));
        in_flight.retain(|handle| !handle.is_finished());

        let sleep = table
            .next_wake()
            .and_then(|wake| (wake - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
            .min(MAX_IDLE);
        let sleep = if table.is_empty() { MAX_IDLE } else { sleep };
        log::debug!("Scheduler sleeping for {:?}", sleep);
        seen = registry.wait_for_change(seen, sleep);
    }
    in_flight
}

fn dispatch(monitor: &Arc<Monitor>, name: &str) -> Option<JoinHandle<()>> {
    if let Ok(RunStatus::Running) = monitor.registry().status(name) {
        log::warn!("Skipped scheduled tick of '{}': previous run still in progress", name);
        return None;
    }

    let worker = Arc::clone(monitor);
    let rule_name = name.to_string();
    let spawned = thread::Builder::new()
        .name(format!("tabrecon-run-{}", name))
        .spawn(move || match worker.run_now(&rule_name, None) {
            Ok(RunOutcome::Completed(_)) | Ok(RunOutcome::Skipped) => {}
            // Rule was removed between the tick and the run
            Err(e) => log::debug!("Scheduled run of '{}' dropped: {}", rule_name, e),
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::error!("Failed to start run of '{}': {}", name, e);
            None
        }
    }
}
