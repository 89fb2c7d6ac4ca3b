//! Integration tests for the monitor registry and run executor

use crate::common::{engine, sample_data, Behavior, Gate, ScriptedSource, TestFixture};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tabrecon::monitor::{CheckMode, RunStatus};
use tabrecon::source::{MemorySource, StaticResolver};
use tabrecon::{
    DiffError, DiffErrorKind, Monitor, MonitorRegistry, MonitorRule, Operator, Outcome, ReconError, Rule, RunOutcome,
    TabularSource,
};

fn rule(name: &str, source: &str, target: &str) -> MonitorRule {
    MonitorRule::new(
        name,
        sample_data::orders_dataset(source),
        sample_data::orders_dataset(target),
        Rule::ExactMatch,
        "0 2 * * *",
    )
}

fn monitor(resolver: StaticResolver, rules: Vec<MonitorRule>) -> Monitor {
    let registry = Arc::new(MonitorRegistry::new(10));
    for rule in rules {
        registry.add_rule(rule).unwrap();
    }
    Monitor::new(registry, Arc::new(engine(2, 50)), Arc::new(resolver))
}

fn source(source: impl TabularSource + 'static) -> Arc<dyn TabularSource> {
    Arc::new(source)
}

#[test]
fn test_run_now_records_history() {
    let resolver = StaticResolver::new()
        .with_source(source(sample_data::orders("ods_orders", 1..=100)))
        .with_source(source(sample_data::orders("dwd_orders", 1..=100)));
    let monitor = monitor(resolver, vec![rule("orders", "ods_orders", "dwd_orders")]);

    let outcome = monitor.run_now("orders", None).unwrap();
    let result = outcome.result().unwrap();
    assert_eq!(result.outcome(), Outcome::Passed);
    assert_eq!(result.result.stats.identical_count, 100);

    let history = monitor.registry().history("orders").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].run_id, result.run_id);
    assert_eq!(monitor.registry().status("orders").unwrap(), RunStatus::Idle);
}

#[test]
fn test_run_now_unknown_rule() {
    let monitor = monitor(StaticResolver::new(), Vec::new());
    let err = monitor.run_now("nope", None).unwrap_err();
    assert!(matches!(err, ReconError::RuleNotFound { .. }));
}

#[test]
fn test_run_now_is_skipped_while_running() {
    let gate = Gate::new();
    let resolver = StaticResolver::new()
        .with_source(source(ScriptedSource::new(
            sample_data::orders("ods_orders", 1..=10),
            Behavior::Gated(Arc::clone(&gate)),
        )))
        .with_source(source(sample_data::orders("dwd_orders", 1..=10)));
    let monitor = Arc::new(monitor(resolver, vec![rule("orders", "ods_orders", "dwd_orders")]));

    let background = {
        let monitor = Arc::clone(&monitor);
        thread::spawn(move || monitor.run_now("orders", None))
    };
    assert!(gate.wait_entered(Duration::from_secs(10)), "first run never reached the source");
    assert_eq!(monitor.registry().status("orders").unwrap(), RunStatus::Running);

    // Second trigger must not start another execution
    assert_eq!(monitor.run_now("orders", None).unwrap(), RunOutcome::Skipped);
    assert!(monitor.registry().history("orders").unwrap().is_empty());

    gate.open();
    let first = background.join().unwrap().unwrap();
    assert!(matches!(first, RunOutcome::Completed(_)));
    assert_eq!(monitor.registry().status("orders").unwrap(), RunStatus::Idle);

    // After completion a trigger runs normally
    let again = monitor.run_now("orders", None).unwrap();
    assert!(matches!(again, RunOutcome::Completed(_)));
    assert_eq!(monitor.registry().history("orders").unwrap().len(), 2);
}

#[test]
fn test_single_flight_is_per_rule() {
    let gate = Gate::new();
    let resolver = StaticResolver::new()
        .with_source(source(ScriptedSource::new(
            sample_data::orders("slow_orders", 1..=10),
            Behavior::Gated(Arc::clone(&gate)),
        )))
        .with_source(source(sample_data::orders("ods_orders", 1..=10)))
        .with_source(source(sample_data::orders("dwd_orders", 1..=10)));
    let monitor = Arc::new(monitor(
        resolver,
        vec![rule("slow", "slow_orders", "dwd_orders"), rule("fast", "ods_orders", "dwd_orders")],
    ));

    let background = {
        let monitor = Arc::clone(&monitor);
        thread::spawn(move || monitor.run_now("slow", None))
    };
    assert!(gate.wait_entered(Duration::from_secs(10)));

    let fast = monitor.run_now("fast", None).unwrap();
    assert_eq!(fast.result().map(|r| r.outcome()), Some(Outcome::Passed));

    gate.open();
    background.join().unwrap().unwrap();
}

#[test]
fn test_timeout_produces_errored_result() {
    let resolver = StaticResolver::new()
        .with_source(source(ScriptedSource::new(
            sample_data::orders("ods_orders", 1..=10),
            Behavior::Slow(Duration::from_secs(30)),
        )))
        .with_source(source(sample_data::orders("dwd_orders", 1..=10)));
    let monitor = monitor(resolver, vec![rule("orders", "ods_orders", "dwd_orders")]);

    let outcome = monitor.run_now("orders", Some(Duration::from_millis(100))).unwrap();
    let result = outcome.result().unwrap();
    assert_eq!(result.outcome(), Outcome::Errored);
    assert_eq!(result.result.error.as_ref().map(|e| e.kind), Some(DiffErrorKind::Timeout));
    assert!(result.duration() < Duration::from_secs(10));
    assert_eq!(monitor.registry().status("orders").unwrap(), RunStatus::Idle);
}

#[test]
fn test_default_timeout_applies() {
    let resolver = StaticResolver::new()
        .with_source(source(ScriptedSource::new(
            sample_data::orders("ods_orders", 1..=10),
            Behavior::Slow(Duration::from_secs(30)),
        )))
        .with_source(source(sample_data::orders("dwd_orders", 1..=10)));
    let monitor = monitor(resolver, vec![rule("orders", "ods_orders", "dwd_orders")])
        .with_default_timeout(Duration::from_millis(100));

    let outcome = monitor.run_now("orders", None).unwrap();
    assert_eq!(outcome.result().map(|r| r.outcome()), Some(Outcome::Errored));
}

#[test]
fn test_connection_failure_is_reported_not_raised() {
    let resolver = StaticResolver::new()
        .with_source(source(ScriptedSource::new(
            sample_data::orders("ods_orders", 1..=10),
            Behavior::Failing(DiffError::connection("connection reset by peer")),
        )))
        .with_source(source(sample_data::orders("dwd_orders", 1..=10)));
    let monitor = monitor(resolver, vec![rule("orders", "ods_orders", "dwd_orders")]);

    let outcome = monitor.run_now("orders", None).unwrap();
    let result = outcome.result().unwrap();
    assert_eq!(result.outcome(), Outcome::Errored);
    assert_eq!(result.result.error.as_ref().map(|e| e.kind), Some(DiffErrorKind::ConnectionFailure));
    // Failed runs report no partial stats
    assert_eq!(result.result.stats.diff_count(), 0);
    assert_eq!(monitor.registry().status("orders").unwrap(), RunStatus::Idle);
    assert_eq!(monitor.registry().history("orders").unwrap().len(), 1);
}

#[test]
fn test_unresolvable_dataset_is_errored() {
    let resolver = StaticResolver::new().with_source(source(sample_data::orders("ods_orders", 1..=10)));
    let monitor = monitor(resolver, vec![rule("orders", "ods_orders", "missing_orders")]);

    let outcome = monitor.run_now("orders", None).unwrap();
    let result = outcome.result().unwrap();
    assert_eq!(result.outcome(), Outcome::Errored);
    assert_eq!(result.result.error.as_ref().map(|e| e.kind), Some(DiffErrorKind::ConnectionFailure));
}

#[test]
fn test_row_count_mode_skips_key_diff() {
    let resolver = StaticResolver::new()
        .with_source(source(sample_data::orders("dwd_orders", 1..=100)))
        .with_source(source(sample_data::orders("dws_orders", 1..=50)));
    let counts = MonitorRule::new(
        "counts",
        sample_data::orders_dataset("dwd_orders"),
        sample_data::orders_dataset("dws_orders"),
        Rule::RowCountDeltaThreshold { operator: Operator::Gt, value: 100.0 },
        "0 3 * * *",
    )
    .with_mode(CheckMode::RowCount);
    let monitor = monitor(resolver, vec![counts]);

    let outcome = monitor.run_now("counts", None).unwrap();
    let result = outcome.result().unwrap();
    assert_eq!(result.outcome(), Outcome::Passed);
    assert!(result.result.stats.counts_only);
    assert_eq!(result.result.stats.row_count_delta(), 50);
}

#[test]
fn test_run_all_reports_in_registration_order() {
    let resolver = StaticResolver::new()
        .with_source(source(sample_data::orders("ods_orders", 1..=20)))
        .with_source(source(sample_data::orders("dwd_orders", 1..=20)))
        .with_source(source(sample_data::orders("dwd_partial", 1..=15)));
    let monitor = monitor(
        resolver,
        vec![
            rule("complete", "ods_orders", "dwd_orders"),
            rule("partial", "ods_orders", "dwd_partial"),
            rule("broken", "ods_orders", "nowhere"),
        ],
    );

    let outcomes = monitor.run_all(None);
    let names: Vec<&str> = outcomes.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["complete", "partial", "broken"]);

    let verdicts: Vec<Outcome> = outcomes
        .iter()
        .map(|(_, outcome)| outcome.as_ref().unwrap().result().unwrap().outcome())
        .collect();
    assert_eq!(verdicts, vec![Outcome::Passed, Outcome::Failed, Outcome::Errored]);
}

#[test]
fn test_history_is_bounded_by_retention() {
    let resolver = StaticResolver::new()
        .with_source(source(sample_data::orders("ods_orders", 1..=5)))
        .with_source(source(sample_data::orders("dwd_orders", 1..=5)));
    let registry = Arc::new(MonitorRegistry::new(3));
    registry.add_rule(rule("orders", "ods_orders", "dwd_orders")).unwrap();
    let monitor = Monitor::new(Arc::clone(&registry), Arc::new(engine(1, 10)), Arc::new(resolver));

    let mut run_ids = Vec::new();
    for _ in 0..5 {
        let outcome = monitor.run_now("orders", None).unwrap();
        run_ids.push(outcome.result().unwrap().run_id);
    }

    let kept: Vec<_> = registry.history("orders").unwrap().iter().map(|r| r.run_id).collect();
    assert_eq!(kept, run_ids[2..].to_vec());
}

#[test]
fn test_results_are_persisted_through_sink() {
    let fixture = TestFixture::new().unwrap();
    let resolver = StaticResolver::new()
        .with_source(source(sample_data::orders("ods_orders", 1..=5)))
        .with_source(source(sample_data::orders("dwd_orders", 2..=5)));
    let monitor = monitor(resolver, vec![rule("orders", "ods_orders", "dwd_orders")])
        .with_sink(Arc::new(fixture.workspace.clone()));

    monitor.run_now("orders", None).unwrap();
    monitor.run_now("orders", None).unwrap();

    let persisted = fixture.workspace.load_history("orders").unwrap();
    assert_eq!(persisted.len(), 2);
    assert!(persisted.iter().all(|r| r.outcome() == Outcome::Failed));
    assert_eq!(persisted, monitor.registry().history("orders").unwrap());
}

#[test]
fn test_registration_while_running() {
    let gate = Gate::new();
    let resolver = StaticResolver::new()
        .with_source(source(ScriptedSource::new(
            sample_data::orders("ods_orders", 1..=10),
            Behavior::Gated(Arc::clone(&gate)),
        )))
        .with_source(source(sample_data::orders("dwd_orders", 1..=10)));
    let monitor = Arc::new(monitor(resolver, vec![rule("orders", "ods_orders", "dwd_orders")]));

    let background = {
        let monitor = Arc::clone(&monitor);
        thread::spawn(move || monitor.run_now("orders", None))
    };
    assert!(gate.wait_entered(Duration::from_secs(10)));

    let registry = monitor.registry();
    registry.add_rule(rule("customers", "ods_orders", "dwd_orders")).unwrap();
    let mut replacement = rule("orders", "ods_orders", "dwd_orders");
    replacement.schedule = "15 4 * * *".to_string();
    registry.replace_rule(replacement).unwrap();
    registry.remove_rule("customers").unwrap();

    gate.open();
    background.join().unwrap().unwrap();

    // The in-flight run still lands in the replaced rule's history
    assert_eq!(registry.history("orders").unwrap().len(), 1);
    assert_eq!(registry.get("orders").map(|r| r.schedule.clone()), Some("15 4 * * *".to_string()));
}

#[test]
fn test_remove_unknown_rule() {
    let registry = MonitorRegistry::new(10);
    assert!(matches!(registry.remove_rule("ghost"), Err(ReconError::RuleNotFound { .. })));
    assert!(matches!(
        registry.replace_rule(rule("ghost", "a", "b")),
        Err(ReconError::RuleNotFound { .. })
    ));
    assert!(!registry.upsert_rule(rule("ghost", "a", "b")).unwrap());
    assert!(registry.upsert_rule(rule("ghost", "a", "c")).unwrap());
}

#[test]
fn test_missing_declared_column_is_schema_mismatch() {
    let partial = MemorySource::new(sample_data::orders_dataset("ods_orders")).with_columns(["id", "amount"]);
    let resolver = StaticResolver::new()
        .with_source(source(partial))
        .with_source(source(sample_data::orders("dwd_orders", 1..=3)));
    let monitor = monitor(resolver, vec![rule("orders", "ods_orders", "dwd_orders")]);

    let outcome = monitor.run_now("orders", None).unwrap();
    assert_eq!(
        outcome.result().and_then(|r| r.result.error.as_ref()).map(|e| e.kind),
        Some(DiffErrorKind::SchemaMismatch)
    );
}
