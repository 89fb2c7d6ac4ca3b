//! Edge case tests for unusual data

use crate::common::{assertions, engine, sample_data};
use tabrecon::dataset::{DatasetRef, KeyValue, RowKey, RowSnapshot, Value};
use tabrecon::duckdb_source::DuckDbResolver;
use tabrecon::source::MemorySource;
use tabrecon::{evaluate, CancelToken, DiffErrorKind, Outcome, Rule, SourceResolver};

fn dataset(name: &str) -> DatasetRef {
    DatasetRef::new(name, ["id"], ["value"]).unwrap()
}

fn row(key: RowKey, value: impl Into<Value>) -> RowSnapshot {
    RowSnapshot::new(key).with_value("value", value)
}

#[test]
fn test_both_sides_empty() {
    let source = MemorySource::new(dataset("a"));
    let target = MemorySource::new(dataset("b"));

    let stats = engine(4, 10).compare(&source, &target, &CancelToken::unbounded()).unwrap();
    assertions::assert_stats(&stats, 0, 0, 0, 0);
    assert_eq!(stats.diff_percent(), 0.0);
    assert!(evaluate("empty", &stats, &Rule::ExactMatch, chrono::Utc::now()).passed());
}

#[test]
fn test_one_side_empty() {
    let source = sample_data::orders("ods_orders", 1..=250);
    let target = MemorySource::new(sample_data::orders_dataset("dwd_orders"));

    let stats = engine(4, 10).compare(&source, &target, &CancelToken::unbounded()).unwrap();
    assertions::assert_stats(&stats, 250, 0, 0, 0);
    assert_eq!(stats.diff_percent(), 100.0);

    let reversed = engine(4, 10).compare(&target, &source, &CancelToken::unbounded()).unwrap();
    assertions::assert_stats(&reversed, 0, 250, 0, 0);
}

#[test]
fn test_single_row() {
    let source = sample_data::orders("ods_orders", [42]);
    let target = sample_data::orders("dwd_orders", [42]);

    let stats = engine(8, 1).compare(&source, &target, &CancelToken::unbounded()).unwrap();
    assertions::assert_stats(&stats, 0, 0, 0, 1);
}

#[test]
fn test_extreme_integer_keys() {
    let keys = [i64::MIN, -1, 0, 1, i64::MAX];
    let source = MemorySource::new(dataset("a")).with_rows(keys.iter().map(|k| row(RowKey::int(*k), 1i64)));
    let target = MemorySource::new(dataset("b")).with_rows(keys.iter().skip(1).map(|k| row(RowKey::int(*k), 1i64)));

    for (parallelism, chunk_size) in [(1, 1), (4, 1), (4, 1000)] {
        let stats = engine(parallelism, chunk_size)
            .compare(&source, &target, &CancelToken::unbounded())
            .unwrap();
        assertions::assert_stats(&stats, 1, 0, 0, 4);
    }
}

#[test]
fn test_sparse_integer_keys() {
    // Huge gaps leave most interpolated chunks empty
    let ids = [1, 2, 3, 1_000_000_000, 1_000_000_001, 5_000_000_000];
    let source = MemorySource::new(dataset("a")).with_rows(ids.iter().map(|k| row(RowKey::int(*k), *k)));
    let target = MemorySource::new(dataset("b")).with_rows(ids.iter().map(|k| row(RowKey::int(*k), *k)));

    let stats = engine(4, 1).compare(&source, &target, &CancelToken::unbounded()).unwrap();
    assertions::assert_stats(&stats, 0, 0, 0, 6);
}

#[test]
fn test_text_is_never_coerced_to_number() {
    let source = MemorySource::new(dataset("a")).with_rows([row(RowKey::int(1), 99i64), row(RowKey::int(2), "7")]);
    let target = MemorySource::new(dataset("b")).with_rows([row(RowKey::int(1), "99"), row(RowKey::int(2), "7")]);

    let stats = engine(1, 10).compare(&source, &target, &CancelToken::unbounded()).unwrap();
    assertions::assert_stats(&stats, 0, 0, 1, 1);
}

#[test]
fn test_null_values() {
    let source = MemorySource::new(dataset("a")).with_rows([
        row(RowKey::int(1), Value::Null),
        row(RowKey::int(2), Value::Null),
        row(RowKey::int(3), 0i64),
    ]);
    let target = MemorySource::new(dataset("b")).with_rows([
        row(RowKey::int(1), Value::Null),
        row(RowKey::int(2), 0i64),
        row(RowKey::int(3), Value::Null),
    ]);

    let stats = engine(1, 10).compare(&source, &target, &CancelToken::unbounded()).unwrap();
    assertions::assert_stats(&stats, 0, 0, 2, 1);
}

#[test]
fn test_unicode_text_keys() {
    let names = ["Café", "Naïve", "北京", "🚀", "Zürich", "ascii"];
    let source = MemorySource::new(dataset("a")).with_rows(names.iter().map(|n| row(RowKey::text(*n), 1i64)));
    let target = MemorySource::new(dataset("b")).with_rows(
        names
            .iter()
            .filter(|n| **n != "北京")
            .map(|n| row(RowKey::text(*n), if *n == "🚀" { 2i64 } else { 1i64 })),
    );

    let stats = engine(3, 1).compare(&source, &target, &CancelToken::unbounded()).unwrap();
    assertions::assert_stats(&stats, 1, 0, 1, 4);
}

#[test]
fn test_keys_that_only_differ_in_later_components() {
    let dataset = |name: &str| DatasetRef::new(name, ["day", "shop"], ["value"]).unwrap();
    let key = |day: i64, shop: &str| RowKey::new(vec![KeyValue::Int(day), KeyValue::Text(shop.to_string())]);

    let source = MemorySource::new(dataset("a")).with_rows((1..=30).flat_map(|day| {
        ["north", "south"].into_iter().map(move |shop| row(key(day, shop), day))
    }));
    let mut target = source.clone();
    target.insert(row(key(15, "east"), 15i64));

    let stats = engine(4, 3).compare(&source, &target, &CancelToken::unbounded()).unwrap();
    assertions::assert_stats(&stats, 0, 1, 0, 60);
}

#[test]
fn test_expired_deadline_is_timeout() {
    let source = sample_data::orders("ods_orders", 1..=10);
    let target = sample_data::orders("dwd_orders", 1..=10);
    let expired = CancelToken::new(Some(std::time::Instant::now()));

    let err = engine(2, 5).compare(&source, &target, &expired).unwrap_err();
    assert_eq!(err.kind, DiffErrorKind::Timeout);

    let cancelled = CancelToken::unbounded();
    cancelled.cancel();
    let err = engine(2, 5).count_rows(&source, &target, &cancelled).unwrap_err();
    assert_eq!(err.kind, DiffErrorKind::Timeout);
}

#[test]
fn test_duplicate_keys_in_table_are_query_failure() {
    let resolver = DuckDbResolver::new();
    resolver
        .connection(":memory:")
        .unwrap()
        .execute_batch(
            "CREATE TABLE ods_dupes AS SELECT * FROM (VALUES (1, 'a'), (2, 'b'), (2, 'c')) t(id, value);
             CREATE TABLE dwd_clean AS SELECT * FROM (VALUES (1, 'a'), (2, 'b')) t(id, value);",
        )
        .unwrap();

    let source = resolver.open(&dataset("ods_dupes")).unwrap();
    let target = resolver.open(&dataset("dwd_clean")).unwrap();
    let err = engine(1, 1000)
        .compare(source.as_ref(), target.as_ref(), &CancelToken::unbounded())
        .unwrap_err();
    assert_eq!(err.kind, DiffErrorKind::QueryFailure);
}

#[test]
fn test_null_key_in_table_is_query_failure() {
    let resolver = DuckDbResolver::new();
    resolver
        .connection(":memory:")
        .unwrap()
        .execute_batch(
            "CREATE TABLE ods_nullable AS SELECT * FROM (VALUES (1, 'a'), (NULL, 'b')) t(id, value);
             CREATE TABLE dwd_nullable AS SELECT * FROM (VALUES (1, 'a')) t(id, value);",
        )
        .unwrap();

    let source = resolver.open(&dataset("ods_nullable")).unwrap();
    let target = resolver.open(&dataset("dwd_nullable")).unwrap();
    let err = engine(1, 1000)
        .compare(source.as_ref(), target.as_ref(), &CancelToken::unbounded())
        .unwrap_err();
    assert_eq!(err.kind, DiffErrorKind::QueryFailure);
}

#[test]
fn test_missing_table_column_is_schema_mismatch() {
    let resolver = DuckDbResolver::new();
    resolver
        .connection(":memory:")
        .unwrap()
        .execute_batch("CREATE TABLE narrow AS SELECT 1 AS id;")
        .unwrap();

    let source = resolver.open(&dataset("narrow")).unwrap();
    let err = engine(1, 10)
        .compare(source.as_ref(), source.as_ref(), &CancelToken::unbounded())
        .unwrap_err();
    assert_eq!(err.kind, DiffErrorKind::SchemaMismatch);
}

#[test]
fn test_rule_outcome_on_errored_stats_is_not_pass() {
    let result = tabrecon::CheckResult::errored(
        "offline",
        &Rule::ExactMatch,
        tabrecon::DiffError::timeout("deadline exceeded"),
        chrono::Utc::now(),
    );
    assert_eq!(result.outcome, Outcome::Errored);
    assert!(!result.passed());
}
