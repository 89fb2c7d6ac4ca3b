//! Filesystem edge cases: corrupted, missing and oddly named files

use crate::common::{sample_data, CliTestRunner, TestFixture};
use chrono::Utc;
use std::fs;
use tabrecon::schema::{JsonSchemaRegistry, SchemaValidator};
use tabrecon::{evaluate, DiffStats, MonitorResult, ReconError, Rule};

fn passing_result(rule_name: &str) -> MonitorResult {
    let now = Utc::now();
    MonitorResult {
        run_id: uuid::Uuid::new_v4(),
        rule_name: rule_name.to_string(),
        started_at: now,
        duration_ms: 12,
        result: evaluate(rule_name, &DiffStats::default(), &Rule::ExactMatch, now),
    }
}

#[test]
fn test_corrupted_config_fails_commands() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    fs::write(fixture.workspace.config_path(), "{ \"monitors\": [ oops").unwrap();

    let err = runner.expect_failure(&["list"]);
    assert!(matches!(err, ReconError::Json(_)), "got {:?}", err);

    let err = runner.expect_failure(&["run"]);
    assert!(matches!(err, ReconError::Json(_)), "got {:?}", err);
}

#[test]
fn test_init_force_repairs_corrupted_config() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    fs::write(fixture.workspace.config_path(), "not json at all").unwrap();

    runner.expect_success(&["init", "--force"]);
    assert!(fixture.workspace.load_config().unwrap().monitors.is_empty());
}

#[test]
fn test_missing_database_file_is_connection_error() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    let database = fixture.arg("warehouse.duckdb");

    runner.expect_exit_code(
        &["compare", "--source", "ods_orders", "--target", "dwd_orders", "--key", "id", "--database", &database],
        1,
    );
    assert!(!fixture.root().join("warehouse.duckdb").exists());
}

#[test]
fn test_header_only_csv_is_empty_dataset() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    fixture.create_csv_raw("empty.csv", "id,amount,status\n").unwrap();
    fixture.create_orders_csv("dwd_orders.csv", 1..=3).unwrap();

    // Whether the header-only file reads as empty or fails to sniff, the check fails
    let code = runner
        .run_command(&[
            "compare",
            "--source",
            &fixture.arg("empty.csv"),
            "--target",
            &fixture.arg("dwd_orders.csv"),
            "--key",
            "id",
        ])
        .unwrap();
    assert_eq!(code, 1);
}

#[test]
fn test_corrupted_record_file_is_rejected() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    fixture.create_schema("customer.json", &sample_data::customer_schema()).unwrap();
    fixture.create_corrupted_file("record.json").unwrap();
    fixture.create_csv_raw("truncated.json", "{\"customer_id\": 1, ").unwrap();

    let err = runner.expect_failure(&["validate", "--schema", "dwd/customer/v2", "--record", &fixture.arg("record.json")]);
    assert!(matches!(err, ReconError::InvalidInput { .. } | ReconError::Json(_)), "got {:?}", err);

    let err = runner.expect_failure(&["validate", "--schema", "dwd/customer/v2", "--record", &fixture.arg("truncated.json")]);
    assert!(matches!(err, ReconError::Json(_)), "got {:?}", err);

    let err = runner.expect_failure(&["validate", "--schema", "dwd/customer/v2", "--record", &fixture.arg("absent.json")]);
    assert!(matches!(err, ReconError::InvalidInput { .. }), "got {:?}", err);
}

#[test]
fn test_broken_schema_file_is_skipped() {
    let fixture = TestFixture::new().unwrap();
    fixture.create_schema("customer.json", &sample_data::customer_schema()).unwrap();
    fixture.create_csv_raw("schemas/broken.json", "{ \"type\": ").unwrap();
    fixture.create_csv_raw("schemas/uncompilable.json", "{\"type\": 5}").unwrap();
    fixture.create_csv_raw("schemas/notes.txt", "not a schema").unwrap();
    fixture.create_csv_raw("schemas/base_schema.json", "{\"definitions\": {}}").unwrap();
    fixture
        .create_csv_raw("schemas/ods/order.json", "{\"type\": \"object\", \"required\": [\"id\"]}")
        .unwrap();

    let registry = JsonSchemaRegistry::load_dir(&fixture.root().join("schemas")).unwrap();
    assert_eq!(registry.names(), vec!["dwd/customer/v2", "order"]);
    assert!(registry.validate("order", &serde_json::json!({"id": 1})).valid);
    assert!(!registry.validate("broken", &serde_json::json!({})).valid);
    assert!(!registry.validate("uncompilable", &serde_json::json!({})).valid);
}

#[test]
fn test_missing_schema_dir_yields_empty_registry() {
    let fixture = TestFixture::new().unwrap();
    let registry = JsonSchemaRegistry::load_dir(&fixture.root().join("schemas")).unwrap();
    assert!(registry.is_empty());

    let result = registry.validate("dwd/customer/v2", &sample_data::valid_customer());
    assert!(!result.valid);
    assert!(result.errors[0].contains("does not exist"));
}

#[test]
fn test_history_file_name_is_made_safe() {
    let fixture = TestFixture::new().unwrap();
    let name = "orders/eu west:daily";
    let path = fixture.workspace.history_path(name);

    assert_eq!(path.parent(), Some(fixture.workspace.history_dir.as_path()));
    assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("orders_eu_west_daily.jsonl"));

    let result = passing_result(name);
    fixture.workspace.append_history(&result, 10).unwrap();

    let history = fixture.workspace.load_history(name).unwrap();
    assert_eq!(history, vec![result]);
}

#[test]
fn test_history_of_unknown_rule_is_empty() {
    let fixture = TestFixture::new().unwrap();
    assert!(fixture.workspace.load_history("never_ran").unwrap().is_empty());
}

#[test]
fn test_deleted_history_dir_is_recreated_on_append() {
    let fixture = TestFixture::new().unwrap();
    fs::remove_dir_all(&fixture.workspace.history_dir).unwrap();

    let result = passing_result("orders");
    fixture.workspace.append_history(&result, 10).unwrap();
    assert_eq!(fixture.workspace.load_history("orders").unwrap().len(), 1);
}
