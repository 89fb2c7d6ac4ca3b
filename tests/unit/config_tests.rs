//! Unit tests for the configuration file format

use tabrecon::config::AppConfig;
use tabrecon::monitor::CheckMode;
use tabrecon::{Operator, ReconError, Rule};
use tempfile::TempDir;

const HAND_WRITTEN: &str = r#"{
    "version": "1.0.0",
    "engine": {"parallelism": 2, "chunk_size": 5000},
    "history_retention": 20,
    "schemas_dir": "contracts",
    "monitors": [
        {
            "name": "orders_ods_dwd",
            "description": "ODS to DWD order sync",
            "source": {"name": "ods_orders", "key_columns": ["id"], "compare_columns": ["amount", "status"]},
            "target": {"name": "dwd_orders", "connection": "warehouse.duckdb", "key_columns": ["id"], "compare_columns": ["amount", "status"]},
            "rule": {"type": "diff_percent", "operator": "gt", "value": 0.1},
            "schedule": "0 2 * * *"
        },
        {
            "name": "daily_summary_counts",
            "source": {"name": "dwd_orders", "key_columns": ["id"]},
            "target": {"name": "dws_daily_orders", "key_columns": ["id"]},
            "rule": {"type": "row_count_delta", "operator": "gte", "value": 100},
            "schedule": "30 3 * * *",
            "mode": "row_count"
        }
    ]
}"#;

fn write_config(content: &str) -> (TempDir, std::path::PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, content).unwrap();
    (temp_dir, path)
}

#[test]
fn test_hand_written_config_loads() {
    let (_temp_dir, path) = write_config(HAND_WRITTEN);
    let config = AppConfig::load(&path).unwrap();

    assert_eq!(config.engine.parallelism, 2);
    assert_eq!(config.engine.chunk_size, 5000);
    assert_eq!(config.engine.max_chunks_per_worker, tabrecon::DEFAULT_MAX_CHUNKS_PER_WORKER);
    assert_eq!(config.history_retention, 20);
    assert_eq!(config.schemas_dir.as_deref().and_then(|p| p.to_str()), Some("contracts"));
    assert_eq!(config.monitors.len(), 2);

    let orders = config.monitor("orders_ods_dwd").unwrap();
    assert_eq!(orders.mode, CheckMode::Diff);
    assert_eq!(orders.target.connection(), Some("warehouse.duckdb"));
    assert_eq!(orders.rule, Rule::DiffPercentThreshold { operator: Operator::Gt, value: 0.1 });

    let counts = config.monitor("daily_summary_counts").unwrap();
    assert_eq!(counts.mode, CheckMode::RowCount);
    assert!(counts.description.is_empty());
    assert!(counts.source.compare_columns().is_empty());

    let registry = config.build_registry().unwrap();
    assert_eq!(registry.names(), vec!["orders_ods_dwd", "daily_summary_counts"]);
    assert_eq!(registry.retention(), 20);
}

#[test]
fn test_config_round_trips_through_save() {
    let (temp_dir, path) = write_config(HAND_WRITTEN);
    let config = AppConfig::load(&path).unwrap();

    let copy = temp_dir.path().join("copy.json");
    config.save(&copy).unwrap();
    assert_eq!(AppConfig::load(&copy).unwrap(), config);
}

#[test]
fn test_dataset_without_keys_is_rejected_on_load() {
    let content = HAND_WRITTEN.replacen(r#""key_columns": ["id"], "compare_columns": ["amount", "status"]}"#, r#""key_columns": []}"#, 1);
    let (_temp_dir, path) = write_config(&content);
    assert!(AppConfig::load(&path).is_err());
}

#[test]
fn test_invalid_monitor_fails_registry_build() {
    let content = HAND_WRITTEN.replace("30 3 * * *", "at half past three");
    let (_temp_dir, path) = write_config(&content);
    let config = AppConfig::load(&path).unwrap();

    let err = config.build_registry().unwrap_err();
    assert!(matches!(err, ReconError::Config { .. }), "got {:?}", err);
    assert!(err.to_string().contains("daily_summary_counts"));
}

#[test]
fn test_row_count_mode_with_diff_rule_fails_registry_build() {
    let content = HAND_WRITTEN.replace(
        r#"{"type": "row_count_delta", "operator": "gte", "value": 100}"#,
        r#"{"type": "exact_match"}"#,
    );
    let (_temp_dir, path) = write_config(&content);
    let config = AppConfig::load(&path).unwrap();
    assert!(matches!(config.build_registry(), Err(ReconError::Config { .. })));
}

#[test]
fn test_malformed_json_is_an_error() {
    let (_temp_dir, path) = write_config("{ not json");
    assert!(matches!(AppConfig::load(&path), Err(ReconError::Json(_))));
}
