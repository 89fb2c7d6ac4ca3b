//! Unit tests for CLI argument parsing and validation

use clap::{CommandFactory, Parser};
use tabrecon::cli::{Cli, Commands, OutputFormat};

#[test]
fn test_cli_init_command() {
    let cli = Cli::try_parse_from(["tabrecon", "init"]).unwrap();
    match cli.command {
        Commands::Init { force } => assert!(!force),
        _ => panic!("Expected Init command"),
    }
}

#[test]
fn test_cli_init_command_with_force() {
    let cli = Cli::try_parse_from(["tabrecon", "init", "--force"]).unwrap();
    match cli.command {
        Commands::Init { force } => assert!(force),
        _ => panic!("Expected Init command"),
    }
}

#[test]
fn test_cli_run_command_defaults() {
    let cli = Cli::try_parse_from(["tabrecon", "run"]).unwrap();
    match cli.command {
        Commands::Run { rules, format, timeout } => {
            assert!(rules.is_empty());
            assert_eq!(format, "pretty");
            assert!(timeout.is_none());
        }
        _ => panic!("Expected Run command"),
    }
}

#[test]
fn test_cli_run_command_with_rules() {
    let cli = Cli::try_parse_from([
        "tabrecon", "run", "--rule", "orders", "--rule", "customers", "--format", "json", "--timeout", "30",
    ])
    .unwrap();
    match cli.command {
        Commands::Run { rules, format, timeout } => {
            assert_eq!(rules, vec!["orders", "customers"]);
            assert_eq!(format, "json");
            assert_eq!(timeout, Some(30));
        }
        _ => panic!("Expected Run command"),
    }
}

#[test]
fn test_cli_run_rejects_zero_timeout() {
    assert!(Cli::try_parse_from(["tabrecon", "run", "--timeout", "0"]).is_err());
}

#[test]
fn test_cli_compare_requires_key() {
    let result = Cli::try_parse_from(["tabrecon", "compare", "--source", "a", "--target", "b"]);
    assert!(result.is_err());
}

#[test]
fn test_cli_compare_command_with_options() {
    let cli = Cli::try_parse_from([
        "tabrecon",
        "compare",
        "--source",
        "ods_orders",
        "--target",
        "dwd_orders",
        "--key",
        "id",
        "--columns",
        "amount,status",
        "--database",
        "warehouse.duckdb",
        "--rule",
        "diff_percent>0.1",
        "--count-only",
    ])
    .unwrap();
    match cli.command {
        Commands::Compare {
            source,
            target,
            keys,
            columns,
            database,
            target_database,
            rule,
            count_only,
            ..
        } => {
            assert_eq!(source, "ods_orders");
            assert_eq!(target, "dwd_orders");
            assert_eq!(keys, vec!["id"]);
            assert_eq!(columns, vec!["amount", "status"]);
            assert_eq!(database.as_deref(), Some("warehouse.duckdb"));
            assert!(target_database.is_none());
            assert_eq!(rule, "diff_percent>0.1");
            assert!(count_only);
        }
        _ => panic!("Expected Compare command"),
    }
}

#[test]
fn test_cli_add_command() {
    let cli = Cli::try_parse_from([
        "tabrecon",
        "add",
        "orders",
        "--source",
        "ods_orders",
        "--target",
        "dwd_orders",
        "--key",
        "id",
        "--schedule",
        "0 2 * * *",
        "--description",
        "nightly ODS to DWD",
    ])
    .unwrap();
    match cli.command {
        Commands::Add {
            name,
            schedule,
            description,
            rule,
            replace,
            count_only,
            ..
        } => {
            assert_eq!(name, "orders");
            assert_eq!(schedule, "0 2 * * *");
            assert_eq!(description, "nightly ODS to DWD");
            assert_eq!(rule, "exact");
            assert!(!replace);
            assert!(!count_only);
        }
        _ => panic!("Expected Add command"),
    }
}

#[test]
fn test_cli_add_requires_schedule() {
    let result = Cli::try_parse_from([
        "tabrecon", "add", "orders", "--source", "a", "--target", "b", "--key", "id",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_cli_history_command() {
    let cli = Cli::try_parse_from(["tabrecon", "history", "orders", "--limit", "5"]).unwrap();
    match cli.command {
        Commands::History { rule, limit, format } => {
            assert_eq!(rule, "orders");
            assert_eq!(limit, Some(5));
            assert_eq!(format, "pretty");
        }
        _ => panic!("Expected History command"),
    }
}

#[test]
fn test_cli_validate_command() {
    let cli = Cli::try_parse_from(["tabrecon", "validate", "--schema", "dwd/customer/v2", "--record", "r.json"]).unwrap();
    match cli.command {
        Commands::Validate { schema, record, .. } => {
            assert_eq!(schema, "dwd/customer/v2");
            assert_eq!(record.to_str(), Some("r.json"));
        }
        _ => panic!("Expected Validate command"),
    }
}

#[test]
fn test_cli_schedule_command() {
    let cli = Cli::try_parse_from(["tabrecon", "schedule", "--max-runtime", "5"]).unwrap();
    match cli.command {
        Commands::Schedule { max_runtime } => assert_eq!(max_runtime, Some(5)),
        _ => panic!("Expected Schedule command"),
    }
}

#[test]
fn test_cli_schedule_help_mentions_restart() {
    let command = Cli::command();
    let schedule = command.find_subcommand("schedule").unwrap();
    assert_eq!(schedule.get_about().unwrap().to_string(), "Start the scheduler in the foreground");
    let long_about = schedule.get_long_about().unwrap().to_string();
    assert!(long_about.contains("once at startup"), "{}", long_about);
    assert!(long_about.contains("restarted"), "{}", long_about);
}

#[test]
fn test_cli_global_flags() {
    let cli = Cli::try_parse_from(["tabrecon", "list", "--workspace", "/tmp/project", "-v"]).unwrap();
    assert_eq!(cli.workspace.as_deref().and_then(|p| p.to_str()), Some("/tmp/project"));
    assert!(cli.verbose);
}

#[test]
fn test_output_format_parsing() {
    assert_eq!(OutputFormat::parse("pretty").unwrap(), OutputFormat::Pretty);
    assert_eq!(OutputFormat::parse("Json").unwrap(), OutputFormat::Json);
    assert!(OutputFormat::parse("yaml").is_err());
}

#[test]
fn test_cli_unknown_command() {
    assert!(Cli::try_parse_from(["tabrecon", "snapshot"]).is_err());
}
