//! Environment-driven configuration tests

use footy_etl::config::{EtlConfig, DEFAULT_API_BASE_URL, DEFAULT_MYSQL_DB};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

const VARS: &[&str] = &[
    "MYSQL_HOST",
    "MYSQL_PORT",
    "MYSQL_DB",
    "SB_USERNAME",
    "SB_PASSWORD",
    "ETL_API_BASE_URL",
    "ETL_COMPETITION_IDS",
    "ETL_SEASON_IDS",
    "ETL_WORKERS",
    "ETL_DATA_DIR",
    "ETL_STRICT",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_without_environment() {
    clear_env();

    let config = EtlConfig::load().unwrap();

    assert_eq!(config.database.name, DEFAULT_MYSQL_DB);
    assert_eq!(config.database.port, 3306);
    assert_eq!(config.api.base_url, DEFAULT_API_BASE_URL);
    assert_eq!(config.scope.competition_ids, vec![7, 1267]);
    assert_eq!(config.scope.season_ids, vec![235, 108, 107]);
    assert_eq!(config.workers, 4);
    assert!(!config.strict);
}

#[test]
#[serial]
fn test_environment_overrides() {
    clear_env();
    env::set_var("MYSQL_HOST", "db.internal");
    env::set_var("MYSQL_PORT", "3307");
    env::set_var("MYSQL_DB", "football");
    env::set_var("ETL_COMPETITION_IDS", "11, 43");
    env::set_var("ETL_SEASON_IDS", "90");
    env::set_var("ETL_WORKERS", "8");
    env::set_var("ETL_DATA_DIR", "/tmp/footy");
    env::set_var("ETL_STRICT", "true");
    env::set_var("SB_USERNAME", "user");
    env::set_var("SB_PASSWORD", "secret");

    let config = EtlConfig::load().unwrap();

    assert_eq!(config.database.host, "db.internal");
    assert_eq!(config.database.port, 3307);
    assert_eq!(config.database.name, "football");
    assert_eq!(config.scope.competition_ids, vec![11, 43]);
    assert_eq!(config.scope.season_ids, vec![90]);
    assert_eq!(config.workers, 8);
    assert_eq!(config.data_dir, PathBuf::from("/tmp/footy"));
    assert!(config.strict);
    assert_eq!(config.api.username.as_deref(), Some("user"));

    clear_env();
}

#[test]
#[serial]
fn test_invalid_id_list_is_rejected() {
    clear_env();
    env::set_var("ETL_COMPETITION_IDS", "7,euro");

    assert!(EtlConfig::load().is_err());

    clear_env();
}

#[test]
#[serial]
fn test_zero_workers_is_rejected() {
    clear_env();
    env::set_var("ETL_WORKERS", "0");

    assert!(EtlConfig::load().is_err());

    clear_env();
}

#[test]
#[serial]
fn test_empty_season_list_is_rejected() {
    clear_env();
    env::set_var("ETL_SEASON_IDS", " , ");

    assert!(EtlConfig::load().is_err());

    clear_env();
}
