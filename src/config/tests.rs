use super::*;
use serial_test::serial;
use std::env;

fn cleanup_test_env() {
    for key in [
        "DEFAULT_PRIORITY",
        "RETRY_BACKOFF_FACTOR",
        "VISIBILITY_TIMEOUT",
        "MIN_WORKERS",
        "MAX_WORKERS",
        "MAX_CONCURRENT_TASKS",
        "MAX_USER_CONCURRENT_TASKS",
        "EXECUTION_UID",
        "EXECUTION_GID",
        "STORE_HOST",
        "STORE_PORT",
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn loads_defaults_when_env_is_empty() {
    cleanup_test_env();
    let config = Config::load().expect("defaults alone must be loadable");
    assert_eq!(config.queue.default_priority, 5);
    assert_eq!(config.worker.min_workers, 2);
    assert!(config.executor.execution_uid != 0);
    cleanup_test_env();
}

#[test]
#[serial]
fn rejects_out_of_range_default_priority() {
    cleanup_test_env();
    env::set_var("DEFAULT_PRIORITY", "11");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn rejects_backoff_factor_not_greater_than_one() {
    cleanup_test_env();
    env::set_var("RETRY_BACKOFF_FACTOR", "1.0");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn rejects_zero_visibility_timeout() {
    cleanup_test_env();
    env::set_var("VISIBILITY_TIMEOUT", "0");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn rejects_inverted_worker_bounds() {
    cleanup_test_env();
    env::set_var("MIN_WORKERS", "10");
    env::set_var("MAX_WORKERS", "2");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn rejects_root_execution_user() {
    cleanup_test_env();
    env::set_var("EXECUTION_UID", "0");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn loads_values_from_dotenv_file() {
    cleanup_test_env();
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join(".env"), "DEFAULT_PRIORITY=7\n").expect("write .env");

    let original_cwd = env::current_dir().expect("cwd");
    env::set_current_dir(dir.path()).expect("chdir into tempdir");
    let result = Config::load();
    env::set_current_dir(original_cwd).expect("restore cwd");
    cleanup_test_env();

    let config = result.expect(".env-provided values must be loadable");
    assert_eq!(config.queue.default_priority, 7);
}

#[test]
#[serial]
fn store_config_builds_redis_url_with_password() {
    cleanup_test_env();
    let config = StoreConfig {
        host: "db.internal".to_string(),
        port: 6380,
        password: Some("hunter2".to_string()),
        database: 3,
        pool_size: 5,
        min_idle_connections: 1,
        max_retries: 3,
        dial_timeout_ms: 1000,
        read_timeout_ms: 1000,
        write_timeout_ms: 1000,
        idle_timeout_ms: 1000,
    };
    assert_eq!(config.redis_url(), "redis://:hunter2@db.internal:6380/3");
}
