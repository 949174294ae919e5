use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: i64,
    pub pool_size: u32,
    pub min_idle_connections: u32,
    pub max_retries: u32,
    pub dial_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub idle_timeout_ms: u64,
}

impl StoreConfig {
    pub fn redis_url(&self) -> String {
        match &self.password {
            Some(pw) if !pw.is_empty() => {
                format!("redis://:{}@{}:{}/{}", pw, self.host, self.port, self.database)
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub task_queue_name: String,
    pub retry_queue_name: String,
    pub dead_letter_queue_name: String,
    pub default_priority: u8,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub retry_backoff_factor: f64,
    pub max_retry_delay_secs: u64,
    pub visibility_timeout_secs: u64,
    pub message_ttl_secs: u64,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub max_concurrent_tasks: usize,
    pub max_user_concurrent_tasks: usize,
    pub task_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub stale_task_threshold_secs: u64,
    pub worker_id_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub python_image: String,
    pub bash_image: String,
    pub javascript_image: String,
    pub go_image: String,
    pub default_memory_bytes: u64,
    pub default_cpu_quota: f64,
    pub default_pids_limit: i64,
    pub default_timeout_secs: u64,
    pub seccomp_profile_path: Option<String>,
    pub execution_uid: u32,
    pub execution_gid: u32,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| CoreError::validation("config.load", format!("invalid value for {key}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from the process environment, preloading a
    /// `.env` file if one is present. Fails fast on malformed values so a
    /// bad deployment is caught at boot, not mid-flight.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(?path, "loaded .env file"),
            Err(_) => tracing::debug!("no .env file found, relying on process environment"),
        }

        let store = StoreConfig {
            host: env_or("STORE_HOST", "127.0.0.1"),
            port: parse_env("STORE_PORT", 6379u16)?,
            password: env::var("STORE_PASSWORD").ok().filter(|s| !s.is_empty()),
            database: parse_env("STORE_DATABASE", 0i64)?,
            pool_size: parse_env("STORE_POOL_SIZE", 10u32)?,
            min_idle_connections: parse_env("STORE_MIN_IDLE_CONNECTIONS", 1u32)?,
            max_retries: parse_env("STORE_MAX_RETRIES", 3u32)?,
            dial_timeout_ms: parse_env("STORE_DIAL_TIMEOUT", 5_000u64)?,
            read_timeout_ms: parse_env("STORE_READ_TIMEOUT", 3_000u64)?,
            write_timeout_ms: parse_env("STORE_WRITE_TIMEOUT", 3_000u64)?,
            idle_timeout_ms: parse_env("STORE_IDLE_TIMEOUT", 60_000u64)?,
        };

        let default_priority: u8 = parse_env("DEFAULT_PRIORITY", 5u8)?;
        if default_priority > 10 {
            return Err(CoreError::validation(
                "config.load",
                "DEFAULT_PRIORITY must be within [0,10]",
            ));
        }
        let retry_backoff_factor: f64 = parse_env("RETRY_BACKOFF_FACTOR", 2.0)?;
        if retry_backoff_factor <= 1.0 {
            return Err(CoreError::validation(
                "config.load",
                "RETRY_BACKOFF_FACTOR must be > 1.0",
            ));
        }

        let queue = QueueConfig {
            task_queue_name: env_or("TASK_QUEUE_NAME", "tasks"),
            retry_queue_name: env_or("RETRY_QUEUE_NAME", "tasks-retry"),
            dead_letter_queue_name: env_or("DEAD_LETTER_QUEUE_NAME", "tasks-dlq"),
            default_priority,
            max_retries: parse_env("MAX_RETRIES", 3u32)?,
            retry_delay_secs: parse_env("RETRY_DELAY", 10u64)?,
            retry_backoff_factor,
            max_retry_delay_secs: parse_env("MAX_RETRY_DELAY", 300u64)?,
            visibility_timeout_secs: parse_env("VISIBILITY_TIMEOUT", 60u64)?,
            message_ttl_secs: parse_env("MESSAGE_TTL", 0u64)?,
            batch_size: parse_env("BATCH_SIZE", 10usize)?,
        };
        if queue.visibility_timeout_secs == 0 {
            return Err(CoreError::validation(
                "config.load",
                "VISIBILITY_TIMEOUT must be nonzero",
            ));
        }

        let min_workers: usize = parse_env("MIN_WORKERS", 2usize)?;
        let max_workers: usize = parse_env("MAX_WORKERS", 10usize)?;
        if min_workers == 0 || min_workers > max_workers {
            return Err(CoreError::validation(
                "config.load",
                "MIN_WORKERS must be >0 and <= MAX_WORKERS",
            ));
        }

        let worker = WorkerConfig {
            pool_size: parse_env("WORKER_POOL_SIZE", min_workers)?,
            min_workers,
            max_workers,
            max_concurrent_tasks: parse_env("MAX_CONCURRENT_TASKS", 20usize)?,
            max_user_concurrent_tasks: parse_env("MAX_USER_CONCURRENT_TASKS", 5usize)?,
            task_timeout_secs: parse_env("TASK_TIMEOUT", 300u64)?,
            heartbeat_interval_secs: parse_env("HEARTBEAT_INTERVAL", 15u64)?,
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT", 30u64)?,
            stale_task_threshold_secs: parse_env("STALE_TASK_THRESHOLD", 3600u64)?,
            worker_id_prefix: env_or("WORKER_ID_PREFIX", "worker"),
        };
        if worker.max_user_concurrent_tasks > worker.max_concurrent_tasks {
            return Err(CoreError::validation(
                "config.load",
                "MAX_USER_CONCURRENT_TASKS must be <= MAX_CONCURRENT_TASKS",
            ));
        }

        let execution_uid: u32 = parse_env("EXECUTION_UID", 1000u32)?;
        let execution_gid: u32 = parse_env("EXECUTION_GID", 1000u32)?;
        if execution_uid == 0 || execution_gid == 0 {
            return Err(CoreError::validation(
                "config.load",
                "EXECUTION_UID/EXECUTION_GID must not be root (0)",
            ));
        }

        let executor = ExecutorConfig {
            python_image: env_or("PYTHON_IMAGE", "python:3.11-alpine"),
            bash_image: env_or("BASH_IMAGE", "alpine:3.18"),
            javascript_image: env_or("JAVASCRIPT_IMAGE", "node:18-alpine"),
            go_image: env_or("GO_IMAGE", "golang:1.21-alpine"),
            default_memory_bytes: parse_env("EXECUTOR_MEMORY_BYTES", 256 * 1024 * 1024u64)?,
            default_cpu_quota: parse_env("EXECUTOR_CPU_QUOTA", 1.0)?,
            default_pids_limit: parse_env("EXECUTOR_PIDS_LIMIT", 128i64)?,
            default_timeout_secs: parse_env("EXECUTOR_TIMEOUT", 300u64)?,
            seccomp_profile_path: env::var("SECCOMP_PROFILE_PATH").ok(),
            execution_uid,
            execution_gid,
        };

        Ok(Config {
            store,
            queue,
            worker,
            executor,
        })
    }
}
