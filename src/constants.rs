//! System-wide defaults. Values are the ones named in the component design;
//! anything meant to be operator-tunable lives in `config` instead.

use std::time::Duration;

// Queue defaults
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MESSAGE_TTL_SECS: u64 = 0;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_PRIORITY: u8 = 5;

// Retry engine
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(300);
pub const RETRY_JITTER_MIN: f64 = 0.9;
pub const RETRY_JITTER_MAX: f64 = 1.1;

// Queue manager background loops
pub const CLEANUP_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
pub const CLEANUP_SWEEP_DEADLINE: Duration = Duration::from_secs(120);
pub const RETRY_PROCESSOR_TICK: Duration = Duration::from_secs(30);
pub const RETRY_PROCESSOR_BATCH_DEADLINE: Duration = Duration::from_secs(120);
// Dead-letter records older than this are pruned by the cleanup sweep.
pub const DEAD_LETTER_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

// Concurrency gate
pub const DEFAULT_SLOT_TTL: Duration = Duration::from_secs(600);
pub const CONCURRENCY_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

// Cleanup tracker
pub const CLEANUP_TRACKER_TICK: Duration = Duration::from_secs(300);
pub const CONTAINER_STALE_THRESHOLD: Duration = Duration::from_secs(3600);
pub const CONTAINER_NAME_PREFIX: &str = "task-exec-";

// Worker
pub const WORKER_EMPTY_QUEUE_SLEEP: Duration = Duration::from_millis(250);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STALE_TASK_THRESHOLD: Duration = Duration::from_secs(3600);

// Worker pool auto-scaling, left fixed per the open question in the design notes
pub const AUTOSCALE_TICK: Duration = Duration::from_secs(60);
pub const SCALE_UP_THRESHOLD: f64 = 0.9;
pub const SCALE_DOWN_THRESHOLD: f64 = 0.3;
pub const POOL_HEALTHY_WORKER_FRACTION: f64 = 0.5;

// Executor / security caps
pub const DEFAULT_TIMEOUT_CAP_SECS: u64 = 3600;
pub const DEFAULT_MEMORY_CAP_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_CPU_QUOTA_CAP: f64 = 2.0;
pub const DEFAULT_PIDS_CAP: i64 = 1000;
