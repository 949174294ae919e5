use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::QueueConfig;
use crate::constants::{
    CLEANUP_SWEEP_DEADLINE, CLEANUP_SWEEP_INTERVAL, DEAD_LETTER_RETENTION, RETRY_JITTER_MAX,
    RETRY_JITTER_MIN,
};
use crate::error::{CoreError, Result};
use crate::models::TaskMessage;
use crate::store::StoreClient;

use super::retry_processor::RetryProcessor;
use super::{now_unix, DeadLetterQueue, RetryQueue, TaskQueue};

struct ManagerState {
    started: bool,
}

/// Composes the three queues behind one façade, runs the periodic
/// cleanup sweep, and owns the retry-vs-dead-letter failure policy.
///
/// A single read-write mutex guards `started`. Any health check invoked
/// while the write lock is held (from `start`) must go through
/// `is_healthy_unsafe`, which takes no manager lock of its own, to avoid
/// self-deadlocking against the public `is_healthy`.
pub struct QueueManager {
    state: RwLock<ManagerState>,
    pub task_queue: Arc<TaskQueue>,
    retry_queue: Arc<RetryQueue>,
    dead_letter_queue: Arc<DeadLetterQueue>,
    store: Arc<dyn StoreClient>,
    config: QueueConfig,
    cancel: CancelToken,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
    retry_processor: Arc<RetryProcessor>,
    retry_handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn StoreClient>, config: QueueConfig) -> Self {
        let visibility_timeout = Duration::from_secs(config.visibility_timeout_secs);
        let message_ttl = Duration::from_secs(config.message_ttl_secs);

        let task_queue = Arc::new(TaskQueue::new(
            store.clone(),
            config.task_queue_name.clone(),
            visibility_timeout,
            message_ttl,
        ));
        let retry_queue = Arc::new(RetryQueue::new(
            store.clone(),
            config.retry_queue_name.clone(),
            message_ttl,
        ));
        let dead_letter_queue = Arc::new(DeadLetterQueue::new(
            store.clone(),
            config.dead_letter_queue_name.clone(),
        ));
        let retry_processor = Arc::new(RetryProcessor::new(
            retry_queue.clone(),
            task_queue.clone(),
            dead_letter_queue.clone(),
            config.max_retries,
            config.batch_size,
        ));

        Self {
            state: RwLock::new(ManagerState { started: false }),
            task_queue,
            retry_queue,
            dead_letter_queue,
            store,
            config,
            cancel: CancelToken::new(),
            cleanup_handle: Mutex::new(None),
            retry_processor,
            retry_handle: Mutex::new(None),
        }
    }

    pub fn task_queue(&self) -> Arc<TaskQueue> {
        self.task_queue.clone()
    }

    pub fn dead_letter_queue(&self) -> Arc<DeadLetterQueue> {
        self.dead_letter_queue.clone()
    }

    pub fn retry_queue(&self) -> Arc<RetryQueue> {
        self.retry_queue.clone()
    }

    /// Validates store and queue health, then launches the retry
    /// processor and the periodic cleanup sweep. Idempotent.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.started {
            return Ok(());
        }
        self.is_healthy_unsafe().await?;
        state.started = true;
        drop(state);

        let retry_processor = self.retry_processor.clone();
        let retry_cancel = self.cancel.clone();
        let retry_handle = tokio::spawn(async move {
            retry_processor.run(retry_cancel).await;
        });
        *self.retry_handle.lock().await = Some(retry_handle);

        let task_queue = self.task_queue.clone();
        let retry_queue = self.retry_queue.clone();
        let dead_letter_queue = self.dead_letter_queue.clone();
        let retry_purge_age = Duration::from_secs(self.config.max_retry_delay_secs * 2);
        let cleanup_cancel = self.cancel.clone();
        let cleanup_handle = tokio::spawn(async move {
            cleanup_sweep_loop(task_queue, retry_queue, dead_letter_queue, retry_purge_age, cleanup_cancel).await;
        });
        *self.cleanup_handle.lock().await = Some(cleanup_handle);

        info!("queue manager started");
        Ok(())
    }

    /// Cancels the cleanup sweep and retry processor, then closes the
    /// queues and backing store, all under `shutdown_timeout`. Idempotent.
    pub async fn stop(&self, shutdown_timeout: Duration) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.started {
            return Ok(());
        }
        state.started = false;
        drop(state);

        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = [
            self.retry_handle.lock().await.take(),
            self.cleanup_handle.lock().await.take(),
        ]
        .into_iter()
        .flatten()
        .collect();

        let joined = tokio::time::timeout(shutdown_timeout, futures::future::join_all(handles)).await;
        if joined.is_err() {
            warn!("queue manager shutdown exceeded deadline");
        }
        info!("queue manager stopped");
        Ok(())
    }

    /// Public health check: takes the read lock, then delegates to the
    /// lock-free variant.
    pub async fn is_healthy(&self) -> bool {
        let _state = self.state.read().await;
        self.is_healthy_unsafe().await.is_ok()
    }

    /// Lock-free health probe. Must be the only variant called from
    /// within `start` while the write lock is held.
    async fn is_healthy_unsafe(&self) -> Result<()> {
        self.store.health_check().await
    }

    /// The heart of the failure policy: retry with backoff, or
    /// dead-letter once the retry budget is exhausted. Regardless of
    /// outcome, the original message is removed from the task queue.
    pub async fn fail_task(&self, mut message: TaskMessage, reason: &str) -> Result<()> {
        message.failure_reason = Some(reason.to_string());

        if message.attempts < self.config.max_retries {
            let delay = retry_delay(
                message.attempts,
                Duration::from_secs(self.config.retry_delay_secs),
                self.config.retry_backoff_factor,
                Duration::from_secs(self.config.max_retry_delay_secs),
            );
            let retry_at = message.last_attempt.unwrap_or_else(now_unix) + delay.as_secs() as i64;
            self.retry_queue.enqueue_for_retry(&message, retry_at).await?;
            debug!(task_id = %message.task_id, retry_at, "scheduled for retry");
        } else {
            self.dead_letter_queue
                .enqueue_failed(message.clone(), reason)
                .await?;
            warn!(task_id = %message.task_id, "exhausted retry budget, dead-lettered");
        }

        if let Some(handle) = &message.receipt_handle {
            self.task_queue.delete(handle).await?;
        } else {
            error!(task_id = %message.task_id, "fail_task called without a receipt handle");
        }
        Ok(())
    }
}

/// `delay(n) = clamp(base_delay × backoff_factor^(n−1) × jitter, base_delay, max_delay)`
/// where `n` is the 1-indexed attempt number this retry will carry, i.e.
/// `attempts_before_failure + 1`.
pub fn retry_delay(
    attempts_before_failure: u32,
    base_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
) -> Duration {
    let jitter = rand::thread_rng().gen_range(RETRY_JITTER_MIN..=RETRY_JITTER_MAX);
    let exponent = attempts_before_failure as i32;
    let scaled = base_delay.as_secs_f64() * backoff_factor.powi(exponent) * jitter;
    let clamped = scaled.clamp(base_delay.as_secs_f64(), max_delay.as_secs_f64());
    Duration::from_secs_f64(clamped)
}

/// Each tick: restores expired in-flight task-queue messages, purges retry
/// payloads that sat unpicked past `2 × max_retry_delay`, and prunes
/// dead-letter records outside the retention window. All under one shared
/// per-tick deadline.
async fn cleanup_sweep_loop(
    task_queue: Arc<TaskQueue>,
    retry_queue: Arc<RetryQueue>,
    dead_letter_queue: Arc<DeadLetterQueue>,
    retry_purge_age: Duration,
    cancel: CancelToken,
) {
    let mut ticker = tokio::time::interval(CLEANUP_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("cleanup sweep loop cancelled");
                return;
            }
            _ = ticker.tick() => {
                let sweep = tokio::time::timeout(CLEANUP_SWEEP_DEADLINE, async {
                    let restored = task_queue.cleanup_expired().await?;

                    let retry_cutoff = now_unix() - retry_purge_age.as_secs() as i64;
                    let purged = retry_queue.purge_older_than(retry_cutoff).await?;

                    let dlq_cutoff = now_unix() - DEAD_LETTER_RETENTION.as_secs() as i64;
                    let pruned = dead_letter_queue.prune_older_than(dlq_cutoff).await?;

                    Result::<(u64, u64, u64)>::Ok((restored, purged, pruned))
                });

                match sweep.await {
                    Ok(Ok((restored, purged, pruned))) => {
                        if restored > 0 || purged > 0 || pruned > 0 {
                            debug!(restored, purged, pruned, "cleanup sweep completed");
                        }
                    }
                    Ok(Err(e)) => warn!(error = %e, "cleanup sweep failed"),
                    Err(_) => warn!("cleanup sweep exceeded its deadline"),
                }
            }
        }
    }
}
