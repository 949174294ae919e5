use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::constants::{RETRY_PROCESSOR_BATCH_DEADLINE, RETRY_PROCESSOR_TICK};
use crate::error::Result;

use super::{now_unix_micros, DeadLetterQueue, RetryQueue, TaskQueue};

/// Drains the retry queue into the task queue on a tick. Messages that
/// have already exhausted their retry budget by the time they come due
/// (attempts >= max_retries) go straight to the dead-letter queue
/// instead of bouncing back onto the task queue.
pub struct RetryProcessor {
    retry_queue: Arc<RetryQueue>,
    task_queue: Arc<TaskQueue>,
    dead_letter_queue: Arc<DeadLetterQueue>,
    max_retries: u32,
    batch_size: usize,
}

impl RetryProcessor {
    pub fn new(
        retry_queue: Arc<RetryQueue>,
        task_queue: Arc<TaskQueue>,
        dead_letter_queue: Arc<DeadLetterQueue>,
        max_retries: u32,
        batch_size: usize,
    ) -> Self {
        Self {
            retry_queue,
            task_queue,
            dead_letter_queue,
            max_retries,
            batch_size,
        }
    }

    pub async fn run(&self, cancel: CancelToken) {
        let mut ticker = tokio::time::interval(RETRY_PROCESSOR_TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("retry processor cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    let tick = tokio::time::timeout(RETRY_PROCESSOR_BATCH_DEADLINE, self.tick_once());
                    match tick.await {
                        Ok(Ok(moved)) if moved > 0 => debug!(moved, "retry processor moved messages"),
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "retry processor tick failed"),
                        Err(_) => warn!("retry processor tick exceeded its deadline"),
                    }
                }
            }
        }
    }

    /// One tick: pop ready messages, re-enqueue or dead-letter each.
    /// Returns the number moved onto the task queue.
    pub async fn tick_once(&self) -> Result<usize> {
        let ready = self.retry_queue.pop_ready(self.batch_size).await?;
        let mut moved = 0;
        for mut message in ready {
            if message.attempts >= self.max_retries {
                self.dead_letter_queue
                    .enqueue_failed(message, "retry budget exhausted")
                    .await?;
                continue;
            }
            message.queued_at = now_unix_micros();
            message.message_id = Uuid::new_v4().to_string();
            message.receipt_handle = None;
            self.task_queue.enqueue(message).await?;
            moved += 1;
        }
        Ok(moved)
    }
}
