use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::models::TaskMessage;
use crate::store::StoreClient;

use super::{message_key, now_unix, retry_key, stats_key};

/// A single ordered set keyed by `next_retry_at_unix`, holding messages
/// awaiting re-enqueue onto the task queue.
pub struct RetryQueue {
    store: Arc<dyn StoreClient>,
    name: String,
    message_ttl: Duration,
}

impl RetryQueue {
    pub fn new(store: Arc<dyn StoreClient>, name: impl Into<String>, message_ttl: Duration) -> Self {
        Self {
            store,
            name: name.into(),
            message_ttl,
        }
    }

    /// Creates a retry copy with `attempts += 1` and a fresh `message_id`,
    /// writes its payload, and schedules it at `retry_at` (unix seconds).
    pub async fn enqueue_for_retry(&self, source: &TaskMessage, retry_at: i64) -> Result<TaskMessage> {
        let mut retry_message = source.clone();
        retry_message.attempts += 1;
        retry_message.message_id = uuid::Uuid::new_v4().to_string();
        retry_message.receipt_handle = None;
        retry_message.next_retry_at = Some(retry_at);
        retry_message.last_attempt = Some(now_unix());

        let key = message_key(&self.name, &retry_message.message_id);
        let payload = serde_json::to_string(&retry_message)?;
        self.store
            .hset_multiple(&key, &[("payload".to_string(), payload)])
            .await?;
        if self.message_ttl.as_secs() > 0 {
            self.store.expire(&key, self.message_ttl.as_secs()).await?;
        }
        self.store
            .zadd(&retry_key(&self.name), &retry_message.message_id, retry_at as f64)
            .await?;
        self.store.hincr(&stats_key(&self.name), "scheduled_for_retry", 1).await?;
        Ok(retry_message)
    }

    /// Atomically takes up to `max` ids whose score is `<= now`, removes
    /// them, and hydrates the corresponding payloads.
    pub async fn pop_ready(&self, max: usize) -> Result<Vec<TaskMessage>> {
        let now = now_unix() as f64;
        let ids = self.store.pop_ready(&retry_key(&self.name), now, max).await?;

        let mut hydrated = Vec::with_capacity(ids.len());
        for id in ids {
            let key = message_key(&self.name, &id);
            let fields = self.store.hgetall(&key).await?;
            if let Some(raw) = fields.get("payload") {
                hydrated.push(serde_json::from_str::<TaskMessage>(raw)?);
            }
            self.store.hdel_key(&key).await?;
        }
        Ok(hydrated)
    }

    pub async fn size(&self) -> Result<u64> {
        self.store.zcard(&retry_key(&self.name)).await
    }

    /// Drops retry payloads scheduled before `cutoff` (unix seconds) that
    /// were never picked up by `pop_ready`, e.g. because the process was
    /// down past their `next_retry_at`. Returns the number purged.
    pub async fn purge_older_than(&self, cutoff: i64) -> Result<u64> {
        let ids = self
            .store
            .zrange_by_score(&retry_key(&self.name), f64::MIN, cutoff as f64, None)
            .await?;
        let mut purged = 0u64;
        for id in ids {
            self.store.zrem(&retry_key(&self.name), &id).await?;
            self.store.hdel_key(&message_key(&self.name, &id)).await?;
            purged += 1;
        }
        Ok(purged)
    }
}
