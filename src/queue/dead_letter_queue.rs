use std::sync::Arc;

use crate::error::Result;
use crate::models::TaskMessage;
use crate::store::StoreClient;

use super::{dlq_key, dlq_reasons_key, message_key, now_unix};

/// Terminal storage for messages that exceeded the retry budget: ids on
/// an ordered set keyed by `failed_at`, payloads in a field map, and a
/// rolling `failure_reason -> count` histogram.
pub struct DeadLetterQueue {
    store: Arc<dyn StoreClient>,
    name: String,
}

impl DeadLetterQueue {
    pub fn new(store: Arc<dyn StoreClient>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub async fn enqueue_failed(&self, mut message: TaskMessage, reason: &str) -> Result<()> {
        message.failure_reason = Some(reason.to_string());
        let failed_at = now_unix();
        let key = message_key(&self.name, &message.message_id);
        let payload = serde_json::to_string(&message)?;
        self.store
            .hset_multiple(&key, &[("payload".to_string(), payload)])
            .await?;
        self.store
            .zadd(&dlq_key(&self.name), &message.message_id, failed_at as f64)
            .await?;
        self.store.hincr(&dlq_reasons_key(&self.name), reason, 1).await?;
        Ok(())
    }

    /// Paging list, most recently dead-lettered first.
    pub async fn list(&self, offset: u64, limit: u64) -> Result<Vec<TaskMessage>> {
        let ids = self
            .store
            .zrange_by_score(&dlq_key(&self.name), f64::MIN, f64::MAX, None)
            .await?;
        let mut page = Vec::new();
        for id in ids.into_iter().rev().skip(offset as usize).take(limit as usize) {
            let fields = self.store.hgetall(&message_key(&self.name, &id)).await?;
            if let Some(raw) = fields.get("payload") {
                page.push(serde_json::from_str::<TaskMessage>(raw)?);
            }
        }
        Ok(page)
    }

    /// Removes a single message from the dead-letter store and returns
    /// it, resetting `attempts` to 0 so the caller can re-enqueue it on
    /// the main queue as a fresh attempt.
    pub async fn requeue(&self, message_id: &str) -> Result<Option<TaskMessage>> {
        let key = message_key(&self.name, message_id);
        let fields = self.store.hgetall(&key).await?;
        let Some(raw) = fields.get("payload") else {
            return Ok(None);
        };
        let mut message: TaskMessage = serde_json::from_str(raw)?;
        self.store.zrem(&dlq_key(&self.name), message_id).await?;
        self.store.hdel_key(&key).await?;
        message.attempts = 0;
        message.failure_reason = None;
        message.receipt_handle = None;
        Ok(Some(message))
    }

    pub async fn failure_reason_histogram(&self) -> Result<std::collections::HashMap<String, String>> {
        self.store.hgetall(&dlq_reasons_key(&self.name)).await
    }

    pub async fn size(&self) -> Result<u64> {
        self.store.zcard(&dlq_key(&self.name)).await
    }

    /// Prunes dead-letter records failed before `cutoff` (unix seconds),
    /// outside the retention window. The failure-reason histogram is left
    /// untouched since it is a rolling aggregate, not per-record. Returns
    /// the number pruned.
    pub async fn prune_older_than(&self, cutoff: i64) -> Result<u64> {
        let ids = self
            .store
            .zrange_by_score(&dlq_key(&self.name), f64::MIN, cutoff as f64, None)
            .await?;
        let mut pruned = 0u64;
        for id in ids {
            self.store.zrem(&dlq_key(&self.name), &id).await?;
            self.store.hdel_key(&message_key(&self.name, &id)).await?;
            pruned += 1;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScriptType;
    use crate::store::fake::FakeStoreClient;

    fn dlq() -> DeadLetterQueue {
        DeadLetterQueue::new(Arc::new(FakeStoreClient::default()), "tasks")
    }

    #[tokio::test]
    async fn enqueue_failed_records_reason_histogram() {
        let q = dlq();
        let m = TaskMessage::new("t1", "u1", 5, ScriptType::Python, "print(1)");
        q.enqueue_failed(m, "exit code 1").await.unwrap();

        let hist = q.failure_reason_histogram().await.unwrap();
        assert_eq!(hist.get("exit code 1"), Some(&"1".to_string()));
        assert_eq!(q.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn requeue_clears_attempts_and_failure_reason() {
        let q = dlq();
        let mut m = TaskMessage::new("t1", "u1", 5, ScriptType::Python, "print(1)");
        m.attempts = 3;
        let message_id = m.message_id.clone();
        q.enqueue_failed(m, "timeout").await.unwrap();

        let requeued = q.requeue(&message_id).await.unwrap().expect("message exists");
        assert_eq!(requeued.attempts, 0);
        assert!(requeued.failure_reason.is_none());
        assert_eq!(q.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn requeue_missing_message_returns_none() {
        let q = dlq();
        assert!(q.requeue("does-not-exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prune_older_than_drops_only_stale_records() {
        let q = dlq();
        q.enqueue_failed(
            TaskMessage::new("old", "u1", 5, ScriptType::Python, "print(1)"),
            "timeout",
        )
        .await
        .unwrap();
        assert_eq!(q.size().await.unwrap(), 1);

        let pruned = q.prune_older_than(now_unix() + 1).await.unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(q.size().await.unwrap(), 0);
    }
}
