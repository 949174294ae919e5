use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::models::TaskMessage;
use crate::store::StoreClient;

use super::{inflight_key, message_key, now_unix, now_unix_micros, queue_key, random_hex, stats_key};

/// Priority FIFO with visibility-timeout based at-least-once delivery.
///
/// Backed by two ordered sets (the priority queue and the in-flight set)
/// and one payload record per message, all scoped under `name`.
pub struct TaskQueue {
    store: Arc<dyn StoreClient>,
    name: String,
    visibility_timeout: Duration,
    message_ttl: Duration,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn StoreClient>, name: impl Into<String>, visibility_timeout: Duration, message_ttl: Duration) -> Self {
        Self {
            store,
            name: name.into(),
            visibility_timeout,
            message_ttl,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn write_payload(&self, message: &TaskMessage) -> Result<()> {
        let key = message_key(&self.name, &message.message_id);
        let payload = serde_json::to_string(message)?;
        self.store
            .hset_multiple(&key, &[("payload".to_string(), payload)])
            .await?;
        if self.message_ttl.as_secs() > 0 {
            self.store.expire(&key, self.message_ttl.as_secs()).await?;
        }
        Ok(())
    }

    async fn read_payload(&self, message_id: &str) -> Result<TaskMessage> {
        let key = message_key(&self.name, message_id);
        let fields = self.store.hgetall(&key).await?;
        let raw = fields
            .get("payload")
            .ok_or_else(|| CoreError::NotFound(format!("message {message_id} not found")))?;
        Ok(serde_json::from_str(raw)?)
    }

    /// Validates, assigns `message_id`/`queued_at` if missing, and writes
    /// the payload plus priority-set entry in one logical step.
    pub async fn enqueue(&self, mut message: TaskMessage) -> Result<TaskMessage> {
        if message.queued_at == 0 {
            message.queued_at = now_unix_micros();
        }
        message.validate()?;

        let score = TaskMessage::priority_score(message.priority, message.queued_at);
        self.write_payload(&message).await?;
        self.store
            .zadd(&queue_key(&self.name), &message.message_id, score)
            .await?;
        self.store.hincr(&stats_key(&self.name), "enqueued", 1).await?;
        Ok(message)
    }

    /// Atomically selects the lowest-scored `max` ids, moves them to the
    /// in-flight set keyed by visibility deadline, mints a receipt handle
    /// for each, and returns the hydrated messages.
    pub async fn dequeue(&self, max: usize) -> Result<Vec<TaskMessage>> {
        let now = now_unix();
        let deadline = (now + self.visibility_timeout.as_secs() as i64) as f64;
        let ids = self
            .store
            .move_lowest_scored(&queue_key(&self.name), &inflight_key(&self.name), max, deadline)
            .await?;

        let mut hydrated = Vec::with_capacity(ids.len());
        for id in ids {
            let mut message = self.read_payload(&id).await?;
            let receipt_handle = format!("{}:{}:{}", id, now, random_hex(12));
            message.receipt_handle = Some(receipt_handle);
            self.write_payload(&message).await?;
            hydrated.push(message);
        }
        self.store.hincr(&stats_key(&self.name), "dequeued", hydrated.len() as i64).await?;
        Ok(hydrated)
    }

    fn parse_handle<'a>(&self, receipt_handle: &'a str) -> Result<(&'a str, i64)> {
        let mut parts = receipt_handle.splitn(3, ':');
        let message_id = parts.next().ok_or(CoreError::InvalidReceiptHandle)?;
        let dequeue_unix: i64 = parts
            .next()
            .ok_or(CoreError::InvalidReceiptHandle)?
            .parse()
            .map_err(|_| CoreError::InvalidReceiptHandle)?;
        parts.next().ok_or(CoreError::InvalidReceiptHandle)?;
        Ok((message_id, dequeue_unix))
    }

    /// Verifies the handle is not expired and matches the stored record
    /// before removing the message from the in-flight set and deleting
    /// its payload.
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        let (message_id, dequeue_unix) = self.parse_handle(receipt_handle)?;
        if now_unix() - dequeue_unix > self.visibility_timeout.as_secs() as i64 {
            return Err(CoreError::InvalidReceiptHandle);
        }
        let message = self.read_payload(message_id).await?;
        if message.receipt_handle.as_deref() != Some(receipt_handle) {
            return Err(CoreError::InvalidReceiptHandle);
        }
        self.store
            .remove_if_present(&inflight_key(&self.name), message_id)
            .await?;
        self.store
            .hdel_key(&message_key(&self.name, message_id))
            .await?;
        Ok(())
    }

    /// Same handle verification as `delete`, but updates the in-flight
    /// score instead of removing the message.
    pub async fn extend_visibility(&self, receipt_handle: &str, timeout: Duration) -> Result<()> {
        let (message_id, _) = self.parse_handle(receipt_handle)?;
        let message = self.read_payload(message_id).await?;
        if message.receipt_handle.as_deref() != Some(receipt_handle) {
            return Err(CoreError::InvalidReceiptHandle);
        }
        let new_score = (now_unix() + timeout.as_secs() as i64) as f64;
        self.store
            .zadd(&inflight_key(&self.name), message_id, new_score)
            .await?;
        Ok(())
    }

    /// Restores every in-flight message whose visibility deadline has
    /// passed back to the priority set, recomputed from its stored
    /// `priority`/`queued_at`, not from `now`. Clears its receipt handle.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let now = now_unix() as f64;
        let expired_ids = self
            .store
            .zrange_by_score(&inflight_key(&self.name), f64::MIN, now, None)
            .await?;

        let mut restored_scores = HashMap::new();
        let mut messages = Vec::new();
        for id in &expired_ids {
            let mut message = self.read_payload(id).await?;
            let score = TaskMessage::priority_score(message.priority, message.queued_at);
            restored_scores.insert(id.clone(), score);
            message.receipt_handle = None;
            messages.push(message);
        }

        let restored = self
            .store
            .requeue_expired(&inflight_key(&self.name), &queue_key(&self.name), now, &restored_scores)
            .await?;

        for message in messages {
            if restored.contains(&message.message_id) {
                self.write_payload(&message).await?;
            }
        }
        Ok(restored.len() as u64)
    }

    pub async fn size(&self) -> Result<u64> {
        self.store.zcard(&queue_key(&self.name)).await
    }

    pub async fn in_flight_count(&self) -> Result<u64> {
        self.store.zcard(&inflight_key(&self.name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScriptType;
    use crate::store::fake::FakeStoreClient;
    use std::sync::Arc;

    fn queue() -> TaskQueue {
        TaskQueue::new(
            Arc::new(FakeStoreClient::default()),
            "tasks",
            Duration::from_secs(30),
            Duration::from_secs(0),
        )
    }

    fn msg(task_id: &str, user_id: &str, priority: u8) -> TaskMessage {
        TaskMessage::new(task_id, user_id, priority, ScriptType::Bash, "echo hi")
    }

    #[tokio::test]
    async fn priority_ordering_across_messages() {
        let q = queue();
        q.enqueue(msg("A", "u", 2)).await.unwrap();
        q.enqueue(msg("B", "u", 8)).await.unwrap();
        q.enqueue(msg("C", "u", 5)).await.unwrap();

        let dequeued = q.dequeue(3).await.unwrap();
        let task_ids: Vec<&str> = dequeued.iter().map(|m| m.task_id.as_str()).collect();
        assert_eq!(task_ids, vec!["B", "C", "A"]);
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let q = queue();
        let mut x = msg("X", "u", 5);
        x.queued_at = 1_000;
        let mut y = msg("Y", "u", 5);
        y.queued_at = 2_000;
        q.enqueue(x).await.unwrap();
        q.enqueue(y).await.unwrap();

        let dequeued = q.dequeue(2).await.unwrap();
        let task_ids: Vec<&str> = dequeued.iter().map(|m| m.task_id.as_str()).collect();
        assert_eq!(task_ids, vec!["X", "Y"]);
    }

    #[tokio::test]
    async fn delete_requires_matching_receipt_handle() {
        let q = queue();
        q.enqueue(msg("A", "u", 5)).await.unwrap();
        let dequeued = q.dequeue(1).await.unwrap();
        let handle = dequeued[0].receipt_handle.clone().unwrap();

        let forged = format!("{}-forged", handle);
        assert!(matches!(
            q.delete(&forged).await,
            Err(CoreError::InvalidReceiptHandle)
        ));
        assert!(q.delete(&handle).await.is_ok());
    }

    #[tokio::test]
    async fn empty_dequeue_returns_empty_list() {
        let q = queue();
        let result = q.dequeue(5).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn cleanup_expired_restores_original_priority_score_not_now() {
        let q = TaskQueue::new(
            Arc::new(FakeStoreClient::default()),
            "tasks",
            Duration::from_secs(0),
            Duration::from_secs(0),
        );
        q.enqueue(msg("A", "u", 8)).await.unwrap();
        let dequeued = q.dequeue(1).await.unwrap();
        assert_eq!(dequeued.len(), 1);

        // visibility_timeout is 0s, so this message is immediately stale.
        let restored = q.cleanup_expired().await.unwrap();
        assert_eq!(restored, 1);

        let requeued = q.dequeue(1).await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].task_id, "A");
    }

    #[tokio::test]
    async fn rejects_priority_out_of_range() {
        let q = queue();
        let mut m = msg("A", "u", 5);
        m.priority = 11;
        assert!(q.enqueue(m).await.is_err());
    }
}
