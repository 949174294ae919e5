//! Thin wrapper over the ordered key-value store backing the queue trio.
//!
//! `StoreClient` exposes the mechanics an ordered set / hash store needs
//! to support priority queues with visibility timeouts: sorted-set
//! add/range/remove, hash field I/O, and the handful of multi-key
//! operations that must be atomic from the perspective of concurrent
//! dequeuers. Domain semantics (priority score formula, receipt handle
//! format, retry bookkeeping) live in the `queue` module, not here.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::{CoreError, Result};

#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;
    async fn zcard(&self, key: &str) -> Result<u64>;
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<i64>,
    ) -> Result<Vec<String>>;

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hdel_key(&self, key: &str) -> Result<()>;
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;

    /// Atomically moves up to `max` of the lowest-scored members out of
    /// `queue_key` into `inflight_key` at score `now + visibility_timeout`,
    /// returning the moved member ids. Used by `Task Queue::dequeue`.
    async fn move_lowest_scored(
        &self,
        queue_key: &str,
        inflight_key: &str,
        max: usize,
        new_score: f64,
    ) -> Result<Vec<String>>;

    /// Atomically moves every member of `inflight_key` whose score is
    /// `<= now` back to `queue_key`, reinserting at `restored_scores`
    /// (looked up by member id). Returns the restored ids.
    async fn requeue_expired(
        &self,
        inflight_key: &str,
        queue_key: &str,
        now: f64,
        restored_scores: &HashMap<String, f64>,
    ) -> Result<Vec<String>>;

    /// Removes `member` from `inflight_key` only if it is present,
    /// returning whether the removal happened. Used for handle-guarded deletes.
    async fn remove_if_present(&self, inflight_key: &str, member: &str) -> Result<bool>;

    /// Atomically pops up to `max` members of `key` whose score is `<= now`.
    async fn pop_ready(&self, key: &str, now: f64, max: usize) -> Result<Vec<String>>;
}

pub struct RedisStoreClient {
    conn: ConnectionManager,
}

impl RedisStoreClient {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url())
            .map_err(|e| CoreError::store("connect", e))?;
        let conn = tokio::time::timeout(
            Duration::from_millis(config.dial_timeout_ms),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| CoreError::StoreUnavailable("connection timed out".to_string()))?
        .map_err(|e| CoreError::store("connect", e))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl StoreClient for RedisStoreClient {
    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::store("health_check", e))?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score)
            .await
            .map_err(|e| CoreError::store("zadd", e))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .zrem(key, member)
            .await
            .map_err(|e| CoreError::store("zrem", e))?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.zcard(key).await.map_err(|e| CoreError::store("zcard", e))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<i64>,
    ) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = match limit {
            Some(n) => {
                redis::cmd("ZRANGEBYSCORE")
                    .arg(key)
                    .arg(min)
                    .arg(max)
                    .arg("LIMIT")
                    .arg(0)
                    .arg(n)
                    .query_async(&mut conn)
                    .await
            }
            None => {
                redis::cmd("ZRANGEBYSCORE")
                    .arg(key)
                    .arg(min)
                    .arg(max)
                    .query_async(&mut conn)
                    .await
            }
        }
        .map_err(|e| CoreError::store("zrange_by_score", e))?;
        Ok(members)
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(|e| CoreError::store("hset_multiple", e))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(|e| CoreError::store("hgetall", e))
    }

    async fn hdel_key(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| CoreError::store("hdel_key", e))
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.hincr(key, field, delta)
            .await
            .map_err(|e| CoreError::store("hincr", e))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        if ttl_secs == 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl_secs as i64)
            .await
            .map_err(|e| CoreError::store("expire", e))
    }

    async fn move_lowest_scored(
        &self,
        queue_key: &str,
        inflight_key: &str,
        max: usize,
        new_score: f64,
    ) -> Result<Vec<String>> {
        const SCRIPT: &str = r#"
            local queue_key = KEYS[1]
            local inflight_key = KEYS[2]
            local max = tonumber(ARGV[1])
            local new_score = tonumber(ARGV[2])
            local ids = redis.call('ZRANGE', queue_key, 0, max - 1)
            for i, id in ipairs(ids) do
                redis.call('ZREM', queue_key, id)
                redis.call('ZADD', inflight_key, new_score, id)
            end
            return ids
        "#;
        let mut conn = self.conn.clone();
        Script::new(SCRIPT)
            .key(queue_key)
            .key(inflight_key)
            .arg(max)
            .arg(new_score)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoreError::store("move_lowest_scored", e))
    }

    async fn requeue_expired(
        &self,
        inflight_key: &str,
        queue_key: &str,
        now: f64,
        restored_scores: &HashMap<String, f64>,
    ) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(inflight_key)
            .arg("-inf")
            .arg(now)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::store("requeue_expired.scan", e))?;

        let mut restored = Vec::with_capacity(expired.len());
        for id in expired {
            let score = *restored_scores.get(&id).unwrap_or(&now);
            // Re-checks the member's current in-flight score against `now`
            // inside the same atomic script that removes and re-adds it,
            // rather than trusting the scan above: a worker's
            // `extend_visibility` (a plain ZADD bumping the score into the
            // future) may land between that scan and this script running,
            // and must win the race.
            const SCRIPT: &str = r#"
                local inflight_key = KEYS[1]
                local queue_key = KEYS[2]
                local id = ARGV[1]
                local score = tonumber(ARGV[2])
                local now = tonumber(ARGV[3])
                local current = redis.call('ZSCORE', inflight_key, id)
                if not current or tonumber(current) > now then
                    return 0
                end
                redis.call('ZREM', inflight_key, id)
                redis.call('ZADD', queue_key, score, id)
                return 1
            "#;
            let moved: i64 = Script::new(SCRIPT)
                .key(inflight_key)
                .key(queue_key)
                .arg(&id)
                .arg(score)
                .arg(now)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| CoreError::store("requeue_expired.move", e))?;
            if moved > 0 {
                restored.push(id);
            }
        }
        Ok(restored)
    }

    async fn remove_if_present(&self, inflight_key: &str, member: &str) -> Result<bool> {
        self.zrem(inflight_key, member).await
    }

    async fn pop_ready(&self, key: &str, now: f64, max: usize) -> Result<Vec<String>> {
        const SCRIPT: &str = r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local max = tonumber(ARGV[2])
            local ids = redis.call('ZRANGEBYSCORE', key, '-inf', now, 'LIMIT', 0, max)
            for i, id in ipairs(ids) do
                redis.call('ZREM', key, id)
            end
            return ids
        "#;
        let mut conn = self.conn.clone();
        Script::new(SCRIPT)
            .key(key)
            .arg(now)
            .arg(max)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoreError::store("pop_ready", e))
    }
}

#[cfg(test)]
pub mod fake {
    //! An in-memory `StoreClient` used by queue unit tests so they don't
    //! require a live Redis instance.
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        zsets: HashMap<String, HashMap<String, f64>>,
        hashes: HashMap<String, HashMap<String, String>>,
    }

    #[derive(Default)]
    pub struct FakeStoreClient {
        inner: Mutex<Inner>,
    }

    #[async_trait]
    impl StoreClient for FakeStoreClient {
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }

        async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner
                .zsets
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string(), score);
            Ok(())
        }

        async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            Ok(inner
                .zsets
                .get_mut(key)
                .map(|set| set.remove(member).is_some())
                .unwrap_or(false))
        }

        async fn zcard(&self, key: &str) -> Result<u64> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.zsets.get(key).map(|s| s.len() as u64).unwrap_or(0))
        }

        async fn zrange_by_score(
            &self,
            key: &str,
            min: f64,
            max: f64,
            limit: Option<i64>,
        ) -> Result<Vec<String>> {
            let inner = self.inner.lock().unwrap();
            let mut entries: Vec<(String, f64)> = inner
                .zsets
                .get(key)
                .map(|s| s.iter().map(|(k, v)| (k.clone(), *v)).collect())
                .unwrap_or_default();
            entries.retain(|(_, score)| *score >= min && *score <= max);
            entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            let mut ids: Vec<String> = entries.into_iter().map(|(id, _)| id).collect();
            if let Some(n) = limit {
                ids.truncate(n as usize);
            }
            Ok(ids)
        }

        async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            let hash = inner.hashes.entry(key.to_string()).or_default();
            for (k, v) in fields {
                hash.insert(k.clone(), v.clone());
            }
            Ok(())
        }

        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.hashes.get(key).cloned().unwrap_or_default())
        }

        async fn hdel_key(&self, key: &str) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.hashes.remove(key);
            Ok(())
        }

        async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
            let mut inner = self.inner.lock().unwrap();
            let hash = inner.hashes.entry(key.to_string()).or_default();
            let current: i64 = hash.get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        }

        async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<()> {
            Ok(())
        }

        async fn move_lowest_scored(
            &self,
            queue_key: &str,
            inflight_key: &str,
            max: usize,
            new_score: f64,
        ) -> Result<Vec<String>> {
            let ids = self.zrange_by_score(queue_key, f64::MIN, f64::MAX, Some(max as i64)).await?;
            for id in &ids {
                self.zrem(queue_key, id).await?;
                self.zadd(inflight_key, id, new_score).await?;
            }
            Ok(ids)
        }

        async fn requeue_expired(
            &self,
            inflight_key: &str,
            queue_key: &str,
            now: f64,
            restored_scores: &HashMap<String, f64>,
        ) -> Result<Vec<String>> {
            let expired = self
                .zrange_by_score(inflight_key, f64::MIN, now, None)
                .await?;
            let mut restored = Vec::new();
            for id in expired {
                // Re-checks the member's current in-flight score under the
                // same lock acquisition that removes and re-adds it, so a
                // concurrent `extend_visibility` landing between the scan
                // above and this check is not clobbered.
                let mut inner = self.inner.lock().unwrap();
                let still_expired = inner
                    .zsets
                    .get(inflight_key)
                    .and_then(|set| set.get(&id))
                    .map(|score| *score <= now)
                    .unwrap_or(false);
                if !still_expired {
                    continue;
                }
                inner.zsets.get_mut(inflight_key).unwrap().remove(&id);
                let score = *restored_scores.get(&id).unwrap_or(&now);
                inner.zsets.entry(queue_key.to_string()).or_default().insert(id.clone(), score);
                drop(inner);
                restored.push(id);
            }
            Ok(restored)
        }

        async fn remove_if_present(&self, inflight_key: &str, member: &str) -> Result<bool> {
            self.zrem(inflight_key, member).await
        }

        async fn pop_ready(&self, key: &str, now: f64, max: usize) -> Result<Vec<String>> {
            let ids = self
                .zrange_by_score(key, f64::MIN, now, Some(max as i64))
                .await?;
            for id in &ids {
                self.zrem(key, id).await?;
            }
            Ok(ids)
        }
    }

    #[tokio::test]
    async fn fake_store_moves_lowest_scored_members() {
        let store = FakeStoreClient::default();
        store.zadd("q", "a", 5.0).await.unwrap();
        store.zadd("q", "b", 1.0).await.unwrap();
        store.zadd("q", "c", 3.0).await.unwrap();
        let moved = store.move_lowest_scored("q", "inflight", 2, 100.0).await.unwrap();
        assert_eq!(moved, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(store.zcard("q").await.unwrap(), 1);
        assert_eq!(store.zcard("inflight").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn fake_store_requeues_expired_members_at_restored_score() {
        let store = FakeStoreClient::default();
        store.zadd("inflight", "a", 10.0).await.unwrap();
        let mut restored = HashMap::new();
        restored.insert("a".to_string(), 2.0);
        let ids = store
            .requeue_expired("inflight", "q", 20.0, &restored)
            .await
            .unwrap();
        assert_eq!(ids, vec!["a".to_string()]);
        let score = store.zrange_by_score("q", f64::MIN, f64::MAX, None).await.unwrap();
        assert_eq!(score, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn requeue_expired_does_not_clobber_a_concurrently_extended_visibility() {
        let store = FakeStoreClient::default();
        // "a" looked expired as of `now = 20.0`...
        store.zadd("inflight", "a", 10.0).await.unwrap();
        // ...but a worker extends its visibility into the future before
        // requeue_expired's per-id move runs.
        store.zadd("inflight", "a", 1_000.0).await.unwrap();

        let mut restored = HashMap::new();
        restored.insert("a".to_string(), 2.0);
        let ids = store
            .requeue_expired("inflight", "q", 20.0, &restored)
            .await
            .unwrap();

        assert!(ids.is_empty(), "extended member must not be requeued");
        assert_eq!(store.zcard("inflight").await.unwrap(), 1);
        assert_eq!(store.zcard("q").await.unwrap(), 0);
    }
}
