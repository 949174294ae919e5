use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::ProcessingSlot;

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

struct GateState {
    active_slots: HashMap<String, ProcessingSlot>,
    user_count: HashMap<String, usize>,
    total_active: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GateStats {
    pub acquired_total: u64,
    pub released_total: u64,
    pub stale_evicted_total: u64,
    pub average_slot_duration_secs: f64,
}

struct Limits {
    max_concurrent_tasks: usize,
    max_user_concurrent_tasks: usize,
    slot_ttl: Duration,
}

/// Bounds global and per-user parallelism with stale-slot eviction.
///
/// The fast path (acquire/release) takes only the state write lock and
/// never blocks on I/O; a separate mutex guards running-average stats so
/// stat bookkeeping never contends with the admission check.
pub struct ConcurrencyGate {
    state: RwLock<GateState>,
    stats: Mutex<GateStats>,
    limits: RwLock<Limits>,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent_tasks: usize, max_user_concurrent_tasks: usize, slot_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(GateState {
                active_slots: HashMap::new(),
                user_count: HashMap::new(),
                total_active: 0,
            }),
            stats: Mutex::new(GateStats::default()),
            limits: RwLock::new(Limits {
                max_concurrent_tasks,
                max_user_concurrent_tasks,
                slot_ttl,
            }),
        })
    }

    /// Mints a slot for `user_id`/`task_id`/`worker_id`, rejecting with
    /// `ConcurrencyLimitReached` if either the global or per-user cap is
    /// already at capacity. This never blocks on I/O: failure returns
    /// immediately so the caller can back off and let the in-flight
    /// message's visibility timeout redeliver it.
    pub async fn acquire(&self, user_id: &str, task_id: &str, worker_id: &str) -> Result<ProcessingSlot> {
        let limits = self.limits.read().await;
        let mut state = self.state.write().await;

        let user_count = *state.user_count.get(user_id).unwrap_or(&0);
        if state.total_active >= limits.max_concurrent_tasks
            || user_count >= limits.max_user_concurrent_tasks
        {
            return Err(CoreError::ConcurrencyLimitReached);
        }

        let now = now_unix();
        let slot = ProcessingSlot {
            slot_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
            acquired_at: now,
            last_active: now,
        };

        state.active_slots.insert(slot.slot_id.clone(), slot.clone());
        *state.user_count.entry(user_id.to_string()).or_insert(0) += 1;
        state.total_active += 1;
        drop(state);

        self.stats.lock().await.acquired_total += 1;
        Ok(slot)
    }

    pub async fn release(&self, slot_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(slot) = state.active_slots.remove(slot_id) else {
            return Err(CoreError::NotFound(format!("slot {slot_id}")));
        };
        if let Some(count) = state.user_count.get_mut(&slot.user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.user_count.remove(&slot.user_id);
            }
        }
        state.total_active = state.total_active.saturating_sub(1);
        drop(state);

        let duration = (now_unix() - slot.acquired_at).max(0) as f64;
        let mut stats = self.stats.lock().await;
        let n = stats.released_total as f64;
        stats.average_slot_duration_secs = (stats.average_slot_duration_secs * n + duration) / (n + 1.0);
        stats.released_total += 1;
        Ok(())
    }

    pub async fn update_activity(&self, slot_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let slot = state
            .active_slots
            .get_mut(slot_id)
            .ok_or_else(|| CoreError::NotFound(format!("slot {slot_id}")))?;
        slot.last_active = now_unix();
        Ok(())
    }

    /// Releases every slot whose `last_active` is older than `slot_ttl`,
    /// as if by `release`, logging a warning for each. Guards against
    /// crashed workers that never released their slot.
    pub async fn cleanup_stale(&self) -> usize {
        let ttl = self.limits.read().await.slot_ttl.as_secs() as i64;
        let now = now_unix();
        let stale: Vec<String> = {
            let state = self.state.read().await;
            state
                .active_slots
                .values()
                .filter(|slot| now - slot.last_active > ttl)
                .map(|slot| slot.slot_id.clone())
                .collect()
        };
        for slot_id in &stale {
            if self.release(slot_id).await.is_ok() {
                warn!(slot_id, "reaped stale processing slot");
            }
        }
        self.stats.lock().await.stale_evicted_total += stale.len() as u64;
        stale.len()
    }

    pub async fn stats(&self) -> GateStats {
        self.stats.lock().await.clone()
    }

    pub async fn total_active(&self) -> usize {
        self.state.read().await.total_active
    }

    pub async fn user_active(&self, user_id: &str) -> usize {
        *self.state.read().await.user_count.get(user_id).unwrap_or(&0)
    }

    /// Validates `1 <= max_user_concurrent_tasks <= max_concurrent_tasks`
    /// before applying the new limits.
    pub async fn update_limits(&self, max_user_concurrent_tasks: usize, max_concurrent_tasks: usize) -> Result<()> {
        if max_user_concurrent_tasks == 0 || max_user_concurrent_tasks > max_concurrent_tasks {
            return Err(CoreError::validation(
                "update_limits",
                "max_user_concurrent_tasks must be in [1, max_concurrent_tasks]",
            ));
        }
        let mut limits = self.limits.write().await;
        limits.max_user_concurrent_tasks = max_user_concurrent_tasks;
        limits.max_concurrent_tasks = max_concurrent_tasks;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_user_limit_rejects_third_concurrent_acquire() {
        let gate = ConcurrencyGate::new(10, 2, Duration::from_secs(600));
        let a = gate.acquire("u1", "t1", "w1").await.unwrap();
        let _b = gate.acquire("u1", "t2", "w1").await.unwrap();
        assert!(matches!(
            gate.acquire("u1", "t3", "w1").await,
            Err(CoreError::ConcurrencyLimitReached)
        ));

        gate.release(&a.slot_id).await.unwrap();
        assert!(gate.acquire("u1", "t4", "w1").await.is_ok());
    }

    #[tokio::test]
    async fn global_limit_is_independent_of_per_user_limit() {
        let gate = ConcurrencyGate::new(1, 10, Duration::from_secs(600));
        let _a = gate.acquire("u1", "t1", "w1").await.unwrap();
        assert!(matches!(
            gate.acquire("u2", "t2", "w1").await,
            Err(CoreError::ConcurrencyLimitReached)
        ));
    }

    #[tokio::test]
    async fn cleanup_stale_releases_slots_past_ttl() {
        let gate = ConcurrencyGate::new(10, 10, Duration::from_secs(0));
        gate.acquire("u1", "t1", "w1").await.unwrap();
        let evicted = gate.cleanup_stale().await;
        assert_eq!(evicted, 1);
        assert_eq!(gate.total_active().await, 0);
    }

    #[tokio::test]
    async fn update_limits_rejects_user_cap_above_global_cap() {
        let gate = ConcurrencyGate::new(5, 5, Duration::from_secs(600));
        assert!(gate.update_limits(10, 5).await.is_err());
        assert!(gate.update_limits(3, 5).await.is_ok());
    }

    #[tokio::test]
    async fn release_unknown_slot_is_not_found() {
        let gate = ConcurrencyGate::new(5, 5, Duration::from_secs(600));
        assert!(matches!(
            gate.release("missing").await,
            Err(CoreError::NotFound(_))
        ));
    }
}
