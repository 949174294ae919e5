use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::concurrency::ConcurrencyGate;
use crate::config::WorkerConfig;
use crate::constants::{AUTOSCALE_TICK, POOL_HEALTHY_WORKER_FRACTION, SCALE_DOWN_THRESHOLD, SCALE_UP_THRESHOLD};
use crate::error::{CoreError, Result};
use crate::executor::Executor;
use crate::queue::manager::QueueManager;
use crate::repository::Repository;

use super::Worker;

struct WorkerEntry {
    worker: Arc<Worker>,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

/// Owns a slice of workers and the shared concurrency gate. Bounded by
/// `[min_workers, max_workers]`, scaled on a timer against the
/// observed active/size ratio.
pub struct WorkerPool {
    entries: RwLock<HashMap<String, WorkerEntry>>,
    config: WorkerConfig,
    queue_manager: Arc<QueueManager>,
    gate: Arc<ConcurrencyGate>,
    repository: Arc<dyn Repository>,
    executor: Arc<dyn Executor>,
    autoscale_handle: Mutex<Option<JoinHandle<()>>>,
    autoscale_cancel: CancelToken,
    next_id: AtomicU64,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue_manager: Arc<QueueManager>,
        gate: Arc<ConcurrencyGate>,
        repository: Arc<dyn Repository>,
        executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            config,
            queue_manager,
            gate,
            repository,
            executor,
            autoscale_handle: Mutex::new(None),
            autoscale_cancel: CancelToken::new(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Launches `min_workers` workers and the auto-scaling tick.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for _ in 0..self.config.min_workers {
            self.add_worker().await?;
        }

        let pool = self.clone();
        let cancel = self.autoscale_cancel.clone();
        let handle = tokio::spawn(async move { pool.autoscale_loop(cancel).await });
        *self.autoscale_handle.lock().await = Some(handle);

        info!(workers = self.config.min_workers, "worker pool started");
        Ok(())
    }

    pub async fn stop(&self, shutdown_timeout: Duration) -> Result<()> {
        self.autoscale_cancel.cancel();
        if let Some(handle) = self.autoscale_handle.lock().await.take() {
            let _ = tokio::time::timeout(shutdown_timeout, handle).await;
        }

        let mut entries = self.entries.write().await;
        for entry in entries.values() {
            entry.cancel.cancel();
        }
        let handles: Vec<JoinHandle<()>> = entries.drain().map(|(_, e)| e.handle).collect();
        drop(entries);

        let joined = tokio::time::timeout(shutdown_timeout, futures::future::join_all(handles)).await;
        if joined.is_err() {
            warn!("worker pool shutdown exceeded deadline");
        }
        info!("worker pool stopped");
        Ok(())
    }

    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Adds one worker, bounded by `max_workers`.
    pub async fn add_worker(self: &Arc<Self>) -> Result<String> {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.config.max_workers {
            return Err(CoreError::Internal("worker pool already at max_workers".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let worker_id = format!("{}-{id}", self.config.worker_id_prefix);

        let worker = Worker::new(
            worker_id.clone(),
            self.queue_manager.task_queue(),
            self.queue_manager.clone(),
            self.gate.clone(),
            self.repository.clone(),
            self.executor.clone(),
            self.config.task_timeout_secs,
            Duration::from_secs(self.config.heartbeat_interval_secs),
        );

        let cancel = CancelToken::new();
        let run_worker = worker.clone();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { run_worker.run(run_cancel).await });

        entries.insert(worker_id.clone(), WorkerEntry { worker, cancel, handle });
        debug!(worker_id, "worker added");
        Ok(worker_id)
    }

    /// Removes one worker, bounded by `min_workers`. Which worker is
    /// chosen is unspecified; the pool only guarantees the count shrinks.
    pub async fn remove_worker(&self, worker_id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.len() <= self.config.min_workers {
            return Err(CoreError::Internal("worker pool already at min_workers".to_string()));
        }
        let Some(entry) = entries.remove(worker_id) else {
            return Err(CoreError::NotFound(format!("worker {worker_id}")));
        };
        entry.cancel.cancel();
        drop(entries);
        let _ = entry.handle.await;
        Ok(())
    }

    async fn remove_any_worker(&self) -> Result<()> {
        let id = {
            let entries = self.entries.read().await;
            entries.keys().next().cloned()
        };
        match id {
            Some(id) => self.remove_worker(&id).await,
            None => Ok(()),
        }
    }

    /// `true` iff at least half the workers report healthy and the
    /// queue manager and executor both pass their own health probes.
    pub async fn is_healthy(&self) -> bool {
        let entries = self.entries.read().await;
        if entries.is_empty() {
            return false;
        }
        let mut healthy = 0;
        for entry in entries.values() {
            if entry.worker.is_healthy().await {
                healthy += 1;
            }
        }
        let fraction = healthy as f64 / entries.len() as f64;
        drop(entries);

        fraction >= POOL_HEALTHY_WORKER_FRACTION
            && self.queue_manager.is_healthy().await
            && self.executor.health_check().await
    }

    async fn autoscale_loop(self: Arc<Self>, cancel: CancelToken) {
        let mut ticker = tokio::time::interval(AUTOSCALE_TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("autoscale loop cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    self.autoscale_tick().await;
                }
            }
        }
    }

    async fn autoscale_tick(self: &Arc<Self>) {
        let size = self.size().await;
        if size == 0 {
            return;
        }
        let active = self.gate.total_active().await as f64;
        let ratio = active / size as f64;

        if ratio > SCALE_UP_THRESHOLD && size < self.config.max_workers {
            if let Err(e) = self.add_worker().await {
                warn!(error = %e, "autoscale up failed");
            } else {
                debug!(ratio, size, "autoscale: scaled up");
            }
        } else if ratio < SCALE_DOWN_THRESHOLD && size > self.config.min_workers {
            if let Err(e) = self.remove_any_worker().await {
                warn!(error = %e, "autoscale down failed");
            } else {
                debug!(ratio, size, "autoscale: scaled down");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::executor::mock::MockExecutor;
    use crate::repository::InMemoryRepository;
    use crate::store::fake::FakeStoreClient;

    fn worker_config(min: usize, max: usize) -> WorkerConfig {
        WorkerConfig {
            pool_size: min,
            min_workers: min,
            max_workers: max,
            max_concurrent_tasks: 20,
            max_user_concurrent_tasks: 5,
            task_timeout_secs: 30,
            heartbeat_interval_secs: 15,
            shutdown_timeout_secs: 5,
            stale_task_threshold_secs: 3600,
            worker_id_prefix: "worker".to_string(),
        }
    }

    fn queue_config() -> QueueConfig {
        QueueConfig {
            task_queue_name: "tasks".to_string(),
            retry_queue_name: "tasks-retry".to_string(),
            dead_letter_queue_name: "tasks-dlq".to_string(),
            default_priority: 5,
            max_retries: 3,
            retry_delay_secs: 10,
            retry_backoff_factor: 2.0,
            max_retry_delay_secs: 300,
            visibility_timeout_secs: 30,
            message_ttl_secs: 0,
            batch_size: 10,
        }
    }

    fn pool(min: usize, max: usize) -> Arc<WorkerPool> {
        let store = Arc::new(FakeStoreClient::default());
        let manager = Arc::new(QueueManager::new(store, queue_config()));
        let gate = ConcurrencyGate::new(20, 5, Duration::from_secs(600));
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let executor: Arc<dyn Executor> = Arc::new(MockExecutor::new().unwrap());
        WorkerPool::new(worker_config(min, max), manager, gate, repository, executor)
    }

    #[tokio::test]
    async fn start_launches_min_workers() {
        let pool = pool(2, 5);
        pool.start().await.unwrap();
        assert_eq!(pool.size().await, 2);
        pool.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn add_worker_respects_max_workers() {
        let pool = pool(1, 2);
        pool.start().await.unwrap();
        pool.add_worker().await.unwrap();
        assert_eq!(pool.size().await, 2);
        assert!(pool.add_worker().await.is_err());
        pool.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn remove_worker_respects_min_workers() {
        let pool = pool(2, 5);
        pool.start().await.unwrap();
        assert!(pool.remove_any_worker().await.is_err() || pool.size().await == 2);
        pool.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn is_healthy_false_with_no_workers() {
        let pool = pool(0, 5);
        assert!(!pool.is_healthy().await);
    }
}
