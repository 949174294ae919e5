//! Rolls point-in-time health and counters up from each subsystem's own
//! probe rather than tracking state of its own; this module has no
//! background task and no state beyond the `Arc`s it was handed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::concurrency::ConcurrencyGate;
use crate::executor::Executor;
use crate::queue::manager::QueueManager;
use crate::worker::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub queue_manager_healthy: bool,
    pub executor_healthy: bool,
    pub worker_pool_healthy: bool,
    pub task_queue_depth: usize,
    pub retry_queue_depth: usize,
    pub dead_letter_queue_depth: usize,
    pub active_processing_slots: usize,
    pub worker_count: usize,
}

/// Aggregates probes from the queue manager, concurrency gate, executor,
/// and worker pool into one report an embedder can poll or serve; no
/// HTTP listener lives in this module.
pub struct HealthMonitor {
    queue_manager: Arc<QueueManager>,
    gate: Arc<ConcurrencyGate>,
    executor: Arc<dyn Executor>,
    worker_pool: Arc<WorkerPool>,
}

impl HealthMonitor {
    pub fn new(
        queue_manager: Arc<QueueManager>,
        gate: Arc<ConcurrencyGate>,
        executor: Arc<dyn Executor>,
        worker_pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            queue_manager,
            gate,
            executor,
            worker_pool,
        }
    }

    pub async fn report(&self) -> HealthReport {
        let queue_manager_healthy = self.queue_manager.is_healthy().await;
        let executor_healthy = self.executor.health_check().await;
        let worker_pool_healthy = self.worker_pool.is_healthy().await;

        let task_queue_depth = self.queue_manager.task_queue().size().await.unwrap_or(0);
        let retry_queue_depth = self.queue_manager.retry_queue().size().await.unwrap_or(0);
        let dead_letter_queue_depth = self.queue_manager.dead_letter_queue().size().await.unwrap_or(0);

        let status = if queue_manager_healthy && executor_healthy && worker_pool_healthy {
            HealthStatus::Healthy
        } else if queue_manager_healthy {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport {
            status,
            queue_manager_healthy,
            executor_healthy,
            worker_pool_healthy,
            task_queue_depth,
            retry_queue_depth,
            dead_letter_queue_depth,
            active_processing_slots: self.gate.total_active().await,
            worker_count: self.worker_pool.size().await,
        }
    }
}
