pub mod pool;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::cancel::CancelToken;
use crate::concurrency::ConcurrencyGate;
use crate::constants::{CONCURRENCY_LIMIT_BACKOFF, WORKER_EMPTY_QUEUE_SLEEP};
use crate::error::{CoreError, Result};
use crate::executor::Executor;
use crate::models::{ExecutionOutcome, ExecutionRecord, ExecutionStatus, TaskStatus};
use crate::queue::manager::QueueManager;
use crate::queue::TaskQueue;
use crate::repository::Repository;

pub use pool::WorkerPool;

struct RunState {
    is_healthy: bool,
    last_heartbeat: i64,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// A single consumer of the task queue. Stateful only in its
/// statistics and `RunState`; all durable state lives in the queue and
/// repository, so a worker can be dropped and replaced freely.
pub struct Worker {
    pub worker_id: String,
    task_queue: Arc<TaskQueue>,
    queue_manager: Arc<QueueManager>,
    gate: Arc<ConcurrencyGate>,
    repository: Arc<dyn Repository>,
    executor: Arc<dyn Executor>,
    run_state: RwLock<RunState>,
    stats: Mutex<WorkerStats>,
    task_timeout_secs: u64,
    heartbeat_interval: Duration,
}

impl Worker {
    pub fn new(
        worker_id: String,
        task_queue: Arc<TaskQueue>,
        queue_manager: Arc<QueueManager>,
        gate: Arc<ConcurrencyGate>,
        repository: Arc<dyn Repository>,
        executor: Arc<dyn Executor>,
        task_timeout_secs: u64,
        heartbeat_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            worker_id,
            task_queue,
            queue_manager,
            gate,
            repository,
            executor,
            run_state: RwLock::new(RunState {
                is_healthy: true,
                last_heartbeat: chrono::Utc::now().timestamp(),
            }),
            stats: Mutex::new(WorkerStats::default()),
            task_timeout_secs,
            heartbeat_interval,
        })
    }

    /// Launches the main loop, heartbeat, and health tick as three
    /// independent cancellable tasks and blocks until all three exit.
    pub async fn run(self: Arc<Self>, cancel: CancelToken) {
        let main = {
            let worker = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.main_loop(cancel).await })
        };
        let heartbeat = {
            let worker = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.heartbeat_loop(cancel).await })
        };
        let health = {
            let worker = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.health_tick_loop(cancel).await })
        };
        let _ = futures::future::join_all([main, heartbeat, health]).await;
    }

    pub async fn is_healthy(&self) -> bool {
        self.run_state.read().await.is_healthy
    }

    pub async fn stats(&self) -> WorkerStats {
        self.stats.lock().await.clone()
    }

    async fn main_loop(&self, cancel: CancelToken) {
        loop {
            if cancel.is_cancelled() {
                debug!(worker_id = %self.worker_id, "main loop cancelled");
                return;
            }

            let messages = match self.task_queue.dequeue(1).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(worker_id = %self.worker_id, error = %e, "dequeue failed");
                    tokio::time::sleep(WORKER_EMPTY_QUEUE_SLEEP).await;
                    continue;
                }
            };
            let Some(message) = messages.into_iter().next() else {
                tokio::time::sleep(WORKER_EMPTY_QUEUE_SLEEP).await;
                continue;
            };

            let slot = match self.gate.acquire(&message.user_id, &message.task_id, &self.worker_id).await {
                Ok(slot) => slot,
                Err(CoreError::ConcurrencyLimitReached) => {
                    // Message stays visible in flight; it will be redelivered
                    // once its visibility timeout lapses.
                    tokio::time::sleep(CONCURRENCY_LIMIT_BACKOFF).await;
                    continue;
                }
                Err(e) => {
                    warn!(worker_id = %self.worker_id, error = %e, "failed to acquire a processing slot");
                    continue;
                }
            };

            self.process_message(message, cancel.clone()).await;
            if let Err(e) = self.gate.release(&slot.slot_id).await {
                warn!(worker_id = %self.worker_id, error = %e, "failed to release processing slot");
            }
        }
    }

    async fn process_message(&self, message: crate::models::TaskMessage, cancel: CancelToken) {
        let task = match self.repository.get_task(&message.task_id).await {
            Ok(task) => task,
            Err(CoreError::NotFound(_)) => {
                // Phantom task: the message outlived its metadata. Drop it
                // without retrying.
                if let Some(handle) = &message.receipt_handle {
                    let _ = self.task_queue.delete(handle).await;
                }
                return;
            }
            Err(e) => {
                warn!(worker_id = %self.worker_id, error = %e, "failed to load task, leaving message in flight");
                return;
            }
        };

        let execution = ExecutionRecord::new(task.id.clone());
        let execution_id = execution.id.clone();
        if let Err(e) = self.repository.create_execution(execution).await {
            error!(worker_id = %self.worker_id, error = %e, "failed to create execution record");
            return;
        }
        if let Err(e) = self.repository.update_task_status(&task.id, TaskStatus::Running).await {
            error!(worker_id = %self.worker_id, error = %e, "failed to mark task running");
        }

        let deadline = Duration::from_secs(self.task_timeout_secs.min(task.timeout_secs));
        let started_at = chrono::Utc::now();
        let outcome = match tokio::time::timeout(deadline, self.executor.execute(&task, &execution_id, cancel)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.fail(message, &e.to_string()).await;
                return;
            }
            Err(_) => ExecutionOutcome {
                status: ExecutionStatus::Timeout,
                return_code: None,
                stdout: String::new(),
                stderr: "execution exceeded the worker-enforced deadline".to_string(),
                execution_time_ms: (chrono::Utc::now() - started_at).num_milliseconds().max(0) as u64,
                started_at,
                completed_at: chrono::Utc::now(),
            },
        };

        if let Err(e) = self.repository.update_execution(&execution_id, &outcome).await {
            error!(worker_id = %self.worker_id, error = %e, "failed to persist execution outcome");
        }
        let terminal_status = terminal_task_status(outcome.status);
        if let Err(e) = self.repository.update_task_status(&task.id, terminal_status).await {
            error!(worker_id = %self.worker_id, error = %e, "failed to persist terminal task status");
        }

        match outcome.status {
            ExecutionStatus::Completed => {
                if let Some(handle) = &message.receipt_handle {
                    let _ = self.task_queue.delete(handle).await;
                }
                self.stats.lock().await.tasks_completed += 1;
            }
            _ => {
                self.fail(message, &outcome.stderr).await;
                self.stats.lock().await.tasks_failed += 1;
            }
        }
    }

    async fn fail(&self, message: crate::models::TaskMessage, reason: &str) {
        if let Err(e) = self.queue_manager.fail_task(message, reason).await {
            error!(worker_id = %self.worker_id, error = %e, "fail_task failed");
        }
    }

    async fn heartbeat_loop(&self, cancel: CancelToken) {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.run_state.write().await.last_heartbeat = chrono::Utc::now().timestamp();
                }
            }
        }
    }

    async fn health_tick_loop(&self, cancel: CancelToken) {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let healthy = self.queue_manager.is_healthy().await && self.executor.health_check().await;
                    self.run_state.write().await.is_healthy = healthy;
                }
            }
        }
    }
}

fn terminal_task_status(status: ExecutionStatus) -> TaskStatus {
    match status {
        ExecutionStatus::Completed => TaskStatus::Completed,
        ExecutionStatus::Failed => TaskStatus::Failed,
        ExecutionStatus::Timeout => TaskStatus::Timeout,
        ExecutionStatus::Cancelled => TaskStatus::Cancelled,
        ExecutionStatus::Running => TaskStatus::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::executor::mock::{MockExecutor, TRIGGER_FAIL};
    use crate::models::{ScriptType, Task, TaskMessage};
    use crate::repository::InMemoryRepository;
    use crate::store::fake::FakeStoreClient;

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

    fn test_worker() -> (Arc<Worker>, Arc<QueueManager>, Arc<InMemoryRepository>) {
        let store = Arc::new(FakeStoreClient::default());
        let manager = Arc::new(QueueManager::new(store, queue_config()));
        let gate = ConcurrencyGate::new(10, 10, Duration::from_secs(600));
        let repository = Arc::new(InMemoryRepository::new());
        let executor: Arc<dyn Executor> = Arc::new(MockExecutor::new().unwrap());
        let worker = Worker::new(
            "worker-1".to_string(),
            manager.task_queue(),
            manager.clone(),
            gate,
            repository.clone(),
            executor,
            30,
            Duration::from_secs(15),
        );
        (worker, manager, repository)
    }

    #[tokio::test]
    async fn completes_a_benign_task_and_deletes_the_message() {
        let (worker, manager, repository) = test_worker();
        let task = Task::new("u1", ScriptType::Bash, "echo hi", 5, 30);
        repository.save_task(task.clone()).await.unwrap();

        let mut message = TaskMessage::new(task.id.clone(), "u1", 5, ScriptType::Bash, "echo hi");
        message.queued_at = 1;
        manager.task_queue.enqueue(message).await.unwrap();

        let dequeued = manager.task_queue.dequeue(1).await.unwrap();
        worker.process_message(dequeued[0].clone(), CancelToken::new()).await;

        assert_eq!(manager.task_queue.size().await.unwrap(), 0);
        let fetched = repository.get_task(&task.id).await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn phantom_task_is_dropped_without_retry() {
        let (worker, manager, _repository) = test_worker();
        let mut message = TaskMessage::new("missing-task", "u1", 5, ScriptType::Bash, "echo hi");
        message.queued_at = 1;
        manager.task_queue.enqueue(message).await.unwrap();

        let dequeued = manager.task_queue.dequeue(1).await.unwrap();
        worker.process_message(dequeued[0].clone(), CancelToken::new()).await;

        assert_eq!(manager.task_queue.size().await.unwrap(), 0);
        assert_eq!(manager.retry_queue().size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failing_task_is_routed_through_fail_task() {
        let (worker, manager, repository) = test_worker();
        let content = format!("echo before\n{TRIGGER_FAIL}");
        let task = Task::new("u1", ScriptType::Bash, content.clone(), 5, 30);
        repository.save_task(task.clone()).await.unwrap();

        let mut message = TaskMessage::new(task.id.clone(), "u1", 5, ScriptType::Bash, content);
        message.queued_at = 1;
        manager.task_queue.enqueue(message).await.unwrap();

        let dequeued = manager.task_queue.dequeue(1).await.unwrap();
        worker.process_message(dequeued[0].clone(), CancelToken::new()).await;

        assert_eq!(manager.task_queue.size().await.unwrap(), 0);
        assert_eq!(manager.retry_queue().size().await.unwrap(), 1);
    }
}
