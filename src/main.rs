use std::sync::Arc;
use std::time::Duration;

use bollard::Docker;
use tracing::{error, info, warn, Level};

use task_exec_core::cancel::CancelToken;
use task_exec_core::cleanup::CleanupTracker;
use task_exec_core::concurrency::ConcurrencyGate;
use task_exec_core::config::Config;
use task_exec_core::error::{CoreError, Result};
use task_exec_core::executor::build_executor;
use task_exec_core::monitoring::HealthMonitor;
use task_exec_core::queue::QueueManager;
use task_exec_core::repository::{InMemoryRepository, Repository};
use task_exec_core::store::{RedisStoreClient, StoreClient};
use task_exec_core::worker::WorkerPool;

/// Startup is leaves-first: store client, queues, queue manager,
/// concurrency gate, executor, worker pool, workers. Shutdown reverses it,
/// each step under its own deadline.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("starting task execution core");

    let config = Config::load()?;
    run(config).await?;
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let store: Arc<dyn StoreClient> = Arc::new(RedisStoreClient::connect(&config.store).await?);
    store.health_check().await?;

    let queue_manager = Arc::new(QueueManager::new(store, config.queue.clone()));
    queue_manager.start().await?;

    let gate = ConcurrencyGate::new(
        config.worker.max_concurrent_tasks,
        config.worker.max_user_concurrent_tasks,
        Duration::from_secs(config.worker.stale_task_threshold_secs),
    );

    // The in-memory repository is a development/standalone-mode default;
    // a real deployment wires in its own Task/Execution metadata store
    // behind the same `Repository` trait.
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());

    let docker = Arc::new(
        Docker::connect_with_local_defaults()
            .map_err(|e| CoreError::ContainerRuntimeUnavailable(e.to_string()))?,
    );
    let cleanup_tracker = CleanupTracker::new(docker);
    let executor = build_executor(config.executor.clone(), cleanup_tracker.clone()).await?;

    let pool = WorkerPool::new(
        config.worker.clone(),
        queue_manager.clone(),
        gate.clone(),
        repository,
        executor.clone(),
    );
    pool.start().await?;

    let cleanup_cancel = CancelToken::new();
    let cleanup_handle = {
        let tracker = cleanup_tracker.clone();
        let cancel = cleanup_cancel.clone();
        tokio::spawn(async move { tracker.run(cancel).await })
    };

    let monitor = HealthMonitor::new(queue_manager.clone(), gate.clone(), executor.clone(), pool.clone());

    info!("task execution core started, awaiting shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal, shutting down anyway");
    }
    info!("shutdown signal received, stopping subsystems");

    let report = monitor.report().await;
    info!(status = ?report.status, "final health report before shutdown");

    let shutdown_timeout = Duration::from_secs(config.worker.shutdown_timeout_secs);

    if let Err(e) = pool.stop(shutdown_timeout).await {
        error!(error = %e, "worker pool did not stop cleanly");
    }

    cleanup_cancel.cancel();
    let _ = tokio::time::timeout(shutdown_timeout, cleanup_handle).await;
    let removed = cleanup_tracker.cleanup_all().await;
    info!(removed, "force-removed remaining tracked containers");

    if let Err(e) = queue_manager.stop(shutdown_timeout).await {
        error!(error = %e, "queue manager did not stop cleanly");
    }

    info!("task execution core stopped");
    Ok(())
}
