pub mod log_demux;
pub mod mock;
pub mod sandbox;

use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::cleanup::CleanupTracker;
use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::models::{ExecutionOutcome, Task};

pub use mock::MockExecutor;
pub use sandbox::SandboxExecutor;

/// Satisfied by both the container-runtime-backed executor and its
/// mock fallback, so the worker never needs to know which it holds.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &Task, execution_id: &str, cancel: CancelToken) -> Result<ExecutionOutcome>;
    async fn cancel(&self, execution_id: &str) -> Result<()>;
    async fn health_check(&self) -> bool;
}

/// Probes for a reachable container runtime at startup and falls back
/// to the mock executor if none is found, per the sandbox/mock sum type.
pub async fn build_executor(config: ExecutorConfig, cleanup: Arc<CleanupTracker>) -> Result<Arc<dyn Executor>> {
    match Docker::connect_with_local_defaults() {
        Ok(docker) => {
            let docker = Arc::new(docker);
            if docker.ping().await.is_ok() {
                info!("container runtime reachable, using sandbox executor");
                return Ok(Arc::new(SandboxExecutor::new(docker, cleanup, config)?));
            }
            warn!("container runtime unreachable, falling back to mock executor");
        }
        Err(e) => warn!(error = %e, "failed to connect to container runtime, falling back to mock executor"),
    }
    Ok(Arc::new(MockExecutor::new()?))
}
