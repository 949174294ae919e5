use std::collections::HashMap;
use std::sync::Arc;

use bollard::container::{ListContainersOptions, RemoveContainerOptions};
use bollard::Docker;
use tracing::{debug, error, warn};

use crate::cancel::CancelToken;
use crate::constants::{CLEANUP_TRACKER_TICK, CONTAINER_NAME_PREFIX, CONTAINER_STALE_THRESHOLD};
use crate::error::Result;
use crate::models::{ContainerDescriptor, ContainerStatus};

/// Tracks every container the Sandbox Executor has created so each one
/// is removed on every exit path, including crash recovery across
/// process restarts (`force_cleanup_orphaned`).
pub struct CleanupTracker {
    docker: Arc<Docker>,
    containers: tokio::sync::RwLock<HashMap<String, ContainerDescriptor>>,
}

impl CleanupTracker {
    pub fn new(docker: Arc<Docker>) -> Arc<Self> {
        Arc::new(Self {
            docker,
            containers: tokio::sync::RwLock::new(HashMap::new()),
        })
    }

    pub async fn register(&self, descriptor: ContainerDescriptor) {
        self.containers
            .write()
            .await
            .insert(descriptor.container_id.clone(), descriptor);
    }

    pub async fn mark_started(&self, container_id: &str, started_at: i64) {
        if let Some(descriptor) = self.containers.write().await.get_mut(container_id) {
            descriptor.started_at = Some(started_at);
            descriptor.status = ContainerStatus::Running;
        }
    }

    pub async fn mark_completed(&self, container_id: &str, status: ContainerStatus) {
        if let Some(descriptor) = self.containers.write().await.get_mut(container_id) {
            descriptor.status = status;
        }
    }

    pub async fn unregister(&self, container_id: &str) -> Option<ContainerDescriptor> {
        self.containers.write().await.remove(container_id)
    }

    pub async fn tracked_count(&self) -> usize {
        self.containers.read().await.len()
    }

    /// Best-effort force removal; a missing container is not an error
    /// since it means the runtime already reaped it.
    pub async fn force_remove(&self, container_id: &str) -> Result<()> {
        match self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(crate::error::CoreError::ContainerRuntimeUnavailable(e.to_string())),
        }
    }

    /// Removes every descriptor whose creation predates the stale
    /// threshold, on the assumption its owning task died without
    /// cleaning up.
    pub async fn reap_stale(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let threshold = CONTAINER_STALE_THRESHOLD.as_secs() as i64;
        let stale: Vec<String> = {
            let containers = self.containers.read().await;
            containers
                .values()
                .filter(|d| now - d.created_at > threshold)
                .map(|d| d.container_id.clone())
                .collect()
        };
        for container_id in &stale {
            if let Err(e) = self.force_remove(container_id).await {
                warn!(container_id, error = %e, "failed to reap stale container");
                continue;
            }
            self.unregister(container_id).await;
            warn!(container_id, "reaped stale container");
        }
        stale.len()
    }

    /// Force-removes every container currently tracked, regardless of
    /// age. Invoked at shutdown.
    pub async fn cleanup_all(&self) -> usize {
        let ids: Vec<String> = self.containers.read().await.keys().cloned().collect();
        let mut removed = 0;
        for container_id in &ids {
            if self.force_remove(container_id).await.is_ok() {
                self.unregister(container_id).await;
                removed += 1;
            }
        }
        removed
    }

    /// Lists every container on the host whose name carries the service
    /// prefix and removes any not present in the in-memory tracker — a
    /// defense against a process restart that lost its tracked state.
    pub async fn force_cleanup_orphaned(&self) -> Result<usize> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![CONTAINER_NAME_PREFIX.to_string()]);

        let host_containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| crate::error::CoreError::ContainerRuntimeUnavailable(e.to_string()))?;

        let orphan_ids: Vec<String> = {
            let tracked = self.containers.read().await;
            host_containers
                .into_iter()
                .filter_map(|c| c.id)
                .filter(|id| !tracked.contains_key(id))
                .collect()
        };

        let mut orphaned = 0;
        for id in &orphan_ids {
            if self.force_remove(id).await.is_ok() {
                orphaned += 1;
                error!(container_id = %id, "removed orphaned container from a prior process");
            }
        }
        Ok(orphaned)
    }

    pub async fn run(&self, cancel: CancelToken) {
        let mut ticker = tokio::time::interval(CLEANUP_TRACKER_TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("cleanup tracker cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    let reaped = self.reap_stale().await;
                    if reaped > 0 {
                        debug!(reaped, "cleanup tracker reaped stale containers");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, created_at: i64) -> ContainerDescriptor {
        ContainerDescriptor {
            container_id: id.to_string(),
            task_id: "t1".to_string(),
            execution_id: "e1".to_string(),
            image: "alpine:3.18".to_string(),
            created_at,
            started_at: None,
            status: ContainerStatus::Created,
        }
    }

    #[tokio::test]
    async fn register_and_unregister_round_trip() {
        let docker = Arc::new(Docker::connect_with_local_defaults().unwrap());
        let tracker = CleanupTracker::new(docker);
        tracker.register(descriptor("c1", chrono::Utc::now().timestamp())).await;
        assert_eq!(tracker.tracked_count().await, 1);
        let removed = tracker.unregister("c1").await;
        assert!(removed.is_some());
        assert_eq!(tracker.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn mark_started_sets_running_status() {
        let docker = Arc::new(Docker::connect_with_local_defaults().unwrap());
        let tracker = CleanupTracker::new(docker);
        tracker.register(descriptor("c1", chrono::Utc::now().timestamp())).await;
        tracker.mark_started("c1", chrono::Utc::now().timestamp()).await;
        let containers = tracker.containers.read().await;
        assert_eq!(containers["c1"].status, ContainerStatus::Running);
    }
}
