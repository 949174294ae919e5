use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bollard::container::{
    Config as DockerConfig, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::cleanup::CleanupTracker;
use crate::config::ExecutorConfig;
use crate::error::{CoreError, Result};
use crate::models::{ContainerDescriptor, ContainerStatus, ExecutionOutcome, ExecutionStatus, ScriptType, Task};
use crate::security::{
    validate_container_config, ContainerConfig as SecurityContainerConfig, ResourceLimits, SecurityCaps,
    SecurityValidator, TmpfsMount,
};

use super::Executor;

/// Container-runtime-backed executor: validates the script and the
/// container config it would use, then runs it in a locked-down
/// container and reports the outcome.
pub struct SandboxExecutor {
    docker: Arc<Docker>,
    cleanup: Arc<CleanupTracker>,
    validator: SecurityValidator,
    config: ExecutorConfig,
    caps: SecurityCaps,
}

fn image_for(config: &ExecutorConfig, script_type: ScriptType) -> &str {
    match script_type {
        ScriptType::Python => &config.python_image,
        ScriptType::Bash => &config.bash_image,
        ScriptType::JavaScript => &config.javascript_image,
        ScriptType::Go => &config.go_image,
    }
}

fn command_for(script_type: ScriptType, script_content: &str) -> Vec<String> {
    match script_type {
        ScriptType::Python => vec!["python3".to_string(), "-c".to_string(), script_content.to_string()],
        ScriptType::Bash => vec!["sh".to_string(), "-c".to_string(), script_content.to_string()],
        ScriptType::JavaScript => vec!["node".to_string(), "-e".to_string(), script_content.to_string()],
        ScriptType::Go => vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "cat > /workspace/main.go <<'TASK_EXEC_EOF'\n{script_content}\nTASK_EXEC_EOF\ncd /workspace && go run main.go"
            ),
        ],
    }
}

impl SandboxExecutor {
    pub fn new(docker: Arc<Docker>, cleanup: Arc<CleanupTracker>, config: ExecutorConfig) -> Result<Self> {
        let caps = SecurityCaps {
            max_memory_bytes: crate::constants::DEFAULT_MEMORY_CAP_BYTES,
            max_cpu_quota: crate::constants::DEFAULT_CPU_QUOTA_CAP,
            max_pids_limit: crate::constants::DEFAULT_PIDS_CAP,
            max_timeout_secs: crate::constants::DEFAULT_TIMEOUT_CAP_SECS,
        };
        Ok(Self {
            docker,
            cleanup,
            validator: SecurityValidator::new()?,
            config,
            caps,
        })
    }

    fn build_security_config(&self, task: &Task) -> SecurityContainerConfig {
        SecurityContainerConfig {
            image: image_for(&self.config, task.script_type).to_string(),
            uid: self.config.execution_uid,
            gid: self.config.execution_gid,
            read_only_rootfs: true,
            no_new_privileges: true,
            drop_all_capabilities: true,
            network_disabled: true,
            tmpfs_mounts: vec!["/tmp", "/var/tmp", "/workspace"]
                .into_iter()
                .map(|target| TmpfsMount {
                    target: target.to_string(),
                    noexec: true,
                    nosuid: true,
                })
                .collect(),
            working_dir: "/workspace".to_string(),
            resource_limits: ResourceLimits {
                memory_bytes: self.config.default_memory_bytes,
                cpu_quota: self.config.default_cpu_quota,
                pids_limit: self.config.default_pids_limit,
                timeout_secs: task.timeout_secs.min(self.config.default_timeout_secs),
            },
            seccomp_profile_path: self.config.seccomp_profile_path.clone(),
            env: vec![],
        }
    }

    fn to_docker_config(&self, security: &SecurityContainerConfig, command: Vec<String>) -> DockerConfig<String> {
        let tmpfs: HashMap<String, String> = security
            .tmpfs_mounts
            .iter()
            .map(|m| (m.target.clone(), "noexec,nosuid,size=64m".to_string()))
            .collect();

        let mut security_opt = vec!["no-new-privileges".to_string()];
        if let Some(profile) = &security.seccomp_profile_path {
            security_opt.push(format!("seccomp={profile}"));
        }

        let host_config = HostConfig {
            readonly_rootfs: Some(security.read_only_rootfs),
            network_mode: Some("none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(security_opt),
            memory: Some(security.resource_limits.memory_bytes as i64),
            cpu_quota: Some((security.resource_limits.cpu_quota * 100_000.0) as i64),
            cpu_period: Some(100_000),
            pids_limit: Some(security.resource_limits.pids_limit),
            tmpfs: Some(tmpfs),
            ..Default::default()
        };

        DockerConfig {
            image: Some(security.image.clone()),
            cmd: Some(command),
            working_dir: Some(security.working_dir.clone()),
            user: Some(format!("{}:{}", security.uid, security.gid)),
            env: Some(security.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl Executor for SandboxExecutor {
    async fn execute(&self, task: &Task, execution_id: &str, cancel: CancelToken) -> Result<ExecutionOutcome> {
        let started_at = chrono::Utc::now();

        if let Err(CoreError::SecurityRejected(reason)) = self.validator.validate_script(task.script_type, &task.script_content) {
            warn!(task_id = %task.id, reason = %reason, "rejected script before container creation");
            return Ok(ExecutionOutcome {
                status: ExecutionStatus::Failed,
                return_code: None,
                stdout: String::new(),
                stderr: reason,
                execution_time_ms: 0,
                started_at,
                completed_at: chrono::Utc::now(),
            });
        }

        let security_config = self.build_security_config(task);
        validate_container_config(&security_config, &self.caps)?;

        let command = command_for(task.script_type, &task.script_content);
        let docker_config = self.to_docker_config(&security_config, command);

        let name = format!("{}{execution_id}", crate::constants::CONTAINER_NAME_PREFIX);
        let created = self
            .docker
            .create_container(Some(CreateContainerOptions { name: name.clone(), platform: None }), docker_config)
            .await
            .map_err(|e| CoreError::ContainerRuntimeUnavailable(e.to_string()))?;
        let container_id = created.id;

        self.cleanup
            .register(ContainerDescriptor {
                container_id: container_id.clone(),
                task_id: task.id.clone(),
                execution_id: execution_id.to_string(),
                image: security_config.image.clone(),
                created_at: started_at.timestamp(),
                started_at: None,
                status: ContainerStatus::Created,
            })
            .await;

        if let Err(e) = self
            .docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self.cleanup.force_remove(&container_id).await;
            self.cleanup.unregister(&container_id).await;
            return Err(CoreError::ContainerRuntimeUnavailable(e.to_string()));
        }
        self.cleanup.mark_started(&container_id, chrono::Utc::now().timestamp()).await;

        let deadline = Duration::from_secs(security_config.resource_limits.timeout_secs);
        let wait = self.wait_for_exit(&container_id, deadline, &cancel).await;

        let (stdout, stderr) = self.collect_logs(&container_id).await;
        let completed_at = chrono::Utc::now();
        let execution_time_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        let (status, return_code) = match wait {
            WaitOutcome::Exited(code) => {
                if code == 0 {
                    (ExecutionStatus::Completed, Some(code as i32))
                } else {
                    (ExecutionStatus::Failed, Some(code as i32))
                }
            }
            WaitOutcome::Timeout => (ExecutionStatus::Timeout, None),
            WaitOutcome::Cancelled => (ExecutionStatus::Cancelled, None),
            WaitOutcome::Error => (ExecutionStatus::Failed, None),
        };

        let _ = self.cleanup.force_remove(&container_id).await;
        self.cleanup.mark_completed(&container_id, container_status_for(status)).await;
        self.cleanup.unregister(&container_id).await;

        Ok(ExecutionOutcome {
            status,
            return_code,
            stdout,
            stderr,
            execution_time_ms,
            started_at,
            completed_at,
        })
    }

    async fn cancel(&self, execution_id: &str) -> Result<()> {
        self.cleanup.force_cleanup_orphaned().await.ok();
        debug!(execution_id, "cancel requested; relying on cleanup tracker to remove the container");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

enum WaitOutcome {
    Exited(i64),
    Timeout,
    Cancelled,
    Error,
}

impl SandboxExecutor {
    async fn wait_for_exit(&self, container_id: &str, deadline: Duration, cancel: &CancelToken) -> WaitOutcome {
        let mut stream = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions<String>>);

        tokio::select! {
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            _ = tokio::time::sleep(deadline) => WaitOutcome::Timeout,
            next = stream.next() => match next {
                Some(Ok(response)) => WaitOutcome::Exited(response.status_code),
                Some(Err(_)) | None => WaitOutcome::Error,
            },
        }
    }

    async fn collect_logs(&self, container_id: &str) -> (String, String) {
        let mut stream = self.docker.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                Ok(_) => {}
                Err(_) => break,
            }
        }
        (
            String::from_utf8_lossy(&stdout).to_string(),
            String::from_utf8_lossy(&stderr).to_string(),
        )
    }
}

fn container_status_for(status: ExecutionStatus) -> ContainerStatus {
    match status {
        ExecutionStatus::Completed => ContainerStatus::Completed,
        ExecutionStatus::Running => ContainerStatus::Running,
        ExecutionStatus::Failed | ExecutionStatus::Timeout | ExecutionStatus::Cancelled => ContainerStatus::Stopped,
    }
}

/// Mints a fresh execution id; kept as a free function since both the
/// worker and tests need a container-name-safe identifier.
pub fn new_execution_id() -> String {
    Uuid::new_v4().to_string()
}
