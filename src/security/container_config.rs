use crate::error::{CoreError, Result};

use super::patterns::{ALLOWED_TMPFS_TARGETS, FORBIDDEN_WORKDIR_PREFIXES, IMAGE_ALLOW_LIST};

#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub memory_bytes: u64,
    pub cpu_quota: f64,
    pub pids_limit: i64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TmpfsMount {
    pub target: String,
    pub noexec: bool,
    pub nosuid: bool,
}

/// Everything the Sandbox Executor hands to the container runtime.
/// Built once per task by the executor, then checked here before the
/// container is ever created.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub uid: u32,
    pub gid: u32,
    pub read_only_rootfs: bool,
    pub no_new_privileges: bool,
    pub drop_all_capabilities: bool,
    pub network_disabled: bool,
    pub tmpfs_mounts: Vec<TmpfsMount>,
    pub working_dir: String,
    pub resource_limits: ResourceLimits,
    pub seccomp_profile_path: Option<String>,
    pub env: Vec<(String, String)>,
}

/// Security caps no task's resource limits may exceed, independent of
/// what was requested.
#[derive(Debug, Clone)]
pub struct SecurityCaps {
    pub max_memory_bytes: u64,
    pub max_cpu_quota: f64,
    pub max_pids_limit: i64,
    pub max_timeout_secs: u64,
}

/// Validates every hard requirement in one pass; the first violation
/// wins since callers only need to know the container is unsafe, not
/// enumerate every defect.
pub fn validate_container_config(config: &ContainerConfig, caps: &SecurityCaps) -> Result<()> {
    if !IMAGE_ALLOW_LIST.contains(&config.image.as_str()) {
        return Err(CoreError::SecurityRejected(format!(
            "image not on allow-list: {}",
            config.image
        )));
    }
    if config.uid == 0 || config.gid == 0 {
        return Err(CoreError::SecurityRejected(
            "container must not run as root".to_string(),
        ));
    }
    if !config.read_only_rootfs {
        return Err(CoreError::SecurityRejected(
            "container root filesystem must be read-only".to_string(),
        ));
    }
    if !config.network_disabled {
        return Err(CoreError::SecurityRejected(
            "container networking must be disabled".to_string(),
        ));
    }
    if !config.no_new_privileges {
        return Err(CoreError::SecurityRejected(
            "container must set no-new-privileges".to_string(),
        ));
    }
    if !config.drop_all_capabilities {
        return Err(CoreError::SecurityRejected(
            "container must drop all capabilities".to_string(),
        ));
    }

    for mount in &config.tmpfs_mounts {
        if !ALLOWED_TMPFS_TARGETS.contains(&mount.target.as_str()) {
            return Err(CoreError::SecurityRejected(format!(
                "tmpfs mount not allow-listed: {}",
                mount.target
            )));
        }
        if !mount.noexec || !mount.nosuid {
            return Err(CoreError::SecurityRejected(format!(
                "tmpfs mount {} must set noexec,nosuid",
                mount.target
            )));
        }
    }

    if !config.working_dir.starts_with('/') {
        return Err(CoreError::SecurityRejected(
            "working directory must be absolute".to_string(),
        ));
    }
    if FORBIDDEN_WORKDIR_PREFIXES
        .iter()
        .any(|prefix| config.working_dir == *prefix || config.working_dir.starts_with(&format!("{prefix}/")))
    {
        return Err(CoreError::SecurityRejected(format!(
            "working directory not permitted: {}",
            config.working_dir
        )));
    }

    let limits = &config.resource_limits;
    if limits.timeout_secs > caps.max_timeout_secs {
        return Err(CoreError::SecurityRejected(format!(
            "timeout {} exceeds cap {}",
            limits.timeout_secs, caps.max_timeout_secs
        )));
    }
    if limits.memory_bytes > caps.max_memory_bytes {
        return Err(CoreError::SecurityRejected(format!(
            "memory {} exceeds cap {}",
            limits.memory_bytes, caps.max_memory_bytes
        )));
    }
    if limits.cpu_quota > caps.max_cpu_quota {
        return Err(CoreError::SecurityRejected(format!(
            "cpu quota {} exceeds cap {}",
            limits.cpu_quota, caps.max_cpu_quota
        )));
    }
    if limits.pids_limit > caps.max_pids_limit {
        return Err(CoreError::SecurityRejected(format!(
            "pids limit {} exceeds cap {}",
            limits.pids_limit, caps.max_pids_limit
        )));
    }

    Ok(())
}
