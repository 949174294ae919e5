use crate::cancel::CancelToken;
use crate::error::Result;
use crate::models::{ExecutionOutcome, ExecutionStatus, Task};
use crate::security::SecurityValidator;

use super::Executor;

pub const TRIGGER_TIMEOUT: &str = "__TRIGGER_TIMEOUT__";
pub const TRIGGER_FAIL: &str = "__TRIGGER_FAIL__";
pub const TRIGGER_CANCEL: &str = "__TRIGGER_CANCEL__";

/// Runs scripts without a container runtime. Used when startup health
/// probing finds no runtime available. Scans the full script content
/// for trigger substrings (not just a prefix) so a trigger following a
/// comment or boilerplate preamble is still honored.
pub struct MockExecutor {
    validator: SecurityValidator,
}

impl MockExecutor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            validator: SecurityValidator::new()?,
        })
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new().expect("security validator must construct")
    }
}

#[async_trait::async_trait]
impl Executor for MockExecutor {
    async fn execute(&self, task: &Task, _execution_id: &str, cancel: CancelToken) -> Result<ExecutionOutcome> {
        let started_at = chrono::Utc::now();

        if let Err(e) = self.validator.validate_script(task.script_type, &task.script_content) {
            return Ok(ExecutionOutcome {
                status: ExecutionStatus::Failed,
                return_code: None,
                stdout: String::new(),
                stderr: e.to_string(),
                execution_time_ms: 0,
                started_at,
                completed_at: chrono::Utc::now(),
            });
        }

        if task.script_content.contains(TRIGGER_CANCEL) || cancel.is_cancelled() {
            return Ok(terminal(started_at, ExecutionStatus::Cancelled, None, "cancelled by trigger"));
        }
        if task.script_content.contains(TRIGGER_TIMEOUT) {
            return Ok(terminal(started_at, ExecutionStatus::Timeout, None, "timed out by trigger"));
        }
        if task.script_content.contains(TRIGGER_FAIL) {
            return Ok(terminal(started_at, ExecutionStatus::Failed, Some(1), "failed by trigger"));
        }

        Ok(ExecutionOutcome {
            status: ExecutionStatus::Completed,
            return_code: Some(0),
            stdout: format!("mock executed {} script for task {}", task.script_type, task.id),
            stderr: String::new(),
            execution_time_ms: 1,
            started_at,
            completed_at: chrono::Utc::now(),
        })
    }

    async fn cancel(&self, _execution_id: &str) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

fn terminal(
    started_at: chrono::DateTime<chrono::Utc>,
    status: ExecutionStatus,
    return_code: Option<i32>,
    stderr: &str,
) -> ExecutionOutcome {
    ExecutionOutcome {
        status,
        return_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
        execution_time_ms: 1,
        started_at,
        completed_at: chrono::Utc::now(),
    }
}
