use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// The four supported script languages, dispatched over rather than
/// modeled as a trait hierarchy: each variant drives its own image
/// lookup, command builder, and security rule set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Python,
    Bash,
    JavaScript,
    Go,
}

impl FromStr for ScriptType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(ScriptType::Python),
            "bash" | "sh" | "shell" => Ok(ScriptType::Bash),
            "javascript" | "js" | "node" => Ok(ScriptType::JavaScript),
            "go" | "golang" => Ok(ScriptType::Go),
            other => Err(format!("unknown script type: {other}")),
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScriptType::Python => "python",
            ScriptType::Bash => "bash",
            ScriptType::JavaScript => "javascript",
            ScriptType::Go => "go",
        };
        write!(f, "{s}")
    }
}

/// The queue payload. Carries enough of the task to let the executor
/// build its launch command without a second repository round-trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMessage {
    pub task_id: String,
    pub user_id: String,
    pub priority: u8,
    pub queued_at: i64,
    pub attempts: u32,
    pub last_attempt: Option<i64>,
    pub next_retry_at: Option<i64>,
    pub failure_reason: Option<String>,
    pub message_id: String,
    pub receipt_handle: Option<String>,
    pub attributes: HashMap<String, String>,
    pub script_type: ScriptType,
    pub script_content: String,
}

impl TaskMessage {
    pub fn new(
        task_id: impl Into<String>,
        user_id: impl Into<String>,
        priority: u8,
        script_type: ScriptType,
        script_content: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            priority,
            queued_at: 0,
            attempts: 0,
            last_attempt: None,
            next_retry_at: None,
            failure_reason: None,
            message_id: Uuid::new_v4().to_string(),
            receipt_handle: None,
            attributes: HashMap::new(),
            script_type,
            script_content: script_content.into(),
        }
    }

    /// Validates the invariants in §3: non-empty ids, priority range,
    /// non-negative attempts, non-zero queued_at.
    pub fn validate(&self) -> Result<()> {
        if self.task_id.is_empty() {
            return Err(CoreError::validation("validate", "task_id must not be empty"));
        }
        if self.user_id.is_empty() {
            return Err(CoreError::validation("validate", "user_id must not be empty"));
        }
        if self.message_id.is_empty() {
            return Err(CoreError::validation(
                "validate",
                "message_id must not be empty",
            ));
        }
        if self.priority > 10 {
            return Err(CoreError::validation(
                "validate",
                format!("priority {} out of range [0,10]", self.priority),
            ));
        }
        if self.queued_at < 0 {
            return Err(CoreError::validation(
                "validate",
                "queued_at must not be negative",
            ));
        }
        Ok(())
    }

    /// `score = (10 − priority) × 10⁶ + queued_at_microseconds / 10¹²`
    pub fn priority_score(priority: u8, queued_at_micros: i64) -> f64 {
        (10 - priority.min(10)) as f64 * 1_000_000.0 + (queued_at_micros as f64) / 1e12
    }
}

/// Proof of admitted concurrency: exists only between acquire and release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSlot {
    pub slot_id: String,
    pub user_id: String,
    pub task_id: String,
    pub worker_id: String,
    pub acquired_at: i64,
    pub last_active: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Completed,
    Failed,
    Stopped,
}

/// Tracked by the Cleanup Tracker so every created container is
/// eventually removed on every exit path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub container_id: String,
    pub task_id: String,
    pub execution_id: String,
    pub image: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub status: ContainerStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

/// Repository-owned task metadata, distinct from the in-flight `TaskMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub script_type: ScriptType,
    pub script_content: String,
    pub priority: u8,
    pub timeout_secs: u64,
    pub status: TaskStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Task {
    pub fn new(
        user_id: impl Into<String>,
        script_type: ScriptType,
        script_content: impl Into<String>,
        priority: u8,
        timeout_secs: u64,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            script_type,
            script_content: script_content.into(),
            priority,
            timeout_secs,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Owned by the repository; the core only reads and writes these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub task_id: String,
    pub status: ExecutionStatus,
    pub return_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub memory_usage_bytes: Option<u64>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ExecutionRecord {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            status: ExecutionStatus::Running,
            return_code: None,
            stdout: None,
            stderr: None,
            execution_time_ms: None,
            memory_usage_bytes: None,
            started_at: Some(chrono::Utc::now()),
            completed_at: None,
        }
    }
}

/// Outcome of a single sandbox execution, produced by the executor and
/// consumed by the worker to populate the `ExecutionRecord`.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub return_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_priority_range() {
        let mut m = TaskMessage::new("t1", "u1", 10, ScriptType::Python, "print(1)");
        m.queued_at = 1;
        assert!(m.validate().is_ok());
        m.priority = 11;
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_empty_ids() {
        let mut m = TaskMessage::new("", "u1", 5, ScriptType::Bash, "echo hi");
        m.queued_at = 1;
        assert!(m.validate().is_err());
    }

    #[test]
    fn priority_dominates_score() {
        let high = TaskMessage::priority_score(8, 0);
        let low = TaskMessage::priority_score(2, 0);
        assert!(high < low);
    }

    #[test]
    fn fifo_within_same_priority() {
        let earlier = TaskMessage::priority_score(5, 1_000);
        let later = TaskMessage::priority_score(5, 2_000);
        assert!(earlier < later);
    }

    #[test]
    fn script_type_round_trips_through_str() {
        for (s, expected) in [
            ("python", ScriptType::Python),
            ("bash", ScriptType::Bash),
            ("javascript", ScriptType::JavaScript),
            ("go", ScriptType::Go),
        ] {
            assert_eq!(ScriptType::from_str(s).unwrap(), expected);
        }
    }
}
