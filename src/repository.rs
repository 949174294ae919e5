//! The task metadata store and execution-record store are external
//! collaborators: the core only reads and writes the fields enumerated
//! in the data model, through this trait boundary. An `InMemoryRepository`
//! satisfies it for tests and for operators who don't need durability
//! across restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{CoreError, Result};
use crate::models::{ExecutionOutcome, ExecutionRecord, ExecutionStatus, Task, TaskStatus};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_task(&self, task_id: &str) -> Result<Task>;
    async fn save_task(&self, task: Task) -> Result<()>;
    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    async fn create_execution(&self, record: ExecutionRecord) -> Result<()>;
    async fn update_execution(&self, execution_id: &str, outcome: &ExecutionOutcome) -> Result<()>;
    async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord>;
}

#[derive(Default)]
pub struct InMemoryRepository {
    tasks: RwLock<HashMap<String, Task>>,
    executions: RwLock<HashMap<String, ExecutionRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .read()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))
    }

    async fn save_task(&self, task: Task) -> Result<()> {
        self.tasks.write().unwrap().insert(task.id.clone(), task);
        Ok(())
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))?;
        task.status = status;
        task.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn create_execution(&self, record: ExecutionRecord) -> Result<()> {
        self.executions
            .write()
            .unwrap()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_execution(&self, execution_id: &str, outcome: &ExecutionOutcome) -> Result<()> {
        let mut executions = self.executions.write().unwrap();
        let record = executions
            .get_mut(execution_id)
            .ok_or_else(|| CoreError::NotFound(format!("execution {execution_id}")))?;
        record.status = outcome.status;
        record.return_code = outcome.return_code;
        record.stdout = Some(outcome.stdout.clone());
        record.stderr = Some(outcome.stderr.clone());
        record.execution_time_ms = Some(outcome.execution_time_ms);
        record.started_at = Some(outcome.started_at);
        record.completed_at = Some(outcome.completed_at);
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord> {
        self.executions
            .read()
            .unwrap()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("execution {execution_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScriptType;

    #[tokio::test]
    async fn round_trips_task_status() {
        let repo = InMemoryRepository::new();
        let task = Task::new("user-1", ScriptType::Python, "print(1)", 5, 60);
        let task_id = task.id.clone();
        repo.save_task(task).await.unwrap();

        repo.update_task_status(&task_id, TaskStatus::Running).await.unwrap();
        let fetched = repo.get_task(&task_id).await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn missing_task_is_not_found() {
        let repo = InMemoryRepository::new();
        assert!(matches!(
            repo.get_task("missing").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_execution_populates_outcome_fields() {
        let repo = InMemoryRepository::new();
        let record = ExecutionRecord::new("task-1");
        let execution_id = record.id.clone();
        repo.create_execution(record).await.unwrap();

        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Completed,
            return_code: Some(0),
            stdout: "ok".to_string(),
            stderr: String::new(),
            execution_time_ms: 42,
            started_at: chrono::Utc::now(),
            completed_at: chrono::Utc::now(),
        };
        repo.update_execution(&execution_id, &outcome).await.unwrap();

        let fetched = repo.get_execution(&execution_id).await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Completed);
        assert_eq!(fetched.return_code, Some(0));
    }
}
