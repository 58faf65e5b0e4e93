use std::collections::HashMap;

use std::future::Future;

use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

use janus_core::error::TaskError;
use janus_core::task::{Task, TaskId, TaskState};

struct ActiveEntry {
    task: Task,
    abort: Option<AbortHandle>,
}

/// Tasks that are parked, running or waiting on the oracle. A task leaves
/// the set exactly once; whoever removes it owns the terminal bookkeeping.
pub struct ActiveTasks {
    tasks: Mutex<HashMap<TaskId, ActiveEntry>>,
}

impl ActiveTasks {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, task: Task) {
        tracing::debug!(task_id = %task.id, state = %task.state, "task_activated");
        self.tasks
            .lock()
            .await
            .insert(task.id, ActiveEntry { task, abort: None });
    }

    /// Refresh the stored copy of a task. Returns `false` once the task has
    /// left the set.
    pub async fn update(&self, task: &Task) -> bool {
        match self.tasks.lock().await.get_mut(&task.id) {
            Some(entry) => {
                entry.task = task.clone();
                true
            }
            None => false,
        }
    }

    /// Spawn the background execution of `task_id` and record its abort
    /// handle while the set is still locked, so the task is abortable from
    /// the moment it runs.
    pub async fn spawn_abortable<F>(&self, task_id: TaskId, execution: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        let handle = tokio::spawn(execution);
        if let Some(entry) = tasks.get_mut(&task_id) {
            entry.abort = Some(handle.abort_handle());
        }
        handle
    }

    pub async fn get(&self, task_id: TaskId) -> Option<Task> {
        self.tasks
            .lock()
            .await
            .get(&task_id)
            .map(|entry| entry.task.clone())
    }

    pub async fn remove(&self, task_id: TaskId) -> Option<Task> {
        self.tasks
            .lock()
            .await
            .remove(&task_id)
            .map(|entry| entry.task)
    }

    /// Resolve a task parked in `Auditing`. Approval marks it `Running` and
    /// keeps it active; a refusal removes it.
    pub async fn take_parked(&self, task_id: TaskId, approve: bool) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.lock().await;
        let entry = tasks
            .get_mut(&task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        if entry.task.state != TaskState::Auditing {
            return Err(TaskError::NotAwaitingConfirmation {
                task_id: task_id.to_string(),
                status: entry.task.state.to_string(),
            });
        }
        if approve {
            entry.task.set_state(TaskState::Running);
            Ok(entry.task.clone())
        } else {
            tasks
                .remove(&task_id)
                .map(|entry| entry.task)
                .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
        }
    }

    /// Remove a task that is either executing in the background or parked,
    /// cancelling its execution.
    pub async fn take_abortable(&self, task_id: TaskId) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.lock().await;
        let entry = tasks
            .get(&task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        if entry.abort.is_none() && entry.task.state != TaskState::Auditing {
            return Err(TaskError::NotAbortable {
                task_id: task_id.to_string(),
                status: entry.task.state.to_string(),
            });
        }
        let entry = tasks
            .remove(&task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        if let Some(handle) = entry.abort {
            handle.abort();
        }
        Ok(entry.task)
    }

    /// Every active task, oldest first.
    pub async fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .await
            .values()
            .map(|entry| entry.task.clone())
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }
}

impl Default for ActiveTasks {
    fn default() -> Self {
        Self::new()
    }
}
