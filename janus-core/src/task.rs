use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audit::AuditVerdict;
use crate::error::TaskFailure;
use crate::intent::Intent;

pub type TaskId = uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub history: Vec<ExchangeRecord>,
    pub state: TaskState,
    pub metadata: TaskMetadata,
    pub artifacts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new_v4(),
            history: vec![ExchangeRecord::new(Role::User, query)],
            state: TaskState::Pending,
            metadata: TaskMetadata::default(),
            artifacts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A task spawned by a reflex rule, with its routing already decided.
    pub fn from_reflex(query: impl Into<String>, intent: Intent, auto_run: bool) -> Self {
        let mut task = Self::new(query);
        task.metadata.intent = Some(intent);
        task.metadata.origin = if auto_run {
            TaskOrigin::ReflexAutoRun
        } else {
            TaskOrigin::ReflexSuggestion
        };
        task
    }

    /// The text that started the task.
    pub fn query(&self) -> &str {
        self.history
            .iter()
            .find(|record| record.role == Role::User)
            .map(|record| record.content.as_str())
            .unwrap_or_default()
    }

    pub fn intent(&self) -> Option<&Intent> {
        self.metadata.intent.as_ref()
    }

    pub fn target_skill_id(&self) -> Option<&str> {
        self.metadata.intent.as_ref().and_then(Intent::target)
    }

    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub fn push_record(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(ExchangeRecord::new(role, content));
        self.updated_at = Utc::now();
    }

    pub fn push_record_with(&mut self, role: Role, content: impl Into<String>, metadata: Value) {
        let mut record = ExchangeRecord::new(role, content);
        record.metadata = metadata;
        self.history.push(record);
        self.updated_at = Utc::now();
    }

    /// Move to `Failed`, recording the reason both as metadata and as a
    /// system record.
    pub fn fail(&mut self, failure: TaskFailure) {
        self.push_record(Role::System, failure.to_string());
        self.metadata.failure = Some(failure);
        self.set_state(TaskState::Failed);
    }

    pub fn last_record(&self) -> Option<&ExchangeRecord> {
        self.history.last()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Auditing,
    Rejected,
    Running,
    Waiting,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Auditing => "auditing",
            Self::Rejected => "rejected",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl ExchangeRecord {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    #[default]
    UserQuery,
    ReflexAutoRun,
    ReflexSuggestion,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskMetadata {
    pub intent: Option<Intent>,
    pub background: bool,
    pub audit: Option<AuditVerdict>,
    /// Layered escalation payload; each escalation nests the previous one
    /// under `previous`.
    pub error_context: Option<Value>,
    pub original_skill_id: Option<String>,
    pub escalations: u32,
    pub origin: TaskOrigin,
    pub perception_snapshot: Option<String>,
    pub failure: Option<TaskFailure>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_pending_with_user_record() {
        let task = Task::new("show git stats");
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.query(), "show git stats");
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0].role, Role::User);
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Rejected.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Waiting.is_terminal());
        assert!(!TaskState::Auditing.is_terminal());
    }

    #[test]
    fn fail_records_reason() {
        let mut task = Task::new("x");
        task.fail(TaskFailure::HandlerNotFound {
            skill_id: "ghost".into(),
        });
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.last_record().map(|r| r.role), Some(Role::System));
        assert!(matches!(
            task.metadata.failure,
            Some(TaskFailure::HandlerNotFound { .. })
        ));
    }

    #[test]
    fn reflex_task_carries_origin() {
        let intent = Intent::new("a.py changed").with_target("git_stats", 1.0);
        let task = Task::from_reflex("a.py changed", intent, false);
        assert_eq!(task.metadata.origin, TaskOrigin::ReflexSuggestion);
        assert_eq!(task.target_skill_id(), Some("git_stats"));
    }
}
