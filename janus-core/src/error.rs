use serde::{Deserialize, Serialize};

use crate::memory::FactLayer;

#[derive(Debug, thiserror::Error)]
pub enum JanusError {
    #[error("skill error: {0}")]
    Skill(#[from] SkillError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("task error: {0}")]
    Task(#[from] TaskError),

    #[error("infra error: {0}")]
    Infra(#[from] InfraError),
}

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("skill already registered: {0}")]
    AlreadyRegistered(String),

    #[error("skill {0} is protected")]
    Protected(String),

    #[error("invalid skill manifest {path}: {reason}")]
    InvalidManifest { path: String, reason: String },

    #[error("failed to load handler for {skill_id}: {reason}")]
    LoadFailed { skill_id: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("unknown fact layer: {0}")]
    UnknownLayer(String),

    #[error("corrupt fact in {layer:?}: {reason}")]
    CorruptFact { layer: FactLayer, reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("malformed oracle response for task {task_id}: {reason}")]
    Corrupted { task_id: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {task_id} is not awaiting confirmation (status {status})")]
    NotAwaitingConfirmation { task_id: String, status: String },

    #[error("task {task_id} cannot be aborted (status {status})")]
    NotAbortable { task_id: String, status: String },
}

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path violation: {0}")]
    PathViolation(String),
}

/// Why a task stopped short of completing. Recorded on the task itself rather
/// than returned as an error, so every outcome is persisted the same way.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    #[error("no skill resolved for request")]
    RoutingFailure,

    #[error("audit rejected execution of {skill_id}: {reason}")]
    AuditRejection { skill_id: String, reason: String },

    #[error("handler not found: {skill_id}")]
    HandlerNotFound { skill_id: String },

    #[error("invalid parameters for {skill_id}: {message}")]
    InvalidParameters { skill_id: String, message: String },

    #[error("handler {skill_id} failed: {message}")]
    HandlerFault { skill_id: String, message: String },

    #[error("escalation limit of {limit} reached")]
    EscalationExhausted { limit: u32 },

    #[error("declined by user")]
    Declined,

    #[error("aborted")]
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_formats_and_serializes() {
        let failure = TaskFailure::HandlerNotFound {
            skill_id: "git_stats".to_string(),
        };
        assert_eq!(failure.to_string(), "handler not found: git_stats");

        let encoded = serde_json::to_value(&failure).expect("serialize");
        assert_eq!(encoded["kind"], "handler_not_found");
        let decoded: TaskFailure = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, failure);
    }

    #[test]
    fn nested_errors_convert() {
        let err: JanusError = SkillError::Protected("gene_factory".into()).into();
        assert_eq!(err.to_string(), "skill error: skill gene_factory is protected");
    }
}
