use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::task::Task;

/// Public description of a capability the orchestrator can route to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
}

impl SkillDescriptor {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: description.into(),
            tags: Vec::new(),
            input_schema: Value::Null,
            output_schema: Value::Null,
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Where a registered skill came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkillSource {
    Builtin,
    Static,
    Dynamic,
    Injected,
}

/// What a handler hands back when it did not raise.
#[derive(Debug, Clone, PartialEq)]
pub enum SkillOutcome {
    Completed(Value),
    /// The handler ran but cannot fulfil the request with what it has.
    /// Escalated the same way as a raised error.
    CapabilityGap {
        reason: String,
        payload: Option<Value>,
    },
}

const INVALID_PARAMETERS_KIND: &str = "invalid_parameters";

/// A raised handler error with enough context for the oracle to repair it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct SkillFault {
    pub message: String,
    /// Stack trace, stderr, or similar diagnostic context.
    pub detail: Option<String>,
    pub kind: String,
}

impl SkillFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
            kind: "runtime_error".to_string(),
        }
    }

    /// The caller supplied bad arguments. Reported as-is, never escalated.
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(INVALID_PARAMETERS_KIND)
    }

    pub fn is_invalid_parameters(&self) -> bool {
        self.kind == INVALID_PARAMETERS_KIND
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        task: &Task,
    ) -> Result<SkillOutcome, SkillFault>;

    /// Source code behind the handler, if any. Attached to escalations so the
    /// oracle can see what failed.
    fn source(&self) -> Option<String> {
        None
    }
}

/// Turns an injected manifest and source into a runnable handler. The only
/// path by which code delivered at runtime becomes executable.
#[async_trait]
pub trait SkillLoader: Send + Sync {
    async fn load(
        &self,
        descriptor: &SkillDescriptor,
        code: &str,
    ) -> Result<std::sync::Arc<dyn SkillHandler>, crate::error::SkillError>;
}
