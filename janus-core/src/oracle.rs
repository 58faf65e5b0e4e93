use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BridgeError;
use crate::intent::Intent;
use crate::skill::SkillDescriptor;
use crate::task::TaskId;

/// Everything the oracle needs to decide how to proceed with a stuck task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleRequest {
    pub task_id: TaskId,
    pub query: String,
    pub perception_snapshot: String,
    pub error_context: Option<Value>,
    pub available_skills: Vec<SkillDescriptor>,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub target_skill_id: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub gene_injection: Option<GeneInjection>,
    #[serde(default)]
    pub memory_injection: Vec<MemoryInjection>,
}

impl OracleResponse {
    /// The replacement routing decision for the task.
    pub fn intent(&self, raw_input: &str) -> Intent {
        let mut intent = Intent::new(raw_input)
            .with_thought(self.thought.clone())
            .with_parameters(self.parameters.clone());
        if let Some(target) = self.target_skill_id.as_deref() {
            intent = intent.with_target(target, 1.0);
        }
        intent
    }
}

/// New skill code delivered by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneInjection {
    #[serde(default)]
    pub id: Option<String>,
    pub manifest: SkillDescriptor,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInjection {
    pub layer: String,
    pub fact: InjectedFact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectedFact {
    pub category: String,
    pub content: String,
}

/// Channel to the external reasoning oracle. `consult` blocks until a
/// well-formed decision arrives; callers cancel it by dropping the future.
#[async_trait]
pub trait OracleBridge: Send + Sync {
    async fn consult(&self, request: OracleRequest) -> Result<OracleResponse, BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_full_payload() {
        let raw = r#"{
            "thought": "install a weather skill",
            "target_skill_id": "weather",
            "parameters": {"city": "Oslo"},
            "gene_injection": {
                "id": "weather",
                "manifest": {"id": "weather", "description": "forecast"},
                "code": "print('{}')"
            },
            "memory_injection": [
                {"layer": "semantic", "fact": {"category": "Location", "content": "user lives in Oslo"}}
            ]
        }"#;
        let response: OracleResponse = serde_json::from_str(raw).expect("parse");
        let intent = response.intent("what's the weather");
        assert_eq!(intent.target(), Some("weather"));
        assert_eq!(intent.parameters["city"], "Oslo");
        assert_eq!(response.memory_injection.len(), 1);
        assert_eq!(
            response.gene_injection.map(|gene| gene.manifest.id),
            Some("weather".to_string())
        );
    }

    #[test]
    fn minimal_response_has_no_target() {
        let response: OracleResponse = serde_json::from_str("{}").expect("parse");
        assert_eq!(response.intent("x").target(), None);
    }
}
