use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved skill id that hands a task to the oracle.
pub const RESCUE_SKILL_ID: &str = "rescue";

/// A routing decision: which skill should handle a request, and with what
/// arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub raw_input: String,
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub target_skill_id: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub confidence: f64,
}

impl Intent {
    pub fn new(raw_input: impl Into<String>) -> Self {
        Self {
            raw_input: raw_input.into(),
            thought: String::new(),
            target_skill_id: None,
            parameters: Map::new(),
            confidence: 0.0,
        }
    }

    pub fn with_target(mut self, skill_id: impl Into<String>, confidence: f64) -> Self {
        self.target_skill_id = Some(skill_id.into());
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = thought.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn target(&self) -> Option<&str> {
        self.target_skill_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn is_rescue(&self) -> bool {
        self.target() == Some(RESCUE_SKILL_ID)
    }

    /// `true` when the caller asked for background execution explicitly.
    pub fn requests_background(&self) -> bool {
        self.parameters
            .get("background")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_target_is_unresolved() {
        let intent = Intent::new("hello").with_target("", 0.9);
        assert_eq!(intent.target(), None);
        assert!(!intent.is_rescue());
    }

    #[test]
    fn confidence_is_clamped() {
        let intent = Intent::new("x").with_target("git_stats", 3.0);
        assert_eq!(intent.confidence, 1.0);
    }

    #[test]
    fn background_flag_reads_boolean_parameter() {
        let intent = Intent::new("x").with_parameter("background", json!(true));
        assert!(intent.requests_background());
        let intent = Intent::new("x").with_parameter("background", json!("yes"));
        assert!(!intent.requests_background());
    }
}
