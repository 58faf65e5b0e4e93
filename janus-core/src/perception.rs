use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source tag for file and screen observations, which are debounced.
pub const VISUAL_SOURCE: &str = "visual";
pub const SYSTEM_SOURCE: &str = "system";
pub const CHRONOS_SOURCE: &str = "chronos";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionEvent {
    pub source: String,
    pub content: Value,
    pub importance: f64,
    pub timestamp: DateTime<Utc>,
}

impl PerceptionEvent {
    pub fn new(source: impl Into<String>, content: impl Into<Value>, importance: f64) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            importance: importance.clamp(0.0, 1.0),
            timestamp: Utc::now(),
        }
    }

    /// Content as plain text. Strings are used verbatim, anything else is
    /// rendered as compact JSON.
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Pattern-triggered task template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflexRule {
    pub id: String,
    pub source: String,
    /// Case-insensitive substring matched against event content.
    pub pattern: String,
    pub target_skill_id: String,
    /// `{data}` is replaced with the event content.
    #[serde(default)]
    pub message_template: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub auto_run: bool,
}

impl ReflexRule {
    pub fn matches(&self, event: &PerceptionEvent) -> bool {
        event.source == self.source
            && event
                .content_text()
                .to_lowercase()
                .contains(&self.pattern.to_lowercase())
    }

    pub fn render_message(&self, event: &PerceptionEvent) -> String {
        if self.message_template.is_empty() {
            return format!("[reflex:{}] {}", self.id, event.content_text());
        }
        self.message_template.replace("{data}", &event.content_text())
    }
}

/// One line of ambient context handed to resolvers and the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub content: String,
}

impl std::fmt::Display for SnapshotEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.source.to_uppercase(),
            self.content
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule() -> ReflexRule {
        ReflexRule {
            id: "code_refactor_suggest".into(),
            source: VISUAL_SOURCE.into(),
            pattern: ".PY".into(),
            target_skill_id: "git_stats".into(),
            message_template: "Python changed: {data}".into(),
            params: Map::new(),
            auto_run: false,
        }
    }

    #[test]
    fn matches_source_and_pattern_case_insensitively() {
        let rule = rule();
        assert!(rule.matches(&PerceptionEvent::new(VISUAL_SOURCE, "file changed: main.py", 0.4)));
        assert!(!rule.matches(&PerceptionEvent::new(SYSTEM_SOURCE, "file changed: main.py", 0.4)));
        assert!(!rule.matches(&PerceptionEvent::new(VISUAL_SOURCE, "file changed: main.rs", 0.4)));
    }

    #[test]
    fn template_substitutes_event_content() {
        let event = PerceptionEvent::new(VISUAL_SOURCE, "file changed: a.py", 0.4);
        assert_eq!(rule().render_message(&event), "Python changed: file changed: a.py");
    }

    #[test]
    fn non_string_content_renders_as_json() {
        let event = PerceptionEvent::new(SYSTEM_SOURCE, json!({"disk": 3}), 0.9);
        assert_eq!(event.content_text(), r#"{"disk":3}"#);
    }
}
