use serde_json::{Map, json};
use tracing::warn;

use janus_core::memory::Fact;
use janus_core::perception::{ReflexRule, SYSTEM_SOURCE, VISUAL_SOURCE};

/// Rules every installation starts with.
pub fn baseline_rules() -> Vec<ReflexRule> {
    let mut disk_params = Map::new();
    disk_params.insert("days".into(), json!(7));

    vec![
        ReflexRule {
            id: "sys_disk_panic".into(),
            source: SYSTEM_SOURCE.into(),
            pattern: "disk space low".into(),
            target_skill_id: "memory_cleaner".into(),
            message_template: "Disk space is running low ({data}). Clean up old records?".into(),
            params: disk_params,
            auto_run: false,
        },
        ReflexRule {
            id: "code_refactor_suggest".into(),
            source: VISUAL_SOURCE.into(),
            pattern: ".py".into(),
            target_skill_id: "git_stats".into(),
            message_template: "Python sources changed ({data}). Review repository stats?".into(),
            params: Map::new(),
            auto_run: false,
        },
        ReflexRule {
            id: "code_refactor_js".into(),
            source: VISUAL_SOURCE.into(),
            pattern: ".js".into(),
            target_skill_id: "git_stats".into(),
            message_template: "JavaScript sources changed ({data}). Review repository stats?"
                .into(),
            params: Map::new(),
            auto_run: false,
        },
    ]
}

/// Merge rules stored as facts over the baseline. A stored rule with a
/// baseline id replaces it in place; new ids are appended in fact order.
pub fn merge_rules(mut rules: Vec<ReflexRule>, facts: &[Fact]) -> Vec<ReflexRule> {
    for fact in facts {
        let rule: ReflexRule = match serde_json::from_str(&fact.content) {
            Ok(rule) => rule,
            Err(e) => {
                warn!(source_task = %fact.source_task, error = %e, "skipping malformed reflex rule");
                continue;
            }
        };
        if rule.id.is_empty() || rule.pattern.is_empty() || rule.target_skill_id.is_empty() {
            warn!(rule_id = %rule.id, "skipping incomplete reflex rule");
            continue;
        }
        match rules.iter_mut().find(|existing| existing.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_core::memory::{FactLayer, REFLEX_RULE_CATEGORY};

    fn rule_fact(content: &str) -> Fact {
        Fact::new(FactLayer::Conceptual, REFLEX_RULE_CATEGORY, content, "reflex_expert")
    }

    #[test]
    fn baseline_ids_are_unique() {
        let rules = baseline_rules();
        let mut ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn stored_rules_extend_and_override_baseline() {
        let facts = vec![
            rule_fact(
                r#"{"id": "rust_watch", "source": "visual", "pattern": ".rs", "target_skill_id": "cargo_check", "auto_run": true}"#,
            ),
            rule_fact(
                r#"{"id": "sys_disk_panic", "source": "system", "pattern": "disk space low", "target_skill_id": "disk_janitor"}"#,
            ),
            rule_fact("not json"),
            rule_fact(r#"{"id": "", "source": "visual", "pattern": "x", "target_skill_id": "y"}"#),
        ];

        let rules = merge_rules(baseline_rules(), &facts);
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].id, "sys_disk_panic");
        assert_eq!(rules[0].target_skill_id, "disk_janitor");
        assert_eq!(rules[3].id, "rust_watch");
        assert!(rules[3].auto_run);
    }
}
