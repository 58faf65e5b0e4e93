use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{Map, Value};

use janus_core::intent::{Intent, RESCUE_SKILL_ID};
use janus_core::skill::SkillDescriptor;

const EXACT_MATCH_CONFIDENCE: f64 = 0.9;
const KEYWORD_MATCH_CEILING: f64 = 0.8;
const RESCUE_CONFIDENCE: f64 = 0.5;
const MIN_KEYWORD_LEN: usize = 3;

/// Turns request text into a routing decision. `snapshot` is the rendered
/// ambient context from the event bus.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve(
        &self,
        query: &str,
        snapshot: &str,
        skills: &[SkillDescriptor],
    ) -> Option<Intent>;
}

/// Offline resolver that scores skills by keyword overlap with their id,
/// name and tags. `key=value` tokens become parameters.
#[derive(Debug, Clone)]
pub struct KeywordResolver {
    escalate_unresolved: bool,
}

impl KeywordResolver {
    pub fn new(escalate_unresolved: bool) -> Self {
        Self {
            escalate_unresolved,
        }
    }

    pub fn resolve_text(&self, query: &str, skills: &[SkillDescriptor]) -> Option<Intent> {
        let (words, parameters) = split_query(query);
        let best = skills
            .iter()
            .filter(|skill| skill.id != RESCUE_SKILL_ID)
            .map(|skill| (skill, score(skill, &words)))
            .filter(|(_, (confidence, _))| *confidence > 0.0)
            .fold(None::<(&SkillDescriptor, (f64, Vec<String>))>, |best, candidate| {
                match best {
                    Some(current) if current.1.0 >= candidate.1.0 => Some(current),
                    _ => Some(candidate),
                }
            });

        match best {
            Some((skill, (confidence, matched))) => Some(
                Intent::new(query)
                    .with_target(skill.id.clone(), confidence)
                    .with_thought(format!("matched {} on: {}", skill.id, matched.join(", ")))
                    .with_parameters(parameters),
            ),
            None if self.escalate_unresolved => Some(
                Intent::new(query)
                    .with_target(RESCUE_SKILL_ID, RESCUE_CONFIDENCE)
                    .with_thought("no local skill matched; consulting the oracle")
                    .with_parameters(parameters),
            ),
            None => None,
        }
    }
}

impl Default for KeywordResolver {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl IntentResolver for KeywordResolver {
    async fn resolve(
        &self,
        query: &str,
        _snapshot: &str,
        skills: &[SkillDescriptor],
    ) -> Option<Intent> {
        self.resolve_text(query, skills)
    }
}

fn split_query(query: &str) -> (Vec<String>, Map<String, Value>) {
    let mut words = Vec::new();
    let mut parameters = Map::new();
    for token in query.split_whitespace() {
        if let Some((key, value)) = token.split_once('=')
            && !key.is_empty()
        {
            let value = serde_json::from_str::<Value>(value)
                .ok()
                .filter(|parsed| !parsed.is_object() && !parsed.is_array())
                .unwrap_or_else(|| Value::String(value.to_string()));
            parameters.insert(key.to_string(), value);
            continue;
        }
        let word: String = token
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase();
        if !word.is_empty() {
            words.push(word);
        }
    }
    (words, parameters)
}

fn score(skill: &SkillDescriptor, words: &[String]) -> (f64, Vec<String>) {
    if words.is_empty() {
        return (0.0, Vec::new());
    }
    let id = skill.id.to_lowercase();
    let spelled_out = id.replace('_', " ");
    let text = words.join(" ");
    if words.iter().any(|word| *word == id) || (id.contains('_') && text.contains(&spelled_out)) {
        return (EXACT_MATCH_CONFIDENCE, vec![id]);
    }

    let terms: HashSet<String> = id
        .split('_')
        .map(str::to_string)
        .chain(skill.name.to_lowercase().split_whitespace().map(str::to_string))
        .chain(skill.tags.iter().map(|tag| tag.to_lowercase()))
        .filter(|term| term.len() >= MIN_KEYWORD_LEN)
        .collect();

    let mut matched: Vec<String> = Vec::new();
    for word in words {
        if word.len() >= MIN_KEYWORD_LEN && terms.contains(word) && !matched.contains(word) {
            matched.push(word.clone());
        }
    }
    let confidence = KEYWORD_MATCH_CEILING * matched.len() as f64 / words.len() as f64;
    (confidence, matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn skills() -> Vec<SkillDescriptor> {
        vec![
            SkillDescriptor::new("git_stats", "Repository statistics").with_tags(["git", "commits"]),
            SkillDescriptor::new("memory_cleaner", "Prune old records")
                .with_tags(["cleanup", "disk"]),
            SkillDescriptor::new("weather", "Current weather"),
        ]
    }

    #[test]
    fn exact_id_wins_with_high_confidence() {
        let intent = KeywordResolver::new(false)
            .resolve_text("run git stats please", &skills())
            .expect("resolved");
        assert_eq!(intent.target(), Some("git_stats"));
        assert_eq!(intent.confidence, EXACT_MATCH_CONFIDENCE);

        let intent = KeywordResolver::new(false)
            .resolve_text("weather", &skills())
            .expect("resolved");
        assert_eq!(intent.target(), Some("weather"));
    }

    #[test]
    fn keyword_overlap_scales_confidence() {
        let intent = KeywordResolver::new(false)
            .resolve_text("disk cleanup now", &skills())
            .expect("resolved");
        assert_eq!(intent.target(), Some("memory_cleaner"));
        let expected = KEYWORD_MATCH_CEILING * 2.0 / 3.0;
        assert!((intent.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn key_value_tokens_become_parameters() {
        let intent = KeywordResolver::new(false)
            .resolve_text("memory_cleaner days=7 pattern=*.log background=true", &skills())
            .expect("resolved");
        assert_eq!(intent.parameters.get("days"), Some(&json!(7)));
        assert_eq!(intent.parameters.get("pattern"), Some(&json!("*.log")));
        assert!(intent.requests_background());
    }

    #[test]
    fn unresolved_query_escalates_only_when_enabled() {
        assert!(KeywordResolver::new(false)
            .resolve_text("system status", &skills())
            .is_none());

        let intent = KeywordResolver::new(true)
            .resolve_text("system status", &skills())
            .expect("rescue");
        assert!(intent.is_rescue());
        assert_eq!(intent.confidence, RESCUE_CONFIDENCE);
    }
}
