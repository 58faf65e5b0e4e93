//! Skills the orchestrator answers itself, without going through the
//! registry.

use serde_json::{Map, Value, json};

use janus_core::error::InfraError;
use janus_core::memory::FactLayer;
use janus_core::skill::{SkillDescriptor, SkillFault, SkillSource};
use janus_core::task::Task;
use janus_memory::FactStore;
use janus_perception::EventBus;
use janus_skills::SkillRegistry;

use crate::transcript::TranscriptWriter;

pub const LIST_MEMORY: &str = "list_memory";
pub const READ_MEMORY: &str = "read_memory";
pub const QUERY_KNOWLEDGE: &str = "query_knowledge";
pub const ADD_KNOWLEDGE: &str = "add_knowledge";
pub const REFRESH_RULES: &str = "refresh_rules";
pub const CHECK_VERSION: &str = "check_version";
pub const LIST_SKILLS: &str = "list_skills";

pub const BUILTIN_SKILL_IDS: [&str; 7] = [
    LIST_MEMORY,
    READ_MEMORY,
    QUERY_KNOWLEDGE,
    ADD_KNOWLEDGE,
    REFRESH_RULES,
    CHECK_VERSION,
    LIST_SKILLS,
];

/// Most recent matches returned by `query_knowledge`.
const QUERY_RESULT_LIMIT: usize = 20;

pub fn is_builtin(skill_id: &str) -> bool {
    BUILTIN_SKILL_IDS.contains(&skill_id)
}

pub fn builtin_descriptors() -> Vec<SkillDescriptor> {
    vec![
        SkillDescriptor::new(LIST_MEMORY, "List transcript log files")
            .with_tags(["logs", "history", "transcript"]),
        SkillDescriptor::new(READ_MEMORY, "Read one transcript log (filename)")
            .with_tags(["logs", "history", "transcript"]),
        SkillDescriptor::new(
            QUERY_KNOWLEDGE,
            "Search stored facts (keyword, optional layer)",
        )
        .with_tags(["facts", "knowledge", "search", "recall"]),
        SkillDescriptor::new(
            ADD_KNOWLEDGE,
            "Store a fact (category, content, optional layer)",
        )
        .with_tags(["facts", "knowledge", "remember"]),
        SkillDescriptor::new(REFRESH_RULES, "Reload reflex rules").with_tags(["reflex", "rules"]),
        SkillDescriptor::new(CHECK_VERSION, "Report the engine version").with_tags(["version"]),
        SkillDescriptor::new(LIST_SKILLS, "List every available skill")
            .with_tags(["skills", "capabilities"]),
    ]
}

pub(crate) struct Builtins<'a> {
    pub facts: &'a FactStore,
    pub bus: &'a EventBus,
    pub registry: &'a SkillRegistry,
    pub transcript: &'a dyn TranscriptWriter,
}

impl Builtins<'_> {
    /// `None` when `skill_id` is not a built-in.
    pub(crate) async fn run(
        &self,
        skill_id: &str,
        parameters: &Map<String, Value>,
        task: &Task,
    ) -> Option<Result<Value, SkillFault>> {
        let result = match skill_id {
            LIST_MEMORY => self.list_memory().await,
            READ_MEMORY => self.read_memory(parameters).await,
            QUERY_KNOWLEDGE => self.query_knowledge(parameters).await,
            ADD_KNOWLEDGE => self.add_knowledge(parameters, task).await,
            REFRESH_RULES => self.refresh_rules().await,
            CHECK_VERSION => Ok(json!({ "version": env!("CARGO_PKG_VERSION") })),
            LIST_SKILLS => Ok(self.list_skills()),
            _ => return None,
        };
        Some(result)
    }

    async fn list_memory(&self) -> Result<Value, SkillFault> {
        let logs = self.transcript.list_logs().await.map_err(infra_fault)?;
        Ok(json!({ "logs": logs }))
    }

    async fn read_memory(&self, parameters: &Map<String, Value>) -> Result<Value, SkillFault> {
        let filename = required_str(parameters, "filename")?;
        match self.transcript.read_log(filename).await {
            Ok(body) => Ok(Value::String(body)),
            Err(InfraError::PathViolation(reason)) => Err(SkillFault::invalid_parameters(reason)),
            Err(InfraError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(
                SkillFault::invalid_parameters(format!("no such log: {filename}")),
            ),
            Err(e) => Err(infra_fault(e)),
        }
    }

    async fn query_knowledge(&self, parameters: &Map<String, Value>) -> Result<Value, SkillFault> {
        let keyword = required_str(parameters, "keyword")?;
        let layer = optional_layer(parameters)?;
        let facts = self
            .facts
            .query(keyword, layer)
            .await
            .map_err(|e| SkillFault::new(e.to_string()).with_kind("storage_error"))?;
        let skip = facts.len().saturating_sub(QUERY_RESULT_LIMIT);
        let results: Vec<Value> = facts
            .iter()
            .skip(skip)
            .map(|fact| {
                json!({
                    "layer": fact.layer.as_str(),
                    "category": fact.category,
                    "content": fact.content,
                    "created_at": fact.created_at.to_rfc3339(),
                })
            })
            .collect();
        Ok(json!({ "count": results.len(), "results": results }))
    }

    async fn add_knowledge(
        &self,
        parameters: &Map<String, Value>,
        task: &Task,
    ) -> Result<Value, SkillFault> {
        let category = required_str(parameters, "category")?;
        let content = required_str(parameters, "content")?;
        let layer = optional_layer(parameters)?.unwrap_or(FactLayer::Episodic);
        let inserted = self
            .facts
            .add(layer, category, content, &task.id.to_string())
            .await
            .map_err(|e| SkillFault::new(e.to_string()).with_kind("storage_error"))?;
        Ok(json!({ "inserted": inserted, "layer": layer.as_str() }))
    }

    async fn refresh_rules(&self) -> Result<Value, SkillFault> {
        let count = self
            .bus
            .reload_rules()
            .await
            .map_err(|e| SkillFault::new(e.to_string()).with_kind("storage_error"))?;
        Ok(json!({ "rules": count }))
    }

    fn list_skills(&self) -> Value {
        let builtin = builtin_descriptors().into_iter().map(|d| (d, SkillSource::Builtin));
        let registered = self.registry.descriptors().into_iter().map(|d| {
            let source = self.registry.source(&d.id).unwrap_or(SkillSource::Static);
            (d, source)
        });
        let skills: Vec<Value> = builtin
            .chain(registered)
            .map(|(descriptor, source)| {
                json!({
                    "id": descriptor.id,
                    "description": descriptor.description,
                    "source": source,
                })
            })
            .collect();
        json!({ "skills": skills })
    }
}

fn required_str<'p>(parameters: &'p Map<String, Value>, key: &str) -> Result<&'p str, SkillFault> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| SkillFault::invalid_parameters(format!("missing parameter '{key}'")))
}

fn optional_layer(parameters: &Map<String, Value>) -> Result<Option<FactLayer>, SkillFault> {
    match parameters.get("layer").and_then(Value::as_str) {
        Some(layer) => layer
            .parse::<FactLayer>()
            .map(Some)
            .map_err(|e| SkillFault::invalid_parameters(e.to_string())),
        None => Ok(None),
    }
}

fn infra_fault(err: InfraError) -> SkillFault {
    SkillFault::new(err.to_string()).with_kind("io_error")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use janus_core::config::PerceptionConfig;
    use janus_memory::FactStoreLimits;

    use crate::transcript::MarkdownTranscript;

    fn temp_dir(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}_{}", prefix, uuid::Uuid::new_v4()))
    }

    struct Fixture {
        facts: Arc<FactStore>,
        bus: EventBus,
        registry: SkillRegistry,
        transcript: MarkdownTranscript,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = temp_dir("janus_builtins");
            let facts = Arc::new(
                FactStore::open(&dir.join("knowledge.db"), FactStoreLimits::default())
                    .await
                    .expect("fact store"),
            );
            let (bus, _rx) = EventBus::new(PerceptionConfig::default(), Arc::clone(&facts));
            Self {
                facts,
                bus,
                registry: SkillRegistry::default(),
                transcript: MarkdownTranscript::new(dir.join("logs")),
            }
        }

        fn builtins(&self) -> Builtins<'_> {
            Builtins {
                facts: &self.facts,
                bus: &self.bus,
                registry: &self.registry,
                transcript: &self.transcript,
            }
        }
    }

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn builtin_ids_have_descriptors() {
        let descriptors = builtin_descriptors();
        assert_eq!(descriptors.len(), BUILTIN_SKILL_IDS.len());
        assert!(descriptors.iter().all(|d| is_builtin(&d.id)));
        assert!(!is_builtin("rescue"));
    }

    #[tokio::test]
    async fn knowledge_round_trip() {
        let fixture = Fixture::new().await;
        let task = Task::new("remember");
        let added = fixture
            .builtins()
            .run(
                ADD_KNOWLEDGE,
                &params(json!({"category": "Tooling", "content": "cargo is the rust build tool", "layer": "semantic"})),
                &task,
            )
            .await
            .expect("builtin")
            .expect("added");
        assert_eq!(added["inserted"], true);

        let found = fixture
            .builtins()
            .run(QUERY_KNOWLEDGE, &params(json!({"keyword": "rust cargo"})), &task)
            .await
            .expect("builtin")
            .expect("queried");
        assert_eq!(found["count"], 1);
        assert_eq!(found["results"][0]["layer"], "semantic");
    }

    #[tokio::test]
    async fn bad_parameters_are_flagged() {
        let fixture = Fixture::new().await;
        let task = Task::new("x");
        let builtins = fixture.builtins();

        let fault = builtins
            .run(QUERY_KNOWLEDGE, &Map::new(), &task)
            .await
            .expect("builtin")
            .expect_err("missing keyword");
        assert!(fault.is_invalid_parameters());

        let fault = builtins
            .run(ADD_KNOWLEDGE, &params(json!({"category": "a", "content": "b", "layer": "dreams"})), &task)
            .await
            .expect("builtin")
            .expect_err("unknown layer");
        assert!(fault.is_invalid_parameters());

        let fault = builtins
            .run(READ_MEMORY, &params(json!({"filename": "../../etc/passwd"})), &task)
            .await
            .expect("builtin")
            .expect_err("escape");
        assert!(fault.is_invalid_parameters());
    }

    #[tokio::test]
    async fn introspection_builtins() {
        let fixture = Fixture::new().await;
        let task = Task::new("x");
        let builtins = fixture.builtins();

        let version = builtins.run(CHECK_VERSION, &Map::new(), &task).await.expect("builtin").expect("ok");
        assert_eq!(version["version"], env!("CARGO_PKG_VERSION"));

        let rules = builtins.run(REFRESH_RULES, &Map::new(), &task).await.expect("builtin").expect("ok");
        assert_eq!(rules["rules"], 3);

        let skills = builtins.run(LIST_SKILLS, &Map::new(), &task).await.expect("builtin").expect("ok");
        assert_eq!(skills["skills"].as_array().map(Vec::len), Some(BUILTIN_SKILL_IDS.len()));

        let logs = builtins.run(LIST_MEMORY, &Map::new(), &task).await.expect("builtin").expect("ok");
        assert_eq!(logs["logs"], json!([]));

        assert!(builtins.run("git_stats", &Map::new(), &task).await.is_none());
    }
}
