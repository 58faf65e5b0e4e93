use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use janus_core::audit::{AuditStatus, AuditVerdict, Auditor};
use janus_core::task::Task;

const DESTRUCTIVE_MARKERS: &[&str] = &["rm ", "delete all", "sudo ", "format "];
const BULK_TARGETS: &[&str] = &["file", "data"];

/// Flags destructive commands and bulk or wildcard operations by looking at
/// the request text and the serialized parameters.
#[derive(Debug, Default, Clone)]
pub struct RuleBasedAuditor;

impl RuleBasedAuditor {
    pub fn new() -> Self {
        Self
    }

    pub fn inspect(&self, query: &str, parameters: &Map<String, Value>) -> AuditVerdict {
        let query = query.to_lowercase();
        let params = Value::Object(parameters.clone()).to_string().to_lowercase();

        if let Some(marker) = DESTRUCTIVE_MARKERS.iter().find(|m| query.contains(*m)) {
            return AuditVerdict::fail(
                format!("destructive command detected: '{}'", marker.trim()),
                10,
            );
        }
        if params.contains("delete") {
            return AuditVerdict::fail("parameters request deletion", 10);
        }
        if query.contains("all") && BULK_TARGETS.iter().any(|t| query.contains(t)) {
            return AuditVerdict::warn("bulk operation on files or data", 5);
        }
        if params.contains('*') {
            return AuditVerdict::warn("wildcard in parameters", 5);
        }
        AuditVerdict::pass("no risk detected", 1)
    }
}

#[async_trait]
impl Auditor for RuleBasedAuditor {
    async fn audit(
        &self,
        _skill_id: &str,
        parameters: &Map<String, Value>,
        task: &Task,
    ) -> AuditVerdict {
        self.inspect(task.query(), parameters)
    }
}

/// Runs member auditors in order. The first `fail` wins outright; otherwise
/// the riskiest verdict is returned.
#[derive(Default, Clone)]
pub struct CompositeAuditor {
    members: Vec<Arc<dyn Auditor>>,
}

impl CompositeAuditor {
    pub fn new(members: Vec<Arc<dyn Auditor>>) -> Self {
        Self { members }
    }
}

#[async_trait]
impl Auditor for CompositeAuditor {
    async fn audit(
        &self,
        skill_id: &str,
        parameters: &Map<String, Value>,
        task: &Task,
    ) -> AuditVerdict {
        let mut worst: Option<AuditVerdict> = None;
        for member in &self.members {
            let verdict = member.audit(skill_id, parameters, task).await;
            if verdict.status == AuditStatus::Fail {
                return verdict;
            }
            if worst
                .as_ref()
                .is_none_or(|current| verdict.risk_level > current.risk_level)
            {
                worst = Some(verdict);
            }
        }
        worst.unwrap_or_else(|| AuditVerdict::pass("no auditors configured", 0))
    }
}
