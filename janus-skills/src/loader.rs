use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use janus_core::error::SkillError;
use janus_core::skill::{SkillDescriptor, SkillFault, SkillHandler, SkillLoader, SkillOutcome};
use janus_core::task::Task;

use crate::script_runner::{ScriptError, run_script};

/// Key a script prints at the top level of its JSON output to report that it
/// cannot satisfy the request.
pub const CAPABILITY_GAP_KEY: &str = "capability_gap";

/// A skill backed by interpreter source, run in a fresh process per call.
pub struct ScriptHandler {
    skill_id: String,
    interpreter: String,
    code: String,
    timeout: Duration,
}

impl ScriptHandler {
    pub fn new(
        skill_id: impl Into<String>,
        interpreter: impl Into<String>,
        code: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            skill_id: skill_id.into(),
            interpreter: interpreter.into(),
            code: code.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SkillHandler for ScriptHandler {
    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        task: &Task,
    ) -> Result<SkillOutcome, SkillFault> {
        let payload = json!({
            "skill_id": self.skill_id,
            "task_id": task.id.to_string(),
            "query": task.query(),
            "parameters": parameters,
            "error_context": task.metadata.error_context,
        });
        let output = run_script(
            &self.interpreter,
            &self.code,
            &payload,
            self.timeout,
            &self.skill_id,
            &task.id.to_string(),
        )
        .await
        .map_err(script_fault)?;

        Ok(interpret_output(output))
    }

    fn source(&self) -> Option<String> {
        Some(self.code.clone())
    }
}

fn script_fault(err: ScriptError) -> SkillFault {
    let mut fault = SkillFault::new(err.to_string()).with_kind(err.kind());
    if let Some(stderr) = err.stderr().filter(|s| !s.is_empty()) {
        fault = fault.with_detail(stderr);
    }
    fault
}

/// Map script stdout onto a typed outcome. `{"capability_gap": "reason"}` or
/// `{"capability_gap": {"reason": ..., "payload": ...}}` signal a gap.
fn interpret_output(output: Value) -> SkillOutcome {
    let Some(gap) = output.get(CAPABILITY_GAP_KEY) else {
        return SkillOutcome::Completed(output);
    };
    match gap {
        Value::String(reason) => SkillOutcome::CapabilityGap {
            reason: reason.clone(),
            payload: None,
        },
        Value::Object(fields) => SkillOutcome::CapabilityGap {
            reason: fields
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("capability gap")
                .to_string(),
            payload: fields.get("payload").cloned(),
        },
        other => SkillOutcome::CapabilityGap {
            reason: other.to_string(),
            payload: None,
        },
    }
}

/// Builds [`ScriptHandler`]s from skill source.
pub struct ScriptLoader {
    interpreter: String,
    timeout: Duration,
}

impl ScriptLoader {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SkillLoader for ScriptLoader {
    async fn load(
        &self,
        descriptor: &SkillDescriptor,
        code: &str,
    ) -> Result<Arc<dyn SkillHandler>, SkillError> {
        if descriptor.id.trim().is_empty() {
            return Err(SkillError::LoadFailed {
                skill_id: descriptor.id.clone(),
                reason: "empty skill id".into(),
            });
        }
        if code.trim().is_empty() {
            return Err(SkillError::LoadFailed {
                skill_id: descriptor.id.clone(),
                reason: "empty source".into(),
            });
        }
        Ok(Arc::new(ScriptHandler::new(
            descriptor.id.clone(),
            self.interpreter.clone(),
            code,
            self.timeout,
        )))
    }
}
