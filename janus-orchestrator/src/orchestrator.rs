use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use janus_core::audit::{AuditStatus, Auditor};
use janus_core::config::JanusConfig;
use janus_core::error::{JanusError, TaskFailure};
use janus_core::intent::{Intent, RESCUE_SKILL_ID};
use janus_core::memory::REFLEX_RULE_CATEGORY;
use janus_core::oracle::{GeneInjection, OracleBridge, OracleRequest, OracleResponse};
use janus_core::skill::{SkillDescriptor, SkillFault, SkillLoader, SkillOutcome};
use janus_core::task::{Role, Task, TaskId, TaskState};
use janus_memory::FactStore;
use janus_perception::{EventBus, ReflexDispatch};
use janus_skills::SkillRegistry;
use janus_skills::manifest::write_skill_files;

use crate::active::ActiveTasks;
use crate::builtins::{Builtins, builtin_descriptors, is_builtin};
use crate::completion::{CompletionHub, Notification};
use crate::resolver::IntentResolver;
use crate::transcript::TranscriptWriter;

/// Collaborators the orchestrator drives. Each owns its own locking.
pub struct OrchestratorParts {
    pub facts: Arc<FactStore>,
    pub bus: EventBus,
    pub registry: Arc<SkillRegistry>,
    pub loader: Arc<dyn SkillLoader>,
    pub resolver: Arc<dyn IntentResolver>,
    pub auditor: Arc<dyn Auditor>,
    pub oracle: Arc<dyn OracleBridge>,
    pub transcript: Arc<dyn TranscriptWriter>,
}

struct Settings {
    max_escalations: u32,
    background_skills: HashSet<String>,
    min_confidence: f64,
    gene_dir: PathBuf,
}

impl Settings {
    fn from_config(config: &JanusConfig) -> Self {
        Self {
            max_escalations: config.orchestrator.max_escalations,
            background_skills: config.orchestrator.background_skills.iter().cloned().collect(),
            min_confidence: config.routing.min_confidence,
            gene_dir: config.data_path(&config.skills.dynamic_dir),
        }
    }
}

struct Inner {
    settings: Settings,
    parts: OrchestratorParts,
    active: ActiveTasks,
    completions: CompletionHub,
    notify_tx: mpsc::UnboundedSender<Notification>,
}

/// Result of driving a task as far as the current caller should.
enum Step {
    /// Terminal; ready to be finalized.
    Finished(Task),
    /// Escalated from the foreground; continues in the background.
    HandedOff(Task),
}

enum Dispatch {
    Missing,
    Ran {
        result: Result<SkillOutcome, SkillFault>,
        source: Option<String>,
    },
}

/// Everything the oracle gets told about a failed dispatch.
struct Escalation {
    message: String,
    kind: String,
    detail: Option<String>,
    payload: Option<Value>,
    source: Option<String>,
}

/// Owns the task lifecycle: routing, the audit gate, foreground and
/// background execution, escalation to the oracle, and completion delivery.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build the orchestrator and start its completion monitor. The returned
    /// receiver carries suggestions and unclaimed background completions.
    pub fn new(
        config: &JanusConfig,
        parts: OrchestratorParts,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (completions, _monitor) =
            CompletionHub::spawn(config.orchestrator.completed_retention, notify_tx.clone());
        let orchestrator = Self {
            inner: Arc::new(Inner {
                settings: Settings::from_config(config),
                parts,
                active: ActiveTasks::new(),
                completions,
                notify_tx,
            }),
        };
        (orchestrator, notify_rx)
    }

    /// Consume reflex-spawned tasks from the event bus until it goes away.
    pub fn spawn_reflex_loop(
        &self,
        mut reflexes: mpsc::UnboundedReceiver<ReflexDispatch>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(dispatch) = reflexes.recv().await {
                this.accept_reflex(dispatch).await;
            }
            debug!("reflex loop stopped");
        })
    }

    /// Route, audit and run a request. Foreground work runs to completion
    /// (or until it escalates); background work returns as `Running`.
    #[instrument(skip(self))]
    pub async fn submit(&self, query: &str) -> Task {
        self.sync_skills().await;
        let snapshot = self.inner.parts.bus.render_snapshot();
        let mut task = Task::new(query);
        task.metadata.perception_snapshot = Some(snapshot.clone());
        self.inner.completions.track(task.id).await;
        info!(task_id = %task.id, "task_submitted");

        let resolved = self
            .inner
            .parts
            .resolver
            .resolve(query, &snapshot, &self.manifest())
            .await;
        self.sync_skills().await;

        let intent = match resolved {
            Some(intent)
                if intent.target().is_some()
                    && intent.confidence >= self.inner.settings.min_confidence =>
            {
                intent
            }
            other => {
                let confidence = other.as_ref().map(|intent| intent.confidence);
                task.metadata.intent = other;
                task.metadata.failure = Some(TaskFailure::RoutingFailure);
                task.push_record_with(
                    Role::System,
                    TaskFailure::RoutingFailure.to_string(),
                    json!({ "confidence": confidence }),
                );
                info!(task_id = %task.id, ?confidence, "task_unresolved");
                self.finish(task.clone()).await;
                return task;
            }
        };

        let skill_id = intent.target().map(str::to_string).unwrap_or_default();
        let parameters = intent.parameters.clone();
        task.metadata.background = self.is_background(&intent, &skill_id);
        task.metadata.intent = Some(intent);
        task.set_state(TaskState::Auditing);

        let verdict = self
            .inner
            .parts
            .auditor
            .audit(&skill_id, &parameters, &task)
            .await;
        info!(
            task_id = %task.id,
            skill_id = %skill_id,
            status = ?verdict.status,
            risk_level = verdict.risk_level,
            "task_audited"
        );
        task.push_record_with(
            Role::System,
            format!(
                "audit {}: {} (risk {})",
                verdict.status.as_str(),
                verdict.reason,
                verdict.risk_level
            ),
            json!({ "skill_id": skill_id, "risk_level": verdict.risk_level }),
        );
        task.metadata.audit = Some(verdict.clone());

        match verdict.status {
            AuditStatus::Fail => {
                let failure = TaskFailure::AuditRejection {
                    skill_id,
                    reason: verdict.reason,
                };
                task.push_record(Role::System, failure.to_string());
                task.metadata.failure = Some(failure);
                task.set_state(TaskState::Rejected);
                self.finish(task.clone()).await;
                task
            }
            AuditStatus::Warn => {
                task.push_record(
                    Role::System,
                    format!("audit warning: {}; awaiting confirmation", verdict.reason),
                );
                self.inner.active.insert(task.clone()).await;
                task
            }
            AuditStatus::Pass => {
                self.inner.active.insert(task.clone()).await;
                self.launch(task).await
            }
        }
    }

    /// Answer a task parked in `Auditing`. Approval runs it without a second
    /// audit; refusal rejects it.
    pub async fn confirm(&self, task_id: TaskId, approve: bool) -> Result<Task, JanusError> {
        let mut task = self.inner.active.take_parked(task_id, approve).await?;
        self.inner.parts.bus.resolve_suggestion(task_id);

        if approve {
            info!(task_id = %task_id, "task_confirmed");
            task.push_record(Role::System, "confirmed");
            return Ok(self.launch(task).await);
        }

        info!(task_id = %task_id, "task_declined");
        task.push_record(Role::System, TaskFailure::Declined.to_string());
        task.metadata.failure = Some(TaskFailure::Declined);
        task.set_state(TaskState::Rejected);
        self.finish(task.clone()).await;
        Ok(task)
    }

    /// Cancel a background execution or withdraw a parked task.
    pub async fn abort(&self, task_id: TaskId) -> Result<Task, JanusError> {
        let mut task = self.inner.active.take_abortable(task_id).await?;
        self.inner.parts.bus.resolve_suggestion(task_id);
        warn!(task_id = %task_id, state = %task.state, "task_aborted");
        task.fail(TaskFailure::Aborted);
        self.finish(task.clone()).await;
        Ok(task)
    }

    /// Block until `task_id` is terminal.
    pub async fn wait_for(&self, task_id: TaskId) -> Result<Task, JanusError> {
        Ok(self.inner.completions.wait(task_id).await?)
    }

    /// Current copy of an active or recently finished task.
    pub async fn task(&self, task_id: TaskId) -> Option<Task> {
        match self.inner.active.get(task_id).await {
            Some(task) => Some(task),
            None => self.inner.completions.recent(task_id).await,
        }
    }

    pub async fn active_tasks(&self) -> Vec<Task> {
        self.inner.active.snapshot().await
    }

    /// Parked tasks, oldest first.
    pub async fn awaiting_confirmation(&self) -> Vec<Task> {
        self.inner
            .active
            .snapshot()
            .await
            .into_iter()
            .filter(|task| task.state == TaskState::Auditing)
            .collect()
    }

    /// Built-in plus registered skills.
    pub fn manifest(&self) -> Vec<SkillDescriptor> {
        let mut skills = builtin_descriptors();
        skills.extend(self.inner.parts.registry.descriptors());
        skills
    }

    /// Take a task spawned by a reflex rule. Auto-run tasks start in the
    /// background straight away; suggestions are parked and announced.
    pub async fn accept_reflex(&self, dispatch: ReflexDispatch) -> Task {
        let ReflexDispatch {
            rule_id,
            mut task,
            auto_run,
        } = dispatch;
        self.inner.completions.track(task.id).await;

        let skill_id = task.target_skill_id().unwrap_or_default().to_string();
        let background = task
            .intent()
            .is_some_and(|intent| self.is_background(intent, &skill_id));
        task.metadata.background = auto_run || background;
        task.metadata
            .extra
            .insert("reflex_rule".into(), Value::String(rule_id.clone()));

        if auto_run {
            info!(task_id = %task.id, rule_id = %rule_id, skill_id = %skill_id, "reflex_auto_run");
            task.push_record(Role::System, format!("started by reflex rule {rule_id}"));
            self.inner.active.insert(task.clone()).await;
            return self.launch(task).await;
        }

        info!(task_id = %task.id, rule_id = %rule_id, skill_id = %skill_id, "reflex_suggested");
        task.set_state(TaskState::Auditing);
        task.push_record(
            Role::System,
            format!("suggested by reflex rule {rule_id}; awaiting confirmation"),
        );
        self.inner.active.insert(task.clone()).await;
        let _ = self
            .inner
            .notify_tx
            .send(Notification::Suggestion(task.clone()));
        task
    }

    fn is_background(&self, intent: &Intent, skill_id: &str) -> bool {
        intent.requests_background() || self.inner.settings.background_skills.contains(skill_id)
    }

    async fn sync_skills(&self) {
        match self.inner.parts.registry.sync_dynamic().await {
            Ok(0) => {}
            Ok(added) => info!(added, "dynamic_skills_synced"),
            Err(e) => warn!(error = %e, "dynamic skill scan failed"),
        }
    }

    /// Start execution of an active task, in the foreground or background.
    async fn launch(&self, mut task: Task) -> Task {
        task.set_state(TaskState::Running);
        self.inner.active.update(&task).await;

        if task.metadata.background {
            self.spawn_background(task.clone()).await;
            return task;
        }
        match self.drive(task, true).await {
            Step::Finished(task) => self.finalize(task).await,
            Step::HandedOff(task) => {
                self.spawn_background(task.clone()).await;
                task
            }
        }
    }

    async fn spawn_background(&self, task: Task) {
        let task_id = task.id;
        let this = self.clone();
        let execution = async move {
            let (Step::Finished(task) | Step::HandedOff(task)) = this.drive(task, false).await;
            this.finalize(task).await;
        };
        self.inner.active.spawn_abortable(task_id, execution).await;
    }

    /// The dispatch and escalation loop. The escalation counter lives in the
    /// task metadata, so the bound holds across foreground and background
    /// legs of the same task.
    async fn drive(&self, mut task: Task, foreground: bool) -> Step {
        loop {
            let Some(intent) = task.metadata.intent.clone() else {
                task.fail(TaskFailure::RoutingFailure);
                return Step::Finished(task);
            };
            let Some(skill_id) = intent.target().map(str::to_string) else {
                task.fail(TaskFailure::RoutingFailure);
                return Step::Finished(task);
            };

            if skill_id == RESCUE_SKILL_ID {
                if let Err(failure) = self.rescue(&mut task).await {
                    task.fail(failure);
                    return Step::Finished(task);
                }
                continue;
            }

            let escalation = match self.dispatch(&skill_id, &intent.parameters, &task).await {
                Dispatch::Missing => {
                    warn!(task_id = %task.id, skill_id = %skill_id, "handler_not_found");
                    task.fail(TaskFailure::HandlerNotFound { skill_id });
                    return Step::Finished(task);
                }
                Dispatch::Ran {
                    result: Ok(SkillOutcome::Completed(output)),
                    ..
                } => {
                    complete(&mut task, &skill_id, output);
                    return Step::Finished(task);
                }
                Dispatch::Ran {
                    result: Ok(SkillOutcome::CapabilityGap { reason, payload }),
                    source,
                } => Escalation {
                    message: reason,
                    kind: "capability_gap".into(),
                    detail: None,
                    payload,
                    source,
                },
                Dispatch::Ran {
                    result: Err(fault), ..
                } if fault.is_invalid_parameters() => {
                    task.fail(TaskFailure::InvalidParameters {
                        skill_id,
                        message: fault.message,
                    });
                    return Step::Finished(task);
                }
                Dispatch::Ran {
                    result: Err(fault),
                    source,
                } => Escalation {
                    message: fault.message,
                    kind: fault.kind,
                    detail: fault.detail,
                    payload: None,
                    source,
                },
            };

            let limit = self.inner.settings.max_escalations;
            if task.metadata.escalations >= limit {
                warn!(
                    task_id = %task.id,
                    skill_id = %skill_id,
                    escalations = task.metadata.escalations,
                    "escalation_exhausted"
                );
                let fault = TaskFailure::HandlerFault {
                    skill_id,
                    message: escalation.message,
                };
                task.push_record(Role::System, fault.to_string());
                task.fail(TaskFailure::EscalationExhausted { limit });
                return Step::Finished(task);
            }

            escalate(&mut task, &skill_id, escalation);
            if foreground {
                task.metadata.background = true;
                self.inner.active.update(&task).await;
                return Step::HandedOff(task);
            }
            self.inner.active.update(&task).await;
        }
    }

    async fn dispatch(
        &self,
        skill_id: &str,
        parameters: &Map<String, Value>,
        task: &Task,
    ) -> Dispatch {
        let builtins = Builtins {
            facts: &self.inner.parts.facts,
            bus: &self.inner.parts.bus,
            registry: &self.inner.parts.registry,
            transcript: self.inner.parts.transcript.as_ref(),
        };
        if let Some(result) = builtins.run(skill_id, parameters, task).await {
            return Dispatch::Ran {
                result: result.map(SkillOutcome::Completed),
                source: None,
            };
        }

        let Some(handler) = self.inner.parts.registry.handler(skill_id) else {
            return Dispatch::Missing;
        };
        debug!(task_id = %task.id, skill_id = %skill_id, "skill_dispatched");
        Dispatch::Ran {
            result: handler.execute(parameters, task).await,
            source: handler.source(),
        }
    }

    /// Ask the oracle what to do next, apply whatever it injects, and swap in
    /// its routing decision.
    async fn rescue(&self, task: &mut Task) -> Result<(), TaskFailure> {
        task.set_state(TaskState::Waiting);
        self.inner.active.update(task).await;

        let request = OracleRequest {
            task_id: task.id,
            query: task.query().to_string(),
            perception_snapshot: self.inner.parts.bus.render_snapshot(),
            error_context: task.metadata.error_context.clone(),
            available_skills: self.manifest(),
            timestamp: Utc::now(),
            status: "pending".into(),
        };
        info!(
            task_id = %task.id,
            escalations = task.metadata.escalations,
            "oracle_consulted"
        );
        let response = self
            .inner
            .parts
            .oracle
            .consult(request)
            .await
            .map_err(|e| TaskFailure::HandlerFault {
                skill_id: RESCUE_SKILL_ID.into(),
                message: e.to_string(),
            })?;

        task.set_state(TaskState::Running);
        let thought = if response.thought.is_empty() {
            "oracle responded".to_string()
        } else {
            format!("oracle: {}", response.thought)
        };
        task.push_record_with(
            Role::Assistant,
            thought,
            json!({ "target_skill_id": response.target_skill_id }),
        );

        let installed = match &response.gene_injection {
            Some(gene) => self.install_gene(task, gene).await,
            None => None,
        };
        self.merge_memory(task, &response).await;
        self.sync_skills().await;

        let mut intent = response.intent(task.query());
        if intent.target().is_none()
            && let Some(skill_id) = installed
        {
            intent = intent.with_target(skill_id, 1.0);
        }
        if intent.target().is_none() {
            return Err(TaskFailure::RoutingFailure);
        }
        if intent.is_rescue() {
            return Err(TaskFailure::HandlerFault {
                skill_id: RESCUE_SKILL_ID.into(),
                message: "oracle routed the task back to rescue".into(),
            });
        }
        task.metadata.intent = Some(intent);
        self.inner.active.update(task).await;
        Ok(())
    }

    /// Load and install injected code under the skill that failed. Nothing is
    /// registered unless the loader accepts the code.
    async fn install_gene(&self, task: &mut Task, gene: &GeneInjection) -> Option<String> {
        let skill_id = task
            .metadata
            .original_skill_id
            .clone()
            .or_else(|| gene.id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| gene.manifest.id.clone());
        if skill_id.is_empty() || skill_id == RESCUE_SKILL_ID || is_builtin(&skill_id) {
            warn!(task_id = %task.id, skill_id = %skill_id, "gene injection targets a reserved id");
            task.push_record(
                Role::System,
                format!("gene injection ignored: '{skill_id}' cannot be replaced"),
            );
            return None;
        }

        let mut descriptor = gene.manifest.clone();
        descriptor.id = skill_id.clone();
        if descriptor.name.is_empty() {
            descriptor.name = skill_id.clone();
        }

        let installed = match self.inner.parts.loader.load(&descriptor, &gene.code).await {
            Ok(handler) => self
                .inner
                .parts
                .registry
                .install(descriptor.clone(), handler),
            Err(e) => Err(e),
        };
        if let Err(e) = installed {
            warn!(task_id = %task.id, skill_id = %skill_id, error = %e, "gene_rejected");
            task.push_record(Role::System, format!("gene injection rejected: {e}"));
            return None;
        }

        if let Err(e) = write_skill_files(&self.inner.settings.gene_dir, &descriptor, &gene.code).await
        {
            warn!(skill_id = %skill_id, error = %e, "installed skill not persisted");
        }
        info!(task_id = %task.id, skill_id = %skill_id, "gene_installed");
        task.push_record(Role::System, format!("installed skill {skill_id}"));
        task.artifacts.push(format!("skill:{skill_id}"));
        Some(skill_id)
    }

    async fn merge_memory(&self, task: &Task, response: &OracleResponse) {
        let source_task = task.id.to_string();
        let mut rules_changed = false;
        for injection in &response.memory_injection {
            match self
                .inner
                .parts
                .facts
                .add_named(
                    &injection.layer,
                    &injection.fact.category,
                    &injection.fact.content,
                    &source_task,
                )
                .await
            {
                Ok(inserted) => {
                    debug!(task_id = %task.id, layer = %injection.layer, inserted, "memory_injected");
                    rules_changed |= inserted && injection.fact.category == REFLEX_RULE_CATEGORY;
                }
                Err(e) => {
                    warn!(task_id = %task.id, layer = %injection.layer, error = %e, "memory injection skipped")
                }
            }
        }
        if rules_changed && let Err(e) = self.inner.parts.bus.reload_rules().await {
            warn!(error = %e, "reflex rule reload after injection failed");
        }
    }

    /// Remove a finished task from the active set and persist it, once.
    async fn finalize(&self, task: Task) -> Task {
        if self.inner.active.remove(task.id).await.is_none() {
            debug!(task_id = %task.id, "task_already_finalized");
            return task;
        }
        self.finish(task.clone()).await;
        task
    }

    async fn finish(&self, task: Task) {
        if let Err(e) = self.inner.parts.transcript.record(&task).await {
            warn!(task_id = %task.id, error = %e, "transcript_write_failed");
        }
        info!(task_id = %task.id, state = %task.state, "task_finished");
        self.inner.completions.complete(task);
    }
}

fn complete(task: &mut Task, skill_id: &str, output: Value) {
    if let Some(artifacts) = output.get("artifacts").and_then(Value::as_array) {
        task.artifacts
            .extend(artifacts.iter().filter_map(Value::as_str).map(str::to_string));
    }
    let content = match &output {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    task.push_record_with(Role::Assistant, content, json!({ "skill_id": skill_id }));
    task.set_state(TaskState::Completed);
    info!(task_id = %task.id, skill_id = %skill_id, "task_completed");
}

/// Record the failure, layering over any earlier error context, and point
/// the task at the rescue skill.
fn escalate(task: &mut Task, skill_id: &str, escalation: Escalation) {
    task.metadata.escalations += 1;
    let attempt = task.metadata.escalations;
    let previous = task.metadata.error_context.take();
    task.metadata.error_context = Some(json!({
        "skill_id": skill_id,
        "error": escalation.message,
        "kind": escalation.kind,
        "detail": escalation.detail,
        "payload": escalation.payload,
        "faulty_source": escalation.source,
        "attempt": attempt,
        "previous": previous,
    }));
    task.metadata.original_skill_id = Some(skill_id.to_string());

    let parameters = task
        .intent()
        .map(|intent| intent.parameters.clone())
        .unwrap_or_default();
    task.metadata.intent = Some(
        Intent::new(task.query())
            .with_target(RESCUE_SKILL_ID, 1.0)
            .with_thought(format!("{skill_id} failed; asking the oracle"))
            .with_parameters(parameters),
    );
    task.push_record_with(
        Role::System,
        format!("{skill_id} failed: {}; escalating", escalation.message),
        json!({ "escalation": attempt }),
    );
    task.set_state(TaskState::Waiting);
    warn!(task_id = %task.id, skill_id = %skill_id, escalation = attempt, "task_escalated");
}
