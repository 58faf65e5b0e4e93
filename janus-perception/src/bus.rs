use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use janus_core::config::PerceptionConfig;
use janus_core::error::MemoryError;
use janus_core::intent::Intent;
use janus_core::memory::{FactLayer, REFLEX_RULE_CATEGORY};
use janus_core::perception::{PerceptionEvent, ReflexRule, SnapshotEntry, VISUAL_SOURCE};
use janus_core::task::{Task, TaskId};
use janus_memory::FactStore;

use crate::rules::{baseline_rules, merge_rules};

/// Category under which salient events are remembered.
pub const PERCEPTION_CATEGORY: &str = "Perception";
const PERCEPTION_SOURCE_TASK: &str = "perception-bus";

/// A task spawned by a reflex rule, on its way to the orchestrator.
#[derive(Debug, Clone)]
pub struct ReflexDispatch {
    pub rule_id: String,
    pub task: Task,
    pub auto_run: bool,
}

#[derive(Default)]
struct VisualBuffer {
    items: Vec<PerceptionEvent>,
    /// Bumped on every emission; a flush only runs if it still holds the
    /// latest generation.
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

struct BusInner {
    config: PerceptionConfig,
    facts: Arc<FactStore>,
    ring: Mutex<VecDeque<PerceptionEvent>>,
    visual: Mutex<VisualBuffer>,
    rules: RwLock<Vec<ReflexRule>>,
    cooldowns: Mutex<HashMap<String, Instant>>,
    pending_suggestion: Mutex<Option<TaskId>>,
    reflex_tx: mpsc::UnboundedSender<ReflexDispatch>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Single ingress for raw observations. Debounces visual bursts, keeps a
/// short history for ambient context, remembers salient events and fires
/// reflex rules.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Build a bus and the receiving end of its reflex channel.
    pub fn new(
        config: PerceptionConfig,
        facts: Arc<FactStore>,
    ) -> (Self, mpsc::UnboundedReceiver<ReflexDispatch>) {
        let (reflex_tx, reflex_rx) = mpsc::unbounded_channel();
        let ring_capacity = config.ring_capacity;
        let bus = Self {
            inner: Arc::new(BusInner {
                config,
                facts,
                ring: Mutex::new(VecDeque::with_capacity(ring_capacity)),
                visual: Mutex::new(VisualBuffer::default()),
                rules: RwLock::new(baseline_rules()),
                cooldowns: Mutex::new(HashMap::new()),
                pending_suggestion: Mutex::new(None),
                reflex_tx,
            }),
        };
        (bus, reflex_rx)
    }

    pub async fn emit(&self, source: &str, content: impl Into<Value>, importance: f64) {
        let event = PerceptionEvent::new(source, content, importance);
        if event.source == VISUAL_SOURCE {
            self.buffer_visual(event);
        } else {
            self.inner.process(event).await;
        }
    }

    fn buffer_visual(&self, event: PerceptionEvent) {
        let mut buffer = lock(&self.inner.visual);
        buffer.items.push(event);
        buffer.generation += 1;
        let generation = buffer.generation;
        if let Some(previous) = buffer.pending.take() {
            previous.abort();
        }

        let inner = Arc::clone(&self.inner);
        let delay = inner.config.visual_debounce();
        buffer.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.flush_visual(generation).await;
        }));
    }

    /// The most recent events, oldest first, with content truncated.
    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        let ring = lock(&self.inner.ring);
        let limit = self.inner.config.snapshot_len;
        let skip = ring.len().saturating_sub(limit);
        ring.iter()
            .skip(skip)
            .map(|event| SnapshotEntry {
                timestamp: event.timestamp,
                source: event.source.clone(),
                content: truncate_chars(&event.content_text(), self.inner.config.snapshot_truncate),
            })
            .collect()
    }

    pub fn render_snapshot(&self) -> String {
        let entries = self.snapshot();
        if entries.is_empty() {
            return "(no recent activity)".to_string();
        }
        entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn ring_len(&self) -> usize {
        lock(&self.inner.ring).len()
    }

    pub fn rules(&self) -> Vec<ReflexRule> {
        self.inner
            .rules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Rebuild the rule set from the baseline plus rules stored as
    /// conceptual facts. Returns the number of active rules.
    pub async fn reload_rules(&self) -> Result<usize, MemoryError> {
        let stored: Vec<_> = self
            .inner
            .facts
            .facts(FactLayer::Conceptual)
            .await?
            .into_iter()
            .filter(|fact| fact.category == REFLEX_RULE_CATEGORY)
            .collect();
        let rules = merge_rules(baseline_rules(), &stored);
        let count = rules.len();
        *self
            .inner
            .rules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = rules;
        info!(rule_count = count, "reflex rules reloaded");
        Ok(count)
    }

    pub fn pending_suggestion(&self) -> Option<TaskId> {
        *lock(&self.inner.pending_suggestion)
    }

    /// Release the suggestion slot once `task_id` has been confirmed or
    /// declined.
    pub fn resolve_suggestion(&self, task_id: TaskId) -> bool {
        let mut slot = lock(&self.inner.pending_suggestion);
        if *slot == Some(task_id) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

impl BusInner {
    async fn flush_visual(&self, generation: u64) {
        let items = {
            let mut buffer = lock(&self.visual);
            if buffer.generation != generation {
                return;
            }
            // Detach ourselves so a later emission cannot abort this flush.
            buffer.pending = None;
            std::mem::take(&mut buffer.items)
        };
        if let Some(event) = aggregate_visual(items) {
            self.process(event).await;
        }
    }

    async fn process(&self, event: PerceptionEvent) {
        debug!(source = %event.source, importance = event.importance, "perception_event");
        {
            let mut ring = lock(&self.ring);
            while ring.len() >= self.config.ring_capacity.max(1) {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        if event.importance > self.config.promote_threshold {
            let content = format!("[{}] {}", event.source.to_uppercase(), event.content_text());
            if let Err(e) = self
                .facts
                .add(
                    FactLayer::Episodic,
                    PERCEPTION_CATEGORY,
                    &content,
                    PERCEPTION_SOURCE_TASK,
                )
                .await
            {
                warn!(error = %e, "failed to remember perception event");
            }
        }

        self.fire_reflex(&event);
    }

    fn fire_reflex(&self, event: &PerceptionEvent) {
        let rule = self
            .rules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|rule| rule.matches(event))
            .cloned();
        let Some(rule) = rule else {
            return;
        };

        let now = Instant::now();
        let mut cooldowns = lock(&self.cooldowns);
        if let Some(last) = cooldowns.get(&rule.id)
            && now.duration_since(*last) < self.config.reflex_cooldown()
        {
            debug!(rule_id = %rule.id, "reflex suppressed by cooldown");
            return;
        }

        let message = rule.render_message(event);
        let intent = Intent::new(message.clone())
            .with_target(rule.target_skill_id.clone(), 1.0)
            .with_thought(format!("reflex rule {}", rule.id))
            .with_parameters(rule.params.clone());
        let task = Task::from_reflex(message, intent, rule.auto_run);

        let mut pending = lock(&self.pending_suggestion);
        if !rule.auto_run {
            if let Some(existing) = *pending {
                debug!(rule_id = %rule.id, pending = %existing, "reflex suppressed by pending suggestion");
                return;
            }
            *pending = Some(task.id);
        }
        cooldowns.insert(rule.id.clone(), now);

        let task_id = task.id;
        let dispatch = ReflexDispatch {
            rule_id: rule.id.clone(),
            task,
            auto_run: rule.auto_run,
        };
        if self.reflex_tx.send(dispatch).is_err() {
            warn!(rule_id = %rule.id, "reflex channel closed, dropping task");
            if *pending == Some(task_id) {
                *pending = None;
            }
            return;
        }
        info!(rule_id = %rule.id, task_id = %task_id, auto_run = rule.auto_run, "reflex_fired");
    }
}

/// Collapse a debounced visual burst into one event. Single items pass
/// through unchanged.
fn aggregate_visual(mut items: Vec<PerceptionEvent>) -> Option<PerceptionEvent> {
    if items.len() <= 1 {
        return items.pop();
    }

    let mean = items.iter().map(|e| e.importance).sum::<f64>() / items.len() as f64;
    let mut names: Vec<String> = Vec::new();
    for item in &items {
        let text = item.content_text();
        let name = text.rsplit(':').next().unwrap_or_default().trim().to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    let shown = names.iter().take(2).cloned().collect::<Vec<_>>().join(", ");
    let suffix = if names.len() > 2 { " and more" } else { "" };
    let content = format!(
        "Detected batch activity ({} changes): {shown}{suffix}",
        items.len()
    );
    Some(PerceptionEvent::new(VISUAL_SOURCE, content, mean))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
