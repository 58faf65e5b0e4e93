use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Janus configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct JanusConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
}

impl JanusConfig {
    /// Resolve a possibly relative path against `global.data_dir`.
    pub fn data_path(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            candidate
        } else {
            PathBuf::from(&self.global.data_dir).join(candidate)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_instance_id() -> String {
    "janus".into()
}

fn default_data_dir() -> String {
    ".janus".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OtelConfig {
    pub service_name: Option<String>,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Oracle round-trips allowed per task before it is failed.
    #[serde(default = "default_max_escalations")]
    pub max_escalations: u32,
    /// Skills that always run in the background.
    #[serde(default = "default_background_skills")]
    pub background_skills: Vec<String>,
    /// Finished tasks kept for late `wait_for` callers.
    #[serde(default = "default_completed_retention")]
    pub completed_retention: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_escalations: default_max_escalations(),
            background_skills: default_background_skills(),
            completed_retention: default_completed_retention(),
        }
    }
}

fn default_max_escalations() -> u32 {
    5
}

fn default_background_skills() -> Vec<String> {
    ["cleaner_expert", "system_stats", "rescue"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_completed_retention() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Decisions below this confidence are treated as unresolved.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Send unmatched free-form requests to the oracle instead of dropping
    /// them.
    #[serde(default = "default_true")]
    pub escalate_unresolved: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            escalate_unresolved: true,
        }
    }
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_path")]
    pub path: String,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_episodic_retention_secs")]
    pub episodic_retention_secs: u64,
    #[serde(default = "default_conceptual_capacity")]
    pub conceptual_capacity: usize,
    #[serde(default = "default_layer_capacity")]
    pub semantic_capacity: usize,
    #[serde(default = "default_layer_capacity")]
    pub preference_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: default_memory_path(),
            dedup_window_secs: default_dedup_window_secs(),
            episodic_retention_secs: default_episodic_retention_secs(),
            conceptual_capacity: default_conceptual_capacity(),
            semantic_capacity: default_layer_capacity(),
            preference_capacity: default_layer_capacity(),
        }
    }
}

impl MemoryConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn episodic_retention(&self) -> Duration {
        Duration::from_secs(self.episodic_retention_secs)
    }
}

fn default_memory_path() -> String {
    "knowledge.db".into()
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_episodic_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_conceptual_capacity() -> usize {
    500
}

fn default_layer_capacity() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerceptionConfig {
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "default_snapshot_len")]
    pub snapshot_len: usize,
    #[serde(default = "default_snapshot_truncate")]
    pub snapshot_truncate: usize,
    /// Events strictly above this importance are remembered as episodic facts.
    #[serde(default = "default_promote_threshold")]
    pub promote_threshold: f64,
    #[serde(default = "default_reflex_cooldown_ms")]
    pub reflex_cooldown_ms: u64,
    #[serde(default = "default_visual_debounce_ms")]
    pub visual_debounce_ms: u64,
    /// Directory watched by the file sensor. Disabled when unset.
    #[serde(default)]
    pub watch_path: Option<String>,
    #[serde(default = "default_watch_extensions")]
    pub watch_extensions: Vec<String>,
    /// Periodic disk and clock checks.
    #[serde(default = "default_true")]
    pub system_sensor: bool,
    #[serde(default = "default_system_interval_secs")]
    pub system_interval_secs: u64,
    /// Free space below this on `disk_mount` is reported as low.
    #[serde(default = "default_disk_free_threshold_gb")]
    pub disk_free_threshold_gb: u64,
    #[serde(default = "default_disk_mount")]
    pub disk_mount: String,
    /// Local hour at which the daily reflection event fires.
    #[serde(default = "default_reflection_hour")]
    pub reflection_hour: u32,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            snapshot_len: default_snapshot_len(),
            snapshot_truncate: default_snapshot_truncate(),
            promote_threshold: default_promote_threshold(),
            reflex_cooldown_ms: default_reflex_cooldown_ms(),
            visual_debounce_ms: default_visual_debounce_ms(),
            watch_path: None,
            watch_extensions: default_watch_extensions(),
            system_sensor: true,
            system_interval_secs: default_system_interval_secs(),
            disk_free_threshold_gb: default_disk_free_threshold_gb(),
            disk_mount: default_disk_mount(),
            reflection_hour: default_reflection_hour(),
        }
    }
}

impl PerceptionConfig {
    pub fn reflex_cooldown(&self) -> Duration {
        Duration::from_millis(self.reflex_cooldown_ms)
    }

    pub fn visual_debounce(&self) -> Duration {
        Duration::from_millis(self.visual_debounce_ms)
    }

    pub fn system_interval(&self) -> Duration {
        Duration::from_secs(self.system_interval_secs)
    }
}

fn default_ring_capacity() -> usize {
    50
}

fn default_snapshot_len() -> usize {
    10
}

fn default_snapshot_truncate() -> usize {
    60
}

fn default_promote_threshold() -> f64 {
    0.7
}

fn default_reflex_cooldown_ms() -> u64 {
    5_000
}

fn default_visual_debounce_ms() -> u64 {
    1_000
}

fn default_system_interval_secs() -> u64 {
    10
}

fn default_disk_free_threshold_gb() -> u64 {
    10
}

fn default_disk_mount() -> String {
    "/".to_string()
}

fn default_reflection_hour() -> u32 {
    2
}

fn default_watch_extensions() -> Vec<String> {
    ["py", "js", "ts", "rs", "md", "json", "toml", "txt"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillsConfig {
    /// Directory of `<id>.json` manifests with matching `<id>.py` scripts.
    #[serde(default = "default_dynamic_dir")]
    pub dynamic_dir: String,
    #[serde(default = "default_protected_skills")]
    pub protected: Vec<String>,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_script_timeout_secs")]
    pub script_timeout_secs: u64,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            dynamic_dir: default_dynamic_dir(),
            protected: default_protected_skills(),
            interpreter: default_interpreter(),
            script_timeout_secs: default_script_timeout_secs(),
        }
    }
}

impl SkillsConfig {
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }
}

fn default_dynamic_dir() -> String {
    "skills".into()
}

fn default_protected_skills() -> Vec<String> {
    [
        "gene_factory",
        "gene_remover",
        "self_diagnostics",
        "memory_synthesizer",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_interpreter() -> String {
    "python3".into()
}

fn default_script_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OracleConfig {
    #[serde(default = "default_signal_dir")]
    pub signal_dir: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            signal_dir: default_signal_dir(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl OracleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_signal_dir() -> String {
    "signals".into()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranscriptConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> String {
    "logs".into()
}
