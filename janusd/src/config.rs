use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use janus_core::config::JanusConfig;

/// Load and deserialize config from a TOML file. A missing file yields the
/// built-in defaults.
pub fn load_config(path: &Path) -> Result<JanusConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(JanusConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config: JanusConfig =
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))?;
    Ok(config)
}

/// Validate config for internal consistency.
pub fn validate_config(config: &JanusConfig) -> Result<()> {
    if config.global.data_dir.trim().is_empty() {
        anyhow::bail!("global.data_dir must not be empty");
    }

    if config.orchestrator.max_escalations == 0 {
        anyhow::bail!("orchestrator.max_escalations must be at least 1");
    }
    if config.orchestrator.completed_retention == 0 {
        anyhow::bail!("orchestrator.completed_retention must be at least 1");
    }

    let unit = 0.0..=1.0;
    if !unit.contains(&config.routing.min_confidence) {
        anyhow::bail!(
            "routing.min_confidence must be within [0, 1], got {}",
            config.routing.min_confidence
        );
    }
    if !unit.contains(&config.perception.promote_threshold) {
        anyhow::bail!(
            "perception.promote_threshold must be within [0, 1], got {}",
            config.perception.promote_threshold
        );
    }

    let perception = &config.perception;
    if perception.ring_capacity == 0 {
        anyhow::bail!("perception.ring_capacity must be at least 1");
    }
    if perception.snapshot_len > perception.ring_capacity {
        anyhow::bail!(
            "perception.snapshot_len ({}) exceeds perception.ring_capacity ({})",
            perception.snapshot_len,
            perception.ring_capacity
        );
    }
    if perception.system_sensor {
        if perception.system_interval_secs == 0 {
            anyhow::bail!("perception.system_interval_secs must be at least 1");
        }
        if perception.reflection_hour > 23 {
            anyhow::bail!(
                "perception.reflection_hour must be within 0..=23, got {}",
                perception.reflection_hour
            );
        }
        if perception.disk_mount.trim().is_empty() {
            anyhow::bail!("perception.disk_mount must not be empty");
        }
    }

    let memory = &config.memory;
    for (name, capacity) in [
        ("conceptual_capacity", memory.conceptual_capacity),
        ("semantic_capacity", memory.semantic_capacity),
        ("preference_capacity", memory.preference_capacity),
    ] {
        if capacity == 0 {
            anyhow::bail!("memory.{name} must be at least 1");
        }
    }

    if config.skills.interpreter.trim().is_empty() {
        anyhow::bail!("skills.interpreter must not be empty");
    }
    if config.skills.script_timeout_secs == 0 {
        anyhow::bail!("skills.script_timeout_secs must be at least 1");
    }
    if config.oracle.poll_interval_ms == 0 {
        anyhow::bail!("oracle.poll_interval_ms must be at least 1");
    }

    info!("config validation passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<JanusConfig> {
        Ok(toml::from_str(toml_src)?)
    }

    #[test]
    fn defaults_are_valid() {
        validate_config(&JanusConfig::default()).expect("defaults");
    }

    #[test]
    fn parses_partial_document() {
        let config = parse(
            r#"
[global]
data_dir = "/var/lib/janus"

[orchestrator]
max_escalations = 2
background_skills = ["system_stats"]

[perception]
watch_path = "/home/dev/project"
watch_extensions = ["rs"]
disk_free_threshold_gb = 20

[oracle]
poll_interval_ms = 250
"#,
        )
        .expect("parse");
        assert_eq!(config.global.data_dir, "/var/lib/janus");
        assert_eq!(config.orchestrator.max_escalations, 2);
        assert_eq!(config.orchestrator.background_skills, vec!["system_stats"]);
        assert_eq!(config.perception.watch_path.as_deref(), Some("/home/dev/project"));
        assert_eq!(config.oracle.poll_interval_ms, 250);
        assert_eq!(config.perception.disk_free_threshold_gb, 20);
        assert_eq!(config.perception.system_interval_secs, 10);
        assert_eq!(config.memory.conceptual_capacity, 500);
        validate_config(&config).expect("valid");
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        assert!(parse("[orchestrator]\nmax_depth = 3\n").is_err());
        assert!(parse("[webhooks]\nurl = \"x\"\n").is_err());
    }

    #[test]
    fn inconsistent_values_are_rejected() {
        let mut config = JanusConfig::default();
        config.orchestrator.max_escalations = 0;
        assert!(validate_config(&config).is_err());

        let mut config = JanusConfig::default();
        config.routing.min_confidence = 1.5;
        assert!(validate_config(&config).is_err());

        let mut config = JanusConfig::default();
        config.perception.snapshot_len = config.perception.ring_capacity + 1;
        assert!(validate_config(&config).is_err());

        let mut config = JanusConfig::default();
        config.skills.interpreter = " ".into();
        assert!(validate_config(&config).is_err());

        let mut config = JanusConfig::default();
        config.perception.reflection_hour = 24;
        assert!(validate_config(&config).is_err());

        let mut config = JanusConfig::default();
        config.perception.system_interval_secs = 0;
        assert!(validate_config(&config).is_err());
        config.perception.system_sensor = false;
        validate_config(&config).expect("disabled sensor is not checked");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("janus_config_that_does_not_exist.toml");
        let config = load_config(&path).expect("defaults");
        assert_eq!(config.orchestrator.max_escalations, 5);
    }
}
