mod config;
mod repl;
mod shutdown;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use janus_core::skill::SkillLoader;
use janus_memory::{FactStore, FactStoreLimits};
use janus_orchestrator::{
    CompositeAuditor, FileOracleBridge, KeywordResolver, MarkdownTranscript, Orchestrator,
    OrchestratorParts, RuleBasedAuditor,
};
use janus_perception::{EventBus, FileSensor, SensorManager, SystemSensor};
use janus_skills::{ScriptLoader, SkillRegistry};

use crate::repl::{Command, Console};

/// Janus daemon: routes requests to skills, watches the workspace and
/// escalates what it cannot handle to the oracle.
#[derive(Parser, Debug)]
#[command(name = "janusd", version, about)]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "janus.toml")]
    config: PathBuf,

    /// Increase log verbosity (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Validate config and exit.
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 1. Load and validate config
    // -----------------------------------------------------------------------
    let config = config::load_config(&cli.config)?;
    config::validate_config(&config)?;

    if cli.validate {
        println!("config is valid");
        return Ok(());
    }

    // -----------------------------------------------------------------------
    // 2. Initialize tracing / OTEL
    // -----------------------------------------------------------------------
    let telemetry_guard = telemetry::init_telemetry(&config.otel, cli.verbose)?;

    info!(
        instance_id = %config.global.instance_id,
        data_dir = %config.global.data_dir,
        "janusd starting"
    );
    tokio::fs::create_dir_all(&config.global.data_dir)
        .await
        .with_context(|| format!("creating data dir: {}", config.global.data_dir))?;

    // -----------------------------------------------------------------------
    // 3. Memory and perception
    // -----------------------------------------------------------------------
    let facts = Arc::new(
        FactStore::open(
            &config.data_path(&config.memory.path),
            FactStoreLimits::from(&config.memory),
        )
        .await
        .context("opening fact store")?,
    );
    let (bus, reflex_rx) = EventBus::new(config.perception.clone(), Arc::clone(&facts));
    match bus.reload_rules().await {
        Ok(count) => info!(rules = count, "reflex rules loaded"),
        Err(e) => warn!(error = %e, "failed to load learned reflex rules, using baseline"),
    }

    // -----------------------------------------------------------------------
    // 4. Skills
    // -----------------------------------------------------------------------
    let loader: Arc<dyn SkillLoader> = Arc::new(ScriptLoader::new(
        config.skills.interpreter.clone(),
        config.skills.script_timeout(),
    ));
    let registry = Arc::new(
        SkillRegistry::new(config.skills.protected.clone())
            .with_dynamic_dir(config.data_path(&config.skills.dynamic_dir), Arc::clone(&loader)),
    );
    match registry.sync_dynamic().await {
        Ok(loaded) => info!(loaded, "dynamic skills synced"),
        Err(e) => warn!(error = %e, "dynamic skill sync failed (non-fatal)"),
    }

    // -----------------------------------------------------------------------
    // 5. Orchestrator
    // -----------------------------------------------------------------------
    let parts = OrchestratorParts {
        facts: Arc::clone(&facts),
        bus: bus.clone(),
        registry,
        loader,
        resolver: Arc::new(KeywordResolver::new(config.routing.escalate_unresolved)),
        auditor: Arc::new(CompositeAuditor::new(vec![Arc::new(RuleBasedAuditor::new())])),
        oracle: Arc::new(FileOracleBridge::new(
            config.data_path(&config.oracle.signal_dir),
            config.oracle.poll_interval(),
        )),
        transcript: Arc::new(MarkdownTranscript::new(
            config.data_path(&config.transcript.log_dir),
        )),
    };
    let (orchestrator, mut notify_rx) = Orchestrator::new(&config, parts);
    let reflex_loop = orchestrator.spawn_reflex_loop(reflex_rx);
    let console = Console::new(orchestrator);

    let mut sensors = SensorManager::new();
    if config.perception.system_sensor {
        sensors.add(Arc::new(SystemSensor::from_config(&config.perception)));
    }
    if let Some(ref watch_path) = config.perception.watch_path {
        sensors.add(Arc::new(FileSensor::new(
            PathBuf::from(watch_path),
            config.perception.watch_extensions.clone(),
        )));
    }
    sensors.start(&bus);

    // -----------------------------------------------------------------------
    // 6. Spawn signal handler
    // -----------------------------------------------------------------------
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let (reload_tx, mut reload_rx) = watch::channel(());
    tokio::spawn(shutdown::signal_listener(shutdown_tx.clone(), reload_tx.clone()));

    // -----------------------------------------------------------------------
    // 7. Main loop
    // -----------------------------------------------------------------------
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!(sensors = sensors.len(), "entering main loop");
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("shutdown signal received, beginning graceful shutdown");
                    break;
                }
            }
            _ = reload_rx.changed() => {
                match bus.reload_rules().await {
                    Ok(count) => info!(rules = count, "reflex rules reloaded"),
                    Err(e) => warn!(error = %e, "reflex rule reload failed, keeping current rules"),
                }
            }
            Some(notification) = notify_rx.recv() => {
                console.announce(notification);
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match repl::parse_command(&line) {
                        Command::Quit => {
                            info!("quit requested from console");
                            break;
                        }
                        command => {
                            let console = console.clone();
                            tokio::spawn(async move { console.execute(command).await });
                        }
                    },
                    Ok(None) => {
                        info!("stdin closed, continuing without console input");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read console input");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // 8. Graceful shutdown
    // -----------------------------------------------------------------------
    info!("graceful shutdown: stopping sensors");
    sensors.shutdown().await;
    reflex_loop.abort();

    info!("graceful shutdown: flushing OTEL spans");
    telemetry_guard.flush();

    info!("janusd stopped");
    Ok(())
}
