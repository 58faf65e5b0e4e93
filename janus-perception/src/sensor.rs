use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("watch error: {0}")]
    Watch(String),

    #[error("blocking worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// A source of raw observations feeding the event bus.
#[async_trait]
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `shutdown` flips to `true`.
    async fn run(&self, bus: EventBus, shutdown: watch::Receiver<bool>) -> Result<(), SensorError>;
}

/// Owns all sensors and their background tasks.
pub struct SensorManager {
    sensors: Vec<Arc<dyn Sensor>>,
    handles: Vec<(String, JoinHandle<()>)>,
    shutdown_tx: watch::Sender<bool>,
}

impl SensorManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            sensors: Vec::new(),
            handles: Vec::new(),
            shutdown_tx,
        }
    }

    pub fn add(&mut self, sensor: Arc<dyn Sensor>) {
        self.sensors.push(sensor);
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Spawn every sensor against `bus`.
    pub fn start(&mut self, bus: &EventBus) {
        for sensor in &self.sensors {
            let sensor = Arc::clone(sensor);
            let name = sensor.name().to_string();
            let bus = bus.clone();
            let shutdown = self.shutdown_tx.subscribe();
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = sensor.run(bus, shutdown).await {
                    error!(sensor = %task_name, error = %e, "sensor stopped with error");
                }
            });
            info!(sensor = %name, "sensor started");
            self.handles.push((name, handle));
        }
    }

    /// Signal every sensor to stop and wait briefly for each to exit.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles.drain(..) {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(_) => info!(sensor = %name, "sensor stopped"),
                Err(_) => warn!(sensor = %name, "sensor did not stop in time"),
            }
        }
    }
}

impl Default for SensorManager {
    fn default() -> Self {
        Self::new()
    }
}
