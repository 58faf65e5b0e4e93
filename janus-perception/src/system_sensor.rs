use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use sysinfo::Disks;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use janus_core::config::PerceptionConfig;
use janus_core::perception::{CHRONOS_SOURCE, PerceptionEvent, SYSTEM_SOURCE};

use crate::bus::EventBus;
use crate::sensor::{Sensor, SensorError};

const GB: u64 = 1024 * 1024 * 1024;
const DISK_LOW_IMPORTANCE: f64 = 0.8;
const REFLECTION_IMPORTANCE: f64 = 0.9;

/// Polls free disk space and the wall clock. Low space is reported on every
/// tick; the reflection event fires once per day.
pub struct SystemSensor {
    interval: Duration,
    mount: PathBuf,
    threshold_bytes: u64,
    reflection_hour: u32,
}

impl SystemSensor {
    pub fn from_config(config: &PerceptionConfig) -> Self {
        Self {
            interval: config.system_interval(),
            mount: PathBuf::from(&config.disk_mount),
            threshold_bytes: config.disk_free_threshold_gb.saturating_mul(GB),
            reflection_hour: config.reflection_hour,
        }
    }

    /// Events for one tick. `last_reflection` remembers the day the
    /// reflection last fired.
    pub fn observe(
        &self,
        free_bytes: Option<u64>,
        now: NaiveDateTime,
        last_reflection: &mut Option<NaiveDate>,
    ) -> Vec<PerceptionEvent> {
        let mut events = Vec::new();

        if let Some(free) = free_bytes
            && free < self.threshold_bytes
        {
            let content = format!(
                "disk space low on {}: {:.1} GB free",
                self.mount.display(),
                free as f64 / GB as f64
            );
            events.push(PerceptionEvent::new(SYSTEM_SOURCE, content, DISK_LOW_IMPORTANCE));
        }

        let today = now.date();
        if now.hour() == self.reflection_hour && *last_reflection != Some(today) {
            *last_reflection = Some(today);
            events.push(PerceptionEvent::new(
                CHRONOS_SOURCE,
                "it is the quiet hour; time to reflect on the day's work",
                REFLECTION_IMPORTANCE,
            ));
        }

        events
    }
}

/// Available bytes on the disk holding `mount`, picking the most specific
/// mount point.
fn free_space(mount: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| mount.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

#[async_trait]
impl Sensor for SystemSensor {
    fn name(&self) -> &str {
        "system"
    }

    async fn run(
        &self,
        bus: EventBus,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SensorError> {
        info!(
            mount = %self.mount.display(),
            interval_secs = self.interval.as_secs(),
            "system sensor watching"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_reflection = None;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let mount = self.mount.clone();
                    let free = tokio::task::spawn_blocking(move || free_space(&mount)).await?;
                    if free.is_none() {
                        debug!(mount = %self.mount.display(), "no disk found for mount");
                    }
                    let now = Local::now().naive_local();
                    for event in self.observe(free, now, &mut last_reflection) {
                        bus.emit(&event.source, event.content, event.importance).await;
                    }
                }
            }
        }

        info!("system sensor stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use janus_memory::{FactStore, FactStoreLimits};

    fn sensor() -> SystemSensor {
        SystemSensor::from_config(&PerceptionConfig::default())
    }

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .expect("valid time")
    }

    #[test]
    fn plenty_of_space_is_silent() {
        let events = sensor().observe(Some(50 * GB), at(1, 14, 0), &mut None);
        assert!(events.is_empty());
        assert!(sensor().observe(None, at(1, 14, 0), &mut None).is_empty());
    }

    #[test]
    fn reflection_fires_once_per_day() {
        let sensor = sensor();
        let mut last = None;

        let first = sensor.observe(Some(50 * GB), at(1, 2, 0), &mut last);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].source, CHRONOS_SOURCE);
        assert_eq!(first[0].importance, REFLECTION_IMPORTANCE);

        assert!(sensor.observe(Some(50 * GB), at(1, 2, 10), &mut last).is_empty());
        assert!(sensor.observe(Some(50 * GB), at(1, 3, 0), &mut last).is_empty());
        assert_eq!(sensor.observe(Some(50 * GB), at(2, 2, 0), &mut last).len(), 1);
    }

    #[tokio::test]
    async fn low_disk_reading_fires_disk_reflex() {
        let dir = std::env::temp_dir().join(format!("janus_system_{}", uuid::Uuid::new_v4()));
        let facts = FactStore::open(&dir.join("knowledge.db"), FactStoreLimits::default())
            .await
            .expect("fact store");
        let (bus, mut rx) = EventBus::new(PerceptionConfig::default(), Arc::new(facts));

        let events = sensor().observe(Some(3 * GB), at(1, 14, 0), &mut None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content_text(), "disk space low on /: 3.0 GB free");
        for event in events {
            bus.emit(&event.source, event.content, event.importance).await;
        }

        let dispatch = rx.try_recv().expect("reflex fires");
        assert_eq!(dispatch.rule_id, "sys_disk_panic");
        assert_eq!(dispatch.task.target_skill_id(), Some("memory_cleaner"));
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let dir = std::env::temp_dir().join(format!("janus_system_{}", uuid::Uuid::new_v4()));
        let facts = FactStore::open(&dir.join("knowledge.db"), FactStoreLimits::default())
            .await
            .expect("fact store");
        let (bus, _rx) = EventBus::new(PerceptionConfig::default(), Arc::new(facts));

        let (tx, rx) = watch::channel(false);
        let system = sensor();
        let handle = tokio::spawn(async move { system.run(bus, rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).expect("sensor listening");

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("stopped in time")
            .expect("joined");
        assert!(result.is_ok());
    }
}
