use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use janus_core::config::MemoryConfig;
use janus_core::error::MemoryError;
use janus_core::memory::{Fact, FactLayer};

/// Retention and capacity rules for each layer.
#[derive(Debug, Clone)]
pub struct FactStoreLimits {
    pub dedup_window: Duration,
    pub episodic_retention: Duration,
    pub conceptual_capacity: usize,
    pub semantic_capacity: usize,
    pub preference_capacity: usize,
}

impl Default for FactStoreLimits {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

impl From<&MemoryConfig> for FactStoreLimits {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            dedup_window: config.dedup_window(),
            episodic_retention: config.episodic_retention(),
            conceptual_capacity: config.conceptual_capacity,
            semantic_capacity: config.semantic_capacity,
            preference_capacity: config.preference_capacity,
        }
    }
}

impl FactStoreLimits {
    fn capacity(&self, layer: FactLayer) -> Option<usize> {
        match layer {
            FactLayer::Episodic => None,
            FactLayer::Conceptual => Some(self.conceptual_capacity),
            FactLayer::Semantic => Some(self.semantic_capacity),
            FactLayer::Preference => Some(self.preference_capacity),
        }
    }
}

/// SQLite-backed layered fact store. Each layer lives in its own table and
/// carries its own eviction policy.
pub struct FactStore {
    pool: SqlitePool,
    limits: FactStoreLimits,
    /// Serializes dedup check, insert and eviction so they act as one step.
    write_lock: Mutex<()>,
}

impl FactStore {
    pub async fn new(pool: SqlitePool, limits: FactStoreLimits) -> Result<Self, MemoryError> {
        let store = Self {
            pool,
            limits,
            write_lock: Mutex::new(()),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Open (creating if needed) a store backed by the database file at `path`.
    pub async fn open(path: &Path, limits: FactStoreLimits) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MemoryError::Storage(format!("{}: {e}", parent.display())))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(storage_err)?;
        info!(path = %path.display(), "fact store opened");
        Self::new(pool, limits).await
    }

    async fn migrate(&self) -> Result<(), MemoryError> {
        for layer in FactLayer::ALL {
            let table = table_name(layer);
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    category TEXT NOT NULL,
                    content TEXT NOT NULL,
                    source_task TEXT NOT NULL,
                    created_at_us INTEGER NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_key ON {table}(category, content)"
            ))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Insert a fact now. Returns `false` when the insert was dropped as a
    /// duplicate.
    pub async fn add(
        &self,
        layer: FactLayer,
        category: &str,
        content: &str,
        source_task: &str,
    ) -> Result<bool, MemoryError> {
        self.add_at(layer, category, content, source_task, Utc::now())
            .await
    }

    /// Insert a fact as if the current time were `now`. Dedup and eviction
    /// are both measured against `now`.
    #[instrument(skip(self, content), fields(layer = %layer, category = %category))]
    pub async fn add_at(
        &self,
        layer: FactLayer,
        category: &str,
        content: &str,
        source_task: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let _guard = self.write_lock.lock().await;
        let table = table_name(layer);
        let now_us = now.timestamp_micros();
        let window_start = now_us - duration_us(self.limits.dedup_window);

        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let recent: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE category = ? AND content = ? AND created_at_us > ?"
        ))
        .bind(category)
        .bind(content)
        .bind(window_start)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_err)?;

        if recent > 0 {
            debug!("duplicate fact dropped");
            return Ok(false);
        }

        sqlx::query(&format!(
            "INSERT INTO {table} (category, content, source_task, created_at_us) VALUES (?, ?, ?, ?)"
        ))
        .bind(category)
        .bind(content)
        .bind(source_task)
        .bind(now_us)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        let expired_before = now_us - duration_us(self.limits.episodic_retention);
        let expired = sqlx::query(&format!(
            "DELETE FROM {} WHERE created_at_us < ?",
            table_name(FactLayer::Episodic)
        ))
        .bind(expired_before)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?
        .rows_affected();

        let mut evicted = 0;
        if let Some(capacity) = self.limits.capacity(layer) {
            evicted = sqlx::query(&format!(
                "DELETE FROM {table} WHERE id NOT IN \
                 (SELECT id FROM {table} ORDER BY created_at_us DESC, id DESC LIMIT ?)"
            ))
            .bind(capacity as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
        }

        tx.commit().await.map_err(storage_err)?;

        if expired > 0 || evicted > 0 {
            info!(expired, evicted, "facts evicted");
        }
        Ok(true)
    }

    /// Facts whose category and content contain every token of `keyword`,
    /// searching preference, semantic, conceptual, then episodic. Within a
    /// layer facts come oldest first.
    #[instrument(skip(self))]
    pub async fn query(
        &self,
        keyword: &str,
        layer: Option<FactLayer>,
    ) -> Result<Vec<Fact>, MemoryError> {
        let layers: Vec<FactLayer> = match layer {
            Some(layer) => vec![layer],
            None => FactLayer::SEARCH_ORDER.to_vec(),
        };

        let mut results = Vec::new();
        for layer in layers {
            results.extend(
                self.facts(layer)
                    .await?
                    .into_iter()
                    .filter(|fact| fact.matches(keyword)),
            );
        }
        Ok(results)
    }

    /// Every fact in one layer, oldest first.
    pub async fn facts(&self, layer: FactLayer) -> Result<Vec<Fact>, MemoryError> {
        let rows = sqlx::query_as::<_, FactRow>(&format!(
            "SELECT category, content, source_task, created_at_us FROM {} ORDER BY created_at_us ASC, id ASC",
            table_name(layer)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter().map(|row| row.into_fact(layer)).collect()
    }

    pub async fn count(&self, layer: FactLayer) -> Result<usize, MemoryError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table_name(layer)))
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(count as usize)
    }

    pub async fn layer_counts(&self) -> Result<Vec<(FactLayer, usize)>, MemoryError> {
        let mut counts = Vec::with_capacity(FactLayer::ALL.len());
        for layer in FactLayer::ALL {
            counts.push((layer, self.count(layer).await?));
        }
        Ok(counts)
    }

    /// Insert a fact whose layer arrives as free text, e.g. from an oracle
    /// response.
    pub async fn add_named(
        &self,
        layer: &str,
        category: &str,
        content: &str,
        source_task: &str,
    ) -> Result<bool, MemoryError> {
        let layer = FactLayer::from_str(layer)?;
        self.add(layer, category, content, source_task).await
    }
}

fn table_name(layer: FactLayer) -> String {
    format!("facts_{}", layer.as_str())
}

fn duration_us(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

fn storage_err(e: sqlx::Error) -> MemoryError {
    MemoryError::Storage(e.to_string())
}

/// Internal row representation for SQLite queries.
#[derive(Debug, sqlx::FromRow)]
struct FactRow {
    category: String,
    content: String,
    source_task: String,
    created_at_us: i64,
}

impl FactRow {
    fn into_fact(self, layer: FactLayer) -> Result<Fact, MemoryError> {
        let created_at = DateTime::<Utc>::from_timestamp_micros(self.created_at_us).ok_or_else(|| {
            MemoryError::CorruptFact {
                layer,
                reason: format!("invalid timestamp {}", self.created_at_us),
            }
        })?;
        Ok(Fact {
            category: self.category,
            content: self.content,
            source_task: self.source_task,
            created_at,
            layer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("{}_{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    async fn test_store(limits: FactStoreLimits) -> FactStore {
        let dir = temp_dir("janus_facts");
        FactStore::open(&dir.join("knowledge.db"), limits)
            .await
            .expect("open store")
    }

    #[tokio::test]
    async fn duplicate_within_window_is_dropped() {
        let store = test_store(FactStoreLimits::default()).await;
        let t0 = Utc::now();

        assert!(
            store
                .add_at(FactLayer::Semantic, "Tooling", "uses cargo", "t1", t0)
                .await
                .unwrap()
        );
        assert!(
            !store
                .add_at(
                    FactLayer::Semantic,
                    "Tooling",
                    "uses cargo",
                    "t2",
                    t0 + ChronoDuration::seconds(299)
                )
                .await
                .unwrap()
        );
        assert_eq!(store.count(FactLayer::Semantic).await.unwrap(), 1);

        assert!(
            store
                .add_at(
                    FactLayer::Semantic,
                    "Tooling",
                    "uses cargo",
                    "t3",
                    t0 + ChronoDuration::seconds(301)
                )
                .await
                .unwrap()
        );
        assert_eq!(store.count(FactLayer::Semantic).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dedup_is_per_layer() {
        let store = test_store(FactStoreLimits::default()).await;
        assert!(store.add(FactLayer::Semantic, "A", "b", "t").await.unwrap());
        assert!(store.add(FactLayer::Preference, "A", "b", "t").await.unwrap());
    }

    #[tokio::test]
    async fn episodic_facts_expire_after_retention() {
        let store = test_store(FactStoreLimits::default()).await;
        let t0 = Utc::now() - ChronoDuration::hours(30);

        store
            .add_at(FactLayer::Episodic, "Perception", "old event", "bus", t0)
            .await
            .unwrap();
        store
            .add_at(
                FactLayer::Episodic,
                "Perception",
                "recent event",
                "bus",
                t0 + ChronoDuration::hours(23),
            )
            .await
            .unwrap();
        assert_eq!(store.count(FactLayer::Episodic).await.unwrap(), 2);

        store
            .add_at(
                FactLayer::Semantic,
                "Note",
                "anything",
                "t",
                t0 + ChronoDuration::hours(25),
            )
            .await
            .unwrap();

        let remaining = store.facts(FactLayer::Episodic).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "recent event");
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_first() {
        let limits = FactStoreLimits {
            semantic_capacity: 3,
            ..FactStoreLimits::default()
        };
        let store = test_store(limits).await;
        let t0 = Utc::now();

        for i in 0..5 {
            store
                .add_at(
                    FactLayer::Semantic,
                    "Note",
                    &format!("note {i}"),
                    "t",
                    t0 + ChronoDuration::seconds(i),
                )
                .await
                .unwrap();
        }

        let facts = store.facts(FactLayer::Semantic).await.unwrap();
        let contents: Vec<&str> = facts.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents, vec!["note 2", "note 3", "note 4"]);
        // Other layers are untouched by semantic capacity.
        assert_eq!(store.count(FactLayer::Conceptual).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn query_searches_layers_in_priority_order() {
        let store = test_store(FactStoreLimits::default()).await;
        store
            .add(FactLayer::Episodic, "Perception", "rust build finished", "bus")
            .await
            .unwrap();
        store
            .add(FactLayer::Preference, "Style", "prefers rust over go", "t")
            .await
            .unwrap();
        store
            .add(FactLayer::Semantic, "Tooling", "rust uses cargo", "t")
            .await
            .unwrap();
        store
            .add(FactLayer::Conceptual, "Idea", "python scripts", "t")
            .await
            .unwrap();

        let results = store.query("RUST", None).await.unwrap();
        let layers: Vec<FactLayer> = results.iter().map(|f| f.layer).collect();
        assert_eq!(
            layers,
            vec![FactLayer::Preference, FactLayer::Semantic, FactLayer::Episodic]
        );

        let scoped = store.query("rust", Some(FactLayer::Semantic)).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].content, "rust uses cargo");

        assert!(store.query("rust cargo python", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn facts_survive_reopen() {
        let dir = temp_dir("janus_facts");
        let path = dir.join("knowledge.db");
        {
            let store = FactStore::open(&path, FactStoreLimits::default())
                .await
                .unwrap();
            store
                .add(FactLayer::Semantic, "Tooling", "uses cargo", "t")
                .await
                .unwrap();
        }
        let reopened = FactStore::open(&path, FactStoreLimits::default())
            .await
            .unwrap();
        assert_eq!(reopened.count(FactLayer::Semantic).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicates_leave_one_row() {
        let store = std::sync::Arc::new(test_store(FactStoreLimits::default()).await);
        let writers: Vec<_> = (0..16)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .add(FactLayer::Semantic, "Tooling", "uses cargo", &format!("t{i}"))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut inserted = 0;
        for writer in writers {
            if writer.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.count(FactLayer::Semantic).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn named_layer_must_exist() {
        let store = test_store(FactStoreLimits::default()).await;
        let err = store
            .add_named("procedural", "x", "y", "t")
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::UnknownLayer(_)));
        assert!(store.add_named("Semantic", "x", "y", "t").await.unwrap());
    }
}
