use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use janus_core::perception::VISUAL_SOURCE;

use crate::bus::EventBus;
use crate::sensor::{Sensor, SensorError};

const IGNORED_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "__pycache__",
    ".venv",
    "logs",
    "signals",
];

const CHANGED_IMPORTANCE: f64 = 0.4;
const CREATED_IMPORTANCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Created(String),
    Modified(String),
}

impl FileChange {
    fn describe(&self) -> (String, f64) {
        match self {
            Self::Created(path) => (format!("file created: {path}"), CREATED_IMPORTANCE),
            Self::Modified(path) => (format!("file changed: {path}"), CHANGED_IMPORTANCE),
        }
    }
}

/// Content hashes of watched files. A change only counts when the hash
/// moves, so touching a file without editing it stays silent.
#[derive(Debug)]
pub struct FileTracker {
    root: PathBuf,
    extensions: Vec<String>,
    hashes: HashMap<PathBuf, String>,
}

impl FileTracker {
    pub fn new(root: PathBuf, extensions: Vec<String>) -> Self {
        Self {
            root,
            extensions,
            hashes: HashMap::new(),
        }
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        if relative.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .is_some_and(|name| IGNORED_DIRS.contains(&name))
        }) {
            return false;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|allowed| allowed == ext))
    }

    /// Record the current hashes of every watched file without reporting.
    pub fn baseline(&mut self) -> usize {
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let ignored = path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| IGNORED_DIRS.contains(&name));
                    if !ignored {
                        stack.push(path);
                    }
                } else if self.is_watched(&path)
                    && let Ok(bytes) = std::fs::read(&path)
                {
                    self.hashes.insert(path, hash(&bytes));
                }
            }
        }
        self.hashes.len()
    }

    /// Compare fresh file contents against the last known hash.
    pub fn observe(&mut self, path: &Path, bytes: &[u8]) -> Option<FileChange> {
        let digest = hash(bytes);
        let relative = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string();
        match self.hashes.insert(path.to_path_buf(), digest.clone()) {
            None => Some(FileChange::Created(relative)),
            Some(previous) if previous != digest => Some(FileChange::Modified(relative)),
            Some(_) => None,
        }
    }

    pub fn forget(&mut self, path: &Path) {
        self.hashes.remove(path);
    }
}

fn hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Watches a directory tree and reports edited source files as visual
/// events.
pub struct FileSensor {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FileSensor {
    pub fn new(root: PathBuf, extensions: Vec<String>) -> Self {
        Self { root, extensions }
    }
}

#[async_trait]
impl Sensor for FileSensor {
    fn name(&self) -> &str {
        "file"
    }

    async fn run(
        &self,
        bus: EventBus,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SensorError> {
        let mut tracker = FileTracker::new(self.root.clone(), self.extensions.clone());
        let (mut tracker, known) = tokio::task::spawn_blocking(move || {
            let known = tracker.baseline();
            (tracker, known)
        })
        .await?;
        info!(root = %self.root.display(), files = known, "file sensor baseline recorded");

        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => warn!(error = %e, "file watcher error"),
        })
        .map_err(|e| SensorError::Watch(e.to_string()))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| SensorError::Watch(e.to_string()))?;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(path) = rx.recv() => {
                    if !tracker.is_watched(&path) {
                        continue;
                    }
                    match tokio::fs::read(&path).await {
                        Ok(bytes) => {
                            if let Some(change) = tracker.observe(&path, &bytes) {
                                let (content, importance) = change.describe();
                                debug!(content = %content, "file change observed");
                                bus.emit(VISUAL_SOURCE, content, importance).await;
                            }
                        }
                        Err(_) => tracker.forget(&path),
                    }
                }
            }
        }

        info!(root = %self.root.display(), "file sensor stopped");
        Ok(())
    }
}
