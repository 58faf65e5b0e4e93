use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use janus_core::error::SkillError;
use janus_core::skill::{SkillDescriptor, SkillHandler, SkillLoader, SkillSource};

use crate::manifest::{MANIFEST_EXTENSION, read_skill_files};

struct SkillEntry {
    descriptor: SkillDescriptor,
    handler: Arc<dyn SkillHandler>,
    source: SkillSource,
}

/// Concurrent map of skill id to descriptor and handler. Readers never see a
/// descriptor without its handler.
pub struct SkillRegistry {
    entries: RwLock<HashMap<String, SkillEntry>>,
    /// Ids that can never be removed or replaced at runtime.
    protected: HashSet<String>,
    /// Directory scanned for dynamic skills, with the loader that turns them
    /// into handlers.
    dynamic: Option<(PathBuf, Arc<dyn SkillLoader>)>,
}

impl SkillRegistry {
    pub fn new(protected: impl IntoIterator<Item = String>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            protected: protected.into_iter().collect(),
            dynamic: None,
        }
    }

    pub fn with_dynamic_dir(mut self, dir: PathBuf, loader: Arc<dyn SkillLoader>) -> Self {
        self.dynamic = Some((dir, loader));
        self
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SkillEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SkillEntry>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a static skill. Duplicate ids are a configuration error.
    pub fn register(
        &self,
        descriptor: SkillDescriptor,
        handler: Arc<dyn SkillHandler>,
    ) -> Result<(), SkillError> {
        let mut entries = self.write();
        if entries.contains_key(&descriptor.id) {
            return Err(SkillError::AlreadyRegistered(descriptor.id));
        }
        info!(skill_id = %descriptor.id, "skill_registered");
        entries.insert(
            descriptor.id.clone(),
            SkillEntry {
                descriptor,
                handler,
                source: SkillSource::Static,
            },
        );
        Ok(())
    }

    /// Register a dynamically discovered skill. Existing ids are left alone;
    /// returns whether the skill was added.
    pub fn register_dynamic(
        &self,
        descriptor: SkillDescriptor,
        handler: Arc<dyn SkillHandler>,
    ) -> bool {
        let mut entries = self.write();
        if entries.contains_key(&descriptor.id) {
            debug!(skill_id = %descriptor.id, "dynamic skill already registered");
            return false;
        }
        info!(skill_id = %descriptor.id, "dynamic_skill_registered");
        entries.insert(
            descriptor.id.clone(),
            SkillEntry {
                descriptor,
                handler,
                source: SkillSource::Dynamic,
            },
        );
        true
    }

    /// Install or replace a skill delivered at runtime. Descriptor and handler
    /// land together under one write lock.
    pub fn install(
        &self,
        descriptor: SkillDescriptor,
        handler: Arc<dyn SkillHandler>,
    ) -> Result<(), SkillError> {
        if self.is_protected(&descriptor.id) {
            return Err(SkillError::Protected(descriptor.id));
        }
        let mut entries = self.write();
        let replaced = entries
            .insert(
                descriptor.id.clone(),
                SkillEntry {
                    descriptor: descriptor.clone(),
                    handler,
                    source: SkillSource::Injected,
                },
            )
            .is_some();
        info!(skill_id = %descriptor.id, replaced, "skill_installed");
        Ok(())
    }

    /// Remove a skill. Returns `false` if nothing was registered under `id`.
    pub fn unregister(&self, id: &str) -> Result<bool, SkillError> {
        if self.is_protected(id) {
            warn!(skill_id = %id, "refusing to unregister protected skill");
            return Err(SkillError::Protected(id.to_string()));
        }
        let removed = self.write().remove(id).is_some();
        if removed {
            info!(skill_id = %id, "skill_unregistered");
        }
        Ok(removed)
    }

    pub fn is_protected(&self, id: &str) -> bool {
        self.protected.contains(id)
    }

    pub fn handler(&self, id: &str) -> Option<Arc<dyn SkillHandler>> {
        self.read().get(id).map(|entry| Arc::clone(&entry.handler))
    }

    pub fn descriptor(&self, id: &str) -> Option<SkillDescriptor> {
        self.read().get(id).map(|entry| entry.descriptor.clone())
    }

    pub fn source(&self, id: &str) -> Option<SkillSource> {
        self.read().get(id).map(|entry| entry.source)
    }

    /// All descriptors, sorted by id.
    pub fn descriptors(&self) -> Vec<SkillDescriptor> {
        let mut descriptors: Vec<SkillDescriptor> = self
            .read()
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Scan the dynamic directory and register skills not yet known.
    /// Malformed entries are logged and skipped.
    pub async fn sync_dynamic(&self) -> Result<usize, SkillError> {
        let Some((dir, loader)) = &self.dynamic else {
            return Ok(0);
        };
        if !dir.exists() {
            debug!(dir = %dir.display(), "dynamic skill directory does not exist, skipping");
            return Ok(0);
        }

        let mut manifests = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(MANIFEST_EXTENSION) {
                manifests.push(path);
            }
        }
        manifests.sort();

        let mut added = 0;
        for path in manifests {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if self.contains(stem) {
                continue;
            }
            let files = match read_skill_files(&path).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load dynamic skill");
                    continue;
                }
            };
            if self.contains(&files.descriptor.id) {
                continue;
            }
            match loader.load(&files.descriptor, &files.code).await {
                Ok(handler) => {
                    if self.register_dynamic(files.descriptor, handler) {
                        added += 1;
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load dynamic skill");
                }
            }
        }

        if added > 0 {
            info!(added, total = self.len(), "dynamic skill sync complete");
        }
        Ok(added)
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}
