use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use janus_core::error::InfraError;
use janus_core::task::{Role, Task};

const LOG_EXTENSION: &str = "md";

/// Append-only human readable record of finished tasks.
#[async_trait]
pub trait TranscriptWriter: Send + Sync {
    async fn record(&self, task: &Task) -> Result<(), InfraError>;

    /// Log file names, oldest first.
    async fn list_logs(&self) -> Result<Vec<String>, InfraError>;

    async fn read_log(&self, name: &str) -> Result<String, InfraError>;
}

/// One markdown file per day under `log_dir`, one section per task.
pub struct MarkdownTranscript {
    log_dir: PathBuf,
}

impl MarkdownTranscript {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    fn log_path(&self, task: &Task) -> PathBuf {
        self.log_dir
            .join(format!("{}.{LOG_EXTENSION}", task.created_at.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl TranscriptWriter for MarkdownTranscript {
    async fn record(&self, task: &Task) -> Result<(), InfraError> {
        tokio::fs::create_dir_all(&self.log_dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(task))
            .await?;
        file.write_all(render(task).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list_logs(&self) -> Result<Vec<String>, InfraError> {
        if !self.log_dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.log_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(LOG_EXTENSION)
                && let Some(name) = path.file_name().and_then(|name| name.to_str())
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_log(&self, name: &str) -> Result<String, InfraError> {
        let path = resolve_under_root(&self.log_dir, name)?;
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

fn render(task: &Task) -> String {
    let mut out = format!(
        "## {} task {}\n\n- status: {}\n",
        task.updated_at.format("%H:%M:%S"),
        task.id,
        task.state
    );
    if let Some(skill_id) = task.target_skill_id() {
        out.push_str(&format!("- skill: {skill_id}\n"));
    }
    if let Some(verdict) = &task.metadata.audit {
        out.push_str(&format!(
            "- audit: {:?} (risk {}) {}\n",
            verdict.status, verdict.risk_level, verdict.reason
        ));
    }
    if task.metadata.escalations > 0 {
        out.push_str(&format!("- escalations: {}\n", task.metadata.escalations));
    }
    for artifact in &task.artifacts {
        out.push_str(&format!("- artifact: {artifact}\n"));
    }
    out.push('\n');
    for record in &task.history {
        let role = match record.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        out.push_str(&format!("**{role}**: {}\n\n", record.content));
    }
    out
}

/// Resolve a bare file name inside `root`, refusing anything that could
/// escape it.
fn resolve_under_root(root: &Path, name: &str) -> Result<PathBuf, InfraError> {
    let input = Path::new(name);
    if name.is_empty() || input.is_absolute() {
        return Err(InfraError::PathViolation(format!(
            "log name must be a relative file name: {name}"
        )));
    }
    let mut components = input.components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return Err(InfraError::PathViolation(format!(
            "log name must not contain directories: {name}"
        )));
    }

    let root_canonical = std::fs::canonicalize(root)?;
    let target = std::fs::canonicalize(root.join(input))?;
    if !target.starts_with(&root_canonical) {
        return Err(InfraError::PathViolation(format!(
            "resolved path '{}' escapes '{}'",
            target.display(),
            root_canonical.display()
        )));
    }
    Ok(target)
}
