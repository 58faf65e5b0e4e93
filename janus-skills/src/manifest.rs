use std::path::{Path, PathBuf};

use janus_core::error::SkillError;
use janus_core::skill::SkillDescriptor;

pub const MANIFEST_EXTENSION: &str = "json";
pub const SCRIPT_EXTENSION: &str = "py";

/// A dynamic skill found on disk: `<id>.json` next to `<id>.py`.
#[derive(Debug, Clone)]
pub struct SkillFiles {
    pub descriptor: SkillDescriptor,
    pub code: String,
    pub manifest_path: PathBuf,
}

/// Read a manifest and its sibling script.
pub async fn read_skill_files(manifest_path: &Path) -> Result<SkillFiles, SkillError> {
    let raw = tokio::fs::read_to_string(manifest_path).await?;
    let descriptor: SkillDescriptor =
        serde_json::from_str(&raw).map_err(|e| SkillError::InvalidManifest {
            path: manifest_path.display().to_string(),
            reason: e.to_string(),
        })?;
    if descriptor.id.trim().is_empty() {
        return Err(SkillError::InvalidManifest {
            path: manifest_path.display().to_string(),
            reason: "missing id".into(),
        });
    }

    let script_path = manifest_path.with_extension(SCRIPT_EXTENSION);
    let code = tokio::fs::read_to_string(&script_path)
        .await
        .map_err(|e| SkillError::InvalidManifest {
            path: manifest_path.display().to_string(),
            reason: format!("unreadable script {}: {e}", script_path.display()),
        })?;

    Ok(SkillFiles {
        descriptor,
        code,
        manifest_path: manifest_path.to_path_buf(),
    })
}

/// Persist an installed skill so the next scan after a restart finds it.
/// The script is written before the manifest, so a scan never sees a manifest
/// without its code.
pub async fn write_skill_files(
    dir: &Path,
    descriptor: &SkillDescriptor,
    code: &str,
) -> Result<PathBuf, SkillError> {
    tokio::fs::create_dir_all(dir).await?;
    let manifest_path = dir.join(format!("{}.{MANIFEST_EXTENSION}", descriptor.id));
    let script_path = dir.join(format!("{}.{SCRIPT_EXTENSION}", descriptor.id));

    tokio::fs::write(&script_path, code).await?;
    let manifest = serde_json::to_vec_pretty(descriptor).map_err(|e| {
        SkillError::InvalidManifest {
            path: manifest_path.display().to_string(),
            reason: e.to_string(),
        }
    })?;
    tokio::fs::write(&manifest_path, manifest).await?;
    Ok(manifest_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(prefix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("{}_{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    #[tokio::test]
    async fn written_files_read_back() {
        let dir = temp_dir("janus_manifest");
        let descriptor = SkillDescriptor::new("weather", "forecast").with_tags(["weather"]);
        let path = write_skill_files(&dir, &descriptor, "print('{}')")
            .await
            .expect("write");

        let files = read_skill_files(&path).await.expect("read");
        assert_eq!(files.descriptor, descriptor);
        assert_eq!(files.code, "print('{}')");
    }

    #[tokio::test]
    async fn manifest_without_script_is_invalid() {
        let dir = temp_dir("janus_manifest");
        let path = dir.join("orphan.json");
        std::fs::write(&path, r#"{"id": "orphan"}"#).expect("write");

        let err = read_skill_files(&path).await.expect_err("should fail");
        assert!(matches!(err, SkillError::InvalidManifest { .. }));
    }

    #[tokio::test]
    async fn garbage_manifest_is_invalid() {
        let dir = temp_dir("janus_manifest");
        let path = dir.join("garbage.json");
        std::fs::write(&path, "{not json").expect("write");

        let err = read_skill_files(&path).await.expect_err("should fail");
        assert!(matches!(err, SkillError::InvalidManifest { .. }));
    }
}
