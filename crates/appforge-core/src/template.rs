//! Scaffold template providers.
//!
//! A template seeds the initial workspace snapshot for a fresh session.
//! The provider is an opaque byte-blob source; what the template
//! contains is outside the orchestration core.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::snapshot::WorkspaceSnapshot;

#[async_trait]
pub trait TemplateProvider: Send + Sync {
    /// Return the initial snapshot for `template_id`. `None` or an
    /// unknown id resolves to the provider's default template.
    async fn load(&self, template_id: Option<&str>) -> Result<WorkspaceSnapshot, AgentError>;
}

/// Loads templates from subdirectories of a root directory, one
/// directory per template id.
pub struct DirTemplateProvider {
    root: PathBuf,
    default_id: String,
}

impl DirTemplateProvider {
    pub fn new(root: impl Into<PathBuf>, default_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            default_id: default_id.into(),
        }
    }

    async fn read_dir_recursive(
        base: &Path,
        dir: &Path,
        snapshot: &mut WorkspaceSnapshot,
    ) -> Result<(), AgentError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            // Hidden files and dependency directories are not part of
            // the seeded workspace.
            if name.starts_with('.') && name != ".gitignore" {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                if name == "node_modules" || name == "dist" {
                    continue;
                }
                Box::pin(Self::read_dir_recursive(base, &path, snapshot)).await?;
            } else {
                let relative = path
                    .strip_prefix(base)
                    .map_err(|e| AgentError::Template(e.to_string()))?
                    .to_string_lossy()
                    .replace('\\', "/");
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => snapshot.insert(relative, content),
                    // Binary template assets are skipped; generated apps
                    // only diff over text files.
                    Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                        log::debug!("Skipping non-UTF-8 template file {}", path.display());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateProvider for DirTemplateProvider {
    async fn load(&self, template_id: Option<&str>) -> Result<WorkspaceSnapshot, AgentError> {
        let id = template_id.unwrap_or(&self.default_id);
        let mut dir = self.root.join(id);
        if !dir.is_dir() {
            log::warn!(
                "Unknown template id '{}', falling back to '{}'",
                id,
                self.default_id
            );
            dir = self.root.join(&self.default_id);
        }
        if !dir.is_dir() {
            return Err(AgentError::Template(format!(
                "template directory not found: {}",
                dir.display()
            )));
        }

        let mut snapshot = WorkspaceSnapshot::new();
        Self::read_dir_recursive(&dir, &dir, &mut snapshot).await?;
        log::info!("Loaded template '{}' with {} files", id, snapshot.len());
        Ok(snapshot)
    }
}

/// In-memory provider for tests and embedded defaults.
#[derive(Default)]
pub struct StaticTemplateProvider {
    templates: HashMap<String, WorkspaceSnapshot>,
    default_id: Option<String>,
}

impl StaticTemplateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, id: impl Into<String>, snapshot: WorkspaceSnapshot) -> Self {
        let id = id.into();
        if self.default_id.is_none() {
            self.default_id = Some(id.clone());
        }
        self.templates.insert(id, snapshot);
        self
    }
}

#[async_trait]
impl TemplateProvider for StaticTemplateProvider {
    async fn load(&self, template_id: Option<&str>) -> Result<WorkspaceSnapshot, AgentError> {
        let id = template_id
            .filter(|id| self.templates.contains_key(*id))
            .map(str::to_string)
            .or_else(|| self.default_id.clone())
            .ok_or_else(|| AgentError::Template("no templates registered".to_string()))?;
        self.templates
            .get(&id)
            .cloned()
            .ok_or_else(|| AgentError::Template(format!("unknown template: {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dir_provider_reads_nested_files_and_skips_hidden() {
        let root = tempfile::tempdir().unwrap();
        let template = root.path().join("trpc");
        std::fs::create_dir_all(template.join("src")).unwrap();
        std::fs::write(template.join("package.json"), "{}\n").unwrap();
        std::fs::write(template.join("src/index.ts"), "export {}\n").unwrap();
        std::fs::write(template.join(".gitignore"), "node_modules\n").unwrap();
        std::fs::write(template.join(".env"), "SECRET=1\n").unwrap();

        let provider = DirTemplateProvider::new(root.path(), "trpc");
        let snapshot = provider.load(Some("trpc")).await.unwrap();

        assert_eq!(snapshot.get("package.json"), Some("{}\n"));
        assert_eq!(snapshot.get("src/index.ts"), Some("export {}\n"));
        assert_eq!(snapshot.get(".gitignore"), Some("node_modules\n"));
        assert!(snapshot.get(".env").is_none());
    }

    #[tokio::test]
    async fn unknown_id_falls_back_to_default() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("base")).unwrap();
        std::fs::write(root.path().join("base/readme.txt"), "hi\n").unwrap();

        let provider = DirTemplateProvider::new(root.path(), "base");
        let snapshot = provider.load(Some("nonexistent")).await.unwrap();
        assert_eq!(snapshot.get("readme.txt"), Some("hi\n"));
    }

    #[tokio::test]
    async fn static_provider_serves_registered_templates() {
        let mut base = WorkspaceSnapshot::new();
        base.insert("main.ts", "console.log(1)\n");
        let provider = StaticTemplateProvider::new().with_template("trpc", base);

        let snapshot = provider.load(Some("trpc")).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        // Unknown ids fall back to the first registered template.
        let fallback = provider.load(Some("other")).await.unwrap();
        assert_eq!(fallback.len(), 1);
    }
}
