// One-line text file cursor store.
//
// The file holds the decimal id of the last processed mention. Writes go to
// a temporary sibling and are renamed into place so a crash mid-write never
// leaves a truncated cursor behind. The last poll time lives in a second
// sibling file (`<name>.poll`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use super::CursorStore;
use crate::platform::PostId;

pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn poll_path(&self) -> PathBuf {
        self.sibling(".poll")
    }

    async fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create directory for cursor: {}", parent.display())
                })?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<Option<PostId>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cursor file {}", self.path.display()))
            }
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        match trimmed.parse() {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                // A garbled cursor is treated as unset rather than wedging startup.
                warn!(
                    path = %self.path.display(),
                    value = trimmed,
                    "Ignoring unparseable cursor"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, cursor: PostId) -> Result<()> {
        self.ensure_parent().await?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, format!("{cursor}\n"))
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to move cursor into {}", self.path.display()))?;
        Ok(())
    }

    async fn record_poll(&self, at: &str) -> Result<()> {
        self.ensure_parent().await?;
        let path = self.poll_path();
        tokio::fs::write(&path, format!("{at}\n"))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn last_poll(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.poll_path()).await {
            Ok(s) if !s.trim().is_empty() => Ok(Some(s.trim().to_string())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read last poll time"),
        }
    }
}
