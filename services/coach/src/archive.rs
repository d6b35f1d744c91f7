use anyhow::{Context, Result};
use async_trait::async_trait;
use jobmate_core::archive::{Archiver, SessionArchive, sanitize_title};
#[cfg(test)]
use mockall::automock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Suggests a short title for a conversation from its first user message.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn title(&self, first_message: &str) -> Result<String>;
}

/// Writes each finished session as a pretty-printed JSON file.
pub struct FileArchiver {
    dir: PathBuf,
    titles: Option<Arc<dyn TitleGenerator>>,
}

impl FileArchiver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            titles: None,
        }
    }

    /// Asks `titles` for a better title before writing. The locally derived
    /// title is kept when the model fails or returns nothing usable.
    pub fn with_titles(mut self, titles: Arc<dyn TitleGenerator>) -> Self {
        self.titles = Some(titles);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn refine_title(&self, archive: &SessionArchive) -> String {
        let (Some(titles), Some(first)) = (&self.titles, archive.transcript.first_user_line()) else {
            return archive.title.clone();
        };
        match titles.title(first).await {
            Ok(raw) => {
                let title = sanitize_title(&raw);
                if title.is_empty() { archive.title.clone() } else { title }
            }
            Err(e) => {
                tracing::warn!("Title generation failed, keeping '{}': {e:?}", archive.title);
                archive.title.clone()
            }
        }
    }
}

pub fn file_name(archive: &SessionArchive) -> String {
    format!("{}-{}.json", archive.ended_at.format("%Y%m%d-%H%M%S%3f"), archive.persona)
}

#[async_trait]
impl Archiver for FileArchiver {
    async fn archive(&self, mut archive: SessionArchive) -> Result<()> {
        archive.title = self.refine_title(&archive).await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create archive directory: {}", self.dir.display()))?;

        let path = self.dir.join(file_name(&archive));
        let json = serde_json::to_vec_pretty(&archive).context("Failed to serialize session")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write archive file: {}", path.display()))?;

        tracing::info!(
            "Archived '{}' ({} utterances) to {}",
            archive.title,
            archive.transcript.len(),
            path.display()
        );
        Ok(())
    }
}
