//! File sink - one plain-text report per approved idea

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::{render_report, sanitize_title, IdeaSink};
use crate::ideas::IdeaPayload;

pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<YYYYmmdd_HHMMSS>_<title>.txt`, with a numeric suffix if taken
    fn candidate_path(&self, stamp: &str, title: &str, attempt: u32) -> PathBuf {
        let name = if attempt == 0 {
            format!("{}_{}.txt", stamp, title)
        } else {
            format!("{}_{}_{}.txt", stamp, title, attempt)
        };
        self.dir.join(name)
    }
}

#[async_trait]
impl IdeaSink for FileSink {
    async fn publish(&self, idea: &IdeaPayload) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create ideas directory {}", self.dir.display()))?;

        let now = Local::now();
        let report = render_report(idea, now);
        let stamp = now.format("%Y%m%d_%H%M%S").to_string();
        let title = sanitize_title(&idea.title);

        // Existing reports are never overwritten
        let mut attempt = 0;
        let (path, mut file) = loop {
            let path = self.candidate_path(&stamp, &title, attempt);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < 100 => {
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create report {}", path.display()));
                }
            }
        };

        file.write_all(report.as_bytes())
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        file.flush().await?;

        info!("Idea report written to {}", path.display());
        Ok(path.display().to_string())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("ideas"));
        let mut idea = IdeaPayload::titled("Acme Analytics");
        idea.market_size = "$12B TAM".to_string();

        let location = sink.publish(&idea).await.unwrap();
        assert!(location.ends_with("_Acme_Analytics.txt"));
        let contents = std::fs::read_to_string(&location).unwrap();
        assert!(contents.contains("STARTUP IDEA: Acme Analytics"));
        assert!(contents.contains("$12B TAM"));
    }

    #[tokio::test]
    async fn test_same_title_same_second_gets_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        let idea = IdeaPayload::titled("Twin");

        let first = sink.publish(&idea).await.unwrap();
        let second = sink.publish(&idea).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
