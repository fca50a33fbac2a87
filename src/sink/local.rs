use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{FactSink, PART_FILE_NAME, is_file_target};

/// Writes the fact table to the local file system.
///
/// A target ending in `.parquet` is written as that file; any other target
/// is a directory that ends up holding only [`PART_FILE_NAME`].
pub struct LocalSink {
    target: String,
}

impl LocalSink {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Final path of the written file.
    pub fn file_path(&self) -> PathBuf {
        if is_file_target(&self.target) {
            PathBuf::from(&self.target)
        } else {
            Path::new(&self.target).join(PART_FILE_NAME)
        }
    }
}

async fn remove_stale_parts(dir: &Path, keep: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_parquet = path.extension().and_then(|e| e.to_str()) == Some("parquet");
        if is_parquet && path != keep {
            debug!(path = %path.display(), "Removing stale output file");
            tokio::fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl FactSink for LocalSink {
    fn describe(&self) -> String {
        self.target.clone()
    }

    async fn write(&self, parquet: Bytes) -> Result<()> {
        let path = self.file_path();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("cannot create '{}'", dir.display()))?;

        // rename within one directory is atomic, so readers never see a
        // half-written file
        let tmp = dir.join(format!(".{PART_FILE_NAME}.tmp"));
        tokio::fs::write(&tmp, &parquet)
            .await
            .with_context(|| format!("cannot write '{}'", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("cannot move output into '{}'", path.display()))?;

        if !is_file_target(&self.target) {
            remove_stale_parts(dir, &path).await?;
        }
        Ok(())
    }
}
