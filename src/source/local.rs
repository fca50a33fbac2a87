use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;

use super::TripSource;
use crate::location::{has_wildcard, is_trip_file};

/// Reads trip files from the local file system.
///
/// The pattern may name a single file, a directory (every `*.csv` and
/// `*.csv.gz` directly inside it) or a glob such as
/// `data/green_tripdata_2015-*.csv`.
pub struct LocalSource {
    pattern: String,
}

impl LocalSource {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    fn resolve(&self) -> Result<Vec<PathBuf>> {
        let path = Path::new(&self.pattern);

        let mut paths: Vec<PathBuf> = if has_wildcard(&self.pattern) {
            glob::glob(&self.pattern)
                .with_context(|| format!("invalid pattern '{}'", self.pattern))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|p| p.is_file())
                .collect()
        } else if path.is_dir() {
            let mut paths = Vec::new();
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let p = entry.path();
                let name = entry.file_name();
                if p.is_file() && is_trip_file(&name.to_string_lossy()) {
                    paths.push(p);
                }
            }
            paths
        } else {
            vec![path.to_path_buf()]
        };

        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl TripSource for LocalSource {
    fn describe(&self) -> String {
        self.pattern.clone()
    }

    async fn list(&self) -> Result<Vec<String>> {
        let paths = self.resolve()?;
        Ok(paths.iter().map(|p| p.display().to_string()).collect())
    }

    async fn fetch(&self, name: &str) -> Result<Bytes> {
        let body = tokio::fs::read(name)
            .await
            .with_context(|| format!("cannot read '{name}'"))?;
        Ok(Bytes::from(body))
    }
}
