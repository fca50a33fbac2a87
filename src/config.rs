//! Pipeline configuration.
//!
//! Stored as a JSON object on disk; every field is optional:
//! ```json
//! {
//!   "chunk_size": 65536,
//!   "threads": 8,
//!   "on_bad_timestamp": "abort",
//!   "extra_timestamp_formats": ["%d.%m.%Y %H:%M"]
//! }
//! ```

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Records per partial reduction. Chunk boundaries are fixed so float sums
/// come out identical regardless of how many threads are used.
pub const DEFAULT_CHUNK_SIZE: usize = 65_536;

/// What the cleaner does with a timestamp it cannot parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadTimestampPolicy {
    /// Fail the whole run.
    #[default]
    Abort,
    /// Drop the record and count it in the run summary.
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    /// Worker threads for the core; 0 keeps rayon's default.
    pub threads: usize,
    pub on_bad_timestamp: BadTimestampPolicy,
    /// `chrono` format strings tried after the built-in ones.
    pub extra_timestamp_formats: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            threads: 0,
            on_bad_timestamp: BadTimestampPolicy::Abort,
            extra_timestamp_formats: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file '{path}'"))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("cannot parse config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        Ok(())
    }
}
