//! Output sinks for the encoded fact table.
//!
//! Every sink overwrites the whole dataset at its location: the new file
//! is put in place first, then Parquet files left from earlier runs are
//! removed.

mod encode;
mod local;
mod s3;

pub use local::LocalSink;
pub use encode::encode_parquet;
pub use s3::S3Sink;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::location::Location;

/// File name used when the target is a directory or key prefix.
pub const PART_FILE_NAME: &str = "part-00000.parquet";

#[async_trait]
pub trait FactSink: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Replaces whatever the location holds with `parquet`.
    async fn write(&self, parquet: Bytes) -> Result<()>;
}

/// Builds the sink for a location string.
pub async fn open_sink(uri: &str) -> Result<Box<dyn FactSink>> {
    match Location::parse(uri)? {
        Location::Local(path) => Ok(Box::new(LocalSink::new(path))),
        Location::S3 { bucket, key } => {
            let config = aws_config::load_from_env().await;
            let client = aws_sdk_s3::Client::new(&config);
            Ok(Box::new(S3Sink::new(client, bucket, key)))
        }
    }
}

/// Returns true if the target names a single Parquet file rather than a
/// directory or prefix.
pub fn is_file_target(target: &str) -> bool {
    target.to_ascii_lowercase().ends_with(".parquet")
}
