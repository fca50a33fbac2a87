use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use super::{FactSink, PART_FILE_NAME, is_file_target};

/// Writes the fact table to an S3 bucket.
pub struct S3Sink {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
}

impl S3Sink {
    pub fn new(client: aws_sdk_s3::Client, bucket: String, key: String) -> Self {
        Self {
            client,
            bucket,
            key,
        }
    }
}

/// Object key the fact table is written to, and the prefix whose other
/// objects get removed (`None` when the target is a single file).
fn object_key(target: &str) -> (String, Option<String>) {
    if is_file_target(target) {
        return (target.to_string(), None);
    }
    let dir = target.trim_matches('/');
    if dir.is_empty() {
        (PART_FILE_NAME.to_string(), Some(String::new()))
    } else {
        (format!("{dir}/{PART_FILE_NAME}"), Some(format!("{dir}/")))
    }
}

/// Parquet objects directly under `prefix`, other than the one just written.
fn is_stale_part(candidate: &str, prefix: &str, written: &str) -> bool {
    candidate != written
        && is_file_target(candidate)
        && candidate
            .strip_prefix(prefix)
            .is_some_and(|rest| !rest.contains('/'))
}

#[async_trait]
impl FactSink for S3Sink {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    async fn write(&self, parquet: Bytes) -> Result<()> {
        let (key, prefix) = object_key(&self.key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(parquet.into())
            .content_type("application/vnd.apache.parquet")
            .send()
            .await
            .with_context(|| format!("PutObject failed for s3://{}/{key}", self.bucket))?;

        let Some(prefix) = prefix else {
            return Ok(());
        };

        let mut removed = 0;
        let mut token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix);
            if let Some(t) = &token {
                request = request.continuation_token(t);
            }
            let resp = request
                .send()
                .await
                .with_context(|| format!("ListObjectsV2 failed for s3://{}/{prefix}", self.bucket))?;

            for stale in resp.contents().iter().filter_map(|o| o.key()) {
                if !is_stale_part(stale, &prefix, &key) {
                    continue;
                }
                debug!(key = %stale, "Removing stale output object");
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(stale)
                    .send()
                    .await
                    .with_context(|| format!("DeleteObject failed for s3://{}/{stale}", self.bucket))?;
                removed += 1;
            }

            if resp.is_truncated() == Some(true) {
                token = resp.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        info!(bucket = %self.bucket, key = %key, removed, "Output overwritten");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_for_prefix() {
        assert_eq!(
            object_key("fact_table/"),
            (
                "fact_table/part-00000.parquet".to_string(),
                Some("fact_table/".to_string())
            )
        );
    }

    #[test]
    fn test_object_key_for_file() {
        assert_eq!(
            object_key("out/fact.parquet"),
            ("out/fact.parquet".to_string(), None)
        );
    }

    #[test]
    fn test_stale_parts() {
        let written = "fact_table/part-00000.parquet";
        assert!(is_stale_part("fact_table/part-00003.parquet", "fact_table/", written));
        assert!(!is_stale_part(written, "fact_table/", written));
        assert!(!is_stale_part("fact_table/_SUCCESS", "fact_table/", written));
        assert!(!is_stale_part("fact_table/old/part-00000.parquet", "fact_table/", written));
    }

    #[test]
    fn test_object_key_for_bucket_root() {
        assert_eq!(
            object_key(""),
            ("part-00000.parquet".to_string(), Some(String::new()))
        );
    }
}
