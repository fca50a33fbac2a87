use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use glob::MatchOptions;
use tracing::debug;

use super::TripSource;
use crate::location::{has_wildcard, is_trip_file, literal_prefix};

/// Reads trip files from an S3 bucket.
///
/// `key` may be an exact object key, a "directory" prefix, or a glob over
/// keys such as `datasets/green_tripdata_2015-*.csv`.
pub struct S3Source {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
}

impl S3Source {
    pub fn new(client: aws_sdk_s3::Client, bucket: String, key: String) -> Self {
        Self {
            client,
            bucket,
            key,
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(t) = &token {
                request = request.continuation_token(t);
            }
            let resp = request
                .send()
                .await
                .with_context(|| format!("ListObjectsV2 failed for s3://{}/{prefix}", self.bucket))?;

            keys.extend(resp.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            if resp.is_truncated() == Some(true) {
                token = resp.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(keys)
    }
}

/// Wildcards never cross a `/`, the same as for local paths.
const KEY_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Picks the keys a key or key pattern refers to, sorted.
fn select_keys(target: &str, keys: Vec<String>) -> Result<Vec<String>> {
    let mut selected: Vec<String> = if has_wildcard(target) {
        let pattern =
            glob::Pattern::new(target).with_context(|| format!("invalid key pattern '{target}'"))?;
        keys.into_iter()
            .filter(|k| pattern.matches_with(k, KEY_MATCH))
            .collect()
    } else if keys.iter().any(|k| k == target) {
        vec![target.to_string()]
    } else {
        let dir = target.trim_end_matches('/');
        keys.into_iter()
            .filter(|k| dir.is_empty() || k.starts_with(&format!("{dir}/")))
            .filter(|k| is_trip_file(k))
            .collect()
    };
    selected.sort();
    Ok(selected)
}

#[async_trait]
impl TripSource for S3Source {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let prefix = literal_prefix(&self.key);
        select_keys(&self.key, self.list_keys(prefix).await?)
    }

    async fn fetch(&self, key: &str) -> Result<Bytes> {
        debug!(bucket = %self.bucket, key = %key, "Downloading object");
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("GetObject failed for s3://{}/{key}", self.bucket))?;
        let body = resp
            .body
            .collect()
            .await
            .with_context(|| format!("cannot read body of s3://{}/{key}", self.bucket))?
            .into_bytes();
        Ok(body)
    }
}
