//! Input sources for raw trip files.
//!
//! [`TripSource`] is the seam between the pipeline and wherever trip files
//! live. [`LocalSource`] reads files, directories and glob patterns from
//! disk; [`S3Source`] lists and downloads objects from a bucket.

mod local;
mod s3;

pub use local::LocalSource;
pub use s3::S3Source;

use std::io::Read;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::location::Location;
use crate::parser::parse_trips_from;
use crate::pipeline::types::RawTrip;

/// Where trip files come from.
///
/// Listing and fetching are separate so a reader holds one object body at
/// a time.
#[async_trait]
pub trait TripSource: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Names of every matching object, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    /// Fetches the body of one object returned by [`TripSource::list`].
    async fn fetch(&self, name: &str) -> Result<Bytes>;
}

/// Raw trips of a run together with the objects they were read from.
#[derive(Debug, Default)]
pub struct TripBatch {
    pub objects: Vec<String>,
    pub trips: Vec<RawTrip>,
}

/// Builds the source for a location string. S3 clients use the ambient
/// AWS configuration.
pub async fn open_source(uri: &str) -> Result<Box<dyn TripSource>> {
    match Location::parse(uri)? {
        Location::Local(pattern) => Ok(Box::new(LocalSource::new(pattern))),
        Location::S3 { bucket, key } => {
            let config = aws_config::load_from_env().await;
            let client = aws_sdk_s3::Client::new(&config);
            Ok(Box::new(S3Source::new(client, bucket, key)))
        }
    }
}

/// Reader over an object body, gunzipping on the fly when the name ends in
/// `.gz`.
pub fn body_reader<'a>(name: &str, body: &'a [u8]) -> Box<dyn Read + 'a> {
    if name.to_ascii_lowercase().ends_with(".gz") {
        Box::new(GzDecoder::new(body))
    } else {
        Box::new(body)
    }
}

/// Lists, fetches and parses every object of every source into one batch.
///
/// Objects are fetched one at a time; each body is dropped once its rows
/// are parsed. Fails if a source matches nothing, so a mistyped path never
/// turns into an empty run.
#[tracing::instrument(skip_all, fields(sources = sources.len()))]
pub async fn read_trips(sources: &[Box<dyn TripSource>]) -> Result<TripBatch> {
    let mut batch = TripBatch::default();

    for source in sources {
        info!(source = %source.describe(), "Reading trip data");
        let names = source
            .list()
            .await
            .with_context(|| format!("cannot list {}", source.describe()))?;
        if names.is_empty() {
            bail!("no trip files found at {}", source.describe());
        }

        for name in names {
            let body = source
                .fetch(&name)
                .await
                .with_context(|| format!("cannot read {name}"))?;
            debug!(object = %name, bytes = body.len(), "Parsing trip file");
            let trips = parse_trips_from(&name, body_reader(&name, &body))?;
            drop(body);

            debug!(object = %name, rows = trips.len(), "Trip file parsed");
            batch.trips.extend(trips);
            batch.objects.push(name);
        }
    }

    info!(
        objects = batch.objects.len(),
        rows = batch.trips.len(),
        "Trip data loaded"
    );
    Ok(batch)
}
