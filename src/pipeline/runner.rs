use chrono::Utc;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::aggregate::aggregate_trips;
use crate::pipeline::clean::clean_trips;
use crate::pipeline::flag::flag_trips;
use crate::pipeline::types::{RawTrip, RunSummary, WeeklyFact};
use crate::sink::{FactSink, encode_parquet};
use crate::source::{TripSource, read_trips};

/// Fact table of a run plus its summary.
#[derive(Debug)]
pub struct PipelineOutput {
    pub facts: Vec<WeeklyFact>,
    pub summary: RunSummary,
}

/// Runs clean, flag and aggregate on the current rayon pool.
pub fn transform(raw: Vec<RawTrip>, config: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    let started_at = Utc::now();
    let raw_rows = raw.len();

    let cleaned = clean_trips(raw, config)?;
    let cleaned_rows = cleaned.trips.len();

    let flagged = flag_trips(cleaned.trips, config.chunk_size)?;
    let generous_count = flagged.generous_count();

    let aggregated = aggregate_trips(&flagged.trips, config.chunk_size)?;

    let summary = RunSummary {
        started_at,
        input_objects: 0,
        raw_rows,
        duplicates_removed: cleaned.duplicates_removed,
        bad_timestamps_skipped: cleaned.bad_timestamps_skipped,
        cleaned_rows,
        fare_filtered: flagged.filtered_out,
        flagged_rows: flagged.trips.len(),
        mean_tip_amount: flagged.mean_tip,
        generous_count,
        groups: aggregated.facts.len(),
        mean_generous_count: aggregated.mean_generous,
        lucky_groups: aggregated.lucky_groups(),
    };

    Ok(PipelineOutput {
        facts: aggregated.facts,
        summary,
    })
}

/// Validates the config and runs [`transform`], on a dedicated pool when
/// `threads` is set.
pub fn run_core(raw: Vec<RawTrip>, config: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    config.validate().map_err(PipelineError::Config)?;

    if config.threads == 0 {
        return transform(raw, config);
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
    pool.install(|| transform(raw, config))
}

/// Reads every source, then runs the core off the async runtime.
#[tracing::instrument(skip_all)]
pub async fn compute(
    sources: &[Box<dyn TripSource>],
    config: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    let batch = read_trips(sources).await.map_err(PipelineError::Input)?;
    let input_objects = batch.objects.len();

    let config = config.clone();
    let result = tokio::task::spawn_blocking(move || run_core(batch.trips, &config)).await;
    let mut output = match result {
        Ok(output) => output?,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => return Err(PipelineError::WorkerPool(e.to_string())),
    };

    output.summary.input_objects = input_objects;
    Ok(output)
}

/// Runs the whole pipeline and overwrites the sink with the fact table.
#[tracing::instrument(skip_all, fields(sink = %sink.describe()))]
pub async fn run(
    sources: &[Box<dyn TripSource>],
    sink: &dyn FactSink,
    config: &PipelineConfig,
) -> Result<RunSummary, PipelineError> {
    let output = compute(sources, config).await?;

    let parquet = encode_parquet(&output.facts).map_err(PipelineError::Output)?;
    info!(sink = %sink.describe(), bytes = parquet.len(), "Saving fact table");
    sink.write(parquet).await.map_err(PipelineError::Output)?;
    info!(sink = %sink.describe(), "Data saved successfully");

    Ok(output.summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BadTimestampPolicy;

    fn raw(vendor: i64, pickup: &str, fare: f64, tip: f64) -> RawTrip {
        RawTrip {
            vendor_id: vendor,
            trip_type: Some(1),
            payment_type: 1,
            pickup_datetime: pickup.to_string(),
            dropoff_datetime: pickup.to_string(),
            trip_distance: 2.0,
            fare_amount: fare,
            extra: 0.5,
            mta_tax: 0.5,
            tip_amount: tip,
            improvement_surcharge: 0.3,
            total_amount: fare + tip + 1.3,
            ehail_fee: None,
            passthrough: Vec::new(),
            origin: Default::default(),
        }
    }

    fn sample() -> Vec<RawTrip> {
        vec![
            raw(1, "2015-01-05 08:00:00", 10.0, 4.0),
            raw(1, "2015-01-06 09:00:00", 12.0, 0.0),
            raw(1, "2015-01-06 09:00:00", 12.0, 0.0),
            raw(2, "2015-01-13 10:00:00", 8.0, 3.0),
            raw(2, "2015-01-14 11:00:00", 0.0, 9.0),
            raw(2, "2015-01-20 12:00:00", 20.0, 1.0),
        ]
    }

    #[test]
    fn test_transform_summary() {
        let out = transform(sample(), &PipelineConfig::default()).unwrap();
        let s = &out.summary;

        assert_eq!(s.raw_rows, 6);
        assert_eq!(s.duplicates_removed, 1);
        assert_eq!(s.cleaned_rows, 5);
        assert_eq!(s.fare_filtered, 1);
        assert_eq!(s.flagged_rows, 4);
        assert_eq!(s.mean_tip_amount, 2.0);
        // tips 4.0 and 3.0 exceed the mean of 2.0
        assert_eq!(s.generous_count, 2);
        assert_eq!(s.groups, 3);
        assert_eq!(out.facts.len(), 3);
    }

    #[test]
    fn test_run_core_with_dedicated_pool() {
        let config = PipelineConfig {
            threads: 2,
            chunk_size: 2,
            ..PipelineConfig::default()
        };
        let out = run_core(sample(), &config).unwrap();
        assert_eq!(out.summary.groups, 3);
    }

    #[test]
    fn test_run_core_rejects_invalid_config() {
        let config = PipelineConfig {
            chunk_size: 0,
            ..PipelineConfig::default()
        };
        let err = run_core(sample(), &config).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_empty_input_fails_with_no_eligible_records() {
        let err = transform(Vec::new(), &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::NoEligibleRecords));
    }

    #[test]
    fn test_bad_timestamp_fails_clean_stage() {
        let mut trips = sample();
        trips[3].dropoff_datetime = "13/13/2015".to_string();
        let err = transform(trips, &PipelineConfig::default()).unwrap_err();
        assert_eq!(err.stage(), crate::error::Stage::Clean);

        let mut trips = sample();
        trips[3].dropoff_datetime = "13/13/2015".to_string();
        let config = PipelineConfig {
            on_bad_timestamp: BadTimestampPolicy::Skip,
            ..PipelineConfig::default()
        };
        let out = transform(trips, &config).unwrap();
        assert_eq!(out.summary.bad_timestamps_skipped, 1);
    }

    #[test]
    fn test_output_is_independent_of_thread_count() {
        let trips: Vec<RawTrip> = (0..3_000)
            .map(|i| {
                raw(
                    i % 3,
                    &format!("2015-03-{:02} 07:{:02}:00", 1 + i % 28, i % 60),
                    (i % 17) as f64 * 1.1,
                    (i % 11) as f64 * 0.37,
                )
            })
            .collect();

        let single = PipelineConfig {
            threads: 1,
            chunk_size: 128,
            ..PipelineConfig::default()
        };
        let many = PipelineConfig {
            threads: 4,
            ..single.clone()
        };

        let a = run_core(trips.clone(), &single).unwrap();
        let b = run_core(trips, &many).unwrap();
        assert_eq!(a.facts, b.facts);
        assert_eq!(a.summary.mean_tip_amount.to_bits(), b.summary.mean_tip_amount.to_bits());
    }
}
