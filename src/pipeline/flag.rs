//! Flagger: fare filter, tip fraction and the generous-customer flag.

use rayon::prelude::*;
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::statistic::tally_by;
use crate::pipeline::types::{CleanedTrip, FlaggedTrip};

/// Keeps only trips with a strictly positive fare.
pub fn filter_eligible(trips: Vec<CleanedTrip>) -> Vec<CleanedTrip> {
    trips.into_par_iter().filter(|t| t.fare_amount > 0.0).collect()
}

/// Mean tip over the eligible set. Fails when the set is empty.
pub fn compute_mean_tip(trips: &[CleanedTrip], chunk_size: usize) -> Result<f64, PipelineError> {
    tally_by(trips, chunk_size, |t| t.tip_amount)
        .mean()
        .ok_or(PipelineError::NoEligibleRecords)
}

/// Tags every trip against an already computed mean tip.
pub fn tag_generous(trips: Vec<CleanedTrip>, mean_tip: f64) -> Vec<FlaggedTrip> {
    trips
        .into_par_iter()
        .map(|trip| FlaggedTrip {
            tip_fraction: trip.tip_amount / trip.fare_amount,
            generous: trip.tip_amount > mean_tip,
            trip,
        })
        .collect()
}

#[derive(Debug)]
pub struct FlagOutput {
    pub trips: Vec<FlaggedTrip>,
    pub mean_tip: f64,
    pub filtered_out: usize,
}

impl FlagOutput {
    pub fn generous_count(&self) -> u64 {
        self.trips.iter().filter(|t| t.generous).count() as u64
    }
}

/// Filters, then computes the mean tip to completion, then tags.
#[tracing::instrument(skip_all, fields(cleaned_rows = trips.len()))]
pub fn flag_trips(trips: Vec<CleanedTrip>, chunk_size: usize) -> Result<FlagOutput, PipelineError> {
    let cleaned_rows = trips.len();
    let eligible = filter_eligible(trips);
    let filtered_out = cleaned_rows - eligible.len();

    let mean_tip = compute_mean_tip(&eligible, chunk_size)?;
    info!(eligible = eligible.len(), filtered_out, mean_tip, "Mean tip computed");

    let trips = tag_generous(eligible, mean_tip);

    Ok(FlagOutput {
        trips,
        mean_tip,
        filtered_out,
    })
}
