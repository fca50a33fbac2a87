//! Record types flowing through the pipeline.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

/// Where a raw record was read from.
///
/// Records built in memory have an empty object name and line 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOrigin {
    pub object: Arc<str>,
    /// 1-based CSV line, header included.
    pub line: u64,
}

impl RecordOrigin {
    pub fn is_known(&self) -> bool {
        !self.object.is_empty()
    }
}

impl fmt::Display for RecordOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} line {}", self.object, self.line)
    }
}

/// One row of input as read from a source.
///
/// Timestamps are kept verbatim; the cleaner parses them.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrip {
    pub vendor_id: i64,
    pub trip_type: Option<i64>,
    pub payment_type: i64,
    pub pickup_datetime: String,
    pub dropoff_datetime: String,
    pub trip_distance: f64,
    pub fare_amount: f64,
    pub extra: f64,
    pub mta_tax: f64,
    pub tip_amount: f64,
    pub improvement_surcharge: f64,
    pub total_amount: f64,
    pub ehail_fee: Option<f64>,
    /// Values of columns the pipeline does not interpret, in header order.
    pub passthrough: Vec<String>,
    pub origin: RecordOrigin,
}

/// Calendar attributes derived from one trip timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedTime {
    pub date: NaiveDate,
    /// Time of day truncated to whole seconds.
    pub time: NaiveTime,
    /// ISO weekday, Monday = 1 through Sunday = 7.
    pub day_of_week: u32,
    /// ISO week number, 1 through 53.
    pub week: u32,
}

impl DerivedTime {
    pub fn time_of_day(&self) -> String {
        self.time.format("%H:%M:%S").to_string()
    }
}

/// A deduplicated trip with the fee dropped and calendar attributes derived.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedTrip {
    pub vendor_id: i64,
    pub trip_type: Option<i64>,
    pub payment_type: i64,
    pub trip_distance: f64,
    pub fare_amount: f64,
    pub extra: f64,
    pub mta_tax: f64,
    pub tip_amount: f64,
    pub improvement_surcharge: f64,
    pub total_amount: f64,
    pub passthrough: Vec<String>,
    pub pickup: DerivedTime,
    pub dropoff: DerivedTime,
}

/// A trip with a positive fare, tagged against the run's mean tip.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedTrip {
    pub trip: CleanedTrip,
    pub tip_fraction: f64,
    pub generous: bool,
}

/// Grouping key of the weekly fact table.
///
/// Ordering puts trips without a trip type before typed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub vendor_id: i64,
    pub trip_type: Option<i64>,
    pub payment_type: i64,
    pub pickup_week: u32,
}

impl GroupKey {
    pub fn of(trip: &CleanedTrip) -> Self {
        Self {
            vendor_id: trip.vendor_id,
            trip_type: trip.trip_type,
            payment_type: trip.payment_type,
            pickup_week: trip.pickup.week,
        }
    }
}

/// One row of the weekly fact table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyFact {
    pub vendor_id: i64,
    pub trip_type: Option<i64>,
    pub payment_type: i64,
    pub pickup_week: u32,
    pub total_trip_distance: f64,
    pub avg_trip_distance: f64,
    pub total_fare_amount: f64,
    pub avg_fare_amount: f64,
    pub total_total_amount: f64,
    pub total_extra: f64,
    pub avg_extra: f64,
    pub total_mta_tax: f64,
    pub avg_tip_amount: f64,
    pub avg_improvement_surcharge: f64,
    pub generous_customer_count: u64,
    pub lucky_flg: bool,
}

impl WeeklyFact {
    pub fn key(&self) -> GroupKey {
        GroupKey {
            vendor_id: self.vendor_id,
            trip_type: self.trip_type,
            payment_type: self.payment_type,
            pickup_week: self.pickup_week,
        }
    }
}

/// Counters and statistics of one successful run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub input_objects: usize,
    pub raw_rows: usize,
    pub duplicates_removed: usize,
    pub bad_timestamps_skipped: usize,
    pub cleaned_rows: usize,
    pub fare_filtered: usize,
    pub flagged_rows: usize,
    pub mean_tip_amount: f64,
    pub generous_count: u64,
    pub groups: usize,
    pub mean_generous_count: f64,
    pub lucky_groups: usize,
}
