//! Cleaner: deduplication, fee removal and calendar derivation.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::{BadTimestampPolicy, PipelineConfig};
use crate::error::PipelineError;
use crate::pipeline::types::{CleanedTrip, DerivedTime, RawTrip, RecordOrigin};

/// Formats tried, in order, before any configured extras.
const BUILTIN_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
];

/// Strict timestamp parser over a fixed list of `chrono` formats.
#[derive(Debug, Clone)]
pub struct TimestampParser {
    formats: Vec<String>,
}

impl TimestampParser {
    pub fn new(extra_formats: &[String]) -> Self {
        let formats = BUILTIN_FORMATS
            .iter()
            .map(|f| f.to_string())
            .chain(extra_formats.iter().cloned())
            .collect();
        Self { formats }
    }

    /// Returns the first successful parse, or `None` if no format matches
    /// the whole input.
    pub fn parse(&self, value: &str) -> Option<NaiveDateTime> {
        let value = value.trim();
        self.formats
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
    }
}

impl Default for TimestampParser {
    fn default() -> Self {
        Self::new(&[])
    }
}

/// Derives date, time of day, ISO weekday and ISO week from a timestamp.
pub fn derive_time(ts: NaiveDateTime) -> DerivedTime {
    let time = NaiveTime::from_hms_opt(ts.hour(), ts.minute(), ts.second()).unwrap_or(ts.time());
    DerivedTime {
        date: ts.date(),
        time,
        day_of_week: ts.weekday().number_from_monday(),
        week: ts.iso_week().week(),
    }
}

/// A trip that survived deduplication, with its timestamps parsed once.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueTrip {
    /// 0-based position in the input batch.
    pub position: usize,
    pub trip: RawTrip,
    pub pickup: Option<NaiveDateTime>,
    pub dropoff: Option<NaiveDateTime>,
}

/// Timestamp as compared for dedup: by instant when it parses, verbatim
/// otherwise.
#[derive(PartialEq, Eq, Hash)]
enum Stamp<'a> {
    At(NaiveDateTime),
    Verbatim(&'a str),
}

impl<'a> Stamp<'a> {
    fn of(parsed: Option<NaiveDateTime>, raw: &'a str) -> Self {
        match parsed {
            Some(ts) => Stamp::At(ts),
            None => Stamp::Verbatim(raw),
        }
    }
}

/// Passthrough cell as compared for dedup.
#[derive(PartialEq, Eq, Hash)]
enum Cell<'a> {
    Number(u64),
    Text(&'a str),
}

/// Full-row identity of a raw trip, fee excluded.
#[derive(PartialEq, Eq, Hash)]
struct RowKey<'a> {
    vendor_id: i64,
    trip_type: Option<i64>,
    payment_type: i64,
    pickup: Stamp<'a>,
    dropoff: Stamp<'a>,
    amounts: [u64; 7],
    passthrough: Vec<Cell<'a>>,
}

fn float_bits(value: f64) -> u64 {
    // -0.0 and 0.0 are the same value
    if value == 0.0 { 0 } else { value.to_bits() }
}

impl<'a> RowKey<'a> {
    fn of(
        trip: &'a RawTrip,
        pickup: Option<NaiveDateTime>,
        dropoff: Option<NaiveDateTime>,
        numeric: &[bool],
    ) -> Self {
        let passthrough = trip
            .passthrough
            .iter()
            .zip(numeric)
            .map(|(value, &is_numeric)| match value.parse::<f64>() {
                Ok(n) if is_numeric => Cell::Number(float_bits(n)),
                _ => Cell::Text(value),
            })
            .collect();

        Self {
            vendor_id: trip.vendor_id,
            trip_type: trip.trip_type,
            payment_type: trip.payment_type,
            pickup: Stamp::of(pickup, &trip.pickup_datetime),
            dropoff: Stamp::of(dropoff, &trip.dropoff_datetime),
            amounts: [
                float_bits(trip.trip_distance),
                float_bits(trip.fare_amount),
                float_bits(trip.extra),
                float_bits(trip.mta_tax),
                float_bits(trip.tip_amount),
                float_bits(trip.improvement_surcharge),
                float_bits(trip.total_amount),
            ],
            passthrough,
        }
    }
}

/// Marks the passthrough columns whose non-blank cells all parse as
/// numbers; those compare by value, the rest as text.
fn numeric_columns(raw: &[RawTrip]) -> Vec<bool> {
    let width = raw.iter().map(|t| t.passthrough.len()).max().unwrap_or(0);
    (0..width)
        .map(|column| {
            raw.iter().all(|trip| {
                trip.passthrough
                    .get(column)
                    .is_none_or(|v| v.is_empty() || v.parse::<f64>().is_ok())
            })
        })
        .collect()
}

/// Collapses rows that hold the same values in every field except the fee.
///
/// Timestamps compare by parsed instant and numeric passthrough columns by
/// value, so `-73.90` equals `-73.9` and `10:00:00.000` equals `10:00:00`.
/// The first occurrence survives.
pub fn deduplicate(raw: Vec<RawTrip>, parser: &TimestampParser) -> Vec<UniqueTrip> {
    let stamps: Vec<(Option<NaiveDateTime>, Option<NaiveDateTime>)> = raw
        .par_iter()
        .map(|trip| {
            (
                parser.parse(&trip.pickup_datetime),
                parser.parse(&trip.dropoff_datetime),
            )
        })
        .collect();
    let numeric = numeric_columns(&raw);

    let keep: Vec<bool> = {
        let mut seen = HashSet::with_capacity(raw.len());
        raw.iter()
            .zip(&stamps)
            .map(|(trip, &(pickup, dropoff))| {
                seen.insert(RowKey::of(trip, pickup, dropoff, &numeric))
            })
            .collect()
    };

    raw.into_iter()
        .zip(stamps)
        .zip(keep)
        .enumerate()
        .filter(|(_, (_, keep))| *keep)
        .map(|(position, ((trip, (pickup, dropoff)), _))| UniqueTrip {
            position,
            trip,
            pickup,
            dropoff,
        })
        .collect()
}

fn parse_error(
    field: &'static str,
    value: &str,
    position: usize,
    origin: &RecordOrigin,
) -> PipelineError {
    let location = if origin.is_known() {
        origin.to_string()
    } else {
        format!("record {}", position + 1)
    };
    PipelineError::Parse {
        field,
        value: value.to_string(),
        location,
    }
}

fn clean_one(unique: UniqueTrip) -> Result<CleanedTrip, PipelineError> {
    let UniqueTrip {
        position,
        trip: raw,
        pickup,
        dropoff,
    } = unique;
    let pickup = pickup
        .ok_or_else(|| parse_error("pickup", &raw.pickup_datetime, position, &raw.origin))?;
    let dropoff = dropoff
        .ok_or_else(|| parse_error("dropoff", &raw.dropoff_datetime, position, &raw.origin))?;

    Ok(CleanedTrip {
        vendor_id: raw.vendor_id,
        trip_type: raw.trip_type,
        payment_type: raw.payment_type,
        trip_distance: raw.trip_distance,
        fare_amount: raw.fare_amount,
        extra: raw.extra,
        mta_tax: raw.mta_tax,
        tip_amount: raw.tip_amount,
        improvement_surcharge: raw.improvement_surcharge,
        total_amount: raw.total_amount,
        passthrough: raw.passthrough,
        pickup: derive_time(pickup),
        dropoff: derive_time(dropoff),
    })
}

#[derive(Debug)]
pub struct CleanOutput {
    pub trips: Vec<CleanedTrip>,
    pub duplicates_removed: usize,
    pub bad_timestamps_skipped: usize,
}

/// Runs the cleaner over the full input batch.
///
/// Under [`BadTimestampPolicy::Abort`] the first unparsable timestamp in
/// input order fails the run; under [`BadTimestampPolicy::Skip`] the
/// offending records are dropped and counted.
#[tracing::instrument(skip_all, fields(raw_rows = raw.len()))]
pub fn clean_trips(raw: Vec<RawTrip>, config: &PipelineConfig) -> Result<CleanOutput, PipelineError> {
    let raw_rows = raw.len();
    let parser = TimestampParser::new(&config.extra_timestamp_formats);
    let deduped = deduplicate(raw, &parser);
    let duplicates_removed = raw_rows - deduped.len();

    let results: Vec<Result<CleanedTrip, PipelineError>> =
        deduped.into_par_iter().map(clean_one).collect();

    let mut trips = Vec::with_capacity(results.len());
    let mut bad_timestamps_skipped = 0;
    for result in results {
        match result {
            Ok(trip) => trips.push(trip),
            Err(e) if config.on_bad_timestamp == BadTimestampPolicy::Skip => {
                if bad_timestamps_skipped == 0 {
                    warn!(error = %e, "Skipping record with unparsable timestamp");
                }
                bad_timestamps_skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if bad_timestamps_skipped > 0 {
        warn!(bad_timestamps_skipped, "Records dropped for unparsable timestamps");
    }
    info!(
        cleaned = trips.len(),
        duplicates_removed, "Data cleaning completed"
    );

    Ok(CleanOutput {
        trips,
        duplicates_removed,
        bad_timestamps_skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_trips;
    use chrono::NaiveDate;

    fn raw(pickup: &str, fare: f64) -> RawTrip {
        RawTrip {
            vendor_id: 2,
            trip_type: Some(1),
            payment_type: 1,
            pickup_datetime: pickup.to_string(),
            dropoff_datetime: "2015-01-05 10:20:00".to_string(),
            trip_distance: 1.5,
            fare_amount: fare,
            extra: 0.5,
            mta_tax: 0.5,
            tip_amount: 1.0,
            improvement_surcharge: 0.3,
            total_amount: fare + 2.3,
            ehail_fee: None,
            passthrough: vec!["N".to_string(), "1".to_string()],
            origin: RecordOrigin::default(),
        }
    }

    fn dedup(raw: Vec<RawTrip>) -> Vec<UniqueTrip> {
        deduplicate(raw, &TimestampParser::default())
    }

    #[test]
    fn test_parser_accepts_builtin_formats() {
        let parser = TimestampParser::default();
        let expected = NaiveDate::from_ymd_opt(2015, 1, 5)
            .unwrap()
            .and_hms_opt(10, 2, 3)
            .unwrap();
        assert_eq!(parser.parse("2015-01-05 10:02:03"), Some(expected));
        assert_eq!(parser.parse("2015-01-05T10:02:03"), Some(expected));
        assert_eq!(parser.parse("01/05/2015 10:02:03 AM"), Some(expected));
        assert!(parser.parse("2015-01-05 10:02:03.250").is_some());
    }

    #[test]
    fn test_parser_is_strict() {
        let parser = TimestampParser::default();
        assert!(parser.parse("2015-01-05").is_none());
        assert!(parser.parse("2015-13-05 10:02:03").is_none());
        assert!(parser.parse("2015-01-05 10:02:03 extra").is_none());
        assert!(parser.parse("").is_none());
    }

    #[test]
    fn test_parser_extra_formats() {
        let parser = TimestampParser::new(&["%d.%m.%Y %H:%M".to_string()]);
        assert!(parser.parse("05.01.2015 10:02").is_some());
    }

    #[test]
    fn test_derive_time_uses_iso_calendar() {
        // 2015-01-01 is a Thursday in ISO week 1
        let ts = NaiveDate::from_ymd_opt(2015, 1, 1)
            .unwrap()
            .and_hms_milli_opt(0, 34, 42, 900)
            .unwrap();
        let derived = derive_time(ts);
        assert_eq!(derived.day_of_week, 4);
        assert_eq!(derived.week, 1);
        assert_eq!(derived.time_of_day(), "00:34:42");
        assert_eq!(derived.date, NaiveDate::from_ymd_opt(2015, 1, 1).unwrap());

        // 2016-01-03 is a Sunday still in ISO week 53 of 2015
        let ts = NaiveDate::from_ymd_opt(2016, 1, 3)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let derived = derive_time(ts);
        assert_eq!(derived.day_of_week, 7);
        assert_eq!(derived.week, 53);
    }

    #[test]
    fn test_deduplicate_keeps_first_and_ignores_fee() {
        let a = raw("2015-01-05 10:00:00", 10.0);
        let mut a_with_fee = a.clone();
        a_with_fee.ehail_fee = Some(1.25);
        let b = raw("2015-01-06 10:00:00", 10.0);

        let deduped = dedup(vec![a.clone(), b.clone(), a_with_fee]);
        assert_eq!(deduped.len(), 2);
        assert_eq!((deduped[0].position, &deduped[0].trip), (0, &a));
        assert_eq!((deduped[1].position, &deduped[1].trip), (1, &b));
        assert!(deduped[0].pickup.is_some());
    }

    #[test]
    fn test_deduplicate_distinguishes_passthrough() {
        let a = raw("2015-01-05 10:00:00", 10.0);
        let mut b = a.clone();
        b.passthrough[0] = "Y".to_string();

        assert_eq!(dedup(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_deduplicate_treats_signed_zero_as_equal() {
        let a = raw("2015-01-05 10:00:00", 10.0);
        let mut b = a.clone();
        b.tip_amount = 0.0;
        let mut c = a.clone();
        c.tip_amount = -0.0;

        assert_eq!(dedup(vec![b, c]).len(), 1);
    }

    #[test]
    fn test_deduplicate_compares_parsed_values() {
        let csv = "VendorID,lpep_pickup_datetime,Lpep_dropoff_datetime,Pickup_longitude,Store_and_fwd_flag,Trip_distance,Fare_amount,Extra,MTA_tax,Tip_amount,improvement_surcharge,Total_amount,Payment_type,Trip_type\n\
                   2,2015-01-05 10:00:00,2015-01-05 10:20:00,-73.90,N,.88,5,0.5,0.5,0,0.3,6.3,2,1\n\
                   2,2015-01-05 10:00:00.000,2015-01-05 10:20:00,-73.9,N,0.88,5,0.5,0.5,0,0.3,6.3,2,1\n";
        let raw = parse_trips("jan.csv", csv.as_bytes()).unwrap();

        let out = clean_trips(raw, &PipelineConfig::default()).unwrap();
        assert_eq!(out.trips.len(), 1);
        assert_eq!(out.duplicates_removed, 1);
    }

    #[test]
    fn test_deduplicate_keeps_text_columns_verbatim() {
        // "01" and "1" are different codes once the column holds text
        let a = raw("2015-01-05 10:00:00", 10.0);
        let mut b = a.clone();
        b.passthrough = vec!["01".to_string(), "1".to_string()];
        let mut c = a.clone();
        c.passthrough = vec!["1".to_string(), "1.0".to_string()];

        // column 0 holds "N", so it is text; column 1 is numeric
        let deduped = dedup(vec![a, b, c]);
        assert_eq!(deduped.len(), 3);

        let d = raw("2015-01-05 10:00:00", 10.0);
        let mut e = d.clone();
        e.passthrough[1] = "1.0".to_string();
        assert_eq!(dedup(vec![d, e]).len(), 1);
    }

    #[test]
    fn test_deduplicate_unparsable_timestamps_compare_verbatim() {
        let a = raw("not a time", 10.0);
        let b = raw("not a time ", 10.0);
        let deduped = dedup(vec![a.clone(), a, b]);
        assert_eq!(deduped.len(), 2);
        assert!(deduped[0].pickup.is_none());
    }

    #[test]
    fn test_bad_timestamp_error_names_file_and_line() {
        let header = "VendorID,lpep_pickup_datetime,Lpep_dropoff_datetime,Trip_distance,Fare_amount,Extra,MTA_tax,Tip_amount,improvement_surcharge,Total_amount,Payment_type\n";
        let good = "2,2015-01-05 10:00:00,2015-01-05 10:20:00,1.0,5,0.5,0.5,0,0.3,6.3,2\n";
        let bad = "2,2015-02-30 10:00:00,2015-02-02 10:20:00,1.0,5,0.5,0.5,0,0.3,6.3,2\n";

        let mut raw = parse_trips("jan.csv", format!("{header}{good}").as_bytes()).unwrap();
        raw.extend(parse_trips("feb.csv", format!("{header}{good}{bad}").as_bytes()).unwrap());

        let err = clean_trips(raw, &PipelineConfig::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot parse pickup timestamp \"2015-02-30 10:00:00\" at feb.csv line 3"
        );
    }

    #[test]
    fn test_dedup_idempotence() {
        let base = vec![
            raw("2015-01-05 10:00:00", 10.0),
            raw("2015-01-06 11:00:00", 12.0),
            raw("2015-01-07 12:00:00", 0.0),
        ];
        let mut doubled = base.clone();
        doubled.extend(base.iter().rev().cloned());
        doubled.push(base[1].clone());

        let config = PipelineConfig::default();
        let once = clean_trips(base, &config).unwrap();
        let again = clean_trips(doubled, &config).unwrap();

        assert_eq!(once.trips, again.trips);
        assert_eq!(again.duplicates_removed, 4);
    }

    #[test]
    fn test_clean_drops_fee_and_derives_fields() {
        let mut trip = raw("2015-01-05 10:00:00", 10.0);
        trip.ehail_fee = Some(3.0);

        let out = clean_trips(vec![trip], &PipelineConfig::default()).unwrap();
        let cleaned = &out.trips[0];
        assert_eq!(cleaned.pickup.day_of_week, 1);
        assert_eq!(cleaned.pickup.week, 2);
        assert_eq!(cleaned.dropoff.time_of_day(), "10:20:00");
        assert_eq!(cleaned.passthrough, vec!["N".to_string(), "1".to_string()]);
    }

    #[test]
    fn test_bad_timestamp_aborts_by_default() {
        let trips = vec![
            raw("2015-01-05 10:00:00", 10.0),
            raw("not a time", 10.0),
            raw("also bad", 11.0),
        ];
        let err = clean_trips(trips, &PipelineConfig::default()).unwrap_err();
        match err {
            PipelineError::Parse {
                field,
                value,
                location,
            } => {
                assert_eq!(field, "pickup");
                assert_eq!(value, "not a time");
                assert_eq!(location, "record 2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_timestamp_skip_policy_counts() {
        let trips = vec![
            raw("2015-01-05 10:00:00", 10.0),
            raw("not a time", 10.0),
        ];
        let config = PipelineConfig {
            on_bad_timestamp: BadTimestampPolicy::Skip,
            ..PipelineConfig::default()
        };
        let out = clean_trips(trips, &config).unwrap();
        assert_eq!(out.trips.len(), 1);
        assert_eq!(out.bad_timestamps_skipped, 1);
    }

    #[test]
    fn test_derived_fields_within_domain() {
        let trips: Vec<RawTrip> = (1..=28)
            .map(|day| raw(&format!("2015-02-{day:02} 08:15:00"), 5.0))
            .collect();
        let out = clean_trips(trips, &PipelineConfig::default()).unwrap();
        for trip in &out.trips {
            assert!((1..=53).contains(&trip.pickup.week));
            assert!((1..=7).contains(&trip.pickup.day_of_week));
        }
    }
}
