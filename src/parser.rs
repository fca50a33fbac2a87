//! CSV parser for raw trip files.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use csv::{ReaderBuilder, StringRecord, Trim};

use crate::pipeline::types::{RawTrip, RecordOrigin};

// 2^63; every f64 below it and at or above -2^63 fits an i64 exactly.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

const VENDOR_ID: &[&str] = &["vendorid", "vendor_id"];
const PICKUP: &[&str] = &["lpep_pickup_datetime", "tpep_pickup_datetime", "pickup_datetime"];
const DROPOFF: &[&str] = &["lpep_dropoff_datetime", "tpep_dropoff_datetime", "dropoff_datetime"];
const TRIP_DISTANCE: &[&str] = &["trip_distance"];
const FARE_AMOUNT: &[&str] = &["fare_amount"];
const EXTRA: &[&str] = &["extra"];
const MTA_TAX: &[&str] = &["mta_tax"];
const TIP_AMOUNT: &[&str] = &["tip_amount"];
const IMPROVEMENT_SURCHARGE: &[&str] = &["improvement_surcharge"];
const TOTAL_AMOUNT: &[&str] = &["total_amount"];
const PAYMENT_TYPE: &[&str] = &["payment_type"];
const TRIP_TYPE: &[&str] = &["trip_type"];
const EHAIL_FEE: &[&str] = &["ehail_fee"];

/// Column positions resolved from a header row.
#[derive(Debug)]
struct TripSchema {
    headers: Vec<String>,
    vendor_id: usize,
    pickup: usize,
    dropoff: usize,
    trip_distance: usize,
    fare_amount: usize,
    extra: usize,
    mta_tax: usize,
    tip_amount: usize,
    improvement_surcharge: usize,
    total_amount: usize,
    payment_type: usize,
    trip_type: Option<usize>,
    ehail_fee: Option<usize>,
    passthrough: Vec<usize>,
}

impl TripSchema {
    fn resolve(header: &StringRecord) -> Result<Self> {
        let headers: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();
        let normalized: Vec<String> = headers.iter().map(|h| h.to_ascii_lowercase()).collect();

        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| normalized.iter().position(|h| h == alias))
        };
        let required = |aliases: &[&str]| {
            find(aliases).ok_or_else(|| anyhow!("missing required column '{}'", aliases[0]))
        };

        let mut schema = TripSchema {
            vendor_id: required(VENDOR_ID)?,
            pickup: required(PICKUP)?,
            dropoff: required(DROPOFF)?,
            trip_distance: required(TRIP_DISTANCE)?,
            fare_amount: required(FARE_AMOUNT)?,
            extra: required(EXTRA)?,
            mta_tax: required(MTA_TAX)?,
            tip_amount: required(TIP_AMOUNT)?,
            improvement_surcharge: required(IMPROVEMENT_SURCHARGE)?,
            total_amount: required(TOTAL_AMOUNT)?,
            payment_type: required(PAYMENT_TYPE)?,
            trip_type: find(TRIP_TYPE),
            ehail_fee: find(EHAIL_FEE),
            passthrough: Vec::new(),
            headers,
        };

        let known = schema.known_columns();
        schema.passthrough = (0..schema.headers.len())
            .filter(|i| !known.contains(i))
            .collect();
        Ok(schema)
    }

    fn known_columns(&self) -> Vec<usize> {
        let mut known = vec![
            self.vendor_id,
            self.pickup,
            self.dropoff,
            self.trip_distance,
            self.fare_amount,
            self.extra,
            self.mta_tax,
            self.tip_amount,
            self.improvement_surcharge,
            self.total_amount,
            self.payment_type,
        ];
        known.extend(self.trip_type);
        known.extend(self.ehail_fee);
        known
    }

    fn cell<'r>(&self, record: &'r StringRecord, column: usize) -> &'r str {
        record.get(column).unwrap_or("")
    }

    fn float(&self, record: &StringRecord, column: usize) -> Result<f64> {
        let value = self.cell(record, column);
        value.parse::<f64>().with_context(|| {
            format!("column '{}': invalid number {:?}", self.headers[column], value)
        })
    }

    fn integer(&self, record: &StringRecord, column: usize) -> Result<i64> {
        let value = self.cell(record, column);
        if let Ok(v) = value.parse::<i64>() {
            return Ok(v);
        }
        match value.parse::<f64>() {
            Ok(v) if v.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&v) => Ok(v as i64),
            _ => bail!(
                "column '{}': invalid integer {:?}",
                self.headers[column],
                value
            ),
        }
    }

    fn trip(&self, record: &StringRecord, origin: RecordOrigin) -> Result<RawTrip> {
        let trip_type = match self.trip_type {
            Some(c) if !self.cell(record, c).is_empty() => Some(self.integer(record, c)?),
            _ => None,
        };
        let ehail_fee = self
            .ehail_fee
            .and_then(|c| self.cell(record, c).parse::<f64>().ok());

        Ok(RawTrip {
            vendor_id: self.integer(record, self.vendor_id)?,
            trip_type,
            payment_type: self.integer(record, self.payment_type)?,
            pickup_datetime: self.cell(record, self.pickup).to_string(),
            dropoff_datetime: self.cell(record, self.dropoff).to_string(),
            trip_distance: self.float(record, self.trip_distance)?,
            fare_amount: self.float(record, self.fare_amount)?,
            extra: self.float(record, self.extra)?,
            mta_tax: self.float(record, self.mta_tax)?,
            tip_amount: self.float(record, self.tip_amount)?,
            improvement_surcharge: self.float(record, self.improvement_surcharge)?,
            total_amount: self.float(record, self.total_amount)?,
            ehail_fee,
            passthrough: self
                .passthrough
                .iter()
                .map(|&c| self.cell(record, c).to_string())
                .collect(),
            origin,
        })
    }
}

/// Parses comma-separated trip records with a header row.
///
/// # Errors
///
/// Returns an error if a required column is missing, a row has the wrong
/// number of fields, or a numeric cell does not parse. `name` identifies
/// the input in error messages and in each record's origin.
pub fn parse_trips(name: &str, bytes: &[u8]) -> Result<Vec<RawTrip>> {
    parse_trips_from(name, bytes)
}

/// Like [`parse_trips`], reading rows as they are pulled from `reader`.
pub fn parse_trips_from<R: Read>(name: &str, reader: R) -> Result<Vec<RawTrip>> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

    let header = rdr
        .headers()
        .with_context(|| format!("{name}: cannot read header row"))?
        .clone();
    let schema = TripSchema::resolve(&header).with_context(|| format!("{name}: bad header"))?;

    let object: Arc<str> = Arc::from(name);
    let mut trips = Vec::new();
    for result in rdr.records() {
        let record = result.with_context(|| format!("{name}: malformed row"))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let origin = RecordOrigin {
            object: Arc::clone(&object),
            line,
        };
        let trip = schema
            .trip(&record, origin)
            .with_context(|| format!("{name}: line {line}"))?;
        trips.push(trip);
    }

    Ok(trips)
}
