//! Parquet encoding of the weekly fact table.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use parquet::basic::{Compression, Repetition, Type as PhysicalType};
use parquet::column::writer::ColumnWriter;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::Type;

use crate::pipeline::types::WeeklyFact;

enum ColumnValues {
    Int64(Vec<i64>),
    /// Non-null values plus one definition level per row.
    OptionalInt64(Vec<i64>, Vec<i16>),
    Int32(Vec<i32>),
    Double(Vec<f64>),
    Boolean(Vec<bool>),
}

impl ColumnValues {
    fn physical_type(&self) -> PhysicalType {
        match self {
            ColumnValues::Int64(_) | ColumnValues::OptionalInt64(..) => PhysicalType::INT64,
            ColumnValues::Int32(_) => PhysicalType::INT32,
            ColumnValues::Double(_) => PhysicalType::DOUBLE,
            ColumnValues::Boolean(_) => PhysicalType::BOOLEAN,
        }
    }

    fn repetition(&self) -> Repetition {
        match self {
            ColumnValues::OptionalInt64(..) => Repetition::OPTIONAL,
            _ => Repetition::REQUIRED,
        }
    }
}

fn doubles(facts: &[WeeklyFact], f: impl Fn(&WeeklyFact) -> f64) -> ColumnValues {
    ColumnValues::Double(facts.iter().map(f).collect())
}

/// Column names and values, in file order.
fn columns(facts: &[WeeklyFact]) -> Vec<(&'static str, ColumnValues)> {
    let trip_types: Vec<i64> = facts.iter().filter_map(|f| f.trip_type).collect();
    let trip_type_levels: Vec<i16> = facts
        .iter()
        .map(|f| i16::from(f.trip_type.is_some()))
        .collect();

    vec![
        (
            "vendor_id",
            ColumnValues::Int64(facts.iter().map(|f| f.vendor_id).collect()),
        ),
        (
            "trip_type",
            ColumnValues::OptionalInt64(trip_types, trip_type_levels),
        ),
        (
            "payment_type",
            ColumnValues::Int64(facts.iter().map(|f| f.payment_type).collect()),
        ),
        (
            "pickup_week",
            ColumnValues::Int32(facts.iter().map(|f| f.pickup_week as i32).collect()),
        ),
        ("total_trip_distance", doubles(facts, |f| f.total_trip_distance)),
        ("avg_trip_distance", doubles(facts, |f| f.avg_trip_distance)),
        ("total_fare_amount", doubles(facts, |f| f.total_fare_amount)),
        ("avg_fare_amount", doubles(facts, |f| f.avg_fare_amount)),
        ("total_total_amount", doubles(facts, |f| f.total_total_amount)),
        ("total_extra", doubles(facts, |f| f.total_extra)),
        ("avg_extra", doubles(facts, |f| f.avg_extra)),
        ("total_mta_tax", doubles(facts, |f| f.total_mta_tax)),
        ("avg_tip_amount", doubles(facts, |f| f.avg_tip_amount)),
        (
            "avg_improvement_surcharge",
            doubles(facts, |f| f.avg_improvement_surcharge),
        ),
        (
            "generous_customer_count",
            ColumnValues::Int64(
                facts
                    .iter()
                    .map(|f| f.generous_customer_count as i64)
                    .collect(),
            ),
        ),
        (
            "lucky_flg",
            ColumnValues::Boolean(facts.iter().map(|f| f.lucky_flg).collect()),
        ),
    ]
}

/// Encodes the fact table as a single-row-group, Snappy-compressed Parquet file.
pub fn encode_parquet(facts: &[WeeklyFact]) -> Result<Bytes> {
    let columns = columns(facts);

    let mut fields = Vec::with_capacity(columns.len());
    for (name, values) in &columns {
        let field = Type::primitive_type_builder(name, values.physical_type())
            .with_repetition(values.repetition())
            .build()
            .with_context(|| format!("build parquet schema for column '{name}'"))?;
        fields.push(Arc::new(field));
    }
    let schema = Arc::new(
        Type::group_type_builder("weekly_fact")
            .with_fields(fields)
            .build()
            .context("build parquet schema")?,
    );

    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build(),
    );
    let mut writer = SerializedFileWriter::new(Vec::new(), schema, props)
        .context("create parquet writer")?;
    let mut row_group = writer.next_row_group().context("open parquet row group")?;

    let mut columns = columns.into_iter();
    while let Some(mut column_writer) = row_group.next_column().context("open parquet column")? {
        let Some((name, values)) = columns.next() else {
            bail!("parquet schema has more columns than values");
        };
        let written = match (column_writer.untyped(), &values) {
            (ColumnWriter::Int64ColumnWriter(typed), ColumnValues::Int64(v)) => {
                typed.write_batch(v, None, None)
            }
            (ColumnWriter::Int64ColumnWriter(typed), ColumnValues::OptionalInt64(v, levels)) => {
                typed.write_batch(v, Some(levels.as_slice()), None)
            }
            (ColumnWriter::Int32ColumnWriter(typed), ColumnValues::Int32(v)) => {
                typed.write_batch(v, None, None)
            }
            (ColumnWriter::DoubleColumnWriter(typed), ColumnValues::Double(v)) => {
                typed.write_batch(v, None, None)
            }
            (ColumnWriter::BoolColumnWriter(typed), ColumnValues::Boolean(v)) => {
                typed.write_batch(v, None, None)
            }
            _ => bail!("unexpected parquet column type for '{name}'"),
        };
        written.with_context(|| format!("write parquet column '{name}'"))?;
        column_writer
            .close()
            .with_context(|| format!("close parquet column '{name}'"))?;
    }

    row_group.close().context("close parquet row group")?;
    let buf = writer.into_inner().context("close parquet writer")?;
    Ok(Bytes::from(buf))
}
