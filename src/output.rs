//! Reporting of run results.
//!
//! Supports pretty-printing and JSON serialization of the run summary, and
//! CSV export of fact rows for previews.

use std::io::Write;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use tracing::{debug, info};

use crate::pipeline::types::{RunSummary, WeeklyFact};

/// Logs the run summary using Rust's debug pretty-print format.
pub fn print_pretty(summary: &RunSummary) {
    debug!("{:#?}", summary);
}

/// Logs the run summary as pretty-printed JSON.
pub fn print_json(summary: &RunSummary) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

/// Writes the run summary as JSON to `path`, replacing any existing file.
pub fn write_summary(path: &str, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_vec_pretty(summary)?;
    std::fs::write(path, json).with_context(|| format!("cannot write summary to '{path}'"))?;
    debug!(path, "Run summary written");
    Ok(())
}

/// Writes fact rows as CSV with a header row.
pub fn write_facts_csv<W: Write>(writer: W, facts: &[WeeklyFact]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);
    for fact in facts {
        writer.serialize(fact)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn fact(trip_type: Option<i64>) -> WeeklyFact {
        WeeklyFact {
            vendor_id: 1,
            trip_type,
            payment_type: 2,
            pickup_week: 5,
            total_trip_distance: 8.0,
            avg_trip_distance: 4.0,
            total_fare_amount: 30.0,
            avg_fare_amount: 15.0,
            total_total_amount: 34.0,
            total_extra: 1.0,
            avg_extra: 0.5,
            total_mta_tax: 1.0,
            avg_tip_amount: 2.0,
            avg_improvement_surcharge: 0.3,
            generous_customer_count: 1,
            lucky_flg: true,
        }
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&RunSummary::default());
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&RunSummary::default()).unwrap();
    }

    #[test]
    fn test_write_summary_creates_file() {
        let path = temp_path("taxi_fact_table_test_summary.json");
        let _ = fs::remove_file(&path);

        let summary = RunSummary {
            groups: 4,
            ..RunSummary::default()
        };
        write_summary(&path, &summary).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["groups"], 4);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_facts_csv_writes_header_once() {
        let mut buf = Vec::new();
        write_facts_csv(&mut buf, &[fact(Some(1)), fact(None)]).unwrap();

        let content = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("vendor_id,trip_type,payment_type,pickup_week"));
        assert!(lines[0].ends_with("lucky_flg"));
        assert!(lines[1].starts_with("1,1,2,5,"));
        // absent trip type is an empty cell
        assert!(lines[2].starts_with("1,,2,5,"));
        assert!(lines[2].ends_with(",true"));
    }
}
