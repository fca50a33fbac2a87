//! Weekly fact table transformation.
//!
//! Trips flow through three stages, each producing a new record set:
//! the cleaner deduplicates and derives calendar attributes, the flagger
//! drops zero fares and tags generous tips against the mean tip, and the
//! aggregator groups by vendor, trip type, payment type and pickup week
//! and tags lucky groups against the mean generous count.

pub mod aggregate;
pub mod clean;
pub mod flag;
pub mod runner;
pub mod statistic;
pub mod types;
