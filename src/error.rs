//! Error taxonomy for a pipeline run.
//!
//! Collaborators (sources, sinks, config loading) report failures through
//! [`anyhow`]; the runner wraps them into a [`PipelineError`] so the caller
//! can tell which stage of the run failed.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// The step of a run an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Config,
    Read,
    Clean,
    Flag,
    Aggregate,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Read => "read",
            Stage::Clean => "clean",
            Stage::Flag => "flag",
            Stage::Aggregate => "aggregate",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

/// Fatal conditions of a run. Every variant aborts the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0:#}")]
    Config(anyhow::Error),

    /// The input could not be acquired: unreachable source, missing
    /// columns, or malformed cells.
    #[error("input acquisition failed: {0:#}")]
    Input(anyhow::Error),

    /// A timestamp did not match any accepted format. `location` is the
    /// file and line, or the record number for in-memory input.
    #[error("cannot parse {field} timestamp {value:?} at {location}")]
    Parse {
        field: &'static str,
        value: String,
        location: String,
    },

    /// Nothing survived the fare filter, so the mean tip is undefined.
    #[error("no eligible records: no data to aggregate after the fare filter")]
    NoEligibleRecords,

    /// Grouping produced no rows, so the mean generous count is undefined.
    #[error("no groups: the fact table would be empty")]
    NoGroups,

    /// The fact table could not be persisted.
    #[error("output persistence failed: {0:#}")]
    Output(anyhow::Error),

    /// The worker pool for the core could not be started.
    #[error("cannot start worker pool: {0}")]
    WorkerPool(String),
}

impl PipelineError {
    /// Returns the stage this error aborted.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Config(_) | PipelineError::WorkerPool(_) => Stage::Config,
            PipelineError::Input(_) => Stage::Read,
            PipelineError::Parse { .. } => Stage::Clean,
            PipelineError::NoEligibleRecords => Stage::Flag,
            PipelineError::NoGroups => Stage::Aggregate,
            PipelineError::Output(_) => Stage::Write,
        }
    }
}
