//! CLI entry point for the weekly taxi fact table job.
//!
//! Provides subcommands for a full run (read, transform, write Parquet) and
//! for previewing the fact table as CSV without touching the output sink.

use std::ffi::OsStr;
use std::path::Path;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use taxi_fact_table::config::{BadTimestampPolicy, PipelineConfig};
use taxi_fact_table::error::PipelineError;
use taxi_fact_table::output::{print_json, print_pretty, write_facts_csv, write_summary};
use taxi_fact_table::pipeline::runner::{compute, run};
use taxi_fact_table::pipeline::types::RunSummary;
use taxi_fact_table::sink::open_sink;
use taxi_fact_table::source::{TripSource, open_source};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "taxi_fact_table")]
#[command(about = "Builds a weekly fact table from raw taxi trip records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CoreArgs {
    /// Trip files: local file, directory or glob, or s3:// URI (repeatable)
    #[arg(short, long = "input", value_name = "PATH_OR_URI", env = "TAXI_INPUT", value_delimiter = ',', required = true)]
    inputs: Vec<String>,

    /// JSON pipeline configuration file
    #[arg(short, long, env = "TAXI_CONFIG")]
    config: Option<String>,

    /// Drop records with unparsable timestamps instead of failing the run
    #[arg(long, default_value_t = false)]
    skip_bad_timestamps: bool,

    /// Worker threads for the transformation (0 = one per core)
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the fact table and overwrite the output with Parquet
    Run {
        #[command(flatten)]
        core: CoreArgs,

        /// Output directory, .parquet file, or s3:// URI
        #[arg(short, long, value_name = "PATH_OR_URI", env = "TAXI_OUTPUT")]
        output: String,

        /// Optional: write the run summary as JSON to this file
        #[arg(long)]
        summary: Option<String>,
    },
    /// Build the fact table and print it as CSV; no output is written
    Preview {
        #[command(flatten)]
        core: CoreArgs,

        /// CSV file to write instead of stdout
        #[arg(short, long)]
        output: Option<String>,

        /// Only emit the first N rows
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            core,
            output,
            summary,
        } => run_command(&core, &output, summary.as_deref()).await,
        Commands::Preview {
            core,
            output,
            limit,
        } => preview_command(&core, output.as_deref(), limit).await,
    };

    match result {
        Ok(summary) => {
            print_pretty(&summary);
            if let Err(e) = print_json(&summary) {
                warn!(error = %e, "Cannot render run summary");
            }
            info!("Pipeline completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(stage = %e.stage(), error = %e, "Pipeline failed");
            ExitCode::FAILURE
        }
    }
}

/// Logging setup: colored stderr + JSON rolling log file
fn init_logging() -> WorkerGuard {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/taxi_fact_table.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("taxi_fact_table.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive(LevelFilter::INFO.into()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive(LevelFilter::DEBUG.into()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    file_guard
}

fn load_config(core: &CoreArgs) -> Result<PipelineConfig, PipelineError> {
    let mut config = match &core.config {
        Some(path) => PipelineConfig::load(path).map_err(PipelineError::Config)?,
        None => PipelineConfig::default(),
    };
    if core.skip_bad_timestamps {
        config.on_bad_timestamp = BadTimestampPolicy::Skip;
    }
    if let Some(threads) = core.threads {
        config.threads = threads;
    }
    config.validate().map_err(PipelineError::Config)?;
    Ok(config)
}

async fn open_sources(inputs: &[String]) -> Result<Vec<Box<dyn TripSource>>, PipelineError> {
    let mut sources = Vec::with_capacity(inputs.len());
    for input in inputs {
        sources.push(open_source(input).await.map_err(PipelineError::Input)?);
    }
    Ok(sources)
}

#[tracing::instrument(skip(core, summary_path))]
async fn run_command(
    core: &CoreArgs,
    output: &str,
    summary_path: Option<&str>,
) -> Result<RunSummary, PipelineError> {
    let config = load_config(core)?;
    let sources = open_sources(&core.inputs).await?;
    let sink = open_sink(output).await.map_err(PipelineError::Output)?;

    let summary = run(&sources, sink.as_ref(), &config).await?;

    if let Some(path) = summary_path {
        write_summary(path, &summary).map_err(PipelineError::Output)?;
    }
    Ok(summary)
}

#[tracing::instrument(skip(core))]
async fn preview_command(
    core: &CoreArgs,
    output: Option<&str>,
    limit: Option<usize>,
) -> Result<RunSummary, PipelineError> {
    let config = load_config(core)?;
    let sources = open_sources(&core.inputs).await?;

    let result = compute(&sources, &config).await?;
    let rows = &result.facts[..limit.unwrap_or(usize::MAX).min(result.facts.len())];

    let written = match output {
        Some(path) => std::fs::File::create(path)
            .map_err(anyhow::Error::from)
            .and_then(|file| write_facts_csv(file, rows)),
        None => write_facts_csv(std::io::stdout().lock(), rows),
    };
    written.map_err(PipelineError::Output)?;

    Ok(result.summary)
}
