//! Command-line interface for conflating administrative boundaries.
//!
//! `conflate <input> <progress>` runs or resumes a conflation, `conflate
//! summary <progress>` reports progress and `conflate measure <input>
//! <output>` compares cadastre polygons with the map.
#![forbid(unsafe_code)]

use camino::Utf8Path;
use clap::{Parser, Subcommand};
use conflation_data::files;
use serde::Serialize;
use std::io::Write;

mod conflate;
mod error;
mod measure;
mod services;
mod summary;

pub use error::CliError;

use conflate::{RunArgs, run_conflate};
use measure::{MeasureArgs, run_measure};
use summary::{SummaryArgs, run_summary};

const ARG_INPUT: &str = "input";
const ARG_PROGRESS: &str = "progress";
const ARG_OUTPUT: &str = "output";
const ARG_OVERPASS_URL: &str = "overpass-url";
const ARG_OSM_API_URL: &str = "osm-api-url";
const ARG_OSM_TOKEN: &str = "osm-token";
const ARG_COUNTRY: &str = "country";
const ARG_ADMIN_LEVEL: &str = "admin-level";
const ARG_SOURCE_REFERENCE_KEY: &str = "source-reference-key";
const ARG_MAP_REFERENCE_KEY: &str = "map-reference-key";
const ARG_MAX_ENDPOINT_DISTANCE: &str = "max-endpoint-distance";
const ARG_UNGLUE: &str = "unglue";
const ARG_AUTO_PROCEED: &str = "auto-proceed";
const ARG_DRY_RUN: &str = "dry-run";
const ARG_CHANGESET_COMMENT: &str = "changeset-comment";
const ARG_CHANGESET_SOURCE: &str = "changeset-source";
const ARG_RETRY_DELAY: &str = "retry-delay";
const ARG_WAY_PAUSE: &str = "way-pause";
const ARG_WORKERS: &str = "workers";

const ENV_RUN_INPUT: &str = "CONFLATE_CMDS_RUN_INPUT";
const ENV_RUN_PROGRESS: &str = "CONFLATE_CMDS_RUN_PROGRESS";
const ENV_RUN_COUNTRY: &str = "CONFLATE_CMDS_RUN_COUNTRY";
const ENV_RUN_OSM_TOKEN: &str = "CONFLATE_CMDS_RUN_OSM_TOKEN";
const ENV_SUMMARY_PROGRESS: &str = "CONFLATE_CMDS_SUMMARY_PROGRESS";
const ENV_MEASURE_INPUT: &str = "CONFLATE_CMDS_MEASURE_INPUT";
const ENV_MEASURE_OUTPUT: &str = "CONFLATE_CMDS_MEASURE_OUTPUT";
const ENV_MEASURE_COUNTRY: &str = "CONFLATE_CMDS_MEASURE_COUNTRY";

/// Run the conflation CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns [`CliError`] for invalid arguments or configuration, unreadable
/// inputs and infrastructure failures. Per-way conflation failures are
/// recorded in the progress store and do not produce an error.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Some(Command::Summary(args)) => run_summary(args),
        Some(Command::Measure(args)) => run_measure(args),
        None => run_conflate(cli.run),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "conflate",
    about = "Align OpenStreetMap administrative boundaries with cadastre data",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Summarise a progress store.
    Summary(SummaryArgs),
    /// Measure how closely map boundaries follow the cadastre.
    Measure(MeasureArgs),
}

/// Fail unless `path` names an existing regular file.
fn require_file(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    match files::file_is_file(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CliError::SourcePathNotFile {
            field,
            path: path.to_path_buf(),
        }),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            Err(CliError::MissingSourceFile {
                field,
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(CliError::InspectSourcePath {
            field,
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write `value` as pretty JSON followed by a newline.
fn write_json<T: Serialize>(writer: &mut dyn Write, value: &T) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(value).map_err(CliError::SerializeReport)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteReport)?;
    writer.write_all(b"\n").map_err(CliError::WriteReport)?;
    Ok(())
}

#[cfg(test)]
mod tests;
