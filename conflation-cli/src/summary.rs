//! `summary` command: report progress without touching the map.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use conflation_data::progress;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{ARG_PROGRESS, CliError, ENV_SUMMARY_PROGRESS, require_file, write_json};

/// CLI arguments for the `summary` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Print per-state counts of a progress database as JSON. \
                 The database is only read.",
    about = "Summarise a progress store"
)]
#[ortho_config(prefix = "CONFLATE")]
pub(crate) struct SummaryArgs {
    /// Progress database written by a conflation run.
    #[arg(value_name = "progress")]
    #[serde(default)]
    pub(crate) progress: Option<Utf8PathBuf>,
}

impl SummaryArgs {
    pub(crate) fn into_config(self) -> Result<SummaryConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        SummaryConfig::try_from(merged)
    }
}

/// Resolved `summary` configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SummaryConfig {
    pub(crate) progress: Utf8PathBuf,
}

impl TryFrom<SummaryArgs> for SummaryConfig {
    type Error = CliError;

    fn try_from(args: SummaryArgs) -> Result<Self, Self::Error> {
        let progress = args.progress.ok_or(CliError::MissingArgument {
            field: ARG_PROGRESS,
            env: ENV_SUMMARY_PROGRESS,
        })?;
        Ok(Self { progress })
    }
}

pub(crate) fn run_summary(args: SummaryArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    let config = args.into_config()?;
    execute_summary(&config, &mut stdout)
}

pub(crate) fn execute_summary(
    config: &SummaryConfig,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    require_file(&config.progress, ARG_PROGRESS)?;
    let records = progress::read_records(&config.progress)?;
    write_json(writer, &records.summary())
}
