//! `measure` command: compare cadastre polygons with map boundaries.

use std::io::Write;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use conflation_core::RetryPolicy;
use conflation_core::settings::DEFAULT_SOURCE_REFERENCE_KEY;
use conflation_data::overpass::DEFAULT_ADMIN_LEVEL;
use conflation_data::{DEFAULT_OVERPASS_URL, MeasureOptions, OverpassConfig, load_dataset};
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::services::{RemoteServices, ServiceFactory};
use crate::{
    ARG_ADMIN_LEVEL, ARG_COUNTRY, ARG_INPUT, ARG_MAP_REFERENCE_KEY, ARG_OUTPUT, ARG_OVERPASS_URL,
    ARG_RETRY_DELAY, ARG_SOURCE_REFERENCE_KEY, ARG_WORKERS, CliError, ENV_MEASURE_COUNTRY,
    ENV_MEASURE_INPUT, ENV_MEASURE_OUTPUT, require_file, write_json,
};

/// Worker threads used when none are configured.
const DEFAULT_WORKERS: usize = 4;

/// CLI arguments for the `measure` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Measure the overlap between every cadastre entity and its \
                 map relation. Results are appended to the output JSON file; \
                 entities already present there are skipped.",
    about = "Measure how closely map boundaries follow the cadastre"
)]
#[ortho_config(prefix = "CONFLATE")]
pub(crate) struct MeasureArgs {
    /// Cadastre boundary file (`.osm` or `.pbf`).
    #[arg(value_name = "input")]
    #[serde(default)]
    pub(crate) input: Option<Utf8PathBuf>,
    /// JSON file receiving the measurements.
    #[arg(value_name = "output")]
    #[serde(default)]
    pub(crate) output: Option<Utf8PathBuf>,
    /// Overpass interpreter endpoint.
    #[arg(long = ARG_OVERPASS_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) overpass_url: Option<String>,
    /// Name of the country area scoping map queries.
    #[arg(long = ARG_COUNTRY, value_name = "name")]
    #[serde(default)]
    pub(crate) country: Option<String>,
    /// Admin level of the measured entities.
    #[arg(long = ARG_ADMIN_LEVEL, value_name = "level")]
    #[serde(default)]
    pub(crate) admin_level: Option<u8>,
    /// Cadastre relation tag holding the entity reference.
    #[arg(long = ARG_SOURCE_REFERENCE_KEY, value_name = "key")]
    #[serde(default)]
    pub(crate) source_reference_key: Option<String>,
    /// Map relation tag holding the entity reference.
    #[arg(long = ARG_MAP_REFERENCE_KEY, value_name = "key")]
    #[serde(default)]
    pub(crate) map_reference_key: Option<String>,
    /// Concurrent boundary queries.
    #[arg(long = ARG_WORKERS, value_name = "count")]
    #[serde(default)]
    pub(crate) workers: Option<usize>,
    /// Seconds between retries of a failed query.
    #[arg(long = ARG_RETRY_DELAY, value_name = "seconds")]
    #[serde(default)]
    pub(crate) retry_delay: Option<u64>,
}

impl MeasureArgs {
    pub(crate) fn into_config(self) -> Result<MeasureConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        MeasureConfig::try_from(merged)
    }
}

/// Resolved `measure` configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MeasureConfig {
    pub(crate) input: Utf8PathBuf,
    pub(crate) output: Utf8PathBuf,
    pub(crate) overpass: OverpassConfig,
    pub(crate) options: MeasureOptions,
}

impl TryFrom<MeasureArgs> for MeasureConfig {
    type Error = CliError;

    fn try_from(args: MeasureArgs) -> Result<Self, Self::Error> {
        let input = args.input.ok_or(CliError::MissingArgument {
            field: ARG_INPUT,
            env: ENV_MEASURE_INPUT,
        })?;
        let output = args.output.ok_or(CliError::MissingArgument {
            field: ARG_OUTPUT,
            env: ENV_MEASURE_OUTPUT,
        })?;
        let country = args.country.ok_or(CliError::MissingArgument {
            field: ARG_COUNTRY,
            env: ENV_MEASURE_COUNTRY,
        })?;
        let workers = args.workers.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(CliError::InvalidSetting {
                field: ARG_WORKERS,
                reason: "expected at least one worker",
            });
        }

        let reference_key = args
            .source_reference_key
            .unwrap_or_else(|| DEFAULT_SOURCE_REFERENCE_KEY.to_owned());
        let map_key = args
            .map_reference_key
            .unwrap_or_else(|| reference_key.clone());
        let overpass = OverpassConfig::new(
            args.overpass_url
                .unwrap_or_else(|| DEFAULT_OVERPASS_URL.to_owned()),
            country,
            map_key,
        )
        .with_admin_level(args.admin_level.unwrap_or(DEFAULT_ADMIN_LEVEL));

        let mut retry = RetryPolicy::default();
        if let Some(seconds) = args.retry_delay {
            retry = retry.with_delay(Duration::from_secs(seconds));
        }

        Ok(Self {
            input,
            output,
            overpass,
            options: MeasureOptions {
                workers,
                reference_key,
                retry,
            },
        })
    }
}

/// Counts printed once the measurement finishes.
#[derive(Debug, Serialize)]
struct MeasureOutcome<'a> {
    output: &'a str,
    entities: usize,
    previously_measured: usize,
    measured: usize,
    skipped: usize,
}

pub(crate) fn run_measure(args: MeasureArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    let config = args.into_config()?;
    execute_measure(&config, &RemoteServices, &mut stdout)
}

pub(crate) fn execute_measure(
    config: &MeasureConfig,
    factory: &dyn ServiceFactory,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    require_file(&config.input, ARG_INPUT)?;
    let dataset = load_dataset(&config.input)?;
    let query = factory.query(&config.overpass)?;
    let report = conflation_data::run_measurement(
        query.as_ref(),
        &dataset,
        &config.options,
        &config.output,
    )?;
    info!("measurements saved to {}", config.output);

    write_json(
        writer,
        &MeasureOutcome {
            output: config.output.as_str(),
            entities: report.entities,
            previously_measured: report.previous,
            measured: report.measured,
            skipped: report.skipped,
        },
    )
}
