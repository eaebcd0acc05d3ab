//! Default command: run or resume a conflation.

use std::io::Write;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use conflation_core::settings::DEFAULT_SOURCE_REFERENCE_KEY;
use conflation_core::{
    AutoApprove, ConfirmationGate, ConflationSettings, RejectUnconfirmed, RetryPolicy, Services,
    run_conflation,
};
use conflation_data::overpass::DEFAULT_ADMIN_LEVEL;
use conflation_data::{
    DEFAULT_OSM_API_URL, DEFAULT_OVERPASS_URL, OsmApiConfig, OverpassConfig, load_dataset,
    progress,
};
use log::{info, warn};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::services::{RemoteServices, ServiceFactory};
use crate::{
    ARG_ADMIN_LEVEL, ARG_AUTO_PROCEED, ARG_CHANGESET_COMMENT, ARG_CHANGESET_SOURCE, ARG_COUNTRY,
    ARG_DRY_RUN, ARG_INPUT, ARG_MAP_REFERENCE_KEY, ARG_MAX_ENDPOINT_DISTANCE, ARG_OSM_API_URL,
    ARG_OSM_TOKEN, ARG_OVERPASS_URL, ARG_PROGRESS, ARG_RETRY_DELAY, ARG_SOURCE_REFERENCE_KEY,
    ARG_UNGLUE, ARG_WAY_PAUSE, CliError, ENV_RUN_COUNTRY, ENV_RUN_INPUT, ENV_RUN_OSM_TOKEN,
    ENV_RUN_PROGRESS, require_file, write_json,
};

/// Conflate cadastre boundary ways with the map, resuming from a progress
/// store.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(name = "run")]
#[ortho_config(prefix = "CONFLATE")]
pub(crate) struct RunArgs {
    /// Cadastre boundary file (`.osm` or `.pbf`).
    #[arg(value_name = "input")]
    #[serde(default)]
    pub(crate) input: Option<Utf8PathBuf>,
    /// Progress database; created when missing.
    #[arg(value_name = "progress")]
    #[serde(default)]
    pub(crate) progress: Option<Utf8PathBuf>,
    /// Overpass interpreter endpoint.
    #[arg(long = ARG_OVERPASS_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) overpass_url: Option<String>,
    /// OSM API 0.6 root.
    #[arg(long = ARG_OSM_API_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) osm_api_url: Option<String>,
    /// OAuth 2 bearer token used for uploads.
    #[arg(long = ARG_OSM_TOKEN, value_name = "token")]
    #[serde(default)]
    pub(crate) osm_token: Option<String>,
    /// Name of the country area scoping map queries.
    #[arg(long = ARG_COUNTRY, value_name = "name")]
    #[serde(default)]
    pub(crate) country: Option<String>,
    /// Admin level of the conflated entities.
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
    /// Largest accepted endpoint displacement, in metres.
    #[arg(long = ARG_MAX_ENDPOINT_DISTANCE, value_name = "metres")]
    #[serde(default)]
    pub(crate) max_endpoint_distance: Option<f64>,
    /// Separate shared nodes from non-boundary ways when needed.
    #[arg(
        long = ARG_UNGLUE,
        value_name = "bool",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    #[serde(default)]
    pub(crate) unglue: Option<bool>,
    /// Approve uncertain matches instead of leaving them for review.
    #[arg(
        long = ARG_AUTO_PROCEED,
        value_name = "bool",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    #[serde(default)]
    pub(crate) auto_proceed: Option<bool>,
    /// Compute edits without uploading them.
    #[arg(
        long = ARG_DRY_RUN,
        value_name = "bool",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    #[serde(default)]
    pub(crate) dry_run: Option<bool>,
    /// Changeset comment.
    #[arg(long = ARG_CHANGESET_COMMENT, value_name = "text")]
    #[serde(default)]
    pub(crate) changeset_comment: Option<String>,
    /// Changeset source tag.
    #[arg(long = ARG_CHANGESET_SOURCE, value_name = "text")]
    #[serde(default)]
    pub(crate) changeset_source: Option<String>,
    /// Seconds between retries of a failed remote call.
    #[arg(long = ARG_RETRY_DELAY, value_name = "seconds")]
    #[serde(default)]
    pub(crate) retry_delay: Option<u64>,
    /// Seconds to pause between ways.
    #[arg(long = ARG_WAY_PAUSE, value_name = "seconds")]
    #[serde(default)]
    pub(crate) way_pause: Option<u64>,
}

impl RunArgs {
    pub(crate) fn into_config(self) -> Result<RunConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        RunConfig::try_from(merged)
    }
}

/// Resolved configuration of a conflation run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunConfig {
    /// Cadastre boundary file.
    pub(crate) input: Utf8PathBuf,
    /// Progress database.
    pub(crate) progress: Utf8PathBuf,
    /// Spatial query service settings.
    pub(crate) overpass: OverpassConfig,
    /// Edit service settings.
    pub(crate) osm_api: OsmApiConfig,
    /// Pipeline settings.
    pub(crate) settings: ConflationSettings,
    /// Retry policy for remote calls.
    pub(crate) retry: RetryPolicy,
    /// Approve confirmation requests without review.
    pub(crate) auto_proceed: bool,
}

impl TryFrom<RunArgs> for RunConfig {
    type Error = CliError;

    fn try_from(args: RunArgs) -> Result<Self, Self::Error> {
        let input = args.input.ok_or(CliError::MissingArgument {
            field: ARG_INPUT,
            env: ENV_RUN_INPUT,
        })?;
        let progress = args.progress.ok_or(CliError::MissingArgument {
            field: ARG_PROGRESS,
            env: ENV_RUN_PROGRESS,
        })?;
        let country = args.country.ok_or(CliError::MissingArgument {
            field: ARG_COUNTRY,
            env: ENV_RUN_COUNTRY,
        })?;
        let dry_run = args.dry_run.unwrap_or(false);
        if !dry_run && args.osm_token.is_none() {
            return Err(CliError::MissingArgument {
                field: ARG_OSM_TOKEN,
                env: ENV_RUN_OSM_TOKEN,
            });
        }

        let source_key = args
            .source_reference_key
            .unwrap_or_else(|| DEFAULT_SOURCE_REFERENCE_KEY.to_owned());
        let map_key = args.map_reference_key.unwrap_or_else(|| source_key.clone());
        let overpass = OverpassConfig::new(
            args.overpass_url
                .unwrap_or_else(|| DEFAULT_OVERPASS_URL.to_owned()),
            country,
            map_key,
        )
        .with_admin_level(args.admin_level.unwrap_or(DEFAULT_ADMIN_LEVEL));

        let mut osm_api = OsmApiConfig::new(
            args.osm_api_url
                .unwrap_or_else(|| DEFAULT_OSM_API_URL.to_owned()),
        );
        if let Some(token) = args.osm_token {
            osm_api = osm_api.with_token(token);
        }
        if let Some(comment) = args.changeset_comment {
            osm_api = osm_api.with_comment(comment);
        }
        if let Some(source) = args.changeset_source {
            osm_api = osm_api.with_source(source);
        }

        let mut settings = ConflationSettings::default()
            .with_source_reference_key(source_key)
            .with_unglue_ways_as_needed(args.unglue.unwrap_or(false))
            .with_dry_run(dry_run);
        if let Some(metres) = args.max_endpoint_distance {
            if !metres.is_finite() || metres <= 0.0 {
                return Err(CliError::InvalidSetting {
                    field: ARG_MAX_ENDPOINT_DISTANCE,
                    reason: "expected a positive number of metres",
                });
            }
            settings = settings.with_max_endpoint_distance_m(metres);
        }
        if let Some(seconds) = args.way_pause {
            settings = settings.with_way_pause(Duration::from_secs(seconds));
        }

        let mut retry = RetryPolicy::default();
        if let Some(seconds) = args.retry_delay {
            retry = retry.with_delay(Duration::from_secs(seconds));
        }

        Ok(Self {
            input,
            progress,
            overpass,
            osm_api,
            settings,
            retry,
            auto_proceed: args.auto_proceed.unwrap_or(false),
        })
    }
}

pub(crate) fn run_conflate(args: RunArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    let config = args.into_config()?;
    execute_conflate(&config, &RemoteServices, &mut stdout)
}

/// Run the pipeline described by `config` and write the progress summary.
pub(crate) fn execute_conflate(
    config: &RunConfig,
    factory: &dyn ServiceFactory,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    require_file(&config.input, ARG_INPUT)?;
    let dataset = load_dataset(&config.input)?;
    let (mut store, mut records) = progress::load(&config.progress, &dataset)?;

    let query = factory.query(&config.overpass)?;
    let mut edit = factory.edit(&config.osm_api)?;
    let gate: &dyn ConfirmationGate = if config.auto_proceed {
        &AutoApprove
    } else {
        &RejectUnconfirmed
    };
    if config.settings.dry_run {
        info!("dry run: no changes will be uploaded");
    }

    let mut services = Services {
        query: query.as_ref(),
        edit: edit.as_mut(),
        gate,
        retry: config.retry,
    };
    let report = run_conflation(
        &dataset,
        &mut records,
        &mut services,
        &config.settings,
        &mut store,
    )?;
    info!(
        "attempted {} ways; progress saved to {}",
        report.attempted(),
        store.path()
    );
    if report.stopped_early {
        warn!("run stopped before every pending way was attempted");
    }

    write_json(writer, &records.summary())
}
