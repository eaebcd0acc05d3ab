//! Error types emitted by the conflation CLI.
//!
//! Keep this error type reasonably small, as every command returns
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use conflation_core::ConflateError;
use conflation_data::{
    MeasureError, OsmApiError, OverpassError, ProgressStoreError, SourceLoadError,
};
use thiserror::Error;

/// Errors emitted by the conflation CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// A setting is outside its accepted range.
    #[error("invalid {field}: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: &'static str,
    },
    /// A referenced input path does not exist on disk.
    #[error("{field} path {path:?} does not exist")]
    MissingSourceFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path exists but is not a file.
    #[error("{field} path {path:?} exists but is not a file")]
    SourcePathNotFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The cadastre file could not be loaded.
    #[error(transparent)]
    LoadSource(#[from] SourceLoadError),
    /// The progress store could not be opened, read or written.
    #[error(transparent)]
    Progress(#[from] ProgressStoreError),
    /// Building the Overpass client failed.
    #[error("failed to build Overpass client: {0}")]
    BuildOverpass(#[from] OverpassError),
    /// Building the OSM API client failed.
    #[error("failed to build OSM API client: {0}")]
    BuildOsmApi(#[from] OsmApiError),
    /// The conflation run stopped on an infrastructure failure.
    #[error("conflation stopped: {0}")]
    Conflate(#[source] Box<ConflateError>),
    /// Quality measurement failed.
    #[error("measurement failed: {0}")]
    Measure(#[source] Box<MeasureError>),
    /// Serializing a report failed.
    #[error("failed to serialize report: {0}")]
    SerializeReport(#[source] serde_json::Error),
    /// Writing a report failed.
    #[error("failed to write report: {0}")]
    WriteReport(#[source] std::io::Error),
}

impl From<ConflateError> for CliError {
    fn from(err: ConflateError) -> Self {
        Self::Conflate(Box::new(err))
    }
}

impl From<MeasureError> for CliError {
    fn from(err: MeasureError) -> Self {
        Self::Measure(Box::new(err))
    }
}
