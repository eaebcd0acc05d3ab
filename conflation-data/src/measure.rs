//! Parallel quality measurement over every cadastre entity.
//!
//! Each entity is measured by its own task on a bounded `rayon` pool and the
//! task returns its record; the driver merges them with the results of
//! earlier runs. Entities already present in the output file are skipped,
//! so an interrupted measurement resumes where it stopped.

use camino::{Utf8Path, Utf8PathBuf};
use conflation_core::quality::{measurable_entities, merge_records, unmeasured_entities};
use conflation_core::{
    AdminEntity, GeoQueryService, QualityError, QualityRecord, RetryPolicy, SourceDataset,
    measure_entity,
};
use log::{info, warn};
use rayon::ThreadPoolBuildError;
use rayon::prelude::*;
use thiserror::Error;

use crate::files;

/// Errors raised by the measurement driver.
#[derive(Debug, Error)]
pub enum MeasureError {
    /// The worker pool could not be built.
    #[error("failed to build measurement worker pool")]
    Pool(#[source] ThreadPoolBuildError),
    /// Previous results exist but cannot be read.
    #[error("failed to read previous results from {path}")]
    ReadPrevious {
        /// Output file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Previous results are not a JSON array of records.
    #[error("previous results in {path} are invalid")]
    DecodePrevious {
        /// Output file.
        path: Utf8PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Serializing results failed.
    #[error("failed to serialize measurement results")]
    Encode(#[source] serde_json::Error),
    /// Writing results failed.
    #[error("failed to write measurement results to {path}")]
    Write {
        /// Output file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Measuring an entity failed permanently.
    #[error("measuring {label} failed")]
    Entity {
        /// Entity label.
        label: String,
        /// Measurement failure.
        #[source]
        source: QualityError,
    },
}

/// Options for [`run_measurement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureOptions {
    /// Worker threads; `0` lets `rayon` choose.
    pub workers: usize,
    /// Tag on cadastre relations holding the entity reference.
    pub reference_key: String,
    /// Retry policy applied to each boundary query.
    pub retry: RetryPolicy,
}

/// Counts reported by [`run_measurement`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeasureReport {
    /// Entities carrying a reference.
    pub entities: usize,
    /// Records loaded from an earlier run.
    pub previous: usize,
    /// Entities measured in this run.
    pub measured: usize,
    /// Entities skipped because their cadastre geometry is broken.
    pub skipped: usize,
}

/// Read earlier results; a missing file means none.
///
/// # Errors
///
/// Returns [`MeasureError`] if the file exists but cannot be read or decoded.
pub fn load_previous(path: &Utf8Path) -> Result<Vec<QualityRecord>, MeasureError> {
    let read_error = |source| MeasureError::ReadPrevious {
        path: path.to_path_buf(),
        source,
    };
    if !files::file_exists(path).map_err(read_error)? {
        return Ok(Vec::new());
    }
    let contents = files::read_to_string(path).map_err(read_error)?;
    serde_json::from_str(&contents).map_err(|source| MeasureError::DecodePrevious {
        path: path.to_path_buf(),
        source,
    })
}

/// Write records as a pretty JSON array.
///
/// # Errors
///
/// Returns [`MeasureError`] if serialization or the write fails.
pub fn write_records(path: &Utf8Path, records: &[QualityRecord]) -> Result<(), MeasureError> {
    let json = serde_json::to_string_pretty(records).map_err(MeasureError::Encode)?;
    files::write_string(path, &json).map_err(|source| MeasureError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Measure `entities` on a pool of `workers` threads.
///
/// Results come back in input order, one per entity.
///
/// # Errors
///
/// Returns [`MeasureError::Pool`] if the pool cannot be built.
pub fn measure_entities(
    query: &(dyn GeoQueryService + Sync),
    retry: &RetryPolicy,
    dataset: &SourceDataset,
    entities: &[AdminEntity],
    workers: usize,
) -> Result<Vec<Result<QualityRecord, QualityError>>, MeasureError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(MeasureError::Pool)?;
    let total = entities.len();
    Ok(pool.install(|| {
        entities
            .par_iter()
            .enumerate()
            .map(|(index, entity)| {
                info!("measuring {} ({}/{total})", entity.label(), index + 1);
                measure_entity(query, retry, dataset, entity)
            })
            .collect()
    }))
}

/// Measure every unmeasured entity of `dataset` and save all results.
///
/// Records measured before a permanent query failure are still saved.
/// Entities with broken cadastre geometry are skipped with a warning and
/// retried by the next run.
///
/// # Errors
///
/// Returns [`MeasureError`] if earlier results cannot be read, the output
/// cannot be written, or a query fails permanently.
pub fn run_measurement(
    query: &(dyn GeoQueryService + Sync),
    dataset: &SourceDataset,
    options: &MeasureOptions,
    output: &Utf8Path,
) -> Result<MeasureReport, MeasureError> {
    let previous = load_previous(output)?;
    let entities = measurable_entities(dataset, &options.reference_key);
    let mut report = MeasureReport {
        entities: entities.len(),
        previous: previous.len(),
        ..MeasureReport::default()
    };
    let pending = unmeasured_entities(entities, &previous);
    info!(
        "{} entities, {} already measured, {} to go",
        report.entities,
        report.previous,
        pending.len()
    );

    let results = measure_entities(query, &options.retry, dataset, &pending, options.workers)?;
    let mut fresh = Vec::with_capacity(results.len());
    let mut fatal = None;
    for (entity, result) in pending.iter().zip(results) {
        match result {
            Ok(record) => fresh.push(record),
            Err(err @ (QualityError::Cadastre { .. } | QualityError::UnknownRelation { .. })) => {
                warn!("skipping {}: {err}", entity.label());
                report.skipped += 1;
            }
            Err(source) => {
                fatal.get_or_insert(MeasureError::Entity {
                    label: entity.label(),
                    source,
                });
            }
        }
    }
    report.measured = fresh.len();

    write_records(output, &merge_records(previous, fresh))?;
    match fatal {
        Some(err) => Err(err),
        None => Ok(report),
    }
}
