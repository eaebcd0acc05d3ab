//! The resumable per-way conflation loop.
//!
//! Pending ways are processed highest id first. Each attempt ends in exactly
//! one [`ProcessingState`]; the record and a full snapshot are persisted
//! before the next way starts, so an interrupted run resumes where it
//! stopped.

use std::collections::BTreeMap;
use std::thread;

use log::{info, warn};

use crate::aligner::align;
use crate::eligibility::{Eligibility, check_eligibility};
use crate::error::ConflateError;
use crate::gate::ConfirmationRequest;
use crate::matcher::{MatchOutcome, find_candidate};
use crate::resolver::{Ownership, ResolveError, resolve_entities};
use crate::services::Services;
use crate::settings::ConflationSettings;
use crate::source::SourceDataset;
use crate::state::{Outcome, ProcessingRecord, ProcessingState, RecordSet};

/// Durable storage for processing records.
///
/// Both operations must be safe to call after every way.
pub trait ProgressSink {
    /// Error reported by the backing store.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Upsert the record of a single way.
    ///
    /// # Errors
    ///
    /// Returns the store's error when the write fails.
    fn persist_record(&mut self, way_id: i64, record: &ProcessingRecord)
    -> Result<(), Self::Error>;

    /// Write every record atomically.
    ///
    /// # Errors
    ///
    /// Returns the store's error when the write fails.
    fn persist_snapshot(&mut self, records: &RecordSet) -> Result<(), Self::Error>;
}

/// Result of a single way's attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WayAttempt {
    /// Label of the owning entities.
    pub relations: String,
    /// Matched map way, if any.
    pub osm_way: Option<i64>,
    /// Terminal outcome.
    pub outcome: Outcome,
}

/// Summary of one [`run_conflation`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Ways attempted during this run, keyed by resulting state.
    pub states: BTreeMap<u8, usize>,
    /// Whether the confirmation gate stopped the run before every pending
    /// way was attempted.
    pub stopped_early: bool,
}

impl RunReport {
    /// Number of ways attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.states.values().sum()
    }

    /// Number of ways that ended in `state`.
    #[must_use]
    pub fn count(&self, state: ProcessingState) -> usize {
        self.states.get(&state.ordinal()).copied().unwrap_or_default()
    }

    fn record(&mut self, state: ProcessingState) {
        *self.states.entry(state.ordinal()).or_default() += 1;
    }
}

/// Attempt to conflate a single source way.
///
/// # Errors
///
/// Returns [`ConflateError`] for malformed input or permanent service
/// failures. Domain failures are reported through [`WayAttempt::outcome`].
pub fn process_way(
    dataset: &SourceDataset,
    services: &mut Services<'_>,
    settings: &ConflationSettings,
    way_id: i64,
) -> Result<WayAttempt, ConflateError> {
    let entities = resolve_entities(dataset, way_id, &settings.source_reference_key)?;
    let ownership = Ownership::classify(entities).ok_or(ResolveError::OrphanWay { way_id })?;
    let relations = ownership.label();
    info!("way {way_id}: {relations}");

    let candidate = match find_candidate(services.query, &services.retry, &ownership)? {
        MatchOutcome::Found(candidate) => candidate,
        MatchOutcome::Unmatched(outcome) => {
            return Ok(WayAttempt {
                relations,
                osm_way: None,
                outcome,
            });
        }
    };
    let osm_way = Some(candidate.way.id);

    let source = dataset.source_way(way_id)?;
    let outcome = match check_eligibility(services, settings, &source, &candidate)? {
        Eligibility::Terminal(outcome) => outcome,
        Eligibility::Eligible {
            source: oriented,
            shared_nodes,
        } => align(
            services,
            settings,
            way_id,
            &candidate,
            &oriented,
            &shared_nodes,
        )?,
    };
    Ok(WayAttempt {
        relations,
        osm_way,
        outcome,
    })
}

/// Process every pending record in `records`, highest way id first.
///
/// Terminal records are never touched. The edit session is finished once
/// the loop ends, whether it completed, was stopped by the gate or failed.
///
/// # Errors
///
/// Returns [`ConflateError`] for malformed input, permanent service
/// failures, or when progress cannot be persisted. Records attempted before
/// the failure have already been persisted.
pub fn run_conflation<S>(
    dataset: &SourceDataset,
    records: &mut RecordSet,
    services: &mut Services<'_>,
    settings: &ConflationSettings,
    sink: &mut S,
) -> Result<RunReport, ConflateError>
where
    S: ProgressSink + ?Sized,
{
    let processed = process_pending(dataset, records, services, settings, sink);
    let retry = services.retry;
    let finished = retry.run("finish edit session", || services.edit.finish());
    let report = match processed {
        Ok(report) => report,
        Err(err) => {
            if let Err(finish_err) = finished {
                warn!("edit session left open after failure: {finish_err}");
            }
            return Err(err);
        }
    };
    finished?;
    info!("attempted {} ways", report.attempted());
    Ok(report)
}

fn process_pending<S>(
    dataset: &SourceDataset,
    records: &mut RecordSet,
    services: &mut Services<'_>,
    settings: &ConflationSettings,
    sink: &mut S,
) -> Result<RunReport, ConflateError>
where
    S: ProgressSink + ?Sized,
{
    let pending = records.pending_ids_descending();
    info!("{} of {} ways pending", pending.len(), records.len());

    let mut report = RunReport::default();
    let mut remaining = pending.iter().peekable();
    while let Some(&way_id) = remaining.next() {
        let attempt = process_way(dataset, services, settings, way_id)?;
        let state = attempt.outcome.state;
        info!(
            "way {way_id} finished as {state}{}",
            attempt
                .outcome
                .context
                .as_deref()
                .map(|context| format!(" ({context})"))
                .unwrap_or_default()
        );

        let record = records
            .get_mut(way_id)
            .ok_or(ConflateError::MissingRecord { way_id })?;
        record.relations = attempt.relations;
        record.osm_way = attempt.osm_way;
        record.apply(attempt.outcome);
        let persist = |source: S::Error| ConflateError::Persist {
            way_id,
            source: Box::new(source),
        };
        sink.persist_record(way_id, record).map_err(persist)?;
        sink.persist_snapshot(records).map_err(persist)?;
        report.record(state);

        if remaining.peek().is_none() {
            break;
        }
        let request = ConfirmationRequest::ContinueWithNextWay {
            finished_way: way_id,
        };
        if !services.gate.confirm(&request) {
            warn!("stopping after way {way_id}");
            report.stopped_early = true;
            break;
        }
        if !settings.way_pause.is_zero() {
            thread::sleep(settings.way_pause);
        }
    }

    Ok(report)
}
