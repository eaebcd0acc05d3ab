//! Domain logic for conflating administrative boundaries.
//!
//! Responsibilities:
//! - Model map elements, cadastre datasets and per-way processing records.
//! - Decide, per cadastre way, whether the matching map way can be safely
//!   realigned, and compute the node-level edits.
//! - Drive the resumable processing loop over every pending way.
//!
//! Boundaries:
//! - Remote services, persistence and confirmation are injected through
//!   [`GeoQueryService`], [`MapEditService`], [`ProgressSink`] and
//!   [`ConfirmationGate`]; adapters live in `conflation-data`.
//! - Domain failures are processing states, never errors.
//!
//! Invariants:
//! - Node coordinates change only inside [`align`].
//! - A terminal record is never attempted again.

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod aligner;
pub mod conflate;
pub mod element;
pub mod eligibility;
mod error;
pub mod gate;
pub mod geodesy;
pub mod matcher;
pub mod quality;
pub mod resolver;
pub mod retry;
pub mod services;
pub mod settings;
pub mod source;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-support")))]
pub mod test_support;
pub mod unglue;

pub use aligner::{AlignError, EditScript, NodeMove, NodeRemoval, NodeSlot, align, plan_alignment};
pub use conflate::{ProgressSink, RunReport, WayAttempt, process_way, run_conflation};
pub use element::{
    AdminLevel, Element, ElementKind, ElementSet, Member, MissingNodeError, Node, Relation, Tags,
    UnknownElementKind, Way,
};
pub use eligibility::{Eligibility, check_eligibility};
pub use error::ConflateError;
pub use gate::{AutoApprove, ConfirmationGate, ConfirmationRequest, RejectUnconfirmed};
pub use matcher::{Candidate, MatchOutcome, find_candidate};
pub use quality::{QualityError, QualityRecord, RingError, measure_entity};
pub use resolver::{Ownership, ResolveError, resolve_entities};
pub use retry::RetryPolicy;
pub use services::{GeoQueryService, MapEditService, ServiceError, Services};
pub use settings::ConflationSettings;
pub use source::{AdminEntity, SourceDataset, SourceError, SourceWay};
pub use state::{
    Outcome, ProcessingRecord, ProcessingState, RecordSet, RecordSummary, StateCount,
};
pub use unglue::unglue_ways;
