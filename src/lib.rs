//! Facade crate for administrative boundary conflation.
//!
//! This crate re-exports the core conflation pipeline and, behind the
//! `adapters` feature, the file, database and OSM service adapters.

#![forbid(unsafe_code)]

pub use conflation_core::{
    AdminEntity, AutoApprove, ConfirmationGate, ConflateError, ConflationSettings, Element,
    ElementKind, ElementSet, GeoQueryService, MapEditService, ProcessingRecord, ProcessingState,
    ProgressSink, QualityRecord, RecordSet, RecordSummary, RejectUnconfirmed, RetryPolicy,
    RunReport, ServiceError, Services, SourceDataset, run_conflation,
};

#[cfg(feature = "adapters")]
pub use conflation_data::{
    MeasureOptions, MeasureReport, OsmApiClient, OsmApiConfig, OverpassClient, OverpassConfig,
    ProgressStore, load_dataset, run_measurement,
};

#[cfg(feature = "test-support")]
pub use conflation_core::test_support;
