//! Adapters connecting boundary conflation to files, databases and OSM
//! services.
//!
//! Responsibilities:
//! - Load cadastre datasets from OSM XML and PBF files.
//! - Implement [`GeoQueryService`](conflation_core::GeoQueryService) over
//!   Overpass and [`MapEditService`](conflation_core::MapEditService) over
//!   the OSM editing API.
//! - Persist processing records in SQLite so runs can resume.
//! - Drive quality measurement across a worker pool.
//!
//! Boundaries:
//! - Do not encode conflation rules (live in `conflation-core`).
//! - Keep async HTTP behind the synchronous service traits.
//!
//! Invariants:
//! - No global mutable state.
//! - Writes reach the map only through a changeset opened by
//!   [`OsmApiClient`].

#![forbid(unsafe_code)]

pub mod files;
pub mod measure;
pub mod osm_api;
pub mod osm_json;
pub mod osm_xml;
pub mod overpass;
pub mod pbf;
pub mod progress;
pub mod source;
pub mod transport;

pub use measure::{MeasureError, MeasureOptions, MeasureReport, run_measurement};
pub use osm_api::{DEFAULT_OSM_API_URL, OsmApiClient, OsmApiConfig, OsmApiError};
pub use osm_xml::{OsmChange, OsmXmlError, parse_osm};
pub use overpass::{DEFAULT_OVERPASS_URL, OverpassClient, OverpassConfig, OverpassError};
pub use pbf::{PbfError, read_pbf};
pub use progress::{ProgressStore, ProgressStoreError};
pub use source::{SourceFormat, SourceLoadError, load_dataset};
pub use transport::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, HttpTransport, TransportBuildError};
