//! Test doubles and fixtures shared by the CLI tests.

use super::*;
use crate::services::ServiceFactory;
use camino::Utf8PathBuf;
use conflation_core::test_support::{MemoryGeoQuery, RecordingEditService};
use conflation_core::{
    AdminEntity, ElementSet, GeoQueryService, MapEditService, ServiceError,
};
use conflation_data::{OsmApiConfig, OverpassConfig, files};
use std::sync::Arc;
use tempfile::TempDir;

/// Cadastre with one boundary way owned by entity `1`.
pub(super) const CADASTRE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="cadastre-export">
  <node id="-1" lat="44.0001" lon="20.0"/>
  <node id="-2" lat="44.0001" lon="20.005"/>
  <node id="-3" lat="44.0001" lon="20.01"/>
  <way id="-10">
    <nd ref="-1"/>
    <nd ref="-2"/>
    <nd ref="-3"/>
  </way>
  <relation id="-100">
    <member type="way" ref="-10" role="outer"/>
    <tag k="name" v="Entity 1"/>
    <tag k="level9_id" v="1"/>
  </relation>
</osm>
"#;

/// Coordinates of the cadastre way, as `(lon, lat)`.
pub(super) const CADASTRE_LINE: [(f64, f64); 3] =
    [(20.0, 44.000_1), (20.005, 44.000_1), (20.01, 44.000_1)];

/// Cadastre way identifier.
pub(super) const SOURCE_WAY: i64 = -10;

/// Temporary workspace holding CLI inputs and outputs.
#[derive(Debug)]
pub(super) struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub(super) fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub(super) fn path(&self, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().join(name)).expect("utf-8 workspace")
    }

    /// Write the sample cadastre and return its path.
    pub(super) fn cadastre(&self) -> Utf8PathBuf {
        let path = self.path("cadastre.osm");
        files::write_string(&path, CADASTRE).expect("write cadastre");
        path
    }
}

/// `GeoQueryService` sharing a [`MemoryGeoQuery`] with the test.
struct SharedQuery(Arc<MemoryGeoQuery>);

impl GeoQueryService for SharedQuery {
    fn shared_ways(
        &self,
        first: &AdminEntity,
        second: &AdminEntity,
    ) -> Result<ElementSet, ServiceError> {
        self.0.shared_ways(first, second)
    }

    fn single_ways(&self, entity: &AdminEntity) -> Result<ElementSet, ServiceError> {
        self.0.single_ways(entity)
    }

    fn entities_sharing_nodes(&self, way_id: i64) -> Result<ElementSet, ServiceError> {
        self.0.entities_sharing_nodes(way_id)
    }

    fn entity_boundary(&self, reference: &str) -> Result<ElementSet, ServiceError> {
        self.0.entity_boundary(reference)
    }
}

/// Serves canned map data instead of Overpass and the OSM API.
#[derive(Debug)]
pub(super) struct StubServices {
    pub(super) query: Arc<MemoryGeoQuery>,
    pub(super) map: ElementSet,
}

impl StubServices {
    pub(super) fn new(query: MemoryGeoQuery, map: ElementSet) -> Self {
        Self {
            query: Arc::new(query),
            map,
        }
    }
}

impl ServiceFactory for StubServices {
    fn query(&self, _config: &OverpassConfig) -> Result<Box<dyn GeoQueryService + Sync>, CliError> {
        Ok(Box::new(SharedQuery(Arc::clone(&self.query))))
    }

    fn edit(&self, _config: &OsmApiConfig) -> Result<Box<dyn MapEditService>, CliError> {
        Ok(Box::new(RecordingEditService::from_elements(&self.map)))
    }
}
