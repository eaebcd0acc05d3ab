//! Test-only, in-memory collaborators used by unit and behaviour tests.
//!
//! [`MemoryGeoQuery`] answers queries from canned element sets,
//! [`RecordingEditService`] applies writes to an in-memory map and logs them,
//! and [`MemoryProgress`] keeps persisted records in memory.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use geo::Coord;

use crate::conflate::ProgressSink;
use crate::element::{Element, ElementKind, ElementSet, Node, Tags, Way};
use crate::services::{GeoQueryService, MapEditService, ServiceError};
use crate::source::AdminEntity;
use crate::state::{ProcessingRecord, RecordSet};

/// Metres per degree of latitude near 44°N.
const METRES_PER_DEGREE_LAT: f64 = 111_113.0;

/// `GeoQueryService` serving canned responses.
///
/// Unknown keys produce an empty [`ElementSet`], which the pipeline reads as
/// "nothing found".
#[derive(Debug, Default)]
pub struct MemoryGeoQuery {
    shared: BTreeMap<(String, String), ElementSet>,
    single: BTreeMap<String, ElementSet>,
    sharing: BTreeMap<i64, ElementSet>,
    boundaries: BTreeMap<String, ElementSet>,
    failures_left: AtomicU32,
    calls: AtomicUsize,
}

impl MemoryGeoQuery {
    /// Answer shared-way queries between two references, in either order.
    #[must_use]
    pub fn with_shared(mut self, first: &str, second: &str, response: ElementSet) -> Self {
        self.shared
            .insert((second.to_owned(), first.to_owned()), response.clone());
        self.shared
            .insert((first.to_owned(), second.to_owned()), response);
        self
    }

    /// Answer single-way queries for a reference.
    #[must_use]
    pub fn with_single(mut self, reference: &str, response: ElementSet) -> Self {
        self.single.insert(reference.to_owned(), response);
        self
    }

    /// Answer the node-sharing query for a map way.
    #[must_use]
    pub fn with_sharing(mut self, way_id: i64, response: ElementSet) -> Self {
        self.sharing.insert(way_id, response);
        self
    }

    /// Answer boundary queries for a reference.
    #[must_use]
    pub fn with_boundary(mut self, reference: &str, response: ElementSet) -> Self {
        self.boundaries.insert(reference.to_owned(), response);
        self
    }

    /// Fail the next `count` calls with a connection reset.
    #[must_use]
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Number of queries issued so far, failed attempts included.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, response: Option<&ElementSet>) -> Result<ElementSet, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ServiceError::Connection {
                url: "memory://query".into(),
                message: "connection reset by peer".into(),
            });
        }
        Ok(response.cloned().unwrap_or_default())
    }
}

impl GeoQueryService for MemoryGeoQuery {
    fn shared_ways(
        &self,
        first: &AdminEntity,
        second: &AdminEntity,
    ) -> Result<ElementSet, ServiceError> {
        self.answer(
            self.shared
                .get(&(first.reference.clone(), second.reference.clone())),
        )
    }

    fn single_ways(&self, entity: &AdminEntity) -> Result<ElementSet, ServiceError> {
        self.answer(self.single.get(&entity.reference))
    }

    fn entities_sharing_nodes(&self, way_id: i64) -> Result<ElementSet, ServiceError> {
        self.answer(self.sharing.get(&way_id))
    }

    fn entity_boundary(&self, reference: &str) -> Result<ElementSet, ServiceError> {
        self.answer(self.boundaries.get(reference))
    }
}

/// A write issued to [`RecordingEditService`].
#[derive(Debug, Clone, PartialEq)]
pub enum EditCall {
    /// A node was created with the given placeholder id.
    CreateNode {
        /// Assigned placeholder id.
        id: i64,
        /// Position of the new node.
        location: Coord,
    },
    /// A node was updated.
    UpdateNode(Node),
    /// A way was updated.
    UpdateWay(Way),
    /// A node was deleted.
    DeleteNode(i64),
}

impl EditCall {
    /// Short name of the call, handy for asserting on write order.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::CreateNode { .. } => "create",
            Self::UpdateNode(_) => "update-node",
            Self::UpdateWay(_) => "update-way",
            Self::DeleteNode(_) => "delete",
        }
    }
}

/// `MapEditService` over an in-memory element store.
///
/// Writes apply immediately and are also logged in order.
#[derive(Debug, Default)]
pub struct RecordingEditService {
    store: ElementSet,
    writes: Vec<EditCall>,
    next_placeholder: i64,
    flushes: usize,
    finishes: usize,
}

impl RecordingEditService {
    /// Seed the store with every node and way of `elements`.
    #[must_use]
    pub fn from_elements(elements: &ElementSet) -> Self {
        let mut service = Self::default();
        service.store.merge(elements.clone());
        service
    }

    /// Add or replace a node.
    pub fn insert_node(&mut self, node: Node) {
        self.store.insert(Element::Node(node));
    }

    /// Add or replace a way.
    pub fn insert_way(&mut self, way: Way) {
        self.store.insert(Element::Way(way));
    }

    /// Current state of a way.
    #[must_use]
    pub fn stored_way(&self, way_id: i64) -> Option<&Way> {
        self.store.ways.get(&way_id)
    }

    /// Current state of a node.
    #[must_use]
    pub fn stored_node(&self, node_id: i64) -> Option<&Node> {
        self.store.nodes.get(&node_id)
    }

    /// Writes in the order they were issued.
    #[must_use]
    pub fn writes(&self) -> &[EditCall] {
        &self.writes
    }

    /// Number of flushes.
    #[must_use]
    pub const fn flushes(&self) -> usize {
        self.flushes
    }

    /// Number of times the session was finished.
    #[must_use]
    pub const fn finishes(&self) -> usize {
        self.finishes
    }
}

impl MapEditService for RecordingEditService {
    fn way(&mut self, way_id: i64) -> Result<Way, ServiceError> {
        self.store
            .ways
            .get(&way_id)
            .cloned()
            .ok_or(ServiceError::NotFound {
                kind: ElementKind::Way,
                id: way_id,
            })
    }

    fn node(&mut self, node_id: i64) -> Result<Node, ServiceError> {
        self.store
            .nodes
            .get(&node_id)
            .cloned()
            .ok_or(ServiceError::NotFound {
                kind: ElementKind::Node,
                id: node_id,
            })
    }

    fn way_full(&mut self, way_id: i64) -> Result<ElementSet, ServiceError> {
        let way = self.way(way_id)?;
        let mut full = ElementSet::default();
        for node_id in &way.nodes {
            full.insert(Element::Node(self.node(*node_id)?));
        }
        full.insert(Element::Way(way));
        Ok(full)
    }

    fn create_node(&mut self, location: Coord, tags: Tags) -> Result<i64, ServiceError> {
        self.next_placeholder -= 1;
        let id = self.next_placeholder;
        self.store.insert(Element::Node(Node {
            id,
            version: None,
            location,
            tags,
        }));
        self.writes.push(EditCall::CreateNode { id, location });
        Ok(id)
    }

    fn update_node(&mut self, node: &Node) -> Result<(), ServiceError> {
        self.store.insert(Element::Node(node.clone()));
        self.writes.push(EditCall::UpdateNode(node.clone()));
        Ok(())
    }

    fn update_way(&mut self, way: &Way) -> Result<(), ServiceError> {
        self.store.insert(Element::Way(way.clone()));
        self.writes.push(EditCall::UpdateWay(way.clone()));
        Ok(())
    }

    fn delete_node(&mut self, node: &Node) -> Result<(), ServiceError> {
        self.store.nodes.remove(&node.id);
        self.writes.push(EditCall::DeleteNode(node.id));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ServiceError> {
        self.flushes += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ServiceError> {
        self.finishes += 1;
        Ok(())
    }
}

/// `ProgressSink` keeping the latest records in memory.
#[derive(Debug, Default)]
pub struct MemoryProgress {
    records: BTreeMap<i64, ProcessingRecord>,
    snapshots: usize,
}

impl MemoryProgress {
    /// Latest persisted record of a way.
    #[must_use]
    pub fn record(&self, way_id: i64) -> Option<ProcessingRecord> {
        self.records.get(&way_id).cloned()
    }

    /// Number of snapshots written.
    #[must_use]
    pub const fn snapshots(&self) -> usize {
        self.snapshots
    }
}

impl ProgressSink for MemoryProgress {
    type Error = Infallible;

    fn persist_record(&mut self, way_id: i64, record: &ProcessingRecord) -> Result<(), Infallible> {
        self.records.insert(way_id, record.clone());
        Ok(())
    }

    fn persist_snapshot(&mut self, records: &RecordSet) -> Result<(), Infallible> {
        self.records = records
            .iter()
            .map(|(way_id, record)| (way_id, record.clone()))
            .collect();
        self.snapshots += 1;
        Ok(())
    }
}

/// An administrative boundary way with sequential node ids starting at
/// `first_node_id`, along with its nodes.
#[must_use]
pub fn line_way(way_id: i64, first_node_id: i64, coords: &[(f64, f64)]) -> ElementSet {
    let mut set = ElementSet::default();
    let mut node_ids = Vec::with_capacity(coords.len());
    for (node_id, &(x, y)) in (first_node_id..).zip(coords) {
        set.insert(Element::Node(Node::new(node_id, Coord { x, y })));
        node_ids.push(node_id);
    }
    set.insert(Element::Way(
        Way::new(way_id, node_ids)
            .with_tag("boundary", "administrative")
            .with_tag("admin_level", "9"),
    ));
    set
}

/// `count` evenly spaced points from `start` to `end`, both included.
#[must_use]
pub fn straight_line(start: (f64, f64), end: (f64, f64), count: usize) -> Vec<(f64, f64)> {
    let steps = count.saturating_sub(1).max(1) as f64;
    (0..count)
        .map(|step| {
            let t = step as f64 / steps;
            (
                start.0 + (end.0 - start.0) * t,
                start.1 + (end.1 - start.1) * t,
            )
        })
        .collect()
}

/// `point` moved roughly `metres` due north.
#[must_use]
pub fn offset_north(point: (f64, f64), metres: f64) -> (f64, f64) {
    (point.0, point.1 + metres / METRES_PER_DEGREE_LAT)
}
