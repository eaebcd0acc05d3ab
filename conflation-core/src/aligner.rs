//! Moves a map way's nodes onto the cadastre geometry.
//!
//! The edit script is a pure function of the live way and the oriented
//! source line: node `i` moves to source vertex `i`, surplus way nodes are
//! removed, missing vertices are inserted before the final node, and the
//! final node always lands on the final source vertex.

use std::collections::BTreeSet;
use std::thread;

use geo::{Coord, LineString};
use log::{debug, info};
use thiserror::Error;

use crate::element::{MissingNodeError, Node, Tags, Way};
use crate::error::ConflateError;
use crate::gate::ConfirmationRequest;
use crate::geodesy::{bearing_difference, distance_m, overall_bearing, within_buffer};
use crate::matcher::Candidate;
use crate::services::Services;
use crate::settings::ConflationSettings;
use crate::state::{Outcome, ProcessingState};

/// Errors raised while planning an alignment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlignError {
    /// The source line has no vertices.
    #[error("source geometry is empty")]
    EmptySource,
    /// The map way has no nodes.
    #[error("way {way_id} has no nodes")]
    EmptyWay {
        /// Map way identifier.
        way_id: i64,
    },
    /// The full-way read did not include the way itself.
    #[error("way {way_id} is missing from its own full read")]
    MissingWay {
        /// Map way identifier.
        way_id: i64,
    },
    /// The full-way read did not include one of the way's nodes.
    #[error(transparent)]
    MissingNode(#[from] MissingNodeError),
}

/// Relocation of an existing node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMove {
    /// Node being moved.
    pub node_id: i64,
    /// Current position.
    pub from: Coord,
    /// Target position.
    pub to: Coord,
    /// Geodesic length of the move in metres.
    pub displacement_m: f64,
}

/// An existing node dropped from the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRemoval {
    /// Node leaving the way.
    pub node_id: i64,
    /// `false` when another way still uses the node, so it is only detached.
    pub delete: bool,
}

/// One position in the way's new node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSlot {
    /// A node the way already has.
    Existing(i64),
    /// The n-th entry of [`EditScript::insertions`].
    Inserted(usize),
}

/// Node-level edits turning a way into the source geometry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EditScript {
    /// Existing nodes to relocate, in way order.
    pub moves: Vec<NodeMove>,
    /// Positions of new nodes, in way order.
    pub insertions: Vec<Coord>,
    /// Existing nodes dropped from the way.
    pub removals: Vec<NodeRemoval>,
    /// The way's node list after the edit.
    pub node_order: Vec<NodeSlot>,
}

impl EditScript {
    /// Largest displacement among the moves, in metres.
    #[must_use]
    pub fn max_displacement_m(&self) -> f64 {
        self.moves
            .iter()
            .map(|node_move| node_move.displacement_m)
            .fold(0.0, f64::max)
    }

    /// Node list after the edit, with inserted slots replaced by `created`.
    ///
    /// `created` holds the identifiers assigned to [`Self::insertions`], in
    /// the same order.
    #[must_use]
    pub fn resolve_node_order(&self, created: &[i64]) -> Vec<i64> {
        self.node_order
            .iter()
            .filter_map(|slot| match slot {
                NodeSlot::Existing(id) => Some(*id),
                NodeSlot::Inserted(index) => created.get(*index).copied(),
            })
            .collect()
    }
}

/// Plan the edits aligning `nodes` (the resolved nodes of a way) with
/// `source`.
///
/// Removed nodes listed in `shared` are detached instead of deleted.
///
/// # Errors
///
/// Returns [`AlignError`] when either geometry is empty.
pub fn plan_alignment(
    way_id: i64,
    nodes: &[Node],
    source: &LineString,
    shared: &BTreeSet<i64>,
) -> Result<EditScript, AlignError> {
    let (last_node, leading_nodes) = nodes.split_last().ok_or(AlignError::EmptyWay { way_id })?;
    let (last_target, leading_targets) =
        source.0.split_last().ok_or(AlignError::EmptySource)?;

    let mut script = EditScript::default();
    let mut removed = Vec::new();
    for (index, node) in leading_nodes.iter().enumerate() {
        match leading_targets.get(index) {
            Some(target) => {
                script.moves.push(relocation(node, *target));
                script.node_order.push(NodeSlot::Existing(node.id));
            }
            None => removed.push(node.id),
        }
    }
    for target in leading_targets.iter().skip(leading_nodes.len()) {
        script
            .node_order
            .push(NodeSlot::Inserted(script.insertions.len()));
        script.insertions.push(*target);
    }
    script.moves.push(relocation(last_node, *last_target));
    script.node_order.push(NodeSlot::Existing(last_node.id));

    let kept: BTreeSet<i64> = script
        .node_order
        .iter()
        .filter_map(|slot| match slot {
            NodeSlot::Existing(id) => Some(*id),
            NodeSlot::Inserted(_) => None,
        })
        .collect();
    script.removals = removed
        .into_iter()
        .map(|node_id| NodeRemoval {
            node_id,
            delete: !shared.contains(&node_id) && !kept.contains(&node_id),
        })
        .collect();
    Ok(script)
}

fn relocation(node: &Node, target: Coord) -> NodeMove {
    NodeMove {
        node_id: node.id,
        from: node.location,
        to: target,
        displacement_m: distance_m(node.location, target),
    }
}

/// Whether `source` plausibly describes the same boundary as `candidate`.
///
/// The whole source line must lie within the buffer of the candidate line and
/// the overall bearings must agree. Bearings are compared on the compass
/// circle, so 359° and 1° differ by 2° rather than 358°.
#[must_use]
pub fn is_heuristically_same(
    settings: &ConflationSettings,
    candidate: &LineString,
    source: &LineString,
) -> bool {
    if !within_buffer(source, candidate, settings.heuristic_buffer_deg) {
        return false;
    }
    match (overall_bearing(candidate), overall_bearing(source)) {
        (Some(left), Some(right)) => {
            bearing_difference(left, right) < settings.heuristic_bearing_deg
        }
        _ => false,
    }
}

/// Align `candidate` with the oriented `source` line.
///
/// Returns [`ProcessingState::Conflated`] once the edits are flushed,
/// [`ProcessingState::CheckedPossible`] in dry-run mode, or
/// [`ProcessingState::ErrorGeometryWrong`] when the geometry match is not
/// confirmed.
///
/// # Errors
///
/// Returns [`ConflateError`] when a remote call fails permanently or the
/// live way cannot be read back completely.
pub fn align(
    services: &mut Services<'_>,
    settings: &ConflationSettings,
    source_way_id: i64,
    candidate: &Candidate,
    source: &LineString,
    shared_nodes: &BTreeSet<i64>,
) -> Result<Outcome, ConflateError> {
    let way_id = candidate.way.id;
    if !is_heuristically_same(settings, &candidate.geometry, source) {
        let request = ConfirmationRequest::GeometryMatch {
            source_way: source_way_id,
            candidate_way: way_id,
        };
        if !services.gate.confirm(&request) {
            return Ok(Outcome::bare(ProcessingState::ErrorGeometryWrong));
        }
    }

    let retry = services.retry;
    let live = retry.run("read full way", || services.edit.way_full(way_id))?;
    let way = live
        .ways
        .get(&way_id)
        .ok_or(AlignError::MissingWay { way_id })?;
    let nodes = live.resolve_nodes(way).map_err(AlignError::from)?;
    let script = plan_alignment(way_id, &nodes, source, shared_nodes)?;

    info!(
        "way {way_id}: {} moves (max {:.2} m), {} insertions, {} removals",
        script.moves.len(),
        script.max_displacement_m(),
        script.insertions.len(),
        script.removals.len()
    );
    if settings.dry_run {
        return Ok(Outcome::bare(ProcessingState::CheckedPossible));
    }

    let mut created = Vec::with_capacity(script.insertions.len());
    for location in &script.insertions {
        let id = retry.run("create node", || {
            services.edit.create_node(*location, Tags::new())
        })?;
        created.push(id);
    }
    for node_move in &script.moves {
        let Some(node) = live.nodes.get(&node_move.node_id) else {
            continue;
        };
        let moved = Node {
            location: node_move.to,
            ..node.clone()
        };
        debug!(
            "moving node {} by {:.2} m",
            moved.id, node_move.displacement_m
        );
        retry.run("update node", || services.edit.update_node(&moved))?;
    }
    let updated = Way {
        nodes: script.resolve_node_order(&created),
        ..way.clone()
    };
    retry.run("update way", || services.edit.update_way(&updated))?;
    for removal in script.removals.iter().filter(|removal| removal.delete) {
        if let Some(node) = live.nodes.get(&removal.node_id) {
            retry.run("delete node", || services.edit.delete_node(node))?;
        }
    }
    retry.run("upload changes", || services.edit.flush())?;
    if !settings.flush_pause.is_zero() {
        thread::sleep(settings.flush_pause);
    }
    Ok(Outcome::bare(ProcessingState::Conflated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{AutoApprove, RejectUnconfirmed};
    use crate::retry::RetryPolicy;
    use crate::test_support::{EditCall, MemoryGeoQuery, RecordingEditService, line_way};
    use rstest::{fixture, rstest};
    use std::time::Duration;

    fn nodes(coords: &[(f64, f64)]) -> Vec<Node> {
        coords
            .iter()
            .zip(1_i64..)
            .map(|(&(x, y), id)| Node::new(id, Coord { x, y }))
            .collect()
    }

    fn line(coords: &[(f64, f64)]) -> LineString {
        coords.iter().map(|&(x, y)| Coord { x, y }).collect()
    }

    #[fixture]
    fn settings() -> ConflationSettings {
        ConflationSettings::default().without_pauses()
    }

    #[rstest]
    fn longer_source_inserts_before_final_node() {
        let way_nodes = nodes(&[(20.0, 44.0), (20.01, 44.0)]);
        let source = line(&[(20.0, 44.0), (20.003, 44.0), (20.006, 44.0), (20.01, 44.0)]);
        let script = plan_alignment(9, &way_nodes, &source, &BTreeSet::new()).expect("plan");
        assert_eq!(script.insertions.len(), 2);
        assert!(script.removals.is_empty());
        assert_eq!(
            script.node_order,
            vec![
                NodeSlot::Existing(1),
                NodeSlot::Inserted(0),
                NodeSlot::Inserted(1),
                NodeSlot::Existing(2),
            ]
        );
        assert_eq!(script.resolve_node_order(&[-1, -2]), vec![1, -1, -2, 2]);
    }

    #[rstest]
    fn shorter_source_removes_surplus_nodes() {
        let way_nodes = nodes(&[(20.0, 44.0), (20.003, 44.0), (20.006, 44.0), (20.01, 44.0)]);
        let source = line(&[(20.0, 44.001), (20.01, 44.001)]);
        let shared = BTreeSet::from([3]);
        let script = plan_alignment(9, &way_nodes, &source, &shared).expect("plan");
        assert!(script.insertions.is_empty());
        assert_eq!(
            script.removals,
            vec![
                NodeRemoval {
                    node_id: 2,
                    delete: true
                },
                NodeRemoval {
                    node_id: 3,
                    delete: false
                },
            ]
        );
        assert_eq!(script.resolve_node_order(&[]), vec![1, 4]);
    }

    #[rstest]
    fn final_node_lands_exactly_on_final_vertex() {
        let way_nodes = nodes(&[(20.0, 44.0), (20.004, 44.0), (20.01, 44.0)]);
        let source = line(&[(20.0, 44.000_1), (20.01, 44.000_2)]);
        let script = plan_alignment(9, &way_nodes, &source, &BTreeSet::new()).expect("plan");
        let last = script.moves.last().expect("final move");
        assert_eq!(last.node_id, 3);
        assert_eq!(last.to, Coord { x: 20.01, y: 44.000_2 });
        assert!(last.displacement_m > 20.0 && last.displacement_m < 25.0);
    }

    #[rstest]
    fn empty_inputs_are_rejected() {
        let source = line(&[(20.0, 44.0), (20.01, 44.0)]);
        assert_eq!(
            plan_alignment(9, &[], &source, &BTreeSet::new()),
            Err(AlignError::EmptyWay { way_id: 9 })
        );
        assert_eq!(
            plan_alignment(9, &nodes(&[(20.0, 44.0)]), &LineString::new(vec![]), &BTreeSet::new()),
            Err(AlignError::EmptySource)
        );
    }

    #[rstest]
    #[case(&[(20.0, 44.001), (20.005, 44.001), (20.01, 44.001)], true)]
    #[case(&[(20.0, 44.02), (20.01, 44.02)], false)]
    #[case(&[(20.0, 44.0), (20.0, 44.004)], false)]
    fn heuristic_checks_buffer_and_bearing(
        settings: ConflationSettings,
        #[case] source: &[(f64, f64)],
        #[case] expected: bool,
    ) {
        let candidate = line(&[(20.0, 44.0), (20.01, 44.0)]);
        assert_eq!(
            is_heuristically_same(&settings, &candidate, &line(source)),
            expected
        );
    }

    #[rstest]
    fn straight_source_past_a_detour_is_not_heuristically_same(settings: ConflationSettings) {
        let candidate = line(&[(20.0, 44.0), (20.05, 44.05), (20.1, 44.0)]);
        let chord = line(&[(20.0, 44.0), (20.1, 44.0)]);
        assert!(!is_heuristically_same(&settings, &candidate, &chord));
    }

    #[rstest]
    fn detouring_candidate_needs_confirmation(settings: ConflationSettings) {
        let set = line_way(41, 200, &[(20.0, 44.0), (20.05, 44.05), (20.1, 44.0)]);
        let mut edit = RecordingEditService::from_elements(&set);
        let way = set.ways.get(&41).cloned().expect("way built");
        let candidate = Candidate::resolve(way, &set).expect("nodes present");
        let chord = line(&[(20.0, 44.0), (20.1, 44.0)]);
        let query = MemoryGeoQuery::default();
        let mut services = Services {
            query: &query,
            edit: &mut edit,
            gate: &RejectUnconfirmed,
            retry: RetryPolicy::new(1, Duration::ZERO),
        };
        let outcome = align(&mut services, &settings, -6, &candidate, &chord, &BTreeSet::new())
            .expect("alignment runs");
        assert_eq!(outcome, Outcome::bare(ProcessingState::ErrorGeometryWrong));
        assert!(edit.writes().is_empty());
    }

    fn edit_with_candidate() -> (RecordingEditService, Candidate) {
        let set = line_way(40, 100, &[(20.0, 44.0), (20.005, 44.0), (20.01, 44.0)]);
        let mut edit = RecordingEditService::default();
        for node in set.nodes.values() {
            edit.insert_node(node.clone());
        }
        let way = set.ways.get(&40).cloned().expect("way built");
        edit.insert_way(way.clone());
        let candidate = Candidate::resolve(way, &set).expect("nodes present");
        (edit, candidate)
    }

    #[rstest]
    fn applies_edits_in_order(settings: ConflationSettings) {
        let (mut edit, candidate) = edit_with_candidate();
        let source = line(&[
            (20.0, 44.000_1),
            (20.002, 44.000_1),
            (20.004, 44.000_1),
            (20.01, 44.000_1),
        ]);
        let query = MemoryGeoQuery::default();
        let mut services = Services {
            query: &query,
            edit: &mut edit,
            gate: &RejectUnconfirmed,
            retry: RetryPolicy::new(1, Duration::ZERO),
        };
        let outcome = align(&mut services, &settings, -5, &candidate, &source, &BTreeSet::new())
            .expect("alignment runs");
        assert_eq!(outcome, Outcome::bare(ProcessingState::Conflated));

        let kinds: Vec<&str> = edit.writes().iter().map(EditCall::label).collect();
        assert_eq!(
            kinds,
            vec!["create", "update-node", "update-node", "update-node", "update-way"]
        );
        let way = edit.stored_way(40).expect("way stored");
        assert_eq!(way.nodes.len(), 4);
        assert_eq!(way.nodes.first(), Some(&100));
        assert_eq!(way.nodes.last(), Some(&102));
        assert_eq!(
            edit.stored_node(102).map(|node| node.location),
            Some(Coord { x: 20.01, y: 44.000_1 })
        );
        assert_eq!(edit.flushes(), 1);
    }

    #[rstest]
    fn rejected_geometry_is_recorded(settings: ConflationSettings) {
        let (mut edit, candidate) = edit_with_candidate();
        let source = line(&[(20.0, 44.02), (20.01, 44.02)]);
        let query = MemoryGeoQuery::default();
        let mut services = Services {
            query: &query,
            edit: &mut edit,
            gate: &RejectUnconfirmed,
            retry: RetryPolicy::new(1, Duration::ZERO),
        };
        let outcome = align(&mut services, &settings, -5, &candidate, &source, &BTreeSet::new())
            .expect("alignment runs");
        assert_eq!(outcome, Outcome::bare(ProcessingState::ErrorGeometryWrong));
        assert!(edit.writes().is_empty());
    }

    #[rstest]
    fn dry_run_plans_without_writing(settings: ConflationSettings) {
        let (mut edit, candidate) = edit_with_candidate();
        let source = line(&[(20.0, 44.000_1), (20.01, 44.000_1)]);
        let query = MemoryGeoQuery::default();
        let mut services = Services {
            query: &query,
            edit: &mut edit,
            gate: &AutoApprove,
            retry: RetryPolicy::new(1, Duration::ZERO),
        };
        let outcome = align(
            &mut services,
            &settings.with_dry_run(true),
            -5,
            &candidate,
            &source,
            &BTreeSet::new(),
        )
        .expect("alignment runs");
        assert_eq!(outcome, Outcome::bare(ProcessingState::CheckedPossible));
        assert!(edit.writes().is_empty());
        assert_eq!(edit.flushes(), 0);
    }

    #[rstest]
    fn removed_nodes_are_deleted_after_the_way_update(settings: ConflationSettings) {
        let (mut edit, candidate) = edit_with_candidate();
        let source = line(&[(20.0, 44.000_1), (20.01, 44.000_1)]);
        let query = MemoryGeoQuery::default();
        let mut services = Services {
            query: &query,
            edit: &mut edit,
            gate: &AutoApprove,
            retry: RetryPolicy::new(1, Duration::ZERO),
        };
        align(&mut services, &settings, -5, &candidate, &source, &BTreeSet::new())
            .expect("alignment runs");
        assert_eq!(
            edit.writes().last(),
            Some(&EditCall::DeleteNode(101))
        );
        assert!(edit.stored_node(101).is_none());
    }
}
