//! Property-based tests for alignment edit scripts.
//!
//! # Invariants tested
//!
//! - **Counts:** a way of `M` nodes aligned to `N` source vertices gets
//!   `max(0, N - M)` insertions and `max(0, M - N)` removals.
//! - **Final node:** the way's last node lands exactly on the last vertex.
//! - **Order:** the new node list has one entry per source vertex.
//! - **Shared nodes:** nodes used by other ways are never deleted.

use std::collections::BTreeSet;

use conflation_core::{EditScript, Node, NodeSlot, plan_alignment};
use geo::{Coord, LineString};
use proptest::prelude::*;

fn coords(len: usize) -> impl Strategy<Value = Vec<Coord>> {
    prop::collection::vec((19.0_f64..21.0, 43.0_f64..45.0), len)
        .prop_map(|pairs| pairs.into_iter().map(|(x, y)| Coord { x, y }).collect())
}

fn way_nodes(locations: &[Coord]) -> Vec<Node> {
    locations
        .iter()
        .zip(1_i64..)
        .map(|(location, id)| Node::new(id, *location))
        .collect()
}

fn plan(way: &[Coord], source: &[Coord], shared: &BTreeSet<i64>) -> EditScript {
    let source: LineString = source.iter().copied().collect();
    plan_alignment(1, &way_nodes(way), &source, shared).expect("non-empty inputs")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: insertion and removal counts follow the length difference.
    #[test]
    fn counts_follow_length_difference(
        way in (2_usize..40).prop_flat_map(coords),
        source in (2_usize..40).prop_flat_map(coords),
    ) {
        let script = plan(&way, &source, &BTreeSet::new());
        prop_assert_eq!(script.insertions.len(), source.len().saturating_sub(way.len()));
        prop_assert_eq!(script.removals.len(), way.len().saturating_sub(source.len()));
        prop_assert_eq!(script.node_order.len(), source.len());
    }

    /// Property: the final node always lands on the final source vertex.
    #[test]
    fn final_node_matches_source_end(
        way in (2_usize..40).prop_flat_map(coords),
        source in (2_usize..40).prop_flat_map(coords),
    ) {
        let script = plan(&way, &source, &BTreeSet::new());
        let last_move = script.moves.last().expect("final node always moves");
        prop_assert_eq!(last_move.node_id, i64::try_from(way.len()).expect("small way"));
        prop_assert_eq!(Some(&last_move.to), source.last());
        prop_assert_eq!(
            script.node_order.last(),
            Some(&NodeSlot::Existing(last_move.node_id))
        );
    }

    /// Property: removed nodes shared with other ways are only detached.
    #[test]
    fn shared_nodes_are_never_deleted(
        way in (3_usize..40).prop_flat_map(coords),
        source_len in 2_usize..3,
        shared_id in 2_i64..3,
    ) {
        let source: Vec<Coord> = way.iter().take(source_len).copied().collect();
        let shared = BTreeSet::from([shared_id]);
        let script = plan(&way, &source, &shared);
        for removal in &script.removals {
            prop_assert_eq!(removal.delete, removal.node_id != shared_id);
        }
    }
}
