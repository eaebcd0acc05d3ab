//! Per-way processing states and the records that carry them between runs.

use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::source::SourceDataset;

/// Outcome of one conflation attempt for a source way.
///
/// Every state except [`ProcessingState::No`] is terminal. Ordinals are part
/// of the persisted format and never change; use [`ProcessingState::ordinal`]
/// rather than the declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum ProcessingState {
    /// Not yet attempted.
    No,
    /// All checks passed; edits were computed but not written.
    CheckedPossible,
    /// The map way matches the cadastre.
    Conflated,
    /// An endpoint pair is further apart than the configured threshold.
    ErrorEndPointsFarApart,
    /// A human rejected the geometry match.
    ErrorGeometryWrong,
    /// No map way is shared by the two entities.
    ErrorSharedWayNotFound,
    /// No map way belongs only to the entity.
    ErrorWayNotFound,
    /// Several map ways are shared by the two entities.
    ErrorMultipleSharedWays,
    /// Several map ways belong only to the entity.
    ErrorMultipleSingleWay,
    /// Candidate nodes carry tags.
    ErrorNodesWithTags,
    /// The candidate is a national border.
    ErrorNationalBorder,
    /// The candidate carries a tag outside the whitelist.
    ErrorUnexpectedTag,
    /// Candidate nodes are shared with non-boundary ways.
    ErrorNodeInOtherWays,
    /// Candidate nodes are shared with a national border way.
    ErrorNodeInNationalBorder,
    /// Candidate nodes belong to a non-boundary relation.
    ErrorNodeInOtherRelation,
    /// Candidate nodes belong to a national relation.
    ErrorNodeInNationalRelation,
    /// A geometry is not a valid line.
    ErrorInvalidShape,
    /// A geometry is a closed ring.
    ErrorClosedShape,
    /// Legacy state kept for ordinal stability; never produced.
    ErrorOsmWayIsMoreComplex,
    /// The source way belongs to more than two entities.
    ErrorOverlappingWays,
    /// The source way has too many nodes.
    ErrorTooManyNodes,
}

impl ProcessingState {
    /// Every state in ordinal order.
    pub const ALL: [Self; 21] = [
        Self::No,
        Self::CheckedPossible,
        Self::Conflated,
        Self::ErrorEndPointsFarApart,
        Self::ErrorGeometryWrong,
        Self::ErrorSharedWayNotFound,
        Self::ErrorWayNotFound,
        Self::ErrorMultipleSharedWays,
        Self::ErrorMultipleSingleWay,
        Self::ErrorNodesWithTags,
        Self::ErrorNationalBorder,
        Self::ErrorUnexpectedTag,
        Self::ErrorNodeInOtherWays,
        Self::ErrorNodeInNationalBorder,
        Self::ErrorNodeInOtherRelation,
        Self::ErrorNodeInNationalRelation,
        Self::ErrorInvalidShape,
        Self::ErrorClosedShape,
        Self::ErrorOsmWayIsMoreComplex,
        Self::ErrorOverlappingWays,
        Self::ErrorTooManyNodes,
    ];

    /// Stable persisted ordinal.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::No => 1,
            Self::CheckedPossible => 2,
            Self::Conflated => 3,
            Self::ErrorEndPointsFarApart => 4,
            Self::ErrorGeometryWrong => 5,
            Self::ErrorSharedWayNotFound => 6,
            Self::ErrorWayNotFound => 7,
            Self::ErrorMultipleSharedWays => 8,
            Self::ErrorMultipleSingleWay => 9,
            Self::ErrorNodesWithTags => 10,
            Self::ErrorNationalBorder => 11,
            Self::ErrorUnexpectedTag => 12,
            Self::ErrorNodeInOtherWays => 13,
            Self::ErrorNodeInNationalBorder => 14,
            Self::ErrorNodeInOtherRelation => 15,
            Self::ErrorNodeInNationalRelation => 16,
            Self::ErrorInvalidShape => 17,
            Self::ErrorClosedShape => 18,
            Self::ErrorOsmWayIsMoreComplex => 19,
            Self::ErrorOverlappingWays => 20,
            Self::ErrorTooManyNodes => 21,
        }
    }

    /// Look a state up by its persisted ordinal.
    #[must_use]
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.ordinal() == ordinal)
    }

    /// Persisted name, e.g. `ERROR_TOO_MANY_NODES`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::No => "NO",
            Self::CheckedPossible => "CHECKED_POSSIBLE",
            Self::Conflated => "CONFLATED",
            Self::ErrorEndPointsFarApart => "ERROR_END_POINTS_FAR_APART",
            Self::ErrorGeometryWrong => "ERROR_GEOMETRY_WRONG",
            Self::ErrorSharedWayNotFound => "ERROR_SHARED_WAY_NOT_FOUND",
            Self::ErrorWayNotFound => "ERROR_WAY_NOT_FOUND",
            Self::ErrorMultipleSharedWays => "ERROR_MULTIPLE_SHARED_WAYS",
            Self::ErrorMultipleSingleWay => "ERROR_MULTIPLE_SINGLE_WAY",
            Self::ErrorNodesWithTags => "ERROR_NODES_WITH_TAGS",
            Self::ErrorNationalBorder => "ERROR_NATIONAL_BORDER",
            Self::ErrorUnexpectedTag => "ERROR_UNEXPECTED_TAG",
            Self::ErrorNodeInOtherWays => "ERROR_NODE_IN_OTHER_WAYS",
            Self::ErrorNodeInNationalBorder => "ERROR_NODE_IN_NATIONAL_BORDER",
            Self::ErrorNodeInOtherRelation => "ERROR_NODE_IN_OTHER_RELATION",
            Self::ErrorNodeInNationalRelation => "ERROR_NODE_IN_NATIONAL_RELATION",
            Self::ErrorInvalidShape => "ERROR_INVALID_SHAPE",
            Self::ErrorClosedShape => "ERROR_CLOSED_SHAPE",
            Self::ErrorOsmWayIsMoreComplex => "ERROR_OSM_WAY_IS_MORE_COMPLEX",
            Self::ErrorOverlappingWays => "ERROR_OVERLAPPING_WAYS",
            Self::ErrorTooManyNodes => "ERROR_TOO_MANY_NODES",
        }
    }

    /// Look a state up by its persisted name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.name() == name)
    }

    /// Human-readable explanation for reports.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::No => "Not yet considered.",
            Self::CheckedPossible => {
                "Checked and the way can be conflated without problems, but conflation is not yet done."
            }
            Self::Conflated => "Conflated.",
            Self::ErrorEndPointsFarApart => {
                "First or last node from cadastre and map are too far apart. Context holds the distance in metres."
            }
            Self::ErrorGeometryWrong => "A reviewer rejected the geometry match.",
            Self::ErrorSharedWayNotFound => {
                "The way is shared between two entities, but no such way exists in the map."
            }
            Self::ErrorWayNotFound => {
                "The way touches only one entity, but no such way exists in the map. The map border may need splitting."
            }
            Self::ErrorMultipleSharedWays => {
                "Several map ways are shared between the two entities and probably need merging. Context lists them."
            }
            Self::ErrorMultipleSingleWay => {
                "Several map ways touch only this entity and probably need merging. Context lists them."
            }
            Self::ErrorNodesWithTags => {
                "Some nodes of the map way carry tags. Context lists the nodes."
            }
            Self::ErrorNationalBorder => "The map way is a national border and is never moved.",
            Self::ErrorUnexpectedTag => {
                "The map way carries an unexpected tag. Context names the tag."
            }
            Self::ErrorNodeInOtherWays => {
                "The map way shares nodes with ways that are not administrative borders. Context names the way."
            }
            Self::ErrorNodeInNationalBorder => {
                "The map way shares a node with a national border. Context names the border way."
            }
            Self::ErrorNodeInOtherRelation => {
                "The map way has a node in a relation that is not an administrative border. Context names the relation."
            }
            Self::ErrorNodeInNationalRelation => {
                "The map way has a node in a national border relation. Context names the relation."
            }
            Self::ErrorInvalidShape => "Invalid shape read from the input file.",
            Self::ErrorClosedShape => {
                "The way is a closed shape (enclave or exclave) and needs manual conflation."
            }
            Self::ErrorOsmWayIsMoreComplex => {
                "The map way has more nodes than the cadastre way."
            }
            Self::ErrorOverlappingWays => {
                "The way belongs to more than two entities, so some entities overlap in the cadastre."
            }
            Self::ErrorTooManyNodes => {
                "The cadastre way has too many nodes for a single map way and needs simplifying."
            }
        }
    }

    /// Whether the state ends processing for the way.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::No)
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A state together with the optional context explaining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Resulting state.
    pub state: ProcessingState,
    /// Free-form context such as conflicting ids or a distance.
    pub context: Option<String>,
}

impl Outcome {
    /// An outcome without context.
    #[must_use]
    pub const fn bare(state: ProcessingState) -> Self {
        Self {
            state,
            context: None,
        }
    }

    /// An outcome with context.
    #[must_use]
    pub fn with_context(state: ProcessingState, context: impl Into<String>) -> Self {
        Self {
            state,
            context: Some(context.into()),
        }
    }
}

/// Processing history of one source way.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProcessingRecord {
    /// Node ids of the source way.
    pub nodes: Vec<i64>,
    /// Label of the owning entities, filled on first attempt.
    #[cfg_attr(feature = "serde", serde(default))]
    pub relations: String,
    /// Current state.
    pub processed: ProcessingState,
    /// Context for the current state.
    #[cfg_attr(feature = "serde", serde(default))]
    pub error_context: Option<String>,
    /// Matched map way, when one was found.
    #[cfg_attr(feature = "serde", serde(default))]
    pub osm_way: Option<i64>,
}

impl ProcessingRecord {
    /// A fresh record for a source way that has not been attempted.
    #[must_use]
    pub const fn pending(nodes: Vec<i64>) -> Self {
        Self {
            nodes,
            relations: String::new(),
            processed: ProcessingState::No,
            error_context: None,
            osm_way: None,
        }
    }

    /// Store an outcome on the record.
    pub fn apply(&mut self, outcome: Outcome) {
        self.processed = outcome.state;
        self.error_context = outcome.context;
    }
}

/// All processing records keyed by source way id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct RecordSet {
    records: BTreeMap<i64, ProcessingRecord>,
}

impl RecordSet {
    /// Records for every way in `dataset`, all pending.
    #[must_use]
    pub fn fresh(dataset: &SourceDataset) -> Self {
        dataset
            .ways()
            .map(|way| (way.id, ProcessingRecord::pending(way.nodes.clone())))
            .collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record.
    #[must_use]
    pub fn get(&self, way_id: i64) -> Option<&ProcessingRecord> {
        self.records.get(&way_id)
    }

    /// Look up a record mutably.
    pub fn get_mut(&mut self, way_id: i64) -> Option<&mut ProcessingRecord> {
        self.records.get_mut(&way_id)
    }

    /// Insert or replace a record.
    pub fn insert(&mut self, way_id: i64, record: ProcessingRecord) -> Option<ProcessingRecord> {
        self.records.insert(way_id, record)
    }

    /// Whether a record exists for `way_id`.
    #[must_use]
    pub fn contains(&self, way_id: i64) -> bool {
        self.records.contains_key(&way_id)
    }

    /// Iterate records in ascending way id order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &ProcessingRecord)> + '_ {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    /// Ids of pending ways, highest first.
    #[must_use]
    pub fn pending_ids_descending(&self) -> Vec<i64> {
        self.records
            .iter()
            .rev()
            .filter(|(_, record)| !record.processed.is_terminal())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Aggregate counts for reporting.
    #[must_use]
    pub fn summary(&self) -> RecordSummary {
        let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
        let mut processed_ways = 0;
        let mut ways_with_map_way = 0;
        for record in self.records.values() {
            *counts.entry(record.processed.ordinal()).or_default() += 1;
            if record.processed.is_terminal() {
                processed_ways += 1;
            }
            if record.osm_way.is_some() {
                ways_with_map_way += 1;
            }
        }
        let states = counts
            .into_iter()
            .filter_map(|(ordinal, count)| {
                ProcessingState::from_ordinal(ordinal).map(|state| StateCount {
                    state,
                    ordinal,
                    count,
                    description: state.description(),
                })
            })
            .collect();
        RecordSummary {
            total_ways: self.records.len(),
            processed_ways,
            ways_with_map_way,
            states,
        }
    }
}

impl FromIterator<(i64, ProcessingRecord)> for RecordSet {
    fn from_iter<I: IntoIterator<Item = (i64, ProcessingRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// Count of records in one state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StateCount {
    /// State being counted.
    pub state: ProcessingState,
    /// Persisted ordinal of the state.
    pub ordinal: u8,
    /// Number of records in the state.
    pub count: usize,
    /// Human-readable description.
    pub description: &'static str,
}

/// Progress overview derived from a [`RecordSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RecordSummary {
    /// Number of source ways.
    pub total_ways: usize,
    /// Ways in a terminal state.
    pub processed_ways: usize,
    /// Ways for which a map way was matched.
    pub ways_with_map_way: usize,
    /// Per-state counts in ordinal order; states with no records are omitted.
    pub states: Vec<StateCount>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn ordinals_are_stable_and_contiguous() {
        let ordinals: Vec<u8> = ProcessingState::ALL
            .iter()
            .map(|state| state.ordinal())
            .collect();
        assert_eq!(ordinals, (1..=21).collect::<Vec<u8>>());
    }

    #[rstest]
    #[case(ProcessingState::No, 1)]
    #[case(ProcessingState::Conflated, 3)]
    #[case(ProcessingState::ErrorOsmWayIsMoreComplex, 19)]
    #[case(ProcessingState::ErrorTooManyNodes, 21)]
    fn ordinal_round_trips(#[case] state: ProcessingState, #[case] ordinal: u8) {
        assert_eq!(state.ordinal(), ordinal);
        assert_eq!(ProcessingState::from_ordinal(ordinal), Some(state));
        assert_eq!(ProcessingState::from_name(state.name()), Some(state));
    }

    #[rstest]
    fn only_no_is_pending() {
        let pending: Vec<_> = ProcessingState::ALL
            .into_iter()
            .filter(|state| !state.is_terminal())
            .collect();
        assert_eq!(pending, vec![ProcessingState::No]);
    }

    fn record(state: ProcessingState, osm_way: Option<i64>) -> ProcessingRecord {
        ProcessingRecord {
            processed: state,
            osm_way,
            ..ProcessingRecord::pending(vec![1, 2])
        }
    }

    #[rstest]
    fn pending_ids_are_descending_and_skip_terminal_records() {
        let set: RecordSet = [
            (10, record(ProcessingState::No, None)),
            (30, record(ProcessingState::No, None)),
            (20, record(ProcessingState::Conflated, Some(5))),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.pending_ids_descending(), vec![30, 10]);
    }

    #[rstest]
    fn summary_counts_states_in_ordinal_order() {
        let set: RecordSet = [
            (1, record(ProcessingState::ErrorTooManyNodes, None)),
            (2, record(ProcessingState::Conflated, Some(7))),
            (3, record(ProcessingState::Conflated, Some(8))),
            (4, record(ProcessingState::No, None)),
        ]
        .into_iter()
        .collect();
        let summary = set.summary();
        assert_eq!(summary.total_ways, 4);
        assert_eq!(summary.processed_ways, 3);
        assert_eq!(summary.ways_with_map_way, 2);
        let counted: Vec<(ProcessingState, usize)> = summary
            .states
            .iter()
            .map(|entry| (entry.state, entry.count))
            .collect();
        assert_eq!(
            counted,
            vec![
                (ProcessingState::No, 1),
                (ProcessingState::Conflated, 2),
                (ProcessingState::ErrorTooManyNodes, 1),
            ]
        );
    }
}
