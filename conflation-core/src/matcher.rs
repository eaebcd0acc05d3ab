//! Finds the map way corresponding to a source way.

use geo::LineString;
use log::debug;

use crate::element::{ElementSet, MissingNodeError, Node, Way};
use crate::error::ConflateError;
use crate::resolver::Ownership;
use crate::retry::RetryPolicy;
use crate::services::GeoQueryService;
use crate::state::{Outcome, ProcessingState};

/// A map way with its nodes resolved in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The way as returned by the query service.
    pub way: Way,
    /// Nodes in way order.
    pub nodes: Vec<Node>,
    /// Line through the nodes.
    pub geometry: LineString,
}

impl Candidate {
    /// Resolve `way` against the nodes of `elements`.
    ///
    /// # Errors
    ///
    /// Returns [`MissingNodeError`] when a node is absent from `elements`.
    pub fn resolve(way: Way, elements: &ElementSet) -> Result<Self, MissingNodeError> {
        let nodes = elements.resolve_nodes(&way)?;
        let geometry = nodes.iter().map(|node| node.location).collect();
        Ok(Self {
            way,
            nodes,
            geometry,
        })
    }
}

/// Result of looking for a counterpart way.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Exactly one candidate exists.
    Found(Candidate),
    /// Matching ended in a terminal state.
    Unmatched(Outcome),
}

/// Look up the single map way matching `ownership`.
///
/// Overlapping ownership is terminal without any query.
///
/// # Errors
///
/// Returns [`ConflateError`] when the query fails permanently or returns a
/// way without its nodes.
pub fn find_candidate(
    query: &dyn GeoQueryService,
    retry: &RetryPolicy,
    ownership: &Ownership,
) -> Result<MatchOutcome, ConflateError> {
    let (response, not_found, multiple) = match ownership {
        Ownership::Overlapping(_) => {
            return Ok(MatchOutcome::Unmatched(Outcome::bare(
                ProcessingState::ErrorOverlappingWays,
            )));
        }
        Ownership::Shared(first, second) => (
            retry.run("shared way query", || query.shared_ways(first, second))?,
            ProcessingState::ErrorSharedWayNotFound,
            ProcessingState::ErrorMultipleSharedWays,
        ),
        Ownership::Single(entity) => (
            retry.run("single way query", || query.single_ways(entity))?,
            ProcessingState::ErrorWayNotFound,
            ProcessingState::ErrorMultipleSingleWay,
        ),
    };

    let mut ways = response.ways.values();
    match (ways.next(), ways.next()) {
        (None, _) => Ok(MatchOutcome::Unmatched(Outcome::bare(not_found))),
        (Some(way), None) => {
            debug!("matched map way {}", way.id);
            let candidate = Candidate::resolve(way.clone(), &response)?;
            Ok(MatchOutcome::Found(candidate))
        }
        (Some(_), Some(_)) => {
            let ids = response
                .ways
                .keys()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            Ok(MatchOutcome::Unmatched(Outcome::with_context(multiple, ids)))
        }
    }
}
