//! Ordered safety gates deciding whether a candidate may be realigned.
//!
//! Gates run in a fixed order and the first failure wins:
//!
//! 1. source size
//! 2. shape validity
//! 3. closed shapes
//! 4. geometric equality (already conflated)
//! 5. national border
//! 6. tag whitelist
//! 7. ways and relations sharing the candidate's nodes
//! 8. tagged nodes
//! 9. endpoint distance

use std::collections::BTreeSet;

use geo::LineString;
use log::debug;

use crate::element::{AdminLevel, Element, ElementSet, Relation, Tags, Way};
use crate::error::ConflateError;
use crate::geodesy::{endpoint_pairing, is_same_geometry, is_valid_line, oriented};
use crate::matcher::Candidate;
use crate::services::Services;
use crate::settings::ConflationSettings;
use crate::source::SourceWay;
use crate::state::{Outcome, ProcessingState};
use crate::unglue::unglue_ways;

/// Way tags that never block conflation.
pub const ALLOWED_WAY_TAGS: [&str; 7] = [
    "admin_level",
    "boundary",
    "note",
    "source",
    "fixme",
    "type",
    "int_name",
];

/// The only node tag tolerated on a candidate's nodes.
pub const PROVENANCE_TAG: &str = "created_by";

/// Verdict of the gate chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    /// A gate ended processing.
    Terminal(Outcome),
    /// Every gate passed.
    Eligible {
        /// Source geometry oriented to follow the candidate.
        source: LineString,
        /// Candidate nodes also used by other ways; never deleted.
        shared_nodes: BTreeSet<i64>,
    },
}

/// Run every gate for `source` against `candidate`.
///
/// # Errors
///
/// Returns [`ConflateError`] when a remote call fails permanently.
pub fn check_eligibility(
    services: &mut Services<'_>,
    settings: &ConflationSettings,
    source: &SourceWay,
    candidate: &Candidate,
) -> Result<Eligibility, ConflateError> {
    if let Some(outcome) = check_shape(settings, source, candidate) {
        return Ok(Eligibility::Terminal(outcome));
    }
    if AdminLevel::from_tags(&candidate.way.tags).is_national() {
        return Ok(Eligibility::Terminal(Outcome::bare(
            ProcessingState::ErrorNationalBorder,
        )));
    }
    if let Some(tag) = first_unexpected_tag(&candidate.way.tags) {
        return Ok(Eligibility::Terminal(Outcome::with_context(
            ProcessingState::ErrorUnexpectedTag,
            tag,
        )));
    }

    let retry = services.retry;
    let way_id = candidate.way.id;
    let mut sharing = retry.run("query entities sharing nodes", || {
        services.query.entities_sharing_nodes(way_id)
    })?;
    if let Some(outcome) = check_sharing_ways(services, settings, candidate, &mut sharing)? {
        return Ok(Eligibility::Terminal(outcome));
    }
    if let Some(outcome) = check_sharing_relations(sharing.relations.values()) {
        return Ok(Eligibility::Terminal(outcome));
    }

    let tagged = tagged_node_ids(candidate);
    if !tagged.is_empty() {
        return Ok(Eligibility::Terminal(Outcome::with_context(
            ProcessingState::ErrorNodesWithTags,
            tagged,
        )));
    }

    let Some(pairing) = endpoint_pairing(&candidate.geometry, &source.geometry) else {
        return Ok(Eligibility::Terminal(Outcome::bare(
            ProcessingState::ErrorInvalidShape,
        )));
    };
    if pairing.distance_m > settings.max_endpoint_distance_m {
        return Ok(Eligibility::Terminal(Outcome::with_context(
            ProcessingState::ErrorEndPointsFarApart,
            format!("{:.2}", pairing.distance_m),
        )));
    }

    debug!(
        "way {} eligible against source {} (reverse: {})",
        candidate.way.id, source.id, pairing.reverse
    );
    Ok(Eligibility::Eligible {
        source: oriented(&source.geometry, pairing.reverse),
        shared_nodes: shared_node_ids(candidate, &sharing),
    })
}

/// Size, validity, closure and equality gates. These need no remote calls.
fn check_shape(
    settings: &ConflationSettings,
    source: &SourceWay,
    candidate: &Candidate,
) -> Option<Outcome> {
    if source.geometry.0.len() >= settings.max_source_nodes {
        return Some(Outcome::bare(ProcessingState::ErrorTooManyNodes));
    }
    if !is_valid_line(&source.geometry) || !is_valid_line(&candidate.geometry) {
        return Some(Outcome::bare(ProcessingState::ErrorInvalidShape));
    }
    if source.geometry.is_closed() || candidate.geometry.is_closed() || candidate.way.is_closed() {
        return Some(Outcome::bare(ProcessingState::ErrorClosedShape));
    }
    if is_same_geometry(
        &candidate.geometry,
        &source.geometry,
        settings.equality_tolerance_m,
    ) {
        return Some(Outcome::bare(ProcessingState::Conflated));
    }
    None
}

/// First tag key outside the whitelist, in key order.
#[must_use]
pub fn first_unexpected_tag(tags: &Tags) -> Option<&str> {
    tags.keys()
        .map(String::as_str)
        .find(|key| !ALLOWED_WAY_TAGS.contains(key) && !key.starts_with("name"))
}

/// Way gate, separating glued ways when the policy allows it.
///
/// A way that was separated is re-read so `sharing` reflects the live node
/// lists that decide which removed nodes are still in use.
fn check_sharing_ways(
    services: &mut Services<'_>,
    settings: &ConflationSettings,
    candidate: &Candidate,
    sharing: &mut ElementSet,
) -> Result<Option<Outcome>, ConflateError> {
    let others: Vec<Way> = sharing
        .ways
        .values()
        .filter(|way| way.id != candidate.way.id)
        .cloned()
        .collect();
    for way in &others {
        if AdminLevel::from_tags(&way.tags).is_national() {
            return Ok(Some(Outcome::with_context(
                ProcessingState::ErrorNodeInNationalBorder,
                way.id.to_string(),
            )));
        }
        if is_administrative_boundary(way) {
            continue;
        }
        let separated = settings.unglue_ways_as_needed
            && (unglue_ways(services, settings, candidate.way.id, way.id)?
                || unglue_ways(services, settings, way.id, candidate.way.id)?);
        if !separated {
            return Ok(Some(Outcome::with_context(
                ProcessingState::ErrorNodeInOtherWays,
                way.id.to_string(),
            )));
        }
        if !settings.dry_run {
            let retry = services.retry;
            let live = retry.run("read separated way", || services.edit.way(way.id))?;
            sharing.insert(Element::Way(live));
        }
    }
    Ok(None)
}

fn is_administrative_boundary(way: &Way) -> bool {
    way.tags.get("boundary").map(String::as_str) == Some("administrative")
}

/// Relation gate. Cities (`place=city`) may lack the boundary tags.
fn check_sharing_relations<'a, I>(relations: I) -> Option<Outcome>
where
    I: IntoIterator<Item = &'a Relation>,
{
    relations
        .into_iter()
        .find_map(|relation| relation_conflict(relation).map(|state| {
            Outcome::with_context(state, relation.id.to_string())
        }))
}

fn relation_conflict(relation: &Relation) -> Option<ProcessingState> {
    let tags = &relation.tags;
    let is_city = tags.get("place").map(String::as_str) == Some("city");
    let level = AdminLevel::from_tags(tags);
    if !level.is_present() && !is_city {
        return Some(ProcessingState::ErrorNodeInOtherRelation);
    }
    if level.is_national() {
        return Some(ProcessingState::ErrorNodeInNationalRelation);
    }
    match tags.get("type").map(String::as_str) {
        None => return Some(ProcessingState::ErrorNodeInOtherRelation),
        Some(kind) if kind != "boundary" && !is_city => {
            return Some(ProcessingState::ErrorNodeInOtherRelation);
        }
        Some(_) => {}
    }
    match tags.get("boundary").map(String::as_str) {
        None if !is_city => Some(ProcessingState::ErrorNodeInOtherRelation),
        Some(boundary) if boundary != "administrative" && boundary != "census" => {
            Some(ProcessingState::ErrorNodeInOtherRelation)
        }
        _ => None,
    }
}

fn tagged_node_ids(candidate: &Candidate) -> String {
    candidate
        .nodes
        .iter()
        .filter(|node| {
            !node.tags.is_empty()
                && !(node.tags.len() == 1 && node.tags.contains_key(PROVENANCE_TAG))
        })
        .map(|node| node.id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn shared_node_ids(candidate: &Candidate, sharing: &ElementSet) -> BTreeSet<i64> {
    let own: BTreeSet<i64> = candidate.way.nodes.iter().copied().collect();
    sharing
        .ways
        .values()
        .filter(|way| way.id != candidate.way.id)
        .flat_map(|way| way.nodes.iter().copied())
        .filter(|id| own.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Member;
    use crate::gate::{AutoApprove, ConfirmationGate, ConfirmationRequest, RejectUnconfirmed};
    use crate::retry::RetryPolicy;
    use crate::test_support::{
        MemoryGeoQuery, RecordingEditService, line_way, offset_north, straight_line,
    };
    use geo::Coord;
    use rstest::{fixture, rstest};
    use std::time::Duration;

    const CANDIDATE_ID: i64 = 500;

    #[fixture]
    fn settings() -> ConflationSettings {
        ConflationSettings::default().without_pauses()
    }

    fn candidate(coords: &[(f64, f64)], tags: &[(&str, &str)]) -> Candidate {
        let set = line_way(CANDIDATE_ID, 1000, coords);
        let mut way = set.ways.get(&CANDIDATE_ID).cloned().expect("way built");
        for (k, v) in tags {
            way.tags.insert((*k).to_owned(), (*v).to_owned());
        }
        Candidate::resolve(way, &set).expect("nodes present")
    }

    fn boundary_candidate(coords: &[(f64, f64)]) -> Candidate {
        candidate(
            coords,
            &[("boundary", "administrative"), ("admin_level", "9")],
        )
    }

    fn source(coords: &[(f64, f64)]) -> SourceWay {
        SourceWay {
            id: -1,
            geometry: coords.iter().map(|&(x, y)| Coord { x, y }).collect(),
        }
    }

    fn run(
        query: &MemoryGeoQuery,
        settings: &ConflationSettings,
        source: &SourceWay,
        candidate: &Candidate,
    ) -> Eligibility {
        let mut edit = RecordingEditService::default();
        let mut services = Services {
            query,
            edit: &mut edit,
            gate: &AutoApprove,
            retry: RetryPolicy::new(1, Duration::ZERO),
        };
        check_eligibility(&mut services, settings, source, candidate).expect("checks run")
    }

    fn terminal_state(eligibility: &Eligibility) -> Option<ProcessingState> {
        match eligibility {
            Eligibility::Terminal(outcome) => Some(outcome.state),
            Eligibility::Eligible { .. } => None,
        }
    }

    const CANDIDATE: [(f64, f64); 3] = [(20.0, 44.0), (20.005, 44.0), (20.01, 44.0)];
    const SHIFTED: [(f64, f64); 4] = [
        (20.0, 44.000_1),
        (20.003, 44.000_1),
        (20.006, 44.000_1),
        (20.01, 44.000_1),
    ];

    #[rstest]
    fn too_many_source_nodes(settings: ConflationSettings) {
        let long = straight_line((20.0, 44.0), (20.2, 44.0), 2001);
        let eligibility = run(
            &MemoryGeoQuery::default(),
            &settings,
            &source(&long),
            &boundary_candidate(&CANDIDATE),
        );
        assert_eq!(
            terminal_state(&eligibility),
            Some(ProcessingState::ErrorTooManyNodes)
        );
    }

    #[rstest]
    fn closed_sources_are_rejected(settings: ConflationSettings) {
        let ring = [(20.0, 44.0), (20.01, 44.0), (20.01, 44.01), (20.0, 44.0)];
        let eligibility = run(
            &MemoryGeoQuery::default(),
            &settings,
            &source(&ring),
            &boundary_candidate(&CANDIDATE),
        );
        assert_eq!(
            terminal_state(&eligibility),
            Some(ProcessingState::ErrorClosedShape)
        );
    }

    #[rstest]
    fn degenerate_sources_are_invalid(settings: ConflationSettings) {
        let eligibility = run(
            &MemoryGeoQuery::default(),
            &settings,
            &source(&[(20.0, 44.0)]),
            &boundary_candidate(&CANDIDATE),
        );
        assert_eq!(
            terminal_state(&eligibility),
            Some(ProcessingState::ErrorInvalidShape)
        );
    }

    #[rstest]
    fn identical_geometry_is_already_conflated(settings: ConflationSettings) {
        let query = MemoryGeoQuery::default();
        let nearly: Vec<(f64, f64)> = CANDIDATE.iter().rev().copied().collect();
        let eligibility = run(
            &query,
            &settings,
            &source(&nearly),
            &boundary_candidate(&CANDIDATE),
        );
        assert_eq!(
            terminal_state(&eligibility),
            Some(ProcessingState::Conflated)
        );
        assert_eq!(query.calls(), 0);
    }

    #[rstest]
    fn national_borders_are_never_moved(settings: ConflationSettings) {
        let eligibility = run(
            &MemoryGeoQuery::default(),
            &settings,
            &source(&SHIFTED),
            &candidate(&CANDIDATE, &[("boundary", "administrative"), ("admin_level", "2")]),
        );
        assert_eq!(
            terminal_state(&eligibility),
            Some(ProcessingState::ErrorNationalBorder)
        );
    }

    #[rstest]
    fn unexpected_tags_are_named(settings: ConflationSettings) {
        let eligibility = run(
            &MemoryGeoQuery::default(),
            &settings,
            &source(&SHIFTED),
            &candidate(&CANDIDATE, &[("boundary", "administrative"), ("highway", "track")]),
        );
        assert_eq!(
            eligibility,
            Eligibility::Terminal(Outcome::with_context(
                ProcessingState::ErrorUnexpectedTag,
                "highway"
            ))
        );
    }

    #[rstest]
    #[case(&[("name", "x"), ("name:sr", "y"), ("note", "z")], None)]
    #[case(&[("boundary", "administrative"), ("landuse", "forest")], Some("landuse"))]
    #[case(&[("zzz", "1"), ("aaa", "1")], Some("aaa"))]
    fn whitelist_reports_first_key(#[case] pairs: &[(&str, &str)], #[case] expected: Option<&str>) {
        let tags: Tags = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        assert_eq!(first_unexpected_tag(&tags), expected);
    }

    fn sharing_with(way: Way) -> MemoryGeoQuery {
        let set: ElementSet = [Element::Way(way)].into_iter().collect();
        MemoryGeoQuery::default().with_sharing(CANDIDATE_ID, set)
    }

    #[rstest]
    fn shared_national_border_way(settings: ConflationSettings) {
        let query = sharing_with(Way::new(77, vec![1001]).with_tag("admin_level", "2"));
        let eligibility = run(&query, &settings, &source(&SHIFTED), &boundary_candidate(&CANDIDATE));
        assert_eq!(
            eligibility,
            Eligibility::Terminal(Outcome::with_context(
                ProcessingState::ErrorNodeInNationalBorder,
                "77"
            ))
        );
    }

    #[rstest]
    fn shared_non_boundary_way_without_unglue(settings: ConflationSettings) {
        let query = sharing_with(Way::new(TRACK_ID, vec![1001]).with_tag("highway", "track"));
        let eligibility = run(&query, &settings, &source(&SHIFTED), &boundary_candidate(&CANDIDATE));
        assert_eq!(
            eligibility,
            Eligibility::Terminal(Outcome::with_context(
                ProcessingState::ErrorNodeInOtherWays,
                "78"
            ))
        );
    }

    /// Approves only separations that splice new nodes into way `.0`.
    struct ApproveUnglueOf(i64);

    impl ConfirmationGate for ApproveUnglueOf {
        fn confirm(&self, request: &ConfirmationRequest) -> bool {
            matches!(
                request,
                ConfirmationRequest::Unglue { boundary_way, .. } if *boundary_way == self.0
            )
        }
    }

    const TRACK_ID: i64 = 78;

    /// The candidate and a track crossing it at its middle node, both live.
    fn glued_track(track_nodes: Vec<i64>) -> (MemoryGeoQuery, RecordingEditService, Candidate) {
        let candidate = boundary_candidate(&CANDIDATE);
        let track = Way::new(TRACK_ID, track_nodes).with_tag("highway", "track");
        let mut edit = RecordingEditService::from_elements(&line_way(CANDIDATE_ID, 1000, &CANDIDATE));
        edit.insert_way(track.clone());
        (sharing_with(track), edit, candidate)
    }

    fn run_unglue(
        query: &MemoryGeoQuery,
        edit: &mut RecordingEditService,
        gate: &dyn ConfirmationGate,
        candidate: &Candidate,
    ) -> Eligibility {
        let settings = ConflationSettings::default()
            .without_pauses()
            .with_unglue_ways_as_needed(true);
        let mut services = Services {
            query,
            edit,
            gate,
            retry: RetryPolicy::new(1, Duration::ZERO),
        };
        check_eligibility(&mut services, &settings, &source(&SHIFTED), candidate)
            .expect("checks run")
    }

    #[rstest]
    fn separated_boundary_continues_the_checks() {
        let (query, mut edit, candidate) = glued_track(vec![7, 1001, 8]);
        let eligibility = run_unglue(&query, &mut edit, &AutoApprove, &candidate);
        assert!(matches!(eligibility, Eligibility::Eligible { .. }), "got {eligibility:?}");
        let boundary = edit.stored_way(CANDIDATE_ID).expect("boundary stored");
        assert!(!boundary.nodes.contains(&1001));
        assert_eq!(
            edit.stored_way(TRACK_ID).map(|way| way.nodes.clone()),
            Some(vec![7, 1001, 8])
        );
    }

    #[rstest]
    fn second_direction_separates_when_first_is_declined() {
        let (query, mut edit, candidate) = glued_track(vec![7, 1001, 8]);
        let eligibility = run_unglue(&query, &mut edit, &ApproveUnglueOf(TRACK_ID), &candidate);
        match eligibility {
            Eligibility::Eligible { shared_nodes, .. } => assert!(shared_nodes.is_empty()),
            other => panic!("expected eligibility, got {other:?}"),
        }
        let boundary = edit.stored_way(CANDIDATE_ID).expect("boundary stored");
        assert!(boundary.nodes.contains(&1001));
        let track = edit.stored_way(TRACK_ID).expect("track stored");
        assert!(!track.nodes.contains(&1001));
    }

    #[rstest]
    #[case::both_directions_declined(vec![7, 1001, 8], true)]
    #[case::track_ends_on_the_boundary(vec![1001, 8], false)]
    fn unseparated_track_blocks_conflation(
        #[case] track_nodes: Vec<i64>,
        #[case] reject: bool,
    ) {
        let (query, mut edit, candidate) = glued_track(track_nodes);
        let gate: &dyn ConfirmationGate = if reject { &RejectUnconfirmed } else { &AutoApprove };
        let eligibility = run_unglue(&query, &mut edit, gate, &candidate);
        assert_eq!(
            eligibility,
            Eligibility::Terminal(Outcome::with_context(
                ProcessingState::ErrorNodeInOtherWays,
                TRACK_ID.to_string()
            ))
        );
        assert!(edit.writes().is_empty());
    }

    #[rstest]
    #[case(&[("type", "route")], ProcessingState::ErrorNodeInOtherRelation)]
    #[case(&[("admin_level", "2"), ("type", "boundary"), ("boundary", "administrative")], ProcessingState::ErrorNodeInNationalRelation)]
    #[case(&[("admin_level", "8"), ("boundary", "administrative")], ProcessingState::ErrorNodeInOtherRelation)]
    #[case(&[("admin_level", "8"), ("type", "boundary"), ("boundary", "protected_area")], ProcessingState::ErrorNodeInOtherRelation)]
    fn conflicting_relations(
        settings: ConflationSettings,
        #[case] pairs: &[(&str, &str)],
        #[case] expected: ProcessingState,
    ) {
        let mut relation = Relation::new(90, vec![Member::way(CANDIDATE_ID, "outer")]);
        for (k, v) in pairs {
            relation = relation.with_tag(*k, *v);
        }
        let set: ElementSet = [Element::Relation(relation)].into_iter().collect();
        let query = MemoryGeoQuery::default().with_sharing(CANDIDATE_ID, set);
        let eligibility = run(&query, &settings, &source(&SHIFTED), &boundary_candidate(&CANDIDATE));
        assert_eq!(
            eligibility,
            Eligibility::Terminal(Outcome::with_context(expected, "90"))
        );
    }

    #[rstest]
    #[case(&[("place", "city"), ("type", "multipolygon")])]
    #[case(&[("admin_level", "9"), ("type", "boundary"), ("boundary", "census")])]
    fn tolerated_relations(settings: ConflationSettings, #[case] pairs: &[(&str, &str)]) {
        let mut relation = Relation::new(91, vec![Member::way(CANDIDATE_ID, "outer")]);
        for (k, v) in pairs {
            relation = relation.with_tag(*k, *v);
        }
        let set: ElementSet = [Element::Relation(relation)].into_iter().collect();
        let query = MemoryGeoQuery::default().with_sharing(CANDIDATE_ID, set);
        let eligibility = run(&query, &settings, &source(&SHIFTED), &boundary_candidate(&CANDIDATE));
        assert_eq!(terminal_state(&eligibility), None);
    }

    #[rstest]
    fn tagged_nodes_are_listed(settings: ConflationSettings) {
        let mut candidate = boundary_candidate(&CANDIDATE);
        if let Some(node) = candidate.nodes.get_mut(1) {
            node.tags.insert("barrier".into(), "gate".into());
        }
        if let Some(node) = candidate.nodes.get_mut(2) {
            node.tags.insert(PROVENANCE_TAG.into(), "JOSM".into());
        }
        let eligibility = run(&MemoryGeoQuery::default(), &settings, &source(&SHIFTED), &candidate);
        assert_eq!(
            eligibility,
            Eligibility::Terminal(Outcome::with_context(
                ProcessingState::ErrorNodesWithTags,
                "1001"
            ))
        );
    }

    #[rstest]
    fn far_endpoints_report_distance(settings: ConflationSettings) {
        let far_end = offset_north((20.01, 44.0), 500.0);
        let shifted = [(20.0, 44.0), (20.004, 44.0), (20.007, 44.0), far_end];
        let eligibility = run(
            &MemoryGeoQuery::default(),
            &settings.with_max_endpoint_distance_m(50.0),
            &source(&shifted),
            &boundary_candidate(&CANDIDATE),
        );
        match eligibility {
            Eligibility::Terminal(Outcome {
                state: ProcessingState::ErrorEndPointsFarApart,
                context: Some(context),
            }) => {
                let meters: f64 = context.parse().expect("numeric context");
                assert!((meters - 500.0).abs() < 1.0, "got {context}");
                assert_eq!(context.split('.').nth(1).map(str::len), Some(2));
            }
            other => panic!("expected far endpoints, got {other:?}"),
        }
    }

    #[rstest]
    fn eligible_sources_follow_candidate_direction(settings: ConflationSettings) {
        let reversed: Vec<(f64, f64)> = SHIFTED.iter().rev().copied().collect();
        let eligibility = run(
            &MemoryGeoQuery::default(),
            &settings,
            &source(&reversed),
            &boundary_candidate(&CANDIDATE),
        );
        match eligibility {
            Eligibility::Eligible { source, .. } => {
                assert_eq!(source.0.first().map(|c| c.x), Some(20.0));
            }
            other => panic!("expected eligibility, got {other:?}"),
        }
    }
}
