//! Area comparison between cadastre entities and their map counterparts.
//!
//! Both sides are assembled into polygons from their relation members:
//! member ways are chained end to end into closed rings, `inner` rings are
//! subtracted and every other role adds area.

use geo::{Area, BooleanOps, LineString, MultiPolygon, Polygon};
use log::{info, warn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element::{ElementSet, MissingNodeError, Relation, Way};
use crate::retry::RetryPolicy;
use crate::services::{GeoQueryService, ServiceError};
use crate::source::{AdminEntity, SourceDataset};

/// Metric value recorded when no map polygon could be compared.
pub const UNMEASURED: f64 = -1.0;

/// Errors raised while assembling polygons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    /// Member ways starting at this way never close into a ring.
    #[error("ways starting at {way_id} do not form a closed ring")]
    UnclosedRing {
        /// First way of the open chain.
        way_id: i64,
    },
    /// A member way is missing from the element set.
    #[error("relation {relation_id} references missing way {way_id}")]
    MissingWay {
        /// Relation holding the reference.
        relation_id: i64,
        /// Missing way identifier.
        way_id: i64,
    },
    /// A ring node is missing from the element set.
    #[error(transparent)]
    MissingNode(#[from] MissingNodeError),
}

/// Errors raised while measuring one entity.
#[derive(Debug, Error)]
pub enum QualityError {
    /// The cadastre relation is absent from the dataset.
    #[error("cadastre relation {relation_id} not found")]
    UnknownRelation {
        /// Cadastre relation identifier.
        relation_id: i64,
    },
    /// The cadastre polygon could not be assembled.
    #[error("cadastre relation {relation_id} has broken geometry")]
    Cadastre {
        /// Cadastre relation identifier.
        relation_id: i64,
        /// Assembly failure.
        #[source]
        source: RingError,
    },
    /// The boundary query failed permanently.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Measured agreement between one cadastre entity and the map.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QualityRecord {
    /// Cadastre reference code.
    pub reference: String,
    /// Cadastre entity name.
    pub name: String,
    /// Name of the matched map relation.
    #[cfg_attr(feature = "serde", serde(default))]
    pub map_name: Option<String>,
    /// Matched map relation identifier.
    #[cfg_attr(feature = "serde", serde(default))]
    pub relation_id: Option<i64>,
    /// Share of the cadastre area covered by the map polygon.
    pub area_ratio: f64,
    /// Symmetric difference relative to the union of both polygons.
    pub area_not_shared: f64,
    /// Whether any returned way is a national border.
    pub national_border: bool,
}

impl QualityRecord {
    /// Record for an entity without a usable map counterpart.
    #[must_use]
    pub fn unmatched(entity: &AdminEntity, national_border: bool) -> Self {
        Self {
            reference: entity.reference.clone(),
            name: entity.name.clone(),
            map_name: None,
            relation_id: None,
            area_ratio: UNMEASURED,
            area_not_shared: UNMEASURED,
            national_border,
        }
    }
}

/// Area metrics of two polygons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaComparison {
    /// `area(cadastre ∩ map) / area(cadastre)`, rounded to 5 decimals.
    pub area_ratio: f64,
    /// `area(cadastre xor map) / area(cadastre ∪ map)`, rounded to 5 decimals.
    pub area_not_shared: f64,
}

/// Chain `ways` into closed rings by matching end node ids.
///
/// Ways may be reversed to continue a chain.
///
/// # Errors
///
/// Returns [`RingError`] if a chain cannot be closed or a node is missing.
pub fn assemble_rings<'a, I>(ways: I, elements: &ElementSet) -> Result<Vec<LineString>, RingError>
where
    I: IntoIterator<Item = &'a Way>,
{
    let mut pending: Vec<&Way> = ways
        .into_iter()
        .filter(|way| !way.nodes.is_empty())
        .collect();
    pending.reverse();

    let mut rings = Vec::new();
    while let Some(start) = pending.pop() {
        let mut chain = start.nodes.clone();
        while !(chain.len() > 1 && chain.first() == chain.last()) {
            let Some(&tail) = chain.last() else {
                break;
            };
            let position = pending
                .iter()
                .position(|way| way.nodes.first() == Some(&tail) || way.nodes.last() == Some(&tail))
                .ok_or(RingError::UnclosedRing { way_id: start.id })?;
            let next = pending.remove(position);
            if next.nodes.first() == Some(&tail) {
                chain.extend(next.nodes.iter().skip(1));
            } else {
                chain.extend(next.nodes.iter().rev().skip(1));
            }
        }
        let ring = chain
            .iter()
            .map(|&node_id| {
                elements
                    .nodes
                    .get(&node_id)
                    .map(|node| node.location)
                    .ok_or(MissingNodeError {
                        way_id: start.id,
                        node_id,
                    })
            })
            .collect::<Result<LineString, _>>()?;
        rings.push(ring);
    }
    Ok(rings)
}

/// Build the area covered by `relation` from its way members.
///
/// # Errors
///
/// Returns [`RingError`] if a member way is missing or its rings are open.
pub fn relation_polygon(
    relation: &Relation,
    elements: &ElementSet,
) -> Result<MultiPolygon, RingError> {
    let mut outer = Vec::new();
    let mut inner = Vec::new();
    for member in relation.way_members() {
        let way = elements
            .ways
            .get(&member.reference)
            .ok_or(RingError::MissingWay {
                relation_id: relation.id,
                way_id: member.reference,
            })?;
        if member.role == "inner" {
            inner.push(way);
        } else {
            outer.push(way);
        }
    }

    let outer = union_of(assemble_rings(outer, elements)?);
    let inner = union_of(assemble_rings(inner, elements)?);
    if inner.0.is_empty() {
        Ok(outer)
    } else {
        Ok(outer.difference(&inner))
    }
}

fn union_of(rings: Vec<LineString>) -> MultiPolygon {
    rings
        .into_iter()
        .map(|ring| Polygon::new(ring, Vec::new()))
        .fold(MultiPolygon::new(Vec::new()), |acc, polygon| {
            acc.union(&polygon)
        })
}

/// Compare two polygons. Returns `None` when either area is empty.
#[must_use]
pub fn compare_areas(cadastre: &MultiPolygon, map: &MultiPolygon) -> Option<AreaComparison> {
    let cadastre_area = cadastre.unsigned_area();
    let union_area = cadastre.union(map).unsigned_area();
    if cadastre_area <= 0.0 || map.unsigned_area() <= 0.0 {
        return None;
    }
    let shared = cadastre.intersection(map).unsigned_area();
    let not_shared = cadastre.xor(map).unsigned_area();
    Some(AreaComparison {
        area_ratio: round5(shared / cadastre_area),
        area_not_shared: round5(not_shared / union_area),
    })
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

/// Cadastre entities carrying `reference_key`, in relation id order.
#[must_use]
pub fn measurable_entities(dataset: &SourceDataset, reference_key: &str) -> Vec<AdminEntity> {
    dataset
        .relations()
        .filter_map(|relation| {
            relation.tags.get(reference_key).map(|reference| AdminEntity {
                relation_id: relation.id,
                name: relation.tags.get("name").cloned().unwrap_or_default(),
                reference: reference.clone(),
            })
        })
        .collect()
}

/// Measure one cadastre entity against the map.
///
/// A missing or ambiguous map relation, or one whose rings do not close,
/// yields [`QualityRecord::unmatched`].
///
/// # Errors
///
/// Returns [`QualityError`] when the cadastre geometry is broken or the
/// query fails permanently.
pub fn measure_entity(
    query: &dyn GeoQueryService,
    retry: &RetryPolicy,
    dataset: &SourceDataset,
    entity: &AdminEntity,
) -> Result<QualityRecord, QualityError> {
    let relation_id = entity.relation_id;
    let relation = dataset
        .relation(relation_id)
        .ok_or(QualityError::UnknownRelation { relation_id })?;
    let cadastre = relation_polygon(relation, dataset.elements())
        .map_err(|source| QualityError::Cadastre {
            relation_id,
            source,
        })?;

    let response = retry.run("entity boundary query", || {
        query.entity_boundary(&entity.reference)
    })?;
    let national_border = response
        .ways
        .values()
        .any(|way| way.tags.get("admin_level").map(String::as_str) == Some("2"));

    let mut relations = response.relations.values();
    let map_relation = match (relations.next(), relations.next()) {
        (Some(map_relation), None) => map_relation,
        (found, _) => {
            info!(
                "{}: {} map relations",
                entity.label(),
                if found.is_some() { "several" } else { "no" }
            );
            return Ok(QualityRecord::unmatched(entity, national_border));
        }
    };
    let map = match relation_polygon(map_relation, &response) {
        Ok(map) => map,
        Err(err) => {
            warn!("{}: map relation {} unusable: {err}", entity.label(), map_relation.id);
            return Ok(QualityRecord::unmatched(entity, national_border));
        }
    };
    let Some(comparison) = compare_areas(&cadastre, &map) else {
        return Ok(QualityRecord::unmatched(entity, national_border));
    };

    Ok(QualityRecord {
        reference: entity.reference.clone(),
        name: entity.name.clone(),
        map_name: map_relation.tags.get("name").cloned(),
        relation_id: Some(map_relation.id),
        area_ratio: comparison.area_ratio,
        area_not_shared: comparison.area_not_shared,
        national_border,
    })
}

/// Entities with no record in `previous`.
#[must_use]
pub fn unmeasured_entities(
    entities: Vec<AdminEntity>,
    previous: &[QualityRecord],
) -> Vec<AdminEntity> {
    entities
        .into_iter()
        .filter(|entity| {
            !previous
                .iter()
                .any(|record| record.reference == entity.reference)
        })
        .collect()
}

/// Combine earlier and new records, sorted by reference.
#[must_use]
pub fn merge_records(
    mut previous: Vec<QualityRecord>,
    fresh: Vec<QualityRecord>,
) -> Vec<QualityRecord> {
    previous.extend(fresh);
    previous.sort_by(|left, right| left.reference.cmp(&right.reference));
    previous
}
