//! Cadastre input: source ways and the administrative entities that own them.

use std::collections::BTreeMap;

use geo::LineString;
use thiserror::Error;

use crate::element::{ElementSet, MissingNodeError, Relation, Way};

/// Errors raised when reading geometry out of a [`SourceDataset`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The requested way does not exist in the dataset.
    #[error("source way {way_id} is not in the dataset")]
    UnknownWay {
        /// Requested identifier.
        way_id: i64,
    },
    /// A way references a node the dataset does not contain.
    #[error(transparent)]
    MissingNode(#[from] MissingNodeError),
}

/// A cadastre way with resolved coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceWay {
    /// Cadastre way identifier.
    pub id: i64,
    /// Ordered `(lon, lat)` coordinates.
    pub geometry: LineString,
}

/// A cadastre administrative unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminEntity {
    /// Cadastre relation identifier.
    pub relation_id: i64,
    /// Display name, empty when the relation carries none.
    pub name: String,
    /// Cadastre reference code shared with the map dataset.
    pub reference: String,
}

impl AdminEntity {
    /// Label used in progress records, e.g. `Vranje (ref: 70912)`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} (ref: {})", self.name, self.reference)
    }
}

/// The whole cadastre input with a way-to-relation membership index.
///
/// # Examples
///
/// ```
/// use geo::Coord;
/// use conflation_core::{Element, ElementSet, Member, Node, Relation, SourceDataset, Way};
///
/// let elements: ElementSet = [
///     Element::Node(Node::new(-1, Coord { x: 20.0, y: 44.0 })),
///     Element::Node(Node::new(-2, Coord { x: 20.1, y: 44.0 })),
///     Element::Way(Way::new(-10, vec![-1, -2])),
///     Element::Relation(Relation::new(-100, vec![Member::way(-10, "outer")])),
/// ]
/// .into_iter()
/// .collect();
/// let dataset = SourceDataset::new(elements);
/// assert_eq!(dataset.memberships(-10), &[-100]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceDataset {
    elements: ElementSet,
    memberships: BTreeMap<i64, Vec<i64>>,
}

impl SourceDataset {
    /// Index the given elements.
    #[must_use]
    pub fn new(elements: ElementSet) -> Self {
        let mut memberships: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for relation in elements.relations.values() {
            for member in relation.way_members() {
                memberships
                    .entry(member.reference)
                    .or_default()
                    .push(relation.id);
            }
        }
        Self {
            elements,
            memberships,
        }
    }

    /// Underlying elements.
    #[must_use]
    pub const fn elements(&self) -> &ElementSet {
        &self.elements
    }

    /// Iterate source ways in ascending id order.
    pub fn ways(&self) -> impl Iterator<Item = &Way> + '_ {
        self.elements.ways.values()
    }

    /// Iterate cadastre relations in ascending id order.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> + '_ {
        self.elements.relations.values()
    }

    /// Look up a cadastre relation.
    #[must_use]
    pub fn relation(&self, relation_id: i64) -> Option<&Relation> {
        self.elements.relations.get(&relation_id)
    }

    /// Relation ids referencing `way_id`, one entry per membership.
    #[must_use]
    pub fn memberships(&self, way_id: i64) -> &[i64] {
        self.memberships
            .get(&way_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Resolve the geometry of a source way.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the way or one of its nodes is missing.
    pub fn source_way(&self, way_id: i64) -> Result<SourceWay, SourceError> {
        let way = self
            .elements
            .ways
            .get(&way_id)
            .ok_or(SourceError::UnknownWay { way_id })?;
        let geometry = self.elements.line_string(way)?;
        Ok(SourceWay {
            id: way_id,
            geometry,
        })
    }
}
