//! JSON element documents shared by Overpass `[out:json]` and the OSM API
//! `.json` endpoints.
//!
//! Both services answer with `{"elements": [...]}` where each element carries
//! a `type` discriminator. Coordinates are only present on nodes.

use conflation_core::{Element, ElementKind, ElementSet, Member, Node, Relation, Tags, Way};
use geo::Coord;
use serde::Deserialize;

/// Top-level response body.
#[derive(Debug, Deserialize)]
pub struct ElementsResponse {
    /// Returned elements in server order.
    #[serde(default)]
    pub elements: Vec<JsonElement>,
    /// Overpass runtime diagnostics, e.g. a query timeout.
    #[serde(default)]
    pub remark: Option<String>,
}

impl ElementsResponse {
    /// Overpass reports runtime failures in `remark` with a 200 status.
    #[must_use]
    pub fn runtime_error(&self) -> Option<&str> {
        self.remark
            .as_deref()
            .filter(|remark| remark.contains("runtime error"))
    }

    /// Collect the elements into an [`ElementSet`].
    #[must_use]
    pub fn into_element_set(self) -> ElementSet {
        self.elements.into_iter().map(Element::from).collect()
    }
}

/// One element of a JSON response.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonElement {
    /// A node with coordinates.
    Node {
        /// Element identifier.
        id: i64,
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lon: f64,
        /// Element version, present with `out meta`.
        #[serde(default)]
        version: Option<u64>,
        /// Attached tags.
        #[serde(default)]
        tags: Tags,
    },
    /// A way referencing nodes.
    Way {
        /// Element identifier.
        id: i64,
        /// Ordered node identifiers.
        #[serde(default)]
        nodes: Vec<i64>,
        /// Element version, present with `out meta`.
        #[serde(default)]
        version: Option<u64>,
        /// Attached tags.
        #[serde(default)]
        tags: Tags,
    },
    /// A relation with typed members.
    Relation {
        /// Element identifier.
        id: i64,
        /// Ordered members.
        #[serde(default)]
        members: Vec<JsonMember>,
        /// Element version, present with `out meta`.
        #[serde(default)]
        version: Option<u64>,
        /// Attached tags.
        #[serde(default)]
        tags: Tags,
    },
}

/// A relation member reference.
#[derive(Debug, Deserialize)]
pub struct JsonMember {
    /// Kind of the referenced element.
    #[serde(rename = "type")]
    pub kind: JsonMemberKind,
    /// Identifier of the referenced element.
    #[serde(rename = "ref")]
    pub reference: i64,
    /// Member role.
    #[serde(default)]
    pub role: String,
}

/// Member kind as spelled on the wire.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonMemberKind {
    /// Node member.
    Node,
    /// Way member.
    Way,
    /// Relation member.
    Relation,
}

impl From<JsonMemberKind> for ElementKind {
    fn from(kind: JsonMemberKind) -> Self {
        match kind {
            JsonMemberKind::Node => Self::Node,
            JsonMemberKind::Way => Self::Way,
            JsonMemberKind::Relation => Self::Relation,
        }
    }
}

impl From<JsonElement> for Element {
    fn from(element: JsonElement) -> Self {
        match element {
            JsonElement::Node {
                id,
                lat,
                lon,
                version,
                tags,
            } => Self::Node(Node {
                id,
                version,
                location: Coord { x: lon, y: lat },
                tags,
            }),
            JsonElement::Way {
                id,
                nodes,
                version,
                tags,
            } => Self::Way(Way {
                id,
                version,
                nodes,
                tags,
            }),
            JsonElement::Relation {
                id,
                members,
                version,
                tags,
            } => Self::Relation(Relation {
                id,
                version,
                members: members
                    .into_iter()
                    .map(|member| Member {
                        kind: member.kind.into(),
                        reference: member.reference,
                        role: member.role,
                    })
                    .collect(),
                tags,
            }),
        }
    }
}
