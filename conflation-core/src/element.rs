//! Map elements exchanged with the query and edit services.
//!
//! Nodes, ways and relations share a uniform tag mapping so the eligibility
//! rules can inspect any element the same way. Tags are kept in a
//! [`BTreeMap`] so iteration order, and therefore the first reported
//! violation, is deterministic.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use geo::{Coord, LineString};
use thiserror::Error;

/// Key/value tags attached to a map element.
pub type Tags = BTreeMap<String, String>;

/// Discriminates the three element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    /// A point with coordinates.
    Node,
    /// An ordered list of node references.
    Way,
    /// A collection of typed members.
    Relation,
}

impl ElementKind {
    /// Lower-case wire name used by OSM formats.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown element kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown element kind {0:?}")]
pub struct UnknownElementKind(pub String);

impl FromStr for ElementKind {
    type Err = UnknownElementKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "node" => Ok(Self::Node),
            "way" => Ok(Self::Way),
            "relation" => Ok(Self::Relation),
            other => Err(UnknownElementKind(other.to_owned())),
        }
    }
}

/// A map node.
///
/// # Examples
///
/// ```
/// use geo::Coord;
/// use conflation_core::Node;
///
/// let node = Node::new(7, Coord { x: 20.45, y: 44.81 }).with_tag("created_by", "JOSM");
/// assert_eq!(node.tags.get("created_by").map(String::as_str), Some("JOSM"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Element identifier. Negative values are placeholders for new nodes.
    pub id: i64,
    /// Version reported by the edit service, if known.
    pub version: Option<u64>,
    /// WGS84 position with `x = longitude`, `y = latitude`.
    pub location: Coord,
    /// Attached tags.
    pub tags: Tags,
}

impl Node {
    /// Create an untagged node without version information.
    #[must_use]
    pub fn new(id: i64, location: Coord) -> Self {
        Self {
            id,
            version: None,
            location,
            tags: Tags::new(),
        }
    }

    /// Attach a single tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Record the element version.
    #[must_use]
    pub const fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

/// A map way: an ordered list of node references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Way {
    /// Element identifier.
    pub id: i64,
    /// Version reported by the edit service, if known.
    pub version: Option<u64>,
    /// Ordered node identifiers.
    pub nodes: Vec<i64>,
    /// Attached tags.
    pub tags: Tags,
}

impl Way {
    /// Create an untagged way.
    #[must_use]
    pub fn new(id: i64, nodes: Vec<i64>) -> Self {
        Self {
            id,
            version: None,
            nodes,
            tags: Tags::new(),
        }
    }

    /// Attach a single tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Record the element version.
    #[must_use]
    pub const fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Whether the first and last node references coincide.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match (self.nodes.first(), self.nodes.last()) {
            (Some(first), Some(last)) => self.nodes.len() > 1 && first == last,
            _ => false,
        }
    }
}

/// A typed reference from a relation to another element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Kind of the referenced element.
    pub kind: ElementKind,
    /// Identifier of the referenced element.
    pub reference: i64,
    /// Role of the member within the relation.
    pub role: String,
}

impl Member {
    /// Construct a way member with the given role.
    #[must_use]
    pub fn way(reference: i64, role: impl Into<String>) -> Self {
        Self {
            kind: ElementKind::Way,
            reference,
            role: role.into(),
        }
    }
}

/// A map relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Element identifier.
    pub id: i64,
    /// Version reported by the edit service, if known.
    pub version: Option<u64>,
    /// Ordered members.
    pub members: Vec<Member>,
    /// Attached tags.
    pub tags: Tags,
}

impl Relation {
    /// Create an untagged relation.
    #[must_use]
    pub fn new(id: i64, members: Vec<Member>) -> Self {
        Self {
            id,
            version: None,
            members,
            tags: Tags::new(),
        }
    }

    /// Attach a single tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Iterate over the identifiers of way members.
    pub fn way_members(&self) -> impl Iterator<Item = &Member> + '_ {
        self.members
            .iter()
            .filter(|member| member.kind == ElementKind::Way)
    }
}

/// Any map element.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// A node.
    Node(Node),
    /// A way.
    Way(Way),
    /// A relation.
    Relation(Relation),
}

impl Element {
    /// Element identifier.
    #[must_use]
    pub const fn id(&self) -> i64 {
        match self {
            Self::Node(node) => node.id,
            Self::Way(way) => way.id,
            Self::Relation(relation) => relation.id,
        }
    }

    /// Element kind.
    #[must_use]
    pub const fn kind(&self) -> ElementKind {
        match self {
            Self::Node(_) => ElementKind::Node,
            Self::Way(_) => ElementKind::Way,
            Self::Relation(_) => ElementKind::Relation,
        }
    }

    /// Attached tags.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        match self {
            Self::Node(node) => &node.tags,
            Self::Way(way) => &way.tags,
            Self::Relation(relation) => &relation.tags,
        }
    }
}

/// Parsed value of an `admin_level` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminLevel {
    /// The tag is absent.
    Missing,
    /// The tag holds an integer level.
    Level(i64),
    /// The tag is present but not an integer (for example `"9;8"`).
    Unparsable,
}

impl AdminLevel {
    /// Read the `admin_level` tag from `tags`.
    #[must_use]
    pub fn from_tags(tags: &Tags) -> Self {
        tags.get("admin_level")
            .map_or(Self::Missing, |value| {
                value
                    .trim()
                    .parse()
                    .map_or(Self::Unparsable, Self::Level)
            })
    }

    /// Whether the level marks a national border (level 2 or below).
    #[must_use]
    pub const fn is_national(self) -> bool {
        matches!(self, Self::Level(level) if level <= 2)
    }

    /// Whether any value is present.
    #[must_use]
    pub const fn is_present(self) -> bool {
        !matches!(self, Self::Missing)
    }
}

/// A node referenced by a way was absent from the element set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("way {way_id} references node {node_id} which is missing from the response")]
pub struct MissingNodeError {
    /// Way holding the dangling reference.
    pub way_id: i64,
    /// Missing node identifier.
    pub node_id: i64,
}

/// A bag of elements returned by a query, keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementSet {
    /// Nodes keyed by identifier.
    pub nodes: BTreeMap<i64, Node>,
    /// Ways keyed by identifier.
    pub ways: BTreeMap<i64, Way>,
    /// Relations keyed by identifier.
    pub relations: BTreeMap<i64, Relation>,
}

impl ElementSet {
    /// Insert an element, replacing any earlier copy with the same id.
    pub fn insert(&mut self, element: Element) {
        match element {
            Element::Node(node) => {
                self.nodes.insert(node.id, node);
            }
            Element::Way(way) => {
                self.ways.insert(way.id, way);
            }
            Element::Relation(relation) => {
                self.relations.insert(relation.id, relation);
            }
        }
    }

    /// Move every element of `other` into this set.
    pub fn merge(&mut self, other: Self) {
        self.nodes.extend(other.nodes);
        self.ways.extend(other.ways);
        self.relations.extend(other.relations);
    }

    /// Whether the set holds no elements at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.ways.is_empty() && self.relations.is_empty()
    }

    /// Resolve a way's nodes in order.
    ///
    /// # Errors
    ///
    /// Returns [`MissingNodeError`] when a referenced node is not in the set.
    pub fn resolve_nodes(&self, way: &Way) -> Result<Vec<Node>, MissingNodeError> {
        way.nodes
            .iter()
            .map(|node_id| {
                self.nodes
                    .get(node_id)
                    .cloned()
                    .ok_or(MissingNodeError {
                        way_id: way.id,
                        node_id: *node_id,
                    })
            })
            .collect()
    }

    /// Build a line string following the way's node order.
    ///
    /// # Errors
    ///
    /// Returns [`MissingNodeError`] when a referenced node is not in the set.
    pub fn line_string(&self, way: &Way) -> Result<LineString, MissingNodeError> {
        self.resolve_nodes(way)
            .map(|nodes| nodes.into_iter().map(|node| node.location).collect())
    }
}

impl FromIterator<Element> for ElementSet {
    fn from_iter<I: IntoIterator<Item = Element>>(iter: I) -> Self {
        let mut set = Self::default();
        for element in iter {
            set.insert(element);
        }
        set
    }
}

impl Extend<Element> for ElementSet {
    fn extend<I: IntoIterator<Item = Element>>(&mut self, iter: I) {
        for element in iter {
            self.insert(element);
        }
    }
}
