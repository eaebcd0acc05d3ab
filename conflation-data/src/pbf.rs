//! Reading cadastre extracts stored as OSM PBF.

use std::path::{Path, PathBuf};

use conflation_core::{Element, ElementKind, ElementSet, Member, Node, Relation, Tags, Way};
use geo::Coord;
use osmpbf::{Element as PbfElement, ElementReader, RelMemberType};
use thiserror::Error;

/// Errors returned when reading an OSM PBF file.
#[derive(Debug, Error)]
pub enum PbfError {
    /// The file could not be opened.
    #[error("failed to open OSM PBF file at {path:?}")]
    Open {
        /// Underlying decoder error.
        #[source]
        source: osmpbf::Error,
        /// File that failed to open.
        path: PathBuf,
    },
    /// A block could not be decoded.
    #[error("failed to decode OSM PBF data at {path:?}")]
    Decode {
        /// Underlying decoder error.
        #[source]
        source: osmpbf::Error,
        /// File being decoded.
        path: PathBuf,
    },
}

/// Read every node, way and relation of a PBF file into an [`ElementSet`].
///
/// Element versions are not carried over; cadastre extracts are never
/// uploaded. Relation member roles that are not valid UTF-8 are read as
/// empty.
///
/// # Errors
///
/// Returns [`PbfError`] if the file cannot be opened or decoded.
///
/// # Examples
/// ```no_run
/// use std::path::Path;
/// use conflation_data::pbf::read_pbf;
///
/// let elements = read_pbf(Path::new("cadastre.osm.pbf"))?;
/// println!("{} cadastre ways", elements.ways.len());
/// # Ok::<(), conflation_data::pbf::PbfError>(())
/// ```
pub fn read_pbf(path: &Path) -> Result<ElementSet, PbfError> {
    let reader = ElementReader::from_path(path).map_err(|source| PbfError::Open {
        source,
        path: path.to_path_buf(),
    })?;

    let mut elements = ElementSet::default();
    reader
        .for_each(|element| elements.insert(convert(&element)))
        .map_err(|source| PbfError::Decode {
            source,
            path: path.to_path_buf(),
        })?;
    Ok(elements)
}

fn collect_tags<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>) -> Tags {
    tags.map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

fn convert(element: &PbfElement<'_>) -> Element {
    match element {
        PbfElement::Node(node) => Element::Node(Node {
            id: node.id(),
            version: None,
            location: Coord {
                x: node.lon(),
                y: node.lat(),
            },
            tags: collect_tags(node.tags()),
        }),
        PbfElement::DenseNode(node) => Element::Node(Node {
            id: node.id(),
            version: None,
            location: Coord {
                x: node.lon(),
                y: node.lat(),
            },
            tags: collect_tags(node.tags()),
        }),
        PbfElement::Way(way) => Element::Way(Way {
            id: way.id(),
            version: None,
            nodes: way.refs().collect(),
            tags: collect_tags(way.tags()),
        }),
        PbfElement::Relation(relation) => Element::Relation(Relation {
            id: relation.id(),
            version: None,
            members: relation
                .members()
                .map(|member| Member {
                    kind: match member.member_type {
                        RelMemberType::Node => ElementKind::Node,
                        RelMemberType::Way => ElementKind::Way,
                        RelMemberType::Relation => ElementKind::Relation,
                    },
                    reference: member.member_id,
                    role: member.role().unwrap_or_default().to_owned(),
                })
                .collect(),
            tags: collect_tags(relation.tags()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[rstest]
    fn reports_missing_files() {
        let missing = PathBuf::from("definitely/not/here.osm.pbf");
        match read_pbf(&missing) {
            Err(PbfError::Open { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected open error, got {other:?}"),
        }
    }

    #[rstest]
    fn rejects_invalid_payload() {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(b"\x00\x00\x00\x0dnot a pbf block at all")
            .expect("write payload");

        let err = read_pbf(file.path()).expect_err("invalid payload");

        assert!(matches!(err, PbfError::Decode { .. }), "got {err:?}");
    }
}
