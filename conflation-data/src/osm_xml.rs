//! OSM XML: reading `.osm` files and writing API payloads.
//!
//! Reading accepts the files exported by JOSM and the cadastre converters:
//! `<osm>` documents holding `node`, `way` and `relation` elements. Elements
//! marked `action="delete"` are skipped. Writing covers the two payloads the
//! edit adapter sends, a changeset header and an `osmChange` batch.

use std::collections::BTreeMap;

use conflation_core::{
    Element, ElementKind, ElementSet, Member, Node, Relation, Tags, UnknownElementKind, Way,
};
use geo::Coord;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use thiserror::Error;

/// Generator name written into payloads.
pub const GENERATOR: &str = "boundary-conflation";

/// Errors raised while reading or writing OSM XML.
#[derive(Debug, Error)]
pub enum OsmXmlError {
    /// The document is not well-formed XML.
    #[error("malformed XML near byte {position}")]
    Syntax {
        /// Byte offset reported by the reader.
        position: u64,
        /// Underlying reader error.
        #[source]
        source: quick_xml::Error,
    },
    /// An element lacks a mandatory attribute.
    #[error("<{element}> near byte {position} has no `{attribute}` attribute")]
    MissingAttribute {
        /// Element name.
        element: String,
        /// Attribute name.
        attribute: &'static str,
        /// Byte offset reported by the reader.
        position: u64,
    },
    /// An attribute value could not be parsed.
    #[error("<{element}> near byte {position} has invalid {attribute}={value:?}")]
    InvalidAttribute {
        /// Element name.
        element: String,
        /// Attribute name.
        attribute: &'static str,
        /// Offending value.
        value: String,
        /// Byte offset reported by the reader.
        position: u64,
    },
    /// A relation member has an unknown kind.
    #[error("member near byte {position} has an unknown type")]
    MemberKind {
        /// Byte offset reported by the reader.
        position: u64,
        /// Parse failure.
        #[source]
        source: UnknownElementKind,
    },
    /// Serializing a payload failed.
    #[error("failed to write XML payload: {message}")]
    Write {
        /// Writer error message.
        message: String,
    },
}

/// Parse an OSM XML document into an [`ElementSet`].
///
/// # Errors
///
/// Returns [`OsmXmlError`] for malformed XML or invalid element attributes.
///
/// # Examples
///
/// ```
/// use conflation_data::osm_xml::parse_osm;
///
/// let xml = r#"<osm version="0.6">
///   <node id="-1" lat="44.0" lon="20.0"/>
///   <node id="-2" lat="44.0" lon="20.1"/>
///   <way id="-10"><nd ref="-1"/><nd ref="-2"/></way>
/// </osm>"#;
/// let set = parse_osm(xml)?;
/// assert_eq!(set.ways[&-10].nodes, vec![-1, -2]);
/// # Ok::<(), conflation_data::osm_xml::OsmXmlError>(())
/// ```
pub fn parse_osm(xml: &str) -> Result<ElementSet, OsmXmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut parser = OsmParser::default();

    loop {
        let position = u64::try_from(reader.buffer_position()).unwrap_or_default();
        match reader.read_event() {
            Ok(Event::Start(start)) => parser.open(&start, position, false)?,
            Ok(Event::Empty(start)) => parser.open(&start, position, true)?,
            Ok(Event::End(end)) => parser.close(end.name().as_ref()),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(source) => return Err(OsmXmlError::Syntax { position, source }),
        }
    }

    Ok(parser.elements)
}

/// Element under construction.
#[derive(Debug)]
struct Pending {
    element: Element,
    deleted: bool,
}

#[derive(Debug, Default)]
struct OsmParser {
    elements: ElementSet,
    current: Option<Pending>,
}

impl OsmParser {
    fn open(
        &mut self,
        start: &BytesStart<'_>,
        position: u64,
        self_closing: bool,
    ) -> Result<(), OsmXmlError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let attributes = Attributes::read(start, &name, position)?;
        match name.as_str() {
            "node" | "way" | "relation" => {
                let element = attributes.element(&name)?;
                self.current = Some(Pending {
                    element,
                    deleted: attributes.get("action") == Some("delete"),
                });
                if self_closing {
                    self.finish();
                }
            }
            "tag" => {
                let key = attributes.required("k")?.to_owned();
                let value = attributes.required("v")?.to_owned();
                if let Some(pending) = self.current.as_mut() {
                    tags_mut(&mut pending.element).insert(key, value);
                }
            }
            "nd" => {
                let reference = attributes.parse::<i64>("ref")?;
                if let Some(Pending {
                    element: Element::Way(way),
                    ..
                }) = self.current.as_mut()
                {
                    way.nodes.push(reference);
                }
            }
            "member" => {
                let kind = attributes
                    .required("type")?
                    .parse::<ElementKind>()
                    .map_err(|source| OsmXmlError::MemberKind { position, source })?;
                let reference = attributes.parse::<i64>("ref")?;
                let role = attributes.get("role").unwrap_or_default().to_owned();
                if let Some(Pending {
                    element: Element::Relation(relation),
                    ..
                }) = self.current.as_mut()
                {
                    relation.members.push(Member {
                        kind,
                        reference,
                        role,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        if matches!(name, b"node" | b"way" | b"relation") {
            self.finish();
        }
    }

    fn finish(&mut self) {
        if let Some(pending) = self.current.take() {
            if !pending.deleted {
                self.elements.insert(pending.element);
            }
        }
    }
}

fn tags_mut(element: &mut Element) -> &mut Tags {
    match element {
        Element::Node(node) => &mut node.tags,
        Element::Way(way) => &mut way.tags,
        Element::Relation(relation) => &mut relation.tags,
    }
}

/// Decoded attributes of one start tag.
struct Attributes<'n> {
    element: &'n str,
    position: u64,
    values: BTreeMap<String, String>,
}

impl<'n> Attributes<'n> {
    fn read(start: &BytesStart<'_>, element: &'n str, position: u64) -> Result<Self, OsmXmlError> {
        let mut values = BTreeMap::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|err| OsmXmlError::Syntax {
                position,
                source: err.into(),
            })?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|source| OsmXmlError::Syntax { position, source })?
                .into_owned();
            values.insert(key, value);
        }
        Ok(Self {
            element,
            position,
            values,
        })
    }

    fn get(&self, attribute: &str) -> Option<&str> {
        self.values.get(attribute).map(String::as_str)
    }

    fn required(&self, attribute: &'static str) -> Result<&str, OsmXmlError> {
        self.get(attribute)
            .ok_or_else(|| OsmXmlError::MissingAttribute {
                element: self.element.to_owned(),
                attribute,
                position: self.position,
            })
    }

    fn parse<T: std::str::FromStr>(&self, attribute: &'static str) -> Result<T, OsmXmlError> {
        let value = self.required(attribute)?;
        value
            .trim()
            .parse()
            .map_err(|_| OsmXmlError::InvalidAttribute {
                element: self.element.to_owned(),
                attribute,
                value: value.to_owned(),
                position: self.position,
            })
    }

    fn version(&self) -> Result<Option<u64>, OsmXmlError> {
        self.get("version")
            .map(|_| self.parse::<u64>("version"))
            .transpose()
    }

    fn element(&self, name: &str) -> Result<Element, OsmXmlError> {
        let id = self.parse::<i64>("id")?;
        let version = self.version()?;
        Ok(match name {
            "node" => Element::Node(Node {
                id,
                version,
                location: Coord {
                    x: self.parse("lon")?,
                    y: self.parse("lat")?,
                },
                tags: Tags::new(),
            }),
            "way" => Element::Way(Way {
                id,
                version,
                nodes: Vec::new(),
                tags: Tags::new(),
            }),
            _ => Element::Relation(Relation {
                id,
                version,
                members: Vec::new(),
                tags: Tags::new(),
            }),
        })
    }
}

/// Staged edits uploaded together as one `osmChange` document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsmChange {
    /// New nodes carrying negative placeholder ids.
    pub create: Vec<Node>,
    /// Modified nodes keyed by id; later updates replace earlier ones.
    pub modify_nodes: BTreeMap<i64, Node>,
    /// Modified ways keyed by id.
    pub modify_ways: BTreeMap<i64, Way>,
    /// Deleted nodes keyed by id.
    pub delete: BTreeMap<i64, Node>,
}

impl OsmChange {
    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.modify_nodes.is_empty()
            && self.modify_ways.is_empty()
            && self.delete.is_empty()
    }

    /// Number of staged element changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.create.len() + self.modify_nodes.len() + self.modify_ways.len() + self.delete.len()
    }

    /// Serialize the batch for upload into `changeset`.
    ///
    /// Blocks are written in create, modify, delete order so ways can refer
    /// to freshly created nodes and deleted nodes are already detached.
    ///
    /// # Errors
    ///
    /// Returns [`OsmXmlError::Write`] if serialization fails.
    pub fn render(&self, changeset: u64) -> Result<String, OsmXmlError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        let changeset = changeset.to_string();
        emit(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;
        emit(
            &mut writer,
            Event::Start(start_tag(
                "osmChange",
                &[("version", "0.6".to_owned()), ("generator", GENERATOR.to_owned())],
            )),
        )?;

        emit(&mut writer, Event::Start(BytesStart::new("create")))?;
        for node in &self.create {
            write_node(&mut writer, node, &changeset)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new("create")))?;

        emit(&mut writer, Event::Start(BytesStart::new("modify")))?;
        for node in self.modify_nodes.values() {
            write_node(&mut writer, node, &changeset)?;
        }
        for way in self.modify_ways.values() {
            write_way(&mut writer, way, &changeset)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new("modify")))?;

        emit(&mut writer, Event::Start(BytesStart::new("delete")))?;
        for node in self.delete.values() {
            write_node(&mut writer, node, &changeset)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new("delete")))?;

        emit(&mut writer, Event::End(BytesEnd::new("osmChange")))?;
        into_string(writer)
    }
}

/// Serialize the body of a changeset creation request.
///
/// # Errors
///
/// Returns [`OsmXmlError::Write`] if serialization fails.
pub fn render_changeset(tags: &Tags) -> Result<String, OsmXmlError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit(
        &mut writer,
        Event::Start(start_tag("osm", &[("version", "0.6".to_owned())])),
    )?;
    emit(&mut writer, Event::Start(BytesStart::new("changeset")))?;
    write_tags(&mut writer, tags)?;
    emit(&mut writer, Event::End(BytesEnd::new("changeset")))?;
    emit(&mut writer, Event::End(BytesEnd::new("osm")))?;
    into_string(writer)
}

/// Placeholder-to-permanent id assignments reported after an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    /// Element kind.
    pub kind: ElementKind,
    /// Id used in the upload.
    pub old_id: i64,
    /// Assigned id, absent for deletions.
    pub new_id: Option<i64>,
    /// New version, absent for deletions.
    pub new_version: Option<u64>,
}

/// Parse a `diffResult` document returned by a changeset upload.
///
/// # Errors
///
/// Returns [`OsmXmlError`] for malformed XML or attributes.
pub fn parse_diff_result(xml: &str) -> Result<Vec<DiffEntry>, OsmXmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut entries = Vec::new();
    loop {
        let position = u64::try_from(reader.buffer_position()).unwrap_or_default();
        match reader.read_event() {
            Ok(Event::Empty(start) | Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let Ok(kind) = name.parse::<ElementKind>() else {
                    continue;
                };
                let attributes = Attributes::read(&start, &name, position)?;
                entries.push(DiffEntry {
                    kind,
                    old_id: attributes.parse("old_id")?,
                    new_id: attributes
                        .get("new_id")
                        .map(|_| attributes.parse("new_id"))
                        .transpose()?,
                    new_version: attributes
                        .get("new_version")
                        .map(|_| attributes.parse("new_version"))
                        .transpose()?,
                });
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(source) => return Err(OsmXmlError::Syntax { position, source }),
        }
    }
    Ok(entries)
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), OsmXmlError> {
    writer
        .write_event(event)
        .map_err(|err| OsmXmlError::Write {
            message: err.to_string(),
        })
}

fn into_string(writer: Writer<Vec<u8>>) -> Result<String, OsmXmlError> {
    String::from_utf8(writer.into_inner()).map_err(|err| OsmXmlError::Write {
        message: err.to_string(),
    })
}

fn start_tag<'a>(name: &'a str, attributes: &[(&str, String)]) -> BytesStart<'a> {
    let mut start = BytesStart::new(name);
    for (key, value) in attributes {
        start.push_attribute((*key, value.as_str()));
    }
    start
}

fn identity(id: i64, version: Option<u64>, changeset: &str) -> Vec<(&'static str, String)> {
    let mut attributes = vec![("id", id.to_string())];
    if let Some(version) = version {
        attributes.push(("version", version.to_string()));
    }
    attributes.push(("changeset", changeset.to_owned()));
    attributes
}

fn write_node(
    writer: &mut Writer<Vec<u8>>,
    node: &Node,
    changeset: &str,
) -> Result<(), OsmXmlError> {
    let mut attributes = identity(node.id, node.version, changeset);
    attributes.push(("lat", format!("{:.7}", node.location.y)));
    attributes.push(("lon", format!("{:.7}", node.location.x)));
    let start = start_tag("node", &attributes);
    if node.tags.is_empty() {
        return emit(writer, Event::Empty(start));
    }
    emit(writer, Event::Start(start))?;
    write_tags(writer, &node.tags)?;
    emit(writer, Event::End(BytesEnd::new("node")))
}

fn write_way(writer: &mut Writer<Vec<u8>>, way: &Way, changeset: &str) -> Result<(), OsmXmlError> {
    emit(
        writer,
        Event::Start(start_tag("way", &identity(way.id, way.version, changeset))),
    )?;
    for node_id in &way.nodes {
        emit(
            writer,
            Event::Empty(start_tag("nd", &[("ref", node_id.to_string())])),
        )?;
    }
    write_tags(writer, &way.tags)?;
    emit(writer, Event::End(BytesEnd::new("way")))
}

fn write_tags(writer: &mut Writer<Vec<u8>>, tags: &Tags) -> Result<(), OsmXmlError> {
    for (key, value) in tags {
        emit(
            writer,
            Event::Empty(start_tag("tag", &[("k", key.clone()), ("v", value.clone())])),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CADASTRE: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version="0.6" upload="false" generator="JOSM">
  <node id="-1" lat="44.0" lon="20.0"/>
  <node id="-2" lat="44.0" lon="20.01">
    <tag k="note" v="corner &amp; post"/>
  </node>
  <node id="-3" action="delete" lat="44.0" lon="20.02"/>
  <way id="-10">
    <nd ref="-1"/>
    <nd ref="-2"/>
  </way>
  <relation id="-100">
    <member type="way" ref="-10" role="outer"/>
    <tag k="name" v="Vranje"/>
    <tag k="level9_id" v="70912"/>
  </relation>
</osm>"#;

    #[rstest]
    fn parses_cadastre_documents() {
        let set = parse_osm(CADASTRE).expect("valid document");

        assert_eq!(set.nodes.len(), 2, "deleted node skipped");
        let corner = set.nodes.get(&-2).expect("node -2");
        assert_eq!(corner.location, Coord { x: 20.01, y: 44.0 });
        assert_eq!(
            corner.tags.get("note").map(String::as_str),
            Some("corner & post")
        );
        assert_eq!(set.ways.get(&-10).expect("way").nodes, vec![-1, -2]);
        let relation = set.relations.get(&-100).expect("relation");
        assert_eq!(relation.members, vec![Member::way(-10, "outer")]);
        assert_eq!(
            relation.tags.get("level9_id").map(String::as_str),
            Some("70912")
        );
    }

    #[rstest]
    #[case(r#"<osm><node id="x" lat="1" lon="1"/></osm>"#, "id")]
    #[case(r#"<osm><node id="1" lat="1"/></osm>"#, "lon")]
    #[case(r#"<osm><way id="1"><nd/></way></osm>"#, "ref")]
    fn rejects_bad_attributes(#[case] xml: &str, #[case] attribute: &str) {
        let err = parse_osm(xml).expect_err("invalid document");
        match err {
            OsmXmlError::MissingAttribute { attribute: name, .. }
            | OsmXmlError::InvalidAttribute { attribute: name, .. } => {
                assert_eq!(name, attribute);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[rstest]
    fn rejects_unknown_member_types() {
        let xml = r#"<osm><relation id="1"><member type="area" ref="2" role=""/></relation></osm>"#;
        assert!(matches!(
            parse_osm(xml),
            Err(OsmXmlError::MemberKind { .. })
        ));
    }

    #[rstest]
    fn rejects_malformed_xml() {
        assert!(matches!(
            parse_osm("<osm><node id=\"1\" lat=\"1\" lon=\"1\"></way></osm>"),
            Err(OsmXmlError::Syntax { .. })
        ));
    }

    #[rstest]
    fn renders_blocks_in_upload_order() {
        let mut change = OsmChange::default();
        change
            .create
            .push(Node::new(-1, Coord { x: 20.5, y: 44.25 }));
        change.modify_nodes.insert(
            7,
            Node::new(7, Coord { x: 20.0, y: 44.0 }).with_version(3),
        );
        change.modify_ways.insert(
            40,
            Way::new(40, vec![7, -1])
                .with_version(2)
                .with_tag("boundary", "administrative"),
        );
        change
            .delete
            .insert(8, Node::new(8, Coord { x: 20.1, y: 44.1 }).with_version(1));
        assert_eq!(change.len(), 4);

        let xml = change.render(99).expect("render change");

        let create = xml.find("<create>").expect("create block");
        let modify = xml.find("<modify>").expect("modify block");
        let delete = xml.find("<delete>").expect("delete block");
        assert!(create < modify && modify < delete);
        assert!(xml.contains(
            r#"<node id="-1" changeset="99" lat="44.2500000" lon="20.5000000"/>"#
        ));
        assert!(xml.contains(r#"<way id="40" version="2" changeset="99">"#));
        assert!(xml.contains(r#"<nd ref="-1"/>"#));
        assert!(xml.contains(r#"<tag k="boundary" v="administrative"/>"#));
    }

    #[rstest]
    fn renders_changeset_tags_escaped() {
        let tags = Tags::from([
            ("comment".to_owned(), "Fix \"boundaries\" & more".to_owned()),
            ("mechanical".to_owned(), "yes".to_owned()),
        ]);

        let xml = render_changeset(&tags).expect("render changeset");

        assert!(xml.contains("<changeset>"));
        assert!(xml.contains(r#"k="comment" v="Fix &quot;boundaries&quot; &amp; more""#));
        assert!(xml.contains(r#"<tag k="mechanical" v="yes"/>"#));
    }

    #[rstest]
    fn parses_diff_results() {
        let xml = r#"<diffResult version="0.6">
  <node old_id="-1" new_id="1234" new_version="1"/>
  <way old_id="40" new_id="40" new_version="3"/>
  <node old_id="8"/>
</diffResult>"#;

        let entries = parse_diff_result(xml).expect("valid diff");

        assert_eq!(
            entries,
            vec![
                DiffEntry {
                    kind: ElementKind::Node,
                    old_id: -1,
                    new_id: Some(1234),
                    new_version: Some(1),
                },
                DiffEntry {
                    kind: ElementKind::Way,
                    old_id: 40,
                    new_id: Some(40),
                    new_version: Some(3),
                },
                DiffEntry {
                    kind: ElementKind::Node,
                    old_id: 8,
                    new_id: None,
                    new_version: None,
                },
            ]
        );
    }
}
