//! Loading the cadastre input file.

use camino::{Utf8Path, Utf8PathBuf};
use conflation_core::SourceDataset;
use log::info;
use thiserror::Error;

use crate::files;
use crate::osm_xml::{OsmXmlError, parse_osm};
use crate::pbf::{PbfError, read_pbf};

/// Errors raised while loading cadastre input.
#[derive(Debug, Error)]
pub enum SourceLoadError {
    /// The file extension names no supported format.
    #[error("unsupported cadastre format for {path}; expected .osm or .pbf")]
    UnsupportedFormat {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// The file could not be read.
    #[error("failed to read cadastre file {path}")]
    Read {
        /// File being read.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The XML document is invalid.
    #[error("failed to parse cadastre file {path}")]
    Xml {
        /// File being parsed.
        path: Utf8PathBuf,
        /// Parser error.
        #[source]
        source: OsmXmlError,
    },
    /// The PBF file is invalid.
    #[error(transparent)]
    Pbf(#[from] PbfError),
    /// The file holds no ways.
    #[error("cadastre file {path} contains no ways")]
    Empty {
        /// File that was loaded.
        path: Utf8PathBuf,
    },
}

/// Supported cadastre encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// OSM XML (`.osm`, `.xml`).
    Xml,
    /// OSM PBF (`.pbf`).
    Pbf,
}

impl SourceFormat {
    /// Pick the format from the file extension.
    #[must_use]
    pub fn detect(path: &Utf8Path) -> Option<Self> {
        match path.extension()?.to_ascii_lowercase().as_str() {
            "osm" | "xml" => Some(Self::Xml),
            "pbf" => Some(Self::Pbf),
            _ => None,
        }
    }
}

/// Load and index a cadastre file.
///
/// # Errors
///
/// Returns [`SourceLoadError`] when the format is unsupported, the file is
/// unreadable or malformed, or it holds no ways.
pub fn load_dataset(path: &Utf8Path) -> Result<SourceDataset, SourceLoadError> {
    let format = SourceFormat::detect(path).ok_or_else(|| SourceLoadError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    let elements = match format {
        SourceFormat::Xml => {
            let xml = files::read_to_string(path).map_err(|source| SourceLoadError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            parse_osm(&xml).map_err(|source| SourceLoadError::Xml {
                path: path.to_path_buf(),
                source,
            })?
        }
        SourceFormat::Pbf => read_pbf(path.as_std_path())?,
    };
    if elements.ways.is_empty() {
        return Err(SourceLoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    info!(
        "loaded {} ways and {} relations from {path}",
        elements.ways.len(),
        elements.relations.len()
    );
    Ok(SourceDataset::new(elements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).expect("utf-8 path");
        files::write_string(&path, contents).expect("write fixture");
        path
    }

    #[rstest]
    #[case("a.osm", Some(SourceFormat::Xml))]
    #[case("a.OSM", Some(SourceFormat::Xml))]
    #[case("a.osm.pbf", Some(SourceFormat::Pbf))]
    #[case("a.csv", None)]
    #[case("noextension", None)]
    fn detects_formats(#[case] path: &str, #[case] expected: Option<SourceFormat>) {
        assert_eq!(SourceFormat::detect(Utf8Path::new(path)), expected);
    }

    #[rstest]
    fn loads_xml_datasets(temp_dir: TempDir) {
        let path = write(
            &temp_dir,
            "cadastre.osm",
            r#"<osm version="0.6">
  <node id="-1" lat="44.0" lon="20.0"/>
  <node id="-2" lat="44.0" lon="20.1"/>
  <way id="-10"><nd ref="-1"/><nd ref="-2"/></way>
  <relation id="-100"><member type="way" ref="-10" role="outer"/></relation>
</osm>"#,
        );

        let dataset = load_dataset(&path).expect("load dataset");

        assert_eq!(dataset.memberships(-10), &[-100]);
        assert_eq!(
            dataset.source_way(-10).expect("way").geometry.0.len(),
            2
        );
    }

    #[rstest]
    fn rejects_documents_without_ways(temp_dir: TempDir) {
        let path = write(&temp_dir, "empty.osm", "<osm version=\"0.6\"/>");
        assert!(matches!(
            load_dataset(&path),
            Err(SourceLoadError::Empty { .. })
        ));
    }

    #[rstest]
    fn rejects_unknown_extensions(temp_dir: TempDir) {
        let path = write(&temp_dir, "cadastre.csv", "level9_id,wkt");
        assert!(matches!(
            load_dataset(&path),
            Err(SourceLoadError::UnsupportedFormat { .. })
        ));
    }

    #[rstest]
    fn reports_missing_files(temp_dir: TempDir) {
        let path = Utf8PathBuf::from_path_buf(temp_dir.path().join("missing.osm"))
            .expect("utf-8 path");
        assert!(matches!(
            load_dataset(&path),
            Err(SourceLoadError::Read { .. })
        ));
    }
}
