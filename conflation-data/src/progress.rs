//! SQLite persistence for per-way processing records.
//!
//! One row per cadastre way lives in the `way_progress` table. The state is
//! stored both by name, for people reading the database, and by ordinal.
//! Node ids are a JSON array.

use camino::{Utf8Path, Utf8PathBuf};
use conflation_core::{ProcessingRecord, ProcessingState, ProgressSink, RecordSet, SourceDataset};
use log::{info, warn};
use rusqlite::{Connection, Error as SqliteError, Transaction};
use thiserror::Error;

use crate::files;

/// Errors raised by [`ProgressStore`].
#[derive(Debug, Error)]
pub enum ProgressStoreError {
    /// Failed to create the parent directory for the database.
    #[error("failed to create parent directory for {path}")]
    CreateDirectory {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Checking for the database file failed.
    #[error("failed to inspect progress file {path}")]
    Inspect {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The progress file does not exist.
    #[error("progress file {path} does not exist")]
    Missing {
        /// Database path.
        path: Utf8PathBuf,
    },
    /// Opening the SQLite database failed.
    #[error("failed to open SQLite database at {path}")]
    Open {
        /// Database path.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Creating the `way_progress` table failed.
    #[error("failed to create way_progress table")]
    CreateSchema {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Beginning a transaction failed.
    #[error("failed to begin progress transaction")]
    BeginTransaction {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Clearing rows before a snapshot failed.
    #[error("failed to clear progress rows")]
    Clear {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Preparing a statement failed.
    #[error("failed to prepare progress statement")]
    Prepare {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Serializing node ids failed.
    #[error("failed to serialize nodes of way {way_id}")]
    SerializeNodes {
        /// Way whose nodes failed to serialize.
        way_id: i64,
        /// Source error produced by `serde_json`.
        #[source]
        source: serde_json::Error,
    },
    /// Writing a row failed.
    #[error("failed to persist progress of way {way_id}")]
    PersistRow {
        /// Way being persisted.
        way_id: i64,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Reading rows failed.
    #[error("failed to read progress rows")]
    ReadRows {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Stored node ids are not a JSON array of integers.
    #[error("stored nodes of way {way_id} are invalid")]
    DecodeNodes {
        /// Way with the invalid row.
        way_id: i64,
        /// Source error produced by `serde_json`.
        #[source]
        source: serde_json::Error,
    },
    /// A stored state is neither a known name nor a known ordinal.
    #[error("way {way_id} has unknown state {name:?} (ordinal {ordinal})")]
    UnknownState {
        /// Way with the invalid row.
        way_id: i64,
        /// Stored state name.
        name: String,
        /// Stored ordinal.
        ordinal: i64,
    },
    /// Committing a transaction failed.
    #[error("failed to commit progress transaction")]
    Commit {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
}

const UPSERT: &str = "INSERT OR REPLACE INTO way_progress \
    (way_id, nodes, relations, processed, state_ordinal, error_context, osm_way) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

/// SQLite-backed progress store.
#[derive(Debug)]
pub struct ProgressStore {
    connection: Connection,
    path: Utf8PathBuf,
}

impl ProgressStore {
    /// Open or create the database at `path`.
    ///
    /// Parent directories are created automatically and the table is
    /// initialised if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressStoreError`] if the database cannot be opened or
    /// initialised.
    pub fn open(path: &Utf8Path) -> Result<Self, ProgressStoreError> {
        files::ensure_parent_dir(path).map_err(|source| ProgressStoreError::CreateDirectory {
            path: path.to_path_buf(),
            source,
        })?;
        let connection =
            Connection::open(path.as_std_path()).map_err(|source| ProgressStoreError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS way_progress (
                    way_id INTEGER PRIMARY KEY,
                    nodes TEXT NOT NULL,
                    relations TEXT NOT NULL DEFAULT '',
                    processed TEXT NOT NULL,
                    state_ordinal INTEGER NOT NULL,
                    error_context TEXT,
                    osm_way INTEGER
                )",
                [],
            )
            .map_err(|source| ProgressStoreError::CreateSchema { source })?;
        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    /// Database location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Read every stored record.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressStoreError`] if rows cannot be read or decoded.
    pub fn records(&self) -> Result<RecordSet, ProgressStoreError> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT way_id, nodes, relations, processed, state_ordinal, error_context, osm_way \
                 FROM way_progress ORDER BY way_id",
            )
            .map_err(|source| ProgressStoreError::Prepare { source })?;
        let rows = statement
            .query_map([], |row| {
                Ok(StoredRow {
                    way_id: row.get(0)?,
                    nodes: row.get(1)?,
                    relations: row.get(2)?,
                    processed: row.get(3)?,
                    state_ordinal: row.get(4)?,
                    error_context: row.get(5)?,
                    osm_way: row.get(6)?,
                })
            })
            .map_err(|source| ProgressStoreError::ReadRows { source })?;

        let mut records = RecordSet::default();
        for row in rows {
            let row = row.map_err(|source| ProgressStoreError::ReadRows { source })?;
            let (way_id, record) = row.decode()?;
            records.insert(way_id, record);
        }
        Ok(records)
    }
}

/// Raw column values of one row.
struct StoredRow {
    way_id: i64,
    nodes: String,
    relations: String,
    processed: String,
    state_ordinal: i64,
    error_context: Option<String>,
    osm_way: Option<i64>,
}

impl StoredRow {
    fn decode(self) -> Result<(i64, ProcessingRecord), ProgressStoreError> {
        let way_id = self.way_id;
        let nodes = serde_json::from_str(&self.nodes)
            .map_err(|source| ProgressStoreError::DecodeNodes { way_id, source })?;
        let processed = ProcessingState::from_name(&self.processed)
            .or_else(|| {
                u8::try_from(self.state_ordinal)
                    .ok()
                    .and_then(ProcessingState::from_ordinal)
            })
            .ok_or_else(|| ProgressStoreError::UnknownState {
                way_id,
                name: self.processed.clone(),
                ordinal: self.state_ordinal,
            })?;
        Ok((
            way_id,
            ProcessingRecord {
                nodes,
                relations: self.relations,
                processed,
                error_context: self.error_context,
                osm_way: self.osm_way,
            },
        ))
    }
}

fn write_row(
    transaction: &Transaction<'_>,
    way_id: i64,
    record: &ProcessingRecord,
) -> Result<(), ProgressStoreError> {
    let nodes = serde_json::to_string(&record.nodes)
        .map_err(|source| ProgressStoreError::SerializeNodes { way_id, source })?;
    transaction
        .execute(
            UPSERT,
            (
                way_id,
                nodes,
                record.relations.as_str(),
                record.processed.name(),
                record.processed.ordinal(),
                record.error_context.as_deref(),
                record.osm_way,
            ),
        )
        .map(|_| ())
        .map_err(|source| ProgressStoreError::PersistRow { way_id, source })
}

impl ProgressSink for ProgressStore {
    type Error = ProgressStoreError;

    fn persist_record(
        &mut self,
        way_id: i64,
        record: &ProcessingRecord,
    ) -> Result<(), ProgressStoreError> {
        let transaction = self
            .connection
            .transaction()
            .map_err(|source| ProgressStoreError::BeginTransaction { source })?;
        write_row(&transaction, way_id, record)?;
        transaction
            .commit()
            .map_err(|source| ProgressStoreError::Commit { source })
    }

    fn persist_snapshot(&mut self, records: &RecordSet) -> Result<(), ProgressStoreError> {
        let transaction = self
            .connection
            .transaction()
            .map_err(|source| ProgressStoreError::BeginTransaction { source })?;
        transaction
            .execute("DELETE FROM way_progress", [])
            .map_err(|source| ProgressStoreError::Clear { source })?;
        for (way_id, record) in records.iter() {
            write_row(&transaction, way_id, record)?;
        }
        transaction
            .commit()
            .map_err(|source| ProgressStoreError::Commit { source })
    }
}

/// Combine stored records with the dataset.
///
/// Stored rows win. Dataset ways without a row start fresh in `NO`, and rows
/// for ways the dataset does not contain are dropped with a warning.
#[must_use]
pub fn reconcile(stored: RecordSet, dataset: &SourceDataset) -> RecordSet {
    let mut records = RecordSet::fresh(dataset);
    for (way_id, record) in stored.iter() {
        if records.contains(way_id) {
            records.insert(way_id, record.clone());
        } else {
            warn!("dropping progress for way {way_id}, which is not in the cadastre input");
        }
    }
    records
}

/// Open the store at `path` and load records for `dataset`.
///
/// A missing file yields fresh records; the file is created on open.
///
/// # Errors
///
/// Returns [`ProgressStoreError`] if the store cannot be opened or read.
pub fn load(
    path: &Utf8Path,
    dataset: &SourceDataset,
) -> Result<(ProgressStore, RecordSet), ProgressStoreError> {
    let existed = files::file_exists(path).map_err(|source| ProgressStoreError::Inspect {
        path: path.to_path_buf(),
        source,
    })?;
    let store = ProgressStore::open(path)?;
    if !existed {
        info!("no progress at {path}; starting from scratch");
        return Ok((store, RecordSet::fresh(dataset)));
    }
    let records = reconcile(store.records()?, dataset);
    info!("resuming from {path} with {} records", records.len());
    Ok((store, records))
}

/// Read the records stored at `path` without a dataset.
///
/// # Errors
///
/// Returns [`ProgressStoreError::Missing`] if there is no file, or another
/// [`ProgressStoreError`] if it cannot be read.
pub fn read_records(path: &Utf8Path) -> Result<RecordSet, ProgressStoreError> {
    let exists = files::file_exists(path).map_err(|source| ProgressStoreError::Inspect {
        path: path.to_path_buf(),
        source,
    })?;
    if !exists {
        return Err(ProgressStoreError::Missing {
            path: path.to_path_buf(),
        });
    }
    ProgressStore::open(path)?.records()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflation_core::{Element, ElementSet, Node, Outcome, Way};
    use geo::Coord;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn db_path(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).expect("utf-8 path")
    }

    #[fixture]
    fn dataset() -> SourceDataset {
        let mut elements = ElementSet::default();
        for (id, y) in [(1, 44.0), (2, 44.001), (3, 44.002), (4, 44.003)] {
            elements.insert(Element::Node(Node::new(id, Coord { x: 20.0, y })));
        }
        elements.insert(Element::Way(Way::new(-10, vec![1, 2])));
        elements.insert(Element::Way(Way::new(-11, vec![3, 4])));
        SourceDataset::new(elements)
    }

    fn conflated(nodes: Vec<i64>) -> ProcessingRecord {
        let mut record = ProcessingRecord::pending(nodes);
        record.relations = "Vranje (ref: 70912)".into();
        record.osm_way = Some(40);
        record.apply(Outcome::bare(ProcessingState::Conflated));
        record
    }

    #[rstest]
    fn missing_file_starts_fresh(temp_dir: TempDir, dataset: SourceDataset) {
        let path = db_path(&temp_dir, "nested/progress.db");

        let (_store, records) = load(&path, &dataset).expect("load progress");

        assert_eq!(records, RecordSet::fresh(&dataset));
        assert!(path.exists(), "database created on first load");
    }

    #[rstest]
    fn snapshots_round_trip(temp_dir: TempDir, dataset: SourceDataset) {
        let path = db_path(&temp_dir, "progress.db");
        let (mut store, mut records) = load(&path, &dataset).expect("load progress");
        let record = records.get_mut(-10).expect("record");
        record.relations = "Vranje (ref: 70912), Ranutovac (ref: 70920)".into();
        record.osm_way = Some(40);
        record.apply(Outcome::with_context(
            ProcessingState::ErrorEndPointsFarApart,
            "512.30",
        ));

        store.persist_snapshot(&records).expect("persist snapshot");
        drop(store);

        assert_eq!(read_records(&path).expect("read back"), records);
        let (_store, reloaded) = load(&path, &dataset).expect("reload");
        assert_eq!(reloaded, records);
    }

    #[rstest]
    fn persist_record_upserts_one_row(temp_dir: TempDir, dataset: SourceDataset) {
        let path = db_path(&temp_dir, "progress.db");
        let (mut store, records) = load(&path, &dataset).expect("load progress");
        store.persist_snapshot(&records).expect("persist snapshot");

        store
            .persist_record(-11, &conflated(vec![3, 4]))
            .expect("persist record");

        let stored = store.records().expect("read rows");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored.get(-11), Some(&conflated(vec![3, 4])));
        assert_eq!(
            stored.get(-10).map(|record| record.processed),
            Some(ProcessingState::No)
        );
    }

    #[rstest]
    fn stored_rows_win_and_strays_are_dropped(dataset: SourceDataset) {
        let stored: RecordSet = [
            (-10, conflated(vec![1, 2])),
            (-99, conflated(vec![7, 8])),
        ]
        .into_iter()
        .collect();

        let records = reconcile(stored, &dataset);

        assert_eq!(records.len(), 2);
        assert_eq!(records.get(-10), Some(&conflated(vec![1, 2])));
        assert_eq!(
            records.get(-11).map(|record| record.processed),
            Some(ProcessingState::No)
        );
        assert!(!records.contains(-99));
    }

    #[rstest]
    fn falls_back_to_ordinal_for_renamed_states(temp_dir: TempDir) {
        let path = db_path(&temp_dir, "progress.db");
        let store = ProgressStore::open(&path).expect("open store");
        store
            .connection
            .execute(
                "INSERT INTO way_progress (way_id, nodes, processed, state_ordinal) \
                 VALUES (-10, '[1,2]', 'LEGACY_NAME', 3)",
                [],
            )
            .expect("insert row");

        let records = store.records().expect("read rows");

        assert_eq!(
            records.get(-10).map(|record| record.processed),
            Some(ProcessingState::Conflated)
        );
    }

    #[rstest]
    #[case("'[1,2]'", "'BOGUS'", 99)]
    #[case("'not json'", "'NO'", 1)]
    fn rejects_corrupt_rows(
        temp_dir: TempDir,
        #[case] nodes: &str,
        #[case] processed: &str,
        #[case] ordinal: i64,
    ) {
        let path = db_path(&temp_dir, "progress.db");
        let store = ProgressStore::open(&path).expect("open store");
        store
            .connection
            .execute(
                &format!(
                    "INSERT INTO way_progress (way_id, nodes, processed, state_ordinal) \
                     VALUES (-10, {nodes}, {processed}, {ordinal})"
                ),
                [],
            )
            .expect("insert row");

        let err = store.records().expect_err("corrupt row");

        assert!(matches!(
            err,
            ProgressStoreError::UnknownState { way_id: -10, .. }
                | ProgressStoreError::DecodeNodes { way_id: -10, .. }
        ));
    }

    #[rstest]
    fn reading_a_missing_store_fails(temp_dir: TempDir) {
        let path = db_path(&temp_dir, "absent.db");
        assert!(matches!(
            read_records(&path),
            Err(ProgressStoreError::Missing { .. })
        ));
        assert!(!path.exists(), "reading must not create the file");
    }
}
