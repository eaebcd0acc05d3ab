use thiserror::Error;

use crate::aligner::AlignError;
use crate::element::MissingNodeError;
use crate::resolver::ResolveError;
use crate::services::ServiceError;
use crate::source::SourceError;

/// Fatal errors that stop a conflation run.
///
/// Domain failures are never reported here; they become terminal
/// [`crate::ProcessingState`]s on the way's record instead.
#[derive(Debug, Error)]
pub enum ConflateError {
    /// The cadastre input is inconsistent.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Source way geometry could not be read.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// A service response referenced a node it did not include.
    #[error(transparent)]
    MissingNode(#[from] MissingNodeError),
    /// The live way could not be aligned.
    #[error(transparent)]
    Align(#[from] AlignError),
    /// A remote call failed permanently or exhausted its retries.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The pending record for a way disappeared mid-run.
    #[error("no progress record for way {way_id}")]
    MissingRecord {
        /// Source way identifier.
        way_id: i64,
    },
    /// Writing progress failed.
    #[error("failed to persist progress for way {way_id}")]
    Persist {
        /// Source way whose result was being saved.
        way_id: i64,
        /// Error reported by the progress sink.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
