//! Collaborator interfaces for the remote query and edit services.
//!
//! Both traits are synchronous so the conflation pipeline stays a plain
//! sequential loop; adapters that speak HTTP block on their own runtime.

use geo::Coord;
use thiserror::Error;

use crate::element::{ElementKind, ElementSet, Node, Tags, Way};
use crate::gate::ConfirmationGate;
use crate::retry::RetryPolicy;
use crate::source::AdminEntity;

/// Errors reported by [`GeoQueryService`] and [`MapEditService`] adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The request exceeded its deadline.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Requested URL.
        url: String,
        /// Configured timeout.
        timeout_secs: u64,
    },
    /// The connection was refused, reset or dropped.
    #[error("connection to {url} failed: {message}")]
    Connection {
        /// Requested URL.
        url: String,
        /// Transport error message.
        message: String,
    },
    /// The service answered with a non-success HTTP status.
    #[error("{url} returned HTTP {status}: {message}")]
    Http {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },
    /// The response body could not be decoded.
    #[error("malformed response from {url}: {message}")]
    MalformedResponse {
        /// Requested URL.
        url: String,
        /// Decoder message.
        message: String,
    },
    /// The requested element does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of the missing element.
        kind: ElementKind,
        /// Identifier of the missing element.
        id: i64,
    },
    /// A transient failure persisted through every retry attempt.
    #[error("{operation} failed after {attempts} attempts")]
    RetriesExhausted {
        /// Operation being retried.
        operation: String,
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last: Box<ServiceError>,
    },
}

impl ServiceError {
    /// Whether retrying the call may succeed.
    ///
    /// Transport failures, timeouts, throttling (`429`), gateway errors
    /// (`502`, `503`, `504`) and undecodable responses are transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } | Self::MalformedResponse { .. } => {
                true
            }
            Self::Http { status, .. } => matches!(*status, 429 | 502 | 503 | 504),
            Self::NotFound { .. } | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Read-only spatial queries against the map dataset.
pub trait GeoQueryService {
    /// Ways shared by exactly the two entities and no other entity.
    fn shared_ways(
        &self,
        first: &AdminEntity,
        second: &AdminEntity,
    ) -> Result<ElementSet, ServiceError>;

    /// Ways bounding only `entity` and not shared with a sibling entity.
    fn single_ways(&self, entity: &AdminEntity) -> Result<ElementSet, ServiceError>;

    /// Ways and relations that reference any node of `way_id`.
    ///
    /// The response may include the way itself.
    fn entities_sharing_nodes(&self, way_id: i64) -> Result<ElementSet, ServiceError>;

    /// The map relation carrying `reference`, with member ways and nodes.
    fn entity_boundary(&self, reference: &str) -> Result<ElementSet, ServiceError>;
}

/// Reads and buffered writes against the live map.
///
/// Writes are staged until [`MapEditService::flush`] commits them as one
/// batch.
pub trait MapEditService {
    /// Fetch the current state of a way.
    fn way(&mut self, way_id: i64) -> Result<Way, ServiceError>;

    /// Fetch the current state of a node.
    fn node(&mut self, node_id: i64) -> Result<Node, ServiceError>;

    /// Fetch a way together with all of its nodes.
    fn way_full(&mut self, way_id: i64) -> Result<ElementSet, ServiceError>;

    /// Stage a new node and return its placeholder (negative) id.
    fn create_node(&mut self, location: Coord, tags: Tags) -> Result<i64, ServiceError>;

    /// Stage a node modification.
    fn update_node(&mut self, node: &Node) -> Result<(), ServiceError>;

    /// Stage a way modification.
    fn update_way(&mut self, way: &Way) -> Result<(), ServiceError>;

    /// Stage a node deletion.
    fn delete_node(&mut self, node: &Node) -> Result<(), ServiceError>;

    /// Commit every staged change as a single batch.
    fn flush(&mut self) -> Result<(), ServiceError>;

    /// Release any session state once the run ends.
    fn finish(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// The collaborators one conflation run talks to.
pub struct Services<'a> {
    /// Spatial query service.
    pub query: &'a dyn GeoQueryService,
    /// Edit service.
    pub edit: &'a mut dyn MapEditService,
    /// Human-in-the-loop policy.
    pub gate: &'a dyn ConfirmationGate,
    /// Retry policy applied to every remote call.
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for Services<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("query", &"<dyn GeoQueryService>")
            .field("edit", &"<dyn MapEditService>")
            .field("gate", &"<dyn ConfirmationGate>")
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn http(status: u16) -> ServiceError {
        ServiceError::Http {
            url: "http://example.test".into(),
            status,
            message: String::new(),
        }
    }

    #[rstest]
    #[case(http(429), true)]
    #[case(http(502), true)]
    #[case(http(503), true)]
    #[case(http(504), true)]
    #[case(http(400), false)]
    #[case(http(409), false)]
    #[case(ServiceError::Timeout { url: String::new(), timeout_secs: 1 }, true)]
    #[case(ServiceError::Connection { url: String::new(), message: "reset".into() }, true)]
    #[case(ServiceError::MalformedResponse { url: String::new(), message: "eof".into() }, true)]
    #[case(ServiceError::NotFound { kind: ElementKind::Way, id: 1 }, false)]
    fn classifies_transient_errors(#[case] error: ServiceError, #[case] transient: bool) {
        assert_eq!(error.is_transient(), transient);
    }
}
