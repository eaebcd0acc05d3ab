//! [`MapEditService`] backed by the OSM editing API (version 0.6).
//!
//! Reads go straight to the API's JSON endpoints. Writes are staged in an
//! [`OsmChange`] and uploaded as one `osmChange` document on
//! [`MapEditService::flush`]. The changeset is opened lazily on the first
//! upload, reopened if the server closed it, and closed by
//! [`MapEditService::finish`].
//!
//! Authentication is the caller's concern: the client only attaches the
//! bearer token it is given.

use std::fmt;
use std::time::Duration;

use conflation_core::{
    ElementKind, ElementSet, MapEditService, Node, ServiceError, Tags, Way,
};
use geo::Coord;
use log::{debug, info, warn};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use url::Url;

use crate::osm_json::ElementsResponse;
use crate::osm_xml::{OsmChange, parse_diff_result, render_changeset};
use crate::transport::{
    DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, HttpTransport, TransportBuildError, decode_json,
};

/// Production API root.
pub const DEFAULT_OSM_API_URL: &str = "https://api.openstreetmap.org/api/0.6";

/// Default changeset comment.
pub const DEFAULT_CHANGESET_COMMENT: &str = "Aligning administrative boundaries with cadastre data";

const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Errors raised while building an [`OsmApiClient`].
#[derive(Debug, Error)]
pub enum OsmApiError {
    /// The API root is not a valid absolute URL.
    #[error("invalid OSM API URL {url:?}")]
    InvalidUrl {
        /// Configured URL.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// The HTTP transport could not be built.
    #[error(transparent)]
    Transport(#[from] TransportBuildError),
}

/// Configuration for [`OsmApiClient`].
#[derive(Clone, PartialEq, Eq)]
pub struct OsmApiConfig {
    /// API root, e.g. `https://api.openstreetmap.org/api/0.6`.
    pub base_url: String,
    /// OAuth 2 bearer token. Reads work without one.
    pub token: Option<String>,
    /// Changeset `comment` tag.
    pub comment: String,
    /// Changeset `source` tag.
    pub source: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl fmt::Debug for OsmApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsmApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("comment", &self.comment)
            .field("source", &self.source)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl OsmApiConfig {
    /// Create a configuration for the given API root.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            comment: DEFAULT_CHANGESET_COMMENT.to_owned(),
            source: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    /// Set the bearer token used for writes.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the changeset comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Set the changeset source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Tags attached to every changeset opened by the client.
    #[must_use]
    pub fn changeset_tags(&self) -> Tags {
        let mut tags = Tags::from([
            ("comment".to_owned(), self.comment.clone()),
            ("created_by".to_owned(), DEFAULT_USER_AGENT.to_owned()),
            ("mechanical".to_owned(), "yes".to_owned()),
        ]);
        if let Some(source) = &self.source {
            tags.insert("source".to_owned(), source.clone());
        }
        tags
    }
}

/// OSM API client staging writes into a single changeset.
#[derive(Debug)]
pub struct OsmApiClient {
    transport: HttpTransport,
    base: String,
    config: OsmApiConfig,
    pending: OsmChange,
    next_placeholder: i64,
    changeset: Option<u64>,
}

impl OsmApiClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`OsmApiError`] if the URL is invalid or the transport fails
    /// to build.
    pub fn with_config(config: OsmApiConfig) -> Result<Self, OsmApiError> {
        Url::parse(&config.base_url).map_err(|source| OsmApiError::InvalidUrl {
            url: config.base_url.clone(),
            source,
        })?;
        let transport = HttpTransport::new(&config.user_agent, config.timeout)?;
        Ok(Self {
            transport,
            base: config.base_url.trim_end_matches('/').to_owned(),
            config,
            pending: OsmChange::default(),
            next_placeholder: 0,
            changeset: None,
        })
    }

    /// Staged, not yet uploaded changes.
    #[must_use]
    pub const fn pending(&self) -> &OsmChange {
        &self.pending
    }

    /// Identifier of the open changeset, if any.
    #[must_use]
    pub const fn changeset(&self) -> Option<u64> {
        self.changeset
    }

    fn element_url(&self, kind: ElementKind, id: i64) -> String {
        format!("{}/{kind}/{id}.json", self.base)
    }

    fn full_way_url(&self, way_id: i64) -> String {
        format!("{}/way/{way_id}/full.json", self.base)
    }

    fn authorised(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn fetch(&self, url: &str, kind: ElementKind, id: i64) -> Result<ElementSet, ServiceError> {
        let body = self
            .transport
            .block_on(
                self.transport
                    .send_text(self.transport.client().get(url), url),
            )
            .map_err(|err| match err {
                ServiceError::Http {
                    status: 404 | 410, ..
                } => ServiceError::NotFound { kind, id },
                other => other,
            })?;
        let response: ElementsResponse = decode_json(&body, url)?;
        Ok(response.into_element_set())
    }

    fn put_xml(&self, url: &str, body: String) -> Result<String, ServiceError> {
        let request = self
            .authorised(self.transport.client().put(url))
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(body);
        self.transport
            .block_on(self.transport.send_text(request, url))
    }

    fn open_changeset(&mut self) -> Result<u64, ServiceError> {
        if let Some(changeset) = self.changeset {
            return Ok(changeset);
        }
        let url = format!("{}/changeset/create", self.base);
        let body = render_changeset(&self.config.changeset_tags()).map_err(|err| {
            ServiceError::MalformedResponse {
                url: url.clone(),
                message: err.to_string(),
            }
        })?;
        let response = self.put_xml(&url, body)?;
        let changeset = parse_changeset_id(&response, &url)?;
        info!("opened changeset {changeset}");
        self.changeset = Some(changeset);
        Ok(changeset)
    }

    fn upload(&self, changeset: u64) -> Result<String, ServiceError> {
        let url = format!("{}/changeset/{changeset}/upload", self.base);
        let body = self
            .pending
            .render(changeset)
            .map_err(|err| ServiceError::MalformedResponse {
                url: url.clone(),
                message: err.to_string(),
            })?;
        let request = self
            .authorised(self.transport.client().post(&url))
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(body);
        self.transport
            .block_on(self.transport.send_text(request, &url))
    }
}

/// Parse the plain-text id returned by `changeset/create`.
fn parse_changeset_id(body: &str, url: &str) -> Result<u64, ServiceError> {
    body.trim()
        .parse()
        .map_err(|_| ServiceError::MalformedResponse {
            url: url.to_owned(),
            message: format!("expected a changeset id, got {:?}", body.trim()),
        })
}

/// Whether an upload failed because the server already closed the changeset.
fn changeset_was_closed(err: &ServiceError) -> bool {
    matches!(err, ServiceError::Http { status: 409, message, .. } if message.contains("was closed"))
}

impl MapEditService for OsmApiClient {
    fn way(&mut self, way_id: i64) -> Result<Way, ServiceError> {
        let url = self.element_url(ElementKind::Way, way_id);
        let mut set = self.fetch(&url, ElementKind::Way, way_id)?;
        set.ways
            .remove(&way_id)
            .ok_or_else(|| ServiceError::MalformedResponse {
                url,
                message: format!("response does not contain way {way_id}"),
            })
    }

    fn node(&mut self, node_id: i64) -> Result<Node, ServiceError> {
        if node_id < 0 {
            return self
                .pending
                .create
                .iter()
                .find(|node| node.id == node_id)
                .cloned()
                .ok_or(ServiceError::NotFound {
                    kind: ElementKind::Node,
                    id: node_id,
                });
        }
        let url = self.element_url(ElementKind::Node, node_id);
        let mut set = self.fetch(&url, ElementKind::Node, node_id)?;
        set.nodes
            .remove(&node_id)
            .ok_or_else(|| ServiceError::MalformedResponse {
                url,
                message: format!("response does not contain node {node_id}"),
            })
    }

    fn way_full(&mut self, way_id: i64) -> Result<ElementSet, ServiceError> {
        let url = self.full_way_url(way_id);
        self.fetch(&url, ElementKind::Way, way_id)
    }

    fn create_node(&mut self, location: Coord, tags: Tags) -> Result<i64, ServiceError> {
        self.next_placeholder -= 1;
        let id = self.next_placeholder;
        self.pending.create.push(Node {
            id,
            version: None,
            location,
            tags,
        });
        Ok(id)
    }

    fn update_node(&mut self, node: &Node) -> Result<(), ServiceError> {
        if let Some(staged) = self
            .pending
            .create
            .iter_mut()
            .find(|staged| staged.id == node.id)
        {
            *staged = node.clone();
        } else {
            self.pending.modify_nodes.insert(node.id, node.clone());
        }
        Ok(())
    }

    fn update_way(&mut self, way: &Way) -> Result<(), ServiceError> {
        self.pending.modify_ways.insert(way.id, way.clone());
        Ok(())
    }

    fn delete_node(&mut self, node: &Node) -> Result<(), ServiceError> {
        if node.id < 0 {
            self.pending.create.retain(|staged| staged.id != node.id);
            return Ok(());
        }
        self.pending.modify_nodes.remove(&node.id);
        self.pending.delete.insert(node.id, node.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ServiceError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let changeset = self.open_changeset()?;
        let diff = match self.upload(changeset) {
            Err(err) if changeset_was_closed(&err) => {
                warn!("changeset {changeset} was closed by the server; opening a new one");
                self.changeset = None;
                let reopened = self.open_changeset()?;
                self.upload(reopened)?
            }
            other => other?,
        };
        match parse_diff_result(&diff) {
            Ok(entries) => debug!("upload acknowledged {} elements", entries.len()),
            Err(err) => warn!("could not read upload acknowledgement: {err}"),
        }
        info!("uploaded {} changes", self.pending.len());
        self.pending = OsmChange::default();
        self.next_placeholder = 0;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ServiceError> {
        if !self.pending.is_empty() {
            warn!("{} staged changes left at finish; uploading", self.pending.len());
            self.flush()?;
        }
        let Some(changeset) = self.changeset else {
            return Ok(());
        };
        let url = format!("{}/changeset/{changeset}/close", self.base);
        self.put_xml(&url, String::new())?;
        info!("closed changeset {changeset}");
        self.changeset = None;
        Ok(())
    }
}
