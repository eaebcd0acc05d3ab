//! [`GeoQueryService`] backed by an Overpass API instance.
//!
//! Every query is scoped to the national area named by
//! [`OverpassConfig::country`] and to administrative relations at
//! [`OverpassConfig::admin_level`]. Map relations are matched to cadastre
//! entities through [`OverpassConfig::reference_key`].
//!
//! # Example
//!
//! ```no_run
//! use conflation_core::{AdminEntity, GeoQueryService};
//! use conflation_data::overpass::{OverpassClient, OverpassConfig};
//!
//! let config = OverpassConfig::new(
//!     "https://overpass-api.de/api/interpreter",
//!     "Србија",
//!     "ref:RS:naselje",
//! );
//! let client = OverpassClient::with_config(config)?;
//! let boundary = client.entity_boundary("70912")?;
//! println!("{} ways", boundary.ways.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::time::Duration;

use conflation_core::{AdminEntity, ElementSet, GeoQueryService, ServiceError};
use log::debug;
use thiserror::Error;
use url::Url;

use crate::osm_json::ElementsResponse;
use crate::transport::{
    DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, HttpTransport, TransportBuildError, decode_json,
};

/// Public Overpass endpoint.
pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// Admin level of the entities being conflated.
pub const DEFAULT_ADMIN_LEVEL: u8 = 9;

/// Errors raised while building an [`OverpassClient`].
#[derive(Debug, Error)]
pub enum OverpassError {
    /// The endpoint is not a valid absolute URL.
    #[error("invalid Overpass endpoint {url:?}")]
    InvalidUrl {
        /// Configured endpoint.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// The HTTP transport could not be built.
    #[error(transparent)]
    Transport(#[from] TransportBuildError),
}

/// Configuration for [`OverpassClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverpassConfig {
    /// Interpreter endpoint, e.g. `https://overpass-api.de/api/interpreter`.
    pub endpoint: String,
    /// Name of the national area (`admin_level=2`) scoping every query.
    pub country: String,
    /// Admin level of the conflated entities.
    pub admin_level: u8,
    /// Tag on map relations holding the cadastre reference.
    pub reference_key: String,
    /// Request timeout, also sent to Overpass as the query timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl OverpassConfig {
    /// Create a configuration with default level, timeout and user agent.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        country: impl Into<String>,
        reference_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            country: country.into(),
            admin_level: DEFAULT_ADMIN_LEVEL,
            reference_key: reference_key.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    /// Set the admin level of the conflated entities.
    #[must_use]
    pub const fn with_admin_level(mut self, admin_level: u8) -> Self {
        self.admin_level = admin_level;
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
}

/// Overpass-backed spatial query service.
#[derive(Debug)]
pub struct OverpassClient {
    transport: HttpTransport,
    endpoint: Url,
    config: OverpassConfig,
}

impl OverpassClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`OverpassError`] if the endpoint is invalid or the transport
    /// fails to build.
    pub fn with_config(config: OverpassConfig) -> Result<Self, OverpassError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|source| OverpassError::InvalidUrl {
            url: config.endpoint.clone(),
            source,
        })?;
        let transport = HttpTransport::new(&config.user_agent, config.timeout)?;
        Ok(Self {
            transport,
            endpoint,
            config,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &OverpassConfig {
        &self.config
    }

    fn header(&self) -> String {
        format!(
            "[out:json][timeout:{}];\narea[\"name\"=\"{}\"][\"admin_level\"=2]->.country;\n",
            self.config.timeout.as_secs(),
            escape(&self.config.country)
        )
    }

    fn entity_selector(&self, reference: &str, operator: &str) -> String {
        format!(
            "relation(area.country)[\"boundary\"=\"administrative\"][\"admin_level\"={}][\"{}\"{operator}\"{}\"]",
            self.config.admin_level,
            escape(&self.config.reference_key),
            escape(reference)
        )
    }

    /// Ways belonging to both relations and to nothing the first relation
    /// does not share with the second.
    fn shared_ways_query(&self, first: &str, second: &str) -> String {
        format!(
            "{header}{first_rel}->.first;\n{second_rel}->.second;\n\
             (.first;>;)->.a1;\n(.second;>;)->.a2;\n\
             (.a1; - .a2;)->.a3;\n(.a1; - .a3;)->.a4;\n\
             way.a4;\n(._;>;);\nout meta;",
            header = self.header(),
            first_rel = self.entity_selector(first, "="),
            second_rel = self.entity_selector(second, "="),
        )
    }

    /// Ways of the relation not shared with any sibling relation.
    fn single_ways_query(&self, reference: &str) -> String {
        format!(
            "{header}{own}->.first;\n{others}->.others;\n\
             (.first;>;)->.a1;\n(.others;>;)->.a2;\n\
             (way.a1; - way.a2;)->.a3;\n\
             way.a3;\n(._;>;);\nout meta;",
            header = self.header(),
            own = self.entity_selector(reference, "="),
            others = self.entity_selector(reference, "!="),
        )
    }

    /// Ways and relations referencing any node of the way.
    fn sharing_query(&self, way_id: i64) -> String {
        format!(
            "[out:json][timeout:{}];\nway({way_id});\n>;\n<;\nout meta;",
            self.config.timeout.as_secs()
        )
    }

    /// The map relation carrying the reference, with members and nodes.
    fn boundary_query(&self, reference: &str) -> String {
        format!(
            "{header}relation(area.country)[\"admin_level\"={}][\"{}\"=\"{}\"];\n(._;>;);\nout meta;",
            self.config.admin_level,
            escape(&self.config.reference_key),
            escape(reference),
            header = self.header(),
        )
    }

    fn query_url(&self, query: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("data", query);
        url
    }

    fn run(&self, query: &str) -> Result<ElementSet, ServiceError> {
        debug!("overpass query:\n{query}");
        let url = self.query_url(query);
        let endpoint = self.endpoint.as_str();
        let body = self.transport.block_on(
            self.transport
                .send_text(self.transport.client().get(url), endpoint),
        )?;
        convert_response(&body, endpoint)
    }
}

/// Decode an Overpass response body.
fn convert_response(body: &str, endpoint: &str) -> Result<ElementSet, ServiceError> {
    let response: ElementsResponse = decode_json(body, endpoint)?;
    if let Some(remark) = response.runtime_error() {
        return Err(ServiceError::MalformedResponse {
            url: endpoint.to_owned(),
            message: remark.to_owned(),
        });
    }
    Ok(response.into_element_set())
}

/// Escape a value for use inside a double-quoted Overpass QL string.
fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl GeoQueryService for OverpassClient {
    fn shared_ways(
        &self,
        first: &AdminEntity,
        second: &AdminEntity,
    ) -> Result<ElementSet, ServiceError> {
        self.run(&self.shared_ways_query(&first.reference, &second.reference))
    }

    fn single_ways(&self, entity: &AdminEntity) -> Result<ElementSet, ServiceError> {
        self.run(&self.single_ways_query(&entity.reference))
    }

    fn entities_sharing_nodes(&self, way_id: i64) -> Result<ElementSet, ServiceError> {
        self.run(&self.sharing_query(way_id))
    }

    fn entity_boundary(&self, reference: &str) -> Result<ElementSet, ServiceError> {
        self.run(&self.boundary_query(reference))
    }
}
