//! Blocking bridge over an async `reqwest` client.
//!
//! The service traits in `conflation-core` are synchronous so the processing
//! loop stays a plain sequential loop. [`HttpTransport`] owns a Tokio runtime
//! reused across calls and blocks on it.
//!
//! When called from within an existing multi-threaded Tokio runtime the
//! transport uses that runtime's handle with [`tokio::task::block_in_place`]
//! to avoid nested runtime panics. From a `current_thread` runtime it falls
//! back to its own runtime.

use std::future::Future;
use std::time::Duration;

use conflation_core::ServiceError;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

/// Default user agent for outgoing requests.
pub const DEFAULT_USER_AGENT: &str = concat!("boundary-conflation/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// Errors raised while building an [`HttpTransport`].
#[derive(Debug, Error)]
pub enum TransportBuildError {
    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
    /// Failed to build the Tokio runtime.
    #[error("failed to build Tokio runtime")]
    Runtime(#[source] std::io::Error),
}

/// HTTP client plus the runtime used to drive it.
pub struct HttpTransport {
    client: Client,
    runtime: Runtime,
    timeout: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("client", &self.client)
            .field("runtime", &"<tokio::runtime::Runtime>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpTransport {
    /// Build a transport with the given user agent and request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or Tokio runtime fails to build.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportBuildError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(TransportBuildError::HttpClient)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransportBuildError::Runtime)?;
        Ok(Self {
            client,
            runtime,
            timeout,
        })
    }

    /// Underlying HTTP client.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Drive `future` to completion from synchronous code.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(future))
            }
            _ => self.runtime.block_on(future),
        }
    }

    /// Send `request` and return the body of a successful response.
    ///
    /// Non-success statuses become [`ServiceError::Http`] carrying the
    /// response body, which is where OSM services explain the failure.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] for transport failures and error statuses.
    pub async fn send_text(&self, request: RequestBuilder, url: &str) -> Result<String, ServiceError> {
        let response = request
            .send()
            .await
            .map_err(|err| self.convert_error(&err, url))?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .ok()
                .filter(|body| !body.trim().is_empty())
                .unwrap_or_else(|| status.to_string());
            return Err(ServiceError::Http {
                url: url.to_owned(),
                status: status.as_u16(),
                message: message.trim().to_owned(),
            });
        }
        response
            .text()
            .await
            .map_err(|err| self.convert_error(&err, url))
    }

    /// Convert a `reqwest` error into a [`ServiceError`].
    #[must_use]
    pub fn convert_error(&self, error: &reqwest::Error, url: &str) -> ServiceError {
        if error.is_timeout() {
            return ServiceError::Timeout {
                url: url.to_owned(),
                timeout_secs: self.timeout.as_secs(),
            };
        }

        if let Some(status) = error.status() {
            return ServiceError::Http {
                url: url.to_owned(),
                status: status.as_u16(),
                message: error.to_string(),
            };
        }

        if error.is_decode() {
            return ServiceError::MalformedResponse {
                url: url.to_owned(),
                message: error.to_string(),
            };
        }

        ServiceError::Connection {
            url: url.to_owned(),
            message: error.to_string(),
        }
    }
}

/// Decode a JSON body, mapping failures to [`ServiceError::MalformedResponse`].
///
/// # Errors
///
/// Returns [`ServiceError::MalformedResponse`] when `body` does not decode.
pub fn decode_json<T: DeserializeOwned>(body: &str, url: &str) -> Result<T, ServiceError> {
    serde_json::from_str(body).map_err(|err| ServiceError::MalformedResponse {
        url: url.to_owned(),
        message: err.to_string(),
    })
}
