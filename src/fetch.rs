//! Catalog and chart fetchers.
//!
//! Each fetcher performs exactly one call through an injected
//! [`HttpTransport`] and hands back the raw body text. Decoding is left to the
//! caller. There are no retries and no timeout override; whatever the
//! transport does by default applies.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::debug;

use crate::Config;

// ---

/// Any outcome of a call that did not produce a success body.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
}

/// "Send a request, get the body text or a transport failure."
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// `GET url` with `Authorization: Bearer <bearer>`.
    async fn get(&self, url: &str, bearer: &str) -> Result<String, TransportError>;

    /// `POST url` with a JSON `body` and `Authorization: Bearer <bearer>`.
    async fn post_json(&self, url: &str, bearer: &str, body: String)
        -> Result<String, TransportError>;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, bearer: &str) -> Result<String, TransportError> {
        // ---
        let response = self
            .client
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|source| request_error(url, source))?;

        read_body(url, response).await
    }

    async fn post_json(
        &self,
        url: &str,
        bearer: &str,
        body: String,
    ) -> Result<String, TransportError> {
        // ---
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|source| request_error(url, source))?;

        read_body(url, response).await
    }
}

fn request_error(url: &str, source: reqwest::Error) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        source,
    }
}

async fn read_body(url: &str, response: reqwest::Response) -> Result<String, TransportError> {
    // ---
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|source| request_error(url, source))
}

// ---

/// Fetch the raw signal catalog (`GET <signals_url>`).
pub async fn fetch_catalog(
    transport: &dyn HttpTransport,
    config: &Config,
) -> Result<String, TransportError> {
    // ---
    debug!("GET {}", config.signals_url);
    let body = transport.get(&config.signals_url, &config.api_key).await?;
    debug!("Catalog response: {} bytes", body.len());
    Ok(body)
}

/// Fetch raw chart readings (`POST <chart_url>`) for an already serialized
/// chart request.
pub async fn fetch_chart(
    transport: &dyn HttpTransport,
    config: &Config,
    body: String,
) -> Result<String, TransportError> {
    // ---
    debug!("POST {} body: {}", config.chart_url, body);
    let response = transport
        .post_json(&config.chart_url, &config.api_key, body)
        .await?;
    debug!("Chart response: {}", response);
    Ok(response)
}
