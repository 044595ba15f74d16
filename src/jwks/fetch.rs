//! The JWKS fetch contract and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::Error;

/// Default bound on how long a single JWKS fetch may take.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Transport abstraction for retrieving a JWKS body.
///
/// Implementations must fail with [`Error::NonRetryableFetchError`] on a
/// non-success HTTP status and [`Error::FetchError`] on network errors and
/// timeouts; only the latter is worth retrying on a later verification.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch(&self, jwks_uri: &Url) -> Result<Vec<u8>, Error>;
}

/// reqwest-backed fetcher with a per-request response timeout and optional
/// extra headers.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    response_timeout: Duration,
    headers: Vec<(String, String)>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            headers: Vec::new(),
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JwksFetcher for HttpFetcher {
    async fn fetch(&self, jwks_uri: &Url) -> Result<Vec<u8>, Error> {
        let mut request = self
            .client
            .get(jwks_uri.clone())
            .timeout(self.response_timeout);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                Error::FetchError(format!(
                    "jwks fetch from {jwks_uri} timed out after {:?}",
                    self.response_timeout
                ))
            } else {
                Error::FetchError(format!("jwks fetch from {jwks_uri} failed: {err}"))
            }
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                Error::FetchError(format!(
                    "jwks fetch from {jwks_uri} timed out after {:?}",
                    self.response_timeout
                ))
            } else {
                Error::FetchError(format!("jwks body read from {jwks_uri} failed: {err}"))
            }
        })?;

        if !status.is_success() {
            let body_preview = sanitize_error_body(&body);
            return Err(Error::NonRetryableFetchError(if body_preview.is_empty() {
                format!("jwks fetch failed: status {status} body_len {}", body.len())
            } else {
                format!(
                    "jwks fetch failed: status {status} body_len {} body_preview {body_preview}",
                    body.len()
                )
            }));
        }

        Ok(body.to_vec())
    }
}

fn sanitize_error_body(body: &[u8]) -> String {
    let mut sanitized = String::from_utf8_lossy(body)
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t");
    if sanitized.len() > 256 {
        sanitized.truncate(256);
        sanitized.push_str("...");
    }
    sanitized
}
