use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::collaborators::{Submission, Transport, TransportError, TransportResponse};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build a client whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("geotrack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { http })
    }

    fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Network(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Network(format!("invalid header value: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, submission: &Submission) -> Result<TransportResponse, TransportError> {
        let headers = Self::header_map(&submission.headers)?;
        let resp = self
            .http
            .post(&submission.url)
            .headers(headers)
            .body(submission.body.clone())
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        debug!(url = %submission.url, status, "submission completed");
        Ok(TransportResponse { status, body })
    }
}
