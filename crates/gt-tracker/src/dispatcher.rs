use std::sync::Arc;

use gt_core::types::{LocationSample, ReportRequest, SessionConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborators::{Submission, Transport, TransportError};

/// Longest response body kept in a [`DispatchError`].
const MAX_BODY_IN_ERROR: usize = 256;

/// A report the endpoint accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub sequence: u64,
    pub status: u16,
}

/// Coarse classification of a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DeliveryFailed,
    NetworkError,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The endpoint answered with a non-2xx status.
    #[error("delivery failed with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    Network(#[from] TransportError),
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::Rejected { .. } => FailureKind::DeliveryFailed,
            DispatchError::Network(_) => FailureKind::NetworkError,
        }
    }
}

/// Turns one sample into one POST. No retries, no queue: a slow transport
/// simply makes the current tick take longer.
#[derive(Clone)]
pub struct ReportDispatcher {
    transport: Arc<dyn Transport>,
}

impl ReportDispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Build the submission for `sample` under `config`.
    pub fn build_submission(sample: &LocationSample, config: &SessionConfig) -> Submission {
        let request = ReportRequest::from_sample(sample, config);
        Submission {
            url: config.endpoint_url.clone(),
            headers: request.headers(),
            body: request.form_body(),
        }
    }

    /// Submit one report. Attempted at most once.
    pub async fn send(
        &self,
        sample: &LocationSample,
        sequence: u64,
        config: &SessionConfig,
    ) -> Result<Delivery, DispatchError> {
        let submission = Self::build_submission(sample, config);

        let response = match self.transport.submit(&submission).await {
            Ok(r) => r,
            Err(e) => {
                warn!(sequence, error = %e, "report not sent");
                return Err(DispatchError::Network(e));
            }
        };

        if response.is_success() {
            debug!(sequence, status = response.status, "report delivered");
            Ok(Delivery {
                sequence,
                status: response.status,
            })
        } else {
            let body = truncate(&response.body, MAX_BODY_IN_ERROR);
            warn!(sequence, status = response.status, body = %body, "report rejected");
            Err(DispatchError::Rejected {
                status: response.status,
                body,
            })
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use gt_core::types::AccuracyTier;

    fn config() -> SessionConfig {
        SessionConfig::new("drv", "ord", "tok", "http://endpoint.test/loc")
    }

    #[tokio::test]
    async fn success_returns_delivery() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = ReportDispatcher::new(transport.clone());
        let sample = LocationSample::new(10.5, 20.25, AccuracyTier::High);

        let delivery = dispatcher.send(&sample, 3, &config()).await.unwrap();
        assert_eq!(delivery, Delivery { sequence: 3, status: 200 });

        let sent = transport.submissions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "http://endpoint.test/loc");
        assert_eq!(sent[0].header("Authorization"), Some("Bearer tok"));
        assert_eq!(sent[0].body, "lat=10.5&long=20.25&driver_id=drv&order_id=ord");
    }

    #[tokio::test]
    async fn non_2xx_is_delivery_failed_without_retry() {
        let transport = Arc::new(RecordingTransport::with_status(503));
        let dispatcher = ReportDispatcher::new(transport.clone());
        let sample = LocationSample::new(0.0, 0.0, AccuracyTier::High);

        let err = dispatcher.send(&sample, 1, &config()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::DeliveryFailed);
        assert!(matches!(err, DispatchError::Rejected { status: 503, .. }));
        assert_eq!(transport.submissions().len(), 1);
    }

    #[tokio::test]
    async fn transport_error_is_network_error() {
        let transport = Arc::new(RecordingTransport::failing("connection refused"));
        let dispatcher = ReportDispatcher::new(transport.clone());
        let sample = LocationSample::new(0.0, 0.0, AccuracyTier::High);

        let err = dispatcher.send(&sample, 1, &config()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NetworkError);
        assert_eq!(transport.submissions().len(), 1);
    }

    #[test]
    fn truncate_keeps_short_bodies() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
