//! Narrow interfaces to the platform pieces the tracker does not own.
//!
//! The embedding application hands concrete implementations to
//! [`ServiceController::new`](crate::controller::ServiceController::new):
//!
//! - [`PositionSource`] yields the current device coordinates.
//! - [`Transport`] performs one authenticated HTTP submission.
//! - [`PresenceIndicator`] posts the persistent status indicator the host
//!   platform requires for continued background execution.
//!
//! Every method may suspend. None of them are retried by the tracker.

use std::sync::Arc;

use async_trait::async_trait;
use gt_core::types::{AccuracyTier, LocationSample};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The position source could not produce a fix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    /// No fix could be obtained (permission revoked, no signal, ...).
    #[error("position unavailable: {0}")]
    Unavailable(String),
}

/// Connectivity-level failure; no HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
}

/// Errors raised by the presence indicator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// The host refused persistent background execution. Fatal to the session.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other platform failure while posting or updating the indicator.
    #[error("presence indicator error: {0}")]
    Platform(String),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A fully-formed HTTP POST handed to the [`Transport`].
#[derive(Clone, PartialEq, Eq)]
pub struct Submission {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Submission {
    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case("authorization") {
                    (k.as_str(), "[redacted]")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("Submission")
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body", &self.body)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Produce one reading at the requested accuracy. May suspend while
    /// acquiring a fix.
    async fn sample(&self, accuracy: AccuracyTier) -> Result<LocationSample, PositionError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform exactly one request. Non-2xx responses are returned as `Ok`;
    /// classifying them is the caller's job.
    async fn submit(&self, submission: &Submission) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
pub trait PresenceIndicator: Send + Sync {
    async fn engage(&self, title: &str, description: &str) -> Result<(), PresenceError>;

    /// Refresh the indicator text while engaged.
    async fn update(&self, title: &str, description: &str) -> Result<(), PresenceError>;

    async fn release(&self) -> Result<(), PresenceError>;
}

/// The set of collaborators a [`ServiceController`](crate::controller::ServiceController)
/// is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn PositionSource>,
    pub transport: Arc<dyn Transport>,
    pub presence: Arc<dyn PresenceIndicator>,
}

impl Collaborators {
    pub fn new(
        source: Arc<dyn PositionSource>,
        transport: Arc<dyn Transport>,
        presence: Arc<dyn PresenceIndicator>,
    ) -> Self {
        Self {
            source,
            transport,
            presence,
        }
    }
}
