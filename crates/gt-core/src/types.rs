use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cadence between tick starts when nothing else is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// AccuracyTier
// ---------------------------------------------------------------------------

/// Accuracy level requested from the position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTier {
    Lowest,
    Low,
    Medium,
    #[default]
    High,
    Best,
}

impl fmt::Display for AccuracyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AccuracyTier::Lowest => "lowest",
            AccuracyTier::Low => "low",
            AccuracyTier::Medium => "medium",
            AccuracyTier::High => "high",
            AccuracyTier::Best => "best",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// LocationSample
// ---------------------------------------------------------------------------

/// A single position reading. Never mutated after it is produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
    pub accuracy: AccuracyTier,
}

impl LocationSample {
    /// Build a sample stamped with the current time.
    pub fn new(latitude: f64, longitude: f64, accuracy: AccuracyTier) -> Self {
        Self {
            latitude,
            longitude,
            captured_at: Utc::now(),
            accuracy,
        }
    }

    /// Returns `true` when both coordinates are finite and within WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle state of the tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl SessionState {
    /// The presence indicator must be engaged exactly while this is `true`.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Stopped => "Stopped",
            SessionState::Starting => "Starting",
            SessionState::Running => "Running",
            SessionState::Stopping => "Stopping",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Text shown on the persistent presence indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceText {
    pub title: String,
    pub description: String,
}

impl Default for PresenceText {
    fn default() -> Self {
        Self {
            title: "Location tracking active".into(),
            description: "Sharing your position for the current delivery".into(),
        }
    }
}

/// Everything a single tracking session is bound to.
///
/// Built once per `start` and shared read-only with the loop and the
/// dispatcher for the lifetime of the session.
#[derive(Clone)]
pub struct SessionConfig {
    pub driver_id: String,
    pub order_id: String,
    pub auth_token: String,
    pub endpoint_url: String,
    pub interval: Duration,
    pub tick_timeout: Duration,
    pub accuracy: AccuracyTier,
    pub presence: PresenceText,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("driver_id", &self.driver_id)
            .field("order_id", &self.order_id)
            .field("auth_token", &"[redacted]")
            .field("endpoint_url", &self.endpoint_url)
            .field("interval", &self.interval)
            .field("tick_timeout", &self.tick_timeout)
            .field("accuracy", &self.accuracy)
            .field("presence", &self.presence)
            .finish()
    }
}

impl SessionConfig {
    /// Create a config with the default 5s interval, a tick timeout equal to
    /// the interval and `High` accuracy.
    pub fn new(
        driver_id: impl Into<String>,
        order_id: impl Into<String>,
        auth_token: impl Into<String>,
        endpoint_url: impl Into<String>,
    ) -> Self {
        Self {
            driver_id: driver_id.into(),
            order_id: order_id.into(),
            auth_token: auth_token.into(),
            endpoint_url: endpoint_url.into(),
            interval: DEFAULT_INTERVAL,
            tick_timeout: DEFAULT_INTERVAL,
            accuracy: AccuracyTier::default(),
            presence: PresenceText::default(),
        }
    }

    /// Override the interval. The tick timeout follows it.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self.tick_timeout = interval;
        self
    }

    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = timeout;
        self
    }

    pub fn with_accuracy(mut self, accuracy: AccuracyTier) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_presence(mut self, presence: PresenceText) -> Self {
        self.presence = presence;
        self
    }

    /// Check the fields a session cannot run without.
    ///
    /// Returns the name of the first offending field in the error message.
    pub fn validate(&self) -> Result<(), String> {
        if self.driver_id.trim().is_empty() {
            return Err("driver_id must not be empty".into());
        }
        if self.order_id.trim().is_empty() {
            return Err("order_id must not be empty".into());
        }
        if self.auth_token.trim().is_empty() {
            return Err("auth_token must not be empty".into());
        }
        if !(self.endpoint_url.starts_with("http://") || self.endpoint_url.starts_with("https://"))
        {
            return Err(format!(
                "endpoint_url must be an http(s) URL, got '{}'",
                self.endpoint_url
            ));
        }
        if self.interval.is_zero() {
            return Err("interval must be greater than zero".into());
        }
        if self.tick_timeout.is_zero() {
            return Err("tick_timeout must be greater than zero".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ReportRequest
// ---------------------------------------------------------------------------

/// Wire-level unit posted to the collection endpoint for one sample.
#[derive(Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub latitude: String,
    pub longitude: String,
    pub driver_id: String,
    pub order_id: String,
    pub auth_token: String,
}

impl fmt::Debug for ReportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportRequest")
            .field("latitude", &self.latitude)
            .field("longitude", &self.longitude)
            .field("driver_id", &self.driver_id)
            .field("order_id", &self.order_id)
            .field("auth_token", &"[redacted]")
            .finish()
    }
}

impl ReportRequest {
    pub const CONTENT_TYPE: &'static str = "application/x-www-form-urlencoded";

    pub fn from_sample(sample: &LocationSample, config: &SessionConfig) -> Self {
        Self {
            latitude: sample.latitude.to_string(),
            longitude: sample.longitude.to_string(),
            driver_id: config.driver_id.clone(),
            order_id: config.order_id.clone(),
            auth_token: config.auth_token.clone(),
        }
    }

    /// Form fields in wire order.
    pub fn form_fields(&self) -> [(&'static str, &str); 4] {
        [
            ("lat", self.latitude.as_str()),
            ("long", self.longitude.as_str()),
            ("driver_id", self.driver_id.as_str()),
            ("order_id", self.order_id.as_str()),
        ]
    }

    /// `application/x-www-form-urlencoded` body.
    pub fn form_body(&self) -> String {
        self.form_fields()
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.auth_token),
            ),
            ("Content-Type".to_string(), Self::CONTENT_TYPE.to_string()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new("drv-7", "ord 42&x", "s3cret", "https://collect.example.com/loc")
    }

    #[test]
    fn sample_bounds() {
        assert!(LocationSample::new(52.52, 13.405, AccuracyTier::High).is_valid());
        assert!(!LocationSample::new(91.0, 0.0, AccuracyTier::High).is_valid());
        assert!(!LocationSample::new(0.0, f64::NAN, AccuracyTier::High).is_valid());
    }

    #[test]
    fn form_body_encodes_values_in_wire_order() {
        let sample = LocationSample::new(52.52, -13.405, AccuracyTier::High);
        let req = ReportRequest::from_sample(&sample, &config());
        assert_eq!(
            req.form_body(),
            "lat=52.52&long=-13.405&driver_id=drv-7&order_id=ord%2042%26x"
        );
    }

    #[test]
    fn headers_carry_bearer_token() {
        let sample = LocationSample::new(1.0, 2.0, AccuracyTier::Low);
        let headers = ReportRequest::from_sample(&sample, &config()).headers();
        assert!(headers.contains(&("Authorization".into(), "Bearer s3cret".into())));
        assert!(headers.contains(&(
            "Content-Type".into(),
            "application/x-www-form-urlencoded".into()
        )));
    }

    #[test]
    fn debug_output_redacts_token() {
        let cfg = config();
        assert!(!format!("{cfg:?}").contains("s3cret"));
        let req = ReportRequest::from_sample(&LocationSample::new(0.0, 0.0, AccuracyTier::Best), &cfg);
        assert!(!format!("{req:?}").contains("s3cret"));
    }

    #[test]
    fn interval_override_moves_timeout() {
        let cfg = config().with_interval(Duration::from_secs(2));
        assert_eq!(cfg.interval, Duration::from_secs(2));
        assert_eq!(cfg.tick_timeout, Duration::from_secs(2));
    }

    #[test]
    fn validate_rejects_bad_fields() {
        assert!(config().validate().is_ok());

        let mut cfg = config();
        cfg.driver_id = " ".into();
        assert!(cfg.validate().unwrap_err().contains("driver_id"));

        let cfg = SessionConfig::new("d", "o", "t", "ftp://nope");
        assert!(cfg.validate().unwrap_err().contains("endpoint_url"));

        let cfg = config().with_interval(Duration::ZERO);
        assert!(cfg.validate().unwrap_err().contains("interval"));
    }

    #[test]
    fn only_starting_and_running_are_active() {
        assert!(SessionState::Starting.is_active());
        assert!(SessionState::Running.is_active());
        assert!(!SessionState::Stopping.is_active());
        assert!(!SessionState::Stopped.is_active());
    }
}
