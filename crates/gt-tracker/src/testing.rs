//! Scripted collaborators for exercising the tracker without a platform.
//!
//! All fakes honour tokio's paused clock, so timing tests can run under
//! `#[tokio::test(start_paused = true)]`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use gt_core::types::{AccuracyTier, LocationSample};
use tokio::time::Instant;

use crate::collaborators::{
    PositionError, PositionSource, PresenceError, PresenceIndicator, Submission, Transport,
    TransportError, TransportResponse,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// Returns a slowly drifting fix, failing on selected call numbers (1-based).
#[derive(Debug)]
pub struct ScriptedSource {
    origin: (f64, f64),
    fail_on: Mutex<HashSet<u64>>,
    delay: Mutex<Duration>,
    calls: AtomicU64,
    sampled_at: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            origin: (latitude, longitude),
            fail_on: Mutex::new(HashSet::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicU64::new(0),
            sampled_at: Mutex::new(Vec::new()),
        }
    }

    /// Fail the given calls with `PositionUnavailable`.
    pub fn fail_on(self, calls: &[u64]) -> Self {
        lock(&self.fail_on).extend(calls.iter().copied());
        self
    }

    /// Suspend for `delay` before answering each call.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// When each call arrived, in call order.
    pub fn sampled_at(&self) -> Vec<Instant> {
        lock(&self.sampled_at).clone()
    }
}

#[async_trait]
impl PositionSource for ScriptedSource {
    async fn sample(&self, accuracy: AccuracyTier) -> Result<LocationSample, PositionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.sampled_at).push(Instant::now());
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.fail_on).contains(&call) {
            return Err(PositionError::Unavailable(format!("no fix on call {call}")));
        }
        let step = call as f64 * 0.0001;
        Ok(LocationSample::new(
            self.origin.0 + step,
            self.origin.1 + step,
            accuracy,
        ))
    }
}

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

/// Records every submission and answers with a fixed status or error.
#[derive(Debug)]
pub struct RecordingTransport {
    submissions: Mutex<Vec<Submission>>,
    status: AtomicU16,
    failure: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            status: AtomicU16::new(status),
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicU64::new(0),
            max_in_flight: AtomicU64::new(0),
        }
    }

    /// Every submission fails with `TransportError::Network(message)`.
    pub fn failing(message: &str) -> Self {
        let t = Self::new();
        *lock(&t.failure) = Some(message.to_string());
        t
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Highest number of submissions that were ever in progress at once.
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        lock(&self.submissions).clone()
    }

    /// Values of the `lat` form field, in submission order.
    pub fn latitudes(&self) -> Vec<String> {
        lock(&self.submissions)
            .iter()
            .filter_map(|s| {
                s.body
                    .split('&')
                    .find_map(|kv| kv.strip_prefix("lat=").map(str::to_string))
            })
            .collect()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn submit(&self, submission: &Submission) -> Result<TransportResponse, TransportError> {
        lock(&self.submissions).push(submission.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(msg) = lock(&self.failure).clone() {
            return Err(TransportError::Network(msg));
        }
        Ok(TransportResponse::new(self.status.load(Ordering::SeqCst), ""))
    }
}

// ---------------------------------------------------------------------------
// CountingPresence
// ---------------------------------------------------------------------------

/// Counts engage/update/release calls and can be told to refuse permission.
#[derive(Debug, Default)]
pub struct CountingPresence {
    engaged: AtomicBool,
    deny_engage: AtomicBool,
    deny_update: AtomicBool,
    engage_delay: Mutex<Duration>,
    engages: AtomicU64,
    updates: AtomicU64,
    releases: AtomicU64,
}

impl CountingPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every `engage` with `PermissionDenied`.
    pub fn denying() -> Self {
        let p = Self::default();
        p.deny_engage.store(true, Ordering::SeqCst);
        p
    }

    pub fn set_deny_engage(&self, deny: bool) {
        self.deny_engage.store(deny, Ordering::SeqCst);
    }

    /// Suspend for `delay` inside `engage`, like a pending permission prompt.
    pub fn set_engage_delay(&self, delay: Duration) {
        *lock(&self.engage_delay) = delay;
    }

    /// Make the next `update` calls fail with `PermissionDenied`.
    pub fn revoke(&self) {
        self.deny_update.store(true, Ordering::SeqCst);
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    pub fn engages(&self) -> u64 {
        self.engages.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresenceIndicator for CountingPresence {
    async fn engage(&self, _title: &str, _description: &str) -> Result<(), PresenceError> {
        let delay = *lock(&self.engage_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.deny_engage.load(Ordering::SeqCst) {
            return Err(PresenceError::PermissionDenied(
                "background execution refused".into(),
            ));
        }
        self.engages.fetch_add(1, Ordering::SeqCst);
        self.engaged.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, _title: &str, _description: &str) -> Result<(), PresenceError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.deny_update.load(Ordering::SeqCst) {
            return Err(PresenceError::PermissionDenied(
                "background execution revoked".into(),
            ));
        }
        Ok(())
    }

    async fn release(&self) -> Result<(), PresenceError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.engaged.store(false, Ordering::SeqCst);
        Ok(())
    }
}
