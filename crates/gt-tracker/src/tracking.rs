use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gt_core::types::{LocationSample, SessionConfig, SessionState};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::{
    Collaborators, PositionError, PositionSource, PresenceError, PresenceIndicator,
};
use crate::dispatcher::{Delivery, DispatchError, ReportDispatcher};
use crate::signal::CancelSignal;

// ---------------------------------------------------------------------------
// Tick results
// ---------------------------------------------------------------------------

/// What happened on one tick. Every variant consumes a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Delivered(Delivery),
    PositionUnavailable(PositionError),
    DeliveryFailed(DispatchError),
    /// The tick did not finish within the session's tick timeout.
    TimedOut,
}

impl TickOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, TickOutcome::Delivered(_))
    }
}

/// Published on the controller's tick channel after every completed tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub session_id: Uuid,
    pub sequence: u64,
    pub outcome: TickOutcome,
    pub at: DateTime<Utc>,
}

/// Why [`TrackingLoop::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    /// The host withdrew permission for the presence indicator mid-session.
    PresenceRevoked(PresenceError),
}

// ---------------------------------------------------------------------------
// SessionStats
// ---------------------------------------------------------------------------

/// Lock-free counters for one session.
#[derive(Debug)]
pub struct SessionStats {
    ticks: AtomicU64,
    delivered: AtomicU64,
    position_failures: AtomicU64,
    delivery_failures: AtomicU64,
    timeouts: AtomicU64,
    next_sequence: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            position_failures: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            next_sequence: AtomicU64::new(1),
        }
    }

    fn record(&self, outcome: &TickOutcome, next_sequence: u64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            TickOutcome::Delivered(_) => &self.delivered,
            TickOutcome::PositionUnavailable(_) => &self.position_failures,
            TickOutcome::DeliveryFailed(_) => &self.delivery_failures,
            TickOutcome::TimedOut => &self.timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.next_sequence.store(next_sequence, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        session_id: Uuid,
        state: SessionState,
        started_at: DateTime<Utc>,
    ) -> SessionStatus {
        SessionStatus {
            session_id,
            state,
            started_at,
            ticks: self.ticks.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            position_failures: self.position_failures.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            next_sequence: self.next_sequence.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ticks: u64,
    pub delivered: u64,
    pub position_failures: u64,
    pub delivery_failures: u64,
    pub timeouts: u64,
    pub next_sequence: u64,
}

// ---------------------------------------------------------------------------
// TrackingLoop
// ---------------------------------------------------------------------------

struct TickStep {
    outcome: TickOutcome,
    revoked: Option<PresenceError>,
}

/// Fixed-cadence sample-and-dispatch cycle for one session.
///
/// Ticks start every `config.interval`; a tick that overruns delays the next
/// one instead of overlapping it. Per-tick failures are reported as a
/// [`TickOutcome`] and never end the loop. Only cancellation or a revoked
/// presence indicator does.
pub struct TrackingLoop {
    session_id: Uuid,
    config: Arc<SessionConfig>,
    source: Arc<dyn PositionSource>,
    presence: Arc<dyn PresenceIndicator>,
    dispatcher: ReportDispatcher,
    cancel: CancelSignal,
    ticks: broadcast::Sender<TickReport>,
    stats: Arc<SessionStats>,
    presence_gate: Arc<Mutex<()>>,
}

impl TrackingLoop {
    pub fn new(
        session_id: Uuid,
        config: Arc<SessionConfig>,
        collaborators: &Collaborators,
        cancel: CancelSignal,
        ticks: broadcast::Sender<TickReport>,
        stats: Arc<SessionStats>,
        presence_gate: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            session_id,
            config,
            source: collaborators.source.clone(),
            presence: collaborators.presence.clone(),
            dispatcher: ReportDispatcher::new(collaborators.transport.clone()),
            cancel,
            ticks,
            stats,
            presence_gate,
        }
    }

    /// Run until cancelled. The first tick fires immediately.
    pub async fn run(self) -> LoopExit {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cancel_rx = self.cancel.subscribe();
        let mut sequence: u64 = 1;

        info!(
            session_id = %self.session_id,
            interval_ms = self.config.interval.as_millis() as u64,
            "tracking loop started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel_rx.recv() => break,
                _ = interval.tick() => {}
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let step = self.run_tick(sequence).await;
            let tick_sequence = sequence;
            sequence += 1;

            // An in-flight tick is never aborted by stop(); its result is dropped.
            if self.cancel.is_cancelled() {
                debug!(
                    session_id = %self.session_id,
                    sequence = tick_sequence,
                    "tick finished after stop, result discarded"
                );
                break;
            }

            self.stats.record(&step.outcome, sequence);
            let _ = self.ticks.send(TickReport {
                session_id: self.session_id,
                sequence: tick_sequence,
                outcome: step.outcome,
                at: Utc::now(),
            });

            if let Some(err) = step.revoked {
                warn!(session_id = %self.session_id, error = %err, "presence indicator revoked");
                return LoopExit::PresenceRevoked(err);
            }
        }

        info!(session_id = %self.session_id, "tracking loop stopped");
        LoopExit::Cancelled
    }

    async fn run_tick(&self, sequence: u64) -> TickStep {
        match tokio::time::timeout(self.config.tick_timeout, self.tick(sequence)).await {
            Ok(step) => step,
            Err(_) => {
                warn!(
                    session_id = %self.session_id,
                    sequence,
                    timeout_ms = self.config.tick_timeout.as_millis() as u64,
                    "tick timed out"
                );
                TickStep {
                    outcome: TickOutcome::TimedOut,
                    revoked: None,
                }
            }
        }
    }

    async fn tick(&self, sequence: u64) -> TickStep {
        let sample = match self.source.sample(self.config.accuracy).await {
            Ok(s) if s.is_valid() => s,
            Ok(s) => {
                let err = PositionError::Unavailable(format!(
                    "invalid coordinates ({}, {})",
                    s.latitude, s.longitude
                ));
                warn!(session_id = %self.session_id, sequence, error = %err, "sample rejected");
                return TickStep {
                    outcome: TickOutcome::PositionUnavailable(err),
                    revoked: None,
                };
            }
            Err(err) => {
                warn!(session_id = %self.session_id, sequence, error = %err, "sample failed");
                return TickStep {
                    outcome: TickOutcome::PositionUnavailable(err),
                    revoked: None,
                };
            }
        };

        let outcome = match self.dispatcher.send(&sample, sequence, &self.config).await {
            Ok(delivery) => TickOutcome::Delivered(delivery),
            Err(err) => TickOutcome::DeliveryFailed(err),
        };

        let revoked = self.refresh_presence(&sample).await;
        TickStep { outcome, revoked }
    }

    /// Show the latest fix on the indicator. Only a permission denial is
    /// handed back; other failures are logged.
    ///
    /// Runs under the presence gate, which stop() takes after cancelling and
    /// before releasing, so no update can follow the release.
    async fn refresh_presence(&self, sample: &LocationSample) -> Option<PresenceError> {
        let _gate = self.presence_gate.lock().await;
        if self.cancel.is_cancelled() {
            return None;
        }
        let description = format!(
            "Last position {:.5}, {:.5} at {}",
            sample.latitude,
            sample.longitude,
            sample.captured_at.format("%H:%M:%S")
        );
        match self
            .presence
            .update(&self.config.presence.title, &description)
            .await
        {
            Ok(()) => None,
            Err(err @ PresenceError::PermissionDenied(_)) => Some(err),
            Err(err) => {
                debug!(session_id = %self.session_id, error = %err, "presence update failed");
                None
            }
        }
    }
}
