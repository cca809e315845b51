use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use gt_core::types::{SessionConfig, SessionState};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::{Collaborators, PresenceError};
use crate::signal::{CancelSignal, StopSignal};
use crate::state::{SessionEvent, SessionStateMachine, TransitionError};
use crate::tracking::{LoopExit, SessionStats, SessionStatus, TickReport, TrackingLoop};

const TICK_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors surfaced to the embedding application.
///
/// Per-tick failures never show up here; they are reported through
/// [`TickReport`]s and logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("a tracking session is already running")]
    AlreadyRunning,

    /// The host refused (or withdrew) persistent background execution.
    #[error("presence indicator permission denied: {0}")]
    PermissionDenied(String),

    #[error("presence indicator failed: {0}")]
    Presence(String),

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    /// `stop()` arrived while the presence indicator was still being engaged.
    #[error("session was stopped before it started")]
    StartCancelled,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<PresenceError> for ControllerError {
    fn from(err: PresenceError) -> Self {
        match err {
            PresenceError::PermissionDenied(msg) => ControllerError::PermissionDenied(msg),
            PresenceError::Platform(msg) => ControllerError::Presence(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct ActiveSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    cancel: CancelSignal,
    stats: Arc<SessionStats>,
    /// `None` while the session is still `Starting`.
    handle: Option<JoinHandle<()>>,
}

struct SessionSlot {
    machine: SessionStateMachine,
    active: Option<ActiveSession>,
    last_error: Option<ControllerError>,
}

struct Inner {
    collaborators: Collaborators,
    slot: Mutex<SessionSlot>,
    state_rx: watch::Receiver<SessionState>,
    ticks: broadcast::Sender<TickReport>,
    /// Held around every presence `update` and the final `release`.
    presence_gate: Arc<Mutex<()>>,
}

impl Inner {
    /// Tear down the active session, optionally only if it is `only`.
    ///
    /// Returns the torn-down session so the caller may abort its task.
    async fn stop_session(
        &self,
        only: Option<Uuid>,
        reason: Option<ControllerError>,
    ) -> Option<ActiveSession> {
        let mut slot = self.slot.lock().await;

        let matches = match (&slot.active, only) {
            (None, _) => false,
            (Some(active), Some(id)) => active.id == id,
            (Some(_), None) => true,
        };
        if !matches {
            debug!("stop requested with no matching active session");
            return None;
        }
        let active = slot.active.take()?;

        advance(&mut slot.machine, SessionEvent::Stop);
        active.cancel.cancel();
        if active.handle.is_none() {
            // start() is still waiting on engage and finishes the teardown.
            info!(session_id = %active.id, "stop requested while starting");
            return Some(active);
        }

        {
            let _gate = self.presence_gate.lock().await;
            if let Err(e) = self.collaborators.presence.release().await {
                warn!(session_id = %active.id, error = %e, "presence release failed");
            }
        }
        advance(&mut slot.machine, SessionEvent::Released);

        let status = active
            .stats
            .snapshot(active.id, slot.machine.state(), active.started_at);
        match reason {
            Some(err) => {
                error!(session_id = %active.id, error = %err, ticks = status.ticks, "tracking session force-stopped");
                slot.last_error = Some(err);
            }
            None => {
                info!(
                    session_id = %active.id,
                    ticks = status.ticks,
                    delivered = status.delivered,
                    "tracking session stopped"
                );
            }
        }
        Some(active)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        let Some(active) = slot.active.take() else {
            return;
        };
        warn!(session_id = %active.id, "controller dropped with an active session");
        active.cancel.cancel();
        if let Some(handle) = active.handle {
            handle.abort();
        }
        advance(&mut slot.machine, SessionEvent::Stop);

        let presence = self.collaborators.presence.clone();
        let session_id = active.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = presence.release().await {
                        warn!(%session_id, error = %e, "presence release failed");
                    }
                });
            }
            Err(_) => {
                error!(%session_id, "no runtime left to release the presence indicator");
            }
        }
        advance(&mut slot.machine, SessionEvent::Released);
    }
}

fn advance(machine: &mut SessionStateMachine, event: SessionEvent) {
    if let Err(e) = machine.transition(event) {
        error!(error = %e, "unexpected session transition");
    }
}

// ---------------------------------------------------------------------------
// ServiceController
// ---------------------------------------------------------------------------

/// Owns the run/stop lifecycle of the tracking session.
///
/// Collaborators are injected at construction; the platform's background
/// entry point only has to call [`start`](Self::start). Clones share the same
/// session.
///
/// ```ignore
/// let controller = ServiceController::new(Collaborators::new(source, transport, presence));
/// let stop = StopSignal::new();
/// controller.spawn_stop_listener(&stop);
/// controller.start(config).await?;
/// // ... later, from the UI:
/// stop.trigger();
/// ```
#[derive(Clone)]
pub struct ServiceController {
    inner: Arc<Inner>,
}

impl ServiceController {
    pub fn new(collaborators: Collaborators) -> Self {
        let machine = SessionStateMachine::new();
        let state_rx = machine.subscribe();
        let (ticks, _) = broadcast::channel(TICK_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                collaborators,
                slot: Mutex::new(SessionSlot {
                    machine,
                    active: None,
                    last_error: None,
                }),
                state_rx,
                ticks,
                presence_gate: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Start a session bound to `config`.
    ///
    /// Fails with [`ControllerError::AlreadyRunning`] if a session is active,
    /// leaving it untouched. If the presence indicator cannot be engaged the
    /// session never runs and the state returns to `Stopped`. A `stop()` while
    /// the indicator is being engaged abandons the start with
    /// [`ControllerError::StartCancelled`].
    pub async fn start(&self, config: SessionConfig) -> Result<Uuid, ControllerError> {
        config.validate().map_err(ControllerError::InvalidConfig)?;

        let id = Uuid::new_v4();
        let cancel = CancelSignal::new();
        let stats = Arc::new(SessionStats::new());
        {
            let mut slot = self.inner.slot.lock().await;
            if slot.machine.state() != SessionState::Stopped {
                warn!(state = %slot.machine.state(), "start rejected, session already active");
                return Err(ControllerError::AlreadyRunning);
            }
            slot.machine.transition(SessionEvent::Start)?;
            slot.active = Some(ActiveSession {
                id,
                started_at: Utc::now(),
                cancel: cancel.clone(),
                stats: stats.clone(),
                handle: None,
            });
        }

        // The slot is unlocked here so that stop() can land while the host decides.
        let presence = &self.inner.collaborators.presence;
        let engaged = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = presence.engage(&config.presence.title, &config.presence.description) => Some(result),
        };

        let mut slot = self.inner.slot.lock().await;
        let result = match engaged {
            Some(result) if !cancel.is_cancelled() => result,
            engaged => {
                // stop_session already took the slot and moved to Stopping.
                if !matches!(engaged, Some(Err(_))) {
                    if let Err(e) = presence.release().await {
                        warn!(session_id = %id, error = %e, "presence release failed");
                    }
                }
                advance(&mut slot.machine, SessionEvent::Released);
                info!(session_id = %id, "tracking session stopped before it started");
                return Err(ControllerError::StartCancelled);
            }
        };

        if let Err(e) = result {
            slot.active = None;
            slot.machine.transition(SessionEvent::Denied)?;
            let err = ControllerError::from(e);
            error!(error = %err, "presence indicator refused, session not started");
            slot.last_error = Some(err.clone());
            return Err(err);
        }
        slot.machine.transition(SessionEvent::Engaged)?;

        info!(
            session_id = %id,
            driver_id = %config.driver_id,
            order_id = %config.order_id,
            interval_ms = config.interval.as_millis() as u64,
            "tracking session started"
        );

        let tracking = TrackingLoop::new(
            id,
            Arc::new(config),
            &self.inner.collaborators,
            cancel,
            self.inner.ticks.clone(),
            stats,
            self.inner.presence_gate.clone(),
        );
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            if let LoopExit::PresenceRevoked(err) = tracking.run().await {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .stop_session(Some(id), Some(ControllerError::from(err)))
                        .await;
                }
            }
        });

        if let Some(active) = slot.active.as_mut() {
            active.started_at = Utc::now();
            active.handle = Some(handle);
        }
        slot.last_error = None;
        Ok(id)
    }

    /// Stop the active session. A no-op when already stopped.
    ///
    /// No further ticks are scheduled once this returns. A tick that is
    /// mid-flight is left to finish on its own and its result is discarded.
    /// During `Starting` this only cancels; the pending `start` unwinds the
    /// presence indicator and settles in `Stopped`.
    pub async fn stop(&self) {
        self.inner.stop_session(None, None).await;
    }

    /// Stop and abort any in-flight tick. For use when the host process is
    /// going away.
    pub async fn shutdown(&self) {
        if let Some(handle) = self
            .inner
            .stop_session(None, None)
            .await
            .and_then(|active| active.handle)
        {
            handle.abort();
        }
    }

    /// Subscribe to `stop` for the lifetime of this controller.
    ///
    /// Every signal received stops whatever session is active at that time.
    /// The listener exits when the signal's senders are gone or the controller
    /// has been dropped.
    pub fn spawn_stop_listener(&self, signal: &StopSignal) -> JoinHandle<()> {
        let mut rx = signal.subscribe();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        let Some(inner) = weak.upgrade() else { break };
                        info!("stop signal received");
                        inner.stop_session(None, None).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("stop listener exited");
        })
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_rx.clone()
    }

    /// Receive a [`TickReport`] for every completed tick of every session.
    pub fn subscribe_ticks(&self) -> broadcast::Receiver<TickReport> {
        self.inner.ticks.subscribe()
    }

    /// Counters for the active session, if any.
    pub async fn status(&self) -> Option<SessionStatus> {
        let slot = self.inner.slot.lock().await;
        slot.active
            .as_ref()
            .map(|a| a.stats.snapshot(a.id, slot.machine.state(), a.started_at))
    }

    /// The error that prevented or ended the most recent session, cleared by
    /// the next successful start.
    pub async fn last_error(&self) -> Option<ControllerError> {
        self.inner.slot.lock().await.last_error.clone()
    }
}
