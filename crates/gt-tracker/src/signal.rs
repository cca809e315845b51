use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// CancelSignal — per-session cancellation
// ---------------------------------------------------------------------------

/// Latched cancellation token for one tracking session.
///
/// The loop checks [`is_cancelled`](Self::is_cancelled) before every
/// scheduling decision and `select!`s on [`subscribe`](Self::subscribe)
/// while waiting for the next tick. Once cancelled it stays cancelled.
///
/// ```ignore
/// let cancel = CancelSignal::new();
/// let mut rx = cancel.subscribe();
///
/// tokio::select! {
///     _ = rx.recv() => { /* stop scheduling */ }
///     _ = interval.tick() => {}
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CancelSignal {
    trigger: broadcast::Sender<()>,
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(1);
        Self {
            trigger,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.trigger.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the signal has been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.subscribe();
        if self.is_cancelled() {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Cancel. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("session cancellation triggered");
            let _ = self.trigger.send(());
            true
        } else {
            false
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// StopSignal — external stop command channel
// ---------------------------------------------------------------------------

/// Payload-less stop command coming from the hosting application.
///
/// Unlike [`CancelSignal`] this is not latched: it can fire any number of
/// times over the controller's lifetime, and each receipt asks the
/// controller to stop whatever session is active at that moment.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: broadcast::Sender<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Deliver a stop command to every listener. Returns the number of
    /// listeners that received it.
    pub fn trigger(&self) -> usize {
        let delivered = self.tx.send(()).unwrap_or(0);
        info!(listeners = delivered, "stop signal sent");
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_signal_is_not_cancelled() {
        assert!(!CancelSignal::new().is_cancelled());
    }

    #[test]
    fn cancel_is_latched_and_idempotent() {
        let signal = CancelSignal::new();
        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(signal.is_cancelled());
    }

    #[test]
    fn clone_shares_state() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        signal.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn subscriber_receives_cancel() {
        let signal = CancelSignal::new();
        let mut rx = signal.subscribe();
        signal.cancel();
        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancelled_resolves_before_and_after_cancel() {
        let signal = CancelSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::task::yield_now().await;
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter woke")
            .expect("waiter task");

        // Already latched: returns immediately.
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("latched signal resolves");
    }

    #[test]
    fn stop_signal_without_listeners_delivers_nothing() {
        let stop = StopSignal::new();
        assert_eq!(stop.trigger(), 0);
    }

    #[tokio::test]
    async fn stop_signal_fires_repeatedly() {
        let stop = StopSignal::new();
        let mut rx = stop.subscribe();
        assert_eq!(stop.listener_count(), 1);
        assert_eq!(stop.trigger(), 1);
        assert_eq!(stop.trigger(), 1);
        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_ok());
    }
}
