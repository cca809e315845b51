//! geotrack daemon — runs one tracking session headlessly until Ctrl-C.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gt_core::config::Config;
use gt_core::types::SessionState;
use gt_telemetry::logging::{self, LogFormat};
use gt_tracker::http_transport::HttpTransport;
use gt_tracker::presence::LogPresenceIndicator;
use gt_tracker::replay::ReplayPositionSource;
use gt_tracker::{Collaborators, ControllerError, ServiceController, StopSignal};
use tracing::{info, warn};

/// Trigger `stop` on every interrupt until the listener itself fails.
async fn forward_interrupts<F, Fut>(mut interrupted: F, stop: StopSignal)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    loop {
        if let Err(e) = interrupted().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, stopping tracking");
        stop.trigger();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            logging::init_logging("gt-daemon", "info");
            warn!(error = %e, "failed to load config, using defaults");
            Config::default()
        }
    };
    logging::init(
        "gt-daemon",
        &config.general.log_level,
        LogFormat::from_name(&config.general.log_format),
    );
    info!(version = env!("CARGO_PKG_VERSION"), "geotrack daemon starting");

    let session = config
        .session_config()
        .context("incomplete tracking configuration")?;

    if config.replay.waypoints.is_empty() {
        warn!("no replay waypoints configured, every tick will report no position");
    }
    let transport = HttpTransport::with_timeout(Duration::from_secs(
        config.endpoint.request_timeout_secs,
    ))
    .context("failed to build HTTP client")?;

    let controller = ServiceController::new(Collaborators::new(
        Arc::new(ReplayPositionSource::from_pairs(&config.replay.waypoints)),
        Arc::new(transport),
        Arc::new(LogPresenceIndicator::new()),
    ));

    let stop = StopSignal::new();
    let listener = controller.spawn_stop_listener(&stop);

    tokio::spawn(forward_interrupts(tokio::signal::ctrl_c, stop));

    let mut state = controller.subscribe_state();
    let session_id = match controller.start(session).await {
        Ok(id) => id,
        Err(ControllerError::StartCancelled) => {
            listener.abort();
            info!("stopped before tracking began");
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to start tracking session"),
    };
    info!(%session_id, "tracking; press ctrl-c to stop");

    state
        .wait_for(|s| *s == SessionState::Stopped)
        .await
        .context("session state channel closed")?;

    if let Some(err) = controller.last_error().await {
        listener.abort();
        return Err(err).context("tracking session ended abnormally");
    }

    controller.shutdown().await;
    listener.abort();
    info!("geotrack daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn every_interrupt_triggers_a_stop() {
        let (tx, rx) = mpsc::unbounded_channel::<()>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stop = StopSignal::new();
        let mut stops = stop.subscribe();

        let forwarder = tokio::spawn(forward_interrupts(
            move || {
                let rx = rx.clone();
                async move {
                    match rx.lock().await.recv().await {
                        Some(()) => Ok(()),
                        None => Err(std::io::Error::other("closed")),
                    }
                }
            },
            stop,
        ));

        // The first interrupt can land before anything is running; later ones
        // must still be forwarded.
        for _ in 0..3 {
            tx.send(()).unwrap();
            tokio::time::timeout(Duration::from_secs(1), stops.recv())
                .await
                .expect("stop forwarded")
                .expect("stop channel open");
        }

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), forwarder)
            .await
            .expect("forwarder exits once the listener fails")
            .unwrap();
    }
}
