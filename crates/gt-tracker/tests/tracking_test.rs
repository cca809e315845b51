//! Tick cadence and per-tick failure containment.

use std::sync::Arc;
use std::time::Duration;

use gt_core::types::{SessionConfig, SessionState};
use gt_tracker::collaborators::PositionError;
use gt_tracker::dispatcher::FailureKind;
use gt_tracker::testing::{CountingPresence, RecordingTransport, ScriptedSource};
use gt_tracker::tracking::{TickOutcome, TickReport};
use gt_tracker::{Collaborators, ServiceController};
use tokio::sync::broadcast;
use tokio::time::Instant;

fn controller(
    source: &Arc<ScriptedSource>,
    transport: &Arc<RecordingTransport>,
) -> ServiceController {
    ServiceController::new(Collaborators::new(
        source.clone(),
        transport.clone(),
        Arc::new(CountingPresence::new()),
    ))
}

fn config() -> SessionConfig {
    SessionConfig::new("driver-1", "order-1", "tok", "http://collector.test/location")
}

async fn next_tick(rx: &mut broadcast::Receiver<TickReport>) -> TickReport {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("tick within a minute")
        .expect("tick channel open")
}

fn drain(rx: &mut broadcast::Receiver<TickReport>) -> Vec<TickReport> {
    let mut out = Vec::new();
    while let Ok(report) = rx.try_recv() {
        out.push(report);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn twelve_seconds_at_five_second_interval() {
    let source = Arc::new(ScriptedSource::new(40.0, -74.0));
    let transport = Arc::new(RecordingTransport::new());
    let controller = controller(&source, &transport);
    let mut ticks = controller.subscribe_ticks();

    controller.start(config()).await.expect("start");
    tokio::time::sleep(Duration::from_secs(12)).await;

    let reports = drain(&mut ticks);
    assert!(
        (2..=3).contains(&reports.len()),
        "expected 2 or 3 ticks, got {}",
        reports.len()
    );
    assert!(reports.iter().all(|r| r.outcome.is_delivered()));
    assert_eq!(transport.submissions().len(), reports.len());
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn position_failure_on_tick_two_is_contained() {
    let source = Arc::new(ScriptedSource::new(40.0, -74.0).fail_on(&[2]));
    let transport = Arc::new(RecordingTransport::new());
    let controller = controller(&source, &transport);
    let mut ticks = controller.subscribe_ticks();

    let started = Instant::now();
    controller.start(config()).await.expect("start");
    let first = next_tick(&mut ticks).await;
    let second = next_tick(&mut ticks).await;
    let third = next_tick(&mut ticks).await;

    // The failed tick does not shift the cadence.
    let offsets: Vec<Duration> = source
        .sampled_at()
        .iter()
        .map(|at| at.duration_since(started))
        .collect();
    assert_eq!(
        &offsets[..3],
        &[Duration::ZERO, Duration::from_secs(5), Duration::from_secs(10)]
    );

    assert_eq!(first.sequence, 1);
    assert!(matches!(first.outcome, TickOutcome::Delivered(d) if d.sequence == 1));
    assert_eq!(second.sequence, 2);
    assert!(matches!(
        second.outcome,
        TickOutcome::PositionUnavailable(PositionError::Unavailable(_))
    ));
    assert_eq!(third.sequence, 3);
    assert!(matches!(third.outcome, TickOutcome::Delivered(d) if d.sequence == 3));

    // No request for tick 2.
    assert_eq!(transport.submissions().len(), 2);
    assert_eq!(controller.state(), SessionState::Running);

    let status = controller.status().await.expect("active");
    assert_eq!(status.position_failures, 1);
    assert_eq!(status.delivered, 2);
    assert_eq!(status.next_sequence, 4);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_delivery_is_not_retried() {
    let source = Arc::new(ScriptedSource::new(1.0, 1.0));
    let transport = Arc::new(RecordingTransport::with_status(500));
    let controller = controller(&source, &transport);
    let mut ticks = controller.subscribe_ticks();

    controller.start(config()).await.expect("start");
    for expected in 1..=3 {
        let report = next_tick(&mut ticks).await;
        assert_eq!(report.sequence, expected);
        match report.outcome {
            TickOutcome::DeliveryFailed(err) => assert_eq!(err.kind(), FailureKind::DeliveryFailed),
            other => panic!("expected DeliveryFailed, got {other:?}"),
        }
    }
    // One submission per tick, never more.
    assert_eq!(transport.submissions().len(), 3);
    assert!(controller.is_running());
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn network_errors_do_not_stop_the_loop() {
    let source = Arc::new(ScriptedSource::new(1.0, 1.0));
    let transport = Arc::new(RecordingTransport::failing("connection reset"));
    let controller = controller(&source, &transport);
    let mut ticks = controller.subscribe_ticks();

    controller.start(config()).await.expect("start");
    for expected in 1..=3 {
        let report = next_tick(&mut ticks).await;
        assert_eq!(report.sequence, expected);
        assert!(matches!(
            report.outcome,
            TickOutcome::DeliveryFailed(ref e) if e.kind() == FailureKind::NetworkError
        ));
    }
    assert!(controller.is_running());
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn slow_ticks_never_overlap() {
    let source = Arc::new(ScriptedSource::new(1.0, 1.0));
    let transport = Arc::new(RecordingTransport::new());
    transport.set_delay(Duration::from_secs(7));
    let controller = controller(&source, &transport);
    let mut ticks = controller.subscribe_ticks();

    let cfg = config().with_tick_timeout(Duration::from_secs(20));
    controller.start(cfg).await.expect("start");
    for expected in 1..=4 {
        let report = next_tick(&mut ticks).await;
        assert_eq!(report.sequence, expected);
        assert!(report.outcome.is_delivered());
    }
    assert_eq!(transport.max_in_flight(), 1);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stuck_tick_times_out_and_loop_continues() {
    let source = Arc::new(ScriptedSource::new(1.0, 1.0));
    source.set_delay(Duration::from_secs(30));
    let transport = Arc::new(RecordingTransport::new());
    let controller = controller(&source, &transport);
    let mut ticks = controller.subscribe_ticks();

    controller.start(config()).await.expect("start");
    let first = next_tick(&mut ticks).await;
    let second = next_tick(&mut ticks).await;
    assert_eq!((first.sequence, &first.outcome), (1, &TickOutcome::TimedOut));
    assert_eq!((second.sequence, &second.outcome), (2, &TickOutcome::TimedOut));

    // Once the source recovers, ticks deliver again with the counter intact.
    source.set_delay(Duration::ZERO);
    let mut report = next_tick(&mut ticks).await;
    while report.outcome == TickOutcome::TimedOut {
        report = next_tick(&mut ticks).await;
    }
    assert!(report.outcome.is_delivered());
    assert!(report.sequence >= 3);

    let status = controller.status().await.expect("active");
    assert!(status.timeouts >= 2);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn samples_are_attempted_in_sequence_order() {
    let source = Arc::new(ScriptedSource::new(10.0, 10.0));
    let transport = Arc::new(RecordingTransport::new());
    let controller = controller(&source, &transport);
    let mut ticks = controller.subscribe_ticks();

    controller.start(config()).await.expect("start");
    let mut last = 0;
    for _ in 0..5 {
        let report = next_tick(&mut ticks).await;
        assert_eq!(report.sequence, last + 1);
        last = report.sequence;
    }

    let lats: Vec<f64> = transport
        .latitudes()
        .iter()
        .map(|s| s.parse().expect("numeric latitude"))
        .collect();
    assert_eq!(lats.len(), 5);
    assert!(lats.windows(2).all(|w| w[0] < w[1]));
    controller.stop().await;
}
