//! Integration tests for the acquisition sequencer and its actor.
//!
//! Time is paused, so scan and accumulation delays elapse instantly while keeping
//! their order and length observable through `tokio::time::Instant`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing_test::traced_test;

use spectro_daq::acquisition::{
    AcquisitionActor, AcquisitionHandle, AcquisitionMode, AcquisitionParameters,
    AcquisitionSequencer, AcquisitionState, ModuleLock, Transition,
};
use spectro_daq::config::Settings;
use spectro_daq::error::DaqError;
use spectro_daq::hardware::mock::MockDetector;
use spectro_daq::hardware::Frame;
use spectro_daq::messages::AcquisitionEvent;

fn params(mode: AcquisitionMode, scans: u32, accumulated: u32) -> AcquisitionParameters {
    AcquisitionParameters {
        mode,
        exposure_time: 0.1,
        scan_delay: 2.0 * f64::from(accumulated),
        accumulation_delay: 0.5,
        number_of_scans: scans,
        number_accumulated_scans: accumulated,
    }
}

fn spawn(detector: &Arc<MockDetector>, settings: &Settings) -> (AcquisitionHandle, JoinHandle<()>) {
    AcquisitionActor::spawn(detector.clone(), ModuleLock::new(), settings)
}

async fn until_terminal(
    events: &mut broadcast::Receiver<AcquisitionEvent>,
) -> Vec<AcquisitionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        let done = event.is_terminal();
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_acc_single_scan_collects_group_into_one_aggregate() {
    let frames = (0..4).map(|_| Frame::filled(8, 1, 10.0)).collect();
    let detector = Arc::new(MockDetector::new(8, 1).with_frames(frames));
    let (handle, _task) = spawn(&detector, &Settings::default());

    handle
        .configure(params(AcquisitionMode::AccSingleScan, 1, 4))
        .await
        .unwrap();
    let mut events = handle.subscribe();
    handle.start_acquisition().await.unwrap();
    let seen = until_terminal(&mut events).await;

    assert_eq!(detector.readout_count(), 4);
    let data = handle.get_acquired_data().await.unwrap();
    assert_eq!(data.len(), 1);
    assert!(data[0].data.iter().all(|&v| (v - 10.0).abs() < 1e-12));
    assert!(!handle.is_locked());

    let collected: Vec<u64> = seen
        .iter()
        .filter_map(|e| match e {
            AcquisitionEvent::FrameCollected { remaining, .. } => Some(*remaining),
            _ => None,
        })
        .collect();
    assert_eq!(collected, vec![3, 2, 1, 0]);
    assert!(matches!(
        seen[0],
        AcquisitionEvent::Started {
            total_collections: 4,
            ..
        }
    ));
    assert!(seen
        .iter()
        .any(|e| matches!(e, AcquisitionEvent::AccumulationFiltered { group: 1, .. })));
    assert!(matches!(
        seen.last(),
        Some(AcquisitionEvent::Completed { frames: 1, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_acc_multi_scan_filters_out_a_cosmic_hit() {
    // Frame 1 carries a small hit on pixel 2; squared-deviation rejection masks it.
    let mut frames: Vec<Frame> = (0..6).map(|_| Frame::filled(4, 1, 100.0)).collect();
    frames[1].data[2] = 101.0;
    let detector = Arc::new(MockDetector::new(4, 1).with_frames(frames));
    let (handle, _task) = spawn(&detector, &Settings::default());

    handle
        .configure(params(AcquisitionMode::AccMultiScan, 2, 3))
        .await
        .unwrap();
    let mut events = handle.subscribe();
    handle.start_acquisition().await.unwrap();
    let seen = until_terminal(&mut events).await;

    let data = handle.get_acquired_data().await.unwrap();
    assert_eq!(data.len(), 2);
    assert!((data[0].data[2] - 100.0).abs() < 1e-9);
    let rejected: Vec<usize> = seen
        .iter()
        .filter_map(|e| match e {
            AcquisitionEvent::AccumulationFiltered { rejected, .. } => Some(*rejected),
            _ => None,
        })
        .collect();
    assert_eq!(rejected, vec![1, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_multi_scan_waits_for_ready_detector() {
    let detector = Arc::new(MockDetector::new(16, 1).with_polls_until_ready(2));
    let (handle, _task) = spawn(&detector, &Settings::default());

    handle
        .configure(params(AcquisitionMode::MultiScan, 3, 1))
        .await
        .unwrap();
    let mut events = handle.subscribe();
    handle.start_acquisition().await.unwrap();
    until_terminal(&mut events).await;

    assert_eq!(detector.start_count(), 3);
    assert_eq!(detector.readout_count(), 3);
    assert_eq!(handle.get_acquired_data().await.unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_delays_follow_accumulation_structure() {
    let detector = Arc::new(MockDetector::new(8, 1));
    let (handle, _task) = spawn(&detector, &Settings::default());

    // 2 scans of 2 frames: acc, scan, acc, scan
    let parameters = AcquisitionParameters {
        mode: AcquisitionMode::AccMultiScan,
        exposure_time: 0.1,
        scan_delay: 2.0,
        accumulation_delay: 0.5,
        number_of_scans: 2,
        number_accumulated_scans: 2,
    };
    handle.configure(parameters).await.unwrap();
    let mut events = handle.subscribe();

    let started = Instant::now();
    handle.start_acquisition().await.unwrap();
    until_terminal(&mut events).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(5390), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(5500), "{elapsed:?}");
    assert_eq!(handle.get_acquired_data().await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected_while_running() {
    let detector = Arc::new(MockDetector::new(8, 1));
    let (handle, _task) = spawn(&detector, &Settings::default());
    handle
        .configure(params(AcquisitionMode::MultiScan, 100, 1))
        .await
        .unwrap();

    handle.start_acquisition().await.unwrap();
    let status = handle.status().await.unwrap();
    assert!(status.locked);
    assert_eq!(status.loop_counter, 100);

    assert!(matches!(
        handle.start_acquisition().await,
        Err(DaqError::Busy(_))
    ));
    assert!(matches!(
        handle
            .configure(params(AcquisitionMode::SingleScan, 1, 1))
            .await,
        Err(DaqError::Configuration(_))
    ));
    // the running session is untouched
    assert_eq!(handle.status().await.unwrap().session_id, status.session_id);
    assert_eq!(detector.start_count(), 1);

    handle.stop_acquisition().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let detector = Arc::new(MockDetector::new(8, 1));
    let (handle, _task) = spawn(&detector, &Settings::default());
    handle
        .configure(params(AcquisitionMode::MultiScan, 50, 1))
        .await
        .unwrap();
    let mut events = handle.subscribe();

    handle.start_acquisition().await.unwrap();
    handle.stop_acquisition().await.unwrap();
    handle.stop_acquisition().await.unwrap();

    let seen = until_terminal(&mut events).await;
    assert!(matches!(seen.last(), Some(AcquisitionEvent::Stopped { .. })));
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, AcquisitionState::Idle);
    assert!(!status.locked);
    assert!(!detector.is_acquiring());

    // a new session can start right away
    handle.start_acquisition().await.unwrap();
    handle.stop_acquisition().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_invalid_parameters_are_rejected() {
    let detector = Arc::new(MockDetector::new(8, 1));
    let (handle, _task) = spawn(&detector, &Settings::default());

    let mut bad = params(AcquisitionMode::MultiScan, 3, 2);
    bad.accumulation_delay = 0.05;
    assert!(matches!(
        handle.configure(bad).await,
        Err(DaqError::Configuration(_))
    ));

    let mut bad = params(AcquisitionMode::AccMultiScan, 3, 4);
    bad.scan_delay = 1.0;
    assert!(matches!(
        handle.configure(bad).await,
        Err(DaqError::Configuration(_))
    ));

    let mut bad = params(AcquisitionMode::MultiScan, 0, 2);
    bad.number_of_scans = 0;
    assert!(matches!(
        handle.configure(bad).await,
        Err(DaqError::Configuration(_))
    ));
    assert!(!handle.is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_huge_delays_do_not_kill_the_actor() {
    let detector = Arc::new(MockDetector::new(8, 1));
    let (handle, _task) = spawn(&detector, &Settings::default());

    let mut huge = params(AcquisitionMode::MultiScan, 2, 1);
    huge.accumulation_delay = 1.0;
    huge.scan_delay = 1e20;
    assert!(matches!(
        handle.configure(huge).await,
        Err(DaqError::Configuration(_))
    ));

    // fits a Duration but not the clock
    huge.scan_delay = 1e19;
    handle.configure(huge).await.unwrap();
    handle.start_acquisition().await.unwrap();
    assert!(handle.status().await.is_ok());
    handle.stop_acquisition().await.unwrap();

    handle
        .configure(params(AcquisitionMode::MultiScan, 1, 1))
        .await
        .unwrap();
    let mut events = handle.subscribe();
    handle.start_acquisition().await.unwrap();
    assert!(matches!(
        until_terminal(&mut events).await.last(),
        Some(AcquisitionEvent::Completed { frames: 1, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_live_scan_keeps_latest_frame() {
    let detector = Arc::new(MockDetector::new(16, 1));
    let (handle, _task) = spawn(&detector, &Settings::default());
    handle
        .configure(params(AcquisitionMode::LiveScan, 1, 1))
        .await
        .unwrap();
    let mut events = handle.subscribe();
    handle.start_acquisition().await.unwrap();

    let mut live_frames = 0;
    while live_frames < 3 {
        if let AcquisitionEvent::LiveFrame { frame, .. } = events.recv().await.unwrap() {
            assert_eq!(frame.len(), 16);
            live_frames += 1;
        }
    }
    let status = handle.status().await.unwrap();
    assert_eq!(status.loop_counter, 1);
    assert!(status.locked);

    handle.stop_acquisition().await.unwrap();
    assert_eq!(handle.get_acquired_data().await.unwrap().len(), 1);
    assert!(detector.readout_count() >= 3);
    assert!(!handle.is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_readout_failure_aborts_session() {
    let detector = Arc::new(MockDetector::new(8, 1));
    let (handle, _task) = spawn(&detector, &Settings::default());
    handle
        .configure(params(AcquisitionMode::MultiScan, 3, 1))
        .await
        .unwrap();
    let mut events = handle.subscribe();

    detector.set_fail_readout(true);
    handle.start_acquisition().await.unwrap();
    let seen = until_terminal(&mut events).await;

    match seen.last() {
        Some(AcquisitionEvent::Failed { error, .. }) => assert!(error.contains("readout failed")),
        other => panic!("unexpected terminal event: {:?}", other),
    }
    assert!(detector.abort_count() >= 1);
    assert!(!handle.is_locked());
    assert_eq!(handle.status().await.unwrap().state, AcquisitionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_poll_bound_fails_session() {
    let detector = Arc::new(MockDetector::new(8, 1).with_polls_until_ready(100));
    let mut settings = Settings::default();
    settings.acquisition.max_poll_attempts = Some(3);
    let (handle, _task) = spawn(&detector, &settings);
    handle
        .configure(params(AcquisitionMode::SingleScan, 1, 1))
        .await
        .unwrap();
    let mut events = handle.subscribe();
    handle.start_acquisition().await.unwrap();

    let seen = until_terminal(&mut events).await;
    match seen.last() {
        Some(AcquisitionEvent::Failed { error, .. }) => {
            assert!(error.contains("not ready after 3 polls"))
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
    assert_eq!(detector.readout_count(), 0);
    assert!(!handle.is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_acquisition_returns_one_frame() {
    let detector = Arc::new(MockDetector::new(32, 1).with_polls_until_ready(3));
    let (handle, _task) = spawn(&detector, &Settings::default());

    let frame = handle.wait_for_acquisition().await.unwrap();
    assert_eq!(frame.len(), 32);
    assert!(handle.get_acquired_data().await.unwrap().is_empty());
    assert!(!handle.is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_running_session() {
    let detector = Arc::new(MockDetector::new(8, 1));
    let (handle, task) = spawn(&detector, &Settings::default());
    handle
        .configure(params(AcquisitionMode::MultiScan, 10, 1))
        .await
        .unwrap();
    handle.start_acquisition().await.unwrap();

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(!handle.is_locked());
    assert!(matches!(
        handle.status().await,
        Err(DaqError::ActorUnavailable)
    ));
}

#[tokio::test]
#[traced_test]
async fn test_sequencer_logs_session_lifecycle() {
    let detector = Arc::new(MockDetector::new(8, 1));
    let settings = Settings::default();
    let mut sequencer = AcquisitionSequencer::new(
        detector,
        ModuleLock::new(),
        &settings.acquisition,
        &settings.cosmic,
    );
    sequencer
        .configure(params(AcquisitionMode::SingleScan, 1, 1))
        .await
        .unwrap();
    sequencer.start().await.unwrap();
    while let Transition::Schedule(_) = sequencer.on_timer().await.unwrap() {}

    assert!(logs_contain("Acquisition configured"));
    assert!(logs_contain("Acquisition started"));
    assert!(logs_contain("Acquisition complete"));
}
