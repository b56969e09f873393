//! Acquisition sequencer.
//!
//! The sequencer owns the session state and implements the transition table; it does
//! no timing itself. Its driver (the [`AcquisitionActor`](super::AcquisitionActor))
//! calls [`AcquisitionSequencer::on_timer`] when the deadline returned by the previous
//! step elapses and sleeps until the next one.
//!
//! A session holds the [`ModuleLockGuard`] for its whole life, so completion, stop
//! and hardware failure all unlock by dropping the session.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cosmic::CosmicRejectionFilter;
use super::lock::{ModuleLock, ModuleLockGuard};
use super::mode::{AcquisitionMode, AcquisitionParameters, AcquisitionState};
use crate::config::{AcquisitionConfig, CosmicConfig};
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::Detector;
use crate::hardware::Frame;
use crate::messages::AcquisitionEvent;

/// What the driver should do after a sequencer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Call `on_timer` again after this delay
    Schedule(Duration),
    /// No session; do not schedule anything
    Idle,
}

/// Snapshot of the sequencer for status queries.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AcquisitionStatus {
    /// Current state
    pub state: AcquisitionState,
    /// Configured mode
    pub mode: AcquisitionMode,
    /// Whether the module lock is held
    pub locked: bool,
    /// Collections left in the running session (0 when idle)
    pub loop_counter: u64,
    /// Frames available from `acquired_data`
    pub frames: usize,
    /// Running session, if any
    pub session_id: Option<Uuid>,
    /// Start of the running session
    pub started_at: Option<DateTime<Utc>>,
}

struct AcquisitionSession {
    id: Uuid,
    _guard: ModuleLockGuard,
    state: AcquisitionState,
    loop_counter: u64,
    collected: u64,
    groups: usize,
    polls: u32,
    started_at: DateTime<Utc>,
}

enum Collected {
    Rearm,
    Complete,
}

/// Drives a detector through the configured acquisition protocol.
pub struct AcquisitionSequencer {
    detector: Arc<dyn Detector>,
    lock: ModuleLock,
    parameters: AcquisitionParameters,
    cosmic: CosmicConfig,
    filter: CosmicRejectionFilter,
    max_poll_attempts: Option<u32>,
    session: Option<AcquisitionSession>,
    acquired_data: Vec<Frame>,
    events: broadcast::Sender<AcquisitionEvent>,
}

impl AcquisitionSequencer {
    /// Create an idle sequencer.
    ///
    /// `config.defaults` become the initial parameters without touching the
    /// detector; call [`configure`](Self::configure) to validate and push them.
    pub fn new(
        detector: Arc<dyn Detector>,
        lock: ModuleLock,
        config: &AcquisitionConfig,
        cosmic: &CosmicConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let parameters = config.defaults;
        Self {
            detector,
            lock,
            filter: Self::build_filter(&parameters, cosmic),
            parameters,
            cosmic: cosmic.clone(),
            max_poll_attempts: config.max_poll_attempts,
            session: None,
            acquired_data: Vec::new(),
            events,
        }
    }

    fn build_filter(
        parameters: &AcquisitionParameters,
        cosmic: &CosmicConfig,
    ) -> CosmicRejectionFilter {
        CosmicRejectionFilter::new(
            parameters.number_accumulated_scans as usize,
            cosmic.coefficient,
        )
        .with_statistic(cosmic.statistic)
    }

    /// Event sender; subscribe for progress notifications.
    pub fn events(&self) -> broadcast::Sender<AcquisitionEvent> {
        self.events.clone()
    }

    /// The module lock shared with the parameter setters.
    pub fn lock(&self) -> &ModuleLock {
        &self.lock
    }

    /// Current parameters.
    pub fn parameters(&self) -> AcquisitionParameters {
        self.parameters
    }

    /// Validate and apply parameters; the exposure time goes to the detector.
    ///
    /// # Errors
    /// [`DaqError::Configuration`] when the parameters are inconsistent or a session
    /// is running.
    pub async fn configure(&mut self, parameters: AcquisitionParameters) -> AppResult<()> {
        let _guard = self.lock.try_lock("configure").map_err(|_| {
            DaqError::Configuration("cannot configure while an acquisition is running".into())
        })?;
        parameters.validate()?;
        self.detector
            .set_exposure(parameters.exposure_time)
            .await
            .map_err(DaqError::hardware)?;
        self.filter = Self::build_filter(&parameters, &self.cosmic);
        self.parameters = parameters;
        info!(
            mode = %parameters.mode,
            exposure_time = parameters.exposure_time,
            number_of_scans = parameters.number_of_scans,
            number_accumulated_scans = parameters.number_accumulated_scans,
            "Acquisition configured"
        );
        Ok(())
    }

    /// Start a session and return the delay until the first poll.
    ///
    /// # Errors
    /// - [`DaqError::Busy`] when a session (or a setter) holds the lock; existing
    ///   state is left untouched
    /// - [`DaqError::HardwareCommunication`] when the detector refuses to start
    pub async fn start(&mut self) -> AppResult<Duration> {
        let guard = self.lock.try_lock("start an acquisition")?;
        let parameters = self.parameters;
        let total = parameters.total_collections();

        self.acquired_data.clear();
        if let Err(err) = self.detector.start_acquisition().await {
            error!("Detector refused to start: {:#}", err);
            return Err(DaqError::hardware(err));
        }

        let session = AcquisitionSession {
            id: Uuid::new_v4(),
            _guard: guard,
            state: AcquisitionState::Armed,
            loop_counter: total,
            collected: 0,
            groups: 0,
            polls: 0,
            started_at: Utc::now(),
        };
        info!(session = %session.id, mode = %parameters.mode, total, "Acquisition started");
        self.publish(AcquisitionEvent::Started {
            session_id: session.id,
            mode: parameters.mode,
            total_collections: total,
        });
        self.session = Some(session);
        Ok(parameters.delay_before_poll(total.saturating_sub(1)))
    }

    /// Timer callback: poll the detector and advance the state machine.
    ///
    /// # Errors
    /// Hardware and filter errors end the session (detector aborted, lock released,
    /// `Failed` event published) and are returned.
    pub async fn on_timer(&mut self) -> AppResult<Transition> {
        let Some(mut session) = self.session.take() else {
            debug!("Timer fired without a session");
            return Ok(Transition::Idle);
        };

        match self.step(&mut session).await {
            Ok(Some(delay)) => {
                self.session = Some(session);
                Ok(Transition::Schedule(delay))
            }
            Ok(None) => {
                let session_id = session.id;
                info!(
                    session = %session_id,
                    collected = session.collected,
                    frames = self.acquired_data.len(),
                    "Acquisition complete"
                );
                drop(session);
                self.publish(AcquisitionEvent::Completed {
                    session_id,
                    frames: self.acquired_data.len(),
                });
                Ok(Transition::Idle)
            }
            Err(err) => {
                let session_id = session.id;
                error!(session = %session_id, "Acquisition aborted: {}", err);
                if let Err(abort_err) = self.detector.abort_acquisition().await {
                    warn!("Detector abort after failure also failed: {:#}", abort_err);
                }
                drop(session);
                self.publish(AcquisitionEvent::Failed {
                    session_id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// One poll; `Some(delay)` to continue, `None` when the session is complete.
    async fn step(&mut self, session: &mut AcquisitionSession) -> AppResult<Option<Duration>> {
        session.state = AcquisitionState::Polling;
        let ready = self
            .detector
            .get_ready_state()
            .await
            .map_err(|e| DaqError::hardware(e.context("ready-state poll failed")))?;

        if !ready {
            session.polls += 1;
            if let Some(max) = self.max_poll_attempts {
                if session.polls >= max {
                    return Err(DaqError::HardwareCommunication(format!(
                        "detector not ready after {} polls",
                        session.polls
                    )));
                }
            }
            debug!(session = %session.id, polls = session.polls, "Detector not ready");
            return Ok(Some(self.parameters.exposure()));
        }

        session.polls = 0;
        let frame = self
            .detector
            .get_acquired_data()
            .await
            .map_err(|e| DaqError::hardware(e.context("readout failed")))?;

        match self.collect(session, frame)? {
            Collected::Complete => Ok(None),
            Collected::Rearm => {
                self.detector
                    .start_acquisition()
                    .await
                    .map_err(|e| DaqError::hardware(e.context("restart failed")))?;
                session.state = AcquisitionState::Armed;
                Ok(Some(
                    self.parameters
                        .delay_before_poll(session.loop_counter.saturating_sub(1)),
                ))
            }
        }
    }

    fn collect(&mut self, session: &mut AcquisitionSession, frame: Frame) -> AppResult<Collected> {
        let parameters = self.parameters;
        session.collected += 1;
        session.loop_counter = session.loop_counter.saturating_sub(1);

        match parameters.mode {
            AcquisitionMode::SingleScan => {
                self.acquired_data = vec![frame];
                self.publish_collected(session);
                return Ok(Collected::Complete);
            }
            AcquisitionMode::LiveScan => {
                // Live sessions never run down.
                session.loop_counter += 1;
                self.acquired_data = vec![frame.clone()];
                self.publish(AcquisitionEvent::LiveFrame {
                    session_id: session.id,
                    frame,
                });
                return Ok(Collected::Rearm);
            }
            _ => {}
        }

        self.acquired_data.push(frame);
        self.publish_collected(session);

        let group_size = u64::from(parameters.number_accumulated_scans);
        if parameters.mode.is_accumulated() && session.loop_counter % group_size == 0 {
            let start = self
                .acquired_data
                .len()
                .saturating_sub(parameters.number_accumulated_scans as usize);
            let result = self.filter.apply(&self.acquired_data[start..])?;
            self.acquired_data.truncate(start);
            self.acquired_data.push(result.aggregate);
            session.groups += 1;
            debug!(
                session = %session.id,
                group = session.groups,
                rejected = result.rejected,
                "Accumulation group filtered"
            );
            self.publish(AcquisitionEvent::AccumulationFiltered {
                session_id: session.id,
                group: session.groups,
                rejected: result.rejected,
            });
        }

        if session.loop_counter == 0 {
            Ok(Collected::Complete)
        } else {
            Ok(Collected::Rearm)
        }
    }

    /// Cancel the running session and abort the detector.
    ///
    /// No effect when idle. The lock is released even if the abort fails.
    pub async fn stop(&mut self) -> AppResult<()> {
        let Some(session) = self.session.take() else {
            debug!("Stop requested while idle");
            return Ok(());
        };
        let session_id = session.id;
        drop(session);

        let aborted = self.detector.abort_acquisition().await;
        info!(session = %session_id, "Acquisition stopped");
        self.publish(AcquisitionEvent::Stopped { session_id });
        aborted.map_err(DaqError::hardware)
    }

    /// Run one exposure and wait for it, polling every exposure time.
    ///
    /// Blocks its caller for the whole exposure and leaves `acquired_data` alone.
    ///
    /// # Errors
    /// [`DaqError::Busy`] while a session runs; hardware errors otherwise.
    pub async fn wait_for_acquisition(&mut self) -> AppResult<Frame> {
        let _guard = self.lock.try_lock("wait for an acquisition")?;
        self.detector
            .start_acquisition()
            .await
            .map_err(DaqError::hardware)?;

        let exposure = self.parameters.exposure();
        let mut polls = 0u32;
        loop {
            let ready = match self.detector.get_ready_state().await {
                Ok(ready) => ready,
                Err(err) => return Err(self.abort_after(DaqError::hardware(err)).await),
            };
            if ready {
                break;
            }
            polls += 1;
            if self.max_poll_attempts.is_some_and(|max| polls >= max) {
                let err = DaqError::HardwareCommunication(format!(
                    "detector not ready after {polls} polls"
                ));
                return Err(self.abort_after(err).await);
            }
            tokio::time::sleep(exposure).await;
        }

        self.detector
            .get_acquired_data()
            .await
            .map_err(DaqError::hardware)
    }

    async fn abort_after(&self, err: DaqError) -> DaqError {
        if let Err(abort_err) = self.detector.abort_acquisition().await {
            warn!("Detector abort after failure also failed: {:#}", abort_err);
        }
        err
    }

    /// Best-effort result: the latest frame in live mode, the collected (and
    /// filtered) series otherwise.
    pub fn acquired_data(&self) -> Vec<Frame> {
        self.acquired_data.clone()
    }

    /// Current state.
    pub fn state(&self) -> AcquisitionState {
        self.session
            .as_ref()
            .map_or(AcquisitionState::Idle, |s| s.state)
    }

    /// Status snapshot.
    pub fn status(&self) -> AcquisitionStatus {
        AcquisitionStatus {
            state: self.state(),
            mode: self.parameters.mode,
            locked: self.lock.is_locked(),
            loop_counter: self.session.as_ref().map_or(0, |s| s.loop_counter),
            frames: self.acquired_data.len(),
            session_id: self.session.as_ref().map(|s| s.id),
            started_at: self.session.as_ref().map(|s| s.started_at),
        }
    }

    fn publish_collected(&self, session: &AcquisitionSession) {
        self.publish(AcquisitionEvent::FrameCollected {
            session_id: session.id,
            index: session.collected,
            remaining: session.loop_counter,
        });
    }

    fn publish(&self, event: AcquisitionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
