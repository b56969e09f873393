//! Actor that drives the acquisition sequencer.
//!
//! The actor task owns the [`AcquisitionSequencer`] and is its only mutator. One
//! `select!` loop waits on both the command channel and the pending timer deadline,
//! so commands and timer ticks never interleave. `stop` clears the deadline; the next
//! loop iteration no longer waits on it.
//!
//! Callers use the cloneable [`AcquisitionHandle`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use super::lock::ModuleLock;
use super::mode::AcquisitionParameters;
use super::sequencer::{AcquisitionSequencer, AcquisitionStatus, Transition};
use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::Detector;
use crate::hardware::Frame;
use crate::messages::{AcquisitionCommand, AcquisitionEvent};

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Event loop around an [`AcquisitionSequencer`].
pub struct AcquisitionActor {
    sequencer: AcquisitionSequencer,
    deadline: Option<Instant>,
}

impl AcquisitionActor {
    /// Wrap a sequencer.
    pub fn new(sequencer: AcquisitionSequencer) -> Self {
        Self {
            sequencer,
            deadline: None,
        }
    }

    /// Build the sequencer from `settings`, spawn the actor and return its handle.
    ///
    /// `lock` is shared with anything else that must not run during a session (the
    /// [`SpectrumController`](crate::spectrum::SpectrumController) setters).
    pub fn spawn(
        detector: Arc<dyn Detector>,
        lock: ModuleLock,
        settings: &Settings,
    ) -> (AcquisitionHandle, JoinHandle<()>) {
        let sequencer =
            AcquisitionSequencer::new(detector, lock, &settings.acquisition, &settings.cosmic);
        let (command_tx, command_rx) = mpsc::channel(settings.acquisition.mailbox_capacity.max(1));
        let handle = AcquisitionHandle {
            command_tx,
            events: sequencer.events(),
            lock: sequencer.lock().clone(),
        };
        let span = info_span!("acquisition", app = %settings.application.name);
        let task = tokio::spawn(Self::new(sequencer).run(command_rx).instrument(span));
        (handle, task)
    }

    /// Process commands and timer ticks until shutdown or until every handle is
    /// dropped. A running session is stopped on the way out.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<AcquisitionCommand>) {
        info!("Acquisition actor started");

        loop {
            let deadline = self.deadline;
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("Command channel closed");
                        break;
                    };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                _ = wait_for(deadline) => {
                    self.tick().await;
                }
            }
        }

        self.deadline = None;
        if let Err(e) = self.sequencer.stop().await {
            warn!("Stopping acquisition on shutdown failed: {}", e);
        }
        info!("Acquisition actor stopped");
    }

    async fn tick(&mut self) {
        self.deadline = None;
        match self.sequencer.on_timer().await {
            Ok(Transition::Schedule(delay)) => self.deadline = Some(deadline_after(delay)),
            Ok(Transition::Idle) => {}
            // Already logged and published as a Failed event.
            Err(e) => debug!("Session ended with error: {}", e),
        }
    }

    async fn handle_command(&mut self, command: AcquisitionCommand) -> ControlFlow<()> {
        match command {
            AcquisitionCommand::Configure {
                parameters,
                response,
            } => {
                let result = self.sequencer.configure(parameters).await;
                let _ = response.send(result);
            }

            AcquisitionCommand::Start { response } => {
                let result = self.sequencer.start().await.map(|delay| {
                    self.deadline = Some(deadline_after(delay));
                });
                let _ = response.send(result);
            }

            AcquisitionCommand::Stop { response } => {
                self.deadline = None;
                let result = self.sequencer.stop().await;
                let _ = response.send(result);
            }

            AcquisitionCommand::GetAcquiredData { response } => {
                let _ = response.send(self.sequencer.acquired_data());
            }

            AcquisitionCommand::GetStatus { response } => {
                let _ = response.send(self.sequencer.status());
            }

            AcquisitionCommand::WaitForAcquisition { response } => {
                let result = self.sequencer.wait_for_acquisition().await;
                let _ = response.send(result);
            }

            AcquisitionCommand::Shutdown { response } => {
                self.deadline = None;
                let result = self.sequencer.stop().await;
                let _ = response.send(result);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Delays past the clock's range park the timer about thirty years out.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable client of an [`AcquisitionActor`].
#[derive(Clone)]
pub struct AcquisitionHandle {
    command_tx: mpsc::Sender<AcquisitionCommand>,
    events: broadcast::Sender<AcquisitionEvent>,
    lock: ModuleLock,
}

impl AcquisitionHandle {
    async fn request<T>(
        &self,
        (command, response): (AcquisitionCommand, oneshot::Receiver<T>),
    ) -> AppResult<T> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| DaqError::ActorUnavailable)?;
        response.await.map_err(|_| DaqError::ActorUnavailable)
    }

    /// Validate and apply acquisition parameters.
    pub async fn configure(&self, parameters: AcquisitionParameters) -> AppResult<()> {
        self.request(AcquisitionCommand::configure(parameters)).await?
    }

    /// Start a session; fails with [`DaqError::Busy`] while one is running.
    pub async fn start_acquisition(&self) -> AppResult<()> {
        self.request(AcquisitionCommand::start()).await?
    }

    /// Stop the running session. No effect when idle.
    pub async fn stop_acquisition(&self) -> AppResult<()> {
        self.request(AcquisitionCommand::stop()).await?
    }

    /// Snapshot of the acquired data.
    pub async fn get_acquired_data(&self) -> AppResult<Vec<Frame>> {
        self.request(AcquisitionCommand::get_acquired_data()).await
    }

    /// Sequencer status.
    pub async fn status(&self) -> AppResult<AcquisitionStatus> {
        self.request(AcquisitionCommand::get_status()).await
    }

    /// Run one exposure and wait for it.
    ///
    /// The actor processes nothing else meanwhile, so use this only for one-off
    /// exposures outside of sessions.
    pub async fn wait_for_acquisition(&self) -> AppResult<Frame> {
        self.request(AcquisitionCommand::wait_for_acquisition()).await?
    }

    /// Stop any session and end the actor.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(AcquisitionCommand::shutdown()).await?
    }

    /// Receive progress events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.events.subscribe()
    }

    /// Whether a session (or a setter) holds the module lock.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// The module lock, for components that share it.
    pub fn lock(&self) -> ModuleLock {
        self.lock.clone()
    }
}
