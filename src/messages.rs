//! Message types for actor-based communication.
//!
//! Callers talk to the [`AcquisitionActor`](crate::acquisition::AcquisitionActor)
//! through [`AcquisitionCommand`]s sent over an mpsc channel; each command carries a
//! oneshot sender for its reply. Progress is published separately as
//! [`AcquisitionEvent`]s on a broadcast channel.
//!
//! # Message Flow
//!
//! ```text
//! Caller                             Actor Task
//! ------                             ----------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                    3. Receive command
//!                                    4. Mutate sequencer state
//!                                    5. Send response
//! 6. Await oneshot receiver   <------
//!                                    (timer ticks)
//! 7. Receive events           <------ broadcast
//! ```
//!
//! # Helper Methods
//!
//! Each command variant has a helper that creates the command and returns the
//! receiver:
//!
//! ```rust
//! use spectro_daq::messages::AcquisitionCommand;
//!
//! let (cmd, rx) = AcquisitionCommand::start();
//! // cmd_tx.send(cmd).await?;
//! // let result = rx.await?;
//! ```

use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::acquisition::{AcquisitionMode, AcquisitionParameters, AcquisitionStatus};
use crate::error::AppResult;
use crate::hardware::Frame;

/// Commands handled by the acquisition actor.
#[derive(Debug)]
pub enum AcquisitionCommand {
    /// Validate and apply new parameters.
    ///
    /// Fails with a configuration error while a session is running.
    Configure {
        /// Parameters to apply
        parameters: AcquisitionParameters,
        /// Response channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Start a session. Fails with `Busy` while locked.
    Start {
        /// Response channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Stop the running session, if any.
    Stop {
        /// Response channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Snapshot of the acquired data.
    GetAcquiredData {
        /// Response channel
        response: oneshot::Sender<Vec<Frame>>,
    },

    /// Current sequencer status.
    GetStatus {
        /// Response channel
        response: oneshot::Sender<AcquisitionStatus>,
    },

    /// Run one exposure synchronously.
    ///
    /// The actor handles no other command until the exposure is read out.
    WaitForAcquisition {
        /// Response channel
        response: oneshot::Sender<AppResult<Frame>>,
    },

    /// Stop any session and end the actor loop.
    Shutdown {
        /// Response channel
        response: oneshot::Sender<AppResult<()>>,
    },
}

impl AcquisitionCommand {
    /// Helper to create a Configure command
    pub fn configure(
        parameters: AcquisitionParameters,
    ) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Configure {
                parameters,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Start command
    pub fn start() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Start { response: tx }, rx)
    }

    /// Helper to create a Stop command
    pub fn stop() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { response: tx }, rx)
    }

    /// Helper to create a GetAcquiredData command
    pub fn get_acquired_data() -> (Self, oneshot::Receiver<Vec<Frame>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetAcquiredData { response: tx }, rx)
    }

    /// Helper to create a GetStatus command
    pub fn get_status() -> (Self, oneshot::Receiver<AcquisitionStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetStatus { response: tx }, rx)
    }

    /// Helper to create a WaitForAcquisition command
    pub fn wait_for_acquisition() -> (Self, oneshot::Receiver<AppResult<Frame>>) {
        let (tx, rx) = oneshot::channel();
        (Self::WaitForAcquisition { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}

/// Progress notifications published by the sequencer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AcquisitionEvent {
    /// A session started
    Started {
        /// Session identifier
        session_id: Uuid,
        /// Acquisition protocol
        mode: AcquisitionMode,
        /// Raw frames the session will collect (one cycle for live mode)
        total_collections: u64,
    },
    /// A raw frame was read out
    FrameCollected {
        /// Session identifier
        session_id: Uuid,
        /// 1-based count of raw frames in this session
        index: u64,
        /// Collections left before completion
        remaining: u64,
    },
    /// An accumulation group was replaced by its filtered aggregate
    AccumulationFiltered {
        /// Session identifier
        session_id: Uuid,
        /// 1-based group number
        group: usize,
        /// Values excluded by the filter
        rejected: usize,
    },
    /// New live frame available
    LiveFrame {
        /// Session identifier
        session_id: Uuid,
        /// The frame
        frame: Frame,
    },
    /// Session finished normally
    Completed {
        /// Session identifier
        session_id: Uuid,
        /// Frames available from `get_acquired_data`
        frames: usize,
    },
    /// Session cancelled by a stop request
    Stopped {
        /// Session identifier
        session_id: Uuid,
    },
    /// Session aborted by an error
    Failed {
        /// Session identifier
        session_id: Uuid,
        /// Error description
        error: String,
    },
}

impl AcquisitionEvent {
    /// Session the event belongs to.
    pub fn session_id(&self) -> Uuid {
        match self {
            AcquisitionEvent::Started { session_id, .. }
            | AcquisitionEvent::FrameCollected { session_id, .. }
            | AcquisitionEvent::AccumulationFiltered { session_id, .. }
            | AcquisitionEvent::LiveFrame { session_id, .. }
            | AcquisitionEvent::Completed { session_id, .. }
            | AcquisitionEvent::Stopped { session_id }
            | AcquisitionEvent::Failed { session_id, .. } => *session_id,
        }
    }

    /// Whether the session ends with this event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AcquisitionEvent::Completed { .. }
                | AcquisitionEvent::Stopped { .. }
                | AcquisitionEvent::Failed { .. }
        )
    }
}
