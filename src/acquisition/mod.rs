//! Spectrum acquisition sequencing.
//!
//! - [`mode`]: acquisition modes, parameters and the sequencer state enum
//! - [`lock`]: the module lock (one session or setter at a time)
//! - [`cosmic`]: cosmic-ray rejection across accumulation groups
//! - [`sequencer`]: the start/poll/collect state machine
//! - [`actor`]: the task that owns the sequencer and fires its timer

pub mod actor;
pub mod cosmic;
pub mod lock;
pub mod mode;
pub mod sequencer;

pub use actor::{AcquisitionActor, AcquisitionHandle};
pub use cosmic::{CosmicRejection, CosmicRejectionFilter, RejectionStatistic};
pub use lock::{ModuleLock, ModuleLockGuard};
pub use mode::{AcquisitionMode, AcquisitionParameters, AcquisitionState};
pub use sequencer::{AcquisitionSequencer, AcquisitionStatus, Transition};
