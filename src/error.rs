//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur while configuring and running
//! spectrometer acquisitions.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: an invalid parameter combination, rejected before an
//!   acquisition starts (or a setter called with an out-of-range value).
//! - **`Busy`**: a session or setter tried to take the module lock while it was held.
//!   Concurrent starts are rejected, never queued.
//! - **`InsufficientData`**: the cosmic rejection filter received fewer frames than the
//!   configured accumulation count.
//! - **`HardwareCommunication`**: an error propagated from the detector or spectrometer.
//!   These abort the current session and are never retried.
//! - **`Config`**: wraps `figment` errors raised while loading the settings file.
//! - **`FeatureNotEnabled`**: functionality that was not compiled in (storage backends).
//!
//! Hardware capability traits return `anyhow::Result`; callers convert with
//! [`DaqError::hardware`] so the whole context chain survives.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Acquisition module is busy: {0}")]
    Busy(String),

    #[error("Insufficient data: {required} frames required, {available} available")]
    InsufficientData { required: usize, available: usize },

    #[error("Hardware communication error: {0}")]
    HardwareCommunication(String),

    #[error("Operation not supported by hardware: {0}")]
    NotSupported(String),

    #[error("Data processing error: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Acquisition actor is not running")]
    ActorUnavailable,
}

impl DaqError {
    /// Wrap an error coming out of a hardware capability call.
    pub fn hardware(err: anyhow::Error) -> Self {
        DaqError::HardwareCommunication(format!("{err:#}"))
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl From<serde_json::Error> for DaqError {
    fn from(value: serde_json::Error) -> Self {
        DaqError::Serialization(value.to_string())
    }
}
