//! # Spectro DAQ
//!
//! Acquisition sequencing for a spectrometer with a CCD-style detector. The crate
//! drives a detector through single, repeated, live and accumulated acquisitions,
//! filters cosmic-ray hits out of accumulated frames and keeps the spectrometer
//! settings consistent while a session runs.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: acquisition modes and parameters, the module lock, the cosmic
//!   rejection filter, the sequencer state machine and the actor that runs it.
//! - **`config`**: layered settings (defaults, TOML file, `SPECTRO_DAQ_` environment)
//!   loaded with `figment`. See `config::Settings`.
//! - **`data`**: CSV persistence of acquired frames with their metadata.
//! - **`error`**: the crate-wide `DaqError` enum.
//! - **`hardware`**: `Detector` and `Spectrometer` capability traits, the types they
//!   exchange and mock implementations.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`messages`**: commands and events exchanged with the acquisition actor.
//! - **`spectrum`**: validated spectrometer and detector settings and the
//!   wavelength axis.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod messages;
pub mod spectrum;
