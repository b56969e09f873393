//! Persistence of acquired spectra.
pub mod storage;

pub use storage::{save_acquired_data, AcquisitionMetadata, SpectrumCsvWriter};
