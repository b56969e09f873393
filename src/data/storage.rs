//! Spectrum data storage.
//!
//! Acquired frames are written as CSV: the [`AcquisitionMetadata`] goes first as
//! pretty-printed JSON, one `# `-prefixed line at a time, followed by a table with
//! one row per pixel and one column per frame. Readers that understand `#` comments
//! (`csv::ReaderBuilder::comment`, pandas `comment='#'`) load the table directly.
//!
//! CSV support is behind the `storage_csv` feature. Without it every write fails with
//! [`DaqError::FeatureNotEnabled`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::acquisition::AcquisitionMode;
use crate::error::{AppResult, DaqError};
use crate::hardware::Frame;

/// Settings recorded with every saved acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionMetadata {
    /// Acquisition protocol
    pub mode: AcquisitionMode,
    /// Pre-amplifier gain
    pub camera_gain: f64,
    /// Readout speed in Hz
    pub readout_speed: f64,
    /// Exposure in seconds
    pub exposure_time: f64,
    /// Delay between scans in seconds
    pub scan_delay: f64,
    /// Delay between accumulated frames in seconds
    pub accumulation_delay: f64,
    /// Scans per session in multi modes
    pub number_of_scans: u32,
    /// Frames per accumulation group
    pub number_accumulated_scans: u32,
    /// Grating in the beam
    pub grating_index: usize,
    /// Calibrated center wavelength in metres
    pub center_wavelength: f64,
    /// Offset added to hardware wavelengths, in metres
    pub wavelength_calibration: f64,
    /// When the metadata was taken
    pub timestamp: DateTime<Utc>,
}

/// `"{prefix}_YYYYmmdd_HHMMSS.csv"` for the current time.
pub fn timestamped_filename(prefix: &str) -> String {
    format!("{}_{}.csv", prefix, Utc::now().format("%Y%m%d_%H%M%S"))
}

/// CSV writer for acquired spectra.
#[derive(Debug, Clone)]
pub struct SpectrumCsvWriter {
    path: PathBuf,
}

impl SpectrumCsvWriter {
    /// Writer targeting `path` exactly.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writer for a timestamped file in `dir`, creating the directory if needed.
    pub fn in_directory(dir: impl AsRef<Path>, prefix: &str) -> AppResult<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| DaqError::Storage(e.to_string()))?;
        }
        Ok(Self::new(dir.join(timestamped_filename(prefix))))
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `frames` with their metadata.
    ///
    /// All frames must have the same shape. When given, `wavelengths` must have one
    /// entry per detector column; for image frames it is repeated on every row.
    pub fn write(
        &self,
        frames: &[Frame],
        metadata: &AcquisitionMetadata,
        wavelengths: Option<&[f64]>,
    ) -> AppResult<()> {
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = (frames, metadata, wavelengths);
            return Err(DaqError::FeatureNotEnabled("storage_csv".to_string()));
        }

        #[cfg(feature = "storage_csv")]
        {
            use std::fs::File;
            use std::io::Write;

            let first = frames
                .first()
                .ok_or_else(|| DaqError::Storage("no acquired data to save".to_string()))?;
            if let Some(frame) = frames.iter().find(|f| f.shape() != first.shape()) {
                return Err(DaqError::Storage(format!(
                    "frame shape {:?} differs from {:?}",
                    frame.shape(),
                    first.shape()
                )));
            }
            if let Some(axis) = wavelengths {
                if axis.len() != first.width {
                    return Err(DaqError::Storage(format!(
                        "{} wavelengths for {} detector columns",
                        axis.len(),
                        first.width
                    )));
                }
            }

            let mut file = File::create(&self.path)
                .map_err(|e| DaqError::Storage(format!("Failed to create CSV file: {}", e)))?;

            let json_string = serde_json::to_string_pretty(metadata)?;
            for line in json_string.lines() {
                writeln!(file, "# {line}").map_err(|e| DaqError::Storage(e.to_string()))?;
            }

            let mut writer = csv::Writer::from_writer(file);
            let mut header = vec!["pixel".to_string()];
            if wavelengths.is_some() {
                header.push("wavelength".to_string());
            }
            header.extend((0..frames.len()).map(|i| format!("frame_{i}")));
            writer
                .write_record(&header)
                .map_err(|e| DaqError::Storage(e.to_string()))?;

            for pixel in 0..first.len() {
                let mut record = Vec::with_capacity(header.len());
                record.push(pixel.to_string());
                if let Some(axis) = wavelengths {
                    record.push(axis[pixel % first.width].to_string());
                }
                record.extend(frames.iter().map(|f| f.data[pixel].to_string()));
                writer
                    .write_record(&record)
                    .map_err(|e| DaqError::Storage(e.to_string()))?;
            }

            writer
                .flush()
                .map_err(|e| DaqError::Storage(e.to_string()))?;
            tracing::info!(
                path = %self.path.display(),
                frames = frames.len(),
                "Acquired data saved"
            );
            Ok(())
        }
    }
}

/// Save `frames` to a timestamped CSV file in `dir` and return its path.
pub fn save_acquired_data(
    dir: impl AsRef<Path>,
    frames: &[Frame],
    metadata: &AcquisitionMetadata,
    wavelengths: Option<&[f64]>,
) -> AppResult<PathBuf> {
    let writer = SpectrumCsvWriter::in_directory(dir, "spectrum")?;
    writer.write(frames, metadata, wavelengths)?;
    Ok(writer.path().to_path_buf())
}
