//! Acquisition modes, parameters and sequencer state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{AppResult, DaqError};

/// Acquisition protocol.
///
/// Determines the loop count and whether accumulation filtering applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquisitionMode {
    /// One frame
    SingleScan,
    /// `number_of_scans` frames
    MultiScan,
    /// Frames until stopped; only the latest is kept
    LiveScan,
    /// One group of `number_accumulated_scans` frames, filtered into one aggregate
    AccSingleScan,
    /// `number_of_scans` filtered aggregates
    AccMultiScan,
}

impl AcquisitionMode {
    /// Whether groups of frames go through the cosmic rejection filter.
    pub fn is_accumulated(&self) -> bool {
        matches!(
            self,
            AcquisitionMode::AccSingleScan | AcquisitionMode::AccMultiScan
        )
    }

    /// Whether `number_of_scans` applies.
    pub fn is_multi(&self) -> bool {
        matches!(
            self,
            AcquisitionMode::MultiScan | AcquisitionMode::AccMultiScan
        )
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::SingleScan => write!(f, "SINGLE_SCAN"),
            AcquisitionMode::MultiScan => write!(f, "MULTI_SCAN"),
            AcquisitionMode::LiveScan => write!(f, "LIVE_SCAN"),
            AcquisitionMode::AccSingleScan => write!(f, "ACC_SINGLE_SCAN"),
            AcquisitionMode::AccMultiScan => write!(f, "ACC_MULTI_SCAN"),
        }
    }
}

impl std::str::FromStr for AcquisitionMode {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "SINGLE_SCAN" => Ok(AcquisitionMode::SingleScan),
            "MULTI_SCAN" => Ok(AcquisitionMode::MultiScan),
            "LIVE_SCAN" => Ok(AcquisitionMode::LiveScan),
            "ACC_SINGLE_SCAN" => Ok(AcquisitionMode::AccSingleScan),
            "ACC_MULTI_SCAN" => Ok(AcquisitionMode::AccMultiScan),
            _ => Err(DaqError::Configuration(format!(
                "Unknown acquisition mode '{s}'"
            ))),
        }
    }
}

/// Timing and counting parameters of an acquisition.
///
/// Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParameters {
    /// Acquisition protocol
    pub mode: AcquisitionMode,
    /// Exposure time of each frame
    pub exposure_time: f64,
    /// Delay between scans
    pub scan_delay: f64,
    /// Delay between frames of one accumulation group
    pub accumulation_delay: f64,
    /// Number of scans in multi modes
    pub number_of_scans: u32,
    /// Frames per accumulation group
    pub number_accumulated_scans: u32,
}

impl Default for AcquisitionParameters {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::SingleScan,
            exposure_time: 0.1,
            scan_delay: 5.0,
            accumulation_delay: 1.0,
            number_of_scans: 1,
            number_accumulated_scans: 2,
        }
    }
}

impl AcquisitionParameters {
    /// Check every constraint between the parameters.
    ///
    /// The delay ordering `exposure_time < accumulation_delay <
    /// scan_delay / number_accumulated_scans` is enforced for every mode.
    pub fn validate(&self) -> AppResult<()> {
        if !self.exposure_time.is_finite() || self.exposure_time <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "exposure_time must be positive, got {}",
                self.exposure_time
            )));
        }
        for (name, value) in [
            ("scan_delay", self.scan_delay),
            ("accumulation_delay", self.accumulation_delay),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(DaqError::Configuration(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.number_of_scans == 0 {
            return Err(DaqError::Configuration(
                "number_of_scans must be at least 1".to_string(),
            ));
        }
        if self.number_accumulated_scans == 0 {
            return Err(DaqError::Configuration(
                "number_accumulated_scans must be at least 1".to_string(),
            ));
        }
        if self.exposure_time >= self.accumulation_delay {
            return Err(DaqError::Configuration(format!(
                "accumulation_delay ({}) must be greater than exposure_time ({})",
                self.accumulation_delay, self.exposure_time
            )));
        }
        let per_frame = self.scan_delay / f64::from(self.number_accumulated_scans);
        if self.accumulation_delay >= per_frame {
            return Err(DaqError::Configuration(format!(
                "accumulation_delay ({}) must be less than \
                 scan_delay / number_accumulated_scans ({})",
                self.accumulation_delay, per_frame
            )));
        }
        let longest = self.exposure_time + self.scan_delay.max(self.accumulation_delay);
        if Duration::try_from_secs_f64(longest).is_err() {
            return Err(DaqError::Configuration(format!(
                "exposure_time plus delay ({longest} s) is out of range"
            )));
        }
        Ok(())
    }

    /// Number of raw frames a session collects before it completes.
    ///
    /// For live mode this is the size of one cycle.
    pub fn total_collections(&self) -> u64 {
        let scans = if self.mode.is_multi() {
            u64::from(self.number_of_scans)
        } else {
            1
        };
        let accumulated = if self.mode.is_accumulated() {
            u64::from(self.number_accumulated_scans)
        } else {
            1
        };
        scans * accumulated
    }

    /// Exposure time as a `Duration`.
    pub fn exposure(&self) -> Duration {
        seconds_to_duration(self.exposure_time)
    }

    /// Wait before polling the frame that leaves `remaining` collections to go.
    ///
    /// Single scans poll right after the exposure. Inside an accumulation group
    /// the accumulation delay applies; the last frame of a group (and every frame of
    /// the non-accumulated modes) waits the scan delay.
    pub fn delay_before_poll(&self, remaining: u64) -> Duration {
        let seconds = match self.mode {
            AcquisitionMode::SingleScan => 0.0,
            mode if mode.is_accumulated()
                && remaining % u64::from(self.number_accumulated_scans.max(1)) != 0 =>
            {
                self.accumulation_delay
            }
            _ => self.scan_delay,
        };
        seconds_to_duration(self.exposure_time + seconds)
    }
}

/// Saturates at `Duration::MAX`; negative and NaN inputs give zero.
fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Sequencer state.
///
/// # State Machine
///
/// ```text
/// Idle ──start──> Armed ──timer──> Polling ──ready──> (collect)
///  ▲                ▲                │  ▲                │
///  │                │                └──┘ not ready      │
///  │                └──────────── more frames ───────────┤
///  └──────────── done / stop / hardware error ───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionState {
    /// No session
    Idle,
    /// Detector started, waiting for the first poll
    Armed,
    /// Detector polled at least once and not ready yet
    Polling,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "Idle"),
            AcquisitionState::Armed => write!(f, "Armed"),
            AcquisitionState::Polling => write!(f, "Polling"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(exposure: f64, acc_delay: f64, scan_delay: f64, m: u32) -> AcquisitionParameters {
        AcquisitionParameters {
            mode: AcquisitionMode::AccMultiScan,
            exposure_time: exposure,
            scan_delay,
            accumulation_delay: acc_delay,
            number_of_scans: 1,
            number_accumulated_scans: m,
        }
    }

    #[test]
    fn test_accumulation_delay_must_fit_in_scan_delay() {
        let err = params(1.0, 0.5, 0.4, 2).validate().unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[test]
    fn test_valid_accumulation_timing() {
        assert!(params(0.1, 1.0, 5.0, 2).validate().is_ok());
    }

    #[test]
    fn test_exposure_must_be_shorter_than_accumulation_delay() {
        assert!(params(1.0, 1.0, 10.0, 2).validate().is_err());
        assert!(params(0.0, 1.0, 10.0, 2).validate().is_err());
    }

    #[test]
    fn test_delay_out_of_duration_range_rejected() {
        let err = params(0.1, 1.0, 1e20, 2).validate().unwrap_err();
        assert!(matches!(err, DaqError::Configuration(ref m) if m.contains("out of range")));
        // largest delays that still fit are accepted
        assert!(params(0.1, 1.0, 1e18, 2).validate().is_ok());
    }

    #[test]
    fn test_unvalidated_huge_delay_saturates() {
        let mut p = params(0.1, 1.0, 1e20, 2);
        p.mode = AcquisitionMode::MultiScan;
        assert_eq!(p.delay_before_poll(0), Duration::MAX);
        p.exposure_time = f64::INFINITY;
        assert_eq!(p.exposure(), Duration::MAX);
    }

    #[test]
    fn test_counts_must_be_positive() {
        let mut p = params(0.1, 1.0, 5.0, 2);
        p.number_of_scans = 0;
        assert!(p.validate().is_err());
        let p = params(0.1, 1.0, 5.0, 0);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_total_collections_per_mode() {
        let mut p = params(0.1, 1.0, 10.0, 4);
        p.number_of_scans = 3;
        p.mode = AcquisitionMode::SingleScan;
        assert_eq!(p.total_collections(), 1);
        p.mode = AcquisitionMode::MultiScan;
        assert_eq!(p.total_collections(), 3);
        p.mode = AcquisitionMode::LiveScan;
        assert_eq!(p.total_collections(), 1);
        p.mode = AcquisitionMode::AccSingleScan;
        assert_eq!(p.total_collections(), 4);
        p.mode = AcquisitionMode::AccMultiScan;
        assert_eq!(p.total_collections(), 12);
    }

    #[test]
    fn test_delay_before_poll() {
        let mut p = params(0.5, 1.0, 10.0, 4);
        assert_eq!(p.delay_before_poll(3), Duration::from_secs_f64(1.5));
        assert_eq!(p.delay_before_poll(4), Duration::from_secs_f64(10.5));
        p.mode = AcquisitionMode::SingleScan;
        assert_eq!(p.delay_before_poll(0), Duration::from_secs_f64(0.5));
        p.mode = AcquisitionMode::MultiScan;
        assert_eq!(p.delay_before_poll(2), Duration::from_secs_f64(10.5));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            "acc-multi-scan".parse::<AcquisitionMode>().unwrap(),
            AcquisitionMode::AccMultiScan
        );
        assert_eq!(
            "LIVE_SCAN".parse::<AcquisitionMode>().unwrap(),
            AcquisitionMode::LiveScan
        );
        assert!("burst".parse::<AcquisitionMode>().is_err());
        assert_eq!(AcquisitionMode::AccSingleScan.to_string(), "ACC_SINGLE_SCAN");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AcquisitionState::Armed.to_string(), "Armed");
        assert_eq!(AcquisitionState::Polling.to_string(), "Polling");
    }
}
