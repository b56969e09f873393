//! Hardware abstractions for spectroscopy.
//!
//! Detectors and spectrometers are expressed as capability traits (see
//! [`capabilities`]) and resolved at construction time. [`mock`] provides simulated
//! devices for tests and for running the CLI without hardware.

pub mod capabilities;
pub mod mock;

use serde::{Deserialize, Serialize};
use std::fmt;

/// One array of detector counts produced by a single exposure.
///
/// Data is row-major: `data[row * width + column]`. Full vertical binning produces a
/// single row, multi-track read-out one row per track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Number of pixels per row
    pub width: usize,
    /// Number of rows
    pub height: usize,
    /// Counts, `width * height` values
    pub data: Vec<f64>,
}

impl Frame {
    /// Build a frame, checking that the buffer matches the declared shape.
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Option<Self> {
        (width * height == data.len()).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// A single-row frame (full vertical binning).
    pub fn spectrum(data: Vec<f64>) -> Self {
        Self {
            width: data.len(),
            height: 1,
            data,
        }
    }

    /// A frame with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, value: f64) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// `(width, height)`
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the frame holds no pixels.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Detector output shape selector, orthogonal to the acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadMode {
    /// Full vertical binning: one spectrum per exposure
    Fvb,
    /// One row per configured track
    MultipleTracks,
    /// Full sensor image
    Image,
    /// Sub-area of the sensor with binning
    ImageAdvanced,
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadMode::Fvb => write!(f, "FVB"),
            ReadMode::MultipleTracks => write!(f, "MULTIPLE_TRACKS"),
            ReadMode::Image => write!(f, "IMAGE"),
            ReadMode::ImageAdvanced => write!(f, "IMAGE_ADVANCED"),
        }
    }
}

/// Detector trigger source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMode(pub String);

impl TriggerMode {
    /// Trigger on software start (the default on every detector)
    pub fn internal() -> Self {
        Self("INTERNAL".to_string())
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Detector shutter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShutterState {
    /// Always closed
    Closed,
    /// Always open
    Open,
    /// Opened by the detector for each exposure
    Auto,
}

/// Spectrometer optical port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortType {
    /// Front input
    InputFront,
    /// Side input
    InputSide,
    /// Front output
    OutputFront,
    /// Side output
    OutputSide,
}

impl PortType {
    /// True for the two input ports.
    pub fn is_input(&self) -> bool {
        matches!(self, PortType::InputFront | PortType::InputSide)
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortType::InputFront => write!(f, "INPUT_FRONT"),
            PortType::InputSide => write!(f, "INPUT_SIDE"),
            PortType::OutputFront => write!(f, "OUTPUT_FRONT"),
            PortType::OutputSide => write!(f, "OUTPUT_SIDE"),
        }
    }
}

/// Binning and sub-area used by [`ReadMode::ImageAdvanced`].
///
/// Area bounds are inclusive pixel indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAdvancedParameters {
    /// Horizontal binning factor
    pub horizontal_binning: usize,
    /// Vertical binning factor
    pub vertical_binning: usize,
    /// First column
    pub horizontal_start: usize,
    /// Last column
    pub horizontal_end: usize,
    /// First row
    pub vertical_start: usize,
    /// Last row
    pub vertical_end: usize,
}

/// Static description of what a detector supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConstraints {
    /// Sensor width and height in pixels
    pub size: (usize, usize),
    /// Physical pixel width and height in metres
    pub pixel_size: (f64, f64),
    /// Supported read modes
    pub read_modes: Vec<ReadMode>,
    /// Supported readout speeds in Hz
    pub readout_speeds: Vec<f64>,
    /// Pre-amplifier gains
    pub internal_gains: Vec<f64>,
    /// Supported trigger sources
    pub trigger_modes: Vec<TriggerMode>,
    /// Whether the detector has its own shutter
    pub has_shutter: bool,
    /// Whether the detector has a cooler
    pub has_cooler: bool,
}

/// One grating on the turret.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grating {
    /// Groove density in lines per metre
    pub ruling: f64,
    /// Blaze wavelength in metres
    pub blaze: f64,
    /// Highest reachable center wavelength in metres
    pub wavelength_max: f64,
}

/// One optical port and its slit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortConstraints {
    /// Which port this is
    pub port_type: PortType,
    /// Whether the slit can be driven
    pub is_motorized: bool,
    /// Smallest slit width in metres
    pub slit_min: f64,
    /// Largest slit width in metres
    pub slit_max: f64,
}

/// Static description of the optical bench.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrometerConstraints {
    /// Focal length in metres
    pub focal_length: f64,
    /// Angular deviation in radians
    pub angular_deviation: f64,
    /// Focal plane tilt in radians
    pub focal_tilt: f64,
    /// Gratings on the turret, indexed by position
    pub gratings: Vec<Grating>,
    /// Available ports
    pub ports: Vec<PortConstraints>,
}

impl SpectrometerConstraints {
    /// Constraints for `port`, if the spectrometer has it.
    pub fn port(&self, port: PortType) -> Option<&PortConstraints> {
        self.ports.iter().find(|p| p.port_type == port)
    }

    /// Number of ports on the input side (`true`) or output side (`false`).
    pub fn port_count(&self, input: bool) -> usize {
        self.ports
            .iter()
            .filter(|p| p.port_type.is_input() == input)
            .count()
    }
}
