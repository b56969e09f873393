//! Hardware Capabilities
//!
//! Capability traits for the two hardware roles of a spectroscopy setup:
//!
//! - [`Detector`]: the camera behind the exit port (with [`ExposureControl`])
//! - [`Spectrometer`]: the monochromator with its grating turret, ports and slits
//!
//! Components receive these as `Arc<dyn Detector>` / `Arc<dyn Spectrometer>` at
//! construction time.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; implementations use interior mutability for state
//!
//! Value validation against the hardware constraints happens in
//! [`crate::spectrum::SpectrumController`], not in the drivers.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn single_exposure(detector: &dyn Detector, seconds: f64) -> Result<Frame> {
//!     detector.set_exposure(seconds).await?;
//!     detector.start_acquisition().await?;
//!     while !detector.get_ready_state().await? {
//!         tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
//!     }
//!     detector.get_acquired_data().await
//! }
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::hardware::{
    DetectorConstraints, Frame, ImageAdvancedParameters, PortType, ReadMode, ShutterState,
    SpectrometerConstraints, TriggerMode,
};

/// Capability: Exposure/Integration Time Control
///
/// Devices with configurable exposure time.
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set exposure/integration time
    ///
    /// # Arguments
    /// * `seconds` - Exposure time in seconds
    async fn set_exposure(&self, seconds: f64) -> Result<()>;

    /// Get current exposure setting in seconds
    async fn get_exposure(&self) -> Result<f64>;
}

/// Capability: Spectroscopic Detector
///
/// # Contract
/// - `start_acquisition()` starts one exposure and returns without waiting for it
/// - `get_ready_state()` is a cheap poll; `true` once the exposure can be read out
/// - `get_acquired_data()` is only meaningful after `get_ready_state()` returned `true`
/// - `abort_acquisition()` is safe to call when nothing is running
///
/// Shutter and cooler methods have default implementations that fail, for detectors
/// without that hardware.
#[async_trait]
pub trait Detector: ExposureControl {
    /// Static capabilities of the detector
    fn constraints(&self) -> DetectorConstraints;

    /// Start one exposure (non-blocking)
    async fn start_acquisition(&self) -> Result<()>;

    /// Abort the exposure in progress
    async fn abort_acquisition(&self) -> Result<()>;

    /// Whether the current exposure is ready to be read out
    async fn get_ready_state(&self) -> Result<bool>;

    /// Read out the last exposure
    async fn get_acquired_data(&self) -> Result<Frame>;

    /// Current pre-amplifier gain
    async fn get_gain(&self) -> Result<f64>;

    /// Set the pre-amplifier gain
    async fn set_gain(&self, gain: f64) -> Result<()>;

    /// Current read mode
    async fn get_read_mode(&self) -> Result<ReadMode>;

    /// Set the read mode
    async fn set_read_mode(&self, mode: ReadMode) -> Result<()>;

    /// Current readout speed in Hz
    async fn get_readout_speed(&self) -> Result<f64>;

    /// Set the readout speed in Hz
    async fn set_readout_speed(&self, speed: f64) -> Result<()>;

    /// Row pairs `(start, end)` read out in multi-track mode
    async fn get_active_tracks(&self) -> Result<Vec<(usize, usize)>>;

    /// Set the multi-track row pairs
    async fn set_active_tracks(&self, tracks: Vec<(usize, usize)>) -> Result<()>;

    /// Current image-advanced binning and area
    async fn get_image_advanced_parameters(&self) -> Result<ImageAdvancedParameters>;

    /// Set image-advanced binning and area
    async fn set_image_advanced_parameters(&self, params: ImageAdvancedParameters)
        -> Result<()>;

    /// Current trigger source
    async fn get_trigger_mode(&self) -> Result<TriggerMode>;

    /// Set the trigger source
    async fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()>;

    /// Current shutter state
    async fn get_shutter_state(&self) -> Result<ShutterState> {
        bail!("detector has no shutter")
    }

    /// Set the shutter state
    async fn set_shutter_state(&self, _state: ShutterState) -> Result<()> {
        bail!("detector has no shutter")
    }

    /// Whether the cooler is running
    async fn get_cooler_on(&self) -> Result<bool> {
        bail!("detector has no cooler")
    }

    /// Switch the cooler
    async fn set_cooler_on(&self, _on: bool) -> Result<()> {
        bail!("detector has no cooler")
    }

    /// Sensor temperature in Kelvin
    async fn get_temperature(&self) -> Result<f64> {
        bail!("detector has no cooler")
    }

    /// Cooler setpoint in Kelvin
    async fn get_temperature_setpoint(&self) -> Result<f64> {
        bail!("detector has no cooler")
    }

    /// Set the cooler setpoint in Kelvin
    async fn set_temperature_setpoint(&self, _kelvin: f64) -> Result<()> {
        bail!("detector has no cooler")
    }
}

/// Capability: Spectrometer (monochromator)
///
/// Wavelengths and slit widths are in metres.
#[async_trait]
pub trait Spectrometer: Send + Sync {
    /// Static description of the optical bench
    fn constraints(&self) -> SpectrometerConstraints;

    /// Index of the grating in the beam
    async fn get_grating_index(&self) -> Result<usize>;

    /// Rotate the turret to grating `index`
    async fn set_grating_index(&self, index: usize) -> Result<()>;

    /// Center wavelength as reported by the hardware
    async fn get_wavelength(&self) -> Result<f64>;

    /// Move the grating to a center wavelength
    async fn set_wavelength(&self, wavelength: f64) -> Result<()>;

    /// Active input port
    async fn get_input_port(&self) -> Result<PortType>;

    /// Select the input port
    async fn set_input_port(&self, port: PortType) -> Result<()>;

    /// Active output port
    async fn get_output_port(&self) -> Result<PortType>;

    /// Select the output port
    async fn set_output_port(&self, port: PortType) -> Result<()>;

    /// Slit width of `port`
    async fn get_slit_width(&self, port: PortType) -> Result<f64>;

    /// Drive the slit of `port`
    async fn set_slit_width(&self, port: PortType, width: f64) -> Result<()>;
}
