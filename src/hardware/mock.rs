//! Mock Hardware Implementations
//!
//! Provides simulated spectroscopy hardware for testing without physical devices.
//! All mock devices use async-safe state (tokio locks and atomics).
//!
//! # Available Mocks
//!
//! - `MockDetector` - Simulated CCD with configurable readiness latency, scripted
//!   frames and fault injection
//! - `MockSpectrometer` - Simulated monochromator with a three-grating turret and
//!   four ports
//!
//! # Readiness Model
//!
//! `MockDetector` reports "not ready" for `polls_until_ready` polls after each
//! `start_acquisition()` and ready afterwards. With `polls_until_ready == 0` every
//! first poll succeeds.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::hardware::capabilities::{Detector, ExposureControl, Spectrometer};
use crate::hardware::{
    DetectorConstraints, Frame, Grating, ImageAdvancedParameters, PortConstraints, PortType,
    ReadMode, ShutterState, SpectrometerConstraints, TriggerMode,
};

// =============================================================================
// MockDetector - Simulated CCD
// =============================================================================

/// Mock spectroscopic detector.
///
/// Frames are taken from a scripted queue first; once it is empty a synthetic
/// spectrum (gaussian line on a baseline with shot-like noise) is generated in the
/// shape implied by the current read mode. A cosmic hit can be injected with
/// [`MockDetector::with_cosmic_probability`].
///
/// # Example
///
/// ```rust,ignore
/// let detector = MockDetector::new(1024, 256).with_polls_until_ready(2);
/// detector.start_acquisition().await?;
/// assert!(!detector.get_ready_state().await?);
/// ```
pub struct MockDetector {
    constraints: DetectorConstraints,
    exposure_s: Arc<RwLock<f64>>,
    gain: RwLock<f64>,
    read_mode: RwLock<ReadMode>,
    readout_speed: RwLock<f64>,
    active_tracks: RwLock<Vec<(usize, usize)>>,
    image_advanced: RwLock<ImageAdvancedParameters>,
    trigger_mode: RwLock<TriggerMode>,
    shutter: RwLock<ShutterState>,
    cooler_on: AtomicBool,
    temperature_setpoint: RwLock<f64>,
    polls_until_ready: u32,
    remaining_polls: AtomicU32,
    acquiring: AtomicBool,
    fail_readout: AtomicBool,
    cosmic_probability: f64,
    scripted_frames: Mutex<VecDeque<Frame>>,
    start_count: AtomicU64,
    abort_count: AtomicU64,
    readout_count: AtomicU64,
}

impl MockDetector {
    /// Create a mock detector with a `width x height` sensor, in FVB mode.
    pub fn new(width: usize, height: usize) -> Self {
        let constraints = DetectorConstraints {
            size: (width, height),
            pixel_size: (26e-6, 26e-6),
            read_modes: vec![
                ReadMode::Fvb,
                ReadMode::MultipleTracks,
                ReadMode::Image,
                ReadMode::ImageAdvanced,
            ],
            readout_speeds: vec![50e3, 1e6, 3e6],
            internal_gains: vec![1.0, 2.0, 4.0],
            trigger_modes: vec![
                TriggerMode::internal(),
                TriggerMode("EXTERNAL".to_string()),
            ],
            has_shutter: true,
            has_cooler: true,
        };
        let full_area = ImageAdvancedParameters {
            horizontal_binning: 1,
            vertical_binning: 1,
            horizontal_start: 0,
            horizontal_end: width.saturating_sub(1),
            vertical_start: 0,
            vertical_end: height.saturating_sub(1),
        };
        Self {
            constraints,
            exposure_s: Arc::new(RwLock::new(0.1)),
            gain: RwLock::new(1.0),
            read_mode: RwLock::new(ReadMode::Fvb),
            readout_speed: RwLock::new(50e3),
            active_tracks: RwLock::new(vec![(0, height.saturating_sub(1))]),
            image_advanced: RwLock::new(full_area),
            trigger_mode: RwLock::new(TriggerMode::internal()),
            shutter: RwLock::new(ShutterState::Auto),
            cooler_on: AtomicBool::new(false),
            temperature_setpoint: RwLock::new(203.15),
            polls_until_ready: 0,
            remaining_polls: AtomicU32::new(0),
            acquiring: AtomicBool::new(false),
            fail_readout: AtomicBool::new(false),
            cosmic_probability: 0.0,
            scripted_frames: Mutex::new(VecDeque::new()),
            start_count: AtomicU64::new(0),
            abort_count: AtomicU64::new(0),
            readout_count: AtomicU64::new(0),
        }
    }

    /// Report "not ready" this many times after each start.
    pub fn with_polls_until_ready(mut self, polls: u32) -> Self {
        self.polls_until_ready = polls;
        self
    }

    /// Serve these frames, in order, before falling back to synthetic data.
    pub fn with_frames(self, frames: Vec<Frame>) -> Self {
        Self {
            scripted_frames: Mutex::new(frames.into()),
            ..self
        }
    }

    /// Probability that a synthetic frame carries one cosmic hit.
    pub fn with_cosmic_probability(mut self, probability: f64) -> Self {
        self.cosmic_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Drop shutter and cooler support.
    pub fn without_shutter_and_cooler(mut self) -> Self {
        self.constraints.has_shutter = false;
        self.constraints.has_cooler = false;
        self
    }

    /// Make every subsequent readout fail (or succeed again).
    pub fn set_fail_readout(&self, fail: bool) {
        self.fail_readout.store(fail, Ordering::SeqCst);
    }

    /// Number of `start_acquisition()` calls so far
    pub fn start_count(&self) -> u64 {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Number of `abort_acquisition()` calls so far
    pub fn abort_count(&self) -> u64 {
        self.abort_count.load(Ordering::SeqCst)
    }

    /// Number of successful `get_acquired_data()` calls so far
    pub fn readout_count(&self) -> u64 {
        self.readout_count.load(Ordering::SeqCst)
    }

    /// Whether an exposure is in progress
    pub fn is_acquiring(&self) -> bool {
        self.acquiring.load(Ordering::SeqCst)
    }

    async fn output_shape(&self) -> (usize, usize) {
        let (width, height) = self.constraints.size;
        match *self.read_mode.read().await {
            ReadMode::Fvb => (width, 1),
            ReadMode::MultipleTracks => (width, self.active_tracks.read().await.len().max(1)),
            ReadMode::Image => (width, height),
            ReadMode::ImageAdvanced => {
                let p = *self.image_advanced.read().await;
                let columns = p.horizontal_end.saturating_sub(p.horizontal_start) + 1;
                let rows = p.vertical_end.saturating_sub(p.vertical_start) + 1;
                (
                    columns / p.horizontal_binning.max(1),
                    rows / p.vertical_binning.max(1),
                )
            }
        }
    }

    async fn synthetic_frame(&self) -> Frame {
        let (width, height) = self.output_shape().await;
        let exposure = *self.exposure_s.read().await;
        let gain = *self.gain.read().await;
        let center = width as f64 / 2.0;
        let sigma = (width as f64 / 40.0).max(1.0);

        let mut rng = rand::thread_rng();
        let mut data = Vec::with_capacity(width * height);
        for _ in 0..height {
            for x in 0..width {
                let line = 1000.0 * (-((x as f64 - center).powi(2)) / (2.0 * sigma * sigma)).exp();
                let signal = 100.0 + line * exposure * gain;
                data.push(signal + rng.gen_range(-1.0..1.0) * signal.sqrt());
            }
        }
        if !data.is_empty() && rng.gen_bool(self.cosmic_probability) {
            let hit = rng.gen_range(0..data.len());
            data[hit] += 50_000.0;
        }
        Frame {
            width,
            height,
            data,
        }
    }
}

impl Default for MockDetector {
    fn default() -> Self {
        Self::new(1024, 256)
    }
}

#[async_trait]
impl ExposureControl for MockDetector {
    async fn set_exposure(&self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds <= 0.0 {
            bail!("exposure must be positive, got {seconds}");
        }
        *self.exposure_s.write().await = seconds;
        Ok(())
    }

    async fn get_exposure(&self) -> Result<f64> {
        Ok(*self.exposure_s.read().await)
    }
}

#[async_trait]
impl Detector for MockDetector {
    fn constraints(&self) -> DetectorConstraints {
        self.constraints.clone()
    }

    async fn start_acquisition(&self) -> Result<()> {
        if self.acquiring.swap(true, Ordering::SeqCst) {
            bail!("acquisition already in progress");
        }
        self.remaining_polls
            .store(self.polls_until_ready, Ordering::SeqCst);
        self.start_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_acquisition(&self) -> Result<()> {
        self.acquiring.store(false, Ordering::SeqCst);
        self.abort_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_ready_state(&self) -> Result<bool> {
        if !self.acquiring.load(Ordering::SeqCst) {
            bail!("no acquisition in progress");
        }
        let pending = self
            .remaining_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(!pending)
    }

    async fn get_acquired_data(&self) -> Result<Frame> {
        if self.fail_readout.load(Ordering::SeqCst) {
            self.acquiring.store(false, Ordering::SeqCst);
            bail!("readout failed: detector did not answer");
        }
        let scripted = self.scripted_frames.lock().await.pop_front();
        let frame = match scripted {
            Some(frame) => frame,
            None => self.synthetic_frame().await,
        };
        self.acquiring.store(false, Ordering::SeqCst);
        self.readout_count.fetch_add(1, Ordering::SeqCst);
        Ok(frame)
    }

    async fn get_gain(&self) -> Result<f64> {
        Ok(*self.gain.read().await)
    }

    async fn set_gain(&self, gain: f64) -> Result<()> {
        *self.gain.write().await = gain;
        Ok(())
    }

    async fn get_read_mode(&self) -> Result<ReadMode> {
        Ok(*self.read_mode.read().await)
    }

    async fn set_read_mode(&self, mode: ReadMode) -> Result<()> {
        *self.read_mode.write().await = mode;
        Ok(())
    }

    async fn get_readout_speed(&self) -> Result<f64> {
        Ok(*self.readout_speed.read().await)
    }

    async fn set_readout_speed(&self, speed: f64) -> Result<()> {
        *self.readout_speed.write().await = speed;
        Ok(())
    }

    async fn get_active_tracks(&self) -> Result<Vec<(usize, usize)>> {
        Ok(self.active_tracks.read().await.clone())
    }

    async fn set_active_tracks(&self, tracks: Vec<(usize, usize)>) -> Result<()> {
        *self.active_tracks.write().await = tracks;
        Ok(())
    }

    async fn get_image_advanced_parameters(&self) -> Result<ImageAdvancedParameters> {
        Ok(*self.image_advanced.read().await)
    }

    async fn set_image_advanced_parameters(&self, params: ImageAdvancedParameters) -> Result<()> {
        *self.image_advanced.write().await = params;
        Ok(())
    }

    async fn get_trigger_mode(&self) -> Result<TriggerMode> {
        Ok(self.trigger_mode.read().await.clone())
    }

    async fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()> {
        *self.trigger_mode.write().await = mode;
        Ok(())
    }

    async fn get_shutter_state(&self) -> Result<ShutterState> {
        if !self.constraints.has_shutter {
            bail!("detector has no shutter");
        }
        Ok(*self.shutter.read().await)
    }

    async fn set_shutter_state(&self, state: ShutterState) -> Result<()> {
        if !self.constraints.has_shutter {
            bail!("detector has no shutter");
        }
        *self.shutter.write().await = state;
        Ok(())
    }

    async fn get_cooler_on(&self) -> Result<bool> {
        if !self.constraints.has_cooler {
            bail!("detector has no cooler");
        }
        Ok(self.cooler_on.load(Ordering::SeqCst))
    }

    async fn set_cooler_on(&self, on: bool) -> Result<()> {
        if !self.constraints.has_cooler {
            bail!("detector has no cooler");
        }
        self.cooler_on.store(on, Ordering::SeqCst);
        Ok(())
    }

    async fn get_temperature(&self) -> Result<f64> {
        if !self.constraints.has_cooler {
            bail!("detector has no cooler");
        }
        // Sensor sits at the setpoint when cooling, at room temperature otherwise.
        if self.cooler_on.load(Ordering::SeqCst) {
            Ok(*self.temperature_setpoint.read().await)
        } else {
            Ok(293.15)
        }
    }

    async fn get_temperature_setpoint(&self) -> Result<f64> {
        if !self.constraints.has_cooler {
            bail!("detector has no cooler");
        }
        Ok(*self.temperature_setpoint.read().await)
    }

    async fn set_temperature_setpoint(&self, kelvin: f64) -> Result<()> {
        if !self.constraints.has_cooler {
            bail!("detector has no cooler");
        }
        *self.temperature_setpoint.write().await = kelvin;
        Ok(())
    }
}

// =============================================================================
// MockSpectrometer - Simulated Monochromator
// =============================================================================

/// Mock monochromator.
///
/// 303 mm focal length, three gratings (150, 600 and 1200 lines/mm), motorized input
/// slits on both input ports and fixed slits on the outputs.
pub struct MockSpectrometer {
    constraints: SpectrometerConstraints,
    grating_index: RwLock<usize>,
    wavelength: RwLock<f64>,
    input_port: RwLock<PortType>,
    output_port: RwLock<PortType>,
    slit_widths: RwLock<HashMap<PortType, f64>>,
}

impl MockSpectrometer {
    /// Create a mock spectrometer centred at 500 nm on grating 0.
    pub fn new() -> Self {
        let ports = vec![
            PortConstraints {
                port_type: PortType::InputFront,
                is_motorized: true,
                slit_min: 10e-6,
                slit_max: 2.5e-3,
            },
            PortConstraints {
                port_type: PortType::InputSide,
                is_motorized: true,
                slit_min: 10e-6,
                slit_max: 2.5e-3,
            },
            PortConstraints {
                port_type: PortType::OutputFront,
                is_motorized: false,
                slit_min: 0.0,
                slit_max: 0.0,
            },
            PortConstraints {
                port_type: PortType::OutputSide,
                is_motorized: false,
                slit_min: 0.0,
                slit_max: 0.0,
            },
        ];
        let slit_widths = ports
            .iter()
            .map(|p| (p.port_type, if p.is_motorized { 100e-6 } else { 0.0 }))
            .collect();
        Self {
            constraints: SpectrometerConstraints {
                focal_length: 0.303,
                angular_deviation: 0.3246,
                focal_tilt: 0.0,
                gratings: vec![
                    Grating {
                        ruling: 150e3,
                        blaze: 500e-9,
                        wavelength_max: 6000e-9,
                    },
                    Grating {
                        ruling: 600e3,
                        blaze: 500e-9,
                        wavelength_max: 1500e-9,
                    },
                    Grating {
                        ruling: 1200e3,
                        blaze: 500e-9,
                        wavelength_max: 1000e-9,
                    },
                ],
                ports,
            },
            grating_index: RwLock::new(0),
            wavelength: RwLock::new(500e-9),
            input_port: RwLock::new(PortType::InputFront),
            output_port: RwLock::new(PortType::OutputFront),
            slit_widths: RwLock::new(slit_widths),
        }
    }

    /// Replace the bench description (ports, gratings, optics).
    pub fn with_constraints(mut self, constraints: SpectrometerConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    fn constraints(&self) -> SpectrometerConstraints {
        self.constraints.clone()
    }

    async fn get_grating_index(&self) -> Result<usize> {
        Ok(*self.grating_index.read().await)
    }

    async fn set_grating_index(&self, index: usize) -> Result<()> {
        if index >= self.constraints.gratings.len() {
            bail!("no grating at turret position {index}");
        }
        *self.grating_index.write().await = index;
        Ok(())
    }

    async fn get_wavelength(&self) -> Result<f64> {
        Ok(*self.wavelength.read().await)
    }

    async fn set_wavelength(&self, wavelength: f64) -> Result<()> {
        *self.wavelength.write().await = wavelength;
        Ok(())
    }

    async fn get_input_port(&self) -> Result<PortType> {
        Ok(*self.input_port.read().await)
    }

    async fn set_input_port(&self, port: PortType) -> Result<()> {
        *self.input_port.write().await = port;
        Ok(())
    }

    async fn get_output_port(&self) -> Result<PortType> {
        Ok(*self.output_port.read().await)
    }

    async fn set_output_port(&self, port: PortType) -> Result<()> {
        *self.output_port.write().await = port;
        Ok(())
    }

    async fn get_slit_width(&self, port: PortType) -> Result<f64> {
        self.slit_widths
            .read()
            .await
            .get(&port)
            .copied()
            .ok_or_else(|| anyhow!("port {port} not present"))
    }

    async fn set_slit_width(&self, port: PortType, width: f64) -> Result<()> {
        let mut widths = self.slit_widths.write().await;
        match widths.get_mut(&port) {
            Some(slot) => {
                *slot = width;
                Ok(())
            }
            None => bail!("port {port} not present"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_detector_ready_after_configured_polls() {
        let detector = MockDetector::new(16, 4).with_polls_until_ready(2);
        detector.start_acquisition().await.unwrap();
        assert!(!detector.get_ready_state().await.unwrap());
        assert!(!detector.get_ready_state().await.unwrap());
        assert!(detector.get_ready_state().await.unwrap());
        let frame = detector.get_acquired_data().await.unwrap();
        assert_eq!(frame.shape(), (16, 1));
        assert!(!detector.is_acquiring());
    }

    #[tokio::test]
    async fn test_mock_detector_serves_scripted_frames_first() {
        let detector = MockDetector::new(4, 1).with_frames(vec![
            Frame::filled(4, 1, 7.0),
            Frame::filled(4, 1, 9.0),
        ]);
        for expected in [7.0, 9.0] {
            detector.start_acquisition().await.unwrap();
            assert!(detector.get_ready_state().await.unwrap());
            let frame = detector.get_acquired_data().await.unwrap();
            assert!(frame.data.iter().all(|&v| v == expected));
        }
        assert_eq!(detector.start_count(), 2);
        assert_eq!(detector.readout_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_detector_rejects_double_start() {
        let detector = MockDetector::new(4, 1);
        detector.start_acquisition().await.unwrap();
        assert!(detector.start_acquisition().await.is_err());
        detector.abort_acquisition().await.unwrap();
        assert!(detector.start_acquisition().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_detector_frame_shape_follows_read_mode() {
        let detector = MockDetector::new(32, 8);
        detector.set_read_mode(ReadMode::Image).await.unwrap();
        detector.start_acquisition().await.unwrap();
        let frame = detector.get_acquired_data().await.unwrap();
        assert_eq!(frame.shape(), (32, 8));

        detector
            .set_active_tracks(vec![(0, 1), (4, 5), (6, 7)])
            .await
            .unwrap();
        detector.set_read_mode(ReadMode::MultipleTracks).await.unwrap();
        detector.start_acquisition().await.unwrap();
        let frame = detector.get_acquired_data().await.unwrap();
        assert_eq!(frame.shape(), (32, 3));
    }

    #[tokio::test]
    async fn test_mock_detector_readout_fault() {
        let detector = MockDetector::new(4, 1);
        detector.set_fail_readout(true);
        detector.start_acquisition().await.unwrap();
        assert!(detector.get_acquired_data().await.is_err());
        assert_eq!(detector.readout_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_spectrometer_slits() {
        let spectrometer = MockSpectrometer::new();
        spectrometer
            .set_slit_width(PortType::InputSide, 50e-6)
            .await
            .unwrap();
        assert_eq!(
            spectrometer.get_slit_width(PortType::InputSide).await.unwrap(),
            50e-6
        );
        assert!(spectrometer.set_grating_index(3).await.is_err());
    }
}
