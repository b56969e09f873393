//! Validated access to spectrometer and detector settings.
//!
//! [`SpectrumController`] sits between callers and the hardware traits. Every setter
//! checks the value against the hardware constraints and takes the shared
//! [`ModuleLock`] for the duration of the call, so nothing is changed while an
//! acquisition session holds it. Shutter, cooler and temperature setpoint are the
//! exception: they stay reachable during a session.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::wavelength::{wavelength_axis, DispersionGeometry};
use crate::acquisition::{AcquisitionParameters, ModuleLock};
use crate::data::storage::AcquisitionMetadata;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{Detector, Spectrometer};
use crate::hardware::{
    DetectorConstraints, ImageAdvancedParameters, PortType, ReadMode, ShutterState,
    SpectrometerConstraints, TriggerMode,
};

/// Settings front-end for one detector and one spectrometer.
pub struct SpectrumController {
    detector: Arc<dyn Detector>,
    spectrometer: Arc<dyn Spectrometer>,
    lock: ModuleLock,
    wavelength_calibration: RwLock<f64>,
}

impl SpectrumController {
    /// Create a controller sharing `lock` with the acquisition actor.
    pub fn new(
        detector: Arc<dyn Detector>,
        spectrometer: Arc<dyn Spectrometer>,
        lock: ModuleLock,
    ) -> Self {
        Self {
            detector,
            spectrometer,
            lock,
            wavelength_calibration: RwLock::new(0.0),
        }
    }

    /// Start from a known calibration offset in metres.
    pub fn with_wavelength_calibration(mut self, offset: f64) -> Self {
        self.wavelength_calibration = RwLock::new(offset);
        self
    }

    /// Static capabilities of the detector.
    pub fn detector_constraints(&self) -> DetectorConstraints {
        self.detector.constraints()
    }

    /// Static description of the optical bench.
    pub fn spectrometer_constraints(&self) -> SpectrometerConstraints {
        self.spectrometer.constraints()
    }

    // =========================================================================
    // Grating and wavelength
    // =========================================================================

    /// Grating in the beam.
    pub async fn grating_index(&self) -> AppResult<usize> {
        self.spectrometer
            .get_grating_index()
            .await
            .map_err(DaqError::hardware)
    }

    /// Rotate the turret to grating `index`.
    pub async fn set_grating_index(&self, index: usize) -> AppResult<()> {
        let _guard = self.lock.try_lock("change the grating")?;
        let count = self.spectrometer.constraints().gratings.len();
        if index >= count {
            return Err(DaqError::Configuration(format!(
                "grating index {index} out of range 0..{count}"
            )));
        }
        if self.grating_index().await? == index {
            return Ok(());
        }
        self.spectrometer
            .set_grating_index(index)
            .await
            .map_err(DaqError::hardware)?;
        info!(grating = index, "Grating changed");
        Ok(())
    }

    /// Center wavelength in metres, calibration offset included.
    pub async fn center_wavelength(&self) -> AppResult<f64> {
        let hardware = self
            .spectrometer
            .get_wavelength()
            .await
            .map_err(DaqError::hardware)?;
        Ok(hardware + *self.wavelength_calibration.read().await)
    }

    /// Move to `wavelength` (calibrated, metres).
    ///
    /// Zero selects the zero diffraction order and is sent to the hardware as is.
    /// Otherwise the calibration offset is removed first and the hardware value must
    /// lie in `0..wavelength_max` of the current grating.
    pub async fn set_center_wavelength(&self, wavelength: f64) -> AppResult<()> {
        let _guard = self.lock.try_lock("change the center wavelength")?;
        let calibration = *self.wavelength_calibration.read().await;
        let hardware = if wavelength == 0.0 {
            0.0
        } else {
            wavelength - calibration
        };

        let index = self.grating_index().await?;
        let grating = self
            .spectrometer
            .constraints()
            .gratings
            .get(index)
            .copied()
            .ok_or_else(|| DaqError::Configuration(format!("no grating at index {index}")))?;
        if !hardware.is_finite() || hardware < 0.0 || hardware >= grating.wavelength_max {
            return Err(DaqError::Configuration(format!(
                "center wavelength {hardware:e} m outside 0..{:e} m for grating {index}",
                grating.wavelength_max
            )));
        }

        self.spectrometer
            .set_wavelength(hardware)
            .await
            .map_err(DaqError::hardware)?;
        debug!(wavelength = hardware, "Center wavelength set");
        Ok(())
    }

    /// Calibration offset in metres.
    pub async fn wavelength_calibration(&self) -> f64 {
        *self.wavelength_calibration.read().await
    }

    /// Offset added to every wavelength reported by the hardware.
    pub async fn set_wavelength_calibration(&self, offset: f64) -> AppResult<()> {
        let _guard = self.lock.try_lock("change the wavelength calibration")?;
        if !offset.is_finite() {
            return Err(DaqError::Configuration(
                "wavelength calibration must be finite".to_string(),
            ));
        }
        *self.wavelength_calibration.write().await = offset;
        Ok(())
    }

    /// Calibrated wavelength of every detector column.
    pub async fn wavelength_spectrum(&self) -> AppResult<Vec<f64>> {
        let optics = self.spectrometer.constraints();
        let sensor = self.detector.constraints();
        let index = self.grating_index().await?;
        let grating = optics
            .gratings
            .get(index)
            .ok_or_else(|| DaqError::Configuration(format!("no grating at index {index}")))?;

        let geometry = DispersionGeometry {
            focal_length: optics.focal_length,
            angular_deviation: optics.angular_deviation,
            focal_tilt: optics.focal_tilt,
            ruling: grating.ruling,
            pixel_width: sensor.pixel_size.0,
            pixel_count: sensor.size.0,
        };
        let hardware = self
            .spectrometer
            .get_wavelength()
            .await
            .map_err(DaqError::hardware)?;
        let calibration = *self.wavelength_calibration.read().await;

        let axis = wavelength_axis(&geometry, hardware)?;
        Ok(axis.into_iter().map(|w| w + calibration).collect())
    }

    // =========================================================================
    // Ports and slits
    // =========================================================================

    /// Active input port.
    pub async fn input_port(&self) -> AppResult<PortType> {
        self.spectrometer
            .get_input_port()
            .await
            .map_err(DaqError::hardware)
    }

    /// Active output port.
    pub async fn output_port(&self) -> AppResult<PortType> {
        self.spectrometer
            .get_output_port()
            .await
            .map_err(DaqError::hardware)
    }

    /// Flip the input mirror to `port`.
    pub async fn set_input_port(&self, port: PortType) -> AppResult<()> {
        let _guard = self.lock.try_lock("change the input port")?;
        self.check_switchable(port, true)?;
        if self.input_port().await? == port {
            return Ok(());
        }
        self.spectrometer
            .set_input_port(port)
            .await
            .map_err(DaqError::hardware)
    }

    /// Flip the output mirror to `port`.
    pub async fn set_output_port(&self, port: PortType) -> AppResult<()> {
        let _guard = self.lock.try_lock("change the output port")?;
        self.check_switchable(port, false)?;
        if self.output_port().await? == port {
            return Ok(());
        }
        self.spectrometer
            .set_output_port(port)
            .await
            .map_err(DaqError::hardware)
    }

    fn check_switchable(&self, port: PortType, input: bool) -> AppResult<()> {
        let side = if input { "input" } else { "output" };
        if port.is_input() != input {
            return Err(DaqError::Configuration(format!(
                "{port} is not an {side} port"
            )));
        }
        let constraints = self.spectrometer.constraints();
        if constraints.port_count(input) < 2 {
            return Err(DaqError::NotSupported(format!(
                "{side} side has no flipper mirror"
            )));
        }
        if constraints.port(port).is_none() {
            return Err(DaqError::Configuration(format!(
                "port {port} does not exist on this spectrometer"
            )));
        }
        Ok(())
    }

    /// Slit width of `port` in metres.
    pub async fn slit_width(&self, port: PortType) -> AppResult<f64> {
        if self.spectrometer.constraints().port(port).is_none() {
            return Err(DaqError::Configuration(format!(
                "port {port} does not exist on this spectrometer"
            )));
        }
        self.spectrometer
            .get_slit_width(port)
            .await
            .map_err(DaqError::hardware)
    }

    /// Drive the slit of a motorized port to `width` metres.
    pub async fn set_slit_width(&self, port: PortType, width: f64) -> AppResult<()> {
        let _guard = self.lock.try_lock("change a slit width")?;
        let constraints = self.spectrometer.constraints();
        let slit = constraints.port(port).ok_or_else(|| {
            DaqError::Configuration(format!("port {port} does not exist on this spectrometer"))
        })?;
        if !slit.is_motorized {
            return Err(DaqError::NotSupported(format!(
                "slit of port {port} is not motorized"
            )));
        }
        if !(slit.slit_min..=slit.slit_max).contains(&width) {
            return Err(DaqError::Configuration(format!(
                "slit width {width:e} m outside {:e}..={:e} m",
                slit.slit_min, slit.slit_max
            )));
        }
        self.spectrometer
            .set_slit_width(port, width)
            .await
            .map_err(DaqError::hardware)
    }

    // =========================================================================
    // Detector readout
    // =========================================================================

    /// Current read mode.
    pub async fn read_mode(&self) -> AppResult<ReadMode> {
        self.detector
            .get_read_mode()
            .await
            .map_err(DaqError::hardware)
    }

    /// Select a read mode supported by the detector.
    pub async fn set_read_mode(&self, mode: ReadMode) -> AppResult<()> {
        let _guard = self.lock.try_lock("change the read mode")?;
        if !self.detector.constraints().read_modes.contains(&mode) {
            return Err(DaqError::Configuration(format!(
                "read mode {mode} not supported by the detector"
            )));
        }
        self.detector
            .set_read_mode(mode)
            .await
            .map_err(DaqError::hardware)
    }

    /// Current readout speed in Hz.
    pub async fn readout_speed(&self) -> AppResult<f64> {
        self.detector
            .get_readout_speed()
            .await
            .map_err(DaqError::hardware)
    }

    /// Select the supported readout speed closest to `speed`; returns it.
    pub async fn set_readout_speed(&self, speed: f64) -> AppResult<f64> {
        let _guard = self.lock.try_lock("change the readout speed")?;
        let nearest = self
            .detector
            .constraints()
            .readout_speeds
            .into_iter()
            .min_by(|a, b| (a - speed).abs().total_cmp(&(b - speed).abs()))
            .ok_or_else(|| DaqError::NotSupported("detector lists no readout speeds".into()))?;
        self.detector
            .set_readout_speed(nearest)
            .await
            .map_err(DaqError::hardware)?;
        Ok(nearest)
    }

    /// Multi-track row pairs.
    pub async fn active_tracks(&self) -> AppResult<Vec<(usize, usize)>> {
        self.detector
            .get_active_tracks()
            .await
            .map_err(DaqError::hardware)
    }

    /// Set the multi-track row limits from a flat list of rows.
    ///
    /// An odd count is completed with the last sensor row; rows are then paired in
    /// order.
    pub async fn set_active_tracks(&self, rows: &[usize]) -> AppResult<Vec<(usize, usize)>> {
        let _guard = self.lock.try_lock("change the active tracks")?;
        let height = self.detector.constraints().size.1;
        if height == 0 {
            return Err(DaqError::NotSupported("detector has no rows".into()));
        }
        if let Some(row) = rows.iter().find(|&&r| r >= height) {
            return Err(DaqError::Configuration(format!(
                "track row {row} outside 0..{height}"
            )));
        }

        let mut rows = rows.to_vec();
        if rows.len() % 2 != 0 {
            rows.push(height - 1);
        }
        let tracks: Vec<(usize, usize)> = rows.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        self.detector
            .set_active_tracks(tracks.clone())
            .await
            .map_err(DaqError::hardware)?;
        Ok(tracks)
    }

    /// Current image-advanced binning and area.
    pub async fn image_advanced(&self) -> AppResult<ImageAdvancedParameters> {
        self.detector
            .get_image_advanced_parameters()
            .await
            .map_err(DaqError::hardware)
    }

    /// Set binning and readout area.
    ///
    /// Bounds are inclusive and must be sorted within the sensor. Each binning must
    /// be smaller than the sensor on its axis. The area end is pulled in so that the
    /// area is a whole number of bins; the applied parameters are returned.
    pub async fn set_image_advanced(
        &self,
        params: ImageAdvancedParameters,
    ) -> AppResult<ImageAdvancedParameters> {
        let _guard = self.lock.try_lock("change the image area")?;
        let (width, height) = self.detector.constraints().size;

        if !(params.horizontal_binning > 0 && params.horizontal_binning < width)
            || !(params.vertical_binning > 0 && params.vertical_binning < height)
        {
            return Err(DaqError::Configuration(format!(
                "binning {}x{} outside the {width}x{height} sensor",
                params.horizontal_binning, params.vertical_binning
            )));
        }
        if !(params.horizontal_start < params.horizontal_end && params.horizontal_end < width) {
            return Err(DaqError::Configuration(format!(
                "horizontal area {}..={} not sorted or outside 0..{width}",
                params.horizontal_start, params.horizontal_end
            )));
        }
        if !(params.vertical_start < params.vertical_end && params.vertical_end < height) {
            return Err(DaqError::Configuration(format!(
                "vertical area {}..={} not sorted or outside 0..{height}",
                params.vertical_start, params.vertical_end
            )));
        }

        let horizontal_end = whole_bins_end(
            params.horizontal_start,
            params.horizontal_end,
            params.horizontal_binning,
        )
        .ok_or_else(|| DaqError::Configuration("horizontal area smaller than one bin".into()))?;
        let vertical_end = whole_bins_end(
            params.vertical_start,
            params.vertical_end,
            params.vertical_binning,
        )
        .ok_or_else(|| DaqError::Configuration("vertical area smaller than one bin".into()))?;

        let applied = ImageAdvancedParameters {
            horizontal_end,
            vertical_end,
            ..params
        };
        self.detector
            .set_image_advanced_parameters(applied)
            .await
            .map_err(DaqError::hardware)?;
        Ok(applied)
    }

    /// Current pre-amplifier gain.
    pub async fn gain(&self) -> AppResult<f64> {
        self.detector.get_gain().await.map_err(DaqError::hardware)
    }

    /// Set one of the detector's internal pre-amplifier gains.
    pub async fn set_gain(&self, gain: f64) -> AppResult<()> {
        let _guard = self.lock.try_lock("change the gain")?;
        if !self.detector.constraints().internal_gains.contains(&gain) {
            return Err(DaqError::Configuration(format!(
                "gain {gain} is not an internal gain of the detector"
            )));
        }
        self.detector
            .set_gain(gain)
            .await
            .map_err(DaqError::hardware)
    }

    /// Current trigger source.
    pub async fn trigger_mode(&self) -> AppResult<TriggerMode> {
        self.detector
            .get_trigger_mode()
            .await
            .map_err(DaqError::hardware)
    }

    /// Select a trigger source supported by the detector.
    pub async fn set_trigger_mode(&self, mode: TriggerMode) -> AppResult<()> {
        let _guard = self.lock.try_lock("change the trigger mode")?;
        if !self.detector.constraints().trigger_modes.contains(&mode) {
            return Err(DaqError::Configuration(format!(
                "trigger mode {mode} not supported by the detector"
            )));
        }
        self.detector
            .set_trigger_mode(mode)
            .await
            .map_err(DaqError::hardware)
    }

    // =========================================================================
    // Shutter and cooling
    // =========================================================================

    fn require_shutter(&self) -> AppResult<()> {
        if self.detector.constraints().has_shutter {
            Ok(())
        } else {
            Err(DaqError::NotSupported("detector has no shutter".into()))
        }
    }

    fn require_cooler(&self) -> AppResult<()> {
        if self.detector.constraints().has_cooler {
            Ok(())
        } else {
            Err(DaqError::NotSupported("detector has no cooler".into()))
        }
    }

    /// Shutter state; needs a detector shutter.
    pub async fn shutter_state(&self) -> AppResult<ShutterState> {
        self.require_shutter()?;
        self.detector
            .get_shutter_state()
            .await
            .map_err(DaqError::hardware)
    }

    /// Set the shutter state; needs a detector shutter.
    pub async fn set_shutter_state(&self, state: ShutterState) -> AppResult<()> {
        self.require_shutter()?;
        self.detector
            .set_shutter_state(state)
            .await
            .map_err(DaqError::hardware)
    }

    /// Whether the cooler runs.
    pub async fn cooler_on(&self) -> AppResult<bool> {
        self.require_cooler()?;
        self.detector
            .get_cooler_on()
            .await
            .map_err(DaqError::hardware)
    }

    /// Switch the cooler.
    pub async fn set_cooler_on(&self, on: bool) -> AppResult<()> {
        self.require_cooler()?;
        self.detector
            .set_cooler_on(on)
            .await
            .map_err(DaqError::hardware)?;
        info!(cooler = on, "Cooler switched");
        Ok(())
    }

    /// Sensor temperature in Kelvin.
    pub async fn camera_temperature(&self) -> AppResult<f64> {
        self.require_cooler()?;
        self.detector
            .get_temperature()
            .await
            .map_err(DaqError::hardware)
    }

    /// Cooler setpoint in Kelvin.
    pub async fn temperature_setpoint(&self) -> AppResult<f64> {
        self.require_cooler()?;
        self.detector
            .get_temperature_setpoint()
            .await
            .map_err(DaqError::hardware)
    }

    /// Cooler setpoint in Kelvin; must be positive.
    pub async fn set_temperature_setpoint(&self, kelvin: f64) -> AppResult<()> {
        self.require_cooler()?;
        if !kelvin.is_finite() || kelvin <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "temperature setpoint {kelvin} K must be positive"
            )));
        }
        self.detector
            .set_temperature_setpoint(kelvin)
            .await
            .map_err(DaqError::hardware)
    }

    /// Settings recorded alongside saved data.
    pub async fn metadata(
        &self,
        parameters: &AcquisitionParameters,
    ) -> AppResult<AcquisitionMetadata> {
        Ok(AcquisitionMetadata {
            mode: parameters.mode,
            camera_gain: self.gain().await?,
            readout_speed: self.readout_speed().await?,
            exposure_time: parameters.exposure_time,
            scan_delay: parameters.scan_delay,
            accumulation_delay: parameters.accumulation_delay,
            number_of_scans: parameters.number_of_scans,
            number_accumulated_scans: parameters.number_accumulated_scans,
            grating_index: self.grating_index().await?,
            center_wavelength: self.center_wavelength().await?,
            wavelength_calibration: self.wavelength_calibration().await,
            timestamp: chrono::Utc::now(),
        })
    }
}

/// Last index of the largest run of whole `bin`s starting at `start` and ending no
/// later than `end`.
fn whole_bins_end(start: usize, end: usize, bin: usize) -> Option<usize> {
    let whole = (end - start + 1) / bin * bin;
    (whole > 0).then(|| start + whole - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockDetector, MockSpectrometer};
    use crate::hardware::{Grating, PortConstraints};

    fn controller() -> SpectrumController {
        SpectrumController::new(
            Arc::new(MockDetector::new(1024, 256)),
            Arc::new(MockSpectrometer::new()),
            ModuleLock::new(),
        )
    }

    #[tokio::test]
    async fn grating_index_is_range_checked() {
        let c = controller();
        c.set_grating_index(2).await.unwrap();
        assert_eq!(c.grating_index().await.unwrap(), 2);
        assert!(matches!(
            c.set_grating_index(3).await,
            Err(DaqError::Configuration(_))
        ));
        assert_eq!(c.grating_index().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn center_wavelength_applies_calibration() {
        let c = controller();
        c.set_wavelength_calibration(2e-9).await.unwrap();
        c.set_center_wavelength(600e-9).await.unwrap();
        assert!((c.center_wavelength().await.unwrap() - 600e-9).abs() < 1e-18);
        assert!((c.spectrometer.get_wavelength().await.unwrap() - 598e-9).abs() < 1e-18);
    }

    #[tokio::test]
    async fn center_wavelength_limited_by_grating() {
        let c = controller();
        c.set_grating_index(2).await.unwrap();
        assert!(matches!(
            c.set_center_wavelength(1000e-9).await,
            Err(DaqError::Configuration(_))
        ));
        assert!(matches!(
            c.set_center_wavelength(-1e-9).await,
            Err(DaqError::Configuration(_))
        ));
        c.set_center_wavelength(0.0).await.unwrap();
        assert_eq!(c.spectrometer.get_wavelength().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn wavelength_spectrum_centres_on_calibrated_wavelength() {
        let c = controller().with_wavelength_calibration(1e-9);
        let axis = c.wavelength_spectrum().await.unwrap();
        assert_eq!(axis.len(), 1024);
        assert!((axis[512] - c.center_wavelength().await.unwrap()).abs() < 1e-18);
        assert!(axis[0] < axis[1023]);
    }

    #[tokio::test]
    async fn setters_fail_while_locked() {
        let c = controller();
        let _session = c.lock.try_lock("acquire").unwrap();
        assert!(matches!(c.set_gain(2.0).await, Err(DaqError::Busy(_))));
        assert!(matches!(c.set_grating_index(1).await, Err(DaqError::Busy(_))));
        assert!(matches!(
            c.set_center_wavelength(500e-9).await,
            Err(DaqError::Busy(_))
        ));
        assert!(matches!(
            c.set_wavelength_calibration(1e-9).await,
            Err(DaqError::Busy(_))
        ));
        // cooling stays available during a session
        c.set_temperature_setpoint(200.0).await.unwrap();
        assert_eq!(c.temperature_setpoint().await.unwrap(), 200.0);
    }

    #[tokio::test]
    async fn setter_releases_lock() {
        let c = controller();
        c.set_gain(4.0).await.unwrap();
        assert!(!c.lock.is_locked());
        assert!(matches!(c.set_gain(3.0).await, Err(DaqError::Configuration(_))));
        assert!(!c.lock.is_locked());
    }

    #[tokio::test]
    async fn ports_need_a_flipper_mirror() {
        let c = controller();
        c.set_input_port(PortType::InputSide).await.unwrap();
        assert_eq!(c.input_port().await.unwrap(), PortType::InputSide);
        assert!(matches!(
            c.set_input_port(PortType::OutputSide).await,
            Err(DaqError::Configuration(_))
        ));

        let mut optics = MockSpectrometer::new().constraints();
        optics.ports.retain(|p| p.port_type != PortType::OutputSide);
        let single_output = SpectrumController::new(
            Arc::new(MockDetector::new(64, 8)),
            Arc::new(MockSpectrometer::new().with_constraints(optics)),
            ModuleLock::new(),
        );
        assert!(matches!(
            single_output.set_output_port(PortType::OutputFront).await,
            Err(DaqError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn slits_must_be_motorized_and_in_range() {
        let c = controller();
        c.set_slit_width(PortType::InputFront, 50e-6).await.unwrap();
        assert_eq!(c.slit_width(PortType::InputFront).await.unwrap(), 50e-6);
        assert!(matches!(
            c.set_slit_width(PortType::InputFront, 5e-3).await,
            Err(DaqError::Configuration(_))
        ));
        assert!(matches!(
            c.set_slit_width(PortType::OutputFront, 50e-6).await,
            Err(DaqError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn readout_speed_snaps_to_nearest() {
        let c = controller();
        assert_eq!(c.set_readout_speed(900e3).await.unwrap(), 1e6);
        assert_eq!(c.readout_speed().await.unwrap(), 1e6);
        assert_eq!(c.set_readout_speed(0.0).await.unwrap(), 50e3);
    }

    #[tokio::test]
    async fn odd_track_list_is_padded() {
        let c = controller();
        let tracks = c.set_active_tracks(&[10, 20, 100]).await.unwrap();
        assert_eq!(tracks, vec![(10, 20), (100, 255)]);
        assert_eq!(c.active_tracks().await.unwrap(), tracks);
        assert!(matches!(
            c.set_active_tracks(&[300]).await,
            Err(DaqError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn image_area_is_trimmed_to_whole_bins() {
        let c = controller();
        let applied = c
            .set_image_advanced(ImageAdvancedParameters {
                horizontal_binning: 4,
                vertical_binning: 2,
                horizontal_start: 0,
                horizontal_end: 1022,
                vertical_start: 10,
                vertical_end: 20,
            })
            .await
            .unwrap();
        assert_eq!(applied.horizontal_end, 1019);
        assert_eq!(applied.vertical_end, 19);
        assert_eq!(c.image_advanced().await.unwrap(), applied);

        let unsorted = ImageAdvancedParameters {
            horizontal_start: 500,
            horizontal_end: 400,
            ..applied
        };
        assert!(matches!(
            c.set_image_advanced(unsorted).await,
            Err(DaqError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn read_mode_and_trigger_must_be_supported() {
        let c = controller();
        c.set_read_mode(ReadMode::Image).await.unwrap();
        assert_eq!(c.read_mode().await.unwrap(), ReadMode::Image);
        c.set_trigger_mode(TriggerMode("EXTERNAL".into()))
            .await
            .unwrap();
        assert!(matches!(
            c.set_trigger_mode(TriggerMode("GATED".into())).await,
            Err(DaqError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn shutter_and_cooler_need_hardware() {
        let bare = SpectrumController::new(
            Arc::new(MockDetector::new(64, 8).without_shutter_and_cooler()),
            Arc::new(MockSpectrometer::new()),
            ModuleLock::new(),
        );
        assert!(matches!(
            bare.set_shutter_state(ShutterState::Open).await,
            Err(DaqError::NotSupported(_))
        ));
        assert!(matches!(bare.cooler_on().await, Err(DaqError::NotSupported(_))));

        let c = controller();
        c.set_shutter_state(ShutterState::Open).await.unwrap();
        assert_eq!(c.shutter_state().await.unwrap(), ShutterState::Open);
        c.set_cooler_on(true).await.unwrap();
        assert!(c.cooler_on().await.unwrap());
        assert!(matches!(
            c.set_temperature_setpoint(0.0).await,
            Err(DaqError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn wavelength_spectrum_uses_active_grating() {
        let optics = SpectrometerConstraints {
            focal_length: 0.5,
            angular_deviation: 0.3,
            focal_tilt: 0.0,
            gratings: vec![Grating {
                ruling: 300e3,
                blaze: 750e-9,
                wavelength_max: 3000e-9,
            }],
            ports: vec![PortConstraints {
                port_type: PortType::InputFront,
                is_motorized: false,
                slit_min: 0.0,
                slit_max: 0.0,
            }],
        };
        let c = SpectrumController::new(
            Arc::new(MockDetector::new(100, 1)),
            Arc::new(MockSpectrometer::new().with_constraints(optics)),
            ModuleLock::new(),
        );
        let axis = c.wavelength_spectrum().await.unwrap();
        assert_eq!(axis.len(), 100);
        assert!((axis[50] - 500e-9).abs() < 1e-18);
    }
}
