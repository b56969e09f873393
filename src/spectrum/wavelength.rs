//! Wavelength axis of the detector from the grating equation.
//!
//! For a Czerny-Turner bench with angular deviation `D` between the incident and
//! diffracted beams, the grating angle `α` at center wavelength `λc` solves
//!
//! ```text
//! cos²(D)·sin(α)·cos(α) − cos(D)·sin(D)·sin²(α) − λc·G/2 = 0
//! ```
//!
//! where `G` is the ruling. With `β = α + D`, a pixel at distance `p` from the center
//! of the sensor sees the angle `θ = atan(p·cos(tilt) / f)`, giving
//!
//! ```text
//! λ(p) = (sin(D + β + θ) − sin(D + β)) · cos(D + β) / G + λc
//! ```

use crate::error::{AppResult, DaqError};

const MAX_ITERATIONS: usize = 100;
const TOLERANCE: f64 = 1e-12;

/// Optical geometry needed to map detector pixels to wavelengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispersionGeometry {
    /// Focal length in metres
    pub focal_length: f64,
    /// Angular deviation in radians
    pub angular_deviation: f64,
    /// Focal plane tilt in radians
    pub focal_tilt: f64,
    /// Groove density of the grating in lines per metre
    pub ruling: f64,
    /// Pixel width in metres
    pub pixel_width: f64,
    /// Number of pixels along the dispersion axis
    pub pixel_count: usize,
}

/// Grating rotation for `center_wavelength`, relative to the angular deviation.
///
/// Newton iteration from zero. Fails with [`DaqError::Processing`] when the
/// iteration does not settle.
pub fn grating_angle(
    center_wavelength: f64,
    ruling: f64,
    angular_deviation: f64,
) -> AppResult<f64> {
    let a = angular_deviation.cos().powi(2);
    let b = angular_deviation.cos() * angular_deviation.sin();
    let target = center_wavelength * ruling / 2.0;

    let mut alpha = 0.0_f64;
    for _ in 0..MAX_ITERATIONS {
        let value = a * alpha.sin() * alpha.cos() - b * alpha.sin().powi(2) - target;
        let slope = a * (2.0 * alpha).cos() - b * (2.0 * alpha).sin();
        if slope.abs() < f64::EPSILON {
            break;
        }
        let step = value / slope;
        alpha -= step;
        if !alpha.is_finite() {
            break;
        }
        if step.abs() < TOLERANCE {
            return Ok(alpha);
        }
    }

    Err(DaqError::Processing(format!(
        "grating equation did not converge for center wavelength {center_wavelength:e} m"
    )))
}

/// Wavelength seen by every pixel, given the center wavelength at the middle pixel.
///
/// Pixel offsets are `(i - width/2) · pixel_width`, so the pixel at `width/2` reads
/// exactly `center_wavelength`.
pub fn wavelength_axis(
    geometry: &DispersionGeometry,
    center_wavelength: f64,
) -> AppResult<Vec<f64>> {
    if geometry.focal_length <= 0.0 || geometry.ruling <= 0.0 || geometry.pixel_width <= 0.0 {
        return Err(DaqError::Configuration(
            "focal length, ruling and pixel width must be positive".to_string(),
        ));
    }

    let deviation = geometry.angular_deviation;
    let alpha = grating_angle(center_wavelength, geometry.ruling, deviation)? + deviation;
    let incidence = deviation + alpha;
    let effective_ruling = geometry.ruling / incidence.cos();
    let half = (geometry.pixel_count / 2) as f64;

    Ok((0..geometry.pixel_count)
        .map(|i| {
            let position = (i as f64 - half) * geometry.pixel_width;
            let theta = (position * geometry.focal_tilt.cos() / geometry.focal_length).atan();
            ((incidence + theta).sin() - incidence.sin()) / effective_ruling + center_wavelength
        })
        .collect())
}
