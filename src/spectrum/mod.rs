//! Spectrometer and detector settings.
//!
//! - [`controller`]: validated, lock-aware setters over the hardware traits
//! - [`wavelength`]: pixel to wavelength mapping from the grating equation

pub mod controller;
pub mod wavelength;

pub use controller::SpectrumController;
pub use wavelength::{grating_angle, wavelength_axis, DispersionGeometry};
