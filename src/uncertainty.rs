//! Measurement Uncertainty Model
//!
//! Assigns a 1-sigma uncertainty to each sensor's pressure estimate from
//! its datasheet accuracy, evaluated against the sensor's operating regime:
//!
//! - Linear transducer: flat +/-0.8% of full scale (one atmosphere),
//!   independent of reading.
//! - Capacitance gauge: a fraction of its own reading, banded on the
//!   pressure expressed in Torr:
//!
//! ```text
//! Torr range      | fraction
//! ----------------|---------
//! [5e-4, 1e-3)    | 10%
//! [1e-3, 100)     | 5%
//! >= 100          | 25%
//! below 5e-4      | 10% (fallback)
//! ```
//!
//! These bands are fixed constants of the devices, not runtime tunables.

use crate::constants::{
    ATMOSPHERE_PA, GAUGE_BAND_CEIL_TORR, GAUGE_BAND_MID_TORR, GAUGE_FRACTION_HIGH,
    GAUGE_FRACTION_LOW, GAUGE_FRACTION_MID, LINEAR_FRACTION_OF_FULL_SCALE, PA_PER_TORR,
};

/// Uncertainty of the linear transducer, in Pa. Constant across the range.
pub fn linear_sigma_pa() -> f32 {
    LINEAR_FRACTION_OF_FULL_SCALE * ATMOSPHERE_PA
}

/// Uncertainty of the capacitance gauge at `pressure_pa`, in Pa.
///
/// Fraction of the reading itself, banded per the datasheet.
pub fn gauge_sigma_pa(pressure_pa: f32) -> f32 {
    gauge_fraction(pressure_pa) * libm::fabsf(pressure_pa)
}

/// Datasheet fractional accuracy for the gauge at `pressure_pa`.
pub fn gauge_fraction(pressure_pa: f32) -> f32 {
    let torr = pressure_pa / PA_PER_TORR;
    if torr >= GAUGE_BAND_CEIL_TORR {
        GAUGE_FRACTION_HIGH
    } else if torr >= GAUGE_BAND_MID_TORR {
        GAUGE_FRACTION_MID
    } else {
        // Covers [5e-4, 1e-3) and the below-range fallback alike.
        GAUGE_FRACTION_LOW
    }
}
