//! Uncertainty-Weighted Two-Sensor Fusion
//!
//! ## Why Fuse?
//!
//! The two chamber sensors disagree, and each is physically unreliable
//! outside its intended band: the strain-gauge transducer's signal
//! disappears into bridge noise in fine vacuum, and the capacitance gauge's
//! diaphragm saturates near atmosphere. Neither reading can be trusted
//! everywhere, so the fused estimate switches regimes:
//!
//! ```text
//! linear reading (Pa)
//!        > 10 000  -> linear sensor alone      (HighRangeSensorOnly)
//!        <  3 000  -> capacitance gauge alone  (LowRangeSensorOnly)
//!   3 000..10 000  -> inverse-variance mean    (Weighted)
//! ```
//!
//! The hard overrides at the extremes take precedence over weighting. In
//! the overlap band both sensors are informative and an inverse-variance
//! weighted mean is the minimum-variance combination,
//!
//! ```text
//! w = 1/sigma^2
//! fused = (w_l*p_l + w_g*p_g) / (w_l + w_g)
//! sigma_fused = sqrt(1 / (w_l + w_g))
//! ```
//!
//! Weighting arithmetic runs in Pa; the estimate is reported in kPa.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    constants::{HIGH_RANGE_FLOOR_PA, LOW_RANGE_CEIL_PA, PA_PER_KPA},
    uncertainty::{gauge_sigma_pa, linear_sigma_pa},
};

/// Which trust regime produced a fused estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SourceRegime {
    /// Above the overlap band: only the linear transducer is trusted.
    HighRangeSensorOnly,
    /// Below the overlap band: only the capacitance gauge is trusted.
    LowRangeSensorOnly,
    /// Overlap band: inverse-variance weighted mean of both sensors.
    Weighted,
}

/// One fused pressure estimate with propagated uncertainty.
///
/// Derived, never mutated; a fresh one is produced per control iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FusedEstimate {
    /// Best pressure estimate, kPa.
    pub pressure_kpa: f32,
    /// 1-sigma uncertainty of the estimate, kPa.
    pub sigma_kpa: f32,
    /// Trust regime that produced the estimate.
    pub regime: SourceRegime,
}

/// Fuse the two sensors' mean pressures (both in absolute Pa).
///
/// The regime decision keys on the linear transducer's reading: it is the
/// robust one, and its value locates the chamber on the pressure axis well
/// enough to pick which sensor to believe.
pub fn fuse(linear_pa: f32, gauge_pa: f32) -> FusedEstimate {
    let sigma_linear = linear_sigma_pa();
    let sigma_gauge = gauge_sigma_pa(gauge_pa);

    let (fused_pa, sigma_pa, regime) = if linear_pa > HIGH_RANGE_FLOOR_PA {
        (linear_pa, sigma_linear, SourceRegime::HighRangeSensorOnly)
    } else if linear_pa < LOW_RANGE_CEIL_PA {
        (gauge_pa, sigma_gauge, SourceRegime::LowRangeSensorOnly)
    } else {
        let w_linear = 1.0 / (sigma_linear * sigma_linear);
        let w_gauge = 1.0 / (sigma_gauge * sigma_gauge);
        let fused = (w_linear * linear_pa + w_gauge * gauge_pa) / (w_linear + w_gauge);
        let sigma = libm::sqrtf(1.0 / (w_linear + w_gauge));
        (fused, sigma, SourceRegime::Weighted)
    };

    FusedEstimate {
        pressure_kpa: fused_pa / PA_PER_KPA,
        sigma_kpa: sigma_pa / PA_PER_KPA,
        regime,
    }
}
