//! Pressure control core for a benchtop vacuum chamber
//!
//! Drives chamber pressure to an operator setpoint through an empirically
//! calibrated pneumatic regulator, and reports the measured pressure with a
//! calibrated uncertainty. Two disagreeing sensors with different physical
//! ranges are fused into one trustworthy reading:
//!
//! ```text
//! setpoint -> RegulatorMap -> (field bus) -> plant
//!                                              |
//! ControlLoop <- fuse() <- sigma model <- transforms <- (acquisition)
//! ```
//!
//! Key constraints:
//! - The regulator is slow, noisy and hysteretic; commands must settle
//!   (~15-30 s) before feedback is meaningful
//! - The calibration curve is measured, non-linear, and has no closed-form
//!   inverse - trimming walks along the table instead of adding voltage
//! - Neither sensor is trustworthy across the full range; regime overrides
//!   pick the right one outside the 3-10 kPa overlap band
//!
//! The numeric core (calibration, transforms, uncertainty, fusion, actuator
//! mapping) is `no_std`-capable; the control loop itself needs `std` because
//! it sleeps through settling windows and forks a confirmatory acquisition.
//!
//! ```no_run
//! use pressctl::fuse;
//!
//! // 6 kPa on both sensors: overlap band, inverse-variance weighted
//! let estimate = fuse(6_000.0, 6_000.0);
//! println!("{} kPa +/- {}", estimate.pressure_kpa, estimate.sigma_kpa);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod actuator;
pub mod calibration;
pub mod constants;
pub mod errors;
pub mod fusion;
pub mod sensors;
pub mod time;
pub mod traits;
pub mod uncertainty;

#[cfg(feature = "std")]
pub mod control;

// Public API
pub use actuator::{ActuatorCommand, RegulatorMap};
pub use calibration::{CalibrationCurve, CalibrationDataset, CubicSpline};
pub use errors::{
    AcquisitionError, BusError, CalibrationError, ControlError, SampleError,
};
pub use fusion::{fuse, FusedEstimate, SourceRegime};
pub use sensors::{
    CapacitanceGauge, InterpolationMethod, LinearTransducer, RawWindow, SensorKind,
    SensorReading,
};
pub use time::{Clock, SimClock, Timestamp};
pub use traits::{ActuatorBus, LineState, SamplePair, SampleSource, TriggerLine};

#[cfg(feature = "std")]
pub use control::{
    AccumulatedRun, CancelToken, ControlConfig, ControlLoop, ConvergenceTest, Gains,
    SetpointFailure, SetpointRecord, SetpointResult,
};
#[cfg(feature = "std")]
pub use time::SystemClock;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
