//! Device and Controller Constants
//!
//! Fixed characteristics of the chamber hardware - sensor factory
//! calibrations, datasheet accuracy bands, fusion trust thresholds - plus
//! the empirically tuned controller defaults. Values come from device
//! datasheets and from bench characterization of this one regulator; they
//! are constants of the installation, not tunables.

// ===== UNIT CONVERSIONS =====

/// One standard atmosphere in Pascals.
pub const ATMOSPHERE_PA: f32 = 101_325.0;

/// Pascals per Torr.
///
/// The fine vacuum gauge's datasheet accuracy bands are specified in Torr.
pub const PA_PER_TORR: f32 = 133.322;

/// Pascals per kilopascal.
pub const PA_PER_KPA: f32 = 1_000.0;

// ===== LINEAR TRANSDUCER (high-range strain gauge) =====

/// Transducer sensitivity in V/bar, from the factory calibration sheet.
pub const LINEAR_SENSITIVITY_V_PER_BAR: f32 = 1.0 / 10.095;

/// Bridge balance offset in V, balanced at 0 bar on the bench.
pub const LINEAR_BALANCE_OFFSET_V: f32 = 0.061;

/// Correction subtracted from the converted reading (kPa) to reference the
/// gauge output against the local atmosphere.
pub const LINEAR_ATMOSPHERIC_CORRECTION_KPA: f32 = 4.9;

/// Constant measurement uncertainty: +/-0.8% of full scale (one atmosphere).
///
/// Source: transducer datasheet accuracy class.
pub const LINEAR_FRACTION_OF_FULL_SCALE: f32 = 0.008;

// ===== CAPACITANCE GAUGE (fine vacuum sensor) =====

/// Datasheet calibration knots: absolute pressure in Pa for each of the
/// five reference output voltages in [`GAUGE_KNOT_VOLTS`].
pub const GAUGE_KNOT_PA: [f32; 5] = [133.3, 666.0, 1_333.0, 6_660.0, 13_330.0];

/// Gauge output voltage at each calibration knot.
pub const GAUGE_KNOT_VOLTS: [f32; 5] = [0.1, 0.5, 1.0, 5.0, 10.0];

/// Fractional uncertainty below 1e-3 Torr (and the fallback below the
/// specified range): 10% of reading.
pub const GAUGE_FRACTION_LOW: f32 = 0.10;

/// Fractional uncertainty in the gauge's intended band [1e-3, 100) Torr:
/// 5% of reading.
pub const GAUGE_FRACTION_MID: f32 = 0.05;

/// Fractional uncertainty at or above 100 Torr, where the diaphragm is
/// saturating: 25% of reading.
pub const GAUGE_FRACTION_HIGH: f32 = 0.25;

/// Lower edge of the 10% band in Torr.
pub const GAUGE_BAND_FLOOR_TORR: f32 = 5e-4;

/// Boundary between the 10% and 5% bands in Torr.
pub const GAUGE_BAND_MID_TORR: f32 = 1e-3;

/// Boundary between the 5% and 25% bands in Torr.
pub const GAUGE_BAND_CEIL_TORR: f32 = 100.0;

// ===== FUSION TRUST THRESHOLDS =====

/// Above this pressure (Pa) only the linear transducer is trusted; the
/// gauge diaphragm is saturated.
pub const HIGH_RANGE_FLOOR_PA: f32 = 10_000.0;

/// Below this pressure (Pa) only the capacitance gauge is trusted; the
/// strain-gauge signal is down in the noise.
pub const LOW_RANGE_CEIL_PA: f32 = 3_000.0;

// ===== CONTROLLER DEFAULTS =====

/// Default proportional gain (bias index counts per kPa of error).
pub const PGAIN: f32 = 200.0;

/// Default derivative gain.
pub const DGAIN: f32 = PGAIN / 3.0;

/// Default integral gain.
pub const IGAIN: f32 = PGAIN / 8.0;

/// Conservative proportional gain observed on the hardware; the stagnation
/// policy doubles whichever proportional constant is configured.
pub const PCRIT: f32 = 140.0;

/// Dead-time after the first command, in ms. The regulator needs the full
/// 30 s to pull the chamber to a fresh setpoint.
pub const SETTLE_INITIAL_MS: u64 = 30_000;

/// Dead-time after a trim adjustment, in ms.
pub const SETTLE_ADJUST_MS: u64 = 15_000;

/// Default acquisition rate for a feedback window, in Hz.
pub const SAMPLE_RATE_HZ: u32 = 1_000;

/// Default feedback window length, in seconds.
pub const WINDOW_SECS: f32 = 2.0;

/// Default confirmatory acquisition window after convergence, in seconds.
/// Longer than the feedback window; this is the record of the run.
pub const CONFIRM_WINDOW_SECS: f32 = 10.0;

/// Default iteration cap before the attempt times out.
pub const MAX_ITERATIONS: u32 = 40;

/// Default wall-clock cap for one setpoint attempt, in ms.
pub const MAX_ELAPSED_MS: u64 = 30 * 60 * 1_000;

/// Bus writes are retried this many times with doubling backoff before the
/// setpoint attempt is abandoned.
pub const BUS_RETRY_LIMIT: u32 = 3;

/// Initial backoff before a bus retry, in ms.
pub const BUS_RETRY_BACKOFF_MS: u64 = 250;
