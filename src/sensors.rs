//! Per-Sensor Calibration Transforms
//!
//! ## The Two Sensors
//!
//! The chamber carries two pressure sensors with non-overlapping trustworthy
//! ranges:
//!
//! - **Linear transducer** (strain gauge, high range): a factory-calibrated
//!   linear curve from bridge voltage to bar. Robust near atmosphere,
//!   useless in fine vacuum where its signal is below the noise floor.
//! - **Capacitance gauge** (fine vacuum): the datasheet publishes five
//!   voltage/pressure reference knots spanning 1-100 Torr. Accurate in its
//!   band, saturated above it.
//!
//! Each transform converts one raw acquisition window - a voltage sequence
//! with its time vector - into a [`SensorReading`] holding the derived
//! pressure sequence and its mean. Readings are immutable after creation
//! and owned by the caller that requested the window.
//!
//! Transforms never reject in-band vs out-of-band input; accuracy outside
//! the intended band is the uncertainty model's concern (see
//! [`crate::uncertainty`]). What they do reject, loudly, is a window that
//! is empty, truncated, or entirely invalid after conversion.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    calibration::{CalibrationCurve, CubicSpline},
    constants::{
        GAUGE_KNOT_PA, GAUGE_KNOT_VOLTS, LINEAR_ATMOSPHERIC_CORRECTION_KPA,
        LINEAR_BALANCE_OFFSET_V, LINEAR_SENSITIVITY_V_PER_BAR, PA_PER_KPA,
    },
    errors::{CalibrationError, SampleError},
};

/// Which physical sensor produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorKind {
    /// High-range strain-gauge transducer with a linear factory curve.
    Linear,
    /// Fine vacuum capacitance gauge mapped through calibration knots.
    Interpolated,
}

/// One raw acquisition window for a single channel.
#[derive(Debug, Clone, Default)]
pub struct RawWindow {
    /// Sample times in seconds from window start.
    pub timestamps: Vec<f32>,
    /// Raw sensor voltages, one per timestamp.
    pub volts: Vec<f32>,
}

impl RawWindow {
    /// Build a window from parallel time/voltage sequences.
    pub fn new(timestamps: Vec<f32>, volts: Vec<f32>) -> Self {
        Self { timestamps, volts }
    }
}

/// Calibrated pressures derived from one acquisition window.
///
/// Immutable after creation: accessors only.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SensorReading {
    sensor: SensorKind,
    timestamps: Vec<f32>,
    raw_volts: Vec<f32>,
    pressure_kpa: Vec<f32>,
    mean_kpa: f32,
    mean_volts: f32,
}

impl SensorReading {
    fn from_window(
        sensor: SensorKind,
        window: RawWindow,
        pressure_kpa: Vec<f32>,
    ) -> Result<Self, SampleError> {
        // Mean over finite samples only; a handful of glitched samples in a
        // 2000-sample window should not poison the estimate.
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for &p in &pressure_kpa {
            if p.is_finite() {
                sum += p;
                count += 1;
            }
        }
        if count == 0 {
            return Err(SampleError::NoValidSamples);
        }

        let volt_sum: f32 = window.volts.iter().sum();
        let mean_volts = volt_sum / window.volts.len() as f32;

        Ok(Self {
            sensor,
            timestamps: window.timestamps,
            raw_volts: window.volts,
            pressure_kpa,
            mean_kpa: sum / count as f32,
            mean_volts,
        })
    }

    /// Which sensor produced this reading.
    pub fn sensor(&self) -> SensorKind {
        self.sensor
    }

    /// Sample times in seconds from window start.
    pub fn timestamps(&self) -> &[f32] {
        &self.timestamps
    }

    /// Raw voltages as acquired.
    pub fn raw_volts(&self) -> &[f32] {
        &self.raw_volts
    }

    /// Calibrated pressure sequence in kPa.
    pub fn pressure_kpa(&self) -> &[f32] {
        &self.pressure_kpa
    }

    /// Mean calibrated pressure over the window, kPa.
    pub fn mean_kpa(&self) -> f32 {
        self.mean_kpa
    }

    /// Mean pressure in absolute Pa, as the fusion engine wants it.
    pub fn mean_pa(&self) -> f32 {
        self.mean_kpa * PA_PER_KPA
    }

    /// Mean raw voltage over the window.
    pub fn mean_volts(&self) -> f32 {
        self.mean_volts
    }

    /// Samples in the window.
    pub fn len(&self) -> usize {
        self.pressure_kpa.len()
    }

    /// Whether the window holds no samples (never true for a constructed
    /// reading).
    pub fn is_empty(&self) -> bool {
        self.pressure_kpa.is_empty()
    }
}

/// Reject empty or truncated windows before any conversion.
fn check_window(window: &RawWindow) -> Result<(), SampleError> {
    if window.volts.is_empty() {
        return Err(SampleError::EmptyWindow);
    }
    if window.timestamps.len() != window.volts.len() {
        return Err(SampleError::Truncated {
            expected: window.timestamps.len(),
            actual: window.volts.len(),
        });
    }
    Ok(())
}

/// High-range strain-gauge transducer with a linear factory curve.
///
/// `kPa = (V * sensitivity + balance_offset) * 100 - atmospheric_correction`
#[derive(Debug, Clone)]
pub struct LinearTransducer {
    /// Sensitivity in V/bar.
    pub sensitivity: f32,
    /// Bridge balance offset in V (balanced at 0 bar).
    pub balance_offset: f32,
    /// Atmospheric reference correction in kPa.
    pub atmospheric_correction: f32,
}

impl Default for LinearTransducer {
    fn default() -> Self {
        Self {
            sensitivity: LINEAR_SENSITIVITY_V_PER_BAR,
            balance_offset: LINEAR_BALANCE_OFFSET_V,
            atmospheric_correction: LINEAR_ATMOSPHERIC_CORRECTION_KPA,
        }
    }
}

impl LinearTransducer {
    /// Convert a single raw voltage to kPa.
    pub fn kpa_from_volts(&self, volts: f32) -> f32 {
        (volts * self.sensitivity + self.balance_offset) * 100.0 - self.atmospheric_correction
    }

    /// Transform one acquisition window into a reading.
    pub fn convert(&self, window: RawWindow) -> Result<SensorReading, SampleError> {
        check_window(&window)?;
        let pressure: Vec<f32> = window
            .volts
            .iter()
            .map(|&v| self.kpa_from_volts(v))
            .collect();
        SensorReading::from_window(SensorKind::Linear, window, pressure)
    }
}

/// Interpolation scheme for the gauge calibration knots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMethod {
    /// Piecewise linear between knots.
    Linear,
    /// Natural cubic spline - smoother across the four-decade span and the
    /// default choice.
    #[default]
    CubicSpline,
}

/// Fine vacuum capacitance gauge, mapped through its datasheet knots.
///
/// Output is valid primarily inside the gauge's intended band; outside it
/// the transform still converts (accuracy degradation is modeled by the
/// uncertainty bands, not by rejection).
#[derive(Debug, Clone)]
pub struct CapacitanceGauge {
    method: InterpolationMethod,
    linear: CalibrationCurve,
    spline: CubicSpline,
}

impl CapacitanceGauge {
    /// Build a gauge using the given interpolation method over the fixed
    /// datasheet knots.
    pub fn new(method: InterpolationMethod) -> Result<Self, CalibrationError> {
        let linear = CalibrationCurve::from_points(
            GAUGE_KNOT_VOLTS.iter().copied().zip(GAUGE_KNOT_PA.iter().copied()),
        )?;
        let spline = CubicSpline::new(&GAUGE_KNOT_VOLTS, &GAUGE_KNOT_PA)?;
        Ok(Self {
            method,
            linear,
            spline,
        })
    }

    /// Convert a single raw voltage to absolute Pa.
    pub fn pa_from_volts(&self, volts: f32) -> f32 {
        match self.method {
            InterpolationMethod::Linear => self.linear.value_at(volts),
            InterpolationMethod::CubicSpline => self.spline.value_at(volts),
        }
    }

    /// Transform one acquisition window into a reading (kPa).
    pub fn convert(&self, window: RawWindow) -> Result<SensorReading, SampleError> {
        check_window(&window)?;
        let pressure: Vec<f32> = window
            .volts
            .iter()
            .map(|&v| self.pa_from_volts(v) / PA_PER_KPA)
            .collect();
        SensorReading::from_window(SensorKind::Interpolated, window, pressure)
    }
}

impl Default for CapacitanceGauge {
    fn default() -> Self {
        // The fixed datasheet knots are strictly increasing on both axes,
        // so construction cannot fail.
        match Self::new(InterpolationMethod::default()) {
            Ok(gauge) => gauge,
            Err(_) => unreachable!(),
        }
    }
}
