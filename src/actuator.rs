//! Setpoint to Regulator-Voltage Mapping
//!
//! ## Bias Walks the Curve
//!
//! The regulator's calibration curve is measured, non-linear, and has no
//! closed-form inverse. Converting a desired pressure to a control voltage
//! is therefore a table lookup: find the calibration sample nearest the
//! target, then read out its voltage. Closed-loop trimming applies a signed
//! integer offset to the **index** into the table - not a voltage delta -
//! so every trimmed command is a voltage the regulator was actually
//! observed to hold. The offset saturates at the table boundary instead of
//! erroring; the bias accumulator in the control loop can legitimately
//! overshoot the table during aggressive gain moves.
//!
//! The inverse readout (voltage to pressure) reports what a register
//! read-back means in kPa, for operator display and sanity checks.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    calibration::{CalibrationCurve, CalibrationDataset},
    errors::CalibrationError,
};

/// One regulator control command.
///
/// Carries the voltage and its fixed-point register encoding: the PLC
/// register holds `round(1000 * volts)` for three decimals of precision.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActuatorCommand {
    /// Control voltage to hold.
    pub volts: f32,
}

impl ActuatorCommand {
    /// Command for a raw control voltage.
    pub fn from_volts(volts: f32) -> Self {
        Self { volts }
    }

    /// Fixed-point register encoding (`round(1000 * volts)`).
    pub fn register_value(&self) -> u16 {
        let scaled = libm::roundf(self.volts * 1_000.0);
        if scaled <= 0.0 {
            0
        } else if scaled >= u16::MAX as f32 {
            u16::MAX
        } else {
            scaled as u16
        }
    }

    /// Decode a register read-back into a command.
    pub fn from_register(value: u16) -> Self {
        Self {
            volts: value as f32 / 1_000.0,
        }
    }
}

/// Maps desired pressures onto calibrated regulator voltages.
///
/// Read-only after construction; may be shared across setpoint requests
/// without locking.
#[derive(Debug, Clone)]
pub struct RegulatorMap {
    curve: CalibrationCurve,
}

impl RegulatorMap {
    /// Build the map from a bench calibration dataset.
    pub fn from_dataset(dataset: &CalibrationDataset) -> Result<Self, CalibrationError> {
        Ok(Self {
            curve: CalibrationCurve::from_dataset(dataset)?,
        })
    }

    /// Build the map from an already-validated curve.
    pub fn new(curve: CalibrationCurve) -> Self {
        Self { curve }
    }

    /// The underlying calibration curve.
    pub fn curve(&self) -> &CalibrationCurve {
        &self.curve
    }

    /// Voltage command for `target_kpa`, trimmed by `bias_index`.
    ///
    /// Nearest-knot search on the pressure axis, then the signed bias
    /// offsets the knot index, clamped to the table bounds.
    pub fn voltage_for(&self, target_kpa: f32, bias_index: i32) -> ActuatorCommand {
        let nearest = self.curve.nearest_index(target_kpa) as i64;
        let last = self.curve.len() as i64 - 1;
        let index = (nearest + bias_index as i64).clamp(0, last) as usize;
        ActuatorCommand::from_volts(self.curve.y_at(index))
    }

    /// Inverse readout: the calibrated pressure for a command voltage.
    pub fn pressure_at(&self, command: ActuatorCommand) -> f32 {
        self.curve.x_for_y(command.volts)
    }
}
