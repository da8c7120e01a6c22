//! Error Types for the Pressure Control Core
//!
//! ## Design Philosophy
//!
//! Everything that can go wrong on the way from "operator typed a setpoint"
//! to "pressure is set" has a distinct, named failure:
//!
//! 1. **Small and Copy**: error payloads are inline (`f32`, counts,
//!    `&'static str`) so they can be returned from hot paths and stored in
//!    iteration history without allocation.
//!
//! 2. **Staged taxonomy**: each stage of the loop owns an error type -
//!    calibration loading (`CalibrationError`), sample windows
//!    (`SampleError`), the acquisition collaborator (`AcquisitionError`),
//!    the actuator bus (`BusError`) - and the control loop folds them into
//!    one `ControlError` with a specific reported reason.
//!
//! 3. **Nothing is swallowed**: a failed retry surfaces; a cancelled attempt
//!    surfaces; a timed-out attempt surfaces. The state machine always
//!    reaches Terminal with a reason.
//!
//! ## Severity
//!
//! - `CalibrationError` is fatal for the whole run: it is raised before any
//!   actuation, so a bad dataset never moves the regulator.
//! - `ControlError` is fatal for the current setpoint only; the session
//!   orchestrator may continue with the next setpoint.

use thiserror_no_std::Error;

/// Errors raised while building a calibration curve from a dataset.
///
/// Always fatal: the run aborts before any actuator command is issued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    /// The calibration dataset could not be found or opened.
    #[error("calibration dataset missing")]
    MissingDataset,

    /// Fewer than two usable points remained after deduplication.
    #[error("calibration needs >=2 points, have {usable}")]
    TooFewPoints {
        /// Points that survived deduplication.
        usable: usize,
    },

    /// The pressure axis is not strictly increasing after dedup and sort.
    #[error("calibration pressure axis not strictly increasing")]
    NotMonotonic,

    /// Coordinate arrays have different lengths.
    #[error("calibration axes differ in length: {xs} vs {ys}")]
    AxisMismatch {
        /// Pressure samples.
        xs: usize,
        /// Voltage samples.
        ys: usize,
    },
}

/// Errors raised when a raw sample window cannot be transformed.
///
/// Treated like an acquisition failure by the control loop: retried once,
/// then surfaced as [`ControlError::SensorUnavailable`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleError {
    /// The window contained no samples at all.
    #[error("empty sample window")]
    EmptyWindow,

    /// Timestamp and voltage sequences disagree in length; a partial
    /// window must fail loudly rather than return truncated data.
    #[error("truncated window: expected {expected} samples, have {actual}")]
    Truncated {
        /// Samples promised by the time vector.
        expected: usize,
        /// Samples actually delivered.
        actual: usize,
    },

    /// Every sample in the window was NaN or infinite after transform.
    #[error("no valid samples in window")]
    NoValidSamples,
}

/// Errors reported by the acquisition collaborator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The acquisition device could not be reached.
    #[error("acquisition device unavailable: {reason}")]
    DeviceUnavailable {
        /// Collaborator-supplied detail.
        reason: &'static str,
    },

    /// The device did not deliver the window within its own deadline.
    #[error("acquisition timed out")]
    Timeout,
}

/// Errors reported by the field-bus transport for the actuator.
///
/// Failure to open the channel and failure to acknowledge a write are
/// distinct conditions on the wire and stay distinct here.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The bus channel could not be opened.
    #[error("bus channel closed")]
    ChannelClosed,

    /// The device accepted the connection but did not acknowledge the
    /// register write.
    #[error("write not acknowledged at register {register}")]
    WriteNotAcknowledged {
        /// Target register address.
        register: u16,
    },

    /// A register read returned no data.
    #[error("read failed at register {register}")]
    ReadFailed {
        /// Target register address.
        register: u16,
    },
}

/// Terminal failure reasons for one setpoint attempt.
///
/// Fatal for the current setpoint only; the orchestrator may skip to the
/// next one.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// Both the acquisition attempt and its single retry failed.
    #[error("sensors unavailable after retry")]
    SensorUnavailable,

    /// The actuator bus stayed unreachable through the bounded retries.
    #[error("actuator unreachable after {attempts} attempts")]
    ActuatorUnreachable {
        /// Write attempts made, including retries.
        attempts: u32,
    },

    /// The iteration or wall-clock cap elapsed without convergence.
    #[error("no convergence within bounds ({iterations} iterations, {elapsed_ms} ms)")]
    Timeout {
        /// Iterations completed.
        iterations: u32,
        /// Elapsed time at the cap.
        elapsed_ms: u64,
    },

    /// An external cancel request was honored at a state boundary.
    #[error("cancelled by request")]
    Cancelled,
}

#[cfg(feature = "defmt")]
impl defmt::Format for ControlError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::SensorUnavailable => defmt::write!(fmt, "sensors unavailable"),
            Self::ActuatorUnreachable { attempts } => {
                defmt::write!(fmt, "actuator unreachable after {}", attempts)
            }
            Self::Timeout {
                iterations,
                elapsed_ms,
            } => defmt::write!(fmt, "timeout: {} iters, {} ms", iterations, elapsed_ms),
            Self::Cancelled => defmt::write!(fmt, "cancelled"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BusError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::ChannelClosed => defmt::write!(fmt, "bus channel closed"),
            Self::WriteNotAcknowledged { register } => {
                defmt::write!(fmt, "write NAK at {}", register)
            }
            Self::ReadFailed { register } => defmt::write!(fmt, "read failed at {}", register),
        }
    }
}
