//! Hardware Seams
//!
//! The control loop talks to three instruments: a DAQ front-end that
//! digitizes both pressure sensors, a PLC register bus that holds the
//! regulator command, and an optional TTL line that arms external
//! acquisition hardware. Each sits behind a small trait so the loop can be
//! driven against simulated instruments in tests and real drivers on the
//! bench.

use crate::{
    actuator::ActuatorCommand,
    errors::{AcquisitionError, BusError},
    sensors::RawWindow,
    time::Clock,
};

/// One synchronized acquisition: both sensors sampled over the same window.
#[derive(Debug, Clone)]
pub struct SamplePair {
    /// Raw window from the linear strain-gauge transducer channel.
    pub linear: RawWindow,
    /// Raw window from the capacitance gauge channel.
    pub gauge: RawWindow,
}

/// Source of synchronized raw sensor windows.
pub trait SampleSource {
    /// Acquire both channels at `sample_rate_hz` for `duration_s` seconds.
    fn acquire(&mut self, sample_rate_hz: u32, duration_s: f32)
        -> Result<SamplePair, AcquisitionError>;
}

/// Register bus holding the regulator's voltage command.
pub trait ActuatorBus {
    /// Write a command to the regulator register.
    fn write_command(&mut self, command: ActuatorCommand) -> Result<(), BusError>;

    /// Read back the command currently held by the register.
    fn read_command(&mut self) -> Result<ActuatorCommand, BusError>;
}

/// State of a TTL trigger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    /// Line asserted.
    On,
    /// Line released.
    Off,
}

/// TTL line that arms external acquisition hardware.
pub trait TriggerLine {
    /// Drive the line to `state`.
    fn set(&mut self, state: LineState) -> Result<(), BusError>;

    /// Assert the line, hold it for `hold_ms`, then release it.
    fn pulse(&mut self, clock: &dyn Clock, hold_ms: u64) -> Result<(), BusError> {
        self.set(LineState::On)?;
        clock.sleep_ms(hold_ms);
        self.set(LineState::Off)
    }
}
