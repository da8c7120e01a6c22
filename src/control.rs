//! Closed-Loop Setpoint Controller
//!
//! ## The Loop
//!
//! One setpoint attempt is a small state machine walked sequentially:
//!
//! ```text
//! Idle -> Commanded -> Settling -> Sampling -> Evaluating
//!                          ^                       |
//!                          |        converged? ----+--> Converged
//!                          +------- Adjusting <----+
//!                                                  +--> Failed
//! ```
//!
//! The initial command is the calibration table's best guess for the
//! target. Every subsequent command is a trim: the gain schedule converts
//! the fused pressure error into a signed walk along the calibration table
//! (see [`crate::actuator::RegulatorMap`]), never into a raw voltage.
//!
//! ## Gain Schedule
//!
//! The first adjustment is purely proportional and *increments* the bias;
//! later adjustments *assign* it from a PID form over the fused history:
//!
//! ```text
//! first:  bias += round(P * err)
//! later:  bias  = round(P * err + D * slope + I * err_sum)
//! slope = fused[n-1] - fused[n]     (falling pressure -> positive slope)
//! ```
//!
//! ## Stagnation
//!
//! A regulator stuck against hysteresis produces identical readings while
//! the loop patiently waits out settle windows. When two consecutive fused
//! pressures agree to one decimal, the proportional gain doubles and the
//! iteration counter resets, so the next move is a fresh, harder
//! proportional kick.
//!
//! ## Bounded Everything
//!
//! Settling dominates wall-clock time (15-30 s per command), so every
//! source of waiting is capped: iteration and elapsed-time limits end the
//! attempt with [`ControlError::Timeout`], bus writes retry a bounded
//! number of times with doubling backoff, sampling retries exactly once,
//! and a [`CancelToken`] is honored at state boundaries - after first
//! re-issuing the last explicit command so the regulator is never left in
//! an ambiguous state.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use heapless::HistoryBuffer;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::{
    actuator::{ActuatorCommand, RegulatorMap},
    constants::{
        BUS_RETRY_BACKOFF_MS, BUS_RETRY_LIMIT, CONFIRM_WINDOW_SECS, DGAIN, IGAIN, MAX_ELAPSED_MS,
        MAX_ITERATIONS, PCRIT, PGAIN, SAMPLE_RATE_HZ, SETTLE_ADJUST_MS, SETTLE_INITIAL_MS,
        WINDOW_SECS,
    },
    errors::{AcquisitionError, BusError, ControlError, SampleError},
    fusion::{fuse, FusedEstimate},
    sensors::{CapacitanceGauge, LinearTransducer, SensorReading},
    time::Clock,
    traits::{ActuatorBus, SampleSource, TriggerLine},
};

/// PID-style gain set for the bias-index schedule.
///
/// Units are bias counts per kPa; what a count moves the regulator by
/// depends entirely on the calibration table's knot spacing, so gains are
/// tuned against a specific table.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gains {
    /// Proportional gain. Doubled (cumulatively) on stagnation.
    pub pgain: f32,
    /// Derivative gain, applied to the fused-pressure slope.
    pub dgain: f32,
    /// Integral gain, applied to the accumulated error sum.
    pub igain: f32,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            pgain: PGAIN,
            dgain: DGAIN,
            igain: IGAIN,
        }
    }
}

impl Gains {
    /// Conservative preset observed to be stable on sluggish regulators.
    pub fn conservative() -> Self {
        Self {
            pgain: PCRIT,
            dgain: PCRIT / 3.0,
            igain: PCRIT / 8.0,
        }
    }
}

/// When is the fused pressure "at" the target?
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConvergenceTest {
    /// Fused and target round to the same whole kPa. The effective
    /// tolerance is half a kPa, symmetric, and independent of the target.
    #[default]
    RoundedKpa,
    /// Absolute error at or below the given tolerance in kPa.
    Within(f32),
}

impl ConvergenceTest {
    /// Whether `fused_kpa` satisfies this test against `target_kpa`.
    pub fn met(&self, target_kpa: f32, fused_kpa: f32) -> bool {
        match *self {
            Self::RoundedKpa => libm::roundf(fused_kpa) == libm::roundf(target_kpa),
            Self::Within(tol) => libm::fabsf(fused_kpa - target_kpa) <= tol,
        }
    }
}

/// Tunables for one setpoint attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControlConfig {
    /// Gain schedule.
    pub gains: Gains,
    /// Convergence criterion.
    pub convergence: ConvergenceTest,
    /// Dead-time after the first command, ms.
    pub settle_initial_ms: u64,
    /// Dead-time after each trim, ms.
    pub settle_adjust_ms: u64,
    /// Acquisition rate for feedback windows, Hz.
    pub sample_rate_hz: u32,
    /// Feedback window length, seconds.
    pub window_secs: f32,
    /// Confirmatory window length after convergence, seconds. `None`
    /// disables the confirmatory acquisition entirely.
    pub confirm_window_secs: Option<f32>,
    /// Iteration cap for one attempt.
    pub max_iterations: u32,
    /// Wall-clock cap for one attempt, ms.
    pub max_elapsed_ms: u64,
    /// Bus write retries before the attempt is abandoned.
    pub bus_retry_limit: u32,
    /// Initial bus retry backoff, ms; doubles per retry.
    pub bus_retry_backoff_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            gains: Gains::default(),
            convergence: ConvergenceTest::default(),
            settle_initial_ms: SETTLE_INITIAL_MS,
            settle_adjust_ms: SETTLE_ADJUST_MS,
            sample_rate_hz: SAMPLE_RATE_HZ,
            window_secs: WINDOW_SECS,
            confirm_window_secs: Some(CONFIRM_WINDOW_SECS),
            max_iterations: MAX_ITERATIONS,
            max_elapsed_ms: MAX_ELAPSED_MS,
            bus_retry_limit: BUS_RETRY_LIMIT,
            bus_retry_backoff_ms: BUS_RETRY_BACKOFF_MS,
        }
    }
}

/// Cooperative cancellation handle.
///
/// Cloneable; any clone may cancel. The loop honors cancellation at state
/// boundaries only - never mid-write, never mid-acquisition.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Outcome of a converged setpoint attempt.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SetpointResult {
    /// The fused estimate that satisfied the convergence test.
    pub estimate: FusedEstimate,
    /// Feedback iterations taken.
    pub iterations: u32,
    /// Wall-clock time for the attempt, ms.
    pub elapsed_ms: u64,
    /// Confirmatory readings (linear, gauge), when configured.
    pub confirm: Option<(SensorReading, SensorReading)>,
}

/// A failed setpoint attempt with the evidence gathered before it died.
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct SetpointFailure {
    /// Terminal reason.
    #[source]
    pub error: ControlError,
    /// Fused estimates from every completed iteration, oldest first.
    pub partial: Vec<FusedEstimate>,
}

/// One converged setpoint as recorded in an [`AccumulatedRun`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SetpointRecord {
    /// Requested pressure, kPa.
    pub target_kpa: f32,
    /// Final linear-transducer feedback reading.
    pub linear: SensorReading,
    /// Final capacitance-gauge feedback reading.
    pub gauge: SensorReading,
    /// The converged fused estimate.
    pub estimate: FusedEstimate,
    /// Iterations taken.
    pub iterations: u32,
    /// Wall-clock time, ms.
    pub elapsed_ms: u64,
}

/// Append-only record of a multi-setpoint session.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct AccumulatedRun {
    records: Vec<SetpointRecord>,
}

impl AccumulatedRun {
    /// Empty session record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one converged setpoint.
    pub fn record(&mut self, record: SetpointRecord) {
        self.records.push(record);
    }

    /// Recorded setpoints, in the order they converged.
    pub fn records(&self) -> &[SetpointRecord] {
        &self.records
    }

    /// Setpoints recorded so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Sampling failures share one retry policy whether they come from the
/// acquisition device or from the transform.
#[derive(Error, Debug, Clone, Copy)]
enum SampleFault {
    #[error("{0}")]
    Acquisition(AcquisitionError),
    #[error("{0}")]
    Window(SampleError),
}

/// Gain schedule state: bias planning plus stagnation detection.
struct Scheduler {
    gains: Gains,
    /// Effective proportional gain; doubles on each stagnation.
    pgain: f32,
    iteration: u32,
    /// Last two fused pressures, kPa. Only these are retained.
    history: HistoryBuffer<f32, 2>,
    error_sum: f32,
}

impl Scheduler {
    fn new(gains: Gains) -> Self {
        Self {
            gains,
            pgain: gains.pgain,
            iteration: 0,
            history: HistoryBuffer::new(),
            error_sum: 0.0,
        }
    }

    /// Plan the next bias index from the latest fused pressure.
    fn next_bias(&mut self, target_kpa: f32, fused_kpa: f32, current_bias: i32) -> i32 {
        let previous = self.history.recent().copied();

        let stagnated = previous
            .map(|p| libm::roundf(p * 10.0) == libm::roundf(fused_kpa * 10.0))
            .unwrap_or(false);
        if stagnated {
            self.pgain *= 2.0;
            self.iteration = 0;
            log::debug!(
                "stagnation at {fused_kpa:.1} kPa: proportional gain doubled to {}",
                self.pgain
            );
        }

        self.iteration += 1;
        let error = target_kpa - fused_kpa;
        self.error_sum += error;
        self.history.write(fused_kpa);

        if self.iteration == 1 {
            current_bias.saturating_add(round_bias(self.pgain * error))
        } else {
            let slope = previous.unwrap_or(fused_kpa) - fused_kpa;
            round_bias(self.pgain * error + self.gains.dgain * slope + self.gains.igain * self.error_sum)
        }
    }
}

/// Round a gain-schedule output to a bias count. NaN plans no move.
fn round_bias(value: f32) -> i32 {
    libm::roundf(value) as i32
}

/// Drives the chamber to operator setpoints through the regulator.
///
/// Borrows its instruments for the session; the calibration map is shared
/// and read-only.
pub struct ControlLoop<'a, S, B, C>
where
    S: SampleSource,
    B: ActuatorBus,
    C: Clock + Sync,
{
    map: &'a RegulatorMap,
    source: &'a mut S,
    bus: &'a mut B,
    clock: &'a C,
    transducer: LinearTransducer,
    gauge: CapacitanceGauge,
    config: ControlConfig,
    cancel: Option<CancelToken>,
    trigger: Option<&'a mut (dyn TriggerLine + Send)>,
}

impl<'a, S, B, C> ControlLoop<'a, S, B, C>
where
    S: SampleSource,
    B: ActuatorBus,
    C: Clock + Sync,
{
    /// Loop with default transforms and configuration.
    pub fn new(map: &'a RegulatorMap, source: &'a mut S, bus: &'a mut B, clock: &'a C) -> Self {
        Self {
            map,
            source,
            bus,
            clock,
            transducer: LinearTransducer::default(),
            gauge: CapacitanceGauge::default(),
            config: ControlConfig::default(),
            cancel: None,
            trigger: None,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ControlConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Attach a TTL trigger line armed during confirmatory acquisition.
    pub fn with_trigger(mut self, line: &'a mut (dyn TriggerLine + Send)) -> Self {
        self.trigger = Some(line);
        self
    }

    /// Replace the linear transducer transform.
    pub fn with_transducer(mut self, transducer: LinearTransducer) -> Self {
        self.transducer = transducer;
        self
    }

    /// Replace the capacitance gauge transform.
    pub fn with_gauge(mut self, gauge: CapacitanceGauge) -> Self {
        self.gauge = gauge;
        self
    }

    /// Drive the chamber to `target_kpa`.
    ///
    /// Blocks through settle windows. On convergence the final readings
    /// are appended to `run`; on failure the partial iteration history
    /// rides along in the error so the session record stays complete.
    pub fn run_to_setpoint(
        &mut self,
        target_kpa: f32,
        run: &mut AccumulatedRun,
    ) -> Result<SetpointResult, SetpointFailure> {
        let start = self.clock.now_ms();
        let mut scheduler = Scheduler::new(self.config.gains);
        let mut partial: Vec<FusedEstimate> = Vec::new();
        let mut bias: i32 = 0;
        let mut iterations: u32 = 0;

        let mut command = self.map.voltage_for(target_kpa, bias);
        log::info!(
            "setpoint {target_kpa:.2} kPa: initial command {:.3} V",
            command.volts
        );
        if let Err(error) = self.write_with_retry(command) {
            return Err(SetpointFailure { error, partial });
        }
        let mut settle_ms = self.config.settle_initial_ms;

        loop {
            // Settling
            if let Err(error) = self.check_cancel(command) {
                return Err(SetpointFailure { error, partial });
            }
            self.clock.sleep_ms(settle_ms);
            if let Err(error) = self.check_cancel(command) {
                return Err(SetpointFailure { error, partial });
            }

            // Sampling
            let rate = self.config.sample_rate_hz;
            let secs = self.config.window_secs;
            let (linear, gauge) = match self.sample_readings(rate, secs) {
                Ok(pair) => pair,
                Err(error) => return Err(SetpointFailure { error, partial }),
            };
            let estimate = fuse(linear.mean_pa(), gauge.mean_pa());
            iterations += 1;
            partial.push(estimate);
            log::debug!(
                "iter {iterations}: linear {:.3} kPa, gauge {:.3} kPa -> {:.3} +/- {:.3} kPa ({:?})",
                linear.mean_kpa(),
                gauge.mean_kpa(),
                estimate.pressure_kpa,
                estimate.sigma_kpa,
                estimate.regime
            );

            // Evaluating
            let elapsed_ms = self.clock.now_ms().saturating_sub(start);
            if self.config.convergence.met(target_kpa, estimate.pressure_kpa) {
                log::info!(
                    "setpoint {target_kpa:.2} kPa reached: {:.3} kPa after {iterations} iterations, {elapsed_ms} ms",
                    estimate.pressure_kpa
                );
                let confirm = match self.confirm() {
                    Ok(confirm) => confirm,
                    Err(error) => return Err(SetpointFailure { error, partial }),
                };
                let elapsed_ms = self.clock.now_ms().saturating_sub(start);
                run.record(SetpointRecord {
                    target_kpa,
                    linear,
                    gauge,
                    estimate,
                    iterations,
                    elapsed_ms,
                });
                return Ok(SetpointResult {
                    estimate,
                    iterations,
                    elapsed_ms,
                    confirm,
                });
            }
            if iterations >= self.config.max_iterations || elapsed_ms >= self.config.max_elapsed_ms
            {
                let error = ControlError::Timeout {
                    iterations,
                    elapsed_ms,
                };
                log::warn!("setpoint {target_kpa:.2} kPa abandoned: {error}");
                return Err(SetpointFailure { error, partial });
            }

            // Adjusting
            if let Err(error) = self.check_cancel(command) {
                return Err(SetpointFailure { error, partial });
            }
            bias = scheduler.next_bias(target_kpa, estimate.pressure_kpa, bias);
            command = self.map.voltage_for(target_kpa, bias);
            log::debug!("iter {iterations}: bias {bias} -> {:.3} V", command.volts);
            if let Err(error) = self.write_with_retry(command) {
                return Err(SetpointFailure { error, partial });
            }
            settle_ms = self.config.settle_adjust_ms;
        }
    }

    /// Read back the held register and report it as a calibrated pressure.
    pub fn read_back_kpa(&mut self) -> Result<f32, BusError> {
        let command = self.bus.read_command()?;
        Ok(self.map.pressure_at(command))
    }

    /// One acquisition plus both transforms.
    fn try_sample(
        &mut self,
        rate: u32,
        secs: f32,
    ) -> Result<(SensorReading, SensorReading), SampleFault> {
        let pair = self
            .source
            .acquire(rate, secs)
            .map_err(SampleFault::Acquisition)?;
        let linear = self
            .transducer
            .convert(pair.linear)
            .map_err(SampleFault::Window)?;
        let gauge = self
            .gauge
            .convert(pair.gauge)
            .map_err(SampleFault::Window)?;
        Ok((linear, gauge))
    }

    /// Feedback sampling: one retry, then the sensors are declared gone.
    fn sample_readings(
        &mut self,
        rate: u32,
        secs: f32,
    ) -> Result<(SensorReading, SensorReading), ControlError> {
        for attempt in 1..=2u32 {
            match self.try_sample(rate, secs) {
                Ok(pair) => return Ok(pair),
                Err(fault) => log::warn!("sample attempt {attempt} failed: {fault}"),
            }
        }
        Err(ControlError::SensorUnavailable)
    }

    /// Confirmatory acquisition after convergence.
    ///
    /// When a trigger line is attached, a forked thread pulses it for the
    /// full window while this thread acquires; both complete before the
    /// result is returned. A trigger fault is logged but does not fail a
    /// setpoint that has already converged.
    fn confirm(&mut self) -> Result<Option<(SensorReading, SensorReading)>, ControlError> {
        let Some(secs) = self.config.confirm_window_secs else {
            return Ok(None);
        };
        let rate = self.config.sample_rate_hz;
        let hold_ms = (secs * 1_000.0) as u64;

        let clock = self.clock;
        let source = &mut *self.source;
        let acquired = match self.trigger.as_deref_mut() {
            Some(line) => std::thread::scope(|scope| {
                let pulse = scope.spawn(move || line.pulse(clock, hold_ms));
                let acquired = source.acquire(rate, secs);
                match pulse.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(fault)) => log::warn!("confirmatory trigger pulse failed: {fault}"),
                    Err(_) => log::warn!("confirmatory trigger thread panicked"),
                }
                acquired
            }),
            None => source.acquire(rate, secs),
        };

        let pair = match acquired {
            Ok(pair) => pair,
            Err(fault) => {
                // Same policy as feedback sampling: one retry. The external
                // hardware stays armed only for the first window, so the
                // retry runs without a pulse.
                log::warn!("confirmatory acquisition failed: {fault}");
                match self.source.acquire(rate, secs) {
                    Ok(pair) => pair,
                    Err(_) => return Err(ControlError::SensorUnavailable),
                }
            }
        };

        let linear = self
            .transducer
            .convert(pair.linear)
            .map_err(|_| ControlError::SensorUnavailable)?;
        let gauge = self
            .gauge
            .convert(pair.gauge)
            .map_err(|_| ControlError::SensorUnavailable)?;
        Ok(Some((linear, gauge)))
    }

    /// Bounded-retry bus write with doubling backoff.
    fn write_with_retry(&mut self, command: ActuatorCommand) -> Result<(), ControlError> {
        let attempts_max = self.config.bus_retry_limit + 1;
        let mut backoff = self.config.bus_retry_backoff_ms;
        for attempt in 1..=attempts_max {
            match self.bus.write_command(command) {
                Ok(()) => {
                    if attempt > 1 {
                        log::info!("bus write recovered on attempt {attempt}");
                    }
                    return Ok(());
                }
                Err(fault) => {
                    log::warn!("bus write failed (attempt {attempt}/{attempts_max}): {fault}");
                    if attempt < attempts_max {
                        self.clock.sleep_ms(backoff);
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        Err(ControlError::ActuatorUnreachable {
            attempts: attempts_max,
        })
    }

    /// Honor a pending cancel request: re-issue the last explicit command,
    /// then surface [`ControlError::Cancelled`].
    fn check_cancel(&mut self, last: ActuatorCommand) -> Result<(), ControlError> {
        let cancelled = self.cancel.as_ref().is_some_and(CancelToken::is_cancelled);
        if !cancelled {
            return Ok(());
        }
        log::info!("cancel honored; re-issuing last command {:.3} V", last.volts);
        if let Err(fault) = self.bus.write_command(last) {
            log::warn!("re-issue of last command failed: {fault}");
        }
        Err(ControlError::Cancelled)
    }
}
