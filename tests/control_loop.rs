//! Closed-loop tests against a simulated chamber.
//!
//! The plant responds to a regulator command by settling exactly onto the
//! calibrated pressure for that voltage plus a configurable miscalibration
//! offset, then synthesizes both sensors' raw voltages by inverting their
//! calibration transforms. A shared event log records every command write,
//! settling wait and acquisition so tests can assert the loop's ordering,
//! not just its outcome.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use pressctl::constants::{GAUGE_KNOT_PA, GAUGE_KNOT_VOLTS};
use pressctl::{
    AccumulatedRun, ActuatorBus, ActuatorCommand, AcquisitionError, BusError, CalibrationCurve,
    CancelToken, CapacitanceGauge, Clock, ControlConfig, ControlError, ControlLoop,
    InterpolationMethod, LineState, RawWindow, RegulatorMap, SamplePair, SampleSource,
    SourceRegime, TriggerLine,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Write(u16),
    Sleep(u64),
    Acquire,
}

type EventLog = Arc<Mutex<Vec<Event>>>;

struct TestClock {
    now: AtomicU64,
    log: EventLog,
}

impl TestClock {
    fn new(log: EventLog) -> Self {
        Self {
            now: AtomicU64::new(0),
            log,
        }
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    fn sleep_ms(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
        self.log.lock().unwrap().push(Event::Sleep(ms));
    }
}

/// Simulated chamber plus regulator.
struct Plant {
    /// Same calibration table the controller uses: pressure kPa to volts.
    curve: CalibrationCurve,
    /// Regulator miscalibration: settled pressure is calibrated + offset.
    offset_kpa: f32,
    /// Regulator jammed: commands are accepted but pressure never moves.
    stuck: bool,
    current_kpa: f32,
    commanded: Option<ActuatorCommand>,
    /// Fail this many writes before accepting one.
    write_faults: u32,
    /// Fail this many acquisitions before delivering one.
    acquire_faults: u32,
    /// Pa -> volts inverse of the gauge's knot table.
    gauge_inverse: CalibrationCurve,
    log: EventLog,
}

impl Plant {
    fn new(curve: CalibrationCurve, start_kpa: f32, log: EventLog) -> Self {
        Self {
            curve,
            offset_kpa: 0.0,
            stuck: false,
            current_kpa: start_kpa,
            commanded: None,
            write_faults: 0,
            acquire_faults: 0,
            gauge_inverse: CalibrationCurve::from_points(
                GAUGE_KNOT_PA.iter().copied().zip(GAUGE_KNOT_VOLTS.iter().copied()),
            )
            .unwrap(),
            log,
        }
    }

    fn settle(&mut self) {
        if self.stuck {
            return;
        }
        if let Some(cmd) = self.commanded {
            self.current_kpa = self.curve.x_for_y(cmd.volts) + self.offset_kpa;
        }
    }
}

/// Invert the linear transducer's factory curve: kPa back to bridge volts.
fn linear_volts(kpa: f32) -> f32 {
    ((kpa + 4.9) / 100.0 - 0.061) * 10.095
}

struct Source(Rc<RefCell<Plant>>);

impl SampleSource for Source {
    fn acquire(&mut self, rate: u32, secs: f32) -> Result<SamplePair, AcquisitionError> {
        let mut plant = self.0.borrow_mut();
        plant.log.lock().unwrap().push(Event::Acquire);
        if plant.acquire_faults > 0 {
            plant.acquire_faults -= 1;
            return Err(AcquisitionError::Timeout);
        }
        plant.settle();
        let n = (rate as f32 * secs) as usize;
        let timestamps: Vec<f32> = (0..n).map(|i| i as f32 / rate as f32).collect();
        let lv = linear_volts(plant.current_kpa);
        let gv = plant.gauge_inverse.value_at(plant.current_kpa * 1_000.0);
        Ok(SamplePair {
            linear: RawWindow::new(timestamps.clone(), vec![lv; n]),
            gauge: RawWindow::new(timestamps, vec![gv; n]),
        })
    }
}

struct Bus(Rc<RefCell<Plant>>);

impl ActuatorBus for Bus {
    fn write_command(&mut self, command: ActuatorCommand) -> Result<(), BusError> {
        let mut plant = self.0.borrow_mut();
        if plant.write_faults > 0 {
            plant.write_faults -= 1;
            return Err(BusError::ChannelClosed);
        }
        plant
            .log
            .lock()
            .unwrap()
            .push(Event::Write(command.register_value()));
        plant.commanded = Some(command);
        Ok(())
    }

    fn read_command(&mut self) -> Result<ActuatorCommand, BusError> {
        self.0
            .borrow()
            .commanded
            .ok_or(BusError::ReadFailed { register: 0 })
    }
}

struct Trigger {
    states: Arc<Mutex<Vec<LineState>>>,
}

impl TriggerLine for Trigger {
    fn set(&mut self, state: LineState) -> Result<(), BusError> {
        self.states.lock().unwrap().push(state);
        Ok(())
    }
}

/// Bench table: 10..=100 kPa every 2 kPa, 12.0 V upward in 0.1 V steps.
fn bench_map() -> RegulatorMap {
    let points: Vec<(f32, f32)> = (0..46)
        .map(|i| (10.0 + 2.0 * i as f32, 12.0 + 0.1 * i as f32))
        .collect();
    RegulatorMap::new(CalibrationCurve::from_points(points).unwrap())
}

/// Gentle gains sized to the 2 kPa knot spacing of [`bench_map`].
fn bench_config() -> ControlConfig {
    ControlConfig {
        gains: pressctl::Gains {
            pgain: 0.5,
            dgain: 0.0,
            igain: 0.0,
        },
        sample_rate_hz: 100,
        window_secs: 0.5,
        confirm_window_secs: None,
        ..ControlConfig::default()
    }
}

fn writes(log: &EventLog) -> Vec<u16> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::Write(r) => Some(*r),
            _ => None,
        })
        .collect()
}

#[test]
fn converges_after_one_trim() {
    let log: EventLog = EventLog::default();
    let map = bench_map();
    let clock = TestClock::new(log.clone());
    let plant = Rc::new(RefCell::new(Plant::new(
        map.curve().clone(),
        101.0,
        log.clone(),
    )));
    // Regulator settles 4 kPa below its calibration.
    plant.borrow_mut().offset_kpa = -4.0;
    let mut source = Source(plant.clone());
    let mut bus = Bus(plant);

    let mut run = AccumulatedRun::new();
    let mut ctl =
        ControlLoop::new(&map, &mut source, &mut bus, &clock).with_config(bench_config());
    let result = ctl.run_to_setpoint(40.0, &mut run).unwrap();

    assert_eq!(result.iterations, 2);
    assert!((result.estimate.pressure_kpa - 40.0).abs() < 0.05);
    assert_eq!(result.estimate.regime, SourceRegime::HighRangeSensorOnly);
    assert_eq!(result.elapsed_ms, 30_000 + 15_000);
    assert!(result.confirm.is_none());

    assert_eq!(run.len(), 1);
    assert_eq!(run.records()[0].target_kpa, 40.0);

    // First command is the table's best guess; the trim walks up two knots
    // to cancel the offset. A settle wait separates every command from the
    // sample that judges it.
    let r0 = map.voltage_for(40.0, 0).register_value();
    let r1 = map.voltage_for(40.0, 2).register_value();
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            Event::Write(r0),
            Event::Sleep(30_000),
            Event::Acquire,
            Event::Write(r1),
            Event::Sleep(15_000),
            Event::Acquire,
        ]
    );
}

#[test]
fn low_range_setpoint_rides_the_gauge() {
    let log: EventLog = EventLog::default();
    // Fine-vacuum table: 0.4..=2.0 kPa onto 1.0..=5.0 V.
    let points: Vec<(f32, f32)> = (0..9)
        .map(|i| (0.4 + 0.2 * i as f32, 1.0 + 0.5 * i as f32))
        .collect();
    let map = RegulatorMap::new(CalibrationCurve::from_points(points).unwrap());
    let clock = TestClock::new(log.clone());
    let plant = Rc::new(RefCell::new(Plant::new(map.curve().clone(), 1.8, log)));
    let mut source = Source(plant.clone());
    let mut bus = Bus(plant);

    let mut run = AccumulatedRun::new();
    // Piecewise-linear gauge so the plant's inverse table round-trips.
    let mut ctl = ControlLoop::new(&map, &mut source, &mut bus, &clock)
        .with_config(bench_config())
        .with_gauge(CapacitanceGauge::new(InterpolationMethod::Linear).unwrap());
    let result = ctl.run_to_setpoint(1.0, &mut run).unwrap();

    assert_eq!(result.iterations, 1);
    assert_eq!(result.estimate.regime, SourceRegime::LowRangeSensorOnly);
    assert!((result.estimate.pressure_kpa - 1.0).abs() < 0.01);
}

#[test]
fn stagnation_doubles_the_kick_until_timeout() {
    let log: EventLog = EventLog::default();
    let map = bench_map();
    let clock = TestClock::new(log.clone());
    let plant = Rc::new(RefCell::new(Plant::new(
        map.curve().clone(),
        50.0,
        log.clone(),
    )));
    plant.borrow_mut().stuck = true;
    let mut source = Source(plant.clone());
    let mut bus = Bus(plant);

    let mut config = bench_config();
    config.gains.pgain = 0.1;
    config.max_iterations = 4;
    let mut run = AccumulatedRun::new();
    let mut ctl = ControlLoop::new(&map, &mut source, &mut bus, &clock).with_config(config);
    let failure = ctl.run_to_setpoint(40.0, &mut run).unwrap_err();

    assert_eq!(
        failure.error,
        ControlError::Timeout {
            iterations: 4,
            elapsed_ms: 30_000 + 3 * 15_000,
        }
    );
    // Every completed iteration left its evidence.
    assert_eq!(failure.partial.len(), 4);
    for estimate in &failure.partial {
        assert!((estimate.pressure_kpa - 50.0).abs() < 0.01);
    }
    assert!(run.is_empty());

    // The jammed regulator reads 50.0 every time, so each repeat doubles
    // the proportional kick: bias walks 0, -1, -3, -7.
    let expected: Vec<u16> = [0, -1, -3, -7]
        .iter()
        .map(|&b| map.voltage_for(40.0, b).register_value())
        .collect();
    assert_eq!(writes(&log), expected);
}

#[test]
fn cancel_reissues_last_command() {
    let log: EventLog = EventLog::default();
    let map = bench_map();
    let clock = TestClock::new(log.clone());
    let plant = Rc::new(RefCell::new(Plant::new(
        map.curve().clone(),
        101.0,
        log.clone(),
    )));
    let mut source = Source(plant.clone());
    let mut bus = Bus(plant);

    let token = CancelToken::new();
    token.cancel();
    let mut run = AccumulatedRun::new();
    let mut ctl = ControlLoop::new(&map, &mut source, &mut bus, &clock)
        .with_config(bench_config())
        .with_cancel(token);
    let failure = ctl.run_to_setpoint(40.0, &mut run).unwrap_err();

    assert_eq!(failure.error, ControlError::Cancelled);
    assert!(failure.partial.is_empty());
    // The last explicit command is written again on the way out, so the
    // regulator is left holding a known voltage.
    let r0 = map.voltage_for(40.0, 0).register_value();
    assert_eq!(writes(&log), vec![r0, r0]);
}

#[test]
fn one_acquisition_fault_is_retried() {
    let log: EventLog = EventLog::default();
    let map = bench_map();
    let clock = TestClock::new(log.clone());
    let plant = Rc::new(RefCell::new(Plant::new(
        map.curve().clone(),
        101.0,
        log.clone(),
    )));
    plant.borrow_mut().acquire_faults = 1;
    let mut source = Source(plant.clone());
    let mut bus = Bus(plant);

    let mut run = AccumulatedRun::new();
    let mut ctl =
        ControlLoop::new(&map, &mut source, &mut bus, &clock).with_config(bench_config());
    let result = ctl.run_to_setpoint(40.0, &mut run).unwrap();

    assert_eq!(result.iterations, 1);
    let acquires = log
        .lock()
        .unwrap()
        .iter()
        .filter(|e| **e == Event::Acquire)
        .count();
    assert_eq!(acquires, 2);
}

#[test]
fn persistent_acquisition_faults_fail_the_setpoint() {
    let log: EventLog = EventLog::default();
    let map = bench_map();
    let clock = TestClock::new(log.clone());
    let plant = Rc::new(RefCell::new(Plant::new(map.curve().clone(), 101.0, log)));
    plant.borrow_mut().acquire_faults = 10;
    let mut source = Source(plant.clone());
    let mut bus = Bus(plant);

    let mut run = AccumulatedRun::new();
    let mut ctl =
        ControlLoop::new(&map, &mut source, &mut bus, &clock).with_config(bench_config());
    let failure = ctl.run_to_setpoint(40.0, &mut run).unwrap_err();

    assert_eq!(failure.error, ControlError::SensorUnavailable);
    assert!(failure.partial.is_empty());
}

#[test]
fn unreachable_bus_gives_up_after_bounded_retries() {
    let log: EventLog = EventLog::default();
    let map = bench_map();
    let clock = TestClock::new(log.clone());
    let plant = Rc::new(RefCell::new(Plant::new(
        map.curve().clone(),
        101.0,
        log.clone(),
    )));
    plant.borrow_mut().write_faults = 10;
    let mut source = Source(plant.clone());
    let mut bus = Bus(plant);

    let mut run = AccumulatedRun::new();
    let mut ctl =
        ControlLoop::new(&map, &mut source, &mut bus, &clock).with_config(bench_config());
    let failure = ctl.run_to_setpoint(40.0, &mut run).unwrap_err();

    assert_eq!(failure.error, ControlError::ActuatorUnreachable { attempts: 4 });
    // Doubling backoff between the four attempts, nothing else happened.
    assert_eq!(
        *log.lock().unwrap(),
        vec![Event::Sleep(250), Event::Sleep(500), Event::Sleep(1_000)]
    );
}

#[test]
fn confirmatory_window_pulses_the_trigger() {
    let log: EventLog = EventLog::default();
    let map = bench_map();
    let clock = TestClock::new(log.clone());
    let plant = Rc::new(RefCell::new(Plant::new(map.curve().clone(), 101.0, log)));
    let mut source = Source(plant.clone());
    let mut bus = Bus(plant);

    let states = Arc::new(Mutex::new(Vec::new()));
    let mut trigger = Trigger {
        states: states.clone(),
    };
    let mut config = bench_config();
    config.confirm_window_secs = Some(1.0);
    let mut run = AccumulatedRun::new();
    let mut ctl = ControlLoop::new(&map, &mut source, &mut bus, &clock)
        .with_config(config)
        .with_trigger(&mut trigger);
    let result = ctl.run_to_setpoint(40.0, &mut run).unwrap();

    let (linear, gauge) = result.confirm.expect("confirmatory readings");
    // 1 s at 100 Hz on both channels.
    assert_eq!(linear.len(), 100);
    assert_eq!(gauge.len(), 100);
    assert_eq!(*states.lock().unwrap(), vec![LineState::On, LineState::Off]);
}

#[test]
fn session_accumulates_across_setpoints() {
    let log: EventLog = EventLog::default();
    let map = bench_map();
    let clock = TestClock::new(log.clone());
    let plant = Rc::new(RefCell::new(Plant::new(map.curve().clone(), 101.0, log)));
    let mut source = Source(plant.clone());
    let mut bus = Bus(plant);

    let mut run = AccumulatedRun::new();
    let mut ctl =
        ControlLoop::new(&map, &mut source, &mut bus, &clock).with_config(bench_config());
    ctl.run_to_setpoint(40.0, &mut run).unwrap();
    ctl.run_to_setpoint(60.0, &mut run).unwrap();

    assert_eq!(run.len(), 2);
    assert_eq!(run.records()[0].target_kpa, 40.0);
    assert_eq!(run.records()[1].target_kpa, 60.0);
    // The held register reads back as the last setpoint's pressure.
    assert!((ctl.read_back_kpa().unwrap() - 60.0).abs() < 0.01);
}
