//! Whole firings through `ProgramRunner` against the simulated kiln.
//!
//! The clock is advanced by hand one control period at a time, so a
//! multi-hour schedule runs in milliseconds and every cycle is
//! deterministic.

use std::sync::Arc;

use kilnctl::adapters::json_store::MemoryStore;
use kilnctl::adapters::sim::{KilnModel, SimulatedKiln};
use kilnctl::adapters::time::ManualClock;
use kilnctl::app::notify::{Notification, NotificationDispatcher, NotificationWorker};
use kilnctl::app::ports::{Clock, SensorPort, SolenoidPort, StoragePort};
use kilnctl::config::KilnConfig;
use kilnctl::drivers::valve::GuardedValve;
use kilnctl::firing_log::{self, EventKind, FiringOutcome};
use kilnctl::fsm::StateId;
use kilnctl::program::{Program, Segment};
use kilnctl::runner::{CycleOutcome, ExecutionSnapshot, ProgramRunner};
use kilnctl::sensors::TemperatureSample;
use kilnctl::sync::{Subscriber, snapshot};

use super::mock_hw::RecordingNotifier;

const CYCLE: f64 = 30.0;

struct Bench {
    runner: ProgramRunner,
    kiln: SimulatedKiln,
    clock: Arc<ManualClock>,
    valve: Arc<GuardedValve>,
    store: Arc<dyn StoragePort>,
    worker: NotificationWorker,
    notifier: RecordingNotifier,
    snapshots: Subscriber<ExecutionSnapshot>,
}

impl Bench {
    fn new() -> Self {
        let config = KilnConfig::default();
        let clock = Arc::new(ManualClock::new(0.0));
        let kiln = SimulatedKiln::new(KilnModel::default(), clock.clone());
        kiln.set_energized(true).unwrap();
        let valve = Arc::new(GuardedValve::new(Arc::new(kiln.clone())));
        let notifier = RecordingNotifier::new();
        let (notify, worker) = NotificationDispatcher::new(Box::new(notifier.clone()));
        let store: Arc<dyn StoragePort> = Arc::new(MemoryStore::new());
        let (tx, snapshots) = snapshot(ExecutionSnapshot::default());
        let runner = ProgramRunner::new(&config, valve.clone(), notify, store.clone(), tx);
        Self {
            runner,
            kiln,
            clock,
            valve,
            store,
            worker,
            notifier,
            snapshots,
        }
    }

    fn sample(&mut self) -> TemperatureSample {
        let reading = self.kiln.read();
        let now = self.clock.now_secs();
        let mut sample = TemperatureSample::new(reading.hot, reading.cold, now);
        sample.connected = reading.connected;
        sample
    }

    fn start(&mut self, program: Program) {
        let sample = self.sample();
        let now = self.clock.now_secs();
        self.runner.start(program, &sample, now).unwrap();
    }

    /// One control period: advance time, read, cycle.
    fn step(&mut self) -> CycleOutcome {
        self.clock.advance(CYCLE);
        let sample = self.sample();
        let outcome = self.runner.cycle(&sample, sample.timestamp);
        self.worker.flush();
        outcome
    }

    fn run_to_end(&mut self, max_cycles: usize) -> CycleOutcome {
        for _ in 0..max_cycles {
            let outcome = self.step();
            if matches!(outcome, CycleOutcome::Finished(_)) {
                return outcome;
            }
        }
        panic!("firing did not finish in {max_cycles} cycles");
    }
}

fn two_segment_program() -> Program {
    Program::new(
        "bisque-mini",
        vec![Segment::new(200.0, 600.0, 10.0), Segment::new(100.0, 600.0, 0.0)],
        1290.0,
    )
    .unwrap()
}

#[test]
fn heating_hold_and_cooling_program_completes() {
    let mut bench = Bench::new();
    bench.start(two_segment_program());

    let outcome = bench.run_to_end(2000);
    assert_eq!(outcome, CycleOutcome::Finished(FiringOutcome::Completed));
    assert_eq!(bench.runner.phase(), StateId::Complete);
    assert!(!bench.runner.is_running());
    assert_eq!(bench.valve.position(), 0.0);
    assert!(!bench.valve.is_latched());
    assert!(!bench.snapshots.read().running);

    let titles = bench.notifier.titles();
    assert_eq!(titles.first().map(String::as_str), Some("Firing started"));
    assert_eq!(titles.last().map(String::as_str), Some("Firing complete"));
    assert_eq!(bench.notifier.count(&Notification::hold_start(200.0, 10.0)), 1);
    assert_eq!(bench.notifier.count(&Notification::cooling_start(0.0)), 1);
}

#[test]
fn firing_log_records_phases_in_order() {
    let mut bench = Bench::new();
    bench.start(two_segment_program());
    bench.run_to_end(2000);

    let key = bench.runner.last_firing_key().unwrap().to_owned();
    assert!(firing_log::list_firings(bench.store.as_ref()).unwrap().contains(&key));
    let record = firing_log::load_firing(bench.store.as_ref(), &key)
        .unwrap()
        .unwrap();
    assert_eq!(record.program_name, "bisque-mini");
    assert_eq!(record.outcome, FiringOutcome::Completed);

    let phases: Vec<EventKind> = record
        .events
        .iter()
        .map(|e| e.kind)
        .filter(|k| *k != EventKind::ValveLimited)
        .collect();
    assert_eq!(
        phases,
        vec![
            EventKind::ProgramStart,
            EventKind::RampStart,
            EventKind::RampComplete,
            EventKind::HoldStart,
            EventKind::HoldComplete,
            EventKind::SegmentComplete,
            EventKind::RampStart,
            EventKind::RampComplete,
            EventKind::SegmentComplete,
            EventKind::ProgramComplete,
        ]
    );

    // one logged cycle per log interval, times ascending
    assert!(record.temperatures.len() > 10);
    assert!(
        record
            .temperatures
            .windows(2)
            .all(|w| w[0].time_min < w[1].time_min)
    );
    let stats = record.statistics.unwrap();
    assert_eq!(stats.total_samples, record.temperatures.len());
    assert!(stats.max_temp >= 190.0);
}

#[test]
fn valve_moves_at_most_one_step_per_cycle_for_whole_firing() {
    let mut bench = Bench::new();
    bench.start(two_segment_program());
    let mut previous = bench.valve.position();
    for _ in 0..2000 {
        let outcome = bench.step();
        let now = bench.valve.position();
        assert!((now - previous).abs() <= 10.0 + 1e-9, "{previous} -> {now}");
        previous = now;
        if matches!(outcome, CycleOutcome::Finished(_)) {
            break;
        }
    }
}

#[test]
fn hold_countdown_pauses_while_out_of_band() {
    let mut bench = Bench::new();
    bench.kiln.set_temperature(195.0);
    bench.start(
        Program::new("hold", vec![Segment::new(200.0, 600.0, 30.0)], 1290.0).unwrap(),
    );
    bench.step();
    assert_eq!(bench.runner.phase(), StateId::Hold);
    for _ in 0..3 {
        bench.kiln.set_temperature(200.0);
        bench.step();
    }
    let counted = bench.runner.hold_remaining_secs();
    assert!(counted < 30.0 * 60.0);

    // the smoothed reading has to leave the ±15 °C band
    for _ in 0..6 {
        bench.kiln.set_temperature(150.0);
        bench.step();
    }
    let paused = bench.runner.hold_remaining_secs();
    bench.kiln.set_temperature(150.0);
    bench.step();
    assert_eq!(bench.runner.hold_remaining_secs(), paused);
    assert!(paused <= counted);
    assert_eq!(bench.runner.phase(), StateId::Hold);
}

#[test]
fn stop_mid_firing_keeps_partial_log_and_allows_restart() {
    let mut bench = Bench::new();
    bench.start(two_segment_program());
    for _ in 0..20 {
        bench.step();
    }
    let now = bench.clock.now_secs();
    assert!(bench.runner.stop(now));
    assert!(!bench.runner.stop(now));
    bench.worker.flush();
    assert_eq!(bench.notifier.count(&Notification::program_stopped("")), 1);

    let key = bench.runner.last_firing_key().unwrap().to_owned();
    let record = firing_log::load_firing(bench.store.as_ref(), &key)
        .unwrap()
        .unwrap();
    assert_eq!(record.outcome, FiringOutcome::Stopped);
    assert!(record.statistics.is_some());

    bench.start(two_segment_program());
    assert!(bench.runner.is_running());
    assert_eq!(bench.step(), CycleOutcome::Continue);
}

#[test]
fn emergency_stop_latches_and_blocks_restart() {
    let mut bench = Bench::new();
    bench.start(two_segment_program());
    bench.step();
    let now = bench.clock.now_secs();
    assert!(bench.runner.emergency_stop(now));
    assert!(bench.valve.is_latched());
    assert_eq!(bench.valve.position(), 0.0);

    let sample = bench.sample();
    assert_eq!(
        bench.runner.start(two_segment_program(), &sample, now),
        Err(kilnctl::Error::EmergencyLatched)
    );
}
