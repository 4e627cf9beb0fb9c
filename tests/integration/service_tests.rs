//! The assembled service on real threads, against the simulated kiln on
//! a 20x clock.  Assertions poll with a deadline instead of sleeping a
//! fixed amount.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kilnctl::Error;
use kilnctl::adapters::json_store::MemoryStore;
use kilnctl::adapters::sim::{KilnModel, SimulatedKiln};
use kilnctl::adapters::time::ScaledClock;
use kilnctl::app::commands::AppCommand;
use kilnctl::app::control_loop::{SessionEnd, SessionKind};
use kilnctl::app::notify::Notification;
use kilnctl::app::ports::{StoragePort, ValvePort};
use kilnctl::app::service::{KilnPorts, KilnService};
use kilnctl::config::KilnConfig;
use kilnctl::control::autotune::AutotunePhase;
use kilnctl::firing_log::{self, FiringOutcome};
use kilnctl::learning::learner::LearnerMode;
use kilnctl::program::{Program, Segment};

use super::mock_hw::{MockSolenoid, RecordingNotifier};

const SCALE: f64 = 20.0;

struct Plant {
    service: KilnService,
    kiln: SimulatedKiln,
    coil: MockSolenoid,
    notifier: RecordingNotifier,
    store: Arc<dyn StoragePort>,
}

fn plant() -> Plant {
    plant_with(KilnConfig::default()).unwrap()
}

fn plant_with(config: KilnConfig) -> kilnctl::Result<Plant> {
    let clock = Arc::new(ScaledClock::new(SCALE));
    let kiln = SimulatedKiln::new(KilnModel::default(), clock.clone());
    let coil = MockSolenoid::new();
    let notifier = RecordingNotifier::new();
    let store: Arc<dyn StoragePort> = Arc::new(MemoryStore::new());
    let service = KilnService::start_scaled(
        config,
        KilnPorts {
            sensor: Box::new(kiln.clone()),
            valve: Arc::new(kiln.clone()),
            solenoid: Some(Arc::new(coil.clone())),
            notifier: Box::new(notifier.clone()),
            clock,
            store: store.clone(),
        },
        SCALE,
    )?;
    let plant = Plant {
        service,
        kiln,
        coil,
        notifier,
        store,
    };
    let samples = plant.service.samples();
    assert!(wait_until(|| samples.read().connected));
    Ok(plant)
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn slow_program() -> Program {
    Program::new("slow", vec![Segment::new(900.0, 50.0, 60.0)], 1290.0).unwrap()
}

#[test]
fn boot_opens_solenoid_and_announces_itself() {
    let p = plant();
    assert!(p.coil.energized());
    let status = p.service.status();
    assert_eq!(status.session, None);
    assert!(status.watchdog.running);
    assert!(!status.valve_latched);
    assert!(wait_until(|| p.notifier.count(&Notification::system_start()) == 1));
    p.service.shutdown();
    assert!(!p.coil.energized());
}

#[test]
fn invalid_config_is_refused_before_anything_runs() {
    let mut config = KilnConfig::default();
    config.safety.max_temp = 1500.0;
    assert!(matches!(plant_with(config), Err(Error::Config(_))));
}

#[test]
fn one_session_at_a_time() {
    let mut p = plant();
    p.service.start_program(slow_program()).unwrap();
    assert_eq!(p.service.session(), Some(SessionKind::Program));
    assert_eq!(p.service.start_program(slow_program()), Err(Error::Busy));
    assert_eq!(p.service.start_autotune(None), Err(Error::Busy));

    let execution = p.service.execution();
    assert!(wait_until(|| execution.read().running));
    assert_eq!(p.service.stop_program(), Some(SessionEnd::Stopped));
    assert_eq!(p.service.session(), None);
    assert_eq!(p.kiln.position(), 0.0);

    let keys = firing_log::list_firings(p.store.as_ref()).unwrap();
    assert_eq!(keys.len(), 1);
    let record = firing_log::load_firing(p.store.as_ref(), &keys[0]).unwrap().unwrap();
    assert_eq!(record.outcome, FiringOutcome::Stopped);
    p.service.shutdown();
}

#[test]
fn manual_emergency_stop_latches_until_reset() {
    let mut p = plant();
    p.service.start_program(slow_program()).unwrap();
    assert_eq!(p.service.emergency_stop(), Some(SessionEnd::Aborted));
    assert!(p.service.status().valve_latched);
    assert!(!p.coil.energized());
    assert_eq!(
        p.service.start_program(slow_program()),
        Err(Error::EmergencyLatched)
    );

    p.service.reset_emergency().unwrap();
    assert!(p.coil.energized());
    assert!(!p.service.status().valve_latched);
    p.service.start_program(slow_program()).unwrap();
    assert_eq!(p.service.stop_program(), Some(SessionEnd::Stopped));
    p.service.shutdown();
}

#[test]
fn over_temperature_aborts_running_program() {
    let mut p = plant();
    p.service.start_program(slow_program()).unwrap();
    p.kiln.set_temperature(1350.0);

    assert!(wait_until(|| p.service.session().is_none()));
    assert_eq!(p.service.wait_session(), Some(SessionEnd::Aborted));
    assert!(p.service.status().valve_latched);
    assert!(wait_until(|| p.notifier.count(&Notification::over_temp(0.0)) == 1));
    assert_eq!(p.service.status().last_session_end, Some(SessionEnd::Aborted));
    p.service.shutdown();
}

#[test]
fn lost_sensor_blocks_new_sessions() {
    let mut p = plant();
    p.kiln.set_sensor_connected(false);
    let samples = p.service.samples();
    assert!(wait_until(|| !samples.read().connected));
    let refused = p.service.start_program(slow_program());
    assert!(matches!(
        refused,
        Err(Error::EmergencyLatched | Error::SensorUnavailable)
    ));
    assert!(wait_until(|| p.notifier.count(&Notification::sensor_error()) == 1));
    p.service.shutdown();
}

#[test]
fn autotune_session_can_be_cancelled() {
    let mut p = plant();
    p.service.start_autotune(Some(300.0)).unwrap();
    assert_eq!(p.service.session(), Some(SessionKind::Autotune));
    let status = p.service.status().autotune;
    assert!(status.running);
    assert_eq!(status.test_temperature, 300.0);

    assert_eq!(p.service.stop_autotune(), Some(SessionEnd::Stopped));
    assert_eq!(p.service.session(), None);
    assert_ne!(p.service.status().autotune.phase, AutotunePhase::Relay);
    // a stopped autotune leaves the gain table alone
    assert_eq!(p.service.table_summary().metadata.source, "default_from_config");
    p.service.shutdown();
}

#[test]
fn stop_autotune_ignores_program_sessions() {
    let mut p = plant();
    p.service.start_program(slow_program()).unwrap();
    assert_eq!(p.service.stop_autotune(), None);
    assert_eq!(p.service.session(), Some(SessionKind::Program));
    p.service.shutdown();
}

#[test]
fn commands_route_to_the_same_operations() {
    let mut p = plant();
    p.service
        .handle_command(AppCommand::StartProgram(slow_program()))
        .unwrap();
    assert_eq!(p.service.session(), Some(SessionKind::Program));
    p.service.handle_command(AppCommand::StopProgram).unwrap();
    assert_eq!(p.service.session(), None);

    p.service
        .handle_command(AppCommand::SetLearnerMode(LearnerMode::Auto))
        .unwrap();
    assert_eq!(p.service.status().learner.mode, LearnerMode::Auto);
    // nothing completed yet, so nothing to learn from
    p.service.handle_command(AppCommand::Learn).unwrap();
    p.service.handle_command(AppCommand::RollbackAll).unwrap();
    p.service.handle_command(AppCommand::RollbackBand(9999)).unwrap();
    p.service.shutdown();
}
