//! kilnctl: kiln controller command line.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  SimulatedKiln      LogNotifier     FileStore    ScaledClock │
//! │  (Sensor+Valve+     (Notifier)      (Storage)    (Clock)     │
//! │   Solenoid)                                                  │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ────────────────────   │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ KilnService                                            │  │
//! │  │ sensor loop · watchdog · control session · notify      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │  Offline: PidAnalyzer · PidLearner · AdaptivePidTable        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};

use kilnctl::adapters::json_store::FileStore;
use kilnctl::adapters::log_sink::LogNotifier;
use kilnctl::adapters::sim::{KilnModel, SimulatedKiln};
use kilnctl::adapters::time::ScaledClock;
use kilnctl::app::ports::{Clock, StoragePort};
use kilnctl::app::service::{KilnPorts, KilnService};
use kilnctl::config::KilnConfig;
use kilnctl::control::adaptive::AdaptivePidTable;
use kilnctl::control::pid::PidGains;
use kilnctl::firing_log;
use kilnctl::learning::analyzer::PidAnalyzer;
use kilnctl::learning::learner::{LearnerMode, PidLearner};
use kilnctl::program::Program;

#[derive(Parser)]
#[command(name = "kilnctl")]
#[command(about = "Gas kiln controller: firing, autotune and PID learning", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for gain tables, histories and firing logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fire a program against the simulated kiln
    Fire {
        /// Program JSON file
        program: PathBuf,
        /// Simulated seconds per real second
        #[arg(long, default_value_t = 60.0)]
        time_scale: f64,
    },
    /// Relay autotune against the simulated kiln
    Autotune {
        /// Test temperature in °C
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long, default_value_t = 60.0)]
        time_scale: f64,
    },
    /// Analyze stored firing logs
    Analyze {
        /// Analyze only this firing key
        #[arg(long)]
        key: Option<String>,
    },
    /// Analyze and learn from stored firings
    Learn {
        /// Require suggestions to recur across recent firings
        #[arg(long)]
        all: bool,
    },
    /// Learn from the latest firing and apply every suggestion
    Approve,
    /// Learn from the latest firing and discard every suggestion
    Reject,
    /// Set the learner mode
    Mode {
        mode: LearnerMode,
    },
    /// Show the adaptive gain table
    Table {
        /// Restore one band's base gains
        #[arg(long, conflicts_with = "rollback_all")]
        rollback: Option<u32>,
        /// Restore every band's base gains
        #[arg(long)]
        rollback_all: bool,
    },
    /// Estimate a program's duration
    Estimate {
        program: PathBuf,
        /// Starting temperature in °C (ambient by default)
        #[arg(long)]
        from: Option<f64>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => KilnConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => KilnConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Fire {
            program,
            time_scale,
        } => cmd_fire(config, &program, time_scale),
        Commands::Autotune {
            temperature,
            time_scale,
        } => cmd_autotune(config, temperature, time_scale),
        Commands::Analyze { key } => cmd_analyze(&config, key.as_deref()),
        Commands::Learn { all } => cmd_learn(&config, all),
        Commands::Approve => cmd_decide(&config, true),
        Commands::Reject => cmd_decide(&config, false),
        Commands::Mode { mode } => {
            let mut learner = PidLearner::load(&config.learner, store(&config));
            learner.set_mode(mode);
            println!("learner mode: {mode}");
            Ok(())
        }
        Commands::Table {
            rollback,
            rollback_all,
        } => cmd_table(&config, rollback, rollback_all),
        Commands::Estimate { program, from } => cmd_estimate(&config, &program, from),
    }
}

fn store(config: &KilnConfig) -> Arc<dyn StoragePort> {
    Arc::new(FileStore::new(config.data_dir.clone()))
}

fn table(config: &KilnConfig) -> AdaptivePidTable {
    let gains = PidGains::new(config.pid.kp, config.pid.ki, config.pid.kd);
    AdaptivePidTable::load_or_create(&config.adaptive, gains, store(config))
}

fn load_program(config: &KilnConfig, path: &Path) -> Result<Program> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading program {}", path.display()))?;
    Program::from_json(&json, config.safety.max_temp)
        .with_context(|| format!("invalid program {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Simulation ────────────────────────────────────────────────

fn simulated_service(config: KilnConfig, time_scale: f64) -> Result<KilnService> {
    let clock: Arc<dyn Clock> = Arc::new(ScaledClock::new(time_scale));
    let kiln = SimulatedKiln::new(
        KilnModel {
            ambient: config.runner.ambient_temp,
            ..KilnModel::default()
        },
        clock.clone(),
    );
    let ports = KilnPorts {
        sensor: Box::new(kiln.clone()),
        valve: Arc::new(kiln.clone()),
        solenoid: Some(Arc::new(kiln)),
        notifier: Box::new(LogNotifier::new()),
        clock,
        store: store(&config),
    };
    let service = KilnService::start_scaled(config, ports, time_scale)?;

    // first sample
    let samples = service.samples();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !samples.read().connected {
        if Instant::now() > deadline {
            bail!("no temperature reading from the kiln");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    Ok(service)
}

/// Log progress until the running session ends.
fn follow(service: &KilnService, autotune: bool) {
    let execution = service.execution();
    while service.session().is_some() {
        std::thread::sleep(Duration::from_secs(1));
        let status = service.status();
        if autotune {
            let a = status.autotune;
            info!(
                "AUTOTUNE | {:?} T={:.1}\u{00b0}C oscillations {}/{} ({:.0}%)",
                a.phase, status.temperature.hot, a.oscillations, a.required_oscillations, a.progress
            );
        } else {
            let e = execution.read();
            info!(
                "FIRING | {:?} seg {}/{} T={:.1} SP={:.1} valve {:.1}% elapsed {:.0} min, ~{:.0} min left",
                e.phase,
                e.segment,
                e.total_segments,
                e.temperature,
                e.setpoint,
                e.valve,
                e.elapsed_minutes,
                e.remaining_minutes
            );
        }
    }
}

fn cmd_fire(config: KilnConfig, path: &Path, time_scale: f64) -> Result<()> {
    let program = load_program(&config, path)?;
    let mut service = simulated_service(config, time_scale)?;
    service
        .start_program(program)
        .context("program refused")?;
    follow(&service, false);
    let end = service.wait_session();
    println!("firing ended: {end:?}");
    print_json(&service.execution().read())?;
    service.shutdown();
    Ok(())
}

fn cmd_autotune(config: KilnConfig, temperature: Option<f64>, time_scale: f64) -> Result<()> {
    let mut service = simulated_service(config, time_scale)?;
    service
        .start_autotune(temperature)
        .context("autotune refused")?;
    follow(&service, true);
    let end = service.wait_session();
    println!("autotune ended: {end:?}");
    print_json(&service.table_summary())?;
    service.shutdown();
    Ok(())
}

// ── Offline learning ──────────────────────────────────────────

fn cmd_analyze(config: &KilnConfig, key: Option<&str>) -> Result<()> {
    let store = store(config);
    let mut analyzer = PidAnalyzer::new(&config.analyzer, &config.adaptive.bands);
    match key {
        Some(key) => match analyzer.analyze_firing(store.as_ref(), key)? {
            Some(a) => print_json(&a)?,
            None => println!("{key}: not analyzable (incomplete or too few samples)"),
        },
        None => {
            let keys = firing_log::list_firings(store.as_ref())?;
            let analyses = analyzer.analyze_all(store.as_ref())?;
            println!("{} firings stored, {} analyzed", keys.len(), analyses.len());
            for a in &analyses {
                println!(
                    "  {:<48} score {:>3}  suggestions {}",
                    a.firing_key,
                    a.overall_score,
                    a.suggestions.len()
                );
            }
            print_json(&analyzer.aggregated_metrics())?;
        }
    }
    Ok(())
}

fn learn(
    config: &KilnConfig,
    all: bool,
) -> Result<(PidLearner, AdaptivePidTable, kilnctl::learning::learner::LearnOutcome)> {
    let store = store(config);
    let mut analyzer = PidAnalyzer::new(&config.analyzer, &config.adaptive.bands);
    analyzer.analyze_all(store.as_ref())?;
    let mut table = table(config);
    let mut learner = PidLearner::load(&config.learner, store);
    let outcome = if all {
        learner.process_all_analyses(analyzer.analyses(), &mut table)
    } else if let Some(latest) = analyzer.latest() {
        learner.process_analysis(latest, &mut table)
    } else {
        warn!("no completed firing to learn from");
        Default::default()
    };
    Ok((learner, table, outcome))
}

fn cmd_learn(config: &KilnConfig, all: bool) -> Result<()> {
    let (learner, _, outcome) = learn(config, all)?;
    print_json(&outcome)?;
    if !learner.pending().is_empty() {
        println!("{} adjustments pending; run `kilnctl approve` to apply", learner.pending().len());
    }
    Ok(())
}

fn cmd_decide(config: &KilnConfig, approve: bool) -> Result<()> {
    let (mut learner, mut table, _) = learn(config, false)?;
    if approve {
        let n = learner.approve_pending(&mut table);
        println!("{n} adjustments applied");
    } else {
        let n = learner.reject_pending();
        println!("{n} adjustments rejected");
    }
    Ok(())
}

fn cmd_table(config: &KilnConfig, rollback: Option<u32>, rollback_all: bool) -> Result<()> {
    let mut table = table(config);
    if let Some(band) = rollback {
        if !table.rollback_band(band) {
            bail!("no band {band} in the table");
        }
    } else if rollback_all {
        table.rollback_all();
    }
    print_json(&table.summary())
}

fn cmd_estimate(config: &KilnConfig, path: &Path, from: Option<f64>) -> Result<()> {
    let program = load_program(config, path)?;
    let start = from.unwrap_or(config.runner.ambient_temp);
    let estimate = program.estimate(start, config.runner.min_estimate_rate);
    for (i, (seg, est)) in program.segments.iter().zip(&estimate.segments).enumerate() {
        println!(
            "  {:>2}. -> {:>6.0}\u{00b0}C at {:>5.0}\u{00b0}C/h: ramp {:>6.1} min, hold {:>5.1} min",
            i + 1,
            seg.target,
            seg.rate,
            est.ramp_minutes,
            est.hold_minutes
        );
    }
    let minutes = estimate.total_minutes.round() as u64;
    println!(
        "\"{}\": {minutes} min ({}h {:02}m)",
        program.name,
        minutes / 60,
        minutes % 60
    );
    Ok(())
}
