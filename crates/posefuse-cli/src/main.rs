//! `posefuse` – fixed-rate vehicle pose estimator.
//!
//! 1. Loads `posefuse.toml` (or `--config <path>`) and the vehicle geometry.
//! 2. Validates the source mode; a bad mode exits before anything runs.
//! 3. Subscribes the estimator to its inbound topics and, with
//!    `--replay <file>`, plays a recording onto the bus.
//! 4. Waits until every required input has arrived once, then fuses and
//!    publishes every `dt` until **Ctrl-C**.
//!
//! `--echo` writes every published state to stdout as a JSON line.

mod config;
mod replay;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use posefuse_middleware::{EventBus, Topic};
use posefuse_perception::{FrameTreePublisher, VehicleGeometry};
use posefuse_runtime::{
    EstimatorConfig, FixedRateScheduler, SchedulerReport, SourceMode, StateEstimator, WaitOutcome,
    init_tracing, wait_for_inputs,
};
use posefuse_types::PoseError;
use tracing::{error, info, warn};

/// Command-line flags.
#[derive(Parser, Debug, Default, PartialEq)]
#[command(name = "posefuse", about = "Fixed-rate vehicle pose estimator", long_about = None)]
struct CliArgs {
    /// Configuration file (default: ./posefuse.toml when present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// JSON-lines recording to play onto the bus
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Write every published state to stdout as a JSON line
    #[arg(long)]
    echo: bool,
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Logging is configured from the file, so config errors go to stderr.
    let cfg = match config::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("posefuse: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_tracing("posefuse", &cfg.logging.filter, cfg.logging.format);

    match run(cfg, args) {
        Ok(report) => {
            info!(ticks = report.ticks, overruns = report.overruns, "posefuse stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cfg: config::Config, args: CliArgs) -> Result<SchedulerReport, PoseError> {
    let mode: SourceMode = cfg.system_setup.parse()?;
    let scheduler = FixedRateScheduler::from_secs_f64(cfg.dt)?;
    let geometry = VehicleGeometry::load(&cfg.geometry_dir, &cfg.robot_name)?;
    let publisher = FrameTreePublisher::new(&geometry)?;
    let recording = args.replay.as_deref().map(replay::load).transpose()?;

    // ── Shutdown flag ─────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("shutdown requested; finishing current tick");
        shutdown_handler.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown unavailable");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| PoseError::Io {
            path: "tokio runtime".to_string(),
            source,
        })?;

    info!(
        %mode,
        dt = cfg.dt,
        robot = %cfg.robot_name,
        lr = cfg.lr,
        live = cfg.live,
        "started"
    );

    runtime.block_on(async move {
        let bus = EventBus::default();
        let estimator = Arc::new(StateEstimator::new(
            mode,
            bus.clone(),
            publisher,
            EstimatorConfig {
                live: cfg.live,
                fusion: cfg.fusion,
            },
        ));

        let mut tasks = estimator.spawn_ingest();
        if args.echo {
            tasks.push(tokio::spawn(replay::echo(bus.subscribe_to(Topic::VehicleState))));
        }
        if let Some(records) = recording {
            let replay_bus = bus.clone();
            let replay_shutdown = Arc::clone(&shutdown);
            tasks.push(tokio::spawn(async move {
                replay::play(replay_bus, records, replay_shutdown).await;
            }));
        }

        let gate = Arc::clone(&estimator);
        let report = match wait_for_inputs(|| gate.missing_inputs(), scheduler.period(), &shutdown)
            .await
        {
            WaitOutcome::Ready => {
                info!("all inputs received; estimating");
                scheduler.run(estimator.as_ref(), &shutdown).await
            }
            WaitOutcome::ShutdownRequested => {
                info!("shutdown before inputs arrived");
                SchedulerReport::default()
            }
        };

        for task in tasks {
            task.abort();
        }
        Ok(report)
    })
}
