// src/main.rs

mod config;
mod control_loop;
mod controller_client;
mod decision;
mod error;
mod frame_source;
mod inference;
mod logging;
mod mask;
mod measurement;
mod metrics;
mod mock_controller;
mod preprocessing;
mod types;
mod vehicle_detection;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use control_loop::{ControlLoop, TokioSleeper};
use controller_client::ControllerClient;
use frame_source::CameraFrameSource;
use metrics::LoopMetrics;
use std::path::Path;
use tracing::{error, info};
use types::{Config, Frame, LoggingConfig};
use vehicle_detection::{DetectorParams, VehicleDetector};

#[derive(Parser)]
#[command(name = "signal-retimer", version, about = "Adaptive traffic-signal retiming")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true, default_value = "config.yaml", env = "SIGNAL_RETIMER_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the adaptive control loop (default)
    Run,
    /// Count vehicles in a single image and print the detections
    Detect { image: String },
    /// Serve a mock intersection controller for bench testing
    MockController {
        #[arg(long, default_value = "0.0.0.0:5000")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let config = Config::load(&cli.config)?;
            logging::init(&config.logging)?;
            run(config).await
        }
        Command::Detect { image } => {
            let config = Config::load(&cli.config)?;
            logging::init(&config.logging)?;
            detect_image(&config, &image)
        }
        Command::MockController { bind } => {
            logging::init(&LoggingConfig::default())?;
            mock_controller::serve(&bind).await
        }
    }
}

fn build_detector(config: &Config) -> Result<VehicleDetector> {
    config.check_model_path()?;
    let backend = inference::build_backend(&config.model)
        .with_context(|| format!("Failed to load model {}", config.model.path))?;
    Ok(VehicleDetector::new(
        backend,
        DetectorParams::from_config(config),
    ))
}

async fn run(config: Config) -> Result<()> {
    info!("🚦 Signal retimer starting");
    info!(
        "shots={}, threshold={}, downgrade_cycles={}, lead={}s",
        config.analysis.shots_per_phase,
        config.analysis.congestion_threshold,
        config.analysis.downgrade_cycles,
        config.controller.lead_time_secs
    );
    for direction in &config.directions {
        info!(
            "Direction '{}' -> program {} (cameras {:?})",
            direction.name, direction.program, direction.cameras
        );
    }

    let masks = mask::load_masks(Path::new(&config.mask_dir), config.cameras.keys())
        .context("Failed to load camera masks")?;
    info!("✓ Masks loaded for {} camera(s)", masks.len());

    let detector = build_detector(&config)?;
    info!("✓ Vehicle detector ready ({})", detector.backend_name());

    let source = CameraFrameSource::open(&config.cameras, masks);

    let client = ControllerClient::new(
        &config.controller.api_base_url,
        config::secs(config.controller.http_timeout_secs),
    )?;
    info!("✓ Controller client ready ({})", client.base_url());

    let metrics = LoopMetrics::new();
    let mut control = ControlLoop::new(
        &config,
        client,
        Box::new(source),
        detector,
        metrics.clone(),
    );

    tokio::select! {
        _ = control.run(&TokioSleeper, None) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Cannot listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        }
    }

    let summary = metrics.summary();
    info!("📊 Final metrics:");
    info!("  Polls: {} ({} failed)", summary.polls, summary.status_failures);
    info!(
        "  Cycles: {} run, {} skipped",
        summary.cycles_run, summary.cycles_skipped
    );
    info!(
        "  Program changes: {} ({} failed)",
        summary.program_changes, summary.program_change_failures
    );
    info!(
        "  Vehicles counted: {}, absent frames: {}",
        summary.vehicles_counted, summary.absent_frames
    );
    info!("  Uptime: {:.0}s", summary.uptime_secs);
    Ok(())
}

fn detect_image(config: &Config, path: &str) -> Result<()> {
    let mut detector = build_detector(config)?;

    let rgb = image::open(path)
        .with_context(|| format!("Cannot read image {}", path))?
        .to_rgb8();
    let frame = Frame {
        width: rgb.width() as usize,
        height: rgb.height() as usize,
        data: rgb.into_raw(),
    };

    let detections = detector.detect(Some(&frame))?;
    info!("{}: {} vehicle(s)", path, detections.len());
    println!("{}", serde_json::to_string_pretty(&detections)?);
    Ok(())
}
