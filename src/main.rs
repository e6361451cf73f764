//! Plate recognition gate - reads camera frames, resolves plates against the
//! known-plate registry and drives the barrier.
//!
//! Module structure:
//! - `domain/` - Core types (plates, events, registry)
//! - `io/` - External interfaces (frames, vision, status store, egress, snapshots)
//! - `services/` - Business logic (correction, cooldown, decision, pipeline, gate)
//! - `infra/` - Infrastructure (Config, Metrics)

use anpr_gate::infra::{Config, GateMode, Metrics};
use anpr_gate::io::{
    BlankFrameSource, DirSnapshotStore, FileStatusStore, FrameSource, ImageSequenceSource,
    JsonlEventSink, ReplayVision, SnapshotStore,
};
use anpr_gate::services::gate::GateCommand;
use anpr_gate::services::pipeline::{Collaborators, Pipeline};
use anpr_gate::services::{create_gate_worker, GateController};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Frame size used when replaying observations without footage
const BLANK_FRAME_WIDTH: u32 = 1280;
const BLANK_FRAME_HEIGHT: u32 = 720;

/// Plate recognition gate controller
#[derive(Parser, Debug)]
#[command(name = "anpr-gate", version, about)]
struct Args {
    /// Path to TOML configuration file (default: CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Directory of decoded frames (image files, read in name order)
    #[arg(long)]
    frames: Option<String>,

    /// JSONL file of recorded detector/OCR output, keyed by frame index
    #[arg(long)]
    observations: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "anpr-gate starting");

    let args = Args::parse();
    let config = Config::load_named(args.config.as_deref())?;

    let gate_mode_str = match config.gate_mode() {
        GateMode::Log => "log",
        GateMode::Http => "http",
    };
    info!(
        config_file = %config.config_file(),
        camera_id = %config.camera_id(),
        direction = %config.direction().as_str(),
        frame_skip = %config.frame_skip(),
        fps = %config.fps(),
        known_plates = %config.registry().len(),
        cooldown_s = %config.cooldown_seconds(),
        unknown_plate_policy = ?config.unknown_plate_policy(),
        gate_mode = %gate_mode_str,
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let observations = args
        .observations
        .as_deref()
        .context("no detector configured: pass --observations <jsonl>")?;
    let vision = Arc::new(ReplayVision::from_file(
        observations,
        config.detection_confidence(),
        config.iou_threshold(),
    )?);

    // Source must open before anything else starts
    let source: Box<dyn FrameSource> = match args.frames.as_deref() {
        Some(dir) => Box::new(ImageSequenceSource::open(dir)?),
        None => {
            let count = vision.last_frame().unwrap_or(0);
            info!(frames = %count, "replaying_without_footage");
            Box::new(BlankFrameSource::new(count, BLANK_FRAME_WIDTH, BLANK_FRAME_HEIGHT))
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Gate worker (network I/O off the frame loop)
    let gate: Arc<dyn GateCommand> = Arc::new(GateController::new(&config));
    let (gate_sender, gate_worker) = create_gate_worker(gate, metrics.clone(), config.gate_queue_size());
    let gate_handle = tokio::spawn(gate_worker.run());

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        let camera_id = config.camera_id().to_string();
        tokio::spawn(async move {
            if let Err(e) = anpr_gate::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                camera_id,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let status_store = Arc::new(FileStatusStore::open(config.status_file())?);
    let snapshots = config
        .snapshot_dir()
        .map(|dir| Arc::new(DirSnapshotStore::new(dir)) as Arc<dyn SnapshotStore>);

    let pipeline = Pipeline::new(
        &config,
        Collaborators {
            detector: vision.clone(),
            recognizer: vision,
            status_store,
            sink: Arc::new(JsonlEventSink::new(config.events_file())),
            snapshots,
            gate: Arc::new(gate_sender),
        },
        metrics.clone(),
    );

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // The frame loop is synchronous; keep it off the async workers
    let pipeline_stop = shutdown_rx.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut pipeline = pipeline;
        let mut source = source;
        pipeline.run(source.as_mut(), &pipeline_stop)
    })
    .await
    .context("pipeline thread panicked")?;

    // Pipeline (and its gate sender) is dropped here; drain queued gate commands
    if let Err(e) = gate_handle.await {
        error!(error = %e, "gate_worker_join_failed");
    }
    metrics.report().log();

    let summary = result?;
    info!(
        frames_seen = %summary.frames_seen,
        events = %summary.events,
        stopped = %summary.stopped,
        "anpr-gate shutdown complete"
    );
    Ok(())
}
