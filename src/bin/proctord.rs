//! proctord - run one proctoring session against a video source
//!
//! This daemon:
//! 1. Loads configuration (`PROCTOR_CONFIG`, `PROCTOR_*` overrides)
//! 2. Opens the session store and starts a session
//! 3. Samples the video source and feeds both analyzers until Ctrl-C or `--duration-secs`
//! 4. Stops the session and prints the summary as JSON

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use proctor_kernel::storage::open_store;
use proctor_kernel::{
    capture_metrics, open_source, AnalyzerFactories, AnalyzerToggle, ProctorConfig, ProctorSession,
    Recording,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Candidate display name.
    #[arg(long, env = "PROCTOR_CANDIDATE")]
    candidate: String,
    /// Optional external candidate id.
    #[arg(long)]
    candidate_id: Option<String>,
    /// Video source url; overrides the configured source.
    #[arg(long)]
    source: Option<String>,
    /// Stop after this many seconds (default: run until Ctrl-C).
    #[arg(long)]
    duration_secs: Option<u64>,
    /// Disable the face-pose analyzer.
    #[arg(long)]
    no_face: bool,
    /// Disable the object detector.
    #[arg(long)]
    no_objects: bool,
    /// Recording to upload when the session stops.
    #[arg(long)]
    recording: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ProctorConfig::load()?;
    if let Some(source) = &args.source {
        cfg.source_url = source.clone();
    }
    let source = open_source(&cfg.source_url, cfg.detection_fps)?;
    let store = open_store(&cfg.storage)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }
    if let Some(secs) = args.duration_secs {
        let stop = stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            stop.store(true, Ordering::SeqCst);
        });
    }

    let factories = AnalyzerFactories::from_config(&cfg);
    let toggle = AnalyzerToggle {
        face: !args.no_face,
        objects: !args.no_objects,
    };
    let mut session = ProctorSession::start_with(
        cfg,
        store,
        &args.candidate,
        args.candidate_id.as_deref(),
        factories,
        toggle,
    )?;
    if let Some(errors) = session.take_errors() {
        std::thread::Builder::new()
            .name("proctor-errors".to_string())
            .spawn(move || {
                for err in errors {
                    if err.kind.is_fatal() {
                        log::error!("{}", err);
                    } else {
                        log::warn!("{}", err);
                    }
                }
            })?;
    }

    log::info!(
        "proctord running session {} (face={}, objects={})",
        session.id(),
        toggle.face,
        toggle.objects
    );
    let started = Instant::now();
    let mut scheduler = session.scheduler(source);
    let run = scheduler.run(&stop);
    let metrics = capture_metrics(scheduler.stats(), started.elapsed());
    log::info!(
        "scheduler stopped: {} captures, {} dropped frames, {:.2} fps",
        scheduler.stats().captures,
        metrics.dropped_frames,
        metrics.avg_fps
    );
    drop(scheduler);
    if let Err(err) = &run {
        log::error!("scheduler failed: {:#}", err);
    }

    let recording = match &args.recording {
        Some(path) => Some(Recording {
            bytes: std::fs::read(path)
                .map_err(|e| anyhow!("failed to read recording {}: {}", path.display(), e))?,
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "recording.webm".to_string()),
        }),
        None => None,
    };

    let summary = session.stop(recording, Some(metrics))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    run
}
