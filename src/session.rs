//! Session lifecycle.
//!
//! A `ProctorSession` owns everything that lives between start and stop: the
//! session id issued by the store, both analyzer workers, the event pump that
//! turns worker output into session events, and the periodic flush.
//!
//! Start:
//! 1. Ask the store for a session id; fall back to a local id when it fails
//! 2. Start the event pump and (for stored sessions) the flush worker
//! 3. Start the enabled analyzers
//!
//! Stop:
//! 1. Stop the analyzers; outputs of frames still in progress are discarded
//! 2. Drain the pump, final flush
//! 3. Upload the recording, record metrics, end the session

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::aggregator::{EventAggregator, FlushStats, FlushWorker};
use crate::config::ProctorConfig;
use crate::detect::{batch_events, map_class_to_event, ObjectDetector};
use crate::error::{ErrorKind, ProctorError};
use crate::face::{open_landmark_model, FacePoseAnalyzer, FocusTracker, FocusUpdate};
use crate::frame::LatestFrame;
use crate::ingest::VideoSource;
use crate::scheduler::{FrameScheduler, SchedulerSettings, SchedulerStats};
use crate::scoring::{build_report, IntegrityReport};
use crate::storage::{with_store, SessionMetrics, SharedStore};
use crate::worker::{
    AnalyzerFactory, AnalyzerKind, AnalyzerSlot, FrameAnalyzer, WorkerMessage, WorkerOutbound,
};
use crate::{new_event_id, now_ms, FocusState};

/// Which analyzers should be running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AnalyzerToggle {
    pub face: bool,
    pub objects: bool,
}

impl Default for AnalyzerToggle {
    fn default() -> Self {
        Self {
            face: true,
            objects: true,
        }
    }
}

#[derive(Clone)]
pub struct AnalyzerFactories {
    pub face: AnalyzerFactory,
    pub objects: AnalyzerFactory,
}

impl AnalyzerFactories {
    /// Analyzers built from the configured models.
    pub fn from_config(cfg: &ProctorConfig) -> Self {
        let face_settings = cfg.face.clone();
        let thresholds = cfg.focus.clone();
        let cooldown_ms = cfg.cooldown_ms;
        let face: AnalyzerFactory = Arc::new(move || -> Result<Box<dyn FrameAnalyzer>> {
            let model = open_landmark_model(&face_settings)?;
            Ok(Box::new(FacePoseAnalyzer::new(
                model,
                FocusTracker::new(thresholds.clone(), cooldown_ms),
                face_settings.analysis_max_side,
            )))
        });

        let object_settings = cfg.objects.clone();
        let objects: AnalyzerFactory = Arc::new(move || -> Result<Box<dyn FrameAnalyzer>> {
            Ok(Box::new(ObjectDetector::from_settings(object_settings.clone())))
        });
        Self { face, objects }
    }
}

/// A finished recording to attach to the session.
#[derive(Clone, Debug)]
pub struct Recording {
    pub bytes: Vec<u8>,
    pub filename: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    /// The store never issued this id; nothing was delivered.
    pub local: bool,
    pub started_at: i64,
    pub ended_at: i64,
    pub flush: FlushStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SessionMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<IntegrityReport>,
    /// Failures during stop. The session is stopped regardless.
    pub errors: Vec<ProctorError>,
}

/// Capture metrics from scheduler statistics over `elapsed`.
pub fn capture_metrics(stats: &SchedulerStats, elapsed: Duration) -> SessionMetrics {
    let secs = elapsed.as_secs_f64();
    SessionMetrics {
        avg_fps: if secs > 0.0 {
            stats.captures as f64 / secs
        } else {
            0.0
        },
        dropped_frames: stats.dropped_frames(),
    }
}

/// Last published analyzer outputs, for status displays.
#[derive(Clone, Debug, Default)]
struct LiveStatus {
    focus: Option<FocusUpdate>,
    detections: usize,
}

pub struct ProctorSession {
    id: String,
    local: bool,
    started_at: i64,
    config: ProctorConfig,
    store: SharedStore,
    aggregator: EventAggregator,
    latest: LatestFrame,
    face: AnalyzerSlot,
    objects: AnalyzerSlot,
    factories: AnalyzerFactories,
    outbound: Option<Sender<WorkerMessage>>,
    pump: Option<JoinHandle<()>>,
    flush: Option<FlushWorker>,
    status: Arc<Mutex<LiveStatus>>,
    errors_tx: Sender<ProctorError>,
    errors_rx: Option<Receiver<ProctorError>>,
}

impl ProctorSession {
    /// Start a session with analyzers built from `config`.
    pub fn start(
        config: ProctorConfig,
        store: SharedStore,
        candidate_name: &str,
        candidate_id: Option<&str>,
    ) -> Result<Self> {
        let factories = AnalyzerFactories::from_config(&config);
        Self::start_with(
            config,
            store,
            candidate_name,
            candidate_id,
            factories,
            AnalyzerToggle::default(),
        )
    }

    pub fn start_with(
        config: ProctorConfig,
        store: SharedStore,
        candidate_name: &str,
        candidate_id: Option<&str>,
        factories: AnalyzerFactories,
        toggle: AnalyzerToggle,
    ) -> Result<Self> {
        let (errors_tx, errors_rx) = channel();

        let (id, local) = match with_store(&store, |s| s.create_session(candidate_name, candidate_id))
        {
            Ok(id) => (id, false),
            Err(err) => {
                let id = new_event_id();
                log::warn!(
                    "session store refused new session ({:#}); continuing locally as {}",
                    err,
                    id
                );
                let _ = errors_tx.send(ProctorError::from_anyhow(
                    ErrorKind::Delivery,
                    "session",
                    &err,
                ));
                (id, true)
            }
        };
        log::info!("session {} started for {}", id, candidate_name);

        let aggregator = EventAggregator::new();
        let latest = LatestFrame::new();
        let status = Arc::new(Mutex::new(LiveStatus::default()));
        let (outbound, inbound) = channel();

        let pump = {
            let aggregator = aggregator.clone();
            let latest = latest.clone();
            let status = status.clone();
            let errors = errors_tx.clone();
            let thumb_width = config.thumbnail_max_width;
            std::thread::Builder::new()
                .name("proctor-pump".to_string())
                .spawn(move || {
                    run_pump(inbound, aggregator, latest, status, errors, thumb_width)
                })?
        };

        let flush = if local {
            None
        } else {
            Some(FlushWorker::spawn(
                id.clone(),
                aggregator.clone(),
                store.clone(),
                config.flush_interval,
                errors_tx.clone(),
            )?)
        };

        let session = Self {
            id,
            local,
            started_at: now_ms(),
            config,
            store,
            aggregator,
            latest,
            face: AnalyzerSlot::new(AnalyzerKind::Face),
            objects: AnalyzerSlot::new(AnalyzerKind::Objects),
            factories,
            outbound: Some(outbound),
            pump: Some(pump),
            flush,
            status,
            errors_tx,
            errors_rx: Some(errors_rx),
        };
        session.set_analyzers_enabled(toggle)?;
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub fn aggregator(&self) -> &EventAggregator {
        &self.aggregator
    }

    /// Host-facing error channel. Can be taken once.
    pub fn take_errors(&mut self) -> Option<Receiver<ProctorError>> {
        self.errors_rx.take()
    }

    pub fn focus_update(&self) -> Option<FocusUpdate> {
        self.status.lock().ok().and_then(|s| s.focus.clone())
    }

    pub fn focus_state(&self) -> FocusState {
        self.focus_update()
            .map(|u| u.focus_state)
            .unwrap_or_default()
    }

    /// Detections in the most recent object batch.
    pub fn last_detection_count(&self) -> usize {
        self.status.lock().map(|s| s.detections).unwrap_or(0)
    }

    pub fn analyzers_enabled(&self) -> AnalyzerToggle {
        AnalyzerToggle {
            face: self.face.is_enabled(),
            objects: self.objects.is_enabled(),
        }
    }

    /// Analyzers that finished initializing.
    pub fn analyzers_ready(&self) -> AnalyzerToggle {
        AnalyzerToggle {
            face: self.face.is_ready(),
            objects: self.objects.is_ready(),
        }
    }

    /// Start or stop analyzers. A stopped analyzer's queued frame is dropped;
    /// re-enabling builds a fresh one.
    pub fn set_analyzers_enabled(&self, toggle: AnalyzerToggle) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| anyhow!("session {} is stopped", self.id))?;
        for (slot, wanted, factory) in [
            (&self.face, toggle.face, &self.factories.face),
            (&self.objects, toggle.objects, &self.factories.objects),
        ] {
            if wanted {
                slot.enable(factory.clone(), outbound.clone())?;
            } else {
                slot.disable()?;
            }
        }
        Ok(())
    }

    /// Clear analyzer state without reloading models.
    pub fn reset_analyzers(&self) -> Result<()> {
        self.face.reset()?;
        self.objects.reset()
    }

    /// Scheduler feeding this session's analyzers from `source`.
    pub fn scheduler(&self, source: Box<dyn VideoSource>) -> FrameScheduler {
        FrameScheduler::new(
            source,
            Box::new(self.face.clone()),
            Box::new(self.objects.clone()),
            self.latest.clone(),
            SchedulerSettings::from_config(&self.config),
        )
        .with_error_channel(self.errors_tx.clone())
    }

    /// Stop the session. Individual failures are collected in the summary.
    pub fn stop(
        mut self,
        recording: Option<Recording>,
        metrics: Option<SessionMetrics>,
    ) -> Result<SessionSummary> {
        let mut errors = Vec::new();
        let id = self.id.clone();
        let mut attempt = |kind: ErrorKind, what: &str, res: Result<()>| {
            if let Err(err) = res {
                log::warn!("session {}: {} failed: {:#}", id, what, err);
                errors.push(ProctorError::from_anyhow(kind, "session", &err));
            }
        };

        // Shutdown failures are reported; the session is still ended.
        attempt(ErrorKind::Frame, "face analyzer shutdown", self.face.disable());
        attempt(ErrorKind::Frame, "object analyzer shutdown", self.objects.disable());
        self.outbound.take();
        if let Some(pump) = self.pump.take() {
            let joined = pump
                .join()
                .map_err(|_| anyhow!("event pump thread panicked"));
            attempt(ErrorKind::Delivery, "event pump", joined);
        }
        let flush = match self.flush.take().map(FlushWorker::finish) {
            Some(Ok(stats)) => stats,
            Some(Err(err)) => {
                attempt(ErrorKind::Delivery, "final flush", Err(err));
                FlushStats::default()
            }
            None => FlushStats::default(),
        };
        let ended_at = now_ms();

        let mut summary = SessionSummary {
            session_id: self.id.clone(),
            local: self.local,
            started_at: self.started_at,
            ended_at,
            flush,
            metrics,
            video_url: None,
            report: None,
            errors: Vec::new(),
        };

        if self.local {
            match self.aggregator.drain() {
                Ok(batch) => {
                    let events = batch.map(|b| b.events).unwrap_or_default();
                    summary.report =
                        Some(build_report(&self.id, &events, self.started_at, ended_at));
                }
                Err(err) => attempt(ErrorKind::Delivery, "drain", Err(err)),
            }
        } else {
            if let Some(recording) = &recording {
                let uploaded = with_store(&self.store, |s| {
                    s.upload_video(&self.id, &recording.bytes, &recording.filename)
                });
                match uploaded {
                    Ok(url) => summary.video_url = Some(url),
                    Err(err) => attempt(ErrorKind::Delivery, "video upload", Err(err)),
                }
            }
            if let Some(metrics) = metrics {
                attempt(
                    ErrorKind::Delivery,
                    "metrics",
                    with_store(&self.store, |s| s.record_metrics(&self.id, metrics)),
                );
            }
            attempt(
                ErrorKind::Delivery,
                "end",
                with_store(&self.store, |s| s.end_session(&self.id)),
            );
            match with_store(&self.store, |s| s.get_report(&self.id)) {
                Ok(report) => summary.report = Some(report),
                Err(err) => attempt(ErrorKind::Delivery, "report", Err(err)),
            }
        }

        summary.errors = errors;
        log::info!(
            "{} session {} stopped: {} events delivered, {} dropped, {} errors",
            if self.local { "local" } else { "stored" },
            self.id,
            summary.flush.events_delivered,
            summary.flush.events_dropped,
            summary.errors.len()
        );
        Ok(summary)
    }
}

fn run_pump(
    inbound: Receiver<WorkerMessage>,
    aggregator: EventAggregator,
    latest: LatestFrame,
    status: Arc<Mutex<LiveStatus>>,
    errors: Sender<ProctorError>,
    thumb_width: u32,
) {
    let report = |err: anyhow::Error| {
        let _ = errors.send(ProctorError::from_anyhow(ErrorKind::Delivery, "session", &err));
    };

    for msg in inbound {
        match msg.body {
            WorkerOutbound::Ready => log::info!("{} analyzer ready", msg.analyzer),
            WorkerOutbound::State(update) => {
                if let Ok(mut s) = status.lock() {
                    s.focus = Some(update);
                }
            }
            WorkerOutbound::Event(event) => {
                log::info!("{} event at {}", event.event_type, event.end_ts);
                if let Err(err) = aggregator.append(event.into_proctor_event()) {
                    report(err);
                }
            }
            WorkerOutbound::Results(batch) => {
                if let Ok(mut s) = status.lock() {
                    s.detections = batch.detections.len();
                }
                let mapped = batch
                    .detections
                    .iter()
                    .any(|d| map_class_to_event(&d.class_name).is_some());
                if !mapped {
                    continue;
                }
                let thumb = latest.thumbnail(thumb_width);
                let events = batch_events(&batch, thumb.as_deref());
                for ev in &events {
                    log::info!("{} event at {}", ev.event_type(), ev.ts());
                }
                if let Err(err) = aggregator.extend(events) {
                    report(err);
                }
            }
            WorkerOutbound::Error(err) => {
                let _ = errors.send(err);
            }
        }
    }
    log::debug!("event pump drained");
}
