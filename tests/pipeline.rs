//! End-to-end session tests with stub models and the synthetic camera.

use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use proctor_kernel::detect::{OutputTensor, StubObjectModel};
use proctor_kernel::face::{FacePoseAnalyzer, StubLandmarkModel};
use proctor_kernel::ingest::{SyntheticCamera, SyntheticConfig};
use proctor_kernel::scheduler::TickOutcome;
use proctor_kernel::storage::{shared, with_store};
use proctor_kernel::{
    AnalyzerFactories, AnalyzerFactory, AnalyzerToggle, ErrorKind, EventType, FaceLandmarks,
    FocusState, FocusTracker, FrameAnalyzer, InMemorySessionStore, ObjectDetector, ProctorConfig,
    ProctorSession,
};

fn two_faces() -> Vec<FaceLandmarks> {
    vec![
        FaceLandmarks::synthetic(0.3, 0.0, 5.0),
        FaceLandmarks::synthetic(0.7, 0.0, 5.0),
    ]
}

/// One confident phone candidate, centred in the 256px model input.
fn phone_output(num_classes: usize) -> OutputTensor {
    let mut row = vec![128.0, 128.0, 64.0, 64.0, 0.9];
    row.extend(std::iter::repeat(0.0).take(num_classes));
    row[5] = 0.9;
    OutputTensor::from_rows(&[row], false).unwrap()
}

fn stub_factories(cfg: &ProctorConfig) -> AnalyzerFactories {
    let thresholds = cfg.focus.clone();
    let cooldown_ms = cfg.cooldown_ms;
    let face: AnalyzerFactory = Arc::new(move || -> Result<Box<dyn FrameAnalyzer>> {
        Ok(Box::new(FacePoseAnalyzer::new(
            Box::new(StubLandmarkModel::scripted(vec![two_faces()])),
            FocusTracker::new(thresholds.clone(), cooldown_ms),
            320,
        )))
    });
    let settings = cfg.objects.clone();
    let objects: AnalyzerFactory = Arc::new(move || -> Result<Box<dyn FrameAnalyzer>> {
        let model = StubObjectModel::scripted(vec![phone_output(settings.classes.len())]);
        Ok(Box::new(ObjectDetector::with_model(
            settings.clone(),
            Box::new(model),
        )))
    });
    AnalyzerFactories { face, objects }
}

fn camera(url: &str) -> Box<SyntheticCamera> {
    Box::new(SyntheticCamera::new(
        SyntheticConfig::from_url(url).expect("stub url"),
    ))
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn session_turns_frames_into_stored_events() {
    let mut cfg = ProctorConfig::default();
    cfg.focus.multiple_faces_seconds = 1.0;
    cfg.flush_interval = Duration::from_millis(50);
    let factories = stub_factories(&cfg);
    let store = shared(InMemorySessionStore::new());

    let mut session = ProctorSession::start_with(
        cfg,
        store.clone(),
        "Ada",
        None,
        factories,
        AnalyzerToggle::default(),
    )
    .expect("start session");
    let errors = session.take_errors().unwrap();
    assert!(!session.is_local());
    assert!(wait_until(Duration::from_secs(10), || {
        session.analyzers_ready() == AnalyzerToggle::default()
    }));

    let mut scheduler = session.scheduler(camera("stub://desk?width=320&height=240"));
    let base = 1_000_000;
    let mut ts = base;
    let deadline = Instant::now() + Duration::from_secs(30);
    while session.focus_update().map(|u| u.timestamp).unwrap_or(0) < base + 3_000
        && Instant::now() < deadline
    {
        if scheduler.tick(ts) == TickOutcome::Captured {
            let seen = ts;
            wait_until(Duration::from_millis(500), || {
                session.focus_update().map(|u| u.timestamp) == Some(seen)
            });
            ts += 250;
        } else {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
    assert!(scheduler.stats().captures >= 12);
    assert_ne!(session.focus_state(), FocusState::Focused);
    drop(scheduler);

    let id = session.id().to_string();
    let summary = session.stop(None, None).expect("stop session");
    assert!(summary.errors.is_empty());
    assert_eq!(summary.flush.events_dropped, 0);
    assert!(errors.try_iter().all(|e| e.kind != ErrorKind::Delivery));

    let report = summary.report.expect("report");
    assert!(report.counts_by_type.get(EventType::MultipleFaces) >= 1);
    assert!(report.counts_by_type.get(EventType::PhoneDetected) >= 1);

    let stored = with_store(&store, |s| s.get_session(&id)).unwrap();
    assert!(stored.ended_at.is_some());
    assert_eq!(stored.events.len() as u64, summary.flush.events_delivered);
    let phone = stored
        .events
        .iter()
        .find(|e| e.event_type() == EventType::PhoneDetected)
        .expect("phone event");
    assert!(phone
        .frame_thumb()
        .is_some_and(|t| t.starts_with("data:image/jpeg;base64,")));
    let meta = phone.meta().expect("phone meta");
    assert!(meta.contains_key("bbox"));
    assert!(meta["score"].as_f64().unwrap() > 0.8);
}

#[test]
fn disabled_analyzers_receive_nothing() {
    let cfg = ProctorConfig::default();
    let factories = stub_factories(&cfg);
    let session = ProctorSession::start_with(
        cfg,
        shared(InMemorySessionStore::new()),
        "Ada",
        None,
        factories,
        AnalyzerToggle {
            face: false,
            objects: false,
        },
    )
    .unwrap();

    let mut scheduler = session.scheduler(camera("stub://desk?width=64&height=48"));
    assert_eq!(scheduler.tick(0), TickOutcome::SinksBusy);
    assert_eq!(scheduler.stats().captures, 0);

    session
        .set_analyzers_enabled(AnalyzerToggle {
            face: true,
            objects: false,
        })
        .unwrap();
    assert!(wait_until(Duration::from_secs(10), || session
        .analyzers_ready()
        .face));
    assert_eq!(scheduler.tick(1_000), TickOutcome::Captured);
    assert_eq!(scheduler.stats().face.dispatched, 1);
    assert_eq!(scheduler.stats().objects.dispatched, 0);
    drop(scheduler);

    let summary = session.stop(None, None).unwrap();
    assert!(summary.errors.is_empty());
}

#[test]
fn capture_unsupported_stops_scheduling() {
    let cfg = ProctorConfig::default();
    let factories = stub_factories(&cfg);
    let mut session = ProctorSession::start_with(
        cfg,
        shared(InMemorySessionStore::new()),
        "Ada",
        None,
        factories,
        AnalyzerToggle::default(),
    )
    .unwrap();
    let errors = session.take_errors().unwrap();

    let mut scheduler = session.scheduler(camera("stub://desk?capture=off"));
    let stop = AtomicBool::new(false);
    assert!(scheduler.run(&stop).is_err());
    assert_eq!(scheduler.stats().captures, 0);
    drop(scheduler);

    let capability = errors
        .recv_timeout(Duration::from_secs(5))
        .expect("capability error");
    assert_eq!(capability.kind, ErrorKind::Capability);
    session.stop(None, None).unwrap();
}

#[test]
fn default_factories_build_stub_analyzers() {
    let cfg = ProctorConfig::default();
    let factories = AnalyzerFactories::from_config(&cfg);
    let face = (factories.face)().expect("face analyzer");
    let objects = (factories.objects)().expect("object analyzer");
    assert_eq!(face.kind().as_str(), "face");
    assert_eq!(objects.kind().as_str(), "objects");
}
