//! Proctoring Kernel
//!
//! This crate implements the real-time analysis core of a video-interview
//! proctoring tool.
//!
//! # Architecture
//!
//! Frames flow through the kernel in one direction:
//!
//! 1. **Ingest**: a `VideoSource` produces RGB frames (camera, stub, image directory).
//! 2. **Scheduler**: decimates the source to a bounded rate and hands a downscaled
//!    copy to each analyzer without ever queueing behind a busy one.
//! 3. **Analyzers**: the face-pose tracker and the object detector each run on their
//!    own worker thread and emit integrity events.
//! 4. **Aggregator**: buffers events and flushes them in batches to a `SessionStore`.
//! 5. **Scoring**: derives the integrity score, timeline and episodes from an event log.
//!
//! # Module Structure
//!
//! - `frame`: Owned analysis frames, downscaling, thumbnails
//! - `ingest`: Video sources
//! - `scheduler`: Frame decimation and dispatch
//! - `face`: Landmark models, head-pose geometry, focus state machine
//! - `detect`: Object model backends, letterboxing, decoding, NMS, event mapping
//! - `worker`: Per-analyzer worker threads
//! - `aggregator`: Session event buffer and periodic flush
//! - `scoring`: Integrity score, timeline, episodes, reports
//! - `storage`: Session store collaborators
//! - `session`: Session lifecycle wiring

use anyhow::{anyhow, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod aggregator;
pub mod config;
pub mod detect;
pub mod error;
pub mod face;
pub mod frame;
pub mod ingest;
pub mod scheduler;
pub mod scoring;
pub mod session;
pub mod storage;
pub mod worker;

pub use aggregator::{EventAggregator, EventBatch, FlushStats, FlushWorker};
pub use config::{FocusThresholds, ObjectSettings, ProctorConfig};
pub use detect::{
    map_class_to_event, BoundingBox, DetectionBatch, ObjectDetection, ObjectDetector, ObjectModel,
};
pub use error::{ErrorKind, ProctorError};
pub use face::{FaceLandmarks, FocusEvent, FocusTracker, FocusUpdate, Landmark, LandmarkModel};
pub use frame::{Frame, LatestFrame};
pub use ingest::{open_source, FrameSignal, VideoSource};
pub use scheduler::{FrameScheduler, FrameSink, SchedulerSettings, SchedulerStats, SubmitOutcome};
pub use scoring::{
    build_integrity_timeline, build_report, compute_integrity_score, count_events_by_type,
    segment_episodes, Episode, EventCounts, IntegrityReport, TimelinePoint,
};
pub use session::{
    capture_metrics, AnalyzerFactories, AnalyzerToggle, ProctorSession, Recording, SessionSummary,
};
pub use storage::{
    InMemorySessionStore, Session, SessionMetrics, SessionStore, SharedStore, SqliteSessionStore,
    VideoRef,
};
pub use worker::{
    AnalyzerFactory, AnalyzerHandle, AnalyzerKind, AnalyzerOutput, AnalyzerSlot, FrameAnalyzer,
    WorkerMessage, WorkerOutbound,
};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Random 128-bit identifier, hex encoded.
pub fn new_event_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// -------------------- Event Types --------------------

/// Closed set of integrity event kinds.
///
/// This is the wire contract between analyzers, aggregator, storage and scorer.
/// The scorer matches on it exhaustively, so a new variant cannot be added
/// without also giving it a penalty.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    LookingAway,
    NoFace,
    MultipleFaces,
    PhoneDetected,
    NotesDetected,
    ExtraDeviceDetected,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::LookingAway,
        EventType::NoFace,
        EventType::MultipleFaces,
        EventType::PhoneDetected,
        EventType::NotesDetected,
        EventType::ExtraDeviceDetected,
    ];

    /// Stable position of this type in `ALL`.
    pub fn index(self) -> usize {
        match self {
            EventType::LookingAway => 0,
            EventType::NoFace => 1,
            EventType::MultipleFaces => 2,
            EventType::PhoneDetected => 3,
            EventType::NotesDetected => 4,
            EventType::ExtraDeviceDetected => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::LookingAway => "LookingAway",
            EventType::NoFace => "NoFace",
            EventType::MultipleFaces => "MultipleFaces",
            EventType::PhoneDetected => "PhoneDetected",
            EventType::NotesDetected => "NotesDetected",
            EventType::ExtraDeviceDetected => "ExtraDeviceDetected",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        EventType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| anyhow!("unknown event type '{}'", s))
    }
}

/// Coarse focus classification published with every analyzed face frame.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FocusState {
    #[default]
    Focused,
    Warning,
    Alert,
}

// -------------------- Events --------------------

/// A single integrity event in a session log.
///
/// Fields are private: an event is assembled with the `with_*` builders and is
/// immutable once handed to the aggregator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProctorEvent {
    id: String,
    ts: i64,
    #[serde(rename = "type")]
    event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frame_thumb: Option<String>,
}

impl ProctorEvent {
    /// New event with a fresh random id.
    pub fn new(event_type: EventType, ts: i64) -> Self {
        Self::with_id(new_event_id(), event_type, ts)
    }

    pub fn with_id(id: impl Into<String>, event_type: EventType, ts: i64) -> Self {
        Self {
            id: id.into(),
            ts,
            event_type,
            duration: None,
            meta: None,
            frame_thumb: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration = Some(duration_ms.max(0));
        self
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_frame_thumb(mut self, thumb: Option<String>) -> Self {
        self.frame_thumb = thumb;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    pub fn meta(&self) -> Option<&Map<String, Value>> {
        self.meta.as_ref()
    }

    pub fn frame_thumb(&self) -> Option<&str> {
        self.frame_thumb.as_deref()
    }
}
