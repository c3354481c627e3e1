//! Temporal focus state machine.
//!
//! Turns per-frame face geometry into durable integrity events and a coarse
//! focus classification. One tracker per analyzer; state never leaves it.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;

use super::geometry::{compute_bbox, compute_pitch, compute_yaw, FaceBox};
use super::landmarks::FaceLandmarks;
use crate::config::FocusThresholds;
use crate::{EventType, FocusState, ProctorEvent};

/// Ratio of `breach_ratio` at which the coarse state turns to `Warning`.
const WARNING_RATIO_FACTOR: f64 = 0.6;
/// Ratio of `breach_ratio` below which a fired look-away episode re-arms.
const REARM_RATIO_FACTOR: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
struct LookSample {
    ts: i64,
    flagged: bool,
}

/// Per-session detection state.
#[derive(Clone, Debug, PartialEq)]
struct DetectionState {
    look_window: VecDeque<LookSample>,
    look_armed: bool,
    last_fired: [Option<i64>; 6],
    no_face_start: Option<i64>,
    multi_face_start: Option<i64>,
    focus_state: FocusState,
}

impl Default for DetectionState {
    fn default() -> Self {
        Self {
            look_window: VecDeque::new(),
            look_armed: true,
            last_fired: [None; 6],
            no_face_start: None,
            multi_face_start: None,
            focus_state: FocusState::Focused,
        }
    }
}

/// Coarse state published once per analyzed frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusUpdate {
    pub focus_state: FocusState,
    pub yaw: Option<f64>,
    pub pitch: Option<f64>,
    pub face_count: usize,
    pub ratio: f64,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<FaceBox>,
}

/// Event raised by the tracker, before it becomes a `ProctorEvent`.
#[derive(Clone, Debug, PartialEq)]
pub struct FocusEvent {
    pub event_type: EventType,
    pub start_ts: i64,
    pub end_ts: i64,
    pub duration_ms: i64,
    pub meta: Map<String, Value>,
}

impl FocusEvent {
    /// Session event stamped at the frame that completed the episode.
    pub fn into_proctor_event(self) -> ProctorEvent {
        let mut meta = self.meta;
        meta.insert("startTs".to_string(), json!(self.start_ts));
        ProctorEvent::new(self.event_type, self.end_ts)
            .with_duration(self.duration_ms)
            .with_meta(meta)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FocusObservation {
    pub update: FocusUpdate,
    pub events: Vec<FocusEvent>,
}

pub struct FocusTracker {
    thresholds: FocusThresholds,
    cooldown_ms: i64,
    state: DetectionState,
}

impl FocusTracker {
    pub fn new(thresholds: FocusThresholds, cooldown_ms: i64) -> Self {
        Self {
            thresholds,
            cooldown_ms,
            state: DetectionState::default(),
        }
    }

    /// Back to the fresh-session state. Thresholds are kept.
    pub fn reset(&mut self) {
        self.state = DetectionState::default();
    }

    pub fn focus_state(&self) -> FocusState {
        self.state.focus_state
    }

    pub fn is_armed(&self) -> bool {
        self.state.look_armed
    }

    /// Feed the faces detected in one frame.
    pub fn observe(&mut self, faces: &[FaceLandmarks], timestamp: i64) -> FocusObservation {
        let mut events = Vec::new();
        let window_ms = self.thresholds.looking_away_ms();

        // A primary face without landmarks is no face at all.
        let face_count = match faces.first() {
            Some(primary) if !primary.is_empty() => faces.len(),
            _ => 0,
        };

        let mut yaw = None;
        let mut pitch = None;
        let mut ratio = 0.0;
        let mut bbox = None;

        if face_count == 0 {
            self.prune_window(timestamp, window_ms);
            if self.state.look_window.is_empty() {
                self.state.look_armed = true;
            }
            self.handle_no_face(timestamp, &mut events);
        } else {
            let primary = &faces[0];
            let face_yaw = compute_yaw(primary);
            let face_pitch = compute_pitch(primary);
            let face_box = compute_bbox(primary);
            let flagged = face_yaw.abs() > self.thresholds.yaw_degrees
                || face_pitch > self.thresholds.pitch_degrees;

            let horizon_start = self
                .state
                .look_window
                .front()
                .map(|s| s.ts)
                .unwrap_or(timestamp);
            self.state.look_window.push_back(LookSample {
                ts: timestamp,
                flagged,
            });
            self.prune_window(timestamp, window_ms);
            ratio = self.window_ratio();

            self.handle_look_away(
                face_yaw,
                face_pitch,
                ratio,
                face_box,
                horizon_start,
                timestamp,
                &mut events,
            );

            self.state.no_face_start = None;
            yaw = Some(face_yaw);
            pitch = Some(face_pitch);
            bbox = Some(face_box);
        }

        if face_count >= 2 {
            self.handle_multiple_faces(timestamp, face_count, &mut events);
        } else {
            self.state.multi_face_start = None;
        }

        let focus_state = self.classify(face_count, ratio, timestamp);
        self.state.focus_state = focus_state;

        FocusObservation {
            update: FocusUpdate {
                focus_state,
                yaw,
                pitch,
                face_count,
                ratio,
                timestamp,
                bbox,
            },
            events,
        }
    }

    fn prune_window(&mut self, now: i64, window_ms: i64) {
        let window = &mut self.state.look_window;
        while window.front().is_some_and(|s| now - s.ts > window_ms) {
            window.pop_front();
        }
    }

    fn window_ratio(&self) -> f64 {
        let total = self.state.look_window.len();
        if total == 0 {
            return 0.0;
        }
        let flagged = self.state.look_window.iter().filter(|s| s.flagged).count();
        flagged as f64 / total as f64
    }

    fn cooldown_elapsed(&self, ty: EventType, now: i64) -> bool {
        match self.state.last_fired[ty.index()] {
            Some(last) => now - last >= self.cooldown_ms,
            None => true,
        }
    }

    fn fire(
        &mut self,
        ty: EventType,
        start_ts: i64,
        end_ts: i64,
        meta: Map<String, Value>,
        events: &mut Vec<FocusEvent>,
    ) {
        self.state.last_fired[ty.index()] = Some(end_ts);
        log::debug!("focus event {} ({} ms)", ty, end_ts - start_ts);
        events.push(FocusEvent {
            event_type: ty,
            start_ts,
            end_ts,
            duration_ms: end_ts - start_ts,
            meta,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_look_away(
        &mut self,
        yaw: f64,
        pitch: f64,
        ratio: f64,
        bbox: FaceBox,
        horizon_start: i64,
        now: i64,
        events: &mut Vec<FocusEvent>,
    ) {
        let breach = self.thresholds.breach_ratio;
        if ratio >= breach
            && now - horizon_start >= self.thresholds.looking_away_ms()
            && self.state.look_armed
            && self.cooldown_elapsed(EventType::LookingAway, now)
        {
            let window = &self.state.look_window;
            let earliest = window.front().map(|s| s.ts).unwrap_or(now);
            let start_ts = window
                .iter()
                .find(|s| s.flagged)
                .map(|s| s.ts)
                .unwrap_or(earliest);
            let mut meta = Map::new();
            meta.insert("yaw".to_string(), json!(yaw));
            meta.insert("pitch".to_string(), json!(pitch));
            meta.insert("ratio".to_string(), json!(ratio));
            meta.insert("bbox".to_string(), json!(bbox));
            self.fire(EventType::LookingAway, start_ts, now, meta, events);
            self.state.look_armed = false;
        }

        if ratio < breach * REARM_RATIO_FACTOR || self.state.look_window.is_empty() {
            self.state.look_armed = true;
        }
    }

    fn handle_no_face(&mut self, now: i64, events: &mut Vec<FocusEvent>) {
        let start = *self.state.no_face_start.get_or_insert(now);
        let elapsed = now - start;
        if elapsed >= self.thresholds.no_face_ms()
            && self.cooldown_elapsed(EventType::NoFace, now)
        {
            self.fire(EventType::NoFace, start, now, Map::new(), events);
            self.state.no_face_start = Some(now);
        }
    }

    fn handle_multiple_faces(
        &mut self,
        now: i64,
        face_count: usize,
        events: &mut Vec<FocusEvent>,
    ) {
        let start = *self.state.multi_face_start.get_or_insert(now);
        let elapsed = now - start;
        if elapsed >= self.thresholds.multiple_faces_ms()
            && self.cooldown_elapsed(EventType::MultipleFaces, now)
        {
            let mut meta = Map::new();
            meta.insert("faceCount".to_string(), json!(face_count));
            self.fire(EventType::MultipleFaces, start, now, meta, events);
            self.state.multi_face_start = Some(now);
        }
    }

    fn classify(&self, face_count: usize, ratio: f64, now: i64) -> FocusState {
        let condition = |start: Option<i64>, threshold_ms: i64| {
            let elapsed = start.map(|s| now - s).unwrap_or(0);
            if elapsed >= threshold_ms {
                FocusState::Alert
            } else {
                FocusState::Warning
            }
        };
        if face_count == 0 {
            condition(
                self.state.no_face_start,
                self.thresholds.no_face_ms(),
            )
        } else if face_count >= 2 {
            condition(
                self.state.multi_face_start,
                self.thresholds.multiple_faces_ms(),
            )
        } else if ratio >= self.thresholds.breach_ratio * WARNING_RATIO_FACTOR {
            FocusState::Warning
        } else {
            FocusState::Focused
        }
    }
}
