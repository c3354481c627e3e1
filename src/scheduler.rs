//! Frame decimation and dispatch.
//!
//! The scheduler samples the video source at a bounded rate and hands one
//! downscaled copy of each sample to the face analyzer and, less often, one to
//! the object detector. It never waits on an analyzer: a copy whose sink is
//! busy is dropped on the spot.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::config::ProctorConfig;
use crate::error::{ErrorKind, ProctorError};
use crate::frame::{Frame, LatestFrame};
use crate::ingest::{FrameSignal, VideoSource};
use crate::now_ms;

const MAX_DETECTION_FPS: u32 = 8;
const PAINT_INTERVAL: Duration = Duration::from_millis(16);

/// Result of offering a frame to an analyzer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// The analyzer is still working on an earlier frame.
    Busy,
    /// The analyzer has not finished initializing.
    NotReady,
    Disabled,
    /// The analyzer's worker has stopped.
    Closed,
}

/// Consumer side of the scheduler. Submitting never blocks.
pub trait FrameSink: Send {
    fn name(&self) -> &str;

    /// Whether a submit right now could be accepted.
    fn is_available(&self) -> bool;

    fn submit(&mut self, frame: Frame) -> SubmitOutcome;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerSettings {
    pub detection_fps: u32,
    pub face_max_side: u32,
    pub object_max_side: u32,
    pub object_interval_ms: f64,
    pub paint_interval: Duration,
}

impl SchedulerSettings {
    pub fn from_config(cfg: &ProctorConfig) -> Self {
        Self {
            detection_fps: cfg.detection_fps,
            face_max_side: cfg.face.capture_max_side,
            object_max_side: cfg.objects.capture_max_side,
            object_interval_ms: cfg.objects.frame_interval_ms(cfg.detection_fps),
            paint_interval: PAINT_INTERVAL,
        }
    }

    /// Minimum spacing between captures.
    pub fn min_delta_ms(&self) -> i64 {
        1000 / self.detection_fps.clamp(1, MAX_DETECTION_FPS) as i64
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub dispatched: u64,
    pub dropped: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub captures: u64,
    pub capture_errors: u64,
    pub face: SinkStats,
    pub objects: SinkStats,
}

impl SchedulerStats {
    pub fn dropped_frames(&self) -> u64 {
        self.face.dropped + self.objects.dropped
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Throttled,
    NoDimensions,
    /// Neither analyzer could take a frame; nothing was captured.
    SinksBusy,
    Captured,
    CaptureFailed,
}

pub struct FrameScheduler {
    source: Box<dyn VideoSource>,
    face: Box<dyn FrameSink>,
    objects: Box<dyn FrameSink>,
    latest: LatestFrame,
    settings: SchedulerSettings,
    last_capture: Option<i64>,
    last_object_dispatch: Option<i64>,
    errors: Option<Sender<ProctorError>>,
    stats: SchedulerStats,
}

impl FrameScheduler {
    pub fn new(
        source: Box<dyn VideoSource>,
        face: Box<dyn FrameSink>,
        objects: Box<dyn FrameSink>,
        latest: LatestFrame,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            source,
            face,
            objects,
            latest,
            settings,
            last_capture: None,
            last_object_dispatch: None,
            errors: None,
            stats: SchedulerStats::default(),
        }
    }

    /// Report capture failures and capability errors on `errors`.
    pub fn with_error_channel(mut self, errors: Sender<ProctorError>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn latest_frame(&self) -> &LatestFrame {
        &self.latest
    }

    fn report(&self, err: ProctorError) {
        if let Some(tx) = &self.errors {
            let _ = tx.send(err);
        }
    }

    fn object_due(&self, now: i64) -> bool {
        match self.last_object_dispatch {
            Some(last) => (now - last) as f64 >= self.settings.object_interval_ms,
            None => true,
        }
    }

    /// One scheduling step at wall time `now`.
    pub fn tick(&mut self, now: i64) -> TickOutcome {
        self.stats.ticks += 1;
        if let Some(last) = self.last_capture {
            if now - last < self.settings.min_delta_ms() {
                return TickOutcome::Throttled;
            }
        }
        if self.source.dimensions().is_none() {
            return TickOutcome::NoDimensions;
        }

        let face_available = self.face.is_available();
        let object_due = self.object_due(now);
        let object_available = object_due && self.objects.is_available();
        if !face_available && !object_available {
            return TickOutcome::SinksBusy;
        }

        self.last_capture = Some(now);
        let frame = match self.source.capture(now) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.capture_errors += 1;
                log::warn!("capture from {} failed: {:#}", self.source.name(), err);
                self.report(ProctorError::from_anyhow(ErrorKind::Frame, "scheduler", &err));
                return TickOutcome::CaptureFailed;
            }
        };
        self.stats.captures += 1;
        self.latest.record(frame.clone());

        if face_available {
            let outcome = downscale_and_submit(&frame, self.settings.face_max_side, &mut *self.face);
            tally(&mut self.stats.face, outcome);
        } else {
            self.stats.face.dropped += 1;
        }

        if object_due {
            if object_available {
                let outcome =
                    downscale_and_submit(&frame, self.settings.object_max_side, &mut *self.objects);
                if outcome == Some(SubmitOutcome::Accepted) {
                    self.last_object_dispatch = Some(now);
                }
                tally(&mut self.stats.objects, outcome);
            } else {
                self.stats.objects.dropped += 1;
            }
        }
        TickOutcome::Captured
    }

    /// Drive `tick` until `stop` is set.
    ///
    /// Paced by the source's frame-ready signal when it has one, otherwise by
    /// a fixed paint interval.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        if !self.source.supports_capture() {
            let err = ProctorError::new(
                ErrorKind::Capability,
                "scheduler",
                format!("source {} cannot capture still frames", self.source.name()),
            );
            log::error!("{}", err);
            self.report(err.clone());
            return Err(err.into());
        }

        log::info!(
            "scheduler: sampling {} every {} ms",
            self.source.name(),
            self.settings.min_delta_ms()
        );
        while !stop.load(Ordering::SeqCst) {
            match self.source.wait_for_frame(self.settings.paint_interval) {
                FrameSignal::Ready => {}
                FrameSignal::Timeout => continue,
                FrameSignal::Unsupported => std::thread::sleep(self.settings.paint_interval),
            }
            let outcome = self.tick(now_ms());
            log::debug!("scheduler tick: {:?}", outcome);
        }
        log::info!(
            "scheduler stopped: {} captures, {} capture errors, {} dropped",
            self.stats.captures,
            self.stats.capture_errors,
            self.stats.dropped_frames()
        );
        Ok(())
    }
}

/// `None` when the copy could not be produced.
fn downscale_and_submit(
    frame: &Frame,
    max_side: u32,
    sink: &mut dyn FrameSink,
) -> Option<SubmitOutcome> {
    match frame.downscale_to_max_side(max_side) {
        Ok(copy) => {
            let outcome = sink.submit(copy);
            if outcome != SubmitOutcome::Accepted {
                log::debug!("{} dropped frame: {:?}", sink.name(), outcome);
            }
            Some(outcome)
        }
        Err(err) => {
            log::warn!("downscale for {} failed: {:#}", sink.name(), err);
            None
        }
    }
}

fn tally(stats: &mut SinkStats, outcome: Option<SubmitOutcome>) {
    match outcome {
        Some(SubmitOutcome::Accepted) => stats.dispatched += 1,
        _ => stats.dropped += 1,
    }
}
