use anyhow::{Context, Result};

use super::landmarks::LandmarkModel;
use super::tracker::FocusTracker;
use crate::frame::Frame;
use crate::worker::{AnalyzerKind, AnalyzerOutput, FrameAnalyzer};

/// Landmark model plus focus tracker, driven one frame at a time.
pub struct FacePoseAnalyzer {
    model: Box<dyn LandmarkModel>,
    tracker: FocusTracker,
    analysis_max_side: u32,
}

impl FacePoseAnalyzer {
    pub fn new(model: Box<dyn LandmarkModel>, tracker: FocusTracker, analysis_max_side: u32) -> Self {
        Self {
            model,
            tracker,
            analysis_max_side,
        }
    }

    pub fn tracker(&self) -> &FocusTracker {
        &self.tracker
    }
}

impl FrameAnalyzer for FacePoseAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Face
    }

    fn initialize(&mut self) -> Result<()> {
        self.model
            .warm_up()
            .with_context(|| format!("{} landmark model warm-up failed", self.model.name()))
    }

    /// One `State` output per frame, followed by any events it completed.
    /// A model failure leaves the tracker untouched.
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<AnalyzerOutput>> {
        let image = frame.downscale_to_max_side(self.analysis_max_side)?.to_image()?;
        let faces = self
            .model
            .detect(&image)
            .with_context(|| format!("{} landmark model failed", self.model.name()))?;
        let observation = self.tracker.observe(&faces, frame.timestamp_ms);

        let mut outputs = Vec::with_capacity(1 + observation.events.len());
        outputs.push(AnalyzerOutput::State(observation.update));
        outputs.extend(observation.events.into_iter().map(AnalyzerOutput::Event));
        Ok(outputs)
    }

    fn reset(&mut self) {
        self.tracker.reset();
    }
}
