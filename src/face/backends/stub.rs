use anyhow::Result;
use image::RgbImage;
use std::collections::VecDeque;

use crate::face::landmarks::{FaceLandmarks, LandmarkModel};

/// Stub landmark model for testing.
///
/// By default every frame shows one frontal face. A scripted model plays back
/// a fixed sequence of per-frame results and then repeats the last one.
pub struct StubLandmarkModel {
    script: VecDeque<Vec<FaceLandmarks>>,
    last: Vec<FaceLandmarks>,
}

impl StubLandmarkModel {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            last: vec![FaceLandmarks::synthetic(0.5, 0.0, 5.0)],
        }
    }

    pub fn scripted(frames: Vec<Vec<FaceLandmarks>>) -> Self {
        let mut model = Self::new();
        model.script = frames.into();
        model
    }
}

impl Default for StubLandmarkModel {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkModel for StubLandmarkModel {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<FaceLandmarks>> {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        Ok(self.last.clone())
    }
}
