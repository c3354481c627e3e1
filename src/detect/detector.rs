use anyhow::{anyhow, Context, Result};

use super::backend::ObjectModel;
use super::decode::decode_detections;
use super::letterbox::letterbox;
use super::nms::non_max_suppression;
use super::result::DetectionBatch;
use super::open_object_model;
use crate::config::ObjectSettings;
use crate::frame::Frame;
use crate::worker::{AnalyzerKind, AnalyzerOutput, FrameAnalyzer};

/// Builds the model on first use.
pub type ModelLoader = Box<dyn FnMut() -> Result<Box<dyn ObjectModel>> + Send>;

/// Letterbox, infer, decode, suppress.
///
/// The model is created lazily and memoized; a failed load is retried on the
/// next call.
pub struct ObjectDetector {
    settings: ObjectSettings,
    loader: ModelLoader,
    model: Option<Box<dyn ObjectModel>>,
}

impl ObjectDetector {
    pub fn new(settings: ObjectSettings, loader: ModelLoader) -> Self {
        Self {
            settings,
            loader,
            model: None,
        }
    }

    /// Detector whose model comes from `settings.model_path`.
    pub fn from_settings(settings: ObjectSettings) -> Self {
        let model_settings = settings.clone();
        Self::new(settings, Box::new(move || open_object_model(&model_settings)))
    }

    /// Detector around an already built model.
    pub fn with_model(settings: ObjectSettings, model: Box<dyn ObjectModel>) -> Self {
        let mut detector = Self::new(
            settings,
            Box::new(|| -> Result<Box<dyn ObjectModel>> {
                Err(anyhow!("object model already supplied"))
            }),
        );
        detector.model = Some(model);
        detector
    }

    pub fn settings(&self) -> &ObjectSettings {
        &self.settings
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn ensure_model(&mut self) -> Result<&mut Box<dyn ObjectModel>> {
        if self.model.is_none() {
            let mut model = (self.loader)().context("failed to load object model")?;
            model
                .warm_up()
                .with_context(|| format!("{} object model warm-up failed", model.name()))?;
            log::info!("object model ready: {}", model.name());
            self.model = Some(model);
        }
        self.model
            .as_mut()
            .ok_or_else(|| anyhow!("object model unavailable"))
    }

    /// Run one detection pass. Boxes are normalized to the frame.
    pub fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch> {
        let image = frame.to_image()?;
        let (input, geometry) = letterbox(&image, self.settings.input_size)?;
        let model = self.ensure_model()?;
        let output = model
            .infer(&input)
            .with_context(|| format!("{} object inference failed", model.name()))?;
        let candidates = decode_detections(
            &output,
            &geometry,
            &self.settings.classes,
            self.settings.confidence_threshold,
        )?;
        let detections = non_max_suppression(candidates, self.settings.nms_iou);
        log::debug!(
            "frame {}: {} detections",
            frame.timestamp_ms,
            detections.len()
        );
        Ok(DetectionBatch {
            timestamp: frame.timestamp_ms,
            detections,
        })
    }
}

impl FrameAnalyzer for ObjectDetector {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Objects
    }

    fn initialize(&mut self) -> Result<()> {
        self.ensure_model().map(|_| ())
    }

    fn analyze(&mut self, frame: &Frame) -> Result<Vec<AnalyzerOutput>> {
        Ok(vec![AnalyzerOutput::Results(self.detect(frame)?)])
    }

    /// Stateless between frames.
    fn reset(&mut self) {}
}
