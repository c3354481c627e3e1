//! Object detection.
//!
//! A frame is letterboxed into the model's square input, the raw output is
//! decoded into scored boxes in frame coordinates, overlapping boxes are
//! suppressed, and the surviving classes are mapped to integrity events.

use anyhow::Result;

use crate::config::ObjectSettings;

mod backend;
pub mod backends;
mod decode;
mod detector;
mod letterbox;
mod mapping;
mod nms;
mod result;

pub use backend::{InputTensor, ObjectModel, OutputTensor};
pub use backends::StubObjectModel;
pub use decode::{decode_detections, TensorLayout};
pub use detector::{ModelLoader, ObjectDetector};
pub use letterbox::{letterbox, Letterbox};
pub use mapping::{batch_events, detection_event, map_class_to_event};
pub use nms::non_max_suppression;
pub use result::{BoundingBox, DetectionBatch, ObjectDetection};

/// Object model for the configured path: the stub model when none is set.
pub fn open_object_model(settings: &ObjectSettings) -> Result<Box<dyn ObjectModel>> {
    match &settings.model_path {
        None => Ok(Box::new(StubObjectModel::new(settings.classes.len()))),
        #[cfg(feature = "backend-tract")]
        Some(path) => Ok(Box::new(backends::TractObjectModel::new(
            path,
            settings.input_size,
        )?)),
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => Err(anyhow::anyhow!(
            "object model {} needs the backend-tract feature",
            path.display()
        )),
    }
}
