//! Face-pose analysis.
//!
//! A landmark model turns an image into face meshes, `geometry` reduces the
//! primary mesh to yaw, pitch and a bounding box, and `FocusTracker` turns the
//! per-frame readings into durable integrity events.

use anyhow::Result;

use crate::config::FaceSettings;

mod analyzer;
pub mod backends;
pub mod geometry;
mod landmarks;
mod tracker;

pub use analyzer::FacePoseAnalyzer;
pub use backends::StubLandmarkModel;
pub use geometry::{compute_bbox, compute_pitch, compute_yaw, FaceBox};
pub use landmarks::{FaceLandmarks, Landmark, LandmarkModel, FACE_MESH_POINTS};
pub use tracker::{FocusEvent, FocusObservation, FocusTracker, FocusUpdate};

/// Landmark model for the configured path: the stub model when none is set.
pub fn open_landmark_model(settings: &FaceSettings) -> Result<Box<dyn LandmarkModel>> {
    match &settings.model_path {
        None => Ok(Box::new(StubLandmarkModel::new())),
        #[cfg(feature = "backend-tract")]
        Some(path) => Ok(Box::new(backends::TractLandmarkModel::new(path)?)),
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => Err(anyhow::anyhow!(
            "face model {} needs the backend-tract feature",
            path.display()
        )),
    }
}
