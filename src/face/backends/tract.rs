#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::face::landmarks::{FaceLandmarks, Landmark, LandmarkModel, FACE_MESH_POINTS};

/// Square input side of the face-mesh network.
pub const FACE_MESH_INPUT: u32 = 192;

/// Tract-based face-mesh model.
///
/// Expects a single-face mesh network: input `[1, 3, 192, 192]` in [0,1],
/// first output holding 468 `(x, y, z)` triples in input pixels, and an
/// optional second output with a face-presence logit.
pub struct TractLandmarkModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    presence_threshold: f32,
}

impl TractLandmarkModel {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = FACE_MESH_INPUT as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            presence_threshold: 0.5,
        })
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let side = FACE_MESH_INPUT;
        let resized = imageops::resize(image, side, side, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, side as usize, side as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn face_present(&self, outputs: &TVec<TValue>) -> Result<bool> {
        let Some(presence) = outputs.get(1) else {
            return Ok(true);
        };
        let logits = presence
            .to_array_view::<f32>()
            .context("presence output tensor was not f32")?;
        let logit = logits.iter().copied().next().unwrap_or(f32::NEG_INFINITY);
        let score = 1.0 / (1.0 + (-logit).exp());
        Ok(score >= self.presence_threshold)
    }
}

impl LandmarkModel for TractLandmarkModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceLandmarks>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        if !self.face_present(&outputs)? {
            return Ok(Vec::new());
        }

        let mesh = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?
            .to_array_view::<f32>()
            .context("landmark output tensor was not f32")?;
        let values: Vec<f32> = mesh.iter().copied().collect();
        if values.len() < FACE_MESH_POINTS * 3 {
            return Err(anyhow!(
                "landmark output has {} values, expected {}",
                values.len(),
                FACE_MESH_POINTS * 3
            ));
        }

        let side = FACE_MESH_INPUT as f32;
        let points = values
            .chunks_exact(3)
            .take(FACE_MESH_POINTS)
            .map(|p| Landmark::new(p[0] / side, p[1] / side, p[2] / side))
            .collect();
        Ok(vec![FaceLandmarks::new(points)])
    }
}
