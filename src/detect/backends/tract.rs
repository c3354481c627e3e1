#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{InputTensor, ObjectModel, OutputTensor};

/// Tract-based YOLO-style detector.
///
/// Loads a local ONNX model with a fixed `[1, 3, size, size]` input. Only the
/// first output is read; its layout is resolved by the decoder.
pub struct TractObjectModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
}

impl TractObjectModel {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
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

        Ok(Self { model, input_size })
    }
}

impl ObjectModel for TractObjectModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor> {
        if input.size != self.input_size {
            return Err(anyhow!(
                "input tensor side {} does not match model input {}",
                input.size,
                self.input_size
            ));
        }
        let [n, c, h, w] = input.shape();
        let tensor = tract_ndarray::Array4::from_shape_vec((n, c, h, w), input.data.clone())
            .context("input tensor has wrong element count")?
            .into_tensor();
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        OutputTensor::new(view.shape().to_vec(), view.iter().copied().collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = InputTensor {
            size: self.input_size,
            data: vec![0.0; 3 * side * side],
        };
        self.infer(&blank).map(|_| ())
    }
}
