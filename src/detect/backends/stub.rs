use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::backend::{InputTensor, ObjectModel, OutputTensor};

/// Stub object model for testing.
///
/// By default every inference yields a single all-zero candidate (no
/// detections). A scripted model plays back fixed output tensors and then
/// repeats the last one.
pub struct StubObjectModel {
    script: VecDeque<OutputTensor>,
    last: OutputTensor,
    calls: u64,
}

impl StubObjectModel {
    pub fn new(num_classes: usize) -> Self {
        let attrs = 5 + num_classes.max(1);
        Self {
            script: VecDeque::new(),
            last: OutputTensor {
                dims: vec![1, 1, attrs],
                data: vec![0.0; attrs],
            },
            calls: 0,
        }
    }

    pub fn scripted(outputs: Vec<OutputTensor>) -> Self {
        let mut model = Self::new(1);
        model.script = outputs.into();
        model
    }

    /// Number of inferences served so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl ObjectModel for StubObjectModel {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, _input: &InputTensor) -> Result<OutputTensor> {
        self.calls += 1;
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        Ok(self.last.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> InputTensor {
        InputTensor {
            size: 2,
            data: vec![0.0; 12],
        }
    }

    #[test]
    fn default_output_has_no_confident_candidates() {
        let mut model = StubObjectModel::new(7);
        let out = model.infer(&input()).unwrap();
        assert_eq!(out.dims, vec![1, 1, 12]);
        assert!(out.data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn scripted_model_repeats_last_output() {
        let a = OutputTensor::from_rows(&[vec![1.0; 6]], false).unwrap();
        let b = OutputTensor::from_rows(&[vec![2.0; 6]], false).unwrap();
        let mut model = StubObjectModel::scripted(vec![a.clone(), b.clone()]);
        assert_eq!(model.infer(&input()).unwrap(), a);
        assert_eq!(model.infer(&input()).unwrap(), b);
        assert_eq!(model.infer(&input()).unwrap(), b);
        assert_eq!(model.calls(), 3);
    }
}
