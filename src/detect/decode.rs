//! YOLO-style output decoding.
//!
//! Each candidate is `[cx, cy, w, h, objectness, class_0 .. class_n]` in
//! model-input pixels. Models disagree on whether candidates run along the
//! last axis or the middle one, so the layout is resolved from the shape.

use anyhow::{anyhow, Result};

use super::backend::OutputTensor;
use super::letterbox::Letterbox;
use super::result::ObjectDetection;

const BOX_ATTRIBUTES: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, candidates, attributes]`
    CandidatesFirst { candidates: usize, attributes: usize },
    /// `[1, attributes, candidates]`
    AttributesFirst { candidates: usize, attributes: usize },
}

impl TensorLayout {
    /// Resolve the layout of a `[1, d1, d2]` output for `num_classes`
    /// configured classes. The axis of size `5 + num_classes` wins; otherwise
    /// the smaller axis holds the attributes and must have at least 6.
    pub fn detect(dims: &[usize], num_classes: usize) -> Result<Self> {
        let (d1, d2) = match dims {
            [1, d1, d2] => (*d1, *d2),
            [d1, d2] => (*d1, *d2),
            _ => return Err(anyhow!("unsupported detection output shape {:?}", dims)),
        };
        let expected = BOX_ATTRIBUTES + num_classes;
        let layout = if d2 == expected {
            TensorLayout::CandidatesFirst {
                candidates: d1,
                attributes: d2,
            }
        } else if d1 == expected {
            TensorLayout::AttributesFirst {
                candidates: d2,
                attributes: d1,
            }
        } else if d2 <= d1 {
            TensorLayout::CandidatesFirst {
                candidates: d1,
                attributes: d2,
            }
        } else {
            TensorLayout::AttributesFirst {
                candidates: d2,
                attributes: d1,
            }
        };
        if layout.attributes() <= BOX_ATTRIBUTES {
            return Err(anyhow!(
                "detection output {:?} has no class scores",
                dims
            ));
        }
        Ok(layout)
    }

    pub fn candidates(&self) -> usize {
        match *self {
            TensorLayout::CandidatesFirst { candidates, .. }
            | TensorLayout::AttributesFirst { candidates, .. } => candidates,
        }
    }

    pub fn attributes(&self) -> usize {
        match *self {
            TensorLayout::CandidatesFirst { attributes, .. }
            | TensorLayout::AttributesFirst { attributes, .. } => attributes,
        }
    }

    fn index(&self, candidate: usize, attribute: usize) -> usize {
        match *self {
            TensorLayout::CandidatesFirst { attributes, .. } => candidate * attributes + attribute,
            TensorLayout::AttributesFirst { candidates, .. } => attribute * candidates + candidate,
        }
    }
}

/// Decode candidates above `confidence` into detections in normalized
/// source-frame coordinates. No suppression is applied here.
pub fn decode_detections(
    output: &OutputTensor,
    letterbox: &Letterbox,
    classes: &[String],
    confidence: f32,
) -> Result<Vec<ObjectDetection>> {
    let layout = TensorLayout::detect(&output.dims, classes.len())?;
    let needed = layout.candidates() * layout.attributes();
    if output.data.len() < needed {
        return Err(anyhow!(
            "detection output holds {} values, layout {:?} needs {}",
            output.data.len(),
            layout,
            needed
        ));
    }

    let value = |c: usize, a: usize| output.data[layout.index(c, a)];
    let class_count = layout.attributes() - BOX_ATTRIBUTES;
    let mut detections = Vec::new();

    for c in 0..layout.candidates() {
        let mut best: Option<(usize, f32)> = None;
        for k in 0..class_count {
            let score = value(c, BOX_ATTRIBUTES + k);
            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((k, score));
            }
        }
        let Some((class_index, class_score)) = best else {
            continue;
        };
        let score = value(c, 4) * class_score;
        if score.is_nan() || score < confidence {
            continue;
        }
        let bbox = letterbox.to_source(value(c, 0), value(c, 1), value(c, 2), value(c, 3));
        let class_name = classes
            .get(class_index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_index));
        detections.push(ObjectDetection {
            class_name,
            score,
            bbox,
        });
    }
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> Vec<String> {
        ["phone", "book"].iter().map(|s| s.to_string()).collect()
    }

    fn square_letterbox() -> Letterbox {
        Letterbox::fit(256, 256, 256).unwrap()
    }

    #[test]
    fn layout_prefers_axis_matching_class_count() {
        assert_eq!(
            TensorLayout::detect(&[1, 3, 7], 2).unwrap(),
            TensorLayout::CandidatesFirst {
                candidates: 3,
                attributes: 7
            }
        );
        assert_eq!(
            TensorLayout::detect(&[1, 7, 3], 2).unwrap(),
            TensorLayout::AttributesFirst {
                candidates: 3,
                attributes: 7
            }
        );
    }

    #[test]
    fn layout_falls_back_to_smaller_axis() {
        assert_eq!(
            TensorLayout::detect(&[1, 84, 1344], 7).unwrap(),
            TensorLayout::AttributesFirst {
                candidates: 1344,
                attributes: 84
            }
        );
        assert!(TensorLayout::detect(&[1, 5, 100], 7).is_err());
        assert!(TensorLayout::detect(&[2, 3, 7, 1], 2).is_err());
    }

    #[test]
    fn both_layouts_decode_the_same_detections() {
        let rows = vec![
            vec![128.0, 128.0, 64.0, 64.0, 0.9, 0.1, 0.8],
            vec![32.0, 32.0, 16.0, 16.0, 0.2, 0.9, 0.0],
        ];
        let lb = square_letterbox();
        for attributes_first in [false, true] {
            let out = OutputTensor::from_rows(&rows, attributes_first).unwrap();
            let dets = decode_detections(&out, &lb, &classes(), 0.6).unwrap();
            assert_eq!(dets.len(), 1);
            assert_eq!(dets[0].class_name, "book");
            assert!((dets[0].score - 0.72).abs() < 1e-6);
            assert!((dets[0].bbox.x - 0.375).abs() < 1e-6);
            assert!((dets[0].bbox.width - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn candidates_without_positive_class_score_are_skipped() {
        let rows = vec![vec![10.0, 10.0, 4.0, 4.0, 1.0, 0.0, 0.0]];
        let out = OutputTensor::from_rows(&rows, false).unwrap();
        let dets = decode_detections(&out, &square_letterbox(), &classes(), 0.0).unwrap();
        assert!(dets.is_empty());
    }

    #[test]
    fn unnamed_class_indices_get_generic_names() {
        // Three class scores against two names; enough rows that the smaller
        // axis is the attribute axis.
        let mut rows = vec![vec![0.0; 8]; 8];
        rows.push(vec![10.0, 10.0, 4.0, 4.0, 1.0, 0.0, 0.1, 0.95]);
        let out = OutputTensor::from_rows(&rows, false).unwrap();
        let dets = decode_detections(&out, &square_letterbox(), &classes(), 0.5).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_name, "class_2");
    }

    #[test]
    fn short_data_is_an_error() {
        let out = OutputTensor {
            dims: vec![1, 2, 7],
            data: vec![0.0; 7],
        };
        assert!(decode_detections(&out, &square_letterbox(), &classes(), 0.5).is_err());
    }
}
