use serde::{Deserialize, Serialize};

/// Box in [0,1] coordinates relative to the source frame, top-left origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union; 0 when the union is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetection {
    pub class_name: String,
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Output of one successful inference.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub timestamp: i64,
    pub detections: Vec<ObjectDetection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = bbox(0.1, 0.1, 0.4, 0.4);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_or_empty_boxes_is_zero() {
        assert_eq!(bbox(0.0, 0.0, 0.2, 0.2).iou(&bbox(0.5, 0.5, 0.2, 0.2)), 0.0);
        assert_eq!(bbox(0.0, 0.0, 0.0, 0.0).iou(&bbox(0.0, 0.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        // 0.5 overlap area over 1.5 union.
        let a = bbox(0.0, 0.0, 0.4, 0.4);
        let b = bbox(0.2, 0.0, 0.4, 0.4);
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-5);
    }
}
