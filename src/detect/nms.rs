use super::result::ObjectDetection;

/// Class-agnostic greedy non-maximum suppression.
///
/// Candidates are visited by descending score; one is kept when its IoU with
/// every already-kept box is below `iou_threshold`.
pub fn non_max_suppression(
    mut detections: Vec<ObjectDetection>,
    iou_threshold: f32,
) -> Vec<ObjectDetection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<ObjectDetection> = Vec::with_capacity(detections.len());
    for det in detections {
        if kept.iter().all(|k| k.bbox.iou(&det.bbox) < iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn det(name: &str, score: f32, x: f32) -> ObjectDetection {
        ObjectDetection {
            class_name: name.to_string(),
            score,
            bbox: BoundingBox {
                x,
                y: 0.1,
                width: 0.3,
                height: 0.3,
            },
        }
    }

    #[test]
    fn overlapping_boxes_keep_the_highest_score() {
        let kept = non_max_suppression(
            vec![det("book", 0.7, 0.11), det("phone", 0.9, 0.1), det("laptop", 0.8, 0.6)],
            0.45,
        );
        let names: Vec<_> = kept.iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(names, vec!["phone", "laptop"]);
    }

    #[test]
    fn suppression_ignores_class() {
        let kept = non_max_suppression(vec![det("phone", 0.9, 0.1), det("book", 0.95, 0.1)], 0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_name, "book");
    }

    #[test]
    fn identical_boxes_survive_a_threshold_above_one() {
        let kept = non_max_suppression(vec![det("phone", 0.9, 0.1), det("phone", 0.8, 0.1)], 1.01);
        assert_eq!(kept.len(), 2);
    }
}
