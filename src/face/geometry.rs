//! Head-pose geometry over face-mesh landmarks.
//!
//! Indices follow the 468-point face-mesh topology. A missing index falls back
//! to the first landmark (the last one for the right cheek and chin).

use serde::{Deserialize, Serialize};

use super::landmarks::{FaceLandmarks, Landmark};

const LEFT_EYE: [usize; 2] = [33, 133];
const RIGHT_EYE: [usize; 2] = [362, 263];
const LEFT_CHEEK: usize = 234;
const RIGHT_CHEEK: usize = 454;
const BROW: [usize; 4] = [10, 338, 297, 67];
const CHIN: usize = 152;
const NOSE: usize = 1;

#[derive(Clone, Copy, Debug, Default)]
struct Point {
    x: f64,
    y: f64,
    z: f64,
}

impl From<&Landmark> for Point {
    fn from(lm: &Landmark) -> Self {
        Self {
            x: lm.x as f64,
            y: lm.y as f64,
            z: lm.z as f64,
        }
    }
}

fn average(face: &FaceLandmarks, indices: &[usize]) -> Point {
    let Some(first) = face.points.first() else {
        return Point::default();
    };
    let mut sum = Point::default();
    for &idx in indices {
        let p = Point::from(face.get(idx).unwrap_or(first));
        sum.x += p.x;
        sum.y += p.y;
        sum.z += p.z;
    }
    let n = indices.len().max(1) as f64;
    Point {
        x: sum.x / n,
        y: sum.y / n,
        z: sum.z / n,
    }
}

fn distance_2d(a: Point, b: Point) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

fn landmark_or(face: &FaceLandmarks, index: usize, fallback: Option<&Landmark>) -> Option<Point> {
    face.get(index).or(fallback).map(Point::from)
}

/// Head turn in degrees. Positive when the right eye-to-cheek span is wider.
pub fn compute_yaw(face: &FaceLandmarks) -> f64 {
    let left_eye = average(face, &LEFT_EYE);
    let right_eye = average(face, &RIGHT_EYE);
    let (Some(left_cheek), Some(right_cheek)) = (
        landmark_or(face, LEFT_CHEEK, face.points.first()),
        landmark_or(face, RIGHT_CHEEK, face.points.last()),
    ) else {
        return 0.0;
    };
    let left = distance_2d(left_eye, left_cheek);
    let right = distance_2d(right_eye, right_cheek);
    let mean = (left + right) / 2.0;
    let denom = if mean == 0.0 { 1.0 } else { mean };
    (right - left).atan2(denom).to_degrees()
}

/// Head tilt in degrees: brow-to-chin drop over chin-to-nose depth.
pub fn compute_pitch(face: &FaceLandmarks) -> f64 {
    let brow = average(face, &BROW);
    let (Some(chin), Some(nose)) = (
        landmark_or(face, CHIN, face.points.last()),
        landmark_or(face, NOSE, face.points.first()),
    ) else {
        return 0.0;
    };
    let vertical = chin.y - brow.y;
    let depth = (chin.z - nose.z).abs() + 1e-6;
    vertical.atan2(depth).to_degrees()
}

/// Normalized bounding box of a face.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// Min/max over every landmark, seeded at `(1, 1, 0, 0)`.
pub fn compute_bbox(face: &FaceLandmarks) -> FaceBox {
    face.points.iter().fold(
        FaceBox {
            min_x: 1.0,
            min_y: 1.0,
            max_x: 0.0,
            max_y: 0.0,
        },
        |b, lm| FaceBox {
            min_x: b.min_x.min(lm.x as f64),
            min_y: b.min_y.min(lm.y as f64),
            max_x: b.max_x.max(lm.x as f64),
            max_y: b.max_y.max(lm.y as f64),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_face_reproduces_pose() {
        for (yaw, pitch) in [(0.0, 5.0), (30.0, 10.0), (-25.0, 40.0)] {
            let face = FaceLandmarks::synthetic(0.5, yaw, pitch);
            assert!((compute_yaw(&face) - yaw).abs() < 0.01, "yaw {}", yaw);
            assert!((compute_pitch(&face) - pitch).abs() < 0.01, "pitch {}", pitch);
        }
    }

    #[test]
    fn sparse_face_falls_back_without_panicking() {
        let face = FaceLandmarks::new(vec![
            Landmark::new(0.4, 0.4, 0.0),
            Landmark::new(0.6, 0.6, 0.1),
        ]);
        assert!(compute_yaw(&face).is_finite());
        assert!(compute_pitch(&face).is_finite());

        let empty = FaceLandmarks::default();
        assert_eq!(compute_yaw(&empty), 0.0);
        assert_eq!(compute_pitch(&empty), 0.0);
    }

    #[test]
    fn bbox_spans_landmarks() {
        let face = FaceLandmarks::new(vec![
            Landmark::new(0.2, 0.3, 0.0),
            Landmark::new(0.7, 0.9, 0.0),
            Landmark::new(0.5, 0.1, 0.0),
        ]);
        let b = compute_bbox(&face);
        assert!((b.min_x - 0.2).abs() < 1e-6);
        assert!((b.min_y - 0.1).abs() < 1e-6);
        assert!((b.max_x - 0.7).abs() < 1e-6);
        assert!((b.max_y - 0.9).abs() < 1e-6);
    }
}
