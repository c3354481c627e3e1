use anyhow::Result;
use image::RgbImage;

/// Number of points in the face-mesh topology the geometry expects.
pub const FACE_MESH_POINTS: usize = 468;

/// Normalized landmark: `x`, `y` in [0,1] of the analyzed image, `z` relative depth.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Landmarks of one detected face.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceLandmarks {
    pub points: Vec<Landmark>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    /// Face-mesh shaped landmarks posed at the given yaw and pitch, centred
    /// horizontally on `center_x`. `pitch_deg` must lie in (0, 90).
    ///
    /// Used by the stub model and in tests.
    pub fn synthetic(center_x: f32, yaw_deg: f64, pitch_deg: f64) -> Self {
        let mut points: Vec<Landmark> = (0..FACE_MESH_POINTS)
            .map(|i| {
                let angle = i as f32 / FACE_MESH_POINTS as f32 * std::f32::consts::TAU;
                Landmark::new(center_x + 0.15 * angle.cos(), 0.5 + 0.22 * angle.sin(), 0.0)
            })
            .collect();

        let half = 0.1_f64;
        let skew = half * yaw_deg.to_radians().tan() / 2.0;
        let left_dist = (half - skew) as f32;
        let right_dist = (half + skew) as f32;
        let eye_y = 0.42;

        let left_eye_x = center_x - 0.07;
        let right_eye_x = center_x + 0.07;
        points[33] = Landmark::new(left_eye_x - 0.02, eye_y, 0.0);
        points[133] = Landmark::new(left_eye_x + 0.02, eye_y, 0.0);
        points[362] = Landmark::new(right_eye_x - 0.02, eye_y, 0.0);
        points[263] = Landmark::new(right_eye_x + 0.02, eye_y, 0.0);
        points[234] = Landmark::new(left_eye_x - left_dist, eye_y, 0.0);
        points[454] = Landmark::new(right_eye_x + right_dist, eye_y, 0.0);

        let brow_y = 0.32;
        let chin_y = 0.72;
        for idx in [10, 338, 297, 67] {
            points[idx] = Landmark::new(center_x, brow_y, 0.0);
        }
        let depth = ((chin_y - brow_y) as f64 / pitch_deg.to_radians().tan()) - 1e-6;
        points[1] = Landmark::new(center_x, 0.52, 0.0);
        points[152] = Landmark::new(center_x, chin_y, depth as f32);

        Self { points }
    }
}

/// Face-landmark model: image in, zero or more faces out.
///
/// Implementations own their model state and must not retain the image
/// beyond the call.
pub trait LandmarkModel: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect faces in an RGB image.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceLandmarks>>;

    /// Optional warm-up hook, run once at initialization.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
