//! Aspect-preserving letterbox into the square model input.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use super::backend::InputTensor;
use super::result::BoundingBox;

/// Geometry of one letterbox pass, kept for the inverse transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub input_size: u32,
    pub scale: f64,
    pub pad_x: u32,
    pub pad_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl Letterbox {
    /// Geometry for fitting `width x height` into `input_size` square.
    pub fn fit(width: u32, height: u32, input_size: u32) -> Result<Self> {
        if width == 0 || height == 0 || input_size == 0 {
            return Err(anyhow!(
                "cannot letterbox {}x{} into {}",
                width,
                height,
                input_size
            ));
        }
        let size = input_size as f64;
        let scale = (size / width as f64).min(size / height as f64);
        let (rw, rh) = Self::resized(width, height, scale, input_size);
        Ok(Self {
            input_size,
            scale,
            pad_x: (input_size - rw) / 2,
            pad_y: (input_size - rh) / 2,
            original_width: width,
            original_height: height,
        })
    }

    fn resized(width: u32, height: u32, scale: f64, input_size: u32) -> (u32, u32) {
        let rw = ((width as f64 * scale).round() as u32).clamp(1, input_size);
        let rh = ((height as f64 * scale).round() as u32).clamp(1, input_size);
        (rw, rh)
    }

    pub fn resized_size(&self) -> (u32, u32) {
        Self::resized(
            self.original_width,
            self.original_height,
            self.scale,
            self.input_size,
        )
    }

    /// Map a center/size box in model-input pixels back to normalized source
    /// coordinates, each component clamped to [0,1].
    pub fn to_source(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let scale = self.scale as f32;
        let x1 = (cx - w / 2.0 - self.pad_x as f32) / scale;
        let y1 = (cy - h / 2.0 - self.pad_y as f32) / scale;
        let ow = self.original_width as f32;
        let oh = self.original_height as f32;
        BoundingBox {
            x: clamp01(x1 / ow),
            y: clamp01(y1 / oh),
            width: clamp01(w / scale / ow),
            height: clamp01(h / scale / oh),
        }
    }
}

fn clamp01(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Resize, centre on a black square and unpack to a planar [0,1] tensor.
pub fn letterbox(image: &RgbImage, input_size: u32) -> Result<(InputTensor, Letterbox)> {
    let (width, height) = image.dimensions();
    let geometry = Letterbox::fit(width, height, input_size)?;
    let (rw, rh) = geometry.resized_size();

    let resized = imageops::resize(image, rw, rh, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(input_size, input_size, Rgb([0, 0, 0]));
    imageops::overlay(
        &mut canvas,
        &resized,
        geometry.pad_x as i64,
        geometry.pad_y as i64,
    );

    let area = (input_size * input_size) as usize;
    let mut data = vec![0f32; area * 3];
    for (i, px) in canvas.pixels().enumerate() {
        data[i] = px[0] as f32 / 255.0;
        data[i + area] = px[1] as f32 / 255.0;
        data[i + area * 2] = px[2] as f32 / 255.0;
    }
    Ok((
        InputTensor {
            size: input_size,
            data,
        },
        geometry,
    ))
}
