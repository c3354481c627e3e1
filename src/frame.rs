//! Analysis frames.
//!
//! - `Frame`: owned RGB8 pixels plus the epoch-ms instant the frame was captured.
//! - `LatestFrame`: shared slot holding the most recent capture, used for event thumbnails.
//!
//! Frames are moved, never shared, between the scheduler and an analyzer. When a
//! dispatch is refused the frame is dropped on the spot, so there is nothing to
//! release on the error path.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use std::sync::{Arc, Mutex};

/// JPEG quality used for event thumbnails.
pub const THUMBNAIL_JPEG_QUALITY: u8 = 70;

#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}

impl Frame {
    /// Wrap packed RGB8 pixels. Fails when the buffer does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ms: i64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame has no valid dimensions ({}x{})", width, height));
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer length {} does not match {}x{} rgb ({} bytes)",
                data.len(),
                width,
                height,
                expected
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ms,
        })
    }

    pub fn from_image(image: RgbImage, timestamp_ms: i64) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, timestamp_ms)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Copy the pixels into an `image` buffer for resizing or inference.
    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not fit {}x{}", self.width, self.height))
    }

    /// Aspect-preserving copy whose longer side is at most `max_side`.
    /// Frames already small enough are cloned as-is.
    pub fn downscale_to_max_side(&self, max_side: u32) -> Result<Frame> {
        let (width, height) = scaled_dimensions(self.width, self.height, max_side);
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        let resized = imageops::resize(&self.to_image()?, width, height, FilterType::Triangle);
        Frame::from_image(resized, self.timestamp_ms)
    }

    /// JPEG thumbnail at most `max_width` wide, as a `data:` URL.
    pub fn thumbnail_data_url(&self, max_width: u32) -> Result<String> {
        let max_width = max_width.max(1);
        let (width, height) = if self.width > max_width {
            let scale = max_width as f64 / self.width as f64;
            (
                max_width,
                ((self.height as f64 * scale).round() as u32).max(1),
            )
        } else {
            (self.width, self.height)
        };
        let image = if (width, height) == (self.width, self.height) {
            self.to_image()?
        } else {
            imageops::resize(&self.to_image()?, width, height, FilterType::Triangle)
        };

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, THUMBNAIL_JPEG_QUALITY)
            .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8)
            .context("thumbnail encode failed")?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg);
        Ok(format!("data:image/jpeg;base64,{}", encoded))
    }
}

/// `scale = min(1, max_side / max(w, h))`, sides rounded and kept at least 1.
pub fn scaled_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height).max(1) as f64;
    let scale = (max_side as f64 / longest).min(1.0);
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// Most recent captured frame, shared between the scheduler and the event pump.
#[derive(Clone, Default)]
pub struct LatestFrame {
    inner: Arc<Mutex<Option<Frame>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, frame: Frame) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = Some(frame);
        }
    }

    pub fn snapshot(&self) -> Option<Frame> {
        self.inner.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = None;
        }
    }

    /// Thumbnail of the latest frame, if one exists and encodes.
    pub fn thumbnail(&self, max_width: u32) -> Option<String> {
        let frame = self.snapshot()?;
        match frame.thumbnail_data_url(max_width) {
            Ok(url) => Some(url),
            Err(e) => {
                log::warn!("thumbnail capture failed: {:#}", e);
                None
            }
        }
    }
}
