//! Local image directory source.
//!
//! Plays a folder of still images (`png`, `jpg`, `jpeg`) back in file-name
//! order, looping at the end. The current image advances on wall-clock time at
//! the configured rate. Decoding happens at capture time, so a corrupt file
//! surfaces as a transient capture failure rather than an open error.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{SourceStats, VideoSource};
use crate::frame::Frame;

pub struct ImageDirSource {
    name: String,
    files: Vec<PathBuf>,
    fps: u32,
    started: Instant,
    dimensions: Option<(u32, u32)>,
    stats: SourceStats,
}

impl ImageDirSource {
    pub fn open(dir: impl AsRef<Path>, fps: u32) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no png/jpg images found in {}", dir.display()));
        }
        let dimensions = files
            .iter()
            .find_map(|path| image::image_dimensions(path).ok());
        Ok(Self {
            name: dir.display().to_string(),
            files,
            fps: fps.max(1),
            started: Instant::now(),
            dimensions,
            stats: SourceStats::default(),
        })
    }

    fn current_index(&self) -> usize {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let frame = elapsed_ms * self.fps as u64 / 1000;
        (frame % self.files.len() as u64) as usize
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl VideoSource for ImageDirSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    fn capture(&mut self, timestamp_ms: i64) -> Result<Frame> {
        let path = &self.files[self.current_index()];
        let decoded = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                self.stats.capture_failures += 1;
                return Err(anyhow!("failed to decode {}: {}", path.display(), e));
            }
        };
        self.dimensions = Some(decoded.dimensions());
        let frame = Frame::from_image(decoded, timestamp_ms)?;
        self.stats.frames_captured += 1;
        Ok(frame)
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::FrameSignal;
    use std::time::Duration;

    #[test]
    fn plays_back_directory_images() {
        let dir = tempfile::tempdir().unwrap();
        let img = image::RgbImage::from_pixel(32, 24, image::Rgb([10, 200, 30]));
        img.save(dir.path().join("000.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let mut source = ImageDirSource::open(dir.path(), 8).unwrap();
        assert_eq!(source.len(), 1);
        assert_eq!(source.dimensions(), Some((32, 24)));
        assert_eq!(
            source.wait_for_frame(Duration::from_millis(1)),
            FrameSignal::Unsupported
        );

        let frame = source.capture(77).unwrap();
        assert_eq!((frame.width, frame.height, frame.timestamp_ms), (32, 24, 77));
        assert_eq!(&frame.pixels()[..3], &[10, 200, 30]);
    }

    #[test]
    fn corrupt_image_is_a_capture_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();

        let mut source = ImageDirSource::open(dir.path(), 8).unwrap();
        assert_eq!(source.dimensions(), None);
        assert!(source.capture(1).is_err());
        assert_eq!(source.stats().capture_failures, 1);
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageDirSource::open(dir.path(), 8).is_err());
    }
}
