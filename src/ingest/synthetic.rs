//! Synthetic camera (`stub://`).
//!
//! Produces a moving gradient at a fixed presentation rate. Query parameters
//! shape the feed for tests:
//!
//! - `width`, `height`: frame size (default 640x480)
//! - `fps`: presentation rate of the frame-ready signal (default 30)
//! - `warmup`: presented frames before dimensions become valid (default 0)
//! - `capture=off`: report that still capture is unsupported
//! - `fail_every=N`: every Nth capture fails

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{query_pairs, FrameSignal, SourceStats, VideoSource};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub warmup_frames: u64,
    pub capture_supported: bool,
    pub fail_every: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            warmup_frames: 0,
            capture_supported: true,
            fail_every: None,
        }
    }
}

impl SyntheticConfig {
    pub fn from_url(url: &str) -> Result<Self> {
        let mut config = SyntheticConfig {
            name: url.split('?').next().unwrap_or(url).to_string(),
            ..Default::default()
        };
        for (key, value) in query_pairs(url) {
            let number = || {
                value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("stub source: {} must be an integer", key))
            };
            match key.as_str() {
                "width" => config.width = number()? as u32,
                "height" => config.height = number()? as u32,
                "fps" => config.fps = number()?.max(1) as u32,
                "warmup" => config.warmup_frames = number()?,
                "fail_every" => config.fail_every = Some(number()?).filter(|n| *n > 0),
                "capture" => config.capture_supported = value != "off",
                other => log::warn!("stub source: ignoring unknown parameter '{}'", other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub source: width and height must be non-zero"));
        }
        Ok(config)
    }
}

pub struct SyntheticCamera {
    config: SyntheticConfig,
    presented: u64,
    next_present: Instant,
    stats: SourceStats,
    captures_attempted: u64,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            presented: 0,
            next_present: Instant::now(),
            stats: SourceStats::default(),
            captures_attempted: 0,
        }
    }

    fn frame_period(&self) -> Duration {
        Duration::from_millis(1000 / self.config.fps.max(1) as u64)
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let shift = self.presented.wrapping_add(self.captures_attempted) as usize;
        let mut pixels = vec![0u8; w * h * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % w;
            let y = i / w;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift / 2) % 256) as u8;
            px[2] = ((x + y) % 256) as u8;
        }
        pixels
    }
}

impl VideoSource for SyntheticCamera {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.presented < self.config.warmup_frames {
            return None;
        }
        Some((self.config.width, self.config.height))
    }

    fn supports_capture(&self) -> bool {
        self.config.capture_supported
    }

    fn capture(&mut self, timestamp_ms: i64) -> Result<Frame> {
        self.captures_attempted += 1;
        if let Some(n) = self.config.fail_every {
            if self.captures_attempted % n == 0 {
                self.stats.capture_failures += 1;
                return Err(anyhow!(
                    "synthetic decode failure on capture {}",
                    self.captures_attempted
                ));
            }
        }
        let frame = Frame::new(
            self.generate_pixels(),
            self.config.width,
            self.config.height,
            timestamp_ms,
        )?;
        self.stats.frames_captured += 1;
        Ok(frame)
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> FrameSignal {
        let now = Instant::now();
        if self.next_present > now {
            let wait = self.next_present - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return FrameSignal::Timeout;
            }
            std::thread::sleep(wait);
        }
        self.presented += 1;
        self.next_present = Instant::now() + self.frame_period();
        FrameSignal::Ready
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_hides_dimensions() {
        let config = SyntheticConfig::from_url("stub://camera?width=16&height=8&warmup=2&fps=1000")
            .unwrap();
        let mut cam = SyntheticCamera::new(config);
        assert_eq!(cam.dimensions(), None);
        assert_eq!(cam.wait_for_frame(Duration::from_millis(50)), FrameSignal::Ready);
        assert_eq!(cam.dimensions(), None);
        cam.wait_for_frame(Duration::from_millis(50));
        assert_eq!(cam.dimensions(), Some((16, 8)));
    }

    #[test]
    fn injected_capture_failures() {
        let config = SyntheticConfig::from_url("stub://camera?width=4&height=4&fail_every=2")
            .unwrap();
        let mut cam = SyntheticCamera::new(config);
        assert!(cam.capture(1).is_ok());
        assert!(cam.capture(2).is_err());
        assert!(cam.capture(3).is_ok());
        let stats = cam.stats();
        assert_eq!(stats.frames_captured, 2);
        assert_eq!(stats.capture_failures, 1);
    }

    #[test]
    fn capture_can_be_disabled() {
        let config = SyntheticConfig::from_url("stub://camera?capture=off").unwrap();
        assert!(!SyntheticCamera::new(config).supports_capture());
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(SyntheticConfig::from_url("stub://camera?width=wide").is_err());
        assert!(SyntheticConfig::from_url("stub://camera?height=0").is_err());
    }
}
