//! Frame ingestion sources.
//!
//! This module provides the sources the scheduler pulls frames from:
//! - Stub camera (`stub://camera`), a paced synthetic feed for tests and demos
//! - Image directory, a local folder of stills played back in name order
//!
//! Sources capture on demand. The scheduler decides when to capture; a source
//! only reports whether it has a frame to give and, if it can, signals when
//! the next one is ready.
//!
//! The ingestion layer MUST NOT:
//! - Fetch remote URLs
//! - Store captured frames to disk

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::frame::Frame;

pub mod image_dir;
pub mod synthetic;

pub use image_dir::ImageDirSource;
pub use synthetic::{SyntheticCamera, SyntheticConfig};

/// Outcome of waiting on a source's frame-ready signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSignal {
    /// A new frame is available.
    Ready,
    /// No new frame within the timeout.
    Timeout,
    /// The source has no frame-ready signal; poll on a fixed interval instead.
    Unsupported,
}

/// A live video source the scheduler can sample.
pub trait VideoSource: Send {
    fn name(&self) -> &str;

    /// Current frame dimensions, `None` until the source has a valid frame.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Whether still-image capture is possible at all in this runtime.
    fn supports_capture(&self) -> bool {
        true
    }

    /// Capture the current frame, stamped with `timestamp_ms`.
    fn capture(&mut self, timestamp_ms: i64) -> Result<Frame>;

    /// Block until the next frame is presented, or the timeout elapses.
    fn wait_for_frame(&mut self, _timeout: Duration) -> FrameSignal {
        FrameSignal::Unsupported
    }

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub capture_failures: u64,
}

/// Open a source from a URL: `stub://...` or a local directory path.
pub fn open_source(url: &str, fps: u32) -> Result<Box<dyn VideoSource>> {
    let url = url.trim();
    if url.is_empty() {
        return Err(anyhow!("video source url is empty"));
    }
    if url.starts_with("stub://") {
        let config = SyntheticConfig::from_url(url)?;
        log::info!("video source: synthetic camera {}", url);
        return Ok(Box::new(SyntheticCamera::new(config)));
    }
    if url.contains("://") {
        return Err(anyhow!(
            "video source must be stub:// or a local directory (got {})",
            url
        ));
    }
    log::info!("video source: image directory {}", url);
    Ok(Box::new(ImageDirSource::open(url, fps)?))
}

/// `key=value` pairs after `?`, split on `&`.
pub(crate) fn query_pairs(url: &str) -> Vec<(String, String)> {
    let Some((_, query)) = url.split_once('?') else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (pair.trim().to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_remote_urls() {
        assert!(open_source("rtsp://camera-1", 8).is_err());
        assert!(open_source("  ", 8).is_err());
    }

    #[test]
    fn parses_query_pairs() {
        let pairs = query_pairs("stub://camera?width=320&capture=off&flag");
        assert_eq!(
            pairs,
            vec![
                ("width".to_string(), "320".to_string()),
                ("capture".to_string(), "off".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
        assert!(query_pairs("stub://camera").is_empty());
    }

    #[test]
    fn opens_stub_camera() {
        let source = open_source("stub://camera?width=64&height=48", 8).unwrap();
        assert_eq!(source.dimensions(), Some((64, 48)));
    }
}
