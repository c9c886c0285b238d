//! Frame sources for the ingestion workers.
//!
//! - Local video files (feature: ingest-ffmpeg)
//! - `stub://` synthetic streams for tests and the demo
//!
//! Sources hand decoded RGB frames to exactly one worker and keep nothing.

pub mod file;
#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod file_ffmpeg;

use anyhow::Result;
use image::RgbImage;

pub use file::{is_synthetic_path, FileConfig, FileSource, FileStats};

/// One decoded frame and where it sits in its source.
#[derive(Clone, Debug)]
pub struct SourceFrame {
    pub rgb: RgbImage,
    /// Zero-based position in the source, counted from where reading began.
    pub index: u64,
    /// Presentation time in seconds, when the container provides one.
    pub pts_s: Option<f64>,
}

impl SourceFrame {
    pub fn new(rgb: RgbImage, index: u64) -> Self {
        Self {
            rgb,
            index,
            pts_s: None,
        }
    }

    /// Offset in seconds within the source: the decoded timestamp if usable,
    /// else `index / fps`.
    pub fn media_offset_s(&self, fps: f64) -> f64 {
        match self.pts_s {
            Some(pts) if pts.is_finite() && pts >= 0.0 => pts,
            _ => self.index as f64 / fps,
        }
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }
}

/// Sequential frame producer for one camera.
pub trait FrameSource: Send {
    fn describe(&self) -> String;

    /// Next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<SourceFrame>>;
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        self.stats().path
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        FileSource::next_frame(self)
    }
}
