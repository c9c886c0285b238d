//! Local file frame source.
//!
//! `FileSource` reads frames from a local video file, or synthesizes them for
//! `stub://` paths. Remote URLs are refused.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

#[cfg(feature = "ingest-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::SourceFrame;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/var/lib/footage/lobby.mp4") or `stub://name`.
    pub path: String,
    /// Size of synthetic frames.
    pub synthetic_size: (u32, u32),
    /// Stop after this many frames. Synthetic sources without a limit never end.
    pub frame_limit: Option<u64>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            synthetic_size: (640, 480),
            frame_limit: None,
        }
    }
}

impl FileConfig {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Self::default()
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): {}",
                config.path
            ));
        }
        if is_synthetic_path(&config.path) {
            log::info!("FileSource: connected to {} (synthetic)", config.path);
            Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)),
            })
        } else {
            #[cfg(feature = "ingest-ffmpeg")]
            {
                Ok(Self {
                    backend: FileBackend::Ffmpeg(FfmpegFileSource::open(config)?),
                })
            }
            #[cfg(not(feature = "ingest-ffmpeg"))]
            {
                Err(anyhow!(
                    "reading {} requires the ingest-ffmpeg feature",
                    config.path
                ))
            }
        }
    }

    /// Next decoded frame, `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_read: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and the demo
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn next_frame(&mut self) -> Option<SourceFrame> {
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return None;
            }
        }
        let frame = SourceFrame::new(self.render(), self.frame_count);
        self.frame_count += 1;
        Some(frame)
    }

    /// Gray backdrop with a red upper band and blue lower band, shifted by
    /// the frame counter so consecutive frames differ.
    fn render(&self) -> RgbImage {
        let (width, height) = self.config.synthetic_size;
        let shift = (self.frame_count % 32) as u8;
        RgbImage::from_fn(width, height, |x, y| {
            if y < height / 2 {
                Rgb([220, shift, (x % 16) as u8])
            } else if y < height * 3 / 4 {
                Rgb([shift, (x % 16) as u8, 210])
            } else {
                Rgb([120 + shift, 120 + shift, 120 + shift])
            }
        })
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_read: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

pub fn is_synthetic_path(path: &str) -> bool {
    path.starts_with("stub://")
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if is_synthetic_path(path) {
        return true;
    }
    !path.contains("://")
}
