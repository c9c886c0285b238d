//! Clip intervals from matching frames, and their extraction to files.

mod aggregate;
mod extract;
#[cfg(feature = "clip-ffmpeg")]
mod ffmpeg;
mod pipeline;
mod source;

use anyhow::Result;

pub use aggregate::{ClipAggregator, ClipInterval, DEFAULT_TOLERANCE_FRAMES};
pub use extract::{
    check_request, ClipExtractor, ExtractionFailure, ExtractionFailureKind, ManifestExtractor,
};
#[cfg(feature = "clip-ffmpeg")]
pub use ffmpeg::FfmpegClipExtractor;
pub use pipeline::{
    ClipOutcome, ClipPipeline, ClipPipelineConfig, ClipReport, DEFAULT_CLIP_PARALLELISM,
};
pub use source::{CameraRegistry, ClipSource, SourceRegistry};

use crate::query::FrameQuery;
use crate::storage::FrameLog;

/// Run `query` against the log and group the matching frames into
/// intervals. The query result is a snapshot; later appends are not seen.
pub fn find_clips(
    log: &dyn FrameLog,
    query: &FrameQuery,
    aggregator: &ClipAggregator,
) -> Result<Vec<ClipInterval>> {
    let keys: Vec<_> = log.query(query)?.iter().map(|record| record.key()).collect();
    log::debug!("query matched {} frame(s)", keys.len());
    Ok(aggregator.aggregate(&keys))
}

/// Extractor that cuts real video. Builds without `clip-ffmpeg` have none;
/// `ManifestExtractor` only describes cuts and is not a substitute.
pub fn default_extractor() -> Result<std::sync::Arc<dyn ClipExtractor>> {
    #[cfg(feature = "clip-ffmpeg")]
    {
        Ok(std::sync::Arc::new(FfmpegClipExtractor::new()?))
    }
    #[cfg(not(feature = "clip-ffmpeg"))]
    {
        Err(anyhow::anyhow!(
            "clip extraction requires the clip-ffmpeg feature (use --dry-run to list intervals)"
        ))
    }
}
