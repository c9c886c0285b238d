//! Footage indexer
//!
//! Turns per-frame object detector output from surveillance cameras into a
//! searchable frame log and, on request, into extracted event clips.
//!
//! # Pipeline
//!
//! Per camera, online and strictly in frame order:
//!
//! 1. `detect`: letterbox the frame, run a detector backend, decode its raw
//!    tensor (threshold, class-aware NMS, rescale, clip).
//! 2. `track`: greedy nearest-centroid tracking of one class.
//! 3. `builder`: one `FrameRecord` per frame, with track ids and attributes.
//! 4. `storage`: append-only frame log shared by all cameras.
//!
//! Later, per query:
//!
//! 5. `query` selects frames, `clip` groups them into intervals and cuts
//!    each interval out of the archived source video.
//!
//! # Module Structure
//!
//! - `geometry`: boxes and points in pixel space
//! - `detect`: backends, letterbox, decoder
//! - `track`: centroid tracker
//! - `attributes`: attribute and color collaborators
//! - `record`, `builder`: frame records
//! - `storage`, `query`: frame log
//! - `clip`: aggregation and extraction
//! - `ingest`, `worker`: frame sources and per-camera workers
//! - `config`: file + environment configuration

use anyhow::{anyhow, Result};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod attributes;
pub mod builder;
pub mod clip;
pub mod config;
pub mod detect;
pub mod geometry;
pub mod ingest;
pub mod query;
pub mod record;
pub mod storage;
pub mod track;
pub mod worker;

pub use attributes::{AttributeClassifier, AttributeExtractor, AttributeValue, Attributes, ColorClassifier};
pub use builder::{BuilderConfig, FrameRecordBuilder};
pub use clip::{
    find_clips, ClipAggregator, ClipExtractor, ClipInterval, ClipOutcome, ClipPipeline,
    ClipReport, ExtractionFailure, ExtractionFailureKind,
};
pub use config::IndexerConfig;
pub use detect::{DetectionBox, DetectionDecoder, DetectorBackend, ObjectClass, RawDetections};
pub use geometry::{BoundingBox, Point};
pub use ingest::{FileConfig, FileSource, FrameSource, SourceFrame};
pub use query::{DetectionPredicate, FrameQuery};
pub use record::{Detection, FrameKey, FrameRecord};
pub use storage::{
    append_with_retry, FrameLog, InMemoryFrameLog, RecordAppendFailure, RetryPolicy,
    SqliteFrameLog,
};
pub use track::{CentroidTracker, TrackSnapshot, TrackState, TrackedObject, TrackerConfig};
pub use worker::{run_streams, StreamSpec, StreamStats, StreamWorker};

/// Camera ids become file name components of extracted clips.
pub fn validate_camera_id(camera_id: &str) -> Result<()> {
    static CAMERA_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CAMERA_ID_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9_.-]{0,63}$").unwrap());

    let id = camera_id.trim().to_lowercase();
    if !re.is_match(&id) {
        return Err(anyhow!(
            "camera id '{}' must match ^[a-z0-9][a-z0-9_.-]{{0,63}}$",
            camera_id
        ));
    }
    Ok(())
}

/// Wall-clock time in epoch milliseconds.
pub fn now_ms() -> Result<u64> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
    u64::try_from(elapsed.as_millis()).map_err(|_| anyhow!("system clock out of range"))
}
