use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use footage_index::clip::{CameraRegistry, ClipPipelineConfig, ClipSource, ManifestExtractor};
use footage_index::{
    find_clips, BoundingBox, ClipAggregator, ClipExtractor, ClipPipeline, Detection,
    DetectionPredicate, ExtractionFailure, ExtractionFailureKind, FrameLog, FrameQuery,
    FrameRecord, InMemoryFrameLog, ObjectClass,
};

const FPS: f64 = 10.0;

fn record(camera_id: &str, frame_number: u64, classes: &[ObjectClass]) -> FrameRecord {
    FrameRecord {
        video_id: camera_id.to_string(),
        camera_id: camera_id.to_string(),
        frame_number,
        frame_timestamp: frame_number as f64 / FPS,
        captured_at_ms: 1_000 * frame_number,
        detections: classes
            .iter()
            .map(|class| Detection {
                object_id: Uuid::new_v4(),
                class: *class,
                confidence: 0.9,
                bounding_box: BoundingBox::new(0.0, 0.0, 10.0, 20.0),
                attributes: Default::default(),
                track_id: None,
            })
            .collect(),
    }
}

/// Frames 0..=40 of `camera_id`, with a person in `person_frames`.
fn seeded_log(camera_id: &str, person_frames: &[u64]) -> InMemoryFrameLog {
    let log = InMemoryFrameLog::new();
    for frame_number in 0..=40 {
        let classes: &[ObjectClass] = if person_frames.contains(&frame_number) {
            &[ObjectClass::Person, ObjectClass::Car]
        } else {
            &[ObjectClass::Car]
        };
        log.append(&record(camera_id, frame_number, classes))
            .expect("append");
    }
    log
}

fn people() -> FrameQuery {
    FrameQuery::all().with_detection(DetectionPredicate {
        class: Some(ObjectClass::Person),
        ..DetectionPredicate::default()
    })
}

fn archive(dir: &Path, camera_ids: &[&str]) -> CameraRegistry {
    camera_ids
        .iter()
        .map(|camera_id| {
            let path = dir.join(format!("{}.mp4", camera_id));
            fs::write(&path, b"archived footage").expect("write archive");
            ClipSource {
                camera_id: camera_id.to_string(),
                path,
                fps: FPS,
                location: None,
            }
        })
        .collect()
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn query_to_two_clips() {
    let dir = TempDir::new().expect("temp dir");
    let log = seeded_log("lobby", &[10, 12, 14, 30, 31]);

    let intervals = find_clips(&log, &people(), &ClipAggregator::default()).expect("find clips");
    let spans: Vec<(u64, u64)> = intervals
        .iter()
        .map(|interval| (interval.start_frame, interval.end_frame))
        .collect();
    assert_eq!(spans, vec![(10, 14), (30, 31)]);
    assert_eq!(intervals[0].start_time, 1.0);
    assert_eq!(intervals[0].end_time, 1.4);

    let out_dir = dir.path().join("clips");
    let pipeline = ClipPipeline::new(
        Arc::new(ManifestExtractor::default()),
        Arc::new(archive(dir.path(), &["lobby"])),
        ClipPipelineConfig::new(&out_dir),
    )
    .expect("pipeline");
    let report = pipeline.run(&intervals).expect("run");

    assert!(report.all_extracted());
    assert_eq!(
        dir_entries(&out_dir),
        vec!["lobby_10_14.mp4".to_string(), "lobby_30_31.mp4".to_string()]
    );
    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(out_dir.join("lobby_10_14.mp4")).expect("read clip"))
            .expect("manifest json");
    assert_eq!(manifest["start_s"], 1.0);
    assert_eq!(manifest["end_s"], 1.4);
}

#[test]
fn empty_match_produces_no_clips() {
    let dir = TempDir::new().expect("temp dir");
    let log = seeded_log("lobby", &[]);

    let intervals = find_clips(&log, &people(), &ClipAggregator::default()).expect("find clips");
    assert!(intervals.is_empty());

    let out_dir = dir.path().join("clips");
    let pipeline = ClipPipeline::new(
        Arc::new(ManifestExtractor::default()),
        Arc::new(archive(dir.path(), &["lobby"])),
        ClipPipelineConfig::new(&out_dir),
    )
    .expect("pipeline");
    let report = pipeline.run(&intervals).expect("run");
    assert!(report.outcomes.is_empty());
    assert!(!out_dir.exists());
}

#[test]
fn single_frame_is_a_single_interval() {
    let log = seeded_log("dock", &[7]);
    let intervals = find_clips(&log, &people(), &ClipAggregator::default()).expect("find clips");
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].start_frame, 7);
    assert_eq!(intervals[0].end_frame, 7);
    assert_eq!(intervals[0].frame_span(), 1);
}

#[test]
fn missing_source_fails_only_its_interval() {
    let dir = TempDir::new().expect("temp dir");
    let log = InMemoryFrameLog::new();
    for camera_id in ["dock", "lobby"] {
        for frame_number in [2, 3, 4] {
            log.append(&record(camera_id, frame_number, &[ObjectClass::Person]))
                .expect("append");
        }
    }
    let intervals = find_clips(&log, &people(), &ClipAggregator::default()).expect("find clips");
    assert_eq!(intervals.len(), 2);

    let out_dir = dir.path().join("clips");
    let mut config = ClipPipelineConfig::new(&out_dir);
    config.parallelism = 1;
    let pipeline = ClipPipeline::new(
        Arc::new(ManifestExtractor::default()),
        Arc::new(archive(dir.path(), &["lobby"])),
        config,
    )
    .expect("pipeline");
    let report = pipeline.run(&intervals).expect("partial success is not an error");

    assert_eq!(report.extracted_count(), 1);
    assert_eq!(report.failed_count(), 1);
    let (failed_interval, failure) = report.failed().next().expect("one failure");
    assert_eq!(failed_interval.camera_id, "dock");
    assert_eq!(failure.kind, ExtractionFailureKind::SourceMissing);
    assert_eq!(dir_entries(&out_dir), vec!["lobby_2_4.mp4".to_string()]);
}

/// Writes half a clip, then gives up.
struct TruncatingExtractor;

impl ClipExtractor for TruncatingExtractor {
    fn name(&self) -> &'static str {
        "truncating"
    }

    fn extract(
        &self,
        _source: &Path,
        _start_s: f64,
        _end_s: f64,
        out_path: &Path,
    ) -> Result<(), ExtractionFailure> {
        fs::write(out_path, b"partial").map_err(ExtractionFailure::backend)?;
        Err(ExtractionFailure::backend("encoder crashed"))
    }
}

#[test]
fn failed_extraction_leaves_no_partial_file() {
    let dir = TempDir::new().expect("temp dir");
    let log = seeded_log("lobby", &[10, 12, 14, 30, 31]);
    let intervals = find_clips(&log, &people(), &ClipAggregator::default()).expect("find clips");

    let out_dir = dir.path().join("clips");
    let pipeline = ClipPipeline::new(
        Arc::new(TruncatingExtractor),
        Arc::new(archive(dir.path(), &["lobby"])),
        ClipPipelineConfig::new(&out_dir),
    )
    .expect("pipeline");
    let report = pipeline.run(&intervals).expect("run");

    assert_eq!(report.failed_count(), 2);
    assert!(report
        .failed()
        .all(|(_, failure)| failure.kind == ExtractionFailureKind::Backend));
    assert!(dir_entries(&out_dir).is_empty());
}

#[test]
fn outcomes_follow_input_order_and_padding_clamps_at_zero() {
    let dir = TempDir::new().expect("temp dir");
    let log = seeded_log("lobby", &[0, 1, 20, 21, 38, 39, 40]);
    let intervals = find_clips(&log, &people(), &ClipAggregator::default()).expect("find clips");
    assert_eq!(intervals.len(), 3);

    let out_dir = dir.path().join("clips");
    let mut config = ClipPipelineConfig::new(&out_dir);
    config.pad_s = 0.5;
    config.parallelism = 3;
    let pipeline = ClipPipeline::new(
        Arc::new(ManifestExtractor::default()),
        Arc::new(archive(dir.path(), &["lobby"])),
        config,
    )
    .expect("pipeline");

    let finished = std::sync::atomic::AtomicUsize::new(0);
    let report = pipeline
        .run_with_progress(&intervals, &|_| {
            finished.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
        .expect("run");
    assert_eq!(finished.into_inner(), 3);

    let starts: Vec<u64> = report
        .outcomes
        .iter()
        .map(|outcome| outcome.interval().start_frame)
        .collect();
    assert_eq!(starts, vec![0, 20, 38]);

    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(out_dir.join("lobby_0_1.mp4")).expect("read clip"))
            .expect("manifest json");
    assert_eq!(manifest["start_s"], 0.0);
    assert_eq!(manifest["end_s"], 0.6);
}

#[test]
fn rejects_negative_padding() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = ClipPipelineConfig::new(dir.path());
    config.pad_s = -1.0;
    assert!(ClipPipeline::new(
        Arc::new(ManifestExtractor::default()),
        Arc::new(CameraRegistry::new()),
        config,
    )
    .is_err());
}

#[cfg(not(feature = "clip-ffmpeg"))]
#[test]
fn build_without_ffmpeg_has_no_default_extractor() {
    let err = footage_index::clip::default_extractor()
        .err()
        .expect("no extractor without ffmpeg");
    assert!(err.to_string().contains("clip-ffmpeg"));
}
