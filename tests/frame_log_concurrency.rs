use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use uuid::Uuid;

use footage_index::{
    append_with_retry, BoundingBox, Detection, FrameLog, FrameQuery, FrameRecord, ObjectClass,
    RetryPolicy, SqliteFrameLog,
};

const FRAMES_PER_CAMERA: u64 = 60;

fn record(camera_id: &str, frame_number: u64) -> FrameRecord {
    FrameRecord {
        video_id: camera_id.to_string(),
        camera_id: camera_id.to_string(),
        frame_number,
        frame_timestamp: frame_number as f64 / 30.0,
        captured_at_ms: 1_700_000_000_000 + frame_number,
        detections: vec![Detection {
            object_id: Uuid::new_v4(),
            class: ObjectClass::Person,
            confidence: 0.8,
            bounding_box: BoundingBox::new(10.0, 10.0, 60.0, 120.0),
            attributes: Default::default(),
            track_id: Some(1),
        }],
    }
}

fn frame_numbers_by_camera(records: &[FrameRecord]) -> BTreeMap<String, Vec<u64>> {
    let mut out: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    for record in records {
        out.entry(record.camera_id.clone())
            .or_default()
            .push(record.frame_number);
    }
    out
}

#[test]
fn concurrent_writers_on_separate_handles_keep_every_frame() {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("footage.db");
    let db_path = db_path.to_str().expect("utf-8 path").to_string();
    // Create the schema before the writers race to open the file.
    SqliteFrameLog::open(&db_path).expect("open log");

    let writers_done = Arc::new(AtomicBool::new(false));
    let reader = {
        let db_path = db_path.clone();
        let writers_done = Arc::clone(&writers_done);
        thread::spawn(move || {
            let log = SqliteFrameLog::open(&db_path).expect("reader handle");
            let mut reads = 0u32;
            while !writers_done.load(Ordering::SeqCst) {
                let snapshot = log.query(&FrameQuery::all()).expect("query during writes");
                for frames in frame_numbers_by_camera(&snapshot).values() {
                    let expected: Vec<u64> = (0..frames.len() as u64).collect();
                    assert_eq!(frames, &expected, "reader saw a gap or reordering");
                }
                reads += 1;
            }
            reads
        })
    };

    let writers: Vec<_> = ["cam-a", "cam-b"]
        .into_iter()
        .map(|camera_id| {
            let db_path = db_path.clone();
            thread::spawn(move || {
                let log = SqliteFrameLog::open(&db_path).expect("writer handle");
                let policy = RetryPolicy::default();
                for frame_number in 0..FRAMES_PER_CAMERA {
                    append_with_retry(&log, &record(camera_id, frame_number), &policy)
                        .expect("append");
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer thread");
    }
    writers_done.store(true, Ordering::SeqCst);
    reader.join().expect("reader thread");

    let log = SqliteFrameLog::open(&db_path).expect("verify handle");
    let all = log.query(&FrameQuery::all()).expect("final query");
    assert_eq!(all.len() as u64, FRAMES_PER_CAMERA * 2);
    let expected: Vec<u64> = (0..FRAMES_PER_CAMERA).collect();
    for camera_id in ["cam-a", "cam-b"] {
        assert_eq!(frame_numbers_by_camera(&all)[camera_id], expected);
        assert_eq!(
            log.last_frame_number(camera_id, camera_id).expect("last frame"),
            Some(FRAMES_PER_CAMERA - 1)
        );
    }
}

#[test]
fn second_handle_cannot_rewind_a_stream() {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("footage.db");
    let db_path = db_path.to_str().expect("utf-8 path");

    let first = SqliteFrameLog::open(db_path).expect("first handle");
    let second = SqliteFrameLog::open(db_path).expect("second handle");
    first.append(&record("gate", 4)).expect("append");

    assert!(second.append(&record("gate", 4)).is_err());
    assert!(second.append(&record("gate", 2)).is_err());
    second.append(&record("gate", 5)).expect("append after");

    // Rejections are not retried.
    let failure = append_with_retry(&first, &record("gate", 5), &RetryPolicy::default())
        .expect_err("duplicate frame");
    assert_eq!(failure.attempts, 1);
}
