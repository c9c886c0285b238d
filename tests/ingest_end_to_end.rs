use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;

use footage_index::detect::{walkthrough_script, ScriptedBackend, DEFAULT_INPUT_SIZE};
use footage_index::{
    AttributeExtractor, BoundingBox, FileConfig, FileSource, FrameLog, FrameQuery, FrameRecord,
    InMemoryFrameLog, ObjectClass, RecordAppendFailure, RetryPolicy, StreamSpec, StreamWorker,
};

const FPS: f64 = 10.0;

fn stub_worker(
    camera_id: &str,
    frames: u64,
    log: Arc<dyn FrameLog>,
) -> anyhow::Result<StreamWorker> {
    let mut source_config = FileConfig::new(&format!("stub://{}", camera_id));
    source_config.frame_limit = Some(frames);
    let (width, height) = source_config.synthetic_size;
    let backend = ScriptedBackend::new(
        width,
        height,
        DEFAULT_INPUT_SIZE,
        walkthrough_script(width, height, frames as usize),
    )?;
    StreamWorker::new(
        StreamSpec::new(camera_id, FPS),
        Box::new(FileSource::open(source_config)?),
        Arc::new(Mutex::new(backend)),
        AttributeExtractor::default(),
        log,
    )
}

fn people_in(record: &FrameRecord) -> Vec<&footage_index::Detection> {
    record
        .detections
        .iter()
        .filter(|d| d.class == ObjectClass::Person)
        .collect()
}

fn person_boxes(record: &FrameRecord) -> Vec<BoundingBox> {
    people_in(record)
        .iter()
        .map(|detection| detection.bounding_box)
        .collect()
}

#[test]
fn stub_camera_is_indexed_frame_by_frame() {
    let log = Arc::new(InMemoryFrameLog::new());
    let worker = stub_worker("lobby", 90, log.clone()).expect("worker");
    let stats = worker.run().expect("run");
    assert_eq!(stats.frames, 90);
    assert_eq!(stats.last_frame_number, Some(89));

    let records = log.query(&FrameQuery::for_camera("lobby")).expect("query");
    assert_eq!(records.len(), 90);
    for (index, record) in records.iter().enumerate() {
        assert_eq!(record.frame_number, index as u64);
        assert_eq!(record.video_id, "lobby");
        assert_eq!(record.frame_timestamp, index as f64 / FPS);
    }

    // The person walks through frames 0..30, is gone long enough to expire,
    // and comes back as a new track at frame 60.
    for record in &records {
        let people = people_in(record);
        let phase = record.frame_number % 60;
        if phase < 30 {
            assert_eq!(people.len(), 1, "frame {}", record.frame_number);
            let expected = if record.frame_number < 60 { 1 } else { 2 };
            assert_eq!(people[0].track_id, Some(expected), "frame {}", record.frame_number);
            assert!(people[0].attributes.contains_key("top_color"));
            assert!(people[0].attributes.contains_key("bottom_color"));
        } else {
            assert!(people.is_empty(), "frame {}", record.frame_number);
        }

        let cars: Vec<_> = record
            .detections
            .iter()
            .filter(|d| d.class == ObjectClass::Car)
            .collect();
        assert_eq!(cars.len(), 1);
        assert_eq!(cars[0].track_id, None);
        assert!(cars[0].attributes.is_empty());
    }
}

#[test]
fn restarted_stream_continues_numbering() {
    let log: Arc<dyn FrameLog> = Arc::new(InMemoryFrameLog::new());
    stub_worker("dock", 12, Arc::clone(&log))
        .expect("worker")
        .run()
        .expect("first run");
    let stats = stub_worker("dock", 5, Arc::clone(&log))
        .expect("worker")
        .run()
        .expect("second run");
    assert_eq!(stats.last_frame_number, Some(16));

    let records = log.query(&FrameQuery::for_camera("dock")).expect("query");
    let numbers: Vec<u64> = records.iter().map(|record| record.frame_number).collect();
    assert_eq!(numbers, (0..17).collect::<Vec<u64>>());

    // The second run re-reads the source from its start, so its records
    // point at the same media offsets and content as the first five.
    for offset in 0..5 {
        let first = &records[offset];
        let resumed = &records[12 + offset];
        assert_eq!(resumed.frame_timestamp, first.frame_timestamp);
        assert_eq!(resumed.frame_timestamp, offset as f64 / FPS);
        assert_eq!(person_boxes(resumed), person_boxes(first));
    }
}

#[test]
fn raised_stop_flag_ends_the_stream() {
    let log = Arc::new(InMemoryFrameLog::new());
    let stats = stub_worker("yard", 50, log.clone())
        .expect("worker")
        .with_stop_flag(Arc::new(AtomicBool::new(true)))
        .run()
        .expect("run");
    assert_eq!(stats.frames, 0);
    assert!(log.is_empty().expect("len"));
}

#[test]
fn backend_input_size_must_match_decoder() {
    let log: Arc<dyn FrameLog> = Arc::new(InMemoryFrameLog::new());
    let backend = ScriptedBackend::new(640, 480, 320, Vec::new()).expect("backend");
    let source = FileSource::open(FileConfig::new("stub://gate")).expect("source");
    let result = StreamWorker::new(
        StreamSpec::new("gate", FPS),
        Box::new(source),
        Arc::new(Mutex::new(backend)),
        AttributeExtractor::default(),
        log,
    );
    assert!(result.is_err());
}

/// Storage that never accepts anything.
struct UnavailableLog;

impl FrameLog for UnavailableLog {
    fn append(&self, _record: &FrameRecord) -> anyhow::Result<()> {
        Err(anyhow!("storage offline"))
    }

    fn query(&self, _query: &FrameQuery) -> anyhow::Result<Vec<FrameRecord>> {
        Ok(Vec::new())
    }

    fn last_frame_number(&self, _video_id: &str, _camera_id: &str) -> anyhow::Result<Option<u64>> {
        Ok(None)
    }
}

#[test]
fn unavailable_storage_stops_the_stream_with_a_failure() {
    let mut source_config = FileConfig::new("stub://lobby");
    source_config.frame_limit = Some(10);
    let (width, height) = source_config.synthetic_size;
    let backend = ScriptedBackend::new(
        width,
        height,
        DEFAULT_INPUT_SIZE,
        walkthrough_script(width, height, 10),
    )
    .expect("backend");
    let mut spec = StreamSpec::new("lobby", FPS);
    spec.retry = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
    };
    let worker = StreamWorker::new(
        spec,
        Box::new(FileSource::open(source_config).expect("source")),
        Arc::new(Mutex::new(backend)),
        AttributeExtractor::default(),
        Arc::new(UnavailableLog),
    )
    .expect("worker");

    let err = worker.run().expect_err("append must fail");
    let failure = err
        .downcast_ref::<RecordAppendFailure>()
        .expect("append failure surfaced");
    assert_eq!(failure.frame_number, 0);
    assert_eq!(failure.attempts, 3);
}
