//! Per-camera ingestion: decode, track, build and append, one frame at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::attributes::AttributeExtractor;
use crate::builder::{BuilderConfig, FrameRecordBuilder, DEFAULT_REMATCH_DISTANCE};
use crate::detect::{letterbox_tensor, DecoderConfig, DetectionDecoder, Letterbox, ObjectClass, SharedBackend};
use crate::ingest::{FrameSource, SourceFrame};
use crate::record::FrameRecord;
use crate::storage::{append_with_retry, FrameLog, RetryPolicy};
use crate::track::{CentroidTracker, TrackerConfig};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Static settings of one camera stream.
#[derive(Clone, Debug)]
pub struct StreamSpec {
    pub camera_id: String,
    pub fps: f64,
    pub decoder: DecoderConfig,
    pub tracker: TrackerConfig,
    pub tracked_class: ObjectClass,
    pub rematch_distance: f32,
    pub retry: RetryPolicy,
}

impl StreamSpec {
    pub fn new(camera_id: &str, fps: f64) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            fps,
            decoder: DecoderConfig::default(),
            tracker: TrackerConfig::default(),
            tracked_class: ObjectClass::Person,
            rematch_distance: DEFAULT_REMATCH_DISTANCE,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamStats {
    pub frames: u64,
    pub detections: u64,
    pub tracked_detections: u64,
    pub expired_tracks: u64,
    pub last_frame_number: Option<u64>,
}

/// Owns everything stateful about one stream. Frames are handled strictly
/// in order; nothing here is shared with other streams except the log.
pub struct StreamWorker {
    camera_id: String,
    source: Box<dyn FrameSource>,
    backend: SharedBackend,
    decoder: DetectionDecoder,
    tracker: CentroidTracker,
    builder: FrameRecordBuilder,
    log: Arc<dyn FrameLog>,
    retry: RetryPolicy,
    stop: Arc<AtomicBool>,
    stats: StreamStats,
}

impl StreamWorker {
    /// Build a worker, continuing frame numbering after whatever the log
    /// already holds for this camera.
    pub fn new(
        spec: StreamSpec,
        source: Box<dyn FrameSource>,
        backend: SharedBackend,
        attributes: AttributeExtractor,
        log: Arc<dyn FrameLog>,
    ) -> Result<Self> {
        let backend_size = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?
            .input_size();
        if backend_size != spec.decoder.input_size {
            return Err(anyhow!(
                "stream {}: backend input {}px does not match decoder input {}px",
                spec.camera_id,
                backend_size,
                spec.decoder.input_size
            ));
        }

        let decoder = DetectionDecoder::new(spec.decoder)?;
        let tracker = CentroidTracker::new(spec.tracker)?;
        let builder_config = BuilderConfig {
            camera_id: spec.camera_id.clone(),
            fps: spec.fps,
            tracked_class: spec.tracked_class,
            rematch_distance: spec.rematch_distance,
        };
        let last = log.last_frame_number(&spec.camera_id, &spec.camera_id)?;
        let builder = FrameRecordBuilder::new(builder_config, attributes)?.resume_after(last);
        if let Some(last) = last {
            log::info!(
                "stream {}: resuming after stored frame {}",
                spec.camera_id,
                last
            );
        }

        Ok(Self {
            camera_id: spec.camera_id,
            source,
            backend,
            decoder,
            tracker,
            builder,
            log,
            retry: spec.retry,
            stop: Arc::new(AtomicBool::new(false)),
            stats: StreamStats::default(),
        })
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Decode, track, build and append one frame.
    pub fn process_frame(&mut self, frame: &SourceFrame) -> Result<FrameRecord> {
        let (width, height) = (frame.width(), frame.height());
        let letterbox = Letterbox::fit(width, height, self.decoder.config().input_size)?;
        let tensor = letterbox_tensor(&frame.rgb, &letterbox);
        let raw = {
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?;
            backend.infer(&tensor)?
        };
        let detections = self.decoder.decode(&raw, width, height)?;
        let snapshot = self.tracker.update(&self.builder.tracked_boxes(&detections));
        let record = self
            .builder
            .build(frame, &detections, &snapshot, crate::now_ms()?)?;

        if let Err(failure) = append_with_retry(self.log.as_ref(), &record, &self.retry) {
            log::error!("stream {}: {}", self.camera_id, failure);
            return Err(failure.into());
        }

        self.stats.frames += 1;
        self.stats.detections += record.detections.len() as u64;
        self.stats.tracked_detections +=
            record.detections.iter().filter(|d| d.track_id.is_some()).count() as u64;
        self.stats.expired_tracks += snapshot.expired().len() as u64;
        self.stats.last_frame_number = Some(record.frame_number);
        Ok(record)
    }

    /// Process frames until the source ends or the stop flag is raised.
    pub fn run(mut self) -> Result<StreamStats> {
        log::info!("stream {}: started ({})", self.camera_id, self.source.describe());
        let mut last_health_log = Instant::now();

        while !self.stop.load(Ordering::SeqCst) {
            let Some(frame) = self.source.next_frame()? else {
                break;
            };
            self.process_frame(&frame)?;

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "stream {}: frames={} detections={} live_tracks={} last_frame={:?}",
                    self.camera_id,
                    self.stats.frames,
                    self.stats.detections,
                    self.tracker.live_tracks(),
                    self.stats.last_frame_number
                );
                last_health_log = Instant::now();
            }
        }

        log::info!(
            "stream {}: stopped after {} frame(s)",
            self.camera_id,
            self.stats.frames
        );
        Ok(self.stats)
    }
}

/// Run each worker on its own named thread and wait for all of them.
/// Results are returned per camera, in input order.
pub fn run_streams(workers: Vec<StreamWorker>) -> Vec<(String, Result<StreamStats>)> {
    let mut handles = Vec::with_capacity(workers.len());
    for worker in workers {
        let camera_id = worker.camera_id().to_string();
        let spawned = thread::Builder::new()
            .name(format!("stream-{}", camera_id))
            .spawn(move || worker.run());
        handles.push((camera_id, spawned));
    }

    handles
        .into_iter()
        .map(|(camera_id, spawned)| {
            let result = match spawned {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("stream {} worker panicked", camera_id))),
                Err(e) => Err(anyhow!("failed to spawn stream {}: {}", camera_id, e)),
            };
            (camera_id, result)
        })
        .collect()
}
