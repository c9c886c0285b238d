//! Per-frame record assembly from decoder output, the same frame's tracker
//! snapshot and the attribute collaborators.

use anyhow::{anyhow, Result};
use uuid::Uuid;

use crate::attributes::AttributeExtractor;
use crate::detect::{DetectionBox, ObjectClass};
use crate::geometry::BoundingBox;
use crate::ingest::SourceFrame;
use crate::record::{Detection, FrameRecord};
use crate::track::TrackSnapshot;

pub const DEFAULT_REMATCH_DISTANCE: f32 = 50.0;

#[derive(Clone, Debug, PartialEq)]
pub struct BuilderConfig {
    pub camera_id: String,
    /// Frames per second of the source, used to derive `frame_timestamp`
    /// when a frame carries no decoded timestamp.
    pub fps: f64,
    pub tracked_class: ObjectClass,
    /// Gate for attaching a tracked-class detection to a snapshot track.
    pub rematch_distance: f32,
}

impl BuilderConfig {
    pub fn new(camera_id: &str, fps: f64) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            fps,
            tracked_class: ObjectClass::Person,
            rematch_distance: DEFAULT_REMATCH_DISTANCE,
        }
    }
}

/// Builds one `FrameRecord` per processed frame of a single stream.
pub struct FrameRecordBuilder {
    config: BuilderConfig,
    attributes: AttributeExtractor,
    next_frame_number: u64,
    frames_built: u64,
}

impl FrameRecordBuilder {
    pub fn new(config: BuilderConfig, attributes: AttributeExtractor) -> Result<Self> {
        if config.camera_id.is_empty() {
            return Err(anyhow!("record builder requires a camera id"));
        }
        if !(config.fps > 0.0) || !config.fps.is_finite() {
            return Err(anyhow!("record builder fps must be positive, got {}", config.fps));
        }
        if !(config.rematch_distance > 0.0) {
            return Err(anyhow!(
                "rematch distance must be positive, got {}",
                config.rematch_distance
            ));
        }
        Ok(Self {
            config,
            attributes,
            next_frame_number: 0,
            frames_built: 0,
        })
    }

    /// Continue numbering after the last frame already in the log.
    ///
    /// Only `frame_number` continues; `frame_timestamp` still follows the
    /// frame's own position in the source being read.
    pub fn resume_after(mut self, last_frame_number: Option<u64>) -> Self {
        if let Some(last) = last_frame_number {
            self.next_frame_number = last + 1;
        }
        self
    }

    pub fn video_id(&self) -> &str {
        &self.config.camera_id
    }

    pub fn next_frame_number(&self) -> u64 {
        self.next_frame_number
    }

    /// Boxes of the tracked class, in decoder order, to feed the tracker.
    pub fn tracked_boxes(&self, detections: &[DetectionBox]) -> Vec<BoundingBox> {
        detections
            .iter()
            .filter(|det| det.class == self.config.tracked_class)
            .map(|det| det.bbox)
            .collect()
    }

    /// Assemble the record for the current frame.
    ///
    /// `snapshot` must be the tracker output for this same frame; anything
    /// else is a programming error and panics.
    pub fn build(
        &mut self,
        frame: &SourceFrame,
        detections: &[DetectionBox],
        snapshot: &TrackSnapshot,
        captured_at_ms: u64,
    ) -> Result<FrameRecord> {
        assert_eq!(
            snapshot.frame_index(),
            self.frames_built + 1,
            "tracker snapshot is not from the frame being built"
        );

        let mut out = Vec::with_capacity(detections.len());
        for det in detections {
            let (attributes, track_id) = if det.class == self.config.tracked_class {
                let track_id = snapshot.nearest(&det.bbox, self.config.rematch_distance);
                if let Some(id) = track_id {
                    assert!(
                        snapshot.contains(id),
                        "detection attached to track {} absent from this frame",
                        id
                    );
                }
                (self.attributes.tracked(&frame.rgb, &det.bbox), track_id)
            } else {
                (self.attributes.untracked(&frame.rgb, det.class, &det.bbox), None)
            };
            out.push(Detection {
                object_id: Uuid::new_v4(),
                class: det.class,
                confidence: det.confidence,
                bounding_box: det.bbox,
                attributes,
                track_id,
            });
        }

        let frame_number = self.next_frame_number;
        let record = FrameRecord {
            video_id: self.config.camera_id.clone(),
            camera_id: self.config.camera_id.clone(),
            frame_number,
            frame_timestamp: frame.media_offset_s(self.config.fps),
            captured_at_ms,
            detections: out,
        };
        self.next_frame_number += 1;
        self.frames_built += 1;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::CentroidTracker;
    use image::RgbImage;

    fn det(class: ObjectClass, bbox: BoundingBox) -> DetectionBox {
        DetectionBox {
            class,
            confidence: 0.8,
            bbox,
        }
    }

    fn builder() -> FrameRecordBuilder {
        FrameRecordBuilder::new(BuilderConfig::new("dock", 10.0), AttributeExtractor::default())
            .unwrap()
    }

    #[test]
    fn tracked_class_gets_track_ids_and_others_do_not() -> Result<()> {
        let frame = SourceFrame::new(RgbImage::new(320, 240), 0);
        let mut tracker = CentroidTracker::default();
        let mut builder = builder();
        let detections = vec![
            det(ObjectClass::Person, BoundingBox::new(10.0, 10.0, 40.0, 90.0)),
            det(ObjectClass::Car, BoundingBox::new(100.0, 100.0, 200.0, 160.0)),
            det(ObjectClass::Person, BoundingBox::new(200.0, 10.0, 230.0, 90.0)),
        ];

        for expected_frame in 0..3u64 {
            let snapshot = tracker.update(&builder.tracked_boxes(&detections));
            let record = builder.build(&frame, &detections, &snapshot, 1_000)?;
            assert_eq!(record.frame_number, expected_frame);
            assert_eq!(record.video_id, "dock");
            assert_eq!(record.detections[0].track_id, Some(1));
            assert_eq!(record.detections[1].track_id, None);
            assert!(record.detections[1].attributes.is_empty());
            assert_eq!(record.detections[2].track_id, Some(2));
            assert!(record.detections[0].attributes.contains_key("top_color"));
            assert_ne!(record.detections[0].object_id, record.detections[2].object_id);
        }
        Ok(())
    }

    #[test]
    fn resumed_numbering_keeps_source_timestamps() -> Result<()> {
        let mut tracker = CentroidTracker::default();
        let mut builder = builder().resume_after(Some(41));

        let first = SourceFrame::new(RgbImage::new(64, 64), 0);
        let record = builder.build(&first, &[], &tracker.update(&[]), 0)?;
        assert_eq!(record.frame_number, 42);
        assert_eq!(record.frame_timestamp, 0.0);
        assert!(record.detections.is_empty());

        let third = SourceFrame::new(RgbImage::new(64, 64), 2);
        let record = builder.build(&third, &[], &tracker.update(&[]), 0)?;
        assert_eq!(record.frame_number, 43);
        assert!((record.frame_timestamp - 0.2).abs() < 1e-9);

        let mut decoded = SourceFrame::new(RgbImage::new(64, 64), 3);
        decoded.pts_s = Some(7.25);
        let record = builder.build(&decoded, &[], &tracker.update(&[]), 0)?;
        assert_eq!(record.frame_number, 44);
        assert_eq!(record.frame_timestamp, 7.25);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "tracker snapshot is not from the frame being built")]
    fn stale_snapshot_fails_loudly() {
        let frame = SourceFrame::new(RgbImage::new(64, 64), 0);
        let mut tracker = CentroidTracker::default();
        let mut builder = builder();
        let first = tracker.update(&[]);
        let _ = builder.build(&frame, &[], &first, 0);
        let _second = tracker.update(&[]);
        let _ = builder.build(&frame, &[], &first, 0);
    }
}
