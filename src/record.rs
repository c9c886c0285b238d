//! Persisted per-frame records.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::attributes::{AttributeValue, Attributes};
use crate::detect::ObjectClass;
use crate::geometry::BoundingBox;

/// One detected object in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Unique per detection instance; unrelated to `track_id`.
    pub object_id: Uuid,
    pub class: ObjectClass,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
}

/// Everything recorded about one processed frame. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub video_id: String,
    pub camera_id: String,
    /// Strictly increasing per `(video_id, camera_id)`.
    pub frame_number: u64,
    /// Presentation offset in seconds within the source video.
    pub frame_timestamp: f64,
    /// Wall-clock ingest time, epoch milliseconds.
    pub captured_at_ms: u64,
    pub detections: Vec<Detection>,
}

impl FrameRecord {
    pub fn key(&self) -> FrameKey {
        FrameKey {
            video_id: self.video_id.clone(),
            camera_id: self.camera_id.clone(),
            frame_number: self.frame_number,
            frame_timestamp: self.frame_timestamp,
        }
    }

    /// Structural checks applied before a record is persisted.
    pub fn validate(&self) -> Result<()> {
        if self.video_id.is_empty() || self.camera_id.is_empty() {
            return Err(anyhow!("frame record requires video_id and camera_id"));
        }
        if !self.frame_timestamp.is_finite() || self.frame_timestamp < 0.0 {
            return Err(anyhow!(
                "frame {} has invalid timestamp {}",
                self.frame_number,
                self.frame_timestamp
            ));
        }
        let mut seen = HashSet::with_capacity(self.detections.len());
        for detection in &self.detections {
            if !seen.insert(detection.object_id) {
                return Err(anyhow!(
                    "frame {} repeats object_id {}",
                    self.frame_number,
                    detection.object_id
                ));
            }
            if !(0.0..=1.0).contains(&detection.confidence) {
                return Err(anyhow!(
                    "frame {} detection {} has confidence {} outside [0, 1]",
                    self.frame_number,
                    detection.object_id,
                    detection.confidence
                ));
            }
            if !detection.bounding_box.is_finite() {
                return Err(anyhow!(
                    "frame {} detection {} has a non-finite bounding box",
                    self.frame_number,
                    detection.object_id
                ));
            }
            for (key, value) in &detection.attributes {
                if let AttributeValue::Number(n) = value {
                    if !n.is_finite() {
                        return Err(anyhow!(
                            "frame {} detection {} attribute {} is not finite",
                            self.frame_number,
                            detection.object_id,
                            key
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Canonical JSON payload and its hex SHA-256 digest.
    pub fn encode(&self) -> Result<(String, String)> {
        let payload = serde_json::to_string(self)?;
        let digest = payload_digest(&payload);
        Ok((payload, digest))
    }

    /// Decode a stored payload after checking it against its digest.
    pub fn decode(payload: &str, expected_digest: &str) -> Result<Self> {
        let actual = payload_digest(payload);
        if actual != expected_digest {
            return Err(anyhow!(
                "frame payload digest mismatch (stored {}, computed {})",
                expected_digest,
                actual
            ));
        }
        Ok(serde_json::from_str(payload)?)
    }
}

pub fn payload_digest(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// The part of a frame record the clip aggregator needs.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameKey {
    pub video_id: String,
    pub camera_id: String,
    pub frame_number: u64,
    pub frame_timestamp: f64,
}

impl FrameKey {
    pub fn new(video_id: &str, camera_id: &str, frame_number: u64, frame_timestamp: f64) -> Self {
        Self {
            video_id: video_id.to_string(),
            camera_id: camera_id.to_string(),
            frame_number,
            frame_timestamp,
        }
    }
}
