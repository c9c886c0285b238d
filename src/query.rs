//! Structured frame selection, as produced by the external query translator.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::attributes::AttributeValue;
use crate::detect::ObjectClass;
use crate::record::{Detection, FrameRecord};

/// Conditions a single detection must satisfy. Unset fields match anything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionPredicate {
    #[serde(default)]
    pub class: Option<ObjectClass>,
    #[serde(default)]
    pub min_confidence: Option<f32>,
    #[serde(default)]
    pub track_id: Option<u64>,
    /// Attribute key -> required value.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl DetectionPredicate {
    pub fn matches(&self, detection: &Detection) -> bool {
        if let Some(class) = self.class {
            if detection.class != class {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if detection.confidence < min {
                return false;
            }
        }
        if let Some(track_id) = self.track_id {
            if detection.track_id != Some(track_id) {
                return false;
            }
        }
        self.attributes
            .iter()
            .all(|(key, wanted)| detection.attributes.get(key).is_some_and(|v| v == wanted))
    }
}

/// Frame-level selection. A frame matches when its key fields match and,
/// if a detection predicate is set, at least one detection satisfies it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameQuery {
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub camera_id: Option<String>,
    /// Inclusive lower bound on `captured_at_ms`.
    #[serde(default)]
    pub captured_from_ms: Option<u64>,
    /// Exclusive upper bound on `captured_at_ms`.
    #[serde(default)]
    pub captured_to_ms: Option<u64>,
    #[serde(default)]
    pub detection: Option<DetectionPredicate>,
}

impl FrameQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_camera(camera_id: &str) -> Self {
        Self {
            camera_id: Some(camera_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_detection(mut self, predicate: DetectionPredicate) -> Self {
        self.detection = Some(predicate);
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let query: FrameQuery =
            serde_json::from_str(text).context("failed to parse frame query JSON")?;
        query.validate()?;
        Ok(query)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read query file {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.captured_from_ms, self.captured_to_ms) {
            if from > to {
                return Err(anyhow!(
                    "query time range is inverted ({} > {})",
                    from,
                    to
                ));
            }
        }
        if let Some(min) = self.detection.as_ref().and_then(|p| p.min_confidence) {
            if !(0.0..=1.0).contains(&min) {
                return Err(anyhow!("min_confidence must be in [0, 1], got {}", min));
            }
        }
        Ok(())
    }

    /// Key and time-range part of the query.
    pub fn matches_key(&self, record: &FrameRecord) -> bool {
        if let Some(video_id) = &self.video_id {
            if &record.video_id != video_id {
                return false;
            }
        }
        if let Some(camera_id) = &self.camera_id {
            if &record.camera_id != camera_id {
                return false;
            }
        }
        if let Some(from) = self.captured_from_ms {
            if record.captured_at_ms < from {
                return false;
            }
        }
        if let Some(to) = self.captured_to_ms {
            if record.captured_at_ms >= to {
                return false;
            }
        }
        true
    }

    /// Detection part of the query.
    pub fn matches_detections(&self, record: &FrameRecord) -> bool {
        match &self.detection {
            Some(predicate) => record.detections.iter().any(|d| predicate.matches(d)),
            None => true,
        }
    }

    pub fn matches(&self, record: &FrameRecord) -> bool {
        self.matches_key(record) && self.matches_detections(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;
    use crate::geometry::BoundingBox;
    use uuid::Uuid;

    fn detection(class: ObjectClass, color: &str, track_id: Option<u64>) -> Detection {
        let mut attributes = Attributes::new();
        attributes.insert("top_color".into(), AttributeValue::text(color));
        attributes.insert("has_hat".into(), AttributeValue::Bool(true));
        Detection {
            object_id: Uuid::new_v4(),
            class,
            confidence: 0.6,
            bounding_box: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            attributes,
            track_id,
        }
    }

    fn record(detections: Vec<Detection>) -> FrameRecord {
        FrameRecord {
            video_id: "gate".into(),
            camera_id: "gate".into(),
            frame_number: 1,
            frame_timestamp: 0.1,
            captured_at_ms: 5_000,
            detections,
        }
    }

    #[test]
    fn predicate_requires_one_detection_to_satisfy_every_field() -> Result<()> {
        let query = FrameQuery::from_json(
            r#"{"detection": {"class": "person", "attributes": {"top_color": "Red", "has_hat": true}}}"#,
        )?;
        // Red car plus blue person: no single detection satisfies both fields.
        let mixed = record(vec![
            detection(ObjectClass::Car, "Red", None),
            detection(ObjectClass::Person, "Blue", Some(1)),
        ]);
        assert!(!query.matches(&mixed));

        let hit = record(vec![detection(ObjectClass::Person, "Red", Some(4))]);
        assert!(query.matches(&hit));
        Ok(())
    }

    #[test]
    fn key_and_time_bounds_apply() {
        let rec = record(vec![]);
        let mut query = FrameQuery::for_camera("gate");
        assert!(query.matches(&rec));
        query.captured_from_ms = Some(5_000);
        query.captured_to_ms = Some(5_001);
        assert!(query.matches(&rec));
        query.captured_to_ms = Some(5_000);
        assert!(!query.matches(&rec));
        assert!(!FrameQuery::for_camera("yard").matches(&rec));
    }

    #[test]
    fn track_and_confidence_filters() {
        let rec = record(vec![detection(ObjectClass::Person, "Gray", Some(9))]);
        let by_track = FrameQuery::all().with_detection(DetectionPredicate {
            track_id: Some(9),
            ..DetectionPredicate::default()
        });
        assert!(by_track.matches(&rec));
        let too_strict = FrameQuery::all().with_detection(DetectionPredicate {
            min_confidence: Some(0.7),
            ..DetectionPredicate::default()
        });
        assert!(!too_strict.matches(&rec));
    }

    #[test]
    fn rejects_bad_queries() {
        assert!(FrameQuery::from_json(r#"{"captured_from_ms": 10, "captured_to_ms": 5}"#).is_err());
        assert!(FrameQuery::from_json(r#"{"detection": {"class": "unicorn"}}"#).is_err());
        assert!(FrameQuery::from_json(r#"{"colour": "red"}"#).is_err());
    }
}
