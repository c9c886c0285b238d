//! Raw detector output -> filtered detections in original pixel space.

use anyhow::{anyhow, Result};

use crate::detect::class::ObjectClass;
use crate::detect::letterbox::Letterbox;
use crate::detect::nms::{batched_nms, Candidate};
use crate::detect::result::{DetectionBox, RawDetections};
use crate::geometry::BoundingBox;

pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
pub const DEFAULT_MAX_CANDIDATES: usize = 30_000;
pub const DEFAULT_MAX_DETECTIONS: usize = 300;

#[derive(Clone, Debug, PartialEq)]
pub struct DecoderConfig {
    /// Side length of the square detector input.
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    /// Cap applied before suppression to bound its cost.
    pub max_candidates: usize,
    /// Cap applied to suppression survivors.
    pub max_detections: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(anyhow!("decoder input_size must be greater than zero"));
        }
        for (name, value) in [
            ("conf_threshold", self.conf_threshold),
            ("iou_threshold", self.iou_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("decoder {} must be in (0, 1], got {}", name, value));
            }
        }
        if self.max_candidates == 0 || self.max_detections == 0 {
            return Err(anyhow!("decoder caps must be greater than zero"));
        }
        Ok(())
    }
}

/// Turns raw detector tensors into final detections.
#[derive(Clone, Debug, Default)]
pub struct DetectionDecoder {
    config: DecoderConfig,
}

impl DetectionDecoder {
    pub fn new(config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode one frame's detector output for an original frame of
    /// `orig_width x orig_height` pixels.
    ///
    /// No candidate above threshold yields an empty list.
    pub fn decode(
        &self,
        raw: &RawDetections,
        orig_width: u32,
        orig_height: u32,
    ) -> Result<Vec<DetectionBox>> {
        let letterbox = Letterbox::fit(orig_width, orig_height, self.config.input_size)?;

        let mut candidates = self.threshold_candidates(raw);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(self.config.max_candidates);

        let kept = batched_nms(
            &candidates,
            self.config.iou_threshold,
            self.config.max_detections,
        );

        Ok(kept
            .into_iter()
            .map(|index| {
                let candidate = &candidates[index];
                DetectionBox {
                    class: candidate.class,
                    confidence: candidate.score,
                    bbox: letterbox.to_original(&candidate.bbox).round(),
                }
            })
            .collect())
    }

    fn threshold_candidates(&self, raw: &RawDetections) -> Vec<Candidate> {
        let mut out = Vec::new();
        for candidate in 0..raw.num_candidates() {
            let Some((class_index, score)) = best_class(raw, candidate) else {
                continue;
            };
            if score < self.config.conf_threshold {
                continue;
            }
            let Some(class) = ObjectClass::from_index(class_index) else {
                log::debug!("dropping candidate with unknown class index {}", class_index);
                continue;
            };
            let [cx, cy, w, h] = raw.box_params(candidate);
            if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
                log::debug!("dropping candidate {} with non-finite box", candidate);
                continue;
            }
            out.push(Candidate {
                class,
                score,
                bbox: BoundingBox::from_cxcywh(cx, cy, w, h),
            });
        }
        out
    }
}

fn best_class(raw: &RawDetections, candidate: usize) -> Option<(usize, f32)> {
    (0..raw.num_classes())
        .map(|class_index| (class_index, raw.score(class_index, candidate)))
        .filter(|(_, score)| score.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Encode boxes given in original pixels as a raw detector tensor.
///
/// Each entry becomes one candidate whose only non-zero score is its class.
pub fn encode_detections(
    detections: &[DetectionBox],
    letterbox: &Letterbox,
    num_classes: usize,
) -> Result<RawDetections> {
    let n = detections.len();
    let mut data = vec![0.0f32; (4 + num_classes) * n];
    for (candidate, det) in detections.iter().enumerate() {
        if det.class.index() >= num_classes {
            return Err(anyhow!(
                "class {} does not fit a {}-class tensor",
                det.class,
                num_classes
            ));
        }
        let input = letterbox.to_input(&det.bbox);
        let center = input.centroid();
        let params = [center.x, center.y, input.width(), input.height()];
        for (row, value) in params.into_iter().enumerate() {
            data[row * n + candidate] = value;
        }
        data[(4 + det.class.index()) * n + candidate] = det.confidence;
    }
    RawDetections::new(data, num_classes, n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::class::NUM_CLASSES;

    fn det(class: ObjectClass, confidence: f32, bbox: BoundingBox) -> DetectionBox {
        DetectionBox {
            class,
            confidence,
            bbox,
        }
    }

    #[test]
    fn round_trips_known_box_through_letterbox() -> Result<()> {
        let known = BoundingBox::new(400.0, 150.0, 520.0, 430.0);
        let lb = Letterbox::fit(1280, 720, 640)?;
        let raw = encode_detections(
            &[det(ObjectClass::Person, 0.9, known)],
            &lb,
            NUM_CLASSES,
        )?;

        let decoded = DetectionDecoder::default().decode(&raw, 1280, 720)?;
        assert_eq!(decoded.len(), 1);
        let got = decoded[0].bbox;
        assert!((got.x_min - known.x_min).abs() <= 1.0);
        assert!((got.y_min - known.y_min).abs() <= 1.0);
        assert!((got.x_max - known.x_max).abs() <= 1.0);
        assert!((got.y_max - known.y_max).abs() <= 1.0);
        assert_eq!(decoded[0].class, ObjectClass::Person);
        Ok(())
    }

    #[test]
    fn nothing_above_threshold_is_empty_not_error() -> Result<()> {
        let lb = Letterbox::fit(640, 640, 640)?;
        let raw = encode_detections(
            &[det(ObjectClass::Car, 0.1, BoundingBox::new(0.0, 0.0, 50.0, 50.0))],
            &lb,
            NUM_CLASSES,
        )?;
        assert!(DetectionDecoder::default().decode(&raw, 640, 640)?.is_empty());
        assert!(DetectionDecoder::default()
            .decode(&RawDetections::empty(NUM_CLASSES), 640, 640)?
            .is_empty());
        Ok(())
    }

    #[test]
    fn retained_boxes_respect_threshold_and_overlap() -> Result<()> {
        let config = DecoderConfig {
            conf_threshold: 0.3,
            iou_threshold: 0.5,
            ..DecoderConfig::default()
        };
        let decoder = DetectionDecoder::new(config.clone())?;
        let lb = Letterbox::fit(640, 640, 640)?;
        let mut input = Vec::new();
        for i in 0..40 {
            let offset = (i % 8) as f32 * 6.0 + (i / 8) as f32 * 110.0;
            let class = if i % 3 == 0 { ObjectClass::Dog } else { ObjectClass::Person };
            input.push(det(
                class,
                0.2 + (i as f32 * 0.37) % 0.8,
                BoundingBox::new(offset + 10.0, 20.0, offset + 90.0, 200.0),
            ));
        }
        let raw = encode_detections(&input, &lb, NUM_CLASSES)?;
        let out = decoder.decode(&raw, 640, 640)?;
        assert!(!out.is_empty());
        for (i, a) in out.iter().enumerate() {
            assert!(a.confidence >= config.conf_threshold);
            for b in out.iter().skip(i + 1) {
                if a.class == b.class {
                    assert!(a.bbox.iou(&b.bbox) <= config.iou_threshold + 1e-3);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn boxes_are_clipped_to_frame() -> Result<()> {
        let lb = Letterbox::fit(1280, 720, 640)?;
        let raw = encode_detections(
            &[det(
                ObjectClass::Bus,
                0.8,
                BoundingBox::new(-100.0, -50.0, 1400.0, 800.0),
            )],
            &lb,
            NUM_CLASSES,
        )?;
        let out = DetectionDecoder::default().decode(&raw, 1280, 720)?;
        assert_eq!(out[0].bbox, BoundingBox::new(0.0, 0.0, 1280.0, 720.0));
        Ok(())
    }

    #[test]
    fn non_finite_boxes_are_dropped() -> Result<()> {
        let lb = Letterbox::fit(640, 640, 640)?;
        let mut raw = encode_detections(
            &[
                det(ObjectClass::Person, 0.9, BoundingBox::new(10.0, 10.0, 60.0, 120.0)),
                det(ObjectClass::Person, 0.9, BoundingBox::new(300.0, 10.0, 360.0, 120.0)),
                det(ObjectClass::Car, 0.9, BoundingBox::new(400.0, 300.0, 600.0, 400.0)),
            ],
            &lb,
            NUM_CLASSES,
        )?
        .into_data();
        // Value of row r for candidate c sits at r * 3 + c: cx of 0, h of 2.
        raw[0] = f32::NAN;
        raw[3 * 3 + 2] = f32::INFINITY;
        let raw = RawDetections::new(raw, NUM_CLASSES, 3)?;

        let out = DetectionDecoder::default().decode(&raw, 640, 640)?;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, BoundingBox::new(300.0, 10.0, 360.0, 120.0));
        assert!(out.iter().all(|d| d.bbox.is_finite()));
        Ok(())
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let config = DecoderConfig {
            iou_threshold: 0.0,
            ..DecoderConfig::default()
        };
        assert!(DetectionDecoder::new(config).is_err());
    }
}
