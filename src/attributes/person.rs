use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::geometry::BoundingBox;

use super::AttributeClassifier;

/// Output order of the person attribute model.
pub const PERSON_ATTRIBUTE_LABELS: [&str; 8] = [
    "is_male",
    "has_bag",
    "has_backpack",
    "has_hat",
    "has_longsleeves",
    "has_longpants",
    "has_longhair",
    "has_coat_jacket",
];

/// `(width, height)` of the classifier input.
pub const PERSON_CROP_SIZE: (u32, u32) = (80, 160);

/// Crop a person box widened or heightened to a 1:2 aspect around its
/// center, clipped to the frame and resized to `PERSON_CROP_SIZE`.
pub fn person_crop(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let mut x = bbox.x_min.round() as i64;
    let mut y = bbox.y_min.round() as i64;
    let mut w = bbox.width().round() as i64;
    let mut h = bbox.height().round() as i64;

    if w * 2 < h {
        let new_w = h / 2;
        x += (w - new_w).div_euclid(2);
        w = new_w;
    } else {
        let new_h = w * 2;
        y += (h - new_h).div_euclid(2);
        h = new_h;
    }

    let (frame_w, frame_h) = (i64::from(frame.width()), i64::from(frame.height()));
    let x = x.max(0);
    let y = y.max(0);
    let w = w.min(frame_w - x);
    let h = h.min(frame_h - y);
    if w <= 0 || h <= 0 {
        return None;
    }

    let region = imageops::crop_imm(frame, x as u32, y as u32, w as u32, h as u32).to_image();
    let (out_w, out_h) = PERSON_CROP_SIZE;
    Some(imageops::resize(&region, out_w, out_h, FilterType::Triangle))
}

/// Classifier that returns the same scores for every crop.
///
/// Stands in for the attribute model in synthetic streams and tests.
#[derive(Clone, Debug, Default)]
pub struct FixedAttributeClassifier {
    scores: Vec<f32>,
}

impl FixedAttributeClassifier {
    pub fn new(scores: Vec<f32>) -> Self {
        Self { scores }
    }
}

impl AttributeClassifier for FixedAttributeClassifier {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn classify(&self, crop: &RgbImage) -> Result<Vec<f32>> {
        log::trace!("fixed attribute scores for {}x{} crop", crop.width(), crop.height());
        Ok(self.scores.clone())
    }
}
