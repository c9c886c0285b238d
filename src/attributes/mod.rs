//! Attribute collaborators: per-detection classifier outputs and dominant
//! color sampling, merged into a detection's attribute mapping.

mod color;
mod person;
#[cfg(feature = "backend-tract")]
mod tract;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::detect::ObjectClass;
use crate::geometry::BoundingBox;

pub use color::{crop_region, DominantColorSampler, NamedColor, PALETTE};
pub use person::{person_crop, FixedAttributeClassifier, PERSON_ATTRIBUTE_LABELS, PERSON_CROP_SIZE};
#[cfg(feature = "backend-tract")]
pub use tract::TractAttributeClassifier;

/// Score above which a classifier output becomes `true`.
pub const ATTRIBUTE_SCORE_THRESHOLD: f32 = 0.5;

/// A single attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttributeValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => write!(f, "null"),
            AttributeValue::Bool(value) => write!(f, "{}", value),
            AttributeValue::Number(value) => write!(f, "{}", value),
            AttributeValue::Text(value) => write!(f, "{}", value),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

/// Attribute mapping of one detection, ordered by key.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Fixed-length attribute scorer for a cropped region.
pub trait AttributeClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scores in `[0, 1]`, in `PERSON_ATTRIBUTE_LABELS` order. Shorter
    /// outputs are accepted; missing labels are left out.
    fn classify(&self, crop: &RgbImage) -> Result<Vec<f32>>;
}

/// Dominant color labeler for a cropped region.
pub trait ColorClassifier: Send + Sync {
    /// `None` when the crop has no samples.
    fn dominant_color(&self, crop: &RgbImage) -> Option<NamedColor>;
}

/// Attribute collaborators for one stream.
#[derive(Clone)]
pub struct AttributeExtractor {
    classifier: Option<Arc<dyn AttributeClassifier>>,
    colors: Arc<dyn ColorClassifier>,
    color_untracked: bool,
}

impl AttributeExtractor {
    pub fn new(
        classifier: Option<Arc<dyn AttributeClassifier>>,
        colors: Arc<dyn ColorClassifier>,
    ) -> Self {
        Self {
            classifier,
            colors,
            color_untracked: false,
        }
    }

    /// Also sample a `color` attribute for classes that are not tracked.
    pub fn with_untracked_color(mut self, enabled: bool) -> Self {
        self.color_untracked = enabled;
        self
    }

    /// Attributes for a tracked-class detection: classifier booleans plus
    /// `top_color` and `bottom_color`.
    ///
    /// An empty crop or a failing classifier leaves the classifier labels
    /// `Null`; the frame is still recorded.
    pub fn tracked(&self, frame: &RgbImage, bbox: &BoundingBox) -> Attributes {
        let mut attributes = Attributes::new();
        if let Some(classifier) = &self.classifier {
            let scores = person_crop(frame, bbox).and_then(|crop| match classifier.classify(&crop) {
                Ok(scores) => Some(scores),
                Err(e) => {
                    log::warn!("attribute classifier {} failed: {:#}", classifier.name(), e);
                    None
                }
            });
            match scores {
                Some(scores) => {
                    for (label, score) in PERSON_ATTRIBUTE_LABELS.iter().zip(scores) {
                        attributes.insert(
                            label.to_string(),
                            AttributeValue::Bool(score > ATTRIBUTE_SCORE_THRESHOLD),
                        );
                    }
                }
                None => {
                    for label in PERSON_ATTRIBUTE_LABELS {
                        attributes.insert(label.to_string(), AttributeValue::Null);
                    }
                }
            }
        }
        attributes.insert(
            "top_color".to_string(),
            self.color_of(frame, &bbox.upper_half()),
        );
        attributes.insert(
            "bottom_color".to_string(),
            self.color_of(frame, &bbox.lower_half()),
        );
        attributes
    }

    /// Attributes for any other class.
    pub fn untracked(&self, frame: &RgbImage, _class: ObjectClass, bbox: &BoundingBox) -> Attributes {
        let mut attributes = Attributes::new();
        if self.color_untracked {
            attributes.insert("color".to_string(), self.color_of(frame, bbox));
        }
        attributes
    }

    fn color_of(&self, frame: &RgbImage, bbox: &BoundingBox) -> AttributeValue {
        crop_region(frame, bbox)
            .and_then(|crop| self.colors.dominant_color(&crop))
            .map(|color| AttributeValue::text(color.label()))
            .unwrap_or(AttributeValue::Null)
    }
}

impl Default for AttributeExtractor {
    fn default() -> Self {
        Self::new(None, Arc::new(DominantColorSampler::default()))
    }
}
