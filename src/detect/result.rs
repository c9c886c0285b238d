use anyhow::{anyhow, Result};

use crate::detect::class::ObjectClass;
use crate::geometry::BoundingBox;

/// One decoded detection in original image pixel space.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionBox {
    pub class: ObjectClass,
    /// 0..=1
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Raw detector output for one frame.
///
/// Row-major `(4 + num_classes) x num_candidates`: rows 0..4 hold
/// `cx, cy, w, h` in detector input pixels, the remaining rows hold one
/// score per class.
#[derive(Clone, Debug)]
pub struct RawDetections {
    num_classes: usize,
    num_candidates: usize,
    data: Vec<f32>,
}

impl RawDetections {
    pub fn new(data: Vec<f32>, num_classes: usize, num_candidates: usize) -> Result<Self> {
        let rows = 4 + num_classes;
        let expected = rows
            .checked_mul(num_candidates)
            .ok_or_else(|| anyhow!("detector output dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "detector output has {} values, expected {} ({} rows x {} candidates)",
                data.len(),
                expected,
                rows,
                num_candidates
            ));
        }
        Ok(Self {
            num_classes,
            num_candidates,
            data,
        })
    }

    /// Output with no candidates.
    pub fn empty(num_classes: usize) -> Self {
        Self {
            num_classes,
            num_candidates: 0,
            data: Vec::new(),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_candidates(&self) -> usize {
        self.num_candidates
    }

    pub fn value(&self, row: usize, candidate: usize) -> f32 {
        self.data[row * self.num_candidates + candidate]
    }

    pub fn box_params(&self, candidate: usize) -> [f32; 4] {
        [
            self.value(0, candidate),
            self.value(1, candidate),
            self.value(2, candidate),
            self.value(3, candidate),
        ]
    }

    pub fn score(&self, class_index: usize, candidate: usize) -> f32 {
        self.value(4 + class_index, candidate)
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        assert!(RawDetections::new(vec![0.0; 10], 2, 2).is_err());
        let raw = RawDetections::new(vec![0.0; 12], 2, 2).unwrap();
        assert_eq!(raw.num_candidates(), 2);
    }
}
