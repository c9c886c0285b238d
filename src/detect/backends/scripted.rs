use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::class::NUM_CLASSES;
use crate::detect::decoder::encode_detections;
use crate::detect::letterbox::{InputTensor, Letterbox};
use crate::detect::class::ObjectClass;
use crate::detect::result::{DetectionBox, RawDetections};
use crate::geometry::BoundingBox;

/// Deterministic backend that replays a per-frame script of detections.
///
/// Each `infer` call emits the next scripted frame encoded as a raw
/// detector tensor; once the script is exhausted it emits empty output.
/// Used by `stub://` streams, the demo and tests.
pub struct ScriptedBackend {
    letterbox: Letterbox,
    frames: Vec<Vec<DetectionBox>>,
    cursor: usize,
}

impl ScriptedBackend {
    /// `frames` hold boxes in original pixels of a `width x height` stream.
    pub fn new(
        width: u32,
        height: u32,
        input_size: u32,
        frames: Vec<Vec<DetectionBox>>,
    ) -> Result<Self> {
        Ok(Self {
            letterbox: Letterbox::fit(width, height, input_size)?,
            frames,
            cursor: 0,
        })
    }

    pub fn frames_emitted(&self) -> usize {
        self.cursor
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn input_size(&self) -> u32 {
        self.letterbox.input_size
    }

    fn infer(&mut self, input: &InputTensor) -> Result<RawDetections> {
        if input.size != self.letterbox.input_size {
            return Err(anyhow!(
                "input tensor is {}px, backend expects {}px",
                input.size,
                self.letterbox.input_size
            ));
        }
        let frame = self.frames.get(self.cursor);
        self.cursor += 1;
        match frame {
            Some(detections) => encode_detections(detections, &self.letterbox, NUM_CLASSES),
            None => Ok(RawDetections::empty(NUM_CLASSES)),
        }
    }
}

/// Script used by `stub://` cameras: a person crossing the frame for 30
/// frames out of every 60, and a parked car that never moves.
pub fn walkthrough_script(width: u32, height: u32, frames: usize) -> Vec<Vec<DetectionBox>> {
    let (w, h) = (width as f32, height as f32);
    let car = DetectionBox {
        class: ObjectClass::Car,
        confidence: 0.8,
        bbox: BoundingBox::new(w * 0.70, h * 0.65, w * 0.95, h * 0.90),
    };
    (0..frames)
        .map(|index| {
            let phase = index % 60;
            let mut detections = vec![car.clone()];
            if phase < 30 {
                let x = w * 0.05 + phase as f32 * w * 0.02;
                detections.push(DetectionBox {
                    class: ObjectClass::Person,
                    confidence: 0.9,
                    bbox: BoundingBox::new(x, h * 0.20, x + w * 0.12, h * 0.75),
                });
            }
            detections
        })
        .collect()
}
