#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::letterbox::InputTensor;
use crate::detect::result::RawDetections;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// The model takes a `1 x 3 x S x S` tensor and produces a
/// `1 x (4 + classes) x candidates` tensor. Model loading is the only disk
/// access; inference is pure.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn infer(&mut self, input: &InputTensor) -> Result<RawDetections> {
        if input.size != self.input_size {
            return Err(anyhow!(
                "input tensor is {}px, model expects {}px",
                input.size,
                self.input_size
            ));
        }
        let size = input.size as usize;
        let tensor = tract_ndarray::Array4::from_shape_vec((1, 3, size, size), input.data.clone())
            .context("input tensor shape mismatch")?
            .into_tensor();
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let (rows, candidates) = match shape.as_slice() {
            [1, rows, candidates] => (*rows, *candidates),
            [rows, candidates] => (*rows, *candidates),
            other => return Err(anyhow!("unexpected detector output shape {:?}", other)),
        };
        if rows < 5 {
            return Err(anyhow!("detector output has {} rows, need at least 5", rows));
        }
        let data: Vec<f32> = view.iter().copied().collect();
        RawDetections::new(data, rows - 4, candidates)
    }
}
