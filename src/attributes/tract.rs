use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use super::{AttributeClassifier, PERSON_CROP_SIZE};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Person attribute model run through tract.
///
/// Input is `1 x 3 x 160 x 80` in BGR channel order, unnormalized `0..255`.
pub struct TractAttributeClassifier {
    model: Mutex<Plan>,
}

impl TractAttributeClassifier {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (w, h) = PERSON_CROP_SIZE;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load attribute model {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, h as usize, w as usize]).into())
            .context("failed to set attribute model input fact")?
            .into_optimized()
            .context("failed to optimize attribute model")?
            .into_runnable()
            .context("failed to build attribute model")?;
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl AttributeClassifier for TractAttributeClassifier {
    fn name(&self) -> &'static str {
        "tract-attributes"
    }

    fn classify(&self, crop: &RgbImage) -> Result<Vec<f32>> {
        let (w, h) = PERSON_CROP_SIZE;
        if crop.dimensions() != (w, h) {
            return Err(anyhow!(
                "attribute crop is {}x{}, expected {}x{}",
                crop.width(),
                crop.height(),
                w,
                h
            ));
        }
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, h as usize, w as usize),
            |(_, c, y, x)| crop.get_pixel(x as u32, y as u32)[2 - c] as f32,
        )
        .into_tensor();
        let model = self
            .model
            .lock()
            .map_err(|_| anyhow!("attribute model lock poisoned"))?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("attribute inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("attribute model produced no outputs"))?;
        let view = output.to_array_view::<f32>()?;
        Ok(view.iter().copied().collect())
    }
}
