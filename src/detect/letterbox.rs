//! Letterbox geometry between original frames and the square detector input.
//!
//! The frame is scaled by `gain = min(size / h, size / w)` and centered with
//! symmetric gray padding. `to_original` is the exact inverse used when
//! decoding boxes.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::geometry::BoundingBox;

const PAD_VALUE: u8 = 114;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub input_size: u32,
    pub orig_width: u32,
    pub orig_height: u32,
    pub gain: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn fit(orig_width: u32, orig_height: u32, input_size: u32) -> Result<Self> {
        if orig_width == 0 || orig_height == 0 || input_size == 0 {
            return Err(anyhow!(
                "letterbox needs non-zero dimensions (frame {}x{}, input {})",
                orig_width,
                orig_height,
                input_size
            ));
        }
        let size = input_size as f32;
        let gain = (size / orig_height as f32).min(size / orig_width as f32);
        let pad_x = (size - orig_width as f32 * gain) / 2.0;
        let pad_y = (size - orig_height as f32 * gain) / 2.0;
        Ok(Self {
            input_size,
            orig_width,
            orig_height,
            gain,
            pad_x,
            pad_y,
        })
    }

    pub fn resized_width(&self) -> u32 {
        ((self.orig_width as f32 * self.gain).round() as u32).clamp(1, self.input_size)
    }

    pub fn resized_height(&self) -> u32 {
        ((self.orig_height as f32 * self.gain).round() as u32).clamp(1, self.input_size)
    }

    /// Map a box from detector input space back to original pixels, clipped
    /// to the original frame.
    pub fn to_original(&self, bbox: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            (bbox.x_min - self.pad_x) / self.gain,
            (bbox.y_min - self.pad_y) / self.gain,
            (bbox.x_max - self.pad_x) / self.gain,
            (bbox.y_max - self.pad_y) / self.gain,
        )
        .clip_to(self.orig_width as f32, self.orig_height as f32)
    }

    /// Map a box from original pixels into detector input space.
    pub fn to_input(&self, bbox: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            bbox.x_min * self.gain + self.pad_x,
            bbox.y_min * self.gain + self.pad_y,
            bbox.x_max * self.gain + self.pad_x,
            bbox.y_max * self.gain + self.pad_y,
        )
    }
}

/// CHW `f32` detector input in `[0, 1]`.
#[derive(Clone, Debug)]
pub struct InputTensor {
    pub size: u32,
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn value(&self, channel: usize, y: usize, x: usize) -> f32 {
        let size = self.size as usize;
        self.data[channel * size * size + y * size + x]
    }
}

/// Resize `frame` into the square input with letterbox padding.
pub fn letterbox_tensor(frame: &RgbImage, letterbox: &Letterbox) -> InputTensor {
    let size = letterbox.input_size;
    let resized = imageops::resize(
        frame,
        letterbox.resized_width(),
        letterbox.resized_height(),
        FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    let left = (size - resized.width()) / 2;
    let top = (size - resized.height()) / 2;
    imageops::overlay(&mut canvas, &resized, i64::from(left), i64::from(top));

    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let idx = (y * size + x) as usize;
        for channel in 0..3 {
            data[channel * plane + idx] = pixel[channel] as f32 / 255.0;
        }
    }
    InputTensor { size, data }
}
