use image::{imageops, Rgb, RgbImage};

use crate::geometry::BoundingBox;

use super::ColorClassifier;

/// Named reference colors, in tie-break order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NamedColor {
    Red,
    Green,
    Blue,
    Yellow,
    Orange,
    Purple,
    Cyan,
    Magenta,
    Black,
    White,
    Gray,
}

pub const PALETTE: [(NamedColor, [u8; 3]); 11] = [
    (NamedColor::Red, [255, 0, 0]),
    (NamedColor::Green, [0, 255, 0]),
    (NamedColor::Blue, [0, 0, 255]),
    (NamedColor::Yellow, [255, 255, 0]),
    (NamedColor::Orange, [255, 165, 0]),
    (NamedColor::Purple, [128, 0, 128]),
    (NamedColor::Cyan, [0, 255, 255]),
    (NamedColor::Magenta, [255, 0, 255]),
    (NamedColor::Black, [0, 0, 0]),
    (NamedColor::White, [255, 255, 255]),
    (NamedColor::Gray, [128, 128, 128]),
];

impl NamedColor {
    pub fn label(&self) -> &'static str {
        match self {
            NamedColor::Red => "Red",
            NamedColor::Green => "Green",
            NamedColor::Blue => "Blue",
            NamedColor::Yellow => "Yellow",
            NamedColor::Orange => "Orange",
            NamedColor::Purple => "Purple",
            NamedColor::Cyan => "Cyan",
            NamedColor::Magenta => "Magenta",
            NamedColor::Black => "Black",
            NamedColor::White => "White",
            NamedColor::Gray => "Gray",
        }
    }

    /// Palette entry nearest to `pixel` by Euclidean RGB distance.
    pub fn nearest(pixel: &Rgb<u8>) -> NamedColor {
        let mut best = (NamedColor::Red, u32::MAX);
        for (color, reference) in PALETTE {
            let distance: u32 = pixel
                .0
                .iter()
                .zip(reference)
                .map(|(a, b)| {
                    let d = i32::from(*a) - i32::from(b);
                    (d * d) as u32
                })
                .sum();
            if distance < best.1 {
                best = (color, distance);
            }
        }
        best.0
    }

    fn palette_index(&self) -> usize {
        PALETTE
            .iter()
            .position(|(color, _)| color == self)
            .unwrap_or(PALETTE.len())
    }
}

/// Majority palette color over a sparse grid in the center of the crop.
#[derive(Clone, Debug)]
pub struct DominantColorSampler {
    pub sample_step: u32,
    /// Fraction of width and height kept around the center.
    pub center_ratio: f32,
}

impl Default for DominantColorSampler {
    fn default() -> Self {
        Self {
            sample_step: 10,
            center_ratio: 0.5,
        }
    }
}

impl ColorClassifier for DominantColorSampler {
    fn dominant_color(&self, crop: &RgbImage) -> Option<NamedColor> {
        let (width, height) = crop.dimensions();
        let ratio = self.center_ratio.clamp(0.0, 1.0);
        let inner_w = (width as f32 * ratio) as u32;
        let inner_h = (height as f32 * ratio) as u32;
        let start_x = (width - inner_w) / 2;
        let start_y = (height - inner_h) / 2;
        let step = self.sample_step.max(1) as usize;

        let mut counts = [0usize; PALETTE.len()];
        for y in (start_y..start_y + inner_h).step_by(step) {
            for x in (start_x..start_x + inner_w).step_by(step) {
                let color = NamedColor::nearest(crop.get_pixel(x, y));
                counts[color.palette_index()] += 1;
            }
        }

        let mut best: Option<(usize, usize)> = None;
        for (index, count) in counts.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            match best {
                Some((_, top)) if top >= *count => {}
                _ => best = Some((index, *count)),
            }
        }
        best.map(|(index, _)| PALETTE[index].0)
    }
}

/// Copy of the frame region under `bbox`, clipped to the frame. `None` when
/// the clipped region is empty.
pub fn crop_region(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let clipped = bbox.clip_to(frame.width() as f32, frame.height() as f32);
    let x = clipped.x_min.floor() as u32;
    let y = clipped.y_min.floor() as u32;
    let x_end = (clipped.x_max.ceil() as u32).min(frame.width());
    let y_end = (clipped.y_max.ceil() as u32).min(frame.height());
    if x_end <= x || y_end <= y {
        return None;
    }
    Some(imageops::crop_imm(frame, x, y, x_end - x, y_end - y).to_image())
}
