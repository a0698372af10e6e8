//! Detection annotation
//!
//! Turns raw detection tensors into result records and draws them onto a
//! copy of the source frame. No I/O happens here.

use crate::error::VisionError;
use crate::font;
use crate::inference::RawDetections;
use image::{Rgb, RgbImage};
use std::sync::Arc;
use vigil_core::{DetectionResult, LabelTable, PixelBox};

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Annotated frame and the detections drawn on it, in model output order.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub image: RgbImage,
    pub results: Vec<DetectionResult>,
}

pub struct DetectionAnnotator {
    labels: Arc<LabelTable>,
    max_detections: usize,
}

impl DetectionAnnotator {
    pub fn new(labels: Arc<LabelTable>, max_detections: usize) -> Self {
        Self {
            labels,
            max_detections,
        }
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Map the first `min(cap, num_detections)` detections to results and
    /// draw them. Boxes are scaled to `image`'s own dimensions.
    ///
    /// Fails without drawing anything if a class index has no label.
    pub fn annotate(&self, image: &RgbImage, detections: &RawDetections) -> Result<Annotation, VisionError> {
        let count = detections.usable(self.max_detections);
        let mut results = Vec::with_capacity(count);
        for index in 0..count {
            let class = detections.classes[index];
            let class_name = self.labels.get(class).ok_or(VisionError::UnknownLabel {
                index: class,
                labels: self.labels.len(),
            })?;
            results.push(DetectionResult {
                index,
                class_name: class_name.to_string(),
                score: detections.scores[index],
                detections_count: detections.num_detections,
            });
        }

        let (width, height) = image.dimensions();
        let thickness = line_thickness(width, height);
        let mut canvas = image.clone();
        for result in &results {
            let pixels = detections.boxes[result.index]
                .scale(height as f32, width as f32)
                .clamp_to(height, width);
            let color = class_color(detections.classes[result.index]);
            draw_box(&mut canvas, pixels, thickness, color);
            let label = format!("{} {:.2}", result.class_name, result.score);
            draw_label(&mut canvas, pixels, &label, thickness, color);
        }

        Ok(Annotation {
            image: canvas,
            results,
        })
    }
}

/// `round(0.002 * (h + w) / 2) + 1`
pub fn line_thickness(width: u32, height: u32) -> u32 {
    (0.002 * (height as f64 + width as f64) / 2.0).round() as u32 + 1
}

/// Stable color per class index.
pub fn class_color(class: i64) -> Rgb<u8> {
    let h = (class as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    Rgb([
        ((h >> 40) as u8) | 0x30,
        ((h >> 24) as u8) | 0x30,
        ((h >> 8) as u8) | 0x30,
    ])
}

fn draw_box(image: &mut RgbImage, b: PixelBox, thickness: u32, color: Rgb<u8>) {
    let (left, right) = (b.left.min(b.right), b.left.max(b.right));
    let (top, bottom) = (b.top.min(b.bottom), b.top.max(b.bottom));
    for t in 0..thickness {
        let (l, r) = (left.saturating_add(t), right.saturating_sub(t));
        let (tp, bt) = (top.saturating_add(t), bottom.saturating_sub(t));
        if l > r || tp > bt {
            break;
        }
        for x in l..=r {
            image.put_pixel(x, tp, color);
            image.put_pixel(x, bt, color);
        }
        for y in tp..=bt {
            image.put_pixel(l, y, color);
            image.put_pixel(r, y, color);
        }
    }
}

/// Filled bar with the label text, above the box when there is room,
/// otherwise just inside its top edge.
fn draw_label(image: &mut RgbImage, b: PixelBox, text: &str, thickness: u32, color: Rgb<u8>) {
    let scale = (thickness / 2).max(1);
    let bar_height = font::GLYPH_HEIGHT * scale + 3;
    let bar_width = font::text_width(text, scale) + 2;
    let left = b.left.min(b.right);
    let top = b.top.min(b.bottom);
    let bar_top = if top >= bar_height { top - bar_height } else { top };

    fill_rect(image, left, bar_top, bar_width, bar_height, color);
    font::draw_text(image, left as i64 + 1, bar_top as i64 + 2, text, scale, TEXT_COLOR);
}

fn fill_rect(image: &mut RgbImage, left: u32, top: u32, width: u32, height: u32, color: Rgb<u8>) {
    let right = left.saturating_add(width).min(image.width());
    let bottom = top.saturating_add(height).min(image.height());
    for y in top..bottom {
        for x in left..right {
            image.put_pixel(x, y, color);
        }
    }
}
