//! Model input preparation

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Side length of the square image the detection model expects.
///
/// Fixed by the model; independent of the capture resolution.
pub const MODEL_INPUT_SIZE: u32 = 255;

/// `UINT8` input tensor, row-major, NHWC.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: Vec<u8>,
}

impl InputTensor {
    /// Resize `image` to the model input size and add the batch dimension,
    /// giving shape `[1, 255, 255, 3]`.
    pub fn from_image(name: impl Into<String>, image: &RgbImage) -> Self {
        let resized = imageops::resize(image, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, FilterType::Triangle);
        let side = MODEL_INPUT_SIZE as i64;
        Self {
            name: name.into(),
            shape: vec![1, side, side, 3],
            data: resized.into_raw(),
        }
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().map(|d| (*d).max(0) as usize).product()
    }
}
