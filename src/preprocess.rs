//! Image decoding and tensor preparation.
//!
//! The feature backbone expects an NHWC `[1, S, S, 3]` float tensor with every
//! channel mapped to `[-1, 1]`. Resizing is plain point sampling: each
//! destination pixel copies the source pixel at
//! `(floor(x / S * width), floor(y / S * height))`. Aspect ratio is not
//! preserved and no filtering is applied.

use image::{DynamicImage, RgbImage};

use crate::EmbedError;

/// Default square input edge for MobileNet-style backbones.
pub const DEFAULT_INPUT_SIZE: u32 = 224;

const CHANNELS: usize = 3;

/// Flat `[S, S, 3]` tensor, row-major, RGB interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    size: u32,
    data: Vec<f32>,
}

impl ImageTensor {
    /// Edge length `S` of the square tensor.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Batched NHWC shape fed to the model.
    pub fn shape(&self) -> [usize; 4] {
        let s = self.size as usize;
        [1, s, s, CHANNELS]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Normalized RGB triple at destination pixel `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        if x >= self.size || y >= self.size {
            return None;
        }
        let offset = (y as usize * self.size as usize + x as usize) * CHANNELS;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }
}

/// Maps an 8-bit channel value onto `[-1, 1]`.
#[inline]
pub fn normalize_channel(value: u8) -> f32 {
    value as f32 / 127.5 - 1.0
}

/// Decodes `bytes` (PNG, JPEG or WebP) and produces the model input tensor.
pub fn preprocess_image(bytes: &[u8], size: u32) -> Result<ImageTensor, EmbedError> {
    if size == 0 {
        return Err(EmbedError::InvalidInput("input size must be >= 1".into()));
    }
    if bytes.is_empty() {
        return Err(EmbedError::Decode("empty image buffer".into()));
    }

    let decoded =
        image::load_from_memory(bytes).map_err(|e| EmbedError::Decode(e.to_string()))?;
    tensor_from_image(&decoded, size)
}

/// Point-samples an already decoded image into a tensor. Alpha is dropped.
pub fn tensor_from_image(image: &DynamicImage, size: u32) -> Result<ImageTensor, EmbedError> {
    if size == 0 {
        return Err(EmbedError::InvalidInput("input size must be >= 1".into()));
    }
    let rgb: RgbImage = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(EmbedError::Decode(format!(
            "image has degenerate dimensions {width}x{height}"
        )));
    }

    let s = size as usize;
    let mut data = Vec::with_capacity(s * s * CHANNELS);
    for y in 0..size {
        let src_y = source_coordinate(y, size, height);
        for x in 0..size {
            let src_x = source_coordinate(x, size, width);
            let px = rgb.get_pixel(src_x, src_y);
            data.push(normalize_channel(px[0]));
            data.push(normalize_channel(px[1]));
            data.push(normalize_channel(px[2]));
        }
    }

    Ok(ImageTensor { size, data })
}

/// `floor(dest / size * extent)`, computed in integers so it never reaches `extent`.
#[inline]
fn source_coordinate(dest: u32, size: u32, extent: u32) -> u32 {
    ((dest as u64 * extent as u64) / size as u64) as u32
}
