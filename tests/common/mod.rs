//! Shared fixtures: a tiny deterministic model and PNG builders.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lookalike::{EmbedError, EmbeddingModel, ImageTensor, ModelLoader, RetryConfig};

pub const FAKE_INPUT_SIZE: u32 = 16;

/// Mean of each channel over the left and right halves, shifted into
/// `[0, 2]`. Solid colors of the same hue land on the same direction.
pub struct HalfMeanModel;

impl EmbeddingModel for HalfMeanModel {
    fn name(&self) -> &str {
        "half-mean"
    }

    fn input_size(&self) -> u32 {
        FAKE_INPUT_SIZE
    }

    fn embed(&self, tensor: &ImageTensor) -> Result<Vec<f32>, EmbedError> {
        let size = tensor.size();
        let mut sums = [0.0f32; 6];
        for y in 0..size {
            for x in 0..size {
                let half = if x < size / 2 { 0 } else { 3 };
                let px = tensor.pixel(x, y).ok_or_else(|| {
                    EmbedError::Inference(format!("pixel {x},{y} out of range"))
                })?;
                for c in 0..3 {
                    sums[half + c] += px[c] + 1.0;
                }
            }
        }
        let count = (size * size / 2) as f32;
        Ok(sums.iter().map(|s| s / count).collect())
    }
}

/// Loader that counts calls, can sleep to widen race windows and can fail.
pub struct CountingLoader {
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
    pub failure: Option<EmbedError>,
}

impl CountingLoader {
    pub fn ok() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            failure: None,
        }
    }

    pub fn failing(err: EmbedError) -> Self {
        Self {
            failure: Some(err),
            ..Self::ok()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl ModelLoader for CountingLoader {
    fn load(&self) -> Result<Arc<dyn EmbeddingModel>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(Arc::new(HalfMeanModel)),
        }
    }
}

pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_retries(max_retries)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
        .with_jitter(false)
}

/// Encodes a solid-color PNG.
pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode_png(RgbImage::from_pixel(width, height, Rgb(color)))
}

/// Left half `left`, right half `right`.
pub fn split_png(width: u32, height: u32, left: [u8; 3], right: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 { Rgb(left) } else { Rgb(right) }
    });
    encode_png(img)
}

fn encode_png(img: RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

pub fn write_png(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write fixture");
    path
}
