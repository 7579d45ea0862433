//! Image resize/augmentation pipeline.

use crate::types::{DecodedSample, ResizeMode, VocResult, YoloBox};
use image::imageops::FilterType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// ImageNet channel statistics, applied after scaling pixels to 0..1.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalize {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalize {
    fn default() -> Self {
        Self {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    /// Output (width, height). Every sample in a batch must share it.
    pub target_size: (u32, u32),
    pub resize_mode: ResizeMode,
    pub flip_horizontal_prob: f32,
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
    pub normalize: Option<Normalize>,
    /// Seed for reproducible augmentation; mixed with the per-sample key.
    pub seed: Option<u64>,
}

impl TransformPipeline {
    /// Standard pipeline for a split: training adds flip and color jitter.
    pub fn for_split(train: bool, image_size: u32) -> Self {
        let builder = TransformPipelineBuilder::new().target_size((image_size, image_size));
        if train {
            builder
                .flip_horizontal_prob(0.5)
                .color_jitter(0.5, 0.2)
                .build()
        } else {
            builder.build()
        }
    }

    pub fn is_augmenting(&self) -> bool {
        self.flip_horizontal_prob > 0.0
            || (self.color_jitter_prob > 0.0 && self.color_jitter_strength > 0.0)
    }

    pub fn describe(&self) -> String {
        format!(
            "target_size={}x{} resize={:?} flip_p={:.2} color_jitter_p={:.2} strength={:.2} normalize={} seed={}",
            self.target_size.0,
            self.target_size.1,
            self.resize_mode,
            self.flip_horizontal_prob,
            self.color_jitter_prob,
            self.color_jitter_strength,
            self.normalize.is_some(),
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    pub(crate) fn apply(
        &self,
        img: image::RgbImage,
        boxes: &[YoloBox],
        sample_key: u64,
    ) -> VocResult<DecodedSample> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ sample_key),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let (w, h) = self.target_size;
        // Clip to the image before any geometric remap.
        let mut boxes: Vec<YoloBox> = boxes
            .iter()
            .map(|b| YoloBox::from_xyxy(b.class_id, b.to_xyxy()))
            .collect();

        let mut canvas = match self.resize_mode {
            ResizeMode::Force => image::imageops::resize(&img, w, h, FilterType::Triangle),
            ResizeMode::Letterbox => {
                let fit = Letterbox::fit(img.dimensions(), self.target_size);
                for b in boxes.iter_mut() {
                    *b = fit.map_box(b);
                }
                fit.render(&img)
            }
        };

        if self.flip_horizontal_prob > 0.0 && rng.random::<f32>() < self.flip_horizontal_prob {
            image::imageops::flip_horizontal_in_place(&mut canvas);
            for b in boxes.iter_mut() {
                b.cx = 1.0 - b.cx;
            }
        }

        if self.color_jitter_prob > 0.0
            && self.color_jitter_strength > 0.0
            && rng.random::<f32>() < self.color_jitter_prob
        {
            let s = self.color_jitter_strength;
            let lut = jitter_lut(
                1.0 + rng.random_range(-s..s),
                1.0 + rng.random_range(-s..s),
            );
            for px in canvas.pixels_mut() {
                for c in px.0.iter_mut() {
                    *c = lut[*c as usize];
                }
            }
        }

        boxes.retain(|b| b.w > 0.0 && b.h > 0.0);
        Ok(DecodedSample {
            image_chw: to_chw(&canvas, self.normalize.as_ref()),
            width: w,
            height: h,
            boxes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            inner: TransformPipeline {
                target_size: (448, 448),
                resize_mode: ResizeMode::Force,
                flip_horizontal_prob: 0.0,
                color_jitter_prob: 0.0,
                color_jitter_strength: 0.0,
                normalize: Some(Normalize::default()),
                seed: None,
            },
        }
    }
    pub fn target_size(mut self, size: (u32, u32)) -> Self {
        self.inner.target_size = size;
        self
    }
    pub fn resize_mode(mut self, mode: ResizeMode) -> Self {
        self.inner.resize_mode = mode;
        self
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn color_jitter(mut self, prob: f32, strength: f32) -> Self {
        self.inner.color_jitter_prob = prob;
        self.inner.color_jitter_strength = strength;
        self
    }
    pub fn normalize(mut self, normalize: Option<Normalize>) -> Self {
        self.inner.normalize = normalize;
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.inner.seed = seed;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

fn to_chw(img: &image::RgbImage, normalize: Option<&Normalize>) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut image_chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            image_chw[c * plane + base] = match normalize {
                Some(n) => (v - n.mean[c]) / n.std[c],
                None => v,
            };
        }
    }
    image_chw
}

/// Aspect-preserving fit of a source image into the target canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    target: (u32, u32),
    content: (u32, u32),
    offset: (u32, u32),
}

impl Letterbox {
    fn fit((src_w, src_h): (u32, u32), (dst_w, dst_h): (u32, u32)) -> Self {
        let scale = (dst_w as f32 / src_w as f32).min(dst_h as f32 / src_h as f32);
        let content = (
            ((src_w as f32 * scale).round() as u32).clamp(1, dst_w),
            ((src_h as f32 * scale).round() as u32).clamp(1, dst_h),
        );
        Self {
            target: (dst_w, dst_h),
            content,
            offset: ((dst_w - content.0) / 2, (dst_h - content.1) / 2),
        }
    }

    /// Re-express a box normalized to the source image in canvas coordinates.
    fn map_box(&self, b: &YoloBox) -> YoloBox {
        let sx = self.content.0 as f32 / self.target.0 as f32;
        let sy = self.content.1 as f32 / self.target.1 as f32;
        let ox = self.offset.0 as f32 / self.target.0 as f32;
        let oy = self.offset.1 as f32 / self.target.1 as f32;
        YoloBox {
            class_id: b.class_id,
            cx: b.cx * sx + ox,
            cy: b.cy * sy + oy,
            w: b.w * sx,
            h: b.h * sy,
        }
    }

    /// Black canvas with the resized image centered on it.
    fn render(&self, img: &image::RgbImage) -> image::RgbImage {
        let scaled = image::imageops::resize(img, self.content.0, self.content.1, FilterType::Triangle);
        let mut canvas = image::RgbImage::new(self.target.0, self.target.1);
        image::imageops::overlay(&mut canvas, &scaled, self.offset.0 as i64, self.offset.1 as i64);
        canvas
    }
}

/// Per-intensity table for contrast around mid-gray followed by brightness scaling.
fn jitter_lut(brightness: f32, contrast: f32) -> [u8; 256] {
    std::array::from_fn(|v| {
        let x = ((v as f32 / 255.0 - 0.5) * contrast + 0.5) * brightness;
        (x.clamp(0.0, 1.0) * 255.0).round() as u8
    })
}
