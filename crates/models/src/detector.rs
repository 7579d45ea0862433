//! YOLO-style single-scale grid detector.
//!
//! Shapes:
//! - Input images: `[B, 3, H, W]`
//! - Output: `[B, 5 + C, S, S]` raw logits per grid cell, channels ordered
//!   objectness, center x/y, width/height, class scores.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::activation::leaky_relu;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

const LEAKY_SLOPE: f64 = 0.1;
const MAX_CHANNELS: usize = 512;

/// Contract the trainer relies on: images in, grid predictions out.
pub trait DetectionModel<B: Backend>: Module<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridDetectorConfig {
    /// Output grid side `S`.
    pub grid_size: usize,
    pub num_classes: usize,
    /// Channels of the first stage; doubled per stage up to 512.
    pub base_channels: usize,
    /// Number of stride-2 stages in the backbone.
    pub stages: usize,
}

impl Default for GridDetectorConfig {
    fn default() -> Self {
        Self {
            grid_size: 7,
            num_classes: 20,
            base_channels: 16,
            stages: 5,
        }
    }
}

impl GridDetectorConfig {
    pub fn output_channels(&self) -> usize {
        5 + self.num_classes
    }

    fn stage_channels(&self, stage: usize) -> usize {
        (self.base_channels.max(1) << stage.min(16)).min(MAX_CHANNELS)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GridDetector<B> {
        GridDetector::new(*self, device)
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_ch: usize, out_ch: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_ch, out_ch], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let norm = BatchNormConfig::new(out_ch).init(device);
        Self { conv, norm }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        leaky_relu(self.norm.forward(self.conv.forward(input)), LEAKY_SLOPE)
    }
}

#[derive(Module, Debug)]
pub struct GridDetector<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
    head: Conv2d<B>,
    grid_size: usize,
}

impl<B: Backend> GridDetector<B> {
    pub fn new(cfg: GridDetectorConfig, device: &B::Device) -> Self {
        let grid_size = cfg.grid_size.max(1);
        let mut blocks = Vec::with_capacity(cfg.stages + 1);
        let mut in_ch = 3;
        for stage in 0..cfg.stages {
            let out_ch = cfg.stage_channels(stage);
            blocks.push(ConvBlock::new(in_ch, out_ch, 2, device));
            in_ch = out_ch;
        }
        // One stride-1 block so a zero-stage config still has a feature extractor.
        let neck_ch = cfg.stage_channels(cfg.stages);
        blocks.push(ConvBlock::new(in_ch, neck_ch, 1, device));

        let pool = AdaptiveAvgPool2dConfig::new([grid_size, grid_size]).init();
        let head = Conv2dConfig::new([neck_ch, cfg.output_channels()], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);

        Self {
            blocks,
            pool,
            head,
            grid_size,
        }
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.head.forward(self.pool.forward(x))
    }
}

impl<B: Backend> DetectionModel<B> for GridDetector<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        GridDetector::forward(self, images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn output_is_grid_shaped() {
        let device = Default::default();
        let cfg = GridDetectorConfig {
            grid_size: 7,
            num_classes: 20,
            base_channels: 4,
            stages: 3,
        };
        let model = cfg.init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 64], &device);
        let out = DetectionModel::forward(&model, images);
        assert_eq!(out.dims(), [2, 25, 7, 7]);
        assert_eq!(model.grid_size(), 7);
    }

    #[test]
    fn small_inputs_still_reach_the_grid() {
        let device = Default::default();
        let cfg = GridDetectorConfig {
            grid_size: 2,
            num_classes: 3,
            base_channels: 2,
            stages: 2,
        };
        let model = GridDetector::<TestBackend>::new(cfg, &device);
        let out = model.forward(Tensor::zeros([1, 3, 16, 12], &device));
        assert_eq!(out.dims(), [1, 8, 2, 2]);
    }

    #[test]
    fn channel_width_is_capped() {
        let cfg = GridDetectorConfig {
            base_channels: 64,
            ..Default::default()
        };
        assert_eq!(cfg.stage_channels(0), 64);
        assert_eq!(cfg.stage_channels(3), 512);
        assert_eq!(cfg.stage_channels(5), 512);
    }
}
