//! Burn detection model and loss for VOC training.
//!
//! This crate defines:
//! - `GridDetector`: convolutional backbone pooled to an `S x S` grid with a
//!   `5 + C` channel head.
//! - `YoloLoss`: objectness, box and class terms over the encoded grid targets.
//!
//! The trainer only depends on the `DetectionModel` and `DetectionCriterion`
//! traits, so other architectures or losses can be swapped in.

pub mod detector;
pub mod loss;

pub use detector::{ConvBlock, DetectionModel, GridDetector, GridDetectorConfig};
pub use loss::{DetectionCriterion, YoloLoss, YoloLossConfig};
