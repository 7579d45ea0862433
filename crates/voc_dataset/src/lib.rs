//! PASCAL VOC loading for the grid detector trainer.
//!
//! This crate provides:
//! - Indexing YOLO text labels (`class cx cy w h`) against a VOC image folder
//! - Train/val splitting when both sides share one folder
//! - Resize and augmentation pipelines
//! - Grid target encoding
//! - Burn batch iteration with parallel image decode

pub mod aug;
pub mod batch;
pub mod dataset;
pub mod index;
pub mod targets;
pub mod types;

pub use aug::{Normalize, TransformPipeline, TransformPipelineBuilder};
pub use batch::{BatchIter, DetectionBatch, LoaderConfig};
pub use dataset::VocDataset;
pub use index::{index_dir, parse_label_file, split_samples};
pub use targets::GridSpec;
pub use types::*;
