//! Training loop for the VOC grid detector.
//!
//! - `engine`: one training epoch and one validation pass.
//! - `util::run_train`: the epoch loop with LR scheduling and best-model checkpoints.
//! - `config`: defaults, TOML and CLI layering.

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod scheduler;
pub mod util;

pub use checkpoint::{load_grid_detector_from_checkpoint, save_checkpoint, BestModelTracker};
pub use config::{BackendKind, TrainArgs, TrainConfig};
pub use dataset::{build_datasets, TrainData};
pub use engine::{train_one_epoch, validate, LossMeter};
pub use metrics::{EpochRecord, MetricsWriter};
pub use scheduler::{PlateauConfig, PlateauMode, ReduceLrOnPlateau, ThresholdMode};
pub use util::{run_train, validate_backend_choice, TrainSummary};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
