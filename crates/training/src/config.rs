use anyhow::Context;
use clap::{Parser, ValueEnum};
use models::{GridDetectorConfig, YoloLossConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use voc_dataset::{GridSpec, ResizeMode};

use crate::scheduler::PlateauConfig;

/// Environment variable naming a TOML config when `--config` is absent.
pub const CONFIG_ENV: &str = "VOC_TRAIN_CONFIG";

const DEFAULT_IMAGE_DIR: &str = "datasets/VOCdevkit/VOC2007/JPEGImages";
const DEFAULT_LABEL_DIR: &str = "datasets/VOCdevkit/VOC2007/YOLO";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    #[value(name = "ndarray")]
    #[serde(rename = "ndarray")]
    NdArray,
    Wgpu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub train_image_dir: PathBuf,
    pub train_label_dir: PathBuf,
    pub val_image_dir: PathBuf,
    pub val_label_dir: PathBuf,
    /// Square input side fed to the model.
    pub image_size: u32,
    pub resize_mode: ResizeMode,
    /// Flip and color jitter on the training split.
    pub augment: bool,
    /// Held-out fraction when train and val share one folder; 0 reuses the full set.
    pub val_ratio: f32,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub num_workers: usize,
    /// Seeds shuffling, augmentation and the split.
    pub seed: Option<u64>,
    /// Batches between progress lines; 0 disables them.
    pub log_every: usize,
    pub checkpoint_out: PathBuf,
    pub metrics_out: Option<PathBuf>,
    pub backend: BackendKind,
    pub model: GridDetectorConfig,
    pub loss: YoloLossConfig,
    pub scheduler: PlateauConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            train_label_dir: PathBuf::from(DEFAULT_LABEL_DIR),
            val_image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            val_label_dir: PathBuf::from(DEFAULT_LABEL_DIR),
            image_size: 448,
            resize_mode: ResizeMode::Force,
            augment: true,
            val_ratio: 0.0,
            batch_size: 16,
            epochs: 100,
            learning_rate: 1e-4,
            num_workers: 4,
            seed: None,
            log_every: 100,
            checkpoint_out: PathBuf::from("checkpoints/best_model.bin"),
            metrics_out: None,
            backend: BackendKind::NdArray,
            model: GridDetectorConfig::default(),
            loss: YoloLossConfig::default(),
            scheduler: PlateauConfig::default(),
        }
    }
}

impl TrainConfig {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut cfg: TrainConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        cfg.expand_paths();
        Ok(cfg)
    }

    /// Defaults, then the TOML file from `--config` or `VOC_TRAIN_CONFIG`, then CLI flags.
    pub fn resolve(args: &TrainArgs) -> anyhow::Result<Self> {
        let file = args
            .config
            .clone()
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let mut cfg = match file {
            Some(path) => Self::from_path(&expand_path(&path.to_string_lossy()))?,
            None => Self::default(),
        };
        args.apply(&mut cfg);
        Ok(cfg)
    }

    pub fn grid(&self) -> GridSpec {
        GridSpec {
            grid_size: self.model.grid_size,
            num_classes: self.model.num_classes,
        }
    }

    /// Train and val point at the same images and labels.
    pub fn shared_split(&self) -> bool {
        self.train_image_dir == self.val_image_dir && self.train_label_dir == self.val_label_dir
    }

    fn expand_paths(&mut self) {
        for p in [
            &mut self.train_image_dir,
            &mut self.train_label_dir,
            &mut self.val_image_dir,
            &mut self.val_label_dir,
            &mut self.checkpoint_out,
        ] {
            *p = expand_path(&p.to_string_lossy());
        }
        if let Some(p) = self.metrics_out.as_mut() {
            *p = expand_path(&p.to_string_lossy());
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if self.image_size == 0 {
            anyhow::bail!("image_size must be at least 1");
        }
        if self.model.grid_size == 0 || self.model.num_classes == 0 {
            anyhow::bail!("model.grid_size and model.num_classes must be at least 1");
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            anyhow::bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        if !(0.0..1.0).contains(&self.val_ratio) {
            anyhow::bail!("val_ratio must be in [0, 1), got {}", self.val_ratio);
        }
        if self.val_ratio > 0.0 && !self.shared_split() {
            tracing::warn!("val_ratio is ignored because train and val use different folders");
        }
        if self.checkpoint_out.as_os_str().is_empty() {
            anyhow::bail!("checkpoint_out is empty");
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Default)]
#[command(name = "train", about = "Train the grid detector on PASCAL VOC (YOLO labels)")]
pub struct TrainArgs {
    /// TOML config file (falls back to $VOC_TRAIN_CONFIG).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Image folder for both splits unless --val-images is given.
    #[arg(long)]
    pub images: Option<PathBuf>,
    /// Label folder for both splits unless --val-labels is given.
    #[arg(long)]
    pub labels: Option<PathBuf>,
    #[arg(long)]
    pub val_images: Option<PathBuf>,
    #[arg(long)]
    pub val_labels: Option<PathBuf>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Initial learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    #[arg(long)]
    pub image_size: Option<u32>,
    #[arg(long)]
    pub num_workers: Option<usize>,
    #[arg(long)]
    pub val_ratio: Option<f32>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub log_every: Option<usize>,
    /// Disable training-time flip and color jitter.
    #[arg(long)]
    pub no_augment: bool,
    /// Checkpoint output path.
    #[arg(long)]
    pub checkpoint_out: Option<PathBuf>,
    /// Append per-epoch metrics as JSON lines.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(short, long)]
    pub verbose: bool,
}

impl TrainArgs {
    fn apply(&self, cfg: &mut TrainConfig) {
        if let Some(dir) = &self.images {
            cfg.train_image_dir = dir.clone();
            cfg.val_image_dir = dir.clone();
        }
        if let Some(dir) = &self.labels {
            cfg.train_label_dir = dir.clone();
            cfg.val_label_dir = dir.clone();
        }
        if let Some(dir) = &self.val_images {
            cfg.val_image_dir = dir.clone();
        }
        if let Some(dir) = &self.val_labels {
            cfg.val_label_dir = dir.clone();
        }
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = self.batch_size {
            cfg.batch_size = v;
        }
        if let Some(v) = self.lr {
            cfg.learning_rate = v;
        }
        if let Some(v) = self.image_size {
            cfg.image_size = v;
        }
        if let Some(v) = self.num_workers {
            cfg.num_workers = v;
        }
        if let Some(v) = self.val_ratio {
            cfg.val_ratio = v;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        if let Some(v) = self.log_every {
            cfg.log_every = v;
        }
        if self.no_augment {
            cfg.augment = false;
        }
        if let Some(p) = &self.checkpoint_out {
            cfg.checkpoint_out = p.clone();
        }
        if self.metrics_out.is_some() {
            cfg.metrics_out = self.metrics_out.clone();
        }
        if let Some(b) = self.backend {
            cfg.backend = b;
        }
    }
}

/// Expand `~` or a leading `~/` and `${VAR}` references.
///
/// `~user/...` and unknown variables are left as-is.
pub fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if raw == "~" || raw.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{}", &raw[1..]);
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let key = &rest[start + 2..start + 2 + len];
        match std::env::var(key) {
            Ok(val) => out.push_str(&val),
            Err(_) => out.push_str(&rest[start..start + 3 + len]),
        }
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    out
}
