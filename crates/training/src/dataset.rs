use anyhow::Context;
use std::path::Path;
use voc_dataset::{
    index_dir, split_samples, DatasetSummary, LoaderConfig, TransformPipeline, VocDataset, VocSample,
};

use crate::config::TrainConfig;

/// Training and validation splits ready to iterate.
pub struct TrainData {
    pub train: VocDataset,
    pub val: VocDataset,
}

fn pipeline(cfg: &TrainConfig, train: bool) -> TransformPipeline {
    let base = TransformPipeline::for_split(train && cfg.augment, cfg.image_size);
    TransformPipeline {
        resize_mode: cfg.resize_mode,
        seed: cfg.seed,
        ..base
    }
}

fn loader(cfg: &TrainConfig, shuffle: bool) -> LoaderConfig {
    LoaderConfig {
        batch_size: cfg.batch_size,
        shuffle,
        seed: cfg.seed,
        num_workers: cfg.num_workers,
        drop_last: false,
    }
}

fn index(cfg: &TrainConfig, images: &Path, labels: &Path) -> anyhow::Result<Vec<VocSample>> {
    index_dir(images, labels, cfg.model.num_classes).with_context(|| {
        format!(
            "failed to index labels {} against images {}",
            labels.display(),
            images.display()
        )
    })
}

/// Index both splits; a shared folder with `val_ratio > 0` is split once.
pub fn build_datasets(cfg: &TrainConfig) -> anyhow::Result<TrainData> {
    let (train_samples, val_samples) = if cfg.shared_split() {
        let all = index(cfg, &cfg.train_image_dir, &cfg.train_label_dir)?;
        split_samples(all, cfg.val_ratio, cfg.seed)
    } else {
        (
            index(cfg, &cfg.train_image_dir, &cfg.train_label_dir)?,
            index(cfg, &cfg.val_image_dir, &cfg.val_label_dir)?,
        )
    };
    if train_samples.is_empty() {
        anyhow::bail!(
            "no training samples found under {}",
            cfg.train_label_dir.display()
        );
    }
    if val_samples.is_empty() {
        anyhow::bail!("no validation samples found under {}", cfg.val_label_dir.display());
    }

    let grid = cfg.grid();
    let train = VocDataset::from_samples(train_samples, grid, pipeline(cfg, true), loader(cfg, true))?;
    let val = VocDataset::from_samples(val_samples, grid, pipeline(cfg, false), loader(cfg, false))?;

    for (split, ds) in [("train", &train), ("val", &val)] {
        let summary = ds.summary();
        tracing::info!(
            split,
            images = summary.images,
            boxes = summary.boxes,
            empty = summary.empty,
            batches = ds.num_batches(),
            "dataset ready"
        );
        tracing::debug!(split, transforms = %ds.pipeline().describe());
        for (class_id, count) in summary.per_class.iter().enumerate().filter(|(_, c)| **c > 0) {
            let class = DatasetSummary::class_name(class_id).unwrap_or("unknown");
            tracing::debug!(split, class_id, class, count, "boxes per class");
        }
    }
    Ok(TrainData { train, val })
}
