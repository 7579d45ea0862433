use anyhow::Context;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use models::{GridDetector, GridDetectorConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Tracks the lowest validation loss seen so far.
#[derive(Debug, Clone, Copy)]
pub struct BestModelTracker {
    best: f32,
}

impl Default for BestModelTracker {
    fn default() -> Self {
        Self {
            best: f32::INFINITY,
        }
    }
}

impl BestModelTracker {
    /// True iff `loss` is strictly below every loss observed before.
    pub fn observe(&mut self, loss: f32) -> bool {
        if loss < self.best {
            self.best = loss;
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> Option<f32> {
        self.best.is_finite().then_some(self.best)
    }
}

/// Path the recorder actually writes (`.bin` extension enforced).
pub fn checkpoint_file(path: &Path) -> PathBuf {
    path.with_extension("bin")
}

pub fn save_checkpoint<B: Backend, M: Module<B>>(model: &M, path: &Path) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create checkpoint dir {}", parent.display()))?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint {}: {e}", path.display()))?;
    Ok(checkpoint_file(path))
}

pub fn load_grid_detector_from_checkpoint<B: Backend>(
    path: &Path,
    cfg: GridDetectorConfig,
    device: &B::Device,
) -> anyhow::Result<GridDetector<B>> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    GridDetector::<B>::new(cfg, device)
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_strict_improvements_count() {
        let mut tracker = BestModelTracker::default();
        assert_eq!(tracker.best(), None);
        assert!(tracker.observe(3.0));
        assert!(!tracker.observe(3.0));
        assert!(!tracker.observe(4.0));
        assert!(tracker.observe(2.5));
        assert!(!tracker.observe(f32::NAN));
        assert_eq!(tracker.best(), Some(2.5));
    }

    #[test]
    fn nan_before_any_finite_loss_is_not_an_improvement() {
        let mut tracker = BestModelTracker::default();
        assert!(!tracker.observe(f32::NAN));
        assert!(tracker.observe(10.0));
    }

    #[test]
    fn checkpoint_file_uses_bin_extension() {
        assert_eq!(
            checkpoint_file(Path::new("checkpoints/best_model.bin")),
            PathBuf::from("checkpoints/best_model.bin")
        );
        assert_eq!(
            checkpoint_file(Path::new("out/best_model.pth")),
            PathBuf::from("out/best_model.bin")
        );
    }

    #[test]
    fn saved_detector_loads_back() -> anyhow::Result<()> {
        type B = burn_ndarray::NdArray<f32>;
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("nested/best_model.bin");
        let cfg = GridDetectorConfig {
            grid_size: 2,
            num_classes: 3,
            base_channels: 2,
            stages: 1,
        };
        let device = Default::default();
        let model = GridDetector::<B>::new(cfg, &device);
        let written = save_checkpoint::<B, _>(&model, &path)?;
        assert!(written.exists());
        let loaded = load_grid_detector_from_checkpoint::<B>(&path, cfg, &device)?;
        let input = burn::tensor::Tensor::<B, 4>::ones([1, 3, 8, 8], &device);
        let a = model.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let b = loaded.forward(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
        Ok(())
    }
}
