use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use burn::tensor::backend::Backend;
use models::GridDetector;
use std::path::PathBuf;
use std::time::Instant;

use crate::checkpoint::{save_checkpoint, BestModelTracker};
use crate::config::{BackendKind, TrainConfig};
use crate::dataset::build_datasets;
use crate::engine::{train_one_epoch, validate};
use crate::metrics::{EpochRecord, MetricsWriter};
use crate::scheduler::ReduceLrOnPlateau;
use crate::TrainBackend;

type ADBackend = Autodiff<TrainBackend>;

/// Outcome of a full run.
#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub epochs: usize,
    pub best_val_loss: Option<f32>,
    pub final_lr: f64,
    /// Set once a checkpoint has been written.
    pub checkpoint: Option<PathBuf>,
    pub history: Vec<EpochRecord>,
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

/// Train for `cfg.epochs` epochs, validating after each one and keeping the
/// checkpoint of the lowest validation loss.
pub fn run_train(cfg: &TrainConfig) -> anyhow::Result<TrainSummary> {
    validate_backend_choice(cfg.backend)?;
    cfg.validate()?;

    let device = <ADBackend as Backend>::Device::default();
    let data = build_datasets(cfg)?;

    let mut model = GridDetector::<ADBackend>::new(cfg.model, &device);
    let criterion = cfg.loss.init();
    let mut optim = AdamConfig::new().init();
    let mut scheduler = ReduceLrOnPlateau::new(cfg.scheduler.clone(), cfg.learning_rate)?;
    let mut best = BestModelTracker::default();
    let mut metrics = cfg
        .metrics_out
        .as_deref()
        .map(MetricsWriter::create)
        .transpose()?;

    tracing::info!(
        epochs = cfg.epochs,
        batch_size = cfg.batch_size,
        lr = cfg.learning_rate,
        grid = cfg.model.grid_size,
        classes = cfg.model.num_classes,
        checkpoint = %cfg.checkpoint_out.display(),
        "starting training"
    );

    let mut checkpoint = None;
    let mut history = Vec::with_capacity(cfg.epochs);
    for epoch in 0..cfg.epochs {
        let started = Instant::now();
        let lr = scheduler.lr();
        tracing::info!("Epoch {}/{}", epoch + 1, cfg.epochs);

        let mut train_batches = data.train.iter(epoch);
        let (next, train_loss) = train_one_epoch(
            model,
            &mut train_batches,
            &criterion,
            &mut optim,
            lr,
            &device,
            cfg.log_every,
        )?;
        model = next;

        let mut val_batches = data.val.iter(epoch);
        let val_loss = validate(&model.valid(), &mut val_batches, &criterion, &device)?;
        tracing::info!("Train Loss: {train_loss:.4}, Val Loss: {val_loss:.4}");

        if let Some(new_lr) = scheduler.step(val_loss as f64) {
            tracing::info!(old_lr = lr, new_lr, "validation loss plateaued; reducing learning rate");
        }

        let improved = best.observe(val_loss);
        if improved {
            let path = save_checkpoint::<ADBackend, _>(&model, &cfg.checkpoint_out)?;
            tracing::info!(val_loss, path = %path.display(), "Saved best model");
            checkpoint = Some(path);
        }

        let record = EpochRecord {
            epoch: epoch + 1,
            train_loss,
            val_loss,
            lr,
            improved,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        if let Some(writer) = metrics.as_mut() {
            writer.write(&record)?;
        }
        history.push(record);
    }

    Ok(TrainSummary {
        epochs: cfg.epochs,
        best_val_loss: best.best(),
        final_lr: scheduler.lr(),
        checkpoint,
        history,
    })
}
