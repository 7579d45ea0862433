//! Epoch-level training and validation passes.

use anyhow::{anyhow, bail, Context};
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use models::{DetectionCriterion, DetectionModel};
use voc_dataset::BatchIter;

/// Running arithmetic mean of per-batch losses.
#[derive(Debug, Default, Clone, Copy)]
pub struct LossMeter {
    sum: f64,
    count: usize,
}

impl LossMeter {
    pub fn push(&mut self, loss: f32) {
        self.sum += loss as f64;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// `None` until at least one batch was recorded.
    pub fn mean(&self) -> Option<f32> {
        (self.count > 0).then(|| (self.sum / self.count as f64) as f32)
    }
}

fn ensure_same_shape<B: Backend>(preds: &Tensor<B, 4>, targets: &Tensor<B, 4>) -> anyhow::Result<()> {
    let (p, t) = (preds.dims(), targets.dims());
    if p != t {
        bail!(
            "prediction shape {p:?} does not match target shape {t:?}; model and dataset disagree on grid_size/num_classes"
        );
    }
    Ok(())
}

/// Progress message for batch `idx`, emitted on 0, `every`, `2 * every`, ...
pub(crate) fn progress_line(idx: usize, total: usize, loss: f32, every: usize) -> Option<String> {
    (every > 0 && idx % every == 0).then(|| format!("Batch {idx}/{total}, Loss: {loss:.4}"))
}

fn loss_value<B: Backend>(loss: Tensor<B, 1>) -> anyhow::Result<f32> {
    loss.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("failed to read loss value: {e:?}"))?
        .first()
        .copied()
        .ok_or_else(|| anyhow!("loss tensor is empty"))
}

/// One pass over `batches`: forward, loss, backward, optimizer step.
///
/// Consumes the model and returns the updated one with the mean batch loss.
/// Progress is logged on batch 0 and every `log_every` batches after it.
pub fn train_one_epoch<B, M, L, O>(
    mut model: M,
    batches: &mut BatchIter,
    criterion: &L,
    optim: &mut O,
    lr: f64,
    device: &B::Device,
    log_every: usize,
) -> anyhow::Result<(M, f32)>
where
    B: AutodiffBackend,
    M: DetectionModel<B> + AutodiffModule<B>,
    L: DetectionCriterion<B>,
    O: Optimizer<M, B>,
{
    let total = batches.num_batches();
    let mut meter = LossMeter::default();
    while let Some(batch) = batches
        .next_batch::<B>(device)
        .context("failed to load training batch")?
    {
        let batch_idx = meter.count();
        let preds = model.forward(batch.images);
        ensure_same_shape(&preds, &batch.targets)?;
        let loss = criterion.loss(preds, batch.targets);
        let value = loss_value(loss.clone().detach())?;

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(lr, model, grads);

        if let Some(line) = progress_line(batch_idx, total, value, log_every) {
            tracing::info!("{line}");
        }
        meter.push(value);
    }
    let mean = meter
        .mean()
        .ok_or_else(|| anyhow!("training loader yielded no batches"))?;
    Ok((model, mean))
}

/// Mean loss over `batches` without gradient tracking.
///
/// Pass `model.valid()` of the autodiff model: the inner backend records no
/// graph and the shared borrow rules out parameter updates.
pub fn validate<B, M, L>(
    model: &M,
    batches: &mut BatchIter,
    criterion: &L,
    device: &B::Device,
) -> anyhow::Result<f32>
where
    B: Backend,
    M: DetectionModel<B>,
    L: DetectionCriterion<B>,
{
    let mut meter = LossMeter::default();
    while let Some(batch) = batches
        .next_batch::<B>(device)
        .context("failed to load validation batch")?
    {
        let preds = model.forward(batch.images);
        ensure_same_shape(&preds, &batch.targets)?;
        meter.push(loss_value(criterion.loss(preds, batch.targets))?);
    }
    tracing::debug!(batches = meter.count(), "validation pass complete");
    meter
        .mean()
        .ok_or_else(|| anyhow!("validation loader yielded no batches"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    #[test]
    fn meter_is_the_arithmetic_mean() {
        let mut meter = LossMeter::default();
        assert_eq!(meter.mean(), None);
        for v in [1.0, 2.0, 6.0] {
            meter.push(v);
        }
        assert_eq!(meter.count(), 3);
        assert!((meter.mean().unwrap() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn progress_is_logged_every_hundred_batches() {
        let logged: Vec<usize> = (0..=250)
            .filter(|idx| progress_line(*idx, 313, 0.5, 100).is_some())
            .collect();
        assert_eq!(logged, vec![0, 100, 200]);
        assert_eq!(progress_line(99, 313, 0.5, 100), None);
        assert_eq!(
            progress_line(100, 313, 1.23456, 100).as_deref(),
            Some("Batch 100/313, Loss: 1.2346")
        );
        assert_eq!(
            progress_line(0, 2, 0.0, 100).as_deref(),
            Some("Batch 0/2, Loss: 0.0000")
        );
    }

    #[test]
    fn zero_interval_disables_progress() {
        assert_eq!(progress_line(0, 10, 1.0, 0), None);
        assert_eq!(progress_line(5, 10, 1.0, 0), None);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let device = Default::default();
        let preds = Tensor::<NdArray<f32>, 4>::zeros([1, 25, 7, 7], &device);
        let targets = Tensor::<NdArray<f32>, 4>::zeros([1, 25, 4, 4], &device);
        let err = ensure_same_shape(&preds, &targets).unwrap_err();
        assert!(err.to_string().contains("grid_size"));
        assert!(ensure_same_shape(&preds, &preds.clone()).is_ok());
    }

    #[test]
    fn loss_value_reads_scalar() {
        let device = Default::default();
        let t = Tensor::<NdArray<f32>, 1>::from_floats([2.5], &device);
        assert_eq!(loss_value(t).unwrap(), 2.5);
    }
}
