mod common;

use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use models::{DetectionCriterion, GridDetector, GridDetectorConfig, YoloLoss};
use training::{train_one_epoch, validate};
use voc_dataset::{GridSpec, LoaderConfig, TransformPipelineBuilder, VocDataset};

type B = NdArray<f32>;
type AD = Autodiff<B>;

fn dataset(root: &std::path::Path, count: usize, batch_size: usize) -> anyhow::Result<VocDataset> {
    let (images, labels) = common::write_dataset(root, count)?;
    let grid = GridSpec {
        grid_size: 2,
        num_classes: 3,
    };
    let pipeline = TransformPipelineBuilder::new().target_size((16, 16)).build();
    let loader = LoaderConfig {
        batch_size,
        shuffle: false,
        seed: Some(3),
        num_workers: 0,
        drop_last: false,
    };
    Ok(VocDataset::open(&images, &labels, grid, pipeline, loader)?)
}

fn probe(model: &GridDetector<B>) -> Vec<f32> {
    let input = Tensor::<B, 4>::ones([1, 3, 16, 16], &Default::default());
    model.forward(input).into_data().to_vec::<f32>().unwrap()
}

#[test]
fn training_epoch_updates_parameters_and_reports_mean_loss() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), 5, 2)?;
    let device = Default::default();
    let model = GridDetector::<AD>::new(common::tiny_model(), &device);
    let before = probe(&model.valid());

    let mut optim = AdamConfig::new().init();
    let mut batches = ds.iter(0);
    let (model, mean) = train_one_epoch(
        model,
        &mut batches,
        &YoloLoss::default(),
        &mut optim,
        1e-2,
        &device,
        1,
    )?;
    assert!(mean.is_finite() && mean > 0.0, "mean loss {mean}");
    assert_eq!(batches.processed_samples(), 5);
    assert_ne!(before, probe(&model.valid()));
    Ok(())
}

#[test]
fn validation_is_the_mean_of_batch_losses() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), 5, 2)?;
    let device = Default::default();
    let model = GridDetector::<B>::new(common::tiny_model(), &device);
    let criterion = YoloLoss::default();

    let mut per_batch = Vec::new();
    let mut iter = ds.iter(0);
    while let Some(batch) = iter.next_batch::<B>(&device)? {
        let loss = criterion.loss(model.forward(batch.images), batch.targets);
        per_batch.push(loss.into_data().to_vec::<f32>().unwrap()[0]);
    }
    assert_eq!(per_batch.len(), 3);
    let expected = per_batch.iter().sum::<f32>() / per_batch.len() as f32;

    let got = validate(&model, &mut ds.iter(0), &criterion, &device)?;
    assert!((got - expected).abs() < 1e-4, "{got} vs {expected}");
    Ok(())
}

#[test]
fn validation_leaves_the_model_untouched() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), 4, 2)?;
    let device = Default::default();
    let model = GridDetector::<AD>::new(common::tiny_model(), &device);
    let criterion = YoloLoss::default();

    let before = probe(&model.valid());
    let first = validate(&model.valid(), &mut ds.iter(0), &criterion, &device)?;
    let second = validate(&model.valid(), &mut ds.iter(1), &criterion, &device)?;
    assert_eq!(first, second);
    assert_eq!(before, probe(&model.valid()));
    Ok(())
}

#[test]
fn empty_loader_is_an_error() -> anyhow::Result<()> {
    let ds = VocDataset::from_samples(
        Vec::new(),
        GridSpec {
            grid_size: 2,
            num_classes: 3,
        },
        TransformPipelineBuilder::new().target_size((16, 16)).build(),
        LoaderConfig {
            num_workers: 0,
            ..Default::default()
        },
    )?;
    let device = Default::default();
    let model = GridDetector::<AD>::new(common::tiny_model(), &device);
    let mut optim = AdamConfig::new().init();
    let err = train_one_epoch(
        model.clone(),
        &mut ds.iter(0),
        &YoloLoss::default(),
        &mut optim,
        1e-3,
        &device,
        100,
    )
    .unwrap_err();
    assert!(err.to_string().contains("no batches"));

    let err = validate(&model.valid(), &mut ds.iter(0), &YoloLoss::default(), &device).unwrap_err();
    assert!(err.to_string().contains("no batches"));
    Ok(())
}

#[test]
fn grid_mismatch_is_reported_before_the_loss() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let ds = dataset(tmp.path(), 2, 2)?;
    let device = Default::default();
    let model = GridDetector::<B>::new(
        GridDetectorConfig {
            grid_size: 3,
            ..common::tiny_model()
        },
        &device,
    );
    let err = validate(&model, &mut ds.iter(0), &YoloLoss::default(), &device).unwrap_err();
    assert!(err.to_string().contains("does not match"));
    Ok(())
}
