//! Indexed VOC split plus the loader settings used to iterate it.

use crate::aug::TransformPipeline;
use crate::batch::{build_pool, BatchIter, LoaderConfig};
use crate::index::index_dir;
use crate::targets::GridSpec;
use crate::types::{DatasetSummary, VocError, VocResult, VocSample};
use std::path::Path;
use std::sync::Arc;

pub struct VocDataset {
    samples: Arc<Vec<VocSample>>,
    grid: GridSpec,
    pipeline: TransformPipeline,
    loader: LoaderConfig,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl VocDataset {
    /// Index `label_dir` against `image_dir` and prepare a loader for it.
    pub fn open(
        image_dir: &Path,
        label_dir: &Path,
        grid: GridSpec,
        pipeline: TransformPipeline,
        loader: LoaderConfig,
    ) -> VocResult<Self> {
        let samples = index_dir(image_dir, label_dir, grid.num_classes)?;
        Self::from_samples(samples, grid, pipeline, loader)
    }

    pub fn from_samples(
        samples: Vec<VocSample>,
        grid: GridSpec,
        pipeline: TransformPipeline,
        loader: LoaderConfig,
    ) -> VocResult<Self> {
        if loader.batch_size == 0 {
            return Err(VocError::Config("batch_size must be at least 1".into()));
        }
        if grid.grid_size == 0 {
            return Err(VocError::Config("grid_size must be at least 1".into()));
        }
        let pool = build_pool(loader.num_workers)?;
        Ok(Self {
            samples: Arc::new(samples),
            grid,
            pipeline,
            loader,
            pool,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    pub fn num_batches(&self) -> usize {
        self.loader.num_batches(self.samples.len())
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary::from_samples(&self.samples, self.grid.num_classes)
    }

    /// Fresh pass over the split; shuffled splits reshuffle per `epoch`.
    pub fn iter(&self, epoch: usize) -> BatchIter {
        BatchIter::new(
            Arc::clone(&self.samples),
            self.loader.clone(),
            self.grid,
            self.pipeline.clone(),
            self.pool.clone(),
            epoch as u64,
        )
    }
}
