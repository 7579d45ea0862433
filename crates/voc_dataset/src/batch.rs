//! Batch iteration for training and validation.

use crate::aug::TransformPipeline;
use crate::targets::GridSpec;
use crate::types::{DecodedSample, VocError, VocResult, VocSample};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One batch on device: images `[N, 3, H, W]` and grid targets `[N, 5 + C, S, S]`.
#[derive(Debug, Clone)]
pub struct DetectionBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 4>,
}

impl<B: Backend> DetectionBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Shuffle samples at the start of every epoch.
    pub shuffle: bool,
    /// Seed for reproducible shuffling; mixed with the epoch number.
    pub seed: Option<u64>,
    /// Image decode threads; 0 decodes on the calling thread.
    pub num_workers: usize,
    /// Drop the last partial batch.
    pub drop_last: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            shuffle: true,
            seed: None,
            num_workers: 4,
            drop_last: false,
        }
    }
}

impl LoaderConfig {
    pub fn num_batches(&self, samples: usize) -> usize {
        let batch_size = self.batch_size.max(1);
        if self.drop_last {
            samples / batch_size
        } else {
            samples.div_ceil(batch_size)
        }
    }
}

/// Decode pool shared by every epoch's iterator.
pub(crate) fn build_pool(num_workers: usize) -> VocResult<Option<Arc<rayon::ThreadPool>>> {
    if num_workers == 0 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .thread_name(|i| format!("voc-decode-{i}"))
        .build()
        .map(|pool| Some(Arc::new(pool)))
        .map_err(|e| VocError::Config(format!("failed to build decode pool: {e}")))
}

fn load_sample(
    sample: &VocSample,
    pipeline: &TransformPipeline,
    sample_key: u64,
) -> VocResult<DecodedSample> {
    let img = image::open(&sample.image)
        .map_err(|e| VocError::Image {
            path: sample.image.clone(),
            source: e,
        })?
        .to_rgb8();
    pipeline.apply(img, &sample.boxes, sample_key)
}

pub struct BatchIter {
    samples: Arc<Vec<VocSample>>,
    order: Vec<usize>,
    cursor: usize,
    epoch: u64,
    cfg: LoaderConfig,
    grid: GridSpec,
    pipeline: TransformPipeline,
    pool: Option<Arc<rayon::ThreadPool>>,
    processed_batches: usize,
    processed_samples: usize,
    total_load_time: Duration,
}

impl BatchIter {
    pub(crate) fn new(
        samples: Arc<Vec<VocSample>>,
        cfg: LoaderConfig,
        grid: GridSpec,
        pipeline: TransformPipeline,
        pool: Option<Arc<rayon::ThreadPool>>,
        epoch: u64,
    ) -> Self {
        let mut order: Vec<usize> = (0..samples.len()).collect();
        if cfg.shuffle {
            let mut rng = match cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(epoch)),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        Self {
            samples,
            order,
            cursor: 0,
            epoch,
            cfg,
            grid,
            pipeline,
            pool,
            processed_batches: 0,
            processed_samples: 0,
            total_load_time: Duration::ZERO,
        }
    }

    /// Batches this iterator yields over a full pass.
    pub fn num_batches(&self) -> usize {
        self.cfg.num_batches(self.order.len())
    }

    pub fn processed_samples(&self) -> usize {
        self.processed_samples
    }

    fn decode(&self, positions: &[usize]) -> Vec<VocResult<DecodedSample>> {
        let key_base = self.epoch << 32;
        let job = |pos: &usize| {
            let idx = self.order[*pos];
            load_sample(&self.samples[idx], &self.pipeline, key_base ^ idx as u64)
        };
        match &self.pool {
            Some(pool) => pool.install(|| positions.par_iter().map(job).collect()),
            None => positions.iter().map(job).collect(),
        }
    }

    /// Next batch on `device`, or `None` once the pass is complete.
    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> VocResult<Option<DetectionBatch<B>>> {
        let batch_size = self.cfg.batch_size.max(1);
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + batch_size).min(self.order.len());
        if self.cfg.drop_last && end - self.cursor < batch_size {
            self.cursor = self.order.len();
            return Ok(None);
        }
        let positions: Vec<usize> = (self.cursor..end).collect();
        self.cursor = end;

        let t_load = Instant::now();
        let decoded = self.decode(&positions);
        self.total_load_time += t_load.elapsed();

        let mut images_buf: Vec<f32> = Vec::new();
        let mut targets_buf: Vec<f32> = Vec::with_capacity(positions.len() * self.grid.len());
        let mut expected_size: Option<(u32, u32)> = None;
        for (pos, res) in positions.iter().zip(decoded) {
            let sample = res?;
            let size = (sample.width, sample.height);
            match expected_size {
                None => expected_size = Some(size),
                Some(sz) if sz != size => {
                    let idx = self.order[*pos];
                    return Err(VocError::Other(format!(
                        "batch contains varying image sizes: {} is {}x{}, expected {}x{}",
                        self.samples[idx].image.display(),
                        size.0,
                        size.1,
                        sz.0,
                        sz.1
                    )));
                }
                _ => {}
            }
            images_buf.extend_from_slice(&sample.image_chw);
            targets_buf.extend_from_slice(&self.grid.encode(&sample.boxes));
        }

        let Some((width, height)) = expected_size else {
            return Ok(None);
        };
        let batch_len = positions.len();
        let s = self.grid.grid_size;
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images_buf, [batch_len, 3, height as usize, width as usize]),
            device,
        );
        let targets = Tensor::<B, 4>::from_data(
            TensorData::new(targets_buf, [batch_len, self.grid.channels(), s, s]),
            device,
        );

        self.processed_batches += 1;
        self.processed_samples += batch_len;
        tracing::trace!(
            batch = self.processed_batches,
            samples = batch_len,
            avg_load_ms = self.total_load_time.as_secs_f64() * 1000.0
                / self.processed_batches as f64,
            "assembled batch"
        );

        Ok(Some(DetectionBatch { images, targets }))
    }
}
