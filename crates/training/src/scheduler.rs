//! Reduce-on-plateau learning rate control driven by validation loss.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateauMode {
    /// Lower metric is better (losses).
    #[default]
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    #[default]
    Rel,
    Abs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    pub mode: PlateauMode,
    /// Multiplier applied to the learning rate on a plateau.
    pub factor: f64,
    /// Bad epochs tolerated before reducing.
    pub patience: usize,
    pub threshold: f64,
    pub threshold_mode: ThresholdMode,
    /// Epochs to wait after a reduction before counting bad epochs again.
    pub cooldown: usize,
    pub min_lr: f64,
    /// Reductions smaller than this are ignored.
    pub eps: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            mode: PlateauMode::Min,
            factor: 0.1,
            patience: 5,
            threshold: 1e-4,
            threshold_mode: ThresholdMode::Rel,
            cooldown: 0,
            min_lr: 0.0,
            eps: 1e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    cfg: PlateauConfig,
    lr: f64,
    best: f64,
    num_bad_epochs: usize,
    cooldown_counter: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(cfg: PlateauConfig, initial_lr: f64) -> anyhow::Result<Self> {
        if !(cfg.factor > 0.0 && cfg.factor < 1.0) {
            anyhow::bail!("scheduler factor must be in (0, 1), got {}", cfg.factor);
        }
        if !(initial_lr.is_finite() && initial_lr > 0.0) {
            anyhow::bail!("learning rate must be positive, got {initial_lr}");
        }
        let best = match cfg.mode {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        };
        Ok(Self {
            cfg,
            lr: initial_lr,
            best,
            num_bad_epochs: 0,
            cooldown_counter: 0,
        })
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn num_bad_epochs(&self) -> usize {
        self.num_bad_epochs
    }

    fn is_better(&self, current: f64) -> bool {
        let t = self.cfg.threshold;
        match (self.cfg.mode, self.cfg.threshold_mode) {
            (PlateauMode::Min, ThresholdMode::Rel) => current < self.best * (1.0 - t),
            (PlateauMode::Min, ThresholdMode::Abs) => current < self.best - t,
            (PlateauMode::Max, ThresholdMode::Rel) => current > self.best * (1.0 + t),
            (PlateauMode::Max, ThresholdMode::Abs) => current > self.best + t,
        }
    }

    /// Feed one epoch's metric. Returns the new learning rate if it was reduced.
    pub fn step(&mut self, metric: f64) -> Option<f64> {
        if self.is_better(metric) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs <= self.cfg.patience {
            return None;
        }
        self.cooldown_counter = self.cfg.cooldown;
        self.num_bad_epochs = 0;

        let new_lr = (self.lr * self.cfg.factor).max(self.cfg.min_lr);
        if self.lr - new_lr > self.cfg.eps {
            self.lr = new_lr;
            Some(new_lr)
        } else {
            None
        }
    }
}
