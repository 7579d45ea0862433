//! Per-epoch JSONL metrics.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch number.
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
    /// Learning rate used for this epoch's updates.
    pub lr: f64,
    /// The checkpoint was rewritten this epoch.
    pub improved: bool,
    pub elapsed_secs: f64,
}

pub struct MetricsWriter {
    out: BufWriter<File>,
}

impl MetricsWriter {
    /// Truncates any previous run's file.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create metrics dir {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create metrics file {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub fn write(&mut self, record: &EpochRecord) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}
