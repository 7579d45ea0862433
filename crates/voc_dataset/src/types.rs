//! Core types, error definitions, and data structures for voc_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type VocResult<T> = Result<T, VocError>;

#[derive(Debug, Error)]
pub enum VocError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("label parse error at {path}:{line}: {msg}")]
    Label {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    #[error("no image found for label {label} (looked for {stem}.jpg/.jpeg/.png in {image_dir})")]
    MissingImage {
        label: PathBuf,
        stem: String,
        image_dir: PathBuf,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid loader configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Other(String),
}

/// The 20 PASCAL VOC object classes, indexed by YOLO class id.
pub const VOC_CLASSES: [&str; 20] = [
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

/// One ground-truth object in YOLO form: normalized center/size plus class id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YoloBox {
    pub class_id: usize,
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl YoloBox {
    /// Corner form `[x_min, y_min, x_max, y_max]`, clamped to the unit square.
    pub fn to_xyxy(&self) -> [f32; 4] {
        [
            (self.cx - self.w * 0.5).clamp(0.0, 1.0),
            (self.cy - self.h * 0.5).clamp(0.0, 1.0),
            (self.cx + self.w * 0.5).clamp(0.0, 1.0),
            (self.cy + self.h * 0.5).clamp(0.0, 1.0),
        ]
    }

    pub fn from_xyxy(class_id: usize, b: [f32; 4]) -> Self {
        Self {
            class_id,
            cx: (b[0] + b[2]) * 0.5,
            cy: (b[1] + b[3]) * 0.5,
            w: (b[2] - b[0]).max(0.0),
            h: (b[3] - b[1]).max(0.0),
        }
    }
}

/// Indexed (not yet decoded) sample: image path and its parsed labels.
#[derive(Debug, Clone)]
pub struct VocSample {
    pub stem: String,
    pub image: PathBuf,
    pub label: PathBuf,
    pub boxes: Vec<YoloBox>,
}

/// Decoded, transformed sample ready for batching.
#[derive(Debug, Clone)]
pub struct DecodedSample {
    /// Image in CHW layout, normalized.
    pub image_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<YoloBox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Stretch to fill the target dimensions.
    Force,
    /// Preserve aspect ratio; pad to target with zeros.
    Letterbox,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub images: usize,
    pub boxes: usize,
    pub empty: usize,
    /// Box count per class id.
    pub per_class: Vec<usize>,
}

impl DatasetSummary {
    pub fn from_samples(samples: &[VocSample], num_classes: usize) -> Self {
        let mut summary = DatasetSummary {
            per_class: vec![0; num_classes],
            ..Default::default()
        };
        for sample in samples {
            summary.images += 1;
            summary.boxes += sample.boxes.len();
            if sample.boxes.is_empty() {
                summary.empty += 1;
            }
            for b in &sample.boxes {
                if let Some(count) = summary.per_class.get_mut(b.class_id) {
                    *count += 1;
                }
            }
        }
        summary
    }

    /// Class name for an id when the dataset uses the VOC label set.
    pub fn class_name(class_id: usize) -> Option<&'static str> {
        VOC_CLASSES.get(class_id).copied()
    }
}
