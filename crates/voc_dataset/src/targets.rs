//! Grid target encoding for the YOLO-style detector.
//!
//! Channel layout per cell, channels-first `[5 + C, S, S]`:
//! - `0`: objectness (1.0 when a box is assigned to the cell)
//! - `1..3`: box center offset within the cell (x, y in 0..1)
//! - `3..5`: box width/height relative to the whole image
//! - `5..5+C`: one-hot class

use crate::types::YoloBox;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    pub grid_size: usize,
    pub num_classes: usize,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            grid_size: 7,
            num_classes: crate::types::VOC_CLASSES.len(),
        }
    }
}

impl GridSpec {
    pub fn channels(&self) -> usize {
        5 + self.num_classes
    }

    /// Number of `f32` values one encoded sample occupies.
    pub fn len(&self) -> usize {
        self.channels() * self.grid_size * self.grid_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode boxes into a flat CHW target buffer.
    ///
    /// A box lands in the cell holding its center; when two boxes share a
    /// cell the first one keeps it.
    pub fn encode(&self, boxes: &[YoloBox]) -> Vec<f32> {
        let s = self.grid_size;
        let plane = s * s;
        let mut out = vec![0.0f32; self.len()];
        if s == 0 {
            return out;
        }
        for b in boxes {
            if b.class_id >= self.num_classes {
                continue;
            }
            let gx = ((b.cx * s as f32) as usize).min(s - 1);
            let gy = ((b.cy * s as f32) as usize).min(s - 1);
            let cell = gy * s + gx;
            if out[cell] > 0.0 {
                continue;
            }
            out[cell] = 1.0;
            out[plane + cell] = (b.cx * s as f32 - gx as f32).clamp(0.0, 1.0);
            out[2 * plane + cell] = (b.cy * s as f32 - gy as f32).clamp(0.0, 1.0);
            out[3 * plane + cell] = b.w;
            out[4 * plane + cell] = b.h;
            out[(5 + b.class_id) * plane + cell] = 1.0;
        }
        out
    }
}
