//! YOLO-v1 style loss over grid predictions.

use burn::tensor::activation::{log_softmax, sigmoid};
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};
use std::ops::Range;

const EPS: f32 = 1e-6;

/// Scalar loss between grid predictions and encoded targets of the same shape.
pub trait DetectionCriterion<B: Backend> {
    fn loss(&self, predictions: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoloLossConfig {
    /// Weight on the box regression terms.
    pub lambda_coord: f32,
    /// Weight on objectness for cells without an object.
    pub lambda_noobj: f32,
}

impl Default for YoloLossConfig {
    fn default() -> Self {
        Self {
            lambda_coord: 5.0,
            lambda_noobj: 0.5,
        }
    }
}

impl YoloLossConfig {
    pub fn init(&self) -> YoloLoss {
        YoloLoss {
            lambda_coord: self.lambda_coord,
            lambda_noobj: self.lambda_noobj,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct YoloLoss {
    lambda_coord: f32,
    lambda_noobj: f32,
}

impl Default for YoloLoss {
    fn default() -> Self {
        YoloLossConfig::default().init()
    }
}

fn channels<B: Backend>(t: &Tensor<B, 4>, range: Range<usize>) -> Tensor<B, 4> {
    let [n, _, h, w] = t.dims();
    t.clone().slice([0..n, range, 0..h, 0..w])
}

impl<B: Backend> DetectionCriterion<B> for YoloLoss {
    /// Summed over cells and averaged over the batch.
    ///
    /// Objectness uses BCE on the sigmoid logit, centers use squared error on
    /// sigmoid offsets, sizes use squared error on square roots, and classes
    /// use cross-entropy against the one-hot target. Box and class terms only
    /// count where the target cell holds an object.
    fn loss(&self, predictions: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        let [n, c, _, _] = predictions.dims();

        let obj_mask = channels(&targets, 0..1);
        let noobj_mask = obj_mask.clone().neg().add_scalar(1.0);
        let obj_prob = sigmoid(channels(&predictions, 0..1)).clamp(EPS, 1.0 - EPS);
        let obj_loss = (obj_mask.clone() * obj_prob.clone().log()).sum().neg();
        let noobj_loss = (noobj_mask * obj_prob.neg().add_scalar(1.0).log())
            .sum()
            .neg();

        let box_mask = Tensor::cat(vec![obj_mask.clone(), obj_mask.clone()], 1);
        let xy_loss = ((sigmoid(channels(&predictions, 1..3)) - channels(&targets, 1..3))
            .powf_scalar(2.0)
            * box_mask.clone())
        .sum();
        let pred_wh = sigmoid(channels(&predictions, 3..5)).add_scalar(EPS).sqrt();
        let target_wh = channels(&targets, 3..5).add_scalar(EPS).sqrt();
        let wh_loss = ((pred_wh - target_wh).powf_scalar(2.0) * box_mask).sum();

        let log_probs = log_softmax(channels(&predictions, 5..c), 1);
        let class_loss = ((channels(&targets, 5..c) * log_probs).sum_dim(1) * obj_mask)
            .sum()
            .neg();

        let total = (xy_loss + wh_loss).mul_scalar(self.lambda_coord)
            + obj_loss
            + noobj_loss.mul_scalar(self.lambda_noobj)
            + class_loss;
        total.div_scalar(n.max(1) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn grid(values: Vec<f32>) -> Tensor<TestBackend, 4> {
        let len = values.len();
        Tensor::from_data(TensorData::new(values, [1, len, 1, 1]), &Default::default())
    }

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_data().to_vec::<f32>().unwrap()[0]
    }

    // One cell, two classes: object of class 1 centered in the cell.
    fn target() -> Tensor<TestBackend, 4> {
        grid(vec![1.0, 0.5, 0.5, 0.25, 0.25, 0.0, 1.0])
    }

    #[test]
    fn matching_prediction_is_near_zero() {
        let logit_quarter = (0.25f32 / 0.75).ln();
        let preds = grid(vec![10.0, 0.0, 0.0, logit_quarter, logit_quarter, -10.0, 10.0]);
        let loss = scalar(YoloLoss::default().loss(preds, target()));
        assert!(loss >= 0.0);
        assert!(loss < 1e-3, "loss was {loss}");
    }

    #[test]
    fn wrong_prediction_costs_more() {
        let preds = grid(vec![-10.0, 3.0, 3.0, 3.0, 3.0, 10.0, -10.0]);
        let loss = scalar(YoloLoss::default().loss(preds, target()));
        assert!(loss.is_finite());
        assert!(loss > 1.0, "loss was {loss}");
    }

    #[test]
    fn empty_cells_only_pay_noobj() {
        let empty = grid(vec![0.0; 7]);
        let confident = scalar(YoloLoss::default().loss(grid(vec![10.0; 7]), empty.clone()));
        let quiet = scalar(YoloLoss::default().loss(grid(vec![-10.0; 7]), empty));
        assert!(quiet < 1e-3);
        // 0.5 * -ln(1 - sigmoid(10)) ~= 5.0
        assert!((confident - 5.0).abs() < 0.05, "loss was {confident}");
    }

    #[test]
    fn batch_loss_is_averaged() {
        let device = Default::default();
        let preds = Tensor::<TestBackend, 4>::zeros([4, 7, 2, 2], &device);
        let targets = Tensor::<TestBackend, 4>::zeros([4, 7, 2, 2], &device);
        let single = scalar(YoloLoss::default().loss(preds.clone().slice([0..1]), targets.clone().slice([0..1])));
        let batch = scalar(YoloLoss::default().loss(preds, targets));
        assert!((single - batch).abs() < 1e-4);
    }
}
