//! Huber (smooth L1) regression of box parameters on positive anchors.
//!
//! Used for three independently weighted targets:
//! - localization offsets `(dx, dy, dz)`, three channels per anchor
//! - box size `(dw, dl, dh)`, three channels per anchor
//! - yaw angle, one value per anchor
//!
//! Per element, with `x = prediction - target`:
//! ```text
//! L = 0.5 * x^2                   if |x| <= delta
//! L = delta * (|x| - 0.5 * delta) otherwise
//! ```

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::loss::{HuberLoss, HuberLossConfig},
    tensor::{backend::Backend, Tensor},
};

use crate::mask::{masked_mean, PositiveMask};

/// Configuration for creating a [box regression loss](BoxRegressionLoss).
#[derive(Config, Debug)]
pub struct BoxRegressionLossConfig {
    /// Weight factor applied to the reduced loss. Default: 1.0
    #[config(default = 1.0)]
    pub weight: f64,
    /// Transition point between the quadratic and linear regimes. Default: 1.0
    #[config(default = 1.0)]
    pub delta: f64,
}

impl BoxRegressionLossConfig {
    /// Initialize [box regression loss](BoxRegressionLoss).
    pub fn init(&self) -> BoxRegressionLoss {
        BoxRegressionLoss {
            weight: self.weight,
            huber: HuberLossConfig::new(self.delta as f32).init(),
        }
    }
}

/// Masked Huber loss over box regression targets.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct BoxRegressionLoss {
    /// Weight factor applied to the reduced loss.
    pub weight: f64,
    /// Element-wise Huber criterion.
    pub huber: HuberLoss,
}

impl Default for BoxRegressionLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for BoxRegressionLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("weight", &self.weight)
            .add("delta", &self.huber.delta)
            .optional()
    }
}

impl BoxRegressionLoss {
    /// Create a new regression loss with default configuration.
    pub fn new() -> Self {
        BoxRegressionLossConfig::new().init()
    }

    /// Weighted loss over per-anchor vectors, averaged over the channels of positive anchors.
    ///
    /// # Shapes
    ///
    /// - targets: `[batch, grid_h, grid_w, anchors, channels]`
    /// - predictions: `[batch, grid_h, grid_w, anchors, channels]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        targets: Tensor<B, 5>,
        predictions: Tensor<B, 5>,
        mask: &PositiveMask<B>,
    ) -> Tensor<B, 1> {
        let [b, h, w, a, channels] = targets.dims();
        mask.assert_grid(&[b, h, w, a], "regression");
        let loss = self.forward_no_reduction(targets, predictions);
        masked_mean(loss, mask.broadcast_channels(channels)).mul_scalar(self.weight)
    }

    /// Weighted loss over one scalar per anchor, averaged over positive anchors.
    ///
    /// # Shapes
    ///
    /// - targets: `[batch, grid_h, grid_w, anchors]`
    /// - predictions: `[batch, grid_h, grid_w, anchors]`
    /// - output: `[1]`
    pub fn forward_scalar<B: Backend>(
        &self,
        targets: Tensor<B, 4>,
        predictions: Tensor<B, 4>,
        mask: &PositiveMask<B>,
    ) -> Tensor<B, 1> {
        mask.assert_grid(&targets.dims(), "regression");
        let loss = self.forward_no_reduction(targets, predictions);
        masked_mean(loss, mask.tensor()).mul_scalar(self.weight)
    }

    /// Unweighted element-wise Huber loss.
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        targets: Tensor<B, D>,
        predictions: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let target_dims = targets.dims();
        let pred_dims = predictions.dims();
        assert_eq!(
            pred_dims, target_dims,
            "Shape of regression predictions ({pred_dims:?}) must match targets ({target_dims:?})"
        );

        self.huber.forward_no_reduction(predictions, targets)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{cast::ToElement, TensorData, Tolerance};

    use super::*;
    use crate::tests::{TestBackend, FT};

    fn single_positive_mask() -> PositiveMask<TestBackend> {
        let device = Default::default();
        let occupancy =
            Tensor::<TestBackend, 4>::from_data(TensorData::from([[[[1.0, 0.0]]]]), &device);
        PositiveMask::from_occupancy(&occupancy)
    }

    #[test]
    fn huber_switches_to_linear_beyond_delta() {
        let device = Default::default();
        let loss = BoxRegressionLoss::new();

        let targets = Tensor::<TestBackend, 1>::zeros([4], &device);
        let predictions =
            Tensor::<TestBackend, 1>::from_data(TensorData::from([0.5, -1.0, 2.0, -3.0]), &device);

        let result = loss.forward_no_reduction(targets, predictions);

        let expected = TensorData::from([0.125, 0.5, 1.5, 2.5]);
        result
            .into_data()
            .assert_approx_eq::<FT>(&expected, Tolerance::default());
    }

    #[test]
    fn localization_single_anchor_perfect_prediction_is_zero() {
        let device = Default::default();
        let loss = BoxRegressionLoss::new();

        let occupancy =
            Tensor::<TestBackend, 4>::from_data(TensorData::from([[[[1.0]]]]), &device);
        let mask = PositiveMask::from_occupancy(&occupancy);
        let targets = Tensor::<TestBackend, 5>::zeros([1, 1, 1, 1, 3], &device);
        let predictions = Tensor::<TestBackend, 5>::zeros([1, 1, 1, 1, 3], &device);

        let result = loss.forward(targets, predictions, &mask);

        result
            .into_data()
            .assert_approx_eq::<FT>(&TensorData::from([0.0]), Tolerance::default());
    }

    #[test]
    fn localization_ignores_unmasked_anchors() {
        let device = Default::default();
        let loss = BoxRegressionLoss::new();
        let mask = single_positive_mask();

        let targets = Tensor::<TestBackend, 5>::from_data(
            TensorData::from([[[[[0.1, 0.2, 0.3], [0.0, 0.0, 0.0]]]]]),
            &device,
        );
        let moderate = Tensor::<TestBackend, 5>::from_data(
            TensorData::from([[[[[0.6, 0.2, -0.2], [0.5, 0.5, 0.5]]]]]),
            &device,
        );
        let extreme = Tensor::<TestBackend, 5>::from_data(
            TensorData::from([[[[[0.6, 0.2, -0.2], [1e30, -1e30, f32::INFINITY]]]]]),
            &device,
        );

        let moderate_loss = loss.forward(targets.clone(), moderate, &mask);
        let extreme_loss = loss.forward(targets, extreme, &mask);

        // Channels: 0.5 * 0.25, 0, 0.5 * 0.25 -> mean over three masked elements
        let expected = TensorData::from([0.25 / 3.0]);
        moderate_loss
            .into_data()
            .assert_approx_eq::<FT>(&expected, Tolerance::default());
        extreme_loss
            .into_data()
            .assert_approx_eq::<FT>(&expected, Tolerance::default());
    }

    #[test]
    fn weight_scales_result_linearly() {
        let device = Default::default();
        let mask = single_positive_mask();
        let base = BoxRegressionLoss::new();
        let scaled = BoxRegressionLossConfig::new().with_weight(4.0).init();

        let targets = Tensor::<TestBackend, 5>::zeros([1, 1, 1, 2, 3], &device);
        let predictions = Tensor::<TestBackend, 5>::from_data(
            TensorData::from([[[[[1.5, -0.3, 0.7], [2.0, 2.0, 2.0]]]]]),
            &device,
        );

        let base_value = base
            .forward(targets.clone(), predictions.clone(), &mask)
            .into_scalar()
            .to_f64();
        let scaled_value = scaled
            .forward(targets, predictions, &mask)
            .into_scalar()
            .to_f64();

        assert!((4.0f64.mul_add(base_value, -scaled_value)).abs() < 1e-5);
    }

    #[test]
    fn angle_uses_unbroadcast_mask() {
        let device = Default::default();
        let loss = BoxRegressionLossConfig::new().with_weight(2.0).init();
        let mask = single_positive_mask();

        let targets =
            Tensor::<TestBackend, 4>::from_data(TensorData::from([[[[0.0, 0.0]]]]), &device);
        let predictions =
            Tensor::<TestBackend, 4>::from_data(TensorData::from([[[[3.0, 100.0]]]]), &device);

        let result = loss.forward_scalar(targets, predictions, &mask);

        // Linear regime: 3 - 0.5 = 2.5, weighted by 2
        result
            .into_data()
            .assert_approx_eq::<FT>(&TensorData::from([5.0]), Tolerance::default());
    }

    #[test]
    fn custom_delta_changes_transition() {
        let device = Default::default();
        let loss = BoxRegressionLossConfig::new().with_delta(2.0).init();

        let targets = Tensor::<TestBackend, 1>::zeros([2], &device);
        let predictions =
            Tensor::<TestBackend, 1>::from_data(TensorData::from([1.5, 3.0]), &device);

        let result = loss.forward_no_reduction(targets, predictions);

        // 0.5 * 1.5^2 = 1.125; 2 * (3 - 1) = 4
        result
            .into_data()
            .assert_approx_eq::<FT>(&TensorData::from([1.125, 4.0]), Tolerance::default());
    }

    #[test]
    #[should_panic = "Shape of regression predictions"]
    fn mismatched_shapes_panic() {
        let device = Default::default();
        let loss = BoxRegressionLoss::new();

        let targets = Tensor::<TestBackend, 2>::zeros([2, 3], &device);
        let predictions = Tensor::<TestBackend, 2>::zeros([2, 2], &device);

        let _ = loss.forward_no_reduction(targets, predictions);
    }

    #[test]
    #[should_panic = "Shape of positive mask"]
    fn mask_for_another_grid_panics() {
        let device = Default::default();
        let loss = BoxRegressionLoss::new();
        let occupancy =
            Tensor::<TestBackend, 4>::from_data(TensorData::from([[[[1.0]]]]), &device);
        let mask = PositiveMask::from_occupancy(&occupancy);

        let targets = Tensor::<TestBackend, 5>::zeros([1, 1, 1, 2, 3], &device);
        let predictions = Tensor::<TestBackend, 5>::ones([1, 1, 1, 2, 3], &device);

        let _ = loss.forward(targets, predictions, &mask);
    }

    #[test]
    #[should_panic = "Shape of positive mask"]
    fn angle_mask_for_another_grid_panics() {
        let device = Default::default();
        let loss = BoxRegressionLoss::new();

        let targets = Tensor::<TestBackend, 4>::zeros([1, 2, 1, 2], &device);
        let predictions = Tensor::<TestBackend, 4>::ones([1, 2, 1, 2], &device);

        let _ = loss.forward_scalar(targets, predictions, &single_positive_mask());
    }
}
