//! Binary cross-entropy on the heading direction of positive anchors.
//!
//! The angle regression target is ambiguous by `pi`; a separate binary head
//! predicts which of the two headings applies.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

use crate::mask::{masked_mean, PositiveMask};

/// Element-wise binary cross-entropy on probabilities.
///
/// Predictions are clipped to `[eps, 1 - eps]` and `eps` is added inside the
/// logarithms, so the result is finite for any input in `[0, 1]`.
pub fn binary_cross_entropy<B: Backend, const D: usize>(
    targets: Tensor<B, D>,
    predictions: Tensor<B, D>,
    epsilon: f64,
) -> Tensor<B, D> {
    let predictions = predictions.clamp(epsilon, 1.0 - epsilon);
    let log_p = predictions.clone().add_scalar(epsilon).log();
    let log_one_minus_p = predictions.neg().add_scalar(1.0 + epsilon).log();
    let one_minus_targets = targets.clone().neg().add_scalar(1.0);

    (targets * log_p + one_minus_targets * log_one_minus_p).neg()
}

/// Configuration for creating a [heading loss](HeadingLoss).
#[derive(Config, Debug)]
pub struct HeadingLossConfig {
    /// Weight factor applied to the reduced loss. Default: 1.0
    #[config(default = 1.0)]
    pub weight: f64,
    /// Probability clipping constant. Default: 1e-7
    #[config(default = 1e-7)]
    pub epsilon: f64,
}

impl HeadingLossConfig {
    /// Initialize [heading loss](HeadingLoss).
    pub const fn init(&self) -> HeadingLoss {
        HeadingLoss {
            weight: self.weight,
            epsilon: self.epsilon,
        }
    }
}

/// Masked binary cross-entropy over the heading classification channel.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct HeadingLoss {
    /// Weight factor applied to the reduced loss.
    pub weight: f64,
    /// Probability clipping constant.
    pub epsilon: f64,
}

impl Default for HeadingLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for HeadingLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("weight", &self.weight).optional()
    }
}

impl HeadingLoss {
    /// Create a new heading loss with default configuration.
    pub fn new() -> Self {
        HeadingLossConfig::new().init()
    }

    /// Compute the weighted loss averaged over positive anchors.
    ///
    /// # Shapes
    ///
    /// - targets: `[batch, grid_h, grid_w, anchors]`, values in `{0, 1}`
    /// - predictions: `[batch, grid_h, grid_w, anchors]`, probabilities
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        targets: Tensor<B, 4>,
        predictions: Tensor<B, 4>,
        mask: &PositiveMask<B>,
    ) -> Tensor<B, 1> {
        mask.assert_grid(&targets.dims(), "heading");
        let loss = self.forward_no_reduction(targets, predictions);
        masked_mean(loss, mask.tensor()).mul_scalar(self.weight)
    }

    /// Compute the unweighted per-anchor loss.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        targets: Tensor<B, 4>,
        predictions: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let target_dims = targets.dims();
        let pred_dims = predictions.dims();
        assert_eq!(
            pred_dims, target_dims,
            "Shape of heading predictions ({pred_dims:?}) must match targets ({target_dims:?})"
        );

        binary_cross_entropy(targets, predictions, self.epsilon)
    }
}
