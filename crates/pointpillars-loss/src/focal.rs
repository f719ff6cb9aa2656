//! Focal loss on anchor occupancy with hard-negative mining.
//!
//! Occupancy targets `y` take values in `{-1, 0, 1}`, predictions `p` are
//! probabilities. Per anchor:
//! ```text
//! CE    = -(y * ln(p + eps) + (1 - y) * ln(1 - p + eps)),  p clipped to [eps, 1 - eps]
//! p_t   = y * p + (1 - y) * (1 - p)
//! FL    = (1 - p_t)^gamma * (alpha * y + (1 - alpha) * (1 - y)) * CE
//! ```
//! The loss is the mean of `FL` over positive anchors and hard negatives, see
//! [`HardNegativeMiner`].

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

use crate::{
    heading::binary_cross_entropy,
    mask::{masked_mean, PositiveMask},
    mining::{HardNegativeMiner, HardNegativeMinerConfig},
};

/// Configuration for creating an [occupancy focal loss](OccupancyFocalLoss).
#[derive(Config, Debug)]
pub struct OccupancyFocalLossConfig {
    /// Balance between positive and negative anchors. Default: 0.25
    #[config(default = 0.25)]
    pub alpha: f64,
    /// Focusing exponent applied to `1 - p_t`. Default: 2.0
    #[config(default = 2.0)]
    pub gamma: f64,
    /// Weight factor applied to the reduced loss. Default: 1.0
    #[config(default = 1.0)]
    pub weight: f64,
    /// Percentile of negative losses above which negatives are kept. Default: 90
    #[config(default = 90.0)]
    pub hard_negative_percentile: f64,
    /// Probability clipping constant of the cross-entropy. Default: 1e-7
    #[config(default = 1e-7)]
    pub epsilon: f64,
}

impl OccupancyFocalLossConfig {
    /// Initialize [occupancy focal loss](OccupancyFocalLoss).
    pub const fn init(&self) -> OccupancyFocalLoss {
        OccupancyFocalLoss {
            alpha: self.alpha,
            gamma: self.gamma,
            weight: self.weight,
            hard_negative_percentile: self.hard_negative_percentile,
            epsilon: self.epsilon,
        }
    }
}

/// Focal loss over anchor occupancy, restricted to positives and hard negatives.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct OccupancyFocalLoss {
    /// Balance between positive and negative anchors.
    pub alpha: f64,
    /// Focusing exponent.
    pub gamma: f64,
    /// Weight factor applied to the reduced loss.
    pub weight: f64,
    /// Percentile used by hard-negative mining.
    pub hard_negative_percentile: f64,
    /// Probability clipping constant.
    pub epsilon: f64,
}

impl Default for OccupancyFocalLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for OccupancyFocalLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("alpha", &self.alpha)
            .add("gamma", &self.gamma)
            .add("weight", &self.weight)
            .add("hard_negative_percentile", &self.hard_negative_percentile)
            .optional()
    }
}

impl OccupancyFocalLoss {
    /// Create a new focal loss with default configuration.
    pub fn new() -> Self {
        OccupancyFocalLossConfig::new().init()
    }

    /// The miner used to pick hard negatives.
    pub fn miner(&self) -> HardNegativeMiner {
        HardNegativeMinerConfig::new()
            .with_percentile(self.hard_negative_percentile)
            .init()
    }

    /// Compute the weighted focal loss over positives and hard negatives.
    ///
    /// # Shapes
    ///
    /// - targets: `[batch, grid_h, grid_w, anchors]`, values in `{-1, 0, 1}`
    /// - predictions: `[batch, grid_h, grid_w, anchors]`, probabilities
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        targets: Tensor<B, 4>,
        predictions: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let focal = self.forward_no_reduction(targets.clone(), predictions);
        let positives = PositiveMask::from_occupancy(&targets);
        let hard_negatives = self.miner().select(&focal, &targets);

        let included = positives.tensor().bool_or(hard_negatives.mask);
        masked_mean(focal, included).mul_scalar(self.weight)
    }

    /// Compute the unweighted per-anchor focal loss.
    ///
    /// Ignored anchors (`-1`) are evaluated as background so that the map stays
    /// finite everywhere; callers are expected to exclude them.
    ///
    /// # Shapes
    ///
    /// - targets: `[batch, grid_h, grid_w, anchors]`
    /// - predictions: `[batch, grid_h, grid_w, anchors]`
    /// - output: `[batch, grid_h, grid_w, anchors]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        targets: Tensor<B, 4>,
        predictions: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.assertions(&targets, &predictions);

        let targets = targets.clamp_min(0.0);
        let cross_entropy =
            binary_cross_entropy(targets.clone(), predictions.clone(), self.epsilon);

        let one_minus_targets = targets.clone().neg().add_scalar(1.0);
        let one_minus_predictions = predictions.clone().neg().add_scalar(1.0);
        let p_t = targets.clone() * predictions + one_minus_targets.clone() * one_minus_predictions;

        let gamma_factor = p_t.neg().add_scalar(1.0).clamp_min(0.0).powf_scalar(self.gamma);
        let alpha_factor =
            targets.mul_scalar(self.alpha) + one_minus_targets.mul_scalar(1.0 - self.alpha);

        gamma_factor * alpha_factor * cross_entropy
    }

    fn assertions<B: Backend>(&self, targets: &Tensor<B, 4>, predictions: &Tensor<B, 4>) {
        let target_dims = targets.dims();
        let pred_dims = predictions.dims();
        assert_eq!(
            pred_dims, target_dims,
            "Shape of occupancy predictions ({pred_dims:?}) must match targets ({target_dims:?})"
        );
    }
}
