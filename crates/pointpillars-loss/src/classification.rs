//! Softmax cross-entropy on the object class of positive anchors.
//!
//! Targets are class distributions (usually one-hot) and predictions are raw logits:
//! ```text
//! L = -sum_c y_c * log_softmax(z)_c
//! ```

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{activation, backend::Backend, Tensor},
};

use crate::mask::{masked_mean, PositiveMask};

/// Configuration for creating a [class loss](ClassLoss).
#[derive(Config, Debug)]
pub struct ClassLossConfig {
    /// Weight factor applied to the reduced loss. Default: 1.0
    #[config(default = 1.0)]
    pub weight: f64,
}

impl ClassLossConfig {
    /// Initialize [class loss](ClassLoss).
    pub const fn init(&self) -> ClassLoss {
        ClassLoss {
            weight: self.weight,
        }
    }
}

/// Masked softmax cross-entropy with logits over the class axis.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct ClassLoss {
    /// Weight factor applied to the reduced loss.
    pub weight: f64,
}

impl Default for ClassLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for ClassLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("weight", &self.weight).optional()
    }
}

impl ClassLoss {
    /// Create a new class loss with default configuration.
    pub fn new() -> Self {
        ClassLossConfig::new().init()
    }

    /// Compute the weighted loss averaged over positive anchors.
    ///
    /// # Shapes
    ///
    /// - targets: `[batch, grid_h, grid_w, anchors, classes]`, class distributions
    /// - logits: `[batch, grid_h, grid_w, anchors, classes]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        targets: Tensor<B, 5>,
        logits: Tensor<B, 5>,
        mask: &PositiveMask<B>,
    ) -> Tensor<B, 1> {
        let [b, h, w, a, _] = targets.dims();
        mask.assert_grid(&[b, h, w, a], "class");
        let loss = self.forward_no_reduction(targets, logits);
        masked_mean(loss, mask.tensor()).mul_scalar(self.weight)
    }

    /// Compute the unweighted per-anchor cross-entropy.
    ///
    /// # Shapes
    ///
    /// - targets: `[batch, grid_h, grid_w, anchors, classes]`
    /// - logits: `[batch, grid_h, grid_w, anchors, classes]`
    /// - output: `[batch, grid_h, grid_w, anchors]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        targets: Tensor<B, 5>,
        logits: Tensor<B, 5>,
    ) -> Tensor<B, 4> {
        let target_dims = targets.dims();
        let logit_dims = logits.dims();
        assert_eq!(
            logit_dims, target_dims,
            "Shape of class logits ({logit_dims:?}) must match targets ({target_dims:?})"
        );

        let [batch, grid_h, grid_w, anchors, _] = logit_dims;
        let log_probs = activation::log_softmax(logits, 4);

        (targets * log_probs)
            .sum_dim(4)
            .neg()
            .reshape([batch, grid_h, grid_w, anchors])
    }
}
