//! Percentile-based hard-negative mining.
//!
//! Background anchors vastly outnumber positive matches on a bird's-eye-view grid.
//! Instead of averaging the focal loss over every background anchor, only the
//! negatives whose loss lies strictly above a percentile of the negative loss
//! distribution are kept.
//!
//! The percentile uses nearest-rank interpolation on the ascending order statistics:
//! ```text
//! index = round_half_even(q / 100 * (n - 1))
//! threshold = sorted_negatives[index]
//! ```

use burn::{
    config::Config,
    tensor::{backend::Backend, cast::ToElement, Bool, Tensor},
};

use crate::mask::negative_mask;

/// Configuration for creating a [hard-negative miner](HardNegativeMiner).
#[derive(Config, Debug)]
pub struct HardNegativeMinerConfig {
    /// Percentile of the negative loss distribution used as the selection threshold. Default: 90
    #[config(default = 90.0)]
    pub percentile: f64,
}

impl HardNegativeMinerConfig {
    /// Initialize a [hard-negative miner](HardNegativeMiner).
    pub const fn init(&self) -> HardNegativeMiner {
        HardNegativeMiner {
            percentile: self.percentile,
        }
    }
}

/// Selects the hardest background anchors of a focal loss map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardNegativeMiner {
    /// Percentile of the negative loss distribution used as the selection threshold.
    pub percentile: f64,
}

impl Default for HardNegativeMiner {
    fn default() -> Self {
        HardNegativeMinerConfig::new().init()
    }
}

/// Outcome of hard-negative mining on one forward pass.
#[derive(Debug, Clone)]
pub struct HardNegatives<B: Backend> {
    /// Background anchors whose loss exceeds the threshold.
    pub mask: Tensor<B, 4, Bool>,
    /// Percentile threshold, or `None` when the batch contained no background anchors.
    pub threshold: Option<f64>,
}

impl HardNegativeMiner {
    /// Select hard negatives from a per-anchor loss map.
    ///
    /// # Shapes
    ///
    /// - loss: `[batch, grid_h, grid_w, anchors]`
    /// - occupancy: `[batch, grid_h, grid_w, anchors]` with values in `{-1, 0, 1}`
    ///
    /// The threshold is read from detached values, so the selection itself carries
    /// no gradient. When there is no background anchor at all the selection is empty.
    pub fn select<B: Backend>(
        &self,
        loss: &Tensor<B, 4>,
        occupancy: &Tensor<B, 4>,
    ) -> HardNegatives<B> {
        let negatives = negative_mask(occupancy);
        let count = negatives.clone().int().sum().into_scalar().to_usize();

        if count == 0 {
            tracing::debug!("no background anchors in batch, skipping hard-negative mining");
            return HardNegatives {
                mask: negatives,
                threshold: None,
            };
        }

        // Non-negatives sort to the tail, leaving the first `count` slots to the negatives.
        let sorted = loss
            .clone()
            .detach()
            .mask_fill(negatives.clone().bool_not(), f32::INFINITY)
            .flatten::<1>(0, 3)
            .sort(0);
        let index = nearest_rank(self.percentile, count);
        let threshold = sorted.slice([index..index + 1]).into_scalar().to_f64();

        HardNegatives {
            mask: negatives.bool_and(loss.clone().greater_elem(threshold)),
            threshold: Some(threshold),
        }
    }
}

/// Percentile of `values` with nearest-rank interpolation, `None` for an empty slice.
///
/// NaN values sort last.
pub fn percentile_threshold(values: &[f64], percentile: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(sorted[nearest_rank(percentile, sorted.len())])
}

fn nearest_rank(percentile: f64, len: usize) -> usize {
    let fraction = (percentile / 100.0).clamp(0.0, 1.0);
    let rank = (fraction * (len - 1) as f64).round_ties_even();
    (rank as usize).min(len - 1)
}
