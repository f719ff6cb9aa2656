//! Positive-match mask shared by every anchor-level loss term.
//!
//! Occupancy targets label each anchor as a positive match (`1`), background (`0`)
//! or a bad match to be ignored (`-1`). The localization, size, angle, heading and
//! class terms only supervise positive anchors, so the mask is computed once from
//! the occupancy targets and handed to each of them explicitly.

use burn::tensor::{backend::Backend, cast::ToElement, Bool, Tensor};

/// Occupancy value of a positively matched anchor.
pub const POSITIVE: f32 = 1.0;
/// Occupancy value of a background anchor.
pub const NEGATIVE: f32 = 0.0;
/// Occupancy value of an anchor excluded from every loss term.
pub const IGNORE: f32 = -1.0;

/// Boolean `[batch, grid_h, grid_w, anchors]` mask of positively matched anchors.
#[derive(Debug, Clone)]
pub struct PositiveMask<B: Backend> {
    mask: Tensor<B, 4, Bool>,
}

impl<B: Backend> PositiveMask<B> {
    /// Derive the mask from occupancy targets (`occupancy == 1`).
    pub fn from_occupancy(occupancy: &Tensor<B, 4>) -> Self {
        Self {
            mask: occupancy.clone().equal_elem(POSITIVE),
        }
    }

    /// The mask in the occupancy layout.
    pub fn tensor(&self) -> Tensor<B, 4, Bool> {
        self.mask.clone()
    }

    /// The mask repeated across a trailing channel axis of width `channels`.
    ///
    /// `[batch, grid_h, grid_w, anchors]` -> `[batch, grid_h, grid_w, anchors, channels]`
    pub fn broadcast_channels(&self, channels: usize) -> Tensor<B, 5, Bool> {
        self.mask
            .clone()
            .unsqueeze_dim::<5>(4)
            .repeat_dim(4, channels)
    }

    /// Spatial layout the mask was computed for.
    pub fn dims(&self) -> [usize; 4] {
        self.mask.dims()
    }

    /// Panics unless the mask was computed for `grid`, the leading dims of a `head` tensor.
    pub(crate) fn assert_grid(&self, grid: &[usize], head: &str) {
        let mask_dims = self.dims();
        assert_eq!(
            mask_dims.as_slice(),
            grid,
            "Shape of positive mask ({mask_dims:?}) must match the {head} grid ({grid:?})"
        );
    }

    /// Number of positive anchors. Forces a device sync.
    pub fn count(&self) -> usize {
        self.mask.clone().int().sum().into_scalar().to_usize()
    }
}

/// Boolean mask of background anchors (`occupancy == 0`).
pub fn negative_mask<B: Backend>(occupancy: &Tensor<B, 4>) -> Tensor<B, 4, Bool> {
    occupancy.clone().equal_elem(NEGATIVE)
}

/// Mean of `loss` over the elements selected by `mask`.
///
/// Unselected elements are replaced rather than multiplied away, so non-finite
/// values outside the mask never reach the result. An empty selection yields `0`.
///
/// # Panics
///
/// If `mask` and `loss` differ in shape.
pub fn masked_mean<B: Backend, const D: usize>(
    loss: Tensor<B, D>,
    mask: Tensor<B, D, Bool>,
) -> Tensor<B, 1> {
    let loss_dims = loss.dims();
    let mask_dims = mask.dims();
    assert_eq!(
        mask_dims, loss_dims,
        "Shape of mask ({mask_dims:?}) must match loss ({loss_dims:?})"
    );

    let count = mask.clone().float().sum().clamp_min(1.0);
    loss.mask_fill(mask.bool_not(), 0.0).sum() / count
}
