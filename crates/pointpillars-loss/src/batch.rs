//! Ground truth and network outputs for one forward pass.
//!
//! All tensors share the anchor grid `[batch, grid_h, grid_w, anchors]` of the
//! occupancy head; vector-valued heads add a trailing channel axis.

use burn::tensor::{backend::Backend, Tensor};

use crate::error::{PointPillarsLossError, PointPillarsLossResult};

/// Channels of the localization head `(dx, dy, dz)`.
pub const LOCALIZATION_CHANNELS: usize = 3;
/// Channels of the size head `(dw, dl, dh)`.
pub const SIZE_CHANNELS: usize = 3;

/// Regression and classification targets produced by anchor matching.
#[derive(Debug, Clone)]
pub struct DetectionTargets<B: Backend> {
    /// `[batch, grid_h, grid_w, anchors]`, values in `{-1, 0, 1}`.
    pub occupancy: Tensor<B, 4>,
    /// `[batch, grid_h, grid_w, anchors, 3]`
    pub localization: Tensor<B, 5>,
    /// `[batch, grid_h, grid_w, anchors, 3]`
    pub size: Tensor<B, 5>,
    /// `[batch, grid_h, grid_w, anchors]`
    pub angle: Tensor<B, 4>,
    /// `[batch, grid_h, grid_w, anchors]`, values in `{0, 1}`.
    pub heading: Tensor<B, 4>,
    /// `[batch, grid_h, grid_w, anchors, classes]`, one-hot.
    pub class: Tensor<B, 5>,
}

/// Raw outputs of the detection head.
#[derive(Debug, Clone)]
pub struct DetectionPredictions<B: Backend> {
    /// `[batch, grid_h, grid_w, anchors]`, probabilities.
    pub occupancy: Tensor<B, 4>,
    /// `[batch, grid_h, grid_w, anchors, 3]`
    pub localization: Tensor<B, 5>,
    /// `[batch, grid_h, grid_w, anchors, 3]`
    pub size: Tensor<B, 5>,
    /// `[batch, grid_h, grid_w, anchors]`
    pub angle: Tensor<B, 4>,
    /// `[batch, grid_h, grid_w, anchors]`, probabilities.
    pub heading: Tensor<B, 4>,
    /// `[batch, grid_h, grid_w, anchors, classes]`, logits.
    pub class: Tensor<B, 5>,
}

impl<B: Backend> DetectionTargets<B> {
    /// Anchor grid `[batch, grid_h, grid_w, anchors]` of the batch.
    pub fn grid(&self) -> [usize; 4] {
        self.occupancy.dims()
    }

    /// Number of object classes.
    pub fn num_classes(&self) -> usize {
        self.class.dims()[4]
    }

    /// Check that every head follows the occupancy grid and that each prediction
    /// has exactly the shape of its target.
    ///
    /// # Errors
    ///
    /// Returns [`PointPillarsLossError::ShapeMismatch`] naming the first offending tensor.
    pub fn check_against(&self, predictions: &DetectionPredictions<B>) -> PointPillarsLossResult<()> {
        let grid = self.grid();
        let [batch, grid_h, grid_w, anchors] = grid;

        expect_shape(
            "localization",
            &[batch, grid_h, grid_w, anchors, LOCALIZATION_CHANNELS],
            &self.localization.dims(),
        )?;
        expect_shape(
            "size",
            &[batch, grid_h, grid_w, anchors, SIZE_CHANNELS],
            &self.size.dims(),
        )?;
        expect_shape("angle", &grid, &self.angle.dims())?;
        expect_shape("heading", &grid, &self.heading.dims())?;
        expect_shape(
            "class",
            &[batch, grid_h, grid_w, anchors, self.num_classes()],
            &self.class.dims(),
        )?;

        expect_shape(
            "occupancy prediction",
            &self.occupancy.dims(),
            &predictions.occupancy.dims(),
        )?;
        expect_shape(
            "localization prediction",
            &self.localization.dims(),
            &predictions.localization.dims(),
        )?;
        expect_shape("size prediction", &self.size.dims(), &predictions.size.dims())?;
        expect_shape("angle prediction", &self.angle.dims(), &predictions.angle.dims())?;
        expect_shape(
            "heading prediction",
            &self.heading.dims(),
            &predictions.heading.dims(),
        )?;
        expect_shape("class prediction", &self.class.dims(), &predictions.class.dims())
    }
}

fn expect_shape(
    tensor: &'static str,
    expected: &[usize],
    actual: &[usize],
) -> PointPillarsLossResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(PointPillarsLossError::ShapeMismatch {
            tensor,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}
