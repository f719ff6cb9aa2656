//! Training loss for PointPillars-style 3D object detection.
//!
//! The detector predicts, for every anchor of a bird's-eye-view grid, an occupancy
//! probability, box offsets, box size, yaw, a heading bit and class logits. This
//! crate turns those predictions and the matched ground truth into six weighted
//! scalar losses using the Burn deep learning framework.
//!
//! ## Loss Terms
//!
//! - **[`OccupancyFocalLoss`]**: focal loss on occupancy with percentile hard-negative mining
//! - **[`BoxRegressionLoss`]**: Huber loss on localization offsets, box size and yaw
//! - **[`HeadingLoss`]**: binary cross-entropy on the heading direction
//! - **[`ClassLoss`]**: softmax cross-entropy on class logits
//!
//! Every term except occupancy is restricted to positively matched anchors. The
//! [`PositiveMask`] is derived from the occupancy targets once per forward pass and
//! passed to each masked term explicitly.
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::{backend::NdArray, prelude::*};
//! use pointpillars_loss::{PointPillarsLossConfig, PositiveMask};
//!
//! let device = Default::default();
//! let loss = PointPillarsLossConfig::new().with_loc_weight(2.0).init();
//!
//! let occupancy = Tensor::<NdArray, 4>::from_floats([[[[1.0, 0.0]]]], &device);
//! let occupancy_pred = Tensor::<NdArray, 4>::from_floats([[[[0.9, 0.2]]]], &device);
//! let focal = loss.occupancy_focal_loss(occupancy.clone(), occupancy_pred);
//!
//! let mask = PositiveMask::from_occupancy(&occupancy);
//! let offsets = Tensor::<NdArray, 5>::zeros([1, 1, 1, 2, 3], &device);
//! let localization = loss.localization_loss(offsets.clone(), offsets, &mask);
//! # let _ = (focal, localization);
//! ```

mod batch;
mod classification;
mod config;
mod error;
mod focal;
mod heading;
mod loss;
mod mask;
mod mining;
mod regression;

pub use batch::{DetectionPredictions, DetectionTargets, LOCALIZATION_CHANNELS, SIZE_CHANNELS};
pub use classification::{ClassLoss, ClassLossConfig};
pub use config::PointPillarsLossConfig;
pub use error::{PointPillarsLossError, PointPillarsLossResult};
pub use focal::{OccupancyFocalLoss, OccupancyFocalLossConfig};
pub use heading::{binary_cross_entropy, HeadingLoss, HeadingLossConfig};
pub use loss::{LossBreakdown, LossReport, LossTerm, PointPillarsLoss};
pub use mask::{masked_mean, negative_mask, PositiveMask, IGNORE, NEGATIVE, POSITIVE};
pub use mining::{
    percentile_threshold, HardNegativeMiner, HardNegativeMinerConfig, HardNegatives,
};
pub use regression::{BoxRegressionLoss, BoxRegressionLossConfig};
