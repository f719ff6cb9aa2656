//! The complete PointPillars loss: six weighted terms sharing one positive mask.

use std::{collections::HashMap, fmt};

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor, TensorData, Transaction},
};
use serde::Serialize;

use crate::{
    batch::{DetectionPredictions, DetectionTargets},
    classification::ClassLoss,
    config::PointPillarsLossConfig,
    error::{PointPillarsLossError, PointPillarsLossResult},
    focal::OccupancyFocalLoss,
    heading::HeadingLoss,
    mask::PositiveMask,
    regression::BoxRegressionLoss,
};

/// One term of the detection loss, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LossTerm {
    Occupancy,
    Localization,
    Size,
    Angle,
    Heading,
    Class,
}

impl LossTerm {
    /// All terms in the order they are evaluated and reported.
    pub const ALL: [Self; 6] = [
        Self::Occupancy,
        Self::Localization,
        Self::Size,
        Self::Angle,
        Self::Heading,
        Self::Class,
    ];

    /// Short name used as logging key.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Occupancy => "occupancy",
            Self::Localization => "localization",
            Self::Size => "size",
            Self::Angle => "angle",
            Self::Heading => "heading",
            Self::Class => "class",
        }
    }

    /// Whether the term is restricted to positive anchors.
    pub const fn is_masked(self) -> bool {
        !matches!(self, Self::Occupancy)
    }
}

impl fmt::Display for LossTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Multi-term training loss of a PointPillars detector.
///
/// The occupancy term needs only the occupancy pair. The five remaining terms
/// supervise positive anchors and take the [`PositiveMask`] explicitly, which
/// [`PositiveMask::from_occupancy`] derives from the occupancy targets.
#[derive(Module, Clone, Debug)]
pub struct PointPillarsLoss {
    pub occupancy: OccupancyFocalLoss,
    pub localization: BoxRegressionLoss,
    pub size: BoxRegressionLoss,
    pub angle: BoxRegressionLoss,
    pub heading: HeadingLoss,
    pub class: ClassLoss,
}

impl Default for PointPillarsLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl PointPillarsLoss {
    /// Create a new loss with the reference weights.
    pub fn new() -> Self {
        PointPillarsLossConfig::new().init()
    }

    /// The six loss terms in evaluation order.
    pub const fn losses(&self) -> [LossTerm; 6] {
        LossTerm::ALL
    }

    /// Focal loss over positive anchors and hard negatives, scaled by the focal weight.
    pub fn occupancy_focal_loss<B: Backend>(
        &self,
        targets: Tensor<B, 4>,
        predictions: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        self.occupancy.forward(targets, predictions)
    }

    /// Huber loss on the `(dx, dy, dz)` offsets of positive anchors.
    pub fn localization_loss<B: Backend>(
        &self,
        targets: Tensor<B, 5>,
        predictions: Tensor<B, 5>,
        mask: &PositiveMask<B>,
    ) -> Tensor<B, 1> {
        self.localization.forward(targets, predictions, mask)
    }

    /// Huber loss on the box dimensions of positive anchors.
    pub fn size_loss<B: Backend>(
        &self,
        targets: Tensor<B, 5>,
        predictions: Tensor<B, 5>,
        mask: &PositiveMask<B>,
    ) -> Tensor<B, 1> {
        self.size.forward(targets, predictions, mask)
    }

    /// Huber loss on the yaw of positive anchors.
    pub fn angle_loss<B: Backend>(
        &self,
        targets: Tensor<B, 4>,
        predictions: Tensor<B, 4>,
        mask: &PositiveMask<B>,
    ) -> Tensor<B, 1> {
        self.angle.forward_scalar(targets, predictions, mask)
    }

    /// Binary cross-entropy on the heading direction of positive anchors.
    pub fn heading_loss<B: Backend>(
        &self,
        targets: Tensor<B, 4>,
        predictions: Tensor<B, 4>,
        mask: &PositiveMask<B>,
    ) -> Tensor<B, 1> {
        self.heading.forward(targets, predictions, mask)
    }

    /// Softmax cross-entropy on the class logits of positive anchors.
    pub fn class_loss<B: Backend>(
        &self,
        targets: Tensor<B, 5>,
        logits: Tensor<B, 5>,
        mask: &PositiveMask<B>,
    ) -> Tensor<B, 1> {
        self.class.forward(targets, logits, mask)
    }

    /// Evaluate a single term on a batch.
    pub fn term<B: Backend>(
        &self,
        term: LossTerm,
        targets: &DetectionTargets<B>,
        predictions: &DetectionPredictions<B>,
        mask: &PositiveMask<B>,
    ) -> Tensor<B, 1> {
        match term {
            LossTerm::Occupancy => self.occupancy_focal_loss(
                targets.occupancy.clone(),
                predictions.occupancy.clone(),
            ),
            LossTerm::Localization => self.localization_loss(
                targets.localization.clone(),
                predictions.localization.clone(),
                mask,
            ),
            LossTerm::Size => {
                self.size_loss(targets.size.clone(), predictions.size.clone(), mask)
            }
            LossTerm::Angle => {
                self.angle_loss(targets.angle.clone(), predictions.angle.clone(), mask)
            }
            LossTerm::Heading => {
                self.heading_loss(targets.heading.clone(), predictions.heading.clone(), mask)
            }
            LossTerm::Class => {
                self.class_loss(targets.class.clone(), predictions.class.clone(), mask)
            }
        }
    }

    /// Evaluate all six terms on a batch.
    ///
    /// # Errors
    ///
    /// Returns [`PointPillarsLossError::ShapeMismatch`](crate::PointPillarsLossError::ShapeMismatch)
    /// if any head does not follow the occupancy grid or differs from its target.
    pub fn forward<B: Backend>(
        &self,
        targets: &DetectionTargets<B>,
        predictions: &DetectionPredictions<B>,
    ) -> PointPillarsLossResult<LossBreakdown<B>> {
        targets.check_against(predictions)?;

        let mask = PositiveMask::from_occupancy(&targets.occupancy);
        let [occupancy, localization, size, angle, heading, class] = self
            .losses()
            .map(|term| self.term(term, targets, predictions, &mask));

        tracing::debug!(grid = ?targets.grid(), "detection loss terms evaluated");

        Ok(LossBreakdown {
            occupancy,
            localization,
            size,
            angle,
            heading,
            class,
        })
    }
}

/// Weighted values of every loss term for one forward pass.
#[derive(Debug, Clone)]
pub struct LossBreakdown<B: Backend> {
    pub occupancy: Tensor<B, 1>,
    pub localization: Tensor<B, 1>,
    pub size: Tensor<B, 1>,
    pub angle: Tensor<B, 1>,
    pub heading: Tensor<B, 1>,
    pub class: Tensor<B, 1>,
}

impl<B: Backend> LossBreakdown<B> {
    /// The value of one term.
    pub fn get(&self, term: LossTerm) -> Tensor<B, 1> {
        match term {
            LossTerm::Occupancy => self.occupancy.clone(),
            LossTerm::Localization => self.localization.clone(),
            LossTerm::Size => self.size.clone(),
            LossTerm::Angle => self.angle.clone(),
            LossTerm::Heading => self.heading.clone(),
            LossTerm::Class => self.class.clone(),
        }
    }

    /// Sum of all terms, the quantity to backpropagate.
    pub fn total(&self) -> Tensor<B, 1> {
        self.occupancy.clone()
            + self.localization.clone()
            + self.size.clone()
            + self.angle.clone()
            + self.heading.clone()
            + self.class.clone()
    }

    /// Read every term back to the host in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PointPillarsLossError::Readback`] if the device does not return one
    /// value per term.
    pub fn report(&self) -> PointPillarsLossResult<LossReport> {
        let data: [TensorData; 6] = LossTerm::ALL
            .into_iter()
            .fold(Transaction::default(), |transaction, term| {
                transaction.register(self.get(term))
            })
            .execute()
            .try_into()
            .map_err(|data: Vec<TensorData>| PointPillarsLossError::Readback {
                reason: format!("expected 6 tensors, got {}", data.len()),
            })?;
        let [occupancy, localization, size, angle, heading, class] = data;
        let scalar = |data: TensorData| {
            let value = data.iter::<f64>().next();
            value.ok_or_else(|| PointPillarsLossError::Readback {
                reason: format!("empty tensor of shape {:?}", data.shape),
            })
        };

        let mut report = LossReport {
            occupancy: scalar(occupancy)?,
            localization: scalar(localization)?,
            size: scalar(size)?,
            angle: scalar(angle)?,
            heading: scalar(heading)?,
            class: scalar(class)?,
            total: 0.0,
        };
        report.total = LossTerm::ALL.into_iter().map(|term| report.get(term)).sum();

        Ok(report)
    }

    /// Term values keyed by name, for metric loggers.
    ///
    /// # Errors
    ///
    /// See [`LossBreakdown::report`].
    pub fn to_map(&self) -> PointPillarsLossResult<HashMap<String, f64>> {
        self.report().map(|report| report.to_map())
    }
}

/// Host-side snapshot of a [`LossBreakdown`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossReport {
    pub occupancy: f64,
    pub localization: f64,
    pub size: f64,
    pub angle: f64,
    pub heading: f64,
    pub class: f64,
    pub total: f64,
}

impl LossReport {
    /// The value of one term.
    pub const fn get(&self, term: LossTerm) -> f64 {
        match term {
            LossTerm::Occupancy => self.occupancy,
            LossTerm::Localization => self.localization,
            LossTerm::Size => self.size,
            LossTerm::Angle => self.angle,
            LossTerm::Heading => self.heading,
            LossTerm::Class => self.class,
        }
    }

    /// Term values keyed by name, plus `"total"`.
    pub fn to_map(&self) -> HashMap<String, f64> {
        LossTerm::ALL
            .into_iter()
            .map(|term| (term.name().to_owned(), self.get(term)))
            .chain(std::iter::once(("total".to_owned(), self.total)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use burn::{
        backend::Autodiff,
        tensor::{cast::ToElement, TensorData, Tolerance},
    };

    use super::*;
    use crate::{
        batch::tests::zeros_batch,
        error::PointPillarsLossError,
        tests::{TestBackend, FT},
    };

    fn scenario_batch() -> (DetectionTargets<TestBackend>, DetectionPredictions<TestBackend>) {
        let device = Default::default();
        let (mut targets, mut predictions) = zeros_batch([1, 1, 2, 2], 3);

        targets.occupancy =
            Tensor::from_data(TensorData::from([[[[1.0, 0.0], [0.0, -1.0]]]]), &device);
        predictions.occupancy =
            Tensor::from_data(TensorData::from([[[[0.7, 0.2], [0.6, 0.9]]]]), &device);

        targets.localization = Tensor::from_data(
            TensorData::from([[[[[0.1, 0.2, 0.3], [0.0; 3]], [[0.0; 3], [0.0; 3]]]]]),
            &device,
        );
        predictions.localization = Tensor::from_data(
            TensorData::from([[[[[0.3, 0.2, 0.3], [9.0; 3]], [[9.0; 3], [9.0; 3]]]]]),
            &device,
        );

        targets.angle = Tensor::from_data(TensorData::from([[[[0.5, 0.0], [0.0, 0.0]]]]), &device);
        predictions.angle =
            Tensor::from_data(TensorData::from([[[[0.5, 3.0], [3.0, 3.0]]]]), &device);

        targets.heading = Tensor::from_data(TensorData::from([[[[1.0, 0.0], [0.0, 0.0]]]]), &device);
        predictions.heading =
            Tensor::from_data(TensorData::from([[[[0.5, 0.5], [0.5, 0.5]]]]), &device);

        targets.class = Tensor::from_data(
            TensorData::from([[[[[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]], [[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]]]]]),
            &device,
        );

        (targets, predictions)
    }

    #[test]
    fn losses_are_listed_in_evaluation_order() {
        let loss = PointPillarsLoss::new();
        let names: Vec<&str> = loss.losses().iter().map(|term| term.name()).collect();

        assert_eq!(
            names,
            ["occupancy", "localization", "size", "angle", "heading", "class"]
        );
        assert!(!LossTerm::Occupancy.is_masked());
        assert!(LossTerm::ALL[1..].iter().all(|term| term.is_masked()));
    }

    #[test]
    fn forward_matches_individual_terms() {
        let loss = PointPillarsLoss::new();
        let (targets, predictions) = scenario_batch();
        let mask = PositiveMask::from_occupancy(&targets.occupancy);

        let breakdown = loss.forward(&targets, &predictions).expect("valid batch");

        for term in loss.losses() {
            let direct = loss.term(term, &targets, &predictions, &mask);
            breakdown
                .get(term)
                .into_data()
                .assert_approx_eq::<FT>(&direct.into_data(), Tolerance::default());
        }
    }

    #[test]
    fn forward_scenario_values() {
        let loss = PointPillarsLoss::new();
        let (targets, predictions) = scenario_batch();

        let report = loss
            .forward(&targets, &predictions)
            .expect("valid batch")
            .report()
            .expect("readback");

        // Only the first anchor is positive: localization residual 0.2 on one of three channels.
        assert!((report.localization - 2.0 * (0.5 * 0.04 / 3.0)).abs() < 1e-6);
        assert!((report.size).abs() < 1e-6);
        assert!((report.angle).abs() < 1e-6);
        assert!((report.heading - 0.2 * 2.0f64.ln()).abs() < 1e-5);
        assert!((report.class - 0.5 * 3.0f64.ln()).abs() < 1e-5);
        assert!(report.occupancy > 0.0);

        let sum: f64 = LossTerm::ALL.iter().map(|&term| report.get(term)).sum();
        assert!((report.total - sum).abs() < 1e-9);
    }

    #[test]
    fn total_equals_sum_of_terms() {
        let loss = PointPillarsLoss::new();
        let (targets, predictions) = scenario_batch();

        let breakdown = loss.forward(&targets, &predictions).expect("valid batch");
        let report = breakdown.report().expect("readback");
        let total = breakdown.total().into_scalar().to_f64();

        assert!((total - report.total).abs() < 1e-5, "{total} vs {}", report.total);
    }

    #[test]
    fn to_map_contains_every_term_and_total() {
        let loss = PointPillarsLoss::new();
        let (targets, predictions) = scenario_batch();

        let map = loss
            .forward(&targets, &predictions)
            .expect("valid batch")
            .to_map()
            .expect("readback");

        assert_eq!(map.len(), 7);
        for term in LossTerm::ALL {
            assert!(map.contains_key(term.name()), "missing {term}");
        }
        assert!(map.contains_key("total"));
    }

    #[test]
    fn perfect_regression_and_classification_are_near_zero() {
        let device = Default::default();
        let loss = PointPillarsLoss::new();
        let (mut targets, mut predictions) = zeros_batch([1, 2, 1, 1], 2);

        targets.occupancy = Tensor::from_data(TensorData::from([[[[1.0]], [[1.0]]]]), &device);
        targets.localization = Tensor::from_data(
            TensorData::from([[[[[0.4, -0.1, 0.2]]], [[[1.0, 2.0, 3.0]]]]]),
            &device,
        );
        targets.heading = Tensor::from_data(TensorData::from([[[[1.0]], [[0.0]]]]), &device);
        targets.class =
            Tensor::from_data(TensorData::from([[[[[1.0, 0.0]]], [[[0.0, 1.0]]]]]), &device);

        predictions.localization = targets.localization.clone();
        predictions.size = targets.size.clone();
        predictions.angle = targets.angle.clone();
        predictions.heading = targets.heading.clone();
        predictions.class = targets.class.clone().mul_scalar(40.0);

        let report = loss
            .forward(&targets, &predictions)
            .expect("valid batch")
            .report()
            .expect("readback");

        assert!(report.localization.abs() < 1e-6);
        assert!(report.size.abs() < 1e-6);
        assert!(report.angle.abs() < 1e-6);
        assert!(report.heading.abs() < 1e-5);
        assert!(report.class.abs() < 1e-5);
    }

    #[test]
    fn loc_weight_scales_localization_exactly() {
        let (targets, predictions) = scenario_batch();
        let mask = PositiveMask::from_occupancy(&targets.occupancy);
        let base = PointPillarsLossConfig::new().init();
        let scaled = PointPillarsLossConfig::new().with_loc_weight(6.0).init();

        let base_value = base
            .localization_loss(
                targets.localization.clone(),
                predictions.localization.clone(),
                &mask,
            )
            .into_scalar()
            .to_f64();
        let scaled_value = scaled
            .localization_loss(targets.localization, predictions.localization, &mask)
            .into_scalar()
            .to_f64();

        assert!((3.0f64.mul_add(base_value, -scaled_value)).abs() < 1e-6);
    }

    #[test]
    fn forward_rejects_mismatched_heads() {
        let device = Default::default();
        let loss = PointPillarsLoss::new();
        let (targets, mut predictions) = zeros_batch([1, 2, 2, 1], 3);
        predictions.size = Tensor::zeros([1, 2, 2, 1, 2], &device);

        let err = loss.forward(&targets, &predictions).unwrap_err();

        assert!(
            matches!(err, PointPillarsLossError::ShapeMismatch { tensor: "size prediction", .. }),
            "{err}"
        );
    }

    #[test]
    fn total_backpropagates_to_predictions() {
        type AutodiffBackend = Autodiff<TestBackend>;
        let device = Default::default();
        let loss = PointPillarsLoss::new();
        let (targets, predictions) = scenario_batch();

        let to_autodiff = |t: Tensor<TestBackend, 4>| {
            Tensor::<AutodiffBackend, 4>::from_data(t.into_data(), &device)
        };
        let to_autodiff5 = |t: Tensor<TestBackend, 5>| {
            Tensor::<AutodiffBackend, 5>::from_data(t.into_data(), &device)
        };

        let occupancy_pred = to_autodiff(predictions.occupancy).require_grad();
        let targets = DetectionTargets {
            occupancy: to_autodiff(targets.occupancy),
            localization: to_autodiff5(targets.localization),
            size: to_autodiff5(targets.size),
            angle: to_autodiff(targets.angle),
            heading: to_autodiff(targets.heading),
            class: to_autodiff5(targets.class),
        };
        let predictions = DetectionPredictions {
            occupancy: occupancy_pred.clone(),
            localization: to_autodiff5(predictions.localization),
            size: to_autodiff5(predictions.size),
            angle: to_autodiff(predictions.angle),
            heading: to_autodiff(predictions.heading),
            class: to_autodiff5(predictions.class),
        };

        let total = loss
            .forward(&targets, &predictions)
            .expect("valid batch")
            .total();
        let grads = total.backward();
        let grad = occupancy_pred.grad(&grads).expect("occupancy gradient");

        let values: Vec<f32> = grad.into_data().to_vec().expect("float gradient");
        assert!(values.iter().all(|v| v.is_finite()), "{values:?}");
        // The positive anchor is pushed up, the ignored anchor receives nothing.
        assert!(values[0] < 0.0, "{values:?}");
        assert_eq!(values[3], 0.0);
    }
}
