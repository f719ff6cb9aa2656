//! Evaluate the detection loss on a synthetic batch.
//!
//! Useful to check that a configuration produces finite, sensibly scaled terms on a
//! given backend before wiring it into a training loop.

use anyhow::{ensure, Result};
use burn::tensor::{activation, backend::Backend, Distribution, Int, Tensor};
use pointpillars_loss::{
    DetectionPredictions, DetectionTargets, LossReport, PointPillarsLossConfig, PositiveMask,
    IGNORE, LOCALIZATION_CHANNELS, POSITIVE, SIZE_CHANNELS,
};

/// Layout and label statistics of a synthetic batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOptions {
    pub batch: usize,
    pub grid_h: usize,
    pub grid_w: usize,
    pub anchors: usize,
    pub classes: usize,
    /// Expected share of positively matched anchors.
    pub positive_fraction: f64,
    /// Expected share of ignored anchors.
    pub ignore_fraction: f64,
    pub seed: u64,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            batch: 1,
            grid_h: 16,
            grid_w: 16,
            anchors: 4,
            classes: 4,
            positive_fraction: 0.05,
            ignore_fraction: 0.05,
            seed: 42,
        }
    }
}

impl ProbeOptions {
    fn grid(&self) -> [usize; 4] {
        [self.batch, self.grid_h, self.grid_w, self.anchors]
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.grid().iter().all(|&d| d > 0) && self.classes > 0,
            "batch, grid and class dimensions must be non-zero, got {:?} with {} classes",
            self.grid(),
            self.classes
        );
        ensure!(
            (0.0..=1.0).contains(&self.positive_fraction)
                && (0.0..=1.0).contains(&self.ignore_fraction)
                && self.positive_fraction + self.ignore_fraction <= 1.0,
            "label fractions must lie in [0, 1] and sum to at most 1, got positive {} and ignore {}",
            self.positive_fraction,
            self.ignore_fraction
        );
        Ok(())
    }
}

/// Draw a random but well-formed batch of targets and predictions.
///
/// # Errors
///
/// Returns an error if the options describe an empty grid or impossible label fractions.
pub fn synthetic_batch<B: Backend>(
    options: &ProbeOptions,
    device: &B::Device,
) -> Result<(DetectionTargets<B>, DetectionPredictions<B>)> {
    options.validate()?;

    let grid = options.grid();
    let [b, h, w, a] = grid;
    let unit = Distribution::Uniform(0.0, 1.0);
    let normal = |sigma| Distribution::Normal(0.0, sigma);

    let draw = Tensor::<B, 4>::random(grid, unit, device);
    let occupancy = Tensor::<B, 4>::zeros(grid, device)
        .mask_fill(draw.clone().lower_elem(options.ignore_fraction), IGNORE)
        .mask_fill(
            draw.greater_equal_elem(1.0 - options.positive_fraction),
            POSITIVE,
        );

    let localization =
        Tensor::<B, 5>::random([b, h, w, a, LOCALIZATION_CHANNELS], normal(0.5), device);
    let size = Tensor::<B, 5>::random([b, h, w, a, SIZE_CHANNELS], normal(0.3), device);
    let angle = Tensor::<B, 4>::random(
        grid,
        Distribution::Uniform(-std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2),
        device,
    );
    let heading = Tensor::<B, 4>::random(grid, unit, device)
        .greater_elem(0.5)
        .float();
    let class = one_hot(
        Tensor::<B, 5>::random([b, h, w, a, options.classes], unit, device).argmax(4),
        options.classes,
    );

    let predictions = DetectionPredictions {
        occupancy: activation::sigmoid(Tensor::random(grid, normal(1.0), device)),
        localization: localization.clone()
            + Tensor::random(localization.shape(), normal(0.2), device),
        size: size.clone() + Tensor::random(size.shape(), normal(0.2), device),
        angle: angle.clone() + Tensor::random(grid, normal(0.3), device),
        heading: activation::sigmoid(Tensor::random(grid, normal(1.0), device)),
        class: Tensor::random(class.shape(), normal(2.0), device),
    };
    let targets = DetectionTargets {
        occupancy,
        localization,
        size,
        angle,
        heading,
        class,
    };

    Ok((targets, predictions))
}

/// Expand `[.., 1]` class indices into a `[.., classes]` one-hot tensor.
fn one_hot<B: Backend>(indices: Tensor<B, 5, Int>, classes: usize) -> Tensor<B, 5> {
    let [b, h, w, a, _] = indices.dims();
    let shape = [b, h, w, a, classes];
    let range = Tensor::<B, 1, Int>::arange(0..classes as i64, &indices.device())
        .reshape([1, 1, 1, 1, classes])
        .expand(shape);

    indices.expand(shape).equal(range).float()
}

/// Evaluate every loss term of `config` on a synthetic batch.
///
/// # Errors
///
/// Returns an error if the options are invalid or the generated batch is rejected.
pub fn run_probe<B: Backend>(
    config: &PointPillarsLossConfig,
    options: &ProbeOptions,
    device: &B::Device,
) -> Result<LossReport> {
    B::seed(options.seed);

    let loss = config.init();
    let (targets, predictions) = synthetic_batch::<B>(options, device)?;
    let positives = PositiveMask::from_occupancy(&targets.occupancy).count();
    tracing::info!(
        grid = ?targets.grid(),
        classes = targets.num_classes(),
        positives,
        "synthetic batch generated"
    );

    let report = loss.forward(&targets, &predictions)?.report()?;
    for term in loss.losses() {
        tracing::info!(term = %term, value = report.get(term), "loss term");
    }
    tracing::info!(total = report.total, "probe completed");

    Ok(report)
}
