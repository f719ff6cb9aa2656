//! Hyperparameters of the detection loss.

use std::path::Path;

use burn::config::Config;

use crate::{
    classification::ClassLossConfig,
    error::{PointPillarsLossError, PointPillarsLossResult},
    focal::OccupancyFocalLossConfig,
    heading::HeadingLossConfig,
    loss::PointPillarsLoss,
    regression::BoxRegressionLossConfig,
};

/// Configuration for the [PointPillars loss](PointPillarsLoss).
///
/// Defaults follow the reference PointPillars training parameters.
#[derive(Config, Debug)]
pub struct PointPillarsLossConfig {
    /// Focal loss balance between positive and negative anchors.
    #[config(default = 0.25)]
    pub alpha: f64,
    /// Focal loss focusing exponent.
    #[config(default = 2.0)]
    pub gamma: f64,
    #[config(default = 3.0)]
    pub focal_weight: f64,
    #[config(default = 2.0)]
    pub loc_weight: f64,
    #[config(default = 2.0)]
    pub size_weight: f64,
    #[config(default = 1.0)]
    pub angle_weight: f64,
    #[config(default = 0.2)]
    pub heading_weight: f64,
    #[config(default = 0.5)]
    pub class_weight: f64,
    /// Huber transition point shared by the regression terms.
    #[config(default = 1.0)]
    pub huber_delta: f64,
    /// Percentile of negative focal losses above which negatives are mined.
    #[config(default = 90.0)]
    pub hard_negative_percentile: f64,
    /// Probability clipping constant of the binary cross-entropies.
    #[config(default = 1e-7)]
    pub epsilon: f64,
}

impl PointPillarsLossConfig {
    /// Initialize the [PointPillars loss](PointPillarsLoss).
    ///
    /// Values are stored as given; call [`validate`](Self::validate) to check ranges.
    pub fn init(&self) -> PointPillarsLoss {
        let regression = |weight| {
            BoxRegressionLossConfig::new()
                .with_weight(weight)
                .with_delta(self.huber_delta)
                .init()
        };

        PointPillarsLoss {
            occupancy: OccupancyFocalLossConfig::new()
                .with_alpha(self.alpha)
                .with_gamma(self.gamma)
                .with_weight(self.focal_weight)
                .with_hard_negative_percentile(self.hard_negative_percentile)
                .with_epsilon(self.epsilon)
                .init(),
            localization: regression(self.loc_weight),
            size: regression(self.size_weight),
            angle: regression(self.angle_weight),
            heading: HeadingLossConfig::new()
                .with_weight(self.heading_weight)
                .with_epsilon(self.epsilon)
                .init(),
            class: ClassLossConfig::new().with_weight(self.class_weight).init(),
        }
    }

    /// Load a configuration from a JSON file and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`PointPillarsLossError::ConfigLoad`] if the file cannot be read or
    /// parsed, or [`PointPillarsLossError::InvalidParameter`] if a value is out of range.
    pub fn from_file(path: impl AsRef<Path>) -> PointPillarsLossResult<Self> {
        let path = path.as_ref();
        let config = Self::load(path).map_err(|e| PointPillarsLossError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every hyperparameter lies in its meaningful range.
    ///
    /// # Errors
    ///
    /// Returns [`PointPillarsLossError::InvalidParameter`] for the first offending value.
    pub fn validate(&self) -> PointPillarsLossResult<()> {
        check(
            "alpha",
            self.alpha,
            (0.0..=1.0).contains(&self.alpha),
            "must lie in [0, 1]",
        )?;
        check("gamma", self.gamma, self.gamma >= 0.0, "must be non-negative")?;
        for (parameter, weight) in [
            ("focal_weight", self.focal_weight),
            ("loc_weight", self.loc_weight),
            ("size_weight", self.size_weight),
            ("angle_weight", self.angle_weight),
            ("heading_weight", self.heading_weight),
            ("class_weight", self.class_weight),
        ] {
            check(parameter, weight, weight >= 0.0, "must be non-negative")?;
        }
        check(
            "huber_delta",
            self.huber_delta,
            self.huber_delta > 0.0,
            "must be positive",
        )?;
        check(
            "hard_negative_percentile",
            self.hard_negative_percentile,
            (0.0..=100.0).contains(&self.hard_negative_percentile),
            "must lie in [0, 100]",
        )?;
        check(
            "epsilon",
            self.epsilon,
            self.epsilon > 0.0 && self.epsilon < 0.5,
            "must lie in (0, 0.5)",
        )
    }
}

fn check(
    parameter: &'static str,
    value: f64,
    valid: bool,
    requirement: &str,
) -> PointPillarsLossResult<()> {
    if value.is_finite() && valid {
        Ok(())
    } else {
        Err(PointPillarsLossError::InvalidParameter {
            parameter,
            reason: format!("{requirement}, got {value}"),
        })
    }
}
