//! Picking one loss by name or configuration, behind a single type.

use ndarray::{ArcArray, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::shared::MlNumber;

use super::mean_squared_error::MeanSquaredError;
use super::negative_log_likelihood::NegativeLogLikelihood;
use super::sinkhorn_divergence::{SinkhornConfig, SinkhornDivergence};
use super::{Loss, LossGradient, LossType};

/// Serialisable loss selection, tagged by `type`.
///
/// ```json
/// {"type": "sinkhorn", "blur": 0.01, "backend": "online"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LossConfig {
    #[serde(alias = "negative_log_likelihood")]
    Nll,
    #[serde(alias = "mean_squared_error")]
    Mse,
    #[serde(alias = "sinkhorn_divergence")]
    Sinkhorn(SinkhornConfig),
}

impl LossConfig {
    pub fn loss_type(&self) -> LossType {
        match self {
            LossConfig::Nll => LossType::NegativeLogLikelihood,
            LossConfig::Mse => LossType::MeanSquaredError,
            LossConfig::Sinkhorn(_) => LossType::SinkhornDivergence,
        }
    }
}

impl From<LossType> for LossConfig {
    fn from(loss_type: LossType) -> Self {
        match loss_type {
            LossType::NegativeLogLikelihood => LossConfig::Nll,
            LossType::MeanSquaredError => LossConfig::Mse,
            LossType::SinkhornDivergence => LossConfig::Sinkhorn(SinkhornConfig::default()),
        }
    }
}

/// One of the available losses, dispatched through [`Loss`].
#[derive(Debug, Clone)]
pub enum AnyLoss<A> {
    Nll(NegativeLogLikelihood),
    Mse(MeanSquaredError),
    Sinkhorn(SinkhornDivergence<A>),
}

impl<A: MlNumber> AnyLoss<A> {
    pub fn from_config(config: &LossConfig) -> Result<Self> {
        let loss = match config {
            LossConfig::Nll => AnyLoss::Nll(NegativeLogLikelihood),
            LossConfig::Mse => AnyLoss::Mse(MeanSquaredError),
            LossConfig::Sinkhorn(sinkhorn) => {
                AnyLoss::Sinkhorn(SinkhornDivergence::new(sinkhorn.clone())?)
            }
        };
        tracing::debug!(loss = %config.loss_type(), "selected loss");
        Ok(loss)
    }

    /// The named loss with default hyperparameters.
    pub fn from_name(name: &str) -> Result<Self> {
        let loss_type: LossType = name.parse()?;
        Self::from_config(&LossConfig::from(loss_type))
    }

    /// Configuration that rebuilds this loss through [`AnyLoss::from_config`].
    pub fn config(&self) -> LossConfig {
        match self {
            AnyLoss::Nll(_) => LossConfig::Nll,
            AnyLoss::Mse(_) => LossConfig::Mse,
            AnyLoss::Sinkhorn(loss) => LossConfig::Sinkhorn(loss.config().clone()),
        }
    }

    fn as_loss(&self) -> &dyn Loss<A> {
        match self {
            AnyLoss::Nll(loss) => loss,
            AnyLoss::Mse(loss) => loss,
            AnyLoss::Sinkhorn(loss) => loss,
        }
    }
}

impl<A: MlNumber> Loss<A> for AnyLoss<A> {
    fn compute_loss(
        &self,
        predicted_output: ArcArray<A, IxDyn>,
        target_output: ArcArray<A, IxDyn>,
        log_density: ArcArray<A, IxDyn>,
    ) -> Result<A> {
        self.as_loss()
            .compute_loss(predicted_output, target_output, log_density)
    }

    fn compute_derivative(
        &self,
        predicted_output: ArcArray<A, IxDyn>,
        target_output: ArcArray<A, IxDyn>,
        log_density: ArcArray<A, IxDyn>,
    ) -> Result<LossGradient<A>> {
        self.as_loss()
            .compute_derivative(predicted_output, target_output, log_density)
    }

    fn loss_type(&self) -> LossType {
        self.as_loss().loss_type()
    }
}
