use std::fmt;
use std::str::FromStr;

use ndarray::{ArcArray, Array, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shared::MlNumber;

pub mod mean_squared_error;
pub mod negative_log_likelihood;
pub mod selection;
pub mod sinkhorn_divergence;

/// Uniform interface of every training loss.
///
/// Each loss receives the same three arguments and uses the subset it needs;
/// the others may be empty arrays (see [`unused_input`]).
pub trait Loss<A: MlNumber> {
    fn compute_loss(
        &self,
        predicted_output: ArcArray<A, IxDyn>,
        target_output: ArcArray<A, IxDyn>,
        log_density: ArcArray<A, IxDyn>,
    ) -> Result<A>;

    fn compute_derivative(
        &self,
        predicted_output: ArcArray<A, IxDyn>,
        target_output: ArcArray<A, IxDyn>,
        log_density: ArcArray<A, IxDyn>,
    ) -> Result<LossGradient<A>>;

    fn loss_type(&self) -> LossType;
}

/// Gradient of a scalar loss with respect to the arguments a trainer can
/// differentiate through. Arguments a loss ignores get zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct LossGradient<A> {
    pub predicted_output: Array<A, IxDyn>,
    pub log_density: Array<A, IxDyn>,
}

/// Zero-length placeholder for an argument the chosen loss ignores.
pub fn unused_input<A: MlNumber>() -> ArcArray<A, IxDyn> {
    ArcArray::zeros(IxDyn(&[0]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    NegativeLogLikelihood,
    MeanSquaredError,
    SinkhornDivergence,
}

impl LossType {
    pub fn short_name(&self) -> &'static str {
        match self {
            LossType::NegativeLogLikelihood => "nll",
            LossType::MeanSquaredError => "mse",
            LossType::SinkhornDivergence => "sinkhorn",
        }
    }
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for LossType {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "nll" | "negative_log_likelihood" => Ok(LossType::NegativeLogLikelihood),
            "mse" | "mean_squared_error" => Ok(LossType::MeanSquaredError),
            "sinkhorn" | "sinkhorn_divergence" => Ok(LossType::SinkhornDivergence),
            _ => Err(Error::UnknownLoss(name.to_string())),
        }
    }
}
