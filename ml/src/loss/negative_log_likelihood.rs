use ndarray::{ArcArray, Array, IxDyn};

use crate::error::{Error, Result};
use crate::shared::{count, MlNumber};

use super::{Loss, LossGradient, LossType};

/// `-mean(log_density)` over every element; predicted and target outputs are
/// not read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegativeLogLikelihood;

impl<A: MlNumber> Loss<A> for NegativeLogLikelihood {
    fn compute_loss(
        &self,
        _predicted_output: ArcArray<A, IxDyn>,
        _target_output: ArcArray<A, IxDyn>,
        log_density: ArcArray<A, IxDyn>,
    ) -> Result<A> {
        if log_density.is_empty() {
            return Err(Error::EmptyReduction);
        }
        let n: A = count(log_density.len());
        Ok(-(log_density.sum() / n))
    }

    fn compute_derivative(
        &self,
        predicted_output: ArcArray<A, IxDyn>,
        _target_output: ArcArray<A, IxDyn>,
        log_density: ArcArray<A, IxDyn>,
    ) -> Result<LossGradient<A>> {
        if log_density.is_empty() {
            return Err(Error::EmptyReduction);
        }
        let n: A = count(log_density.len());
        Ok(LossGradient {
            predicted_output: Array::zeros(predicted_output.raw_dim()),
            log_density: Array::from_elem(log_density.raw_dim(), -n.recip()),
        })
    }

    fn loss_type(&self) -> LossType {
        LossType::NegativeLogLikelihood
    }
}
