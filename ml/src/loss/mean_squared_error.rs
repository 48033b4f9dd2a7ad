use ndarray::{ArcArray, Array, IxDyn};

use crate::error::{Error, Result};
use crate::shared::{broadcast_shape, count, reduce_to_shape, MlNumber};

use super::{Loss, LossGradient, LossType};

/// Mean over the broadcast shape of `(predicted - target)^2`; the log-density
/// is not read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeanSquaredError;

impl MeanSquaredError {
    fn residuals<A: MlNumber>(
        predicted_output: &ArcArray<A, IxDyn>,
        target_output: &ArcArray<A, IxDyn>,
    ) -> Result<(Array<A, IxDyn>, A)> {
        let shape = broadcast_shape(predicted_output.shape(), target_output.shape())?;
        let mismatch = || Error::ShapeMismatch {
            left: predicted_output.shape().to_vec(),
            right: target_output.shape().to_vec(),
        };
        let predicted = predicted_output
            .broadcast(shape.as_slice())
            .ok_or_else(mismatch)?;
        let target = target_output
            .broadcast(shape.as_slice())
            .ok_or_else(mismatch)?;
        let residuals = &predicted - &target;
        if residuals.is_empty() {
            return Err(Error::EmptyReduction);
        }
        let n = count(residuals.len());
        Ok((residuals, n))
    }
}

impl<A: MlNumber> Loss<A> for MeanSquaredError {
    fn compute_loss(
        &self,
        predicted_output: ArcArray<A, IxDyn>,
        target_output: ArcArray<A, IxDyn>,
        _log_density: ArcArray<A, IxDyn>,
    ) -> Result<A> {
        let (residuals, n) = Self::residuals(&predicted_output, &target_output)?;
        let squared_sum = residuals.fold(A::zero(), |acc, &r| acc + r * r);
        Ok(squared_sum / n)
    }

    fn compute_derivative(
        &self,
        predicted_output: ArcArray<A, IxDyn>,
        target_output: ArcArray<A, IxDyn>,
        log_density: ArcArray<A, IxDyn>,
    ) -> Result<LossGradient<A>> {
        let (residuals, n) = Self::residuals(&predicted_output, &target_output)?;
        let gradient = residuals * (A::from_f64(2.0) / n);
        Ok(LossGradient {
            predicted_output: reduce_to_shape(gradient, predicted_output.shape()),
            log_density: Array::zeros(log_density.raw_dim()),
        })
    }

    fn loss_type(&self) -> LossType {
        LossType::MeanSquaredError
    }
}
