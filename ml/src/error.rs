use thiserror::Error;

use crate::transport::Backend;

/// Errors raised while configuring or evaluating a loss.
#[derive(Debug, Error)]
pub enum Error {
    /// Two arrays cannot be broadcast to a common shape.
    #[error("shapes {left:?} and {right:?} cannot be broadcast together")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },

    /// Generated and true samples live in spaces of different dimension.
    #[error("feature dimension mismatch: generated samples have {generated}, true samples have {target}")]
    DimensionMismatch { generated: usize, target: usize },

    #[error("{0} sample set is empty")]
    EmptySamples(&'static str),

    #[error("{role} samples must be a 1D or 2D array, got shape {shape:?}")]
    InvalidSampleShape { role: &'static str, shape: Vec<usize> },

    /// A mean was requested over zero elements.
    #[error("cannot take the mean of an empty array")]
    EmptyReduction,

    #[error("invalid {role} weights: {reason}")]
    InvalidWeights { role: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown backend `{0}`, expected one of: auto, tensorized, online, multiscale")]
    UnknownBackend(String),

    /// The selected backend cannot serve this problem.
    #[error("backend `{backend}` unsupported: {reason}")]
    UnsupportedBackend { backend: Backend, reason: String },

    #[error("unknown loss `{0}`, expected one of: nll, mse, sinkhorn")]
    UnknownLoss(String),
}

pub type Result<T> = std::result::Result<T, Error>;
