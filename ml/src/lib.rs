//! Training losses for generative models of a data manifold.
//!
//! Every loss implements [`Loss`] and is called the same way,
//! `compute_loss(predicted_output, target_output, log_density)`, whichever
//! arguments it actually reads. [`AnyLoss`] picks one from a [`LossConfig`].

pub mod error;
pub mod loss;
pub mod shared;
pub mod transport;

pub use error::{Error, Result};
pub use loss::mean_squared_error::MeanSquaredError;
pub use loss::negative_log_likelihood::NegativeLogLikelihood;
pub use loss::selection::{AnyLoss, LossConfig};
pub use loss::sinkhorn_divergence::{
    make_sinkhorn_divergence, SinkhornConfig, SinkhornConfigBuilder, SinkhornDivergence,
    DEFAULT_BLUR, DEFAULT_P, DEFAULT_SCALING,
};
pub use loss::{unused_input, Loss, LossGradient, LossType};
pub use shared::MlNumber;
pub use transport::Backend;
