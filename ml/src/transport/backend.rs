use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest `N * M` for which `Auto` still materialises full cost matrices.
pub const TENSORIZED_MAX_PAIRS: usize = 5000 * 5000;

/// `Auto` only clusters problems with more than this many pairs.
pub const MULTISCALE_MIN_PAIRS: usize = 10000 * 10000;

/// Largest feature dimension the grid clustering of `Multiscale` handles.
pub const MULTISCALE_MAX_DIMENSION: usize = 3;

/// Strategy used to evaluate pairwise costs inside the Sinkhorn solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Picks one of the strategies below from the problem size.
    #[default]
    Auto,
    /// Full cost matrices computed once per evaluation.
    Tensorized,
    /// Costs recomputed inside every softmin, linear memory.
    Online,
    /// Coarse-to-fine annealing on grid-clustered point clouds.
    Multiscale,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Auto => "auto",
            Backend::Tensorized => "tensorized",
            Backend::Online => "online",
            Backend::Multiscale => "multiscale",
        }
    }

    /// Resolves `Auto` to a concrete strategy and checks that the strategy can
    /// serve `n` against `m` samples in `dimension` features with cost
    /// exponent `p`.
    pub fn resolve(self, n: usize, m: usize, dimension: usize, p: u32) -> Result<Backend> {
        let resolved = match self {
            Backend::Auto => {
                let pairs = n.saturating_mul(m);
                if pairs <= TENSORIZED_MAX_PAIRS {
                    Backend::Tensorized
                } else if dimension <= MULTISCALE_MAX_DIMENSION
                    && pairs > MULTISCALE_MIN_PAIRS
                    && p == 2
                {
                    Backend::Multiscale
                } else {
                    Backend::Online
                }
            }
            Backend::Multiscale if dimension > MULTISCALE_MAX_DIMENSION => {
                return Err(Error::UnsupportedBackend {
                    backend: self,
                    reason: format!(
                        "grid clustering needs at most {MULTISCALE_MAX_DIMENSION} features, got {dimension}"
                    ),
                });
            }
            concrete => concrete,
        };
        if self == Backend::Auto {
            tracing::debug!(n, m, dimension, p, backend = %resolved, "resolved automatic backend");
        }
        Ok(resolved)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Backend::Auto),
            "tensorized" => Ok(Backend::Tensorized),
            "online" => Ok(Backend::Online),
            "multiscale" => Ok(Backend::Multiscale),
            _ => Err(Error::UnknownBackend(name.to_string())),
        }
    }
}
