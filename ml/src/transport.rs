//! Debiased entropic optimal transport between weighted point clouds.
//!
//! The solver works in the log domain with epsilon-scaling: the temperature
//! starts at `diameter^p` and decays geometrically to `blur^p`, and every
//! step updates the cross potentials and the self potentials together,
//! averaging each with its previous value.

mod backend;
mod cost;
mod multiscale;
mod schedule;
mod solver;

use ndarray::{Array1, ArrayView1, ArrayView2};

pub use backend::{
    Backend, MULTISCALE_MAX_DIMENSION, MULTISCALE_MIN_PAIRS, TENSORIZED_MAX_PAIRS,
};
pub use cost::GroundCost;
pub use solver::Divergence;

use crate::error::{Error, Result};
use crate::shared::{count, MlNumber};
use cost::CostKernel;
use solver::Level;

/// Solver settings in working precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinkhornParameters<A> {
    pub blur: A,
    pub scaling: A,
    pub p: u32,
    pub backend: Backend,
    pub debias: bool,
    pub cluster_scale: Option<A>,
}

/// Samples (one per row) with non-negative weights summing to one.
#[derive(Debug, Clone)]
pub struct PointCloud<'a, A> {
    weights: Array1<A>,
    points: ArrayView2<'a, A>,
}

impl<'a, A: MlNumber> PointCloud<'a, A> {
    pub fn uniform(role: &'static str, points: ArrayView2<'a, A>) -> Result<Self> {
        let n = points.nrows();
        if n == 0 {
            return Err(Error::EmptySamples(role));
        }
        let weight = count::<A>(n).recip();
        Ok(Self {
            weights: Array1::from_elem(n, weight),
            points,
        })
    }

    /// Normalises `weights` to unit mass.
    pub fn weighted(
        role: &'static str,
        weights: ArrayView1<A>,
        points: ArrayView2<'a, A>,
    ) -> Result<Self> {
        if points.nrows() == 0 {
            return Err(Error::EmptySamples(role));
        }
        if weights.len() != points.nrows() {
            return Err(Error::InvalidWeights {
                role,
                reason: format!("{} weights for {} samples", weights.len(), points.nrows()),
            });
        }
        if weights.iter().any(|&w| w < A::zero()) {
            return Err(Error::InvalidWeights {
                role,
                reason: "weights must be non-negative".to_string(),
            });
        }
        let total = weights.fold(A::zero(), |acc, &w| acc + w);
        if !(total > A::zero()) {
            return Err(Error::InvalidWeights {
                role,
                reason: format!("total mass must be positive, got {total}"),
            });
        }
        Ok(Self {
            weights: &weights / total,
            points,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.points.nrows()
    }

    pub(crate) fn dimension(&self) -> usize {
        self.points.ncols()
    }

    pub(crate) fn points(&self) -> ArrayView2<'a, A> {
        self.points
    }
}

/// Sinkhorn divergence between `source` and `target`; the gradient, when
/// requested, is taken with respect to the source points.
pub fn sinkhorn_divergence<A: MlNumber>(
    parameters: &SinkhornParameters<A>,
    source: PointCloud<'_, A>,
    target: PointCloud<'_, A>,
    with_gradient: bool,
) -> Result<Divergence<A>> {
    let (n, m) = (source.len(), target.len());
    let dimension = source.dimension();
    if target.dimension() != dimension {
        return Err(Error::DimensionMismatch {
            generated: dimension,
            target: target.dimension(),
        });
    }
    let backend = parameters.backend.resolve(n, m, dimension, parameters.p)?;
    let ground = GroundCost::new(parameters.p);
    let diameter = schedule::diameter(source.points(), target.points());
    let schedule = schedule::epsilon_schedule(
        parameters.p,
        diameter,
        parameters.blur,
        parameters.scaling,
    );
    tracing::debug!(
        n,
        m,
        dimension,
        %backend,
        diameter = %diameter,
        steps = schedule.len(),
        "evaluating sinkhorn divergence"
    );

    let PointCloud { weights: a, points: x } = source;
    let PointCloud { weights: b, points: y } = target;
    let debias = parameters.debias;
    let divergence = match backend {
        Backend::Online => single_scale(
            Level::new(a, x.view(), b, y.view(), ground, debias, cost::Online::new),
            &schedule,
            with_gradient,
        ),
        Backend::Multiscale => {
            let cluster_scale = parameters.cluster_scale.unwrap_or_else(|| {
                multiscale::default_cluster_scale(diameter.max(parameters.blur), dimension)
            });
            multiscale::solve(
                a,
                x,
                b,
                y,
                ground,
                debias,
                &schedule,
                cluster_scale,
                with_gradient,
            )
        }
        // `resolve` never yields `Auto`
        Backend::Tensorized | Backend::Auto => single_scale(
            Level::new(a, x.view(), b, y.view(), ground, debias, cost::Tensorized::new),
            &schedule,
            with_gradient,
        ),
    };
    Ok(divergence)
}

fn single_scale<A: MlNumber, K: CostKernel<A>>(
    level: Level<A, K>,
    schedule: &[A],
    with_gradient: bool,
) -> Divergence<A> {
    let potentials = level.solve(schedule);
    level.divergence(&potentials, schedule[schedule.len() - 1], with_gradient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, array, concatenate, Array2, Axis};
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn parameters(backend: Backend) -> SinkhornParameters<f64> {
        SinkhornParameters {
            blur: 0.05,
            scaling: 0.7,
            p: 2,
            backend,
            debias: true,
            cluster_scale: None,
        }
    }

    fn divergence(parameters: &SinkhornParameters<f64>, x: &Array2<f64>, y: &Array2<f64>) -> f64 {
        let source = PointCloud::uniform("generated", x.view()).unwrap();
        let target = PointCloud::uniform("true", y.view()).unwrap();
        sinkhorn_divergence(parameters, source, target, false)
            .unwrap()
            .value
    }

    fn blob(rng: &mut StdRng, n: usize, center: [f64; 2], spread: f64) -> Array2<f64> {
        let noise = Array2::random_using((n, 2), Normal::new(0.0, spread).unwrap(), rng);
        noise + &arr1(&center)
    }

    #[test]
    fn test_weighted_cloud_normalises() {
        let points = array![[0.0], [1.0]];
        let cloud = PointCloud::weighted("true", array![1.0, 3.0].view(), points.view()).unwrap();
        assert_eq!(cloud.weights, array![0.25, 0.75]);
    }

    #[test]
    fn test_weighted_cloud_rejects_bad_weights() {
        let points = array![[0.0], [1.0]];
        for weights in [array![1.0], array![1.0, -1.0], array![0.0, 0.0]] {
            assert!(matches!(
                PointCloud::weighted("true", weights.view(), points.view()),
                Err(Error::InvalidWeights { role: "true", .. })
            ));
        }
    }

    #[test]
    fn test_empty_cloud_rejected() {
        let points = Array2::<f64>::zeros((0, 2));
        assert!(matches!(
            PointCloud::uniform("generated", points.view()),
            Err(Error::EmptySamples("generated"))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let x = array![[0.0, 1.0]];
        let y = array![[0.0, 1.0, 2.0]];
        let result = sinkhorn_divergence(
            &parameters(Backend::Auto),
            PointCloud::uniform("generated", x.view()).unwrap(),
            PointCloud::uniform("true", y.view()).unwrap(),
            false,
        );
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                generated: 2,
                target: 3
            })
        ));
    }

    #[test]
    fn test_translation_increases_divergence() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = blob(&mut rng, 30, [0.0, 0.0], 0.3);
        let near = &x + &array![[0.1, 0.0]];
        let far = &x + &array![[2.0, 0.0]];
        let params = parameters(Backend::Tensorized);
        let d_near = divergence(&params, &x, &near);
        let d_far = divergence(&params, &x, &far);
        assert!(d_near >= -1e-9);
        assert!(d_far > d_near);
        // a rigid shift by t costs about |t|^2 / 2 under the halved squared distance
        assert_relative_eq!(d_far, 2.0, max_relative = 0.1);
    }

    #[test]
    fn test_online_matches_tensorized() {
        let mut rng = StdRng::seed_from_u64(11);
        let x = blob(&mut rng, 25, [0.0, 0.0], 0.5);
        let y = blob(&mut rng, 17, [0.5, 0.3], 0.4);
        let tensorized = divergence(&parameters(Backend::Tensorized), &x, &y);
        let online = divergence(&parameters(Backend::Online), &x, &y);
        assert_relative_eq!(tensorized, online, max_relative = 1e-9);
    }

    #[test]
    fn test_multiscale_close_to_tensorized() {
        let mut rng = StdRng::seed_from_u64(3);
        let x = concatenate![
            Axis(0),
            blob(&mut rng, 40, [0.0, 0.0], 0.05),
            blob(&mut rng, 40, [2.0, 2.0], 0.05)
        ];
        let y = concatenate![
            Axis(0),
            blob(&mut rng, 30, [0.3, 0.0], 0.05),
            blob(&mut rng, 50, [2.0, 2.4], 0.05)
        ];
        let mut multiscale = parameters(Backend::Multiscale);
        multiscale.cluster_scale = Some(0.5);
        let coarse_to_fine = divergence(&multiscale, &x, &y);
        let exact = divergence(&parameters(Backend::Tensorized), &x, &y);
        assert_relative_eq!(coarse_to_fine, exact, max_relative = 0.1);
    }

    #[test]
    fn test_gradient_step_reduces_divergence() {
        let mut rng = StdRng::seed_from_u64(5);
        let x = blob(&mut rng, 20, [0.0, 0.0], 0.3);
        let y = blob(&mut rng, 20, [1.0, 0.5], 0.3);
        let params = parameters(Backend::Tensorized);
        let result = sinkhorn_divergence(
            &params,
            PointCloud::uniform("generated", x.view()).unwrap(),
            PointCloud::uniform("true", y.view()).unwrap(),
            true,
        )
        .unwrap();
        let gradient = result.gradient.unwrap();
        assert_eq!(gradient.shape(), x.shape());
        // gradients carry the 1/N sample weight, so step by N times the rate
        let stepped = &x - &(&gradient * (0.5 * x.nrows() as f64));
        assert!(divergence(&params, &stepped, &y) < result.value);
    }

    #[test]
    fn test_gradient_matches_central_differences() {
        let mut rng = StdRng::seed_from_u64(17);
        let x = blob(&mut rng, 8, [0.0, 0.0], 0.4);
        let y = blob(&mut rng, 8, [0.8, -0.3], 0.4);
        let params = SinkhornParameters {
            blur: 0.5,
            scaling: 0.99,
            ..parameters(Backend::Tensorized)
        };
        let gradient = sinkhorn_divergence(
            &params,
            PointCloud::uniform("generated", x.view()).unwrap(),
            PointCloud::uniform("true", y.view()).unwrap(),
            true,
        )
        .unwrap()
        .gradient
        .unwrap();

        let h = 1e-5;
        for ((i, k), &analytic) in gradient.indexed_iter() {
            let mut forward = x.clone();
            forward[[i, k]] += h;
            let mut backward = x.clone();
            backward[[i, k]] -= h;
            let numeric =
                (divergence(&params, &forward, &y) - divergence(&params, &backward, &y)) / (2.0 * h);
            assert_relative_eq!(analytic, numeric, epsilon = 2e-3, max_relative = 0.05);
        }
    }

    #[test]
    fn test_unequal_weights_shift_divergence() {
        let x = array![[0.0], [1.0]];
        let y = array![[0.0], [1.0]];
        let params = parameters(Backend::Tensorized);
        let balanced = sinkhorn_divergence(
            &params,
            PointCloud::uniform("generated", x.view()).unwrap(),
            PointCloud::uniform("true", y.view()).unwrap(),
            false,
        )
        .unwrap();
        let skewed = sinkhorn_divergence(
            &params,
            PointCloud::weighted("generated", array![0.9, 0.1].view(), x.view()).unwrap(),
            PointCloud::uniform("true", y.view()).unwrap(),
            false,
        )
        .unwrap();
        assert_relative_eq!(balanced.value, 0.0);
        assert!(skewed.value > 0.1);
    }
}
