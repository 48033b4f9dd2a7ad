use derive_builder::Builder;
use ndarray::{ArcArray, Array, Array2, ArrayView1, ArrayView2, Axis, Ix2, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shared::MlNumber;
use crate::transport::{self, Backend, Divergence, PointCloud, SinkhornParameters};

use super::{Loss, LossGradient, LossType};

pub const DEFAULT_BLUR: f64 = 0.05;
pub const DEFAULT_SCALING: f64 = 0.7;
pub const DEFAULT_P: u32 = 2;

/// Hyperparameters of a Sinkhorn divergence loss.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default)]
#[serde(default)]
pub struct SinkhornConfig {
    /// Entropic blur radius; the last solver temperature is `blur^p`.
    pub blur: f64,
    /// Ratio between successive blur radii while annealing. Values close to
    /// 1 are slower and more accurate.
    pub scaling: f64,
    /// Exponent of the ground cost `|x - y|^p / p`.
    pub p: u32,
    pub backend: Backend,
    /// Subtracts the self-transport terms so that identical clouds score zero.
    pub debias: bool,
    /// Grid cell side used by the multiscale backend.
    #[builder(setter(strip_option))]
    pub cluster_scale: Option<f64>,
}

impl Default for SinkhornConfig {
    fn default() -> Self {
        Self {
            blur: DEFAULT_BLUR,
            scaling: DEFAULT_SCALING,
            p: DEFAULT_P,
            backend: Backend::Auto,
            debias: true,
            cluster_scale: None,
        }
    }
}

impl SinkhornConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.blur.is_finite() && self.blur > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "blur must be positive and finite, got {}",
                self.blur
            )));
        }
        if !(self.scaling > 0.0 && self.scaling < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "scaling must lie in (0, 1), got {}",
                self.scaling
            )));
        }
        if self.p == 0 {
            return Err(Error::InvalidConfig(
                "cost exponent p must be at least 1".to_string(),
            ));
        }
        if let Some(scale) = self.cluster_scale {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "cluster_scale must be positive and finite, got {scale}"
                )));
            }
        }
        Ok(())
    }
}

impl From<SinkhornConfigBuilderError> for Error {
    fn from(error: SinkhornConfigBuilderError) -> Self {
        Error::InvalidConfig(error.to_string())
    }
}

/// Debiased Sinkhorn divergence between generated and true samples.
///
/// Built once from a [`SinkhornConfig`]; evaluation never mutates it, so one
/// instance can score many batches, from several threads if needed.
#[derive(Debug, Clone)]
pub struct SinkhornDivergence<A> {
    config: SinkhornConfig,
    parameters: SinkhornParameters<A>,
}

impl<A: MlNumber> SinkhornDivergence<A> {
    pub fn new(config: SinkhornConfig) -> Result<Self> {
        config.validate()?;
        if config.cluster_scale.is_some()
            && matches!(config.backend, Backend::Tensorized | Backend::Online)
        {
            tracing::warn!(
                backend = %config.backend,
                "cluster_scale is ignored outside the multiscale backend"
            );
        }
        let parameters = SinkhornParameters {
            blur: A::from_f64(config.blur),
            scaling: A::from_f64(config.scaling),
            p: config.p,
            backend: config.backend,
            debias: config.debias,
            cluster_scale: config.cluster_scale.map(A::from_f64),
        };
        tracing::debug!(
            blur = config.blur,
            scaling = config.scaling,
            p = config.p,
            backend = %config.backend,
            debias = config.debias,
            "configured sinkhorn divergence"
        );
        Ok(Self { config, parameters })
    }

    pub fn config(&self) -> &SinkhornConfig {
        &self.config
    }

    /// Divergence between two uniformly weighted clouds, one sample per row.
    pub fn evaluate(&self, generated: ArrayView2<A>, true_samples: ArrayView2<A>) -> Result<A> {
        Ok(self.evaluate_with_gradient(generated, true_samples, false)?.value)
    }

    /// Divergence between weighted clouds; each weight vector is normalised
    /// to unit mass.
    pub fn evaluate_weighted(
        &self,
        generated_weights: ArrayView1<A>,
        generated: ArrayView2<A>,
        true_weights: ArrayView1<A>,
        true_samples: ArrayView2<A>,
    ) -> Result<A> {
        let source = PointCloud::weighted("generated", generated_weights, generated)?;
        let target = PointCloud::weighted("true", true_weights, true_samples)?;
        Ok(transport::sinkhorn_divergence(&self.parameters, source, target, false)?.value)
    }

    pub fn evaluate_with_gradient(
        &self,
        generated: ArrayView2<A>,
        true_samples: ArrayView2<A>,
        with_gradient: bool,
    ) -> Result<Divergence<A>> {
        let source = PointCloud::uniform("generated", generated)?;
        let target = PointCloud::uniform("true", true_samples)?;
        transport::sinkhorn_divergence(&self.parameters, source, target, with_gradient)
    }
}

/// Builds a Sinkhorn divergence loss. The defaults are [`DEFAULT_BLUR`],
/// [`DEFAULT_SCALING`], [`DEFAULT_P`] and [`Backend::Auto`], also available
/// as `SinkhornConfig::default()`.
pub fn make_sinkhorn_divergence<A: MlNumber>(
    blur: f64,
    scaling: f64,
    p: u32,
    backend: Backend,
) -> Result<SinkhornDivergence<A>> {
    SinkhornDivergence::new(SinkhornConfig {
        blur,
        scaling,
        p,
        backend,
        ..SinkhornConfig::default()
    })
}

/// Reads a 1D array as one feature per sample and a 2D array as one sample
/// per row.
fn samples<'a, A>(
    array: &'a ArcArray<A, IxDyn>,
    role: &'static str,
) -> Result<ArrayView2<'a, A>> {
    let invalid = || Error::InvalidSampleShape {
        role,
        shape: array.shape().to_vec(),
    };
    let view = match array.ndim() {
        1 => array.view().insert_axis(Axis(1)),
        2 => array.view(),
        _ => return Err(invalid()),
    };
    view.into_dimensionality::<Ix2>().map_err(|_| invalid())
}

impl<A: MlNumber> Loss<A> for SinkhornDivergence<A> {
    fn compute_loss(
        &self,
        predicted_output: ArcArray<A, IxDyn>,
        target_output: ArcArray<A, IxDyn>,
        _log_density: ArcArray<A, IxDyn>,
    ) -> Result<A> {
        self.evaluate(
            samples(&predicted_output, "generated")?,
            samples(&target_output, "true")?,
        )
    }

    fn compute_derivative(
        &self,
        predicted_output: ArcArray<A, IxDyn>,
        target_output: ArcArray<A, IxDyn>,
        log_density: ArcArray<A, IxDyn>,
    ) -> Result<LossGradient<A>> {
        let generated = samples(&predicted_output, "generated")?;
        let divergence =
            self.evaluate_with_gradient(generated, samples(&target_output, "true")?, true)?;
        let mut gradient = divergence
            .gradient
            .unwrap_or_else(|| Array2::zeros(generated.raw_dim()))
            .into_dyn();
        if predicted_output.ndim() == 1 {
            gradient = gradient.remove_axis(Axis(1));
        }
        Ok(LossGradient {
            predicted_output: gradient,
            log_density: Array::zeros(log_density.raw_dim()),
        })
    }

    fn loss_type(&self) -> LossType {
        LossType::SinkhornDivergence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::unused_input;
    use approx::assert_relative_eq;
    use ndarray::{array, Array1, Array3};
    use proptest::prelude::*;

    fn ten_points() -> (ArcArray<f64, IxDyn>, ArcArray<f64, IxDyn>) {
        let generated = array![
            [0.1, 0.2],
            [0.4, 0.9],
            [0.8, 0.3],
            [1.3, 1.1],
            [-0.2, 0.6],
            [0.6, -0.4],
            [1.0, 0.7],
            [-0.5, -0.1],
            [0.2, 1.4],
            [1.5, 0.0]
        ];
        let truth = array![
            [0.3, 0.1],
            [0.5, 1.2],
            [1.1, 0.4],
            [1.6, 0.9],
            [-0.1, 0.9],
            [0.7, -0.2],
            [1.2, 1.3],
            [-0.3, 0.2],
            [0.0, 1.1],
            [1.8, 0.3]
        ];
        (
            generated.into_shared().into_dyn(),
            truth.into_shared().into_dyn(),
        )
    }

    fn with_backend(backend: Backend) -> SinkhornDivergence<f64> {
        make_sinkhorn_divergence(DEFAULT_BLUR, DEFAULT_SCALING, DEFAULT_P, backend).unwrap()
    }

    #[test]
    fn test_infinite_coordinates_give_non_finite_value() {
        let generated = array![[0.0, 0.0], [f64::INFINITY, 1.0]];
        let truth = array![[0.0, 0.0], [1.0, 1.0]];
        for backend in [Backend::Auto, Backend::Online, Backend::Multiscale] {
            let value = with_backend(backend)
                .evaluate(generated.view(), truth.view())
                .unwrap();
            assert!(!value.is_finite());
        }
    }

    #[test]
    fn test_single_precision_overflowing_extent() {
        let generated = array![[0.0_f32, 0.0], [3e19, 0.0]];
        let truth = array![[0.0_f32, 0.0], [1.0, 1.0]];
        let loss = make_sinkhorn_divergence::<f32>(0.05, 0.7, 2, Backend::Auto).unwrap();
        let value = loss.evaluate(generated.view(), truth.view()).unwrap();
        assert!(!value.is_finite());
    }

    #[test]
    fn test_weighted_matches_uniform_for_flat_weights() {
        let (generated, truth) = ten_points();
        let generated = generated.into_dimensionality::<Ix2>().unwrap();
        let truth = truth.into_dimensionality::<Ix2>().unwrap();
        let loss = with_backend(Backend::Tensorized);
        let flat = Array1::from_elem(10, 2.0);
        let weighted = loss
            .evaluate_weighted(flat.view(), generated.view(), flat.view(), truth.view())
            .unwrap();
        let uniform = loss.evaluate(generated.view(), truth.view()).unwrap();
        assert_relative_eq!(weighted, uniform, max_relative = 1e-12);

        let mut negative = flat.clone();
        negative[3] = -1.0;
        assert!(matches!(
            loss.evaluate_weighted(negative.view(), generated.view(), flat.view(), truth.view()),
            Err(Error::InvalidWeights { .. })
        ));
    }

    #[test]
    fn test_default_factory_is_deterministic() {
        let loss = SinkhornDivergence::<f64>::new(SinkhornConfig::default()).unwrap();
        let (generated, truth) = ten_points();
        let first = loss
            .compute_loss(generated.clone(), truth.clone(), unused_input())
            .unwrap();
        let second = loss.compute_loss(generated, truth, unused_input()).unwrap();
        assert_eq!(first, second);
        assert!(first > 0.0);
    }

    #[test]
    fn test_self_divergence_is_zero() {
        let (generated, _) = ten_points();
        for blur in [0.01, 0.05, 0.5, 2.0] {
            let loss = make_sinkhorn_divergence::<f64>(blur, 0.7, 2, Backend::Auto).unwrap();
            let value = loss
                .compute_loss(generated.clone(), generated.clone(), unused_input())
                .unwrap();
            assert_relative_eq!(value, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_backends_agree() {
        let (generated, truth) = ten_points();
        let reference = with_backend(Backend::Tensorized)
            .compute_loss(generated.clone(), truth.clone(), unused_input())
            .unwrap();
        for backend in [Backend::Auto, Backend::Online, Backend::Multiscale] {
            let value = with_backend(backend)
                .compute_loss(generated.clone(), truth.clone(), unused_input())
                .unwrap();
            assert_relative_eq!(value, reference, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_ignores_log_density() {
        let loss = with_backend(Backend::Auto);
        let (generated, truth) = ten_points();
        let without = loss
            .compute_loss(generated.clone(), truth.clone(), unused_input())
            .unwrap();
        let with = loss
            .compute_loss(generated, truth, array![-1.0, 4.0].into_shared().into_dyn())
            .unwrap();
        assert_eq!(without, with);
    }

    #[test]
    fn test_unequal_sample_counts() {
        let loss = with_backend(Backend::Auto);
        let generated = array![[0.0, 0.0], [1.0, 1.0], [0.5, 0.2]];
        let truth = array![[0.1, 0.1], [0.9, 1.1]];
        let value = loss.evaluate(generated.view(), truth.view()).unwrap();
        assert!(value.is_finite());
        assert!(value > 0.0);
    }

    #[test]
    fn test_one_dimensional_inputs_are_feature_columns() {
        let loss = with_backend(Backend::Auto);
        let flat = loss
            .compute_loss(
                array![0.0, 0.5, 1.0].into_shared().into_dyn(),
                array![0.2, 0.9].into_shared().into_dyn(),
                unused_input(),
            )
            .unwrap();
        let columns = loss
            .evaluate(array![[0.0], [0.5], [1.0]].view(), array![[0.2], [0.9]].view())
            .unwrap();
        assert_eq!(flat, columns);
    }

    #[test]
    fn test_sample_errors() {
        let loss = with_backend(Backend::Auto);
        let mismatch = loss.compute_loss(
            array![[0.0, 1.0]].into_shared().into_dyn(),
            array![[0.0, 1.0, 2.0]].into_shared().into_dyn(),
            unused_input(),
        );
        assert!(matches!(mismatch, Err(Error::DimensionMismatch { .. })));

        let empty = loss.compute_loss(
            Array2::<f64>::zeros((0, 2)).into_shared().into_dyn(),
            array![[0.0, 1.0]].into_shared().into_dyn(),
            unused_input(),
        );
        assert!(matches!(empty, Err(Error::EmptySamples("generated"))));

        let cube = loss.compute_loss(
            Array3::<f64>::zeros((2, 2, 2)).into_shared().into_dyn(),
            array![[0.0, 1.0]].into_shared().into_dyn(),
            unused_input(),
        );
        assert!(matches!(
            cube,
            Err(Error::InvalidSampleShape { role: "generated", .. })
        ));
    }

    #[test]
    fn test_multiscale_rejects_four_features() {
        let loss = with_backend(Backend::Multiscale);
        let points = Array2::<f64>::zeros((3, 4));
        assert!(matches!(
            loss.evaluate(points.view(), points.view()),
            Err(Error::UnsupportedBackend { .. })
        ));
    }

    #[test]
    fn test_invalid_configurations() {
        let invalid = [
            (0.0, 0.7, 2),
            (f64::NAN, 0.7, 2),
            (0.05, 1.0, 2),
            (0.05, 0.0, 2),
            (0.05, 0.7, 0),
        ];
        for (blur, scaling, p) in invalid {
            assert!(matches!(
                make_sinkhorn_divergence::<f64>(blur, scaling, p, Backend::Auto),
                Err(Error::InvalidConfig(_))
            ));
        }
        let config = SinkhornConfigBuilder::default()
            .cluster_scale(-1.0)
            .build()
            .unwrap();
        assert!(matches!(
            SinkhornDivergence::<f32>::new(config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_builder_defaults() {
        let config = SinkhornConfigBuilder::default()
            .blur(0.1)
            .backend(Backend::Online)
            .build()
            .unwrap();
        assert_eq!(config.blur, 0.1);
        assert_eq!(config.scaling, DEFAULT_SCALING);
        assert_eq!(config.p, DEFAULT_P);
        assert_eq!(config.backend, Backend::Online);
        assert!(config.debias);
        assert_eq!(config.cluster_scale, None);
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: SinkhornConfig =
            serde_json::from_str(r#"{"blur": 0.2, "backend": "tensorized"}"#).unwrap();
        assert_eq!(
            config,
            SinkhornConfig {
                blur: 0.2,
                backend: Backend::Tensorized,
                ..SinkhornConfig::default()
            }
        );
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SinkhornConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_derivative_shapes() {
        let loss = with_backend(Backend::Auto);
        let (generated, truth) = ten_points();
        let log_density = array![0.1, 0.2, 0.3].into_shared().into_dyn();
        let gradient = loss
            .compute_derivative(generated.clone(), truth, log_density)
            .unwrap();
        assert_eq!(gradient.predicted_output.shape(), generated.shape());
        assert_eq!(gradient.log_density, Array::<f64, _>::zeros(IxDyn(&[3])));

        let flat = loss
            .compute_derivative(
                array![0.0, 0.5, 1.0].into_shared().into_dyn(),
                array![0.2, 0.9].into_shared().into_dyn(),
                unused_input(),
            )
            .unwrap();
        assert_eq!(flat.predicted_output.shape(), &[3]);
    }

    #[test]
    fn test_single_precision() {
        let loss = make_sinkhorn_divergence::<f32>(0.05, 0.7, 2, Backend::Auto).unwrap();
        let x = array![[0.0_f32, 0.0], [1.0, 0.0]];
        let y = array![[0.0_f32, 1.0], [1.0, 1.0]];
        let value = loss.evaluate(x.view(), y.view()).unwrap();
        // shifting both points by one unit costs 1^2 / 2
        assert_relative_eq!(value, 0.5, max_relative = 0.05);
    }

    proptest! {
        #[test]
        fn prop_divergence_symmetric(
            coords in prop::collection::vec(-2.0f64..2.0, 4..24),
            shift in -1.0f64..1.0,
        ) {
            let n = coords.len() / 2;
            let x = Array2::from_shape_vec((n, 2), coords[..2 * n].to_vec()).unwrap();
            let y = x.mapv(|v| v * 0.8 + shift);
            let loss = with_backend(Backend::Tensorized);
            let forward = loss.evaluate(x.view(), y.view()).unwrap();
            let backward = loss.evaluate(y.view(), x.view()).unwrap();
            prop_assert!((forward - backward).abs() <= 1e-12 * forward.abs().max(1.0));
        }

        #[test]
        fn prop_self_divergence_zero(coords in prop::collection::vec(-5.0f64..5.0, 3..30)) {
            let x = Array2::from_shape_vec((coords.len(), 1), coords).unwrap();
            let loss = with_backend(Backend::Online);
            prop_assert_eq!(loss.evaluate(x.view(), x.view()).unwrap(), 0.0);
        }
    }
}
