//! Coarse-to-fine annealing: the first temperatures run on grid-clustered
//! clouds, the remaining ones on the full clouds.

use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::cost::{GroundCost, Online};
use super::solver::{Divergence, Kernels, Level};
use crate::shared::MlNumber;

/// Cell side giving roughly 2000 occupied cells over the bounding box.
pub(crate) fn default_cluster_scale<A: MlNumber>(diameter: A, dimension: usize) -> A {
    let d = A::from_f64(dimension.max(1) as f64);
    diameter / (d.sqrt() * A::from_f64(2000.0).powf(d.recip()))
}

/// Weighted centroids of the occupied cells of a regular grid.
#[derive(Debug, Clone)]
pub(crate) struct Clusters<A> {
    pub centroids: Array2<A>,
    pub weights: Array1<A>,
}

impl<A> Clusters<A> {
    pub(crate) fn len(&self) -> usize {
        self.weights.len()
    }
}

pub(crate) fn grid_cluster<A: MlNumber>(
    points: ArrayView2<A>,
    weights: &Array1<A>,
    scale: A,
) -> Clusters<A> {
    let mut cells: HashMap<Vec<i64>, usize> = HashMap::new();
    let labels: Vec<usize> = points
        .axis_iter(Axis(0))
        .map(|point| {
            let cell = point
                .iter()
                .map(|&value| (value / scale).floor().to_i64().unwrap_or_default())
                .collect();
            let next = cells.len();
            *cells.entry(cell).or_insert(next)
        })
        .collect();

    let k = cells.len();
    let mut weighted_sums = Array2::<A>::zeros((k, points.ncols()));
    let mut plain_sums = Array2::<A>::zeros((k, points.ncols()));
    let mut mass = Array1::<A>::zeros(k);
    let mut members = vec![0usize; k];
    for ((point, &weight), &label) in points.axis_iter(Axis(0)).zip(weights).zip(&labels) {
        weighted_sums.row_mut(label).scaled_add(weight, &point);
        plain_sums.row_mut(label).scaled_add(A::one(), &point);
        mass[label] += weight;
        members[label] += 1;
    }

    let mut centroids = Array2::<A>::zeros((k, points.ncols()));
    for (label, mut centroid) in centroids.axis_iter_mut(Axis(0)).enumerate() {
        // massless cells keep their plain mean so the centroid stays finite
        if mass[label] > A::zero() {
            centroid.assign(&(&weighted_sums.row(label) / mass[label]));
        } else {
            centroid.assign(&(&plain_sums.row(label) / A::from_f64(members[label] as f64)));
        }
    }
    Clusters {
        centroids,
        weights: mass,
    }
}

/// Index of the annealing step after which the solver moves to the fine
/// clouds: the step preceding the first temperature (past the second) below
/// `cluster_scale^p`, or the last step.
pub(crate) fn jump_index<A: MlNumber>(schedule: &[A], cluster_scale: A, p: u32) -> usize {
    let threshold = cluster_scale.powi(p as i32);
    schedule
        .iter()
        .skip(2)
        .position(|&eps| threshold > eps)
        .map(|position| position + 1)
        .unwrap_or(schedule.len() - 1)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn solve<A: MlNumber>(
    a: Array1<A>,
    x: ArrayView2<A>,
    b: Array1<A>,
    y: ArrayView2<A>,
    ground: GroundCost,
    debias: bool,
    schedule: &[A],
    cluster_scale: A,
    with_gradient: bool,
) -> Divergence<A> {
    let final_eps = schedule[schedule.len() - 1];
    let coarse_x = grid_cluster(x, &a, cluster_scale);
    let coarse_y = grid_cluster(y, &b, cluster_scale);
    let (n, m) = (a.len(), b.len());
    let fine = Level::new(a, x.view(), b, y.view(), ground, debias, Online::new);

    if coarse_x.len() == n && coarse_y.len() == m {
        tracing::debug!(
            cluster_scale = %cluster_scale,
            "clustering kept every point, solving single-scale"
        );
        let potentials = fine.solve(schedule);
        return fine.divergence(&potentials, final_eps, with_gradient);
    }

    let coarse = Level::new(
        coarse_x.weights.clone(),
        coarse_x.centroids.view(),
        coarse_y.weights.clone(),
        coarse_y.centroids.view(),
        ground,
        debias,
        Online::new,
    );
    let cross = Kernels::new(
        x.view(),
        y.view(),
        coarse_x.centroids.view(),
        coarse_y.centroids.view(),
        debias,
        |rows, cols| Online::new(rows, cols, ground),
    );
    let jump = jump_index(schedule, cluster_scale, ground.p());
    tracing::debug!(
        n,
        m,
        coarse_n = coarse_x.len(),
        coarse_m = coarse_y.len(),
        jump,
        steps = schedule.len(),
        "multiscale sinkhorn"
    );

    let mut potentials = coarse.initialize(schedule[0]);
    let mut on_fine = false;
    for (step, &eps) in schedule.iter().enumerate() {
        potentials = if on_fine {
            fine.symmetric_step(eps, potentials)
        } else {
            coarse.symmetric_step(eps, potentials)
        };
        if step == jump {
            let (a_log, b_log) = coarse.log_weights();
            potentials = cross.sweep(a_log, b_log, eps, &potentials);
            on_fine = true;
        }
    }
    let potentials = fine.extrapolate(final_eps, &potentials);
    fine.divergence(&potentials, final_eps, with_gradient)
}
