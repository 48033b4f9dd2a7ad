use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis, Zip};

use crate::shared::{logsumexp_by, MlNumber};

/// Ground cost `C(x, y) = |x - y|^p / p`.
///
/// `p = 1` is the Euclidean distance, `p = 2` half the squared distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroundCost {
    p: u32,
}

impl GroundCost {
    pub fn new(p: u32) -> Self {
        Self { p }
    }

    pub fn p(&self) -> u32 {
        self.p
    }

    pub fn eval<A: MlNumber>(&self, x: ArrayView1<A>, y: ArrayView1<A>) -> A {
        let squared = squared_distance(x, y);
        match self.p {
            1 => squared.sqrt(),
            2 => squared / A::from_f64(2.0),
            p => squared.sqrt().powi(p as i32) / A::from_f64(f64::from(p)),
        }
    }

    /// Adds `weight * grad_x C(x, y)` into `out`.
    pub fn accumulate_gradient<A: MlNumber>(
        &self,
        x: ArrayView1<A>,
        y: ArrayView1<A>,
        weight: A,
        out: ArrayViewMut1<A>,
    ) {
        let scale = match self.p {
            2 => weight,
            p => {
                let distance = squared_distance(x, y).sqrt();
                // the subgradient at x == y is taken to be zero
                if distance == A::zero() {
                    return;
                }
                weight * distance.powi(p as i32 - 2)
            }
        };
        Zip::from(out)
            .and(&x)
            .and(&y)
            .for_each(|out, &xi, &yi| *out += scale * (xi - yi));
    }

    pub fn pairwise<A: MlNumber>(&self, x: ArrayView2<A>, y: ArrayView2<A>) -> Array2<A> {
        Array2::from_shape_fn((x.nrows(), y.nrows()), |(i, j)| {
            self.eval(x.row(i), y.row(j))
        })
    }
}

fn squared_distance<A: MlNumber>(x: ArrayView1<A>, y: ArrayView1<A>) -> A {
    x.iter()
        .zip(y.iter())
        .fold(A::zero(), |acc, (&xi, &yi)| acc + (xi - yi) * (xi - yi))
}

/// Pairwise costs between a row cloud and a column cloud, consumed by the
/// log-domain Sinkhorn updates.
pub(crate) trait CostKernel<A: MlNumber> {
    fn rows(&self) -> ArrayView2<'_, A>;
    fn cols(&self) -> ArrayView2<'_, A>;
    fn ground(&self) -> GroundCost;
    fn cost(&self, i: usize, j: usize) -> A;

    /// `-eps * LSE_j(h_j - C_ij / eps)` for every row `i`.
    fn softmin(&self, eps: A, h: &Array1<A>) -> Array1<A> {
        let cols = self.cols().nrows();
        Array1::from_shape_fn(self.rows().nrows(), |i| {
            -eps * logsumexp_by(cols, |j| h[j] - self.cost(i, j) / eps)
        })
    }

    /// Row `i` holds `sum_j w_ij grad_x C(x_i, y_j)` where `w_ij` are the
    /// softmax weights of the matching softmin row.
    fn transport_gradient(&self, eps: A, h: &Array1<A>) -> Array2<A> {
        let (rows, cols, ground) = (self.rows(), self.cols(), self.ground());
        let mut gradient = Array2::<A>::zeros(rows.raw_dim());
        for (i, mut out) in gradient.axis_iter_mut(Axis(0)).enumerate() {
            let lse = logsumexp_by(cols.nrows(), |j| h[j] - self.cost(i, j) / eps);
            for j in 0..cols.nrows() {
                let weight = (h[j] - self.cost(i, j) / eps - lse).exp();
                ground.accumulate_gradient(rows.row(i), cols.row(j), weight, out.view_mut());
            }
        }
        gradient
    }
}

/// Cost matrix materialised once, reused by every softmin.
pub(crate) struct Tensorized<'a, A> {
    rows: ArrayView2<'a, A>,
    cols: ArrayView2<'a, A>,
    ground: GroundCost,
    matrix: Array2<A>,
}

impl<'a, A: MlNumber> Tensorized<'a, A> {
    pub(crate) fn new(rows: ArrayView2<'a, A>, cols: ArrayView2<'a, A>, ground: GroundCost) -> Self {
        let matrix = ground.pairwise(rows, cols);
        Self {
            rows,
            cols,
            ground,
            matrix,
        }
    }
}

impl<'a, A: MlNumber> CostKernel<A> for Tensorized<'a, A> {
    fn rows(&self) -> ArrayView2<'_, A> {
        self.rows.view()
    }

    fn cols(&self) -> ArrayView2<'_, A> {
        self.cols.view()
    }

    fn ground(&self) -> GroundCost {
        self.ground
    }

    fn cost(&self, i: usize, j: usize) -> A {
        self.matrix[[i, j]]
    }

    fn softmin(&self, eps: A, h: &Array1<A>) -> Array1<A> {
        let mut out = Array1::<A>::zeros(self.matrix.nrows());
        for (value, costs) in out.iter_mut().zip(self.matrix.axis_iter(Axis(0))) {
            let exponents = h - &(&costs / eps);
            *value = -eps * logsumexp_by(exponents.len(), |j| exponents[j]);
        }
        out
    }
}

/// Costs recomputed from the coordinates on every access.
pub(crate) struct Online<'a, A> {
    rows: ArrayView2<'a, A>,
    cols: ArrayView2<'a, A>,
    ground: GroundCost,
}

impl<'a, A: MlNumber> Online<'a, A> {
    pub(crate) fn new(rows: ArrayView2<'a, A>, cols: ArrayView2<'a, A>, ground: GroundCost) -> Self {
        Self { rows, cols, ground }
    }
}

impl<'a, A: MlNumber> CostKernel<A> for Online<'a, A> {
    fn rows(&self) -> ArrayView2<'_, A> {
        self.rows.view()
    }

    fn cols(&self) -> ArrayView2<'_, A> {
        self.cols.view()
    }

    fn ground(&self) -> GroundCost {
        self.ground
    }

    fn cost(&self, i: usize, j: usize) -> A {
        self.ground.eval(self.rows.row(i), self.cols.row(j))
    }
}
