use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::cost::{CostKernel, GroundCost};
use crate::shared::MlNumber;

/// Value of a Sinkhorn divergence, optionally with its gradient with respect
/// to the source points.
#[derive(Debug, Clone)]
pub struct Divergence<A> {
    pub value: A,
    pub gradient: Option<Array2<A>>,
}

/// Dual potentials of the symmetric Sinkhorn iterations.
///
/// `f_ba` lives on the source points and `g_ab` on the target points. The
/// self-transport potentials `f_aa` and `g_bb` are only tracked when the
/// divergence is debiased.
#[derive(Debug, Clone)]
pub(crate) struct Potentials<A> {
    pub f_ba: Array1<A>,
    pub g_ab: Array1<A>,
    pub f_aa: Option<Array1<A>>,
    pub g_bb: Option<Array1<A>>,
}

impl<A: MlNumber> Potentials<A> {
    fn averaged(self, update: Potentials<A>) -> Potentials<A> {
        let half = A::from_f64(0.5);
        let mix = |old: Array1<A>, new: Array1<A>| (old + new) * half;
        Potentials {
            f_ba: mix(self.f_ba, update.f_ba),
            g_ab: mix(self.g_ab, update.g_ab),
            f_aa: self.f_aa.zip(update.f_aa).map(|(old, new)| mix(old, new)),
            g_bb: self.g_bb.zip(update.g_bb).map(|(old, new)| mix(old, new)),
        }
    }
}

/// Cost kernels for one sweep: rows are the points receiving a potential,
/// columns the points carrying the previous one.
pub(crate) struct Kernels<K> {
    xy: K,
    yx: K,
    xx: Option<K>,
    yy: Option<K>,
}

impl<K> Kernels<K> {
    /// `x_rows`/`y_rows` receive the updated potentials, `x_cols`/`y_cols`
    /// carry the potentials being read.
    pub(crate) fn new<'a, A: 'a>(
        x_rows: ArrayView2<'a, A>,
        y_rows: ArrayView2<'a, A>,
        x_cols: ArrayView2<'a, A>,
        y_cols: ArrayView2<'a, A>,
        debias: bool,
        build: impl Fn(ArrayView2<'a, A>, ArrayView2<'a, A>) -> K,
    ) -> Self {
        Self {
            xy: build(x_rows, y_cols),
            yx: build(y_rows, x_cols),
            xx: debias.then(|| build(x_rows, x_cols)),
            yy: debias.then(|| build(y_rows, y_cols)),
        }
    }

    /// One simultaneous update of every potential. `a_log` and `b_log` are
    /// the log-weights of the column points.
    pub(crate) fn sweep<A: MlNumber>(
        &self,
        a_log: &Array1<A>,
        b_log: &Array1<A>,
        eps: A,
        potentials: &Potentials<A>,
    ) -> Potentials<A>
    where
        K: CostKernel<A>,
    {
        Potentials {
            f_ba: self.xy.softmin(eps, &shifted(b_log, &potentials.g_ab, eps)),
            g_ab: self.yx.softmin(eps, &shifted(a_log, &potentials.f_ba, eps)),
            f_aa: self
                .xx
                .as_ref()
                .zip(potentials.f_aa.as_ref())
                .map(|(kernel, f_aa)| kernel.softmin(eps, &shifted(a_log, f_aa, eps))),
            g_bb: self
                .yy
                .as_ref()
                .zip(potentials.g_bb.as_ref())
                .map(|(kernel, g_bb)| kernel.softmin(eps, &shifted(b_log, g_bb, eps))),
        }
    }
}

fn shifted<A: MlNumber>(log_weights: &Array1<A>, potential: &Array1<A>, eps: A) -> Array1<A> {
    log_weights + &(potential / eps)
}

/// A transport problem at one resolution: two weighted clouds and the cost
/// kernels between them.
pub(crate) struct Level<A, K> {
    a: Array1<A>,
    b: Array1<A>,
    a_log: Array1<A>,
    b_log: Array1<A>,
    kernels: Kernels<K>,
}

impl<A: MlNumber, K: CostKernel<A>> Level<A, K> {
    pub(crate) fn new<'a>(
        a: Array1<A>,
        x: ArrayView2<'a, A>,
        b: Array1<A>,
        y: ArrayView2<'a, A>,
        ground: GroundCost,
        debias: bool,
        build: impl Fn(ArrayView2<'a, A>, ArrayView2<'a, A>, GroundCost) -> K,
    ) -> Self
    where
        A: 'a,
    {
        Self {
            a_log: a.mapv(|w| w.ln()),
            b_log: b.mapv(|w| w.ln()),
            a,
            b,
            kernels: Kernels::new(x, y, x, y, debias, |rows, cols| build(rows, cols, ground)),
        }
    }

    pub(crate) fn log_weights(&self) -> (&Array1<A>, &Array1<A>) {
        (&self.a_log, &self.b_log)
    }

    pub(crate) fn initialize(&self, eps: A) -> Potentials<A> {
        let k = &self.kernels;
        Potentials {
            f_ba: k.xy.softmin(eps, &self.b_log),
            g_ab: k.yx.softmin(eps, &self.a_log),
            f_aa: k.xx.as_ref().map(|kernel| kernel.softmin(eps, &self.a_log)),
            g_bb: k.yy.as_ref().map(|kernel| kernel.softmin(eps, &self.b_log)),
        }
    }

    pub(crate) fn symmetric_step(&self, eps: A, potentials: Potentials<A>) -> Potentials<A> {
        let update = self.extrapolate(eps, &potentials);
        potentials.averaged(update)
    }

    pub(crate) fn extrapolate(&self, eps: A, potentials: &Potentials<A>) -> Potentials<A> {
        self.kernels.sweep(&self.a_log, &self.b_log, eps, potentials)
    }

    /// `<a, f_ba - f_aa> + <b, g_ab - g_bb>`, or the biased `<a, f_ba> + <b, g_ab>`.
    pub(crate) fn value(&self, potentials: &Potentials<A>) -> A {
        let source = match &potentials.f_aa {
            Some(f_aa) => self.a.dot(&(&potentials.f_ba - f_aa)),
            None => self.a.dot(&potentials.f_ba),
        };
        let target = match &potentials.g_bb {
            Some(g_bb) => self.b.dot(&(&potentials.g_ab - g_bb)),
            None => self.b.dot(&potentials.g_ab),
        };
        source + target
    }

    /// Gradient of the value with respect to the source points, read off the
    /// row-softmax transport weights at temperature `eps`.
    pub(crate) fn source_gradient(&self, eps: A, potentials: &Potentials<A>) -> Array2<A> {
        let k = &self.kernels;
        let mut gradient = k
            .xy
            .transport_gradient(eps, &shifted(&self.b_log, &potentials.g_ab, eps));
        if let (Some(kernel), Some(f_aa)) = (&k.xx, &potentials.f_aa) {
            gradient -= &kernel.transport_gradient(eps, &shifted(&self.a_log, f_aa, eps));
        }
        gradient *= &self.a.view().insert_axis(Axis(1));
        gradient
    }

    pub(crate) fn divergence(
        &self,
        potentials: &Potentials<A>,
        eps: A,
        with_gradient: bool,
    ) -> Divergence<A> {
        Divergence {
            value: self.value(potentials),
            gradient: with_gradient.then(|| self.source_gradient(eps, potentials)),
        }
    }

    /// Anneals through `schedule` and finishes with one extrapolation at its
    /// last temperature.
    pub(crate) fn solve(&self, schedule: &[A]) -> Potentials<A> {
        let mut potentials = self.initialize(schedule[0]);
        for (step, &eps) in schedule.iter().enumerate() {
            tracing::trace!(step, eps = %eps, "sinkhorn step");
            potentials = self.symmetric_step(eps, potentials);
        }
        self.extrapolate(schedule[schedule.len() - 1], &potentials)
    }
}
