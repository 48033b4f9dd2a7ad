use ndarray::ArrayView2;

use crate::shared::MlNumber;

pub(crate) fn diameter<A: MlNumber>(x: ArrayView2<A>, y: ArrayView2<A>) -> A {
    let mut squared = A::zero();
    for k in 0..x.ncols() {
        let (lo, hi) = x
            .column(k)
            .iter()
            .chain(y.column(k).iter())
            .fold((A::infinity(), A::neg_infinity()), |(lo, hi), &value| {
                (lo.min(value), hi.max(value))
            });
        squared += (hi - lo) * (hi - lo);
    }
    squared.sqrt()
}

/// Decreasing temperatures for epsilon-scaling, from `diameter^p` down to
/// `blur^p` with ratio `scaling^p` between steps.
///
/// The first temperature appears twice: once to initialise the potentials,
/// once for the first annealing step. Diameters below `blur` are raised to
/// `blur` so coincident clouds still get a finite schedule. A non-finite
/// diameter gives the two-step schedule `[diameter^p, blur^p]`.
pub(crate) fn epsilon_schedule<A: MlNumber>(p: u32, diameter: A, blur: A, scaling: A) -> Vec<A> {
    let exponent = A::from_f64(f64::from(p));
    let diameter = diameter.max(blur);
    let start = exponent * diameter.ln();
    let stop = exponent * blur.ln();
    let step = exponent * scaling.ln();
    if !start.is_finite() {
        return vec![diameter.powi(p as i32), blur.powi(p as i32)];
    }

    // every entry is exp of a log-temperature so rounding cannot break the order
    let steps = if step < A::zero() {
        ((stop - start) / step).ceil().to_usize().unwrap_or(0)
    } else {
        0
    };
    let mut schedule = Vec::with_capacity(steps + 2);
    schedule.push(start.exp());
    for k in 0..steps {
        let log_eps = start + step * A::from_f64(k as f64);
        if log_eps > stop {
            schedule.push(log_eps.exp());
        }
    }
    schedule.push(stop.exp());
    schedule
}
