use conv::ValueFrom;
use ndarray::{Array, Axis, IxDyn, NdFloat};

use crate::error::{Error, Result};

pub trait MlNumber: NdFloat + ValueFrom<usize> {
    fn from_f64(value: f64) -> Self;
}

impl MlNumber for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl MlNumber for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Converts an element or sample count into `A`, rounding to the nearest
/// representable value past the exact integer range.
pub(crate) fn count<A: MlNumber>(n: usize) -> A {
    A::value_from(n).unwrap_or_else(|_| A::from_f64(n as f64))
}

/// Numerically stable `log sum_i exp(f(i))`.
///
/// Returns negative infinity when `len == 0` and NaN as soon as one term is NaN.
#[inline]
pub(crate) fn logsumexp_by<A: MlNumber>(len: usize, mut f: impl FnMut(usize) -> A) -> A {
    if len == 0 {
        return A::neg_infinity();
    }
    let mut max_val = A::neg_infinity();
    for i in 0..len {
        let value = f(i);
        if value.is_nan() {
            return value;
        }
        max_val = max_val.max(value);
    }
    if !max_val.is_finite() {
        return max_val;
    }
    let mut sum_exp = A::zero();
    for i in 0..len {
        sum_exp += (f(i) - max_val).exp();
    }
    max_val + sum_exp.ln()
}

/// Shape produced by broadcasting `left` against `right` (dimensions aligned
/// from the right, each pair equal or one of them 1).
pub(crate) fn broadcast_shape(left: &[usize], right: &[usize]) -> Result<Vec<usize>> {
    let ndim = left.len().max(right.len());
    let mut shape = vec![0; ndim];
    for offset in 0..ndim {
        let l = dim_from_right(left, offset);
        let r = dim_from_right(right, offset);
        shape[ndim - 1 - offset] = if l == r || r == 1 {
            l
        } else if l == 1 {
            r
        } else {
            return Err(Error::ShapeMismatch {
                left: left.to_vec(),
                right: right.to_vec(),
            });
        };
    }
    Ok(shape)
}

fn dim_from_right(shape: &[usize], offset: usize) -> usize {
    if offset < shape.len() {
        shape[shape.len() - 1 - offset]
    } else {
        1
    }
}

pub(crate) fn reduce_to_shape<A: MlNumber>(
    gradient: Array<A, IxDyn>,
    shape: &[usize],
) -> Array<A, IxDyn> {
    let mut reduced = gradient;
    while reduced.ndim() > shape.len() {
        reduced = reduced.sum_axis(Axis(0));
    }
    for (axis, &dim) in shape.iter().enumerate() {
        if dim == 1 && reduced.shape()[axis] != 1 {
            reduced = reduced.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    reduced
}
