//! Evaluation of 1-D B-spline expansions on uniformly spaced knots.

use crate::device::{BackendError, BackendResult, HostKernel};
use crate::tensor::{ArraySpec, HostData};

use super::iir::SplineOrder;

/// Centred cubic B-spline.
pub(crate) fn cubic_basis(t: f64) -> f64 {
    let t = t.abs();
    if t < 1.0 {
        2.0 / 3.0 - t * t + t * t * t / 2.0
    } else if t < 2.0 {
        let r = 2.0 - t;
        r * r * r / 6.0
    } else {
        0.0
    }
}

/// Centred quadratic B-spline.
pub(crate) fn quadratic_basis(t: f64) -> f64 {
    let t = t.abs();
    if t < 0.5 {
        0.75 - t * t
    } else if t < 1.5 {
        let r = 1.5 - t;
        r * r / 2.0
    } else {
        0.0
    }
}

/// Folds `x` into `[0, len - 1]` by mirroring about both end knots.
pub(crate) fn mirror_fold(x: f64, len: usize) -> f64 {
    if len <= 1 {
        return 0.0;
    }
    let last = (len - 1) as f64;
    let period = 2.0 * last;
    let folded = x.rem_euclid(period);
    if folded > last {
        period - folded
    } else {
        folded
    }
}

/// Value at `x` (already in knot units) of the spline with coefficients `cj`.
pub(crate) fn evaluate_at(cj: &[f64], x: f64, order: SplineOrder) -> f64 {
    let len = cj.len();
    let x = mirror_fold(x, len);
    let (offset, taps, basis): (f64, i64, fn(f64) -> f64) = match order {
        SplineOrder::Cubic => (2.0, 4, cubic_basis),
        SplineOrder::Quadratic => (1.5, 3, quadratic_basis),
    };
    let lower = (x - offset).floor() as i64 + 1;
    let last = len as i64 - 1;
    (0..taps)
        .map(|tap| {
            let j = lower + tap;
            let index = j.clamp(0, last) as usize;
            cj[index] * basis(x - j as f64)
        })
        .sum()
}

/// Kernel launched by `cspline1d_eval`/`qspline1d_eval`. Inputs are `[cj, newx]`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SplineEvalKernel {
    pub(crate) order: SplineOrder,
    pub(crate) dx: f64,
    pub(crate) x0: f64,
}

impl HostKernel for SplineEvalKernel {
    fn name(&self) -> &str {
        match self.order {
            SplineOrder::Cubic => "cspline1d_eval",
            SplineOrder::Quadratic => "qspline1d_eval",
        }
    }

    fn evaluate(&self, inputs: &[&HostData], output: &ArraySpec) -> BackendResult<HostData> {
        let [cj, newx] = inputs else {
            return Err(BackendError::invalid(
                "spline_eval",
                format!("expected 2 inputs, got {}", inputs.len()),
            ));
        };
        if cj.is_empty() || newx.len() != output.num_elements() {
            return Err(BackendError::invalid(
                "spline_eval",
                format!(
                    "{} coefficients and {} points for output {output}",
                    cj.len(),
                    newx.len()
                ),
            ));
        }
        let coefficients = cj.to_f64_vec();
        let values = (0..newx.len()).map(|i| {
            let x = (newx.get_f64(i) - self.x0) / self.dx;
            evaluate_at(&coefficients, x, self.order)
        });
        Ok(HostData::from_f64_iter(output.dtype, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bases_partition_unity_at_knots() {
        let cubic: f64 = (-2..=2).map(|k| cubic_basis(k as f64)).sum();
        let quadratic: f64 = (-1..=1).map(|k| quadratic_basis(k as f64)).sum();
        assert!((cubic - 1.0).abs() < 1e-15);
        assert!((quadratic - 1.0).abs() < 1e-15);
        assert!((cubic_basis(1.0) - 1.0 / 6.0).abs() < 1e-15);
        assert!((quadratic_basis(1.0) - 0.125).abs() < 1e-15);
        assert_eq!(cubic_basis(2.5), 0.0);
        assert_eq!(quadratic_basis(-1.5), 0.0);
    }

    #[test]
    fn fold_mirrors_about_end_knots() {
        assert_eq!(mirror_fold(-1.25, 5), 1.25);
        assert_eq!(mirror_fold(4.5, 5), 3.5);
        assert_eq!(mirror_fold(9.0, 5), 1.0);
        assert_eq!(mirror_fold(2.0, 5), 2.0);
        assert_eq!(mirror_fold(7.5, 1), 0.0);
    }

    #[test]
    fn knots_pick_three_centred_taps() {
        let cj = [1.0, 2.0, 4.0, 8.0];
        let value = evaluate_at(&cj, 1.0, SplineOrder::Cubic);
        assert!((value - (1.0 + 4.0 * 2.0 + 4.0) / 6.0).abs() < 1e-12);
        let edge = evaluate_at(&cj, 0.0, SplineOrder::Quadratic);
        assert!((edge - (1.0 + 6.0 * 1.0 + 2.0) / 8.0).abs() < 1e-12);
    }
}
