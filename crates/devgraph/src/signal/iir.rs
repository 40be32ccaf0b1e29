//! B-spline coefficients through a causal and an anti-causal IIR pass.
//!
//! The plain interpolating splines factor into one first-order pole `z` applied forwards and
//! backwards. Initial states assume a half-sample symmetric extension of the signal, so
//! convolving the coefficients with `[1, 4, 1] / 6` (cubic) or `[1, 6, 1] / 8` (quadratic) under
//! the same extension gives the samples back.
//!
//! The smoothing cubic spline uses a pair of complex-conjugate poles `rho * e^(+-i omega)`
//! and second-order recursions seeded from closed-form boundary sums.

use crate::device::{BackendError, BackendResult, HostKernel};
use crate::tensor::{ArraySpec, HostData};

/// `-2 + sqrt(3)`
pub(crate) const CUBIC_POLE: f64 = -0.267_949_192_431_122_7;
/// `-3 + 2 * sqrt(2)`
pub(crate) const QUADRATIC_POLE: f64 = -0.171_572_875_253_809_9;

const CUBIC_GAIN: f64 = 6.0;
const QUADRATIC_GAIN: f64 = 8.0;

/// Smallest smoothing factor whose poles are complex (`144 * lamb > 1`).
pub(crate) const MIN_SMOOTHING: f64 = 1.0 / 144.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SplineOrder {
    Quadratic,
    Cubic,
}

impl SplineOrder {
    fn pole(self) -> f64 {
        match self {
            SplineOrder::Quadratic => QUADRATIC_POLE,
            SplineOrder::Cubic => CUBIC_POLE,
        }
    }

    fn gain(self) -> f64 {
        match self {
            SplineOrder::Quadratic => QUADRATIC_GAIN,
            SplineOrder::Cubic => CUBIC_GAIN,
        }
    }
}

/// Interpolating spline coefficients of `signal`, which must not be empty.
///
/// A single sample only gets the anti-causal boundary factor, without the gain.
pub(crate) fn spline_coefficients(signal: &[f64], order: SplineOrder) -> Vec<f64> {
    let pole = order.pole();
    let len = signal.len();

    let mut power = 1.0;
    let mut weighted = 0.0;
    for &sample in signal {
        weighted += power * sample;
        power *= pole;
    }
    let first = signal[0] + pole * weighted;
    if len == 1 {
        return vec![pole / (pole - 1.0) * first];
    }

    let mut causal = Vec::with_capacity(len);
    causal.push(first);
    for &sample in &signal[1..] {
        let previous = causal[causal.len() - 1];
        causal.push(sample + pole * previous);
    }

    let mut output = vec![0.0; len];
    output[len - 1] = pole / (pole - 1.0) * causal[len - 1];
    for n in (0..len - 1).rev() {
        output[n] = pole * (output[n + 1] - causal[n]);
    }
    let gain = order.gain();
    output.iter_mut().for_each(|value| *value *= gain);
    output
}

/// Poles of the smoothing cubic spline for `lamb > 1/144`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SmoothingPoles {
    pub(crate) rho: f64,
    pub(crate) omega: f64,
    /// Numerator gain `1 - 2 rho cos(omega) + rho^2`.
    pub(crate) cs: f64,
}

impl SmoothingPoles {
    pub(crate) fn new(lamb: f64) -> Self {
        let root = (3.0 + 144.0 * lamb).sqrt();
        let xi = 1.0 - 96.0 * lamb + 24.0 * lamb * root;
        let omega = (144.0 * lamb - 1.0).sqrt().atan2(xi.sqrt());
        let rho = (24.0 * lamb - 1.0 - xi.sqrt()) / (24.0 * lamb)
            * ((48.0 * lamb + 24.0 * lamb * root) / xi).sqrt();
        let cs = 1.0 - 2.0 * rho * omega.cos() + rho * rho;
        SmoothingPoles { rho, omega, cs }
    }

    /// Causal impulse response.
    pub(crate) fn hc(&self, k: i64) -> f64 {
        if k <= -1 {
            return 0.0;
        }
        self.cs / self.omega.sin()
            * self.rho.powi(k as i32)
            * (self.omega * (k as f64 + 1.0)).sin()
    }

    /// Symmetric impulse response of the full forward-backward filter.
    pub(crate) fn hs(&self, k: i64) -> f64 {
        let (rho, omega, cs) = (self.rho, self.omega, self.cs);
        let rho2 = rho * rho;
        let c0 = cs * cs * (1.0 + rho2) / (1.0 - rho2)
            / (1.0 - 2.0 * rho2 * (2.0 * omega).cos() + rho2 * rho2);
        let gamma = (1.0 - rho2) / (1.0 + rho2) / omega.tan();
        let ak = k.unsigned_abs();
        let angle = omega * ak as f64;
        c0 * rho.powi(ak as i32) * (angle.cos() + gamma * angle.sin())
    }
}

/// Smoothing cubic spline coefficients. Needs at least two samples and `lamb > 1/144`.
pub(crate) fn smoothing_coefficients(signal: &[f64], lamb: f64) -> Vec<f64> {
    let poles = SmoothingPoles::new(lamb);
    let len = signal.len();
    let feedback1 = 2.0 * poles.rho * poles.omega.cos();
    let feedback2 = poles.rho * poles.rho;

    let mut forward = vec![0.0; len];
    forward[0] = poles.hc(0) * signal[0]
        + signal
            .iter()
            .enumerate()
            .map(|(k, &s)| poles.hc(k as i64 + 1) * s)
            .sum::<f64>();
    forward[1] = poles.hc(0) * signal[0]
        + poles.hc(1) * signal[1]
        + signal
            .iter()
            .enumerate()
            .map(|(k, &s)| poles.hc(k as i64 + 2) * s)
            .sum::<f64>();
    for n in 2..len {
        forward[n] = poles.cs * signal[n] + feedback1 * forward[n - 1] - feedback2 * forward[n - 2];
    }

    let mut output = vec![0.0; len];
    output[len - 1] = signal
        .iter()
        .rev()
        .enumerate()
        .map(|(k, &s)| (poles.hs(k as i64) + poles.hs(k as i64 + 1)) * s)
        .sum();
    output[len - 2] = signal
        .iter()
        .rev()
        .enumerate()
        .map(|(k, &s)| (poles.hs(k as i64 - 1) + poles.hs(k as i64 + 2)) * s)
        .sum();
    for n in (0..len - 2).rev() {
        output[n] = poles.cs * forward[n] + feedback1 * output[n + 1] - feedback2 * output[n + 2];
    }
    output
}

/// Coefficient kernel launched by `cspline1d`/`qspline1d`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SplineCoefficientKernel {
    pub(crate) order: SplineOrder,
    /// Zero for interpolating splines.
    pub(crate) lamb: f64,
}

impl HostKernel for SplineCoefficientKernel {
    fn name(&self) -> &str {
        match (self.order, self.lamb != 0.0) {
            (SplineOrder::Cubic, false) => "cspline1d",
            (SplineOrder::Cubic, true) => "cspline1d_smooth",
            (SplineOrder::Quadratic, _) => "qspline1d",
        }
    }

    fn evaluate(&self, inputs: &[&HostData], output: &ArraySpec) -> BackendResult<HostData> {
        let [signal] = inputs else {
            return Err(BackendError::invalid(
                "spline_coefficients",
                format!("expected 1 input, got {}", inputs.len()),
            ));
        };
        if signal.len() != output.num_elements() || signal.is_empty() {
            return Err(BackendError::invalid(
                "spline_coefficients",
                format!("signal of {} samples for output {output}", signal.len()),
            ));
        }
        let samples = signal.to_f64_vec();
        let coefficients = if self.lamb != 0.0 {
            smoothing_coefficients(&samples, self.lamb)
        } else {
            spline_coefficients(&samples, self.order)
        };
        Ok(HostData::from_f64_iter(output.dtype, coefficients))
    }
}
