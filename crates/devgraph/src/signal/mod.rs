//! Spline filtering on device arrays.
//!
//! Each routine validates its operands on the host and then enqueues a single host-evaluated
//! kernel, so the routines run on the current stream and can be recorded into captured graphs
//! like any other array operation.

mod bsplines;
mod fir;
mod iir;

use anyhow::Result;
use thiserror::Error;

use crate::device::{CustomKernel, HostKernel, Operation};
use crate::ops::launch;
use crate::tensor::{ArraySpec, DType, DeviceArray};

use bsplines::SplineEvalKernel;
use fir::SepFir2dKernel;
use iir::{SplineCoefficientKernel, SplineOrder, MIN_SMOOTHING};

/// Operand errors of the spline routines. Raised before any kernel is enqueued.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("filter {name} must be 1-D with odd length, got shape {shape}")]
    InvalidFilter { name: &'static str, shape: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported smoothing factor {lamb}: {reason}")]
    UnsupportedSmoothing { lamb: f64, reason: &'static str },
}

fn custom(kernel: impl HostKernel + 'static) -> Operation {
    Operation::Custom(CustomKernel::new(kernel))
}

fn ensure_signal(name: &str, signal: &DeviceArray) -> Result<()> {
    if signal.rank() != 1 || signal.is_empty() {
        return Err(SignalError::InvalidInput(format!(
            "{name} must be a non-empty 1-D array, got {}",
            signal.spec()
        ))
        .into());
    }
    Ok(())
}

fn ensure_spacing(dx: f64, x0: f64) -> Result<()> {
    if dx == 0.0 || !dx.is_finite() || !x0.is_finite() {
        return Err(SignalError::InvalidInput(format!(
            "sample spacing {dx} and origin {x0} must be finite with a non-zero spacing"
        ))
        .into());
    }
    Ok(())
}

fn coefficients(signal: &DeviceArray, order: SplineOrder, lamb: f64) -> Result<DeviceArray> {
    ensure_signal("signal", signal)?;
    launch(
        custom(SplineCoefficientKernel { order, lamb }),
        &[signal],
        ArraySpec::new(signal.shape().clone(), signal.dtype().to_float()),
    )
}

/// Cubic B-spline coefficients of a 1-D signal under mirror-symmetric boundaries.
///
/// Convolving the result with `[1, 4, 1] / 6` (for example through [`sepfir2d`]) reproduces
/// the signal. A non-zero `lamb` computes smoothing-spline coefficients instead and must exceed
/// `1/144`.
pub fn cspline1d(signal: &DeviceArray, lamb: f64) -> Result<DeviceArray> {
    if lamb != 0.0 {
        if lamb.is_nan() || lamb < 0.0 {
            return Err(SignalError::UnsupportedSmoothing {
                lamb,
                reason: "smoothing factor must be non-negative",
            }
            .into());
        }
        if lamb <= MIN_SMOOTHING {
            return Err(SignalError::UnsupportedSmoothing {
                lamb,
                reason: "smoothing factors up to 1/144 have no complex pole pair",
            }
            .into());
        }
        if signal.len() < 2 {
            return Err(SignalError::InvalidInput(format!(
                "smoothing needs at least two samples, got {}",
                signal.spec()
            ))
            .into());
        }
    }
    coefficients(signal, SplineOrder::Cubic, lamb)
}

/// Quadratic B-spline coefficients of a 1-D signal; reconstruct with `[1, 6, 1] / 8`.
///
/// Smoothing is not available for quadratic splines, so `lamb` must be zero.
pub fn qspline1d(signal: &DeviceArray, lamb: f64) -> Result<DeviceArray> {
    if lamb != 0.0 {
        return Err(SignalError::UnsupportedSmoothing {
            lamb,
            reason: "quadratic splines do not support smoothing",
        }
        .into());
    }
    coefficients(signal, SplineOrder::Quadratic, 0.0)
}

fn evaluate(
    cj: &DeviceArray,
    newx: &DeviceArray,
    dx: f64,
    x0: f64,
    order: SplineOrder,
) -> Result<DeviceArray> {
    ensure_signal("cj", cj)?;
    ensure_spacing(dx, x0)?;
    launch(
        custom(SplineEvalKernel { order, dx, x0 }),
        &[cj, newx],
        ArraySpec::new(newx.shape().clone(), cj.dtype().to_float()),
    )
}

/// Evaluates the cubic spline with coefficients `cj` on knots `x0 + j * dx` at `newx`.
///
/// Points outside the knot range are mirrored about the end knots.
pub fn cspline1d_eval(
    cj: &DeviceArray,
    newx: &DeviceArray,
    dx: f64,
    x0: f64,
) -> Result<DeviceArray> {
    evaluate(cj, newx, dx, x0, SplineOrder::Cubic)
}

/// Quadratic counterpart of [`cspline1d_eval`].
pub fn qspline1d_eval(
    cj: &DeviceArray,
    newx: &DeviceArray,
    dx: f64,
    x0: f64,
) -> Result<DeviceArray> {
    evaluate(cj, newx, dx, x0, SplineOrder::Quadratic)
}

fn ensure_filter(name: &'static str, filter: &DeviceArray) -> Result<()> {
    if filter.rank() != 1 || filter.len() % 2 == 0 {
        return Err(SignalError::InvalidFilter {
            name,
            shape: filter.shape().to_string(),
        }
        .into());
    }
    Ok(())
}

/// Convolves a 2-D array with the separable filter `hcol` (along axis 0) and `hrow` (along
/// axis 1) under half-sample mirror boundaries.
///
/// Both filters must be 1-D with odd length. The result is `f32` for `f32` and `bool` input
/// and `f64` otherwise.
pub fn sepfir2d(input: &DeviceArray, hrow: &DeviceArray, hcol: &DeviceArray) -> Result<DeviceArray> {
    ensure_filter("hrow", hrow)?;
    ensure_filter("hcol", hcol)?;
    let [rows, cols] = input.dims() else {
        return Err(SignalError::InvalidInput(format!(
            "sepfir2d expects a 2-D input, got {}",
            input.spec()
        ))
        .into());
    };
    if input.is_empty() {
        return Err(SignalError::InvalidInput(format!(
            "sepfir2d input {} is empty",
            input.spec()
        ))
        .into());
    }
    let dtype = match input.dtype() {
        DType::F32 | DType::Bool => DType::F32,
        _ => DType::F64,
    };
    launch(
        custom(SepFir2dKernel {
            rows: *rows,
            cols: *cols,
        }),
        &[input, hrow, hcol],
        ArraySpec::new(input.shape().clone(), dtype),
    )
}
