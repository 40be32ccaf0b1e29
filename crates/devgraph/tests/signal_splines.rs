mod common;

use anyhow::Result;
use devgraph::signal::{
    cspline1d, cspline1d_eval, qspline1d, qspline1d_eval, sepfir2d, SignalError,
};
use devgraph::{DType, Device, DeviceArray, GraphConverter};

use common::{capturing, device, f64s, host};

const TOLERANCE: f64 = 1e-9;

fn wave(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| (i as f64 * 0.41).sin() * 2.0 + (i as f64 * 0.07).cos())
        .collect()
}

fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len());
    for (index, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() < tolerance, "index {index}: {a} vs {e}");
    }
}

fn signal_error(result: Result<DeviceArray>) -> SignalError {
    match result {
        Ok(array) => panic!("expected a SignalError, got {}", array.spec()),
        Err(err) => match err.downcast_ref::<SignalError>() {
            Some(signal_error) => signal_error.clone(),
            None => panic!("expected a SignalError, got {err:#}"),
        },
    }
}

/// Convolves 1-D coefficients with a three-tap row filter through `sepfir2d`.
fn reconvolve(device: &Device, coefficients: &DeviceArray, taps: [f64; 3]) -> Result<Vec<f64>> {
    let row = coefficients.reshape([1, coefficients.len()])?;
    let hrow = f64s(device, &taps);
    let hcol = f64s(device, &[1.0]);
    sepfir2d(&row, &hrow, &hcol)?.to_f64_vec()
}

fn knots(device: &Device, len: usize, dx: f64, x0: f64) -> DeviceArray {
    let points: Vec<f64> = (0..len).map(|j| x0 + j as f64 * dx).collect();
    f64s(device, &points)
}

#[test]
fn cubic_coefficients_reconstruct_through_sepfir2d() -> Result<()> {
    let device = device();
    let samples = wave(40);
    let coefficients = cspline1d(&f64s(&device, &samples), 0.0)?;
    assert_eq!(coefficients.dtype(), DType::F64);
    let rebuilt = reconvolve(&device, &coefficients, [1.0 / 6.0, 4.0 / 6.0, 1.0 / 6.0])?;
    assert_close(&rebuilt, &samples, TOLERANCE);
    Ok(())
}

#[test]
fn quadratic_coefficients_reconstruct_through_sepfir2d() -> Result<()> {
    let device = device();
    let samples = wave(25);
    let coefficients = qspline1d(&f64s(&device, &samples), 0.0)?;
    let rebuilt = reconvolve(&device, &coefficients, [1.0 / 8.0, 6.0 / 8.0, 1.0 / 8.0])?;
    assert_close(&rebuilt, &samples, TOLERANCE);
    Ok(())
}

#[test]
fn evaluation_at_knots_interpolates() -> Result<()> {
    let device = device();
    let samples = wave(17);
    let signal = f64s(&device, &samples);
    let (dx, x0) = (0.25, -1.5);
    let points = knots(&device, samples.len(), dx, x0);

    let cubic = cspline1d_eval(&cspline1d(&signal, 0.0)?, &points, dx, x0)?;
    assert_close(&host(&cubic), &samples, TOLERANCE);
    let quadratic = qspline1d_eval(&qspline1d(&signal, 0.0)?, &points, dx, x0)?;
    assert_close(&host(&quadratic), &samples, TOLERANCE);
    Ok(())
}

#[test]
fn evaluation_mirrors_outside_the_knots() -> Result<()> {
    let device = device();
    let samples = wave(9);
    let last = (samples.len() - 1) as f64;
    let coefficients = cspline1d(&f64s(&device, &samples), 0.0)?;

    let outside = f64s(&device, &[-1.0, -2.0, last + 1.0, last + 3.0, -0.3]);
    let mirrored = f64s(&device, &[1.0, 2.0, last - 1.0, last - 3.0, 0.3]);
    let outside = cspline1d_eval(&coefficients, &outside, 1.0, 0.0)?;
    let mirrored = cspline1d_eval(&coefficients, &mirrored, 1.0, 0.0)?;
    assert_close(&host(&outside), &host(&mirrored), 1e-12);
    let expected = [samples[1], samples[2], samples[7], samples[5]];
    assert_close(&host(&outside)[..4], &expected, TOLERANCE);
    Ok(())
}

#[test]
fn evaluation_keeps_point_shape_and_coefficient_precision() -> Result<()> {
    let device = device();
    let samples: Vec<f32> = wave(12).into_iter().map(|v| v as f32).collect();
    let signal = DeviceArray::from_f32(&device, [samples.len()], samples)?;
    let coefficients = cspline1d(&signal, 0.0)?;
    assert_eq!(coefficients.dtype(), DType::F32);

    let grid = DeviceArray::from_f64(&device, [2, 3], vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5])?;
    let values = cspline1d_eval(&coefficients, &grid, 1.0, 0.0)?;
    assert_eq!(values.dims(), &[2, 3]);
    assert_eq!(values.dtype(), DType::F32);

    let ints = DeviceArray::from_i64(&device, [4], vec![1, 2, 3, 4])?;
    assert_eq!(qspline1d(&ints, 0.0)?.dtype(), DType::F64);
    Ok(())
}

#[test]
fn smoothing_damps_alternating_noise() -> Result<()> {
    let device = device();
    let samples: Vec<f64> = (0..64)
        .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
        .collect();
    let signal = f64s(&device, &samples);
    let taps = [1.0 / 6.0, 4.0 / 6.0, 1.0 / 6.0];

    let interpolated = reconvolve(&device, &cspline1d(&signal, 0.0)?, taps)?;
    assert_close(&interpolated, &samples, 1e-8);

    let smoothed = reconvolve(&device, &cspline1d(&signal, 1.0)?, taps)?;
    for (index, value) in smoothed.iter().enumerate().take(48).skip(16) {
        assert!(value.abs() < 0.1, "index {index}: {value}");
    }
    Ok(())
}

#[test]
fn smoothing_keeps_constant_signals() -> Result<()> {
    let device = device();
    let signal = f64s(&device, &[3.0; 96]);
    let coefficients = host(&cspline1d(&signal, 2.0)?);
    for value in &coefficients[32..64] {
        assert!((value - 3.0).abs() < 1e-6, "{value}");
    }
    Ok(())
}

#[test]
fn smoothing_factors_are_validated() {
    let device = device();
    let signal = f64s(&device, &wave(8));
    for lamb in [-1.0, f64::NAN, 1.0 / 200.0, 1.0 / 144.0] {
        assert!(
            matches!(
                signal_error(cspline1d(&signal, lamb)),
                SignalError::UnsupportedSmoothing { .. }
            ),
            "lamb = {lamb}"
        );
    }
    assert!(matches!(
        signal_error(qspline1d(&signal, 0.5)),
        SignalError::UnsupportedSmoothing { .. }
    ));
    assert!(matches!(
        signal_error(cspline1d(&f64s(&device, &[1.0]), 0.5)),
        SignalError::InvalidInput(_)
    ));
}

#[test]
fn spline_operands_are_validated() -> Result<()> {
    let device = device();
    let empty = f64s(&device, &[]);
    assert!(matches!(
        signal_error(cspline1d(&empty, 0.0)),
        SignalError::InvalidInput(_)
    ));
    let square = DeviceArray::zeros(&device, [2, 2], DType::F64)?;
    assert!(matches!(
        signal_error(qspline1d(&square, 0.0)),
        SignalError::InvalidInput(_)
    ));
    let coefficients = cspline1d(&f64s(&device, &[1.0, 2.0, 3.0]), 0.0)?;
    let points = f64s(&device, &[0.5]);
    assert!(matches!(
        signal_error(cspline1d_eval(&coefficients, &points, 0.0, 0.0)),
        SignalError::InvalidInput(_)
    ));
    assert!(matches!(
        signal_error(qspline1d_eval(&coefficients, &points, 1.0, f64::INFINITY)),
        SignalError::InvalidInput(_)
    ));
    Ok(())
}

#[test]
fn sepfir2d_filters_columns_and_rows() -> Result<()> {
    let device = device();
    let image = DeviceArray::from_f64(&device, [3, 1], vec![0.0, 4.0, 8.0])?;
    let smooth = f64s(&device, &[0.25, 0.5, 0.25]);
    let identity = f64s(&device, &[1.0]);

    let columns = sepfir2d(&image, &identity, &smooth)?;
    assert_eq!(columns.dims(), &[3, 1]);
    assert_eq!(host(&columns), vec![1.0, 4.0, 7.0]);

    let rows = sepfir2d(&image.reshape([1, 3])?, &smooth, &identity)?;
    assert_eq!(host(&rows), vec![1.0, 4.0, 7.0]);
    Ok(())
}

#[test]
fn sepfir2d_output_dtype_follows_input() -> Result<()> {
    let device = device();
    let taps = f64s(&device, &[1.0]);
    let floats = DeviceArray::from_f32(&device, [2, 2], vec![1.0, 2.0, 3.0, 4.0])?;
    let ints = DeviceArray::from_i64(&device, [2, 2], vec![1, 2, 3, 4])?;
    let flags = DeviceArray::from_bool(&device, [1, 2], vec![true, false])?;

    assert_eq!(sepfir2d(&floats, &taps, &taps)?.dtype(), DType::F32);
    let widened = sepfir2d(&ints, &taps, &taps)?;
    assert_eq!(widened.dtype(), DType::F64);
    assert_eq!(host(&widened), vec![1.0, 2.0, 3.0, 4.0]);
    let masked = sepfir2d(&flags, &taps, &taps)?;
    assert_eq!(masked.dtype(), DType::F32);
    assert_eq!(host(&masked), vec![1.0, 0.0]);
    Ok(())
}

#[test]
fn sepfir2d_rejects_bad_filters_and_inputs() -> Result<()> {
    let device = device();
    let image = DeviceArray::zeros(&device, [3, 3], DType::F64)?;
    let good = f64s(&device, &[1.0, 2.0, 1.0]);
    let even = f64s(&device, &[1.0, 1.0]);
    let matrix = DeviceArray::ones(&device, [1, 3], DType::F64)?;

    match signal_error(sepfir2d(&image, &even, &good)) {
        SignalError::InvalidFilter { name, .. } => assert_eq!(name, "hrow"),
        other => panic!("unexpected error {other:?}"),
    }
    match signal_error(sepfir2d(&image, &good, &matrix)) {
        SignalError::InvalidFilter { name, .. } => assert_eq!(name, "hcol"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(
        signal_error(sepfir2d(&good, &good, &good)),
        SignalError::InvalidInput(_)
    ));
    Ok(())
}

#[test]
fn splines_replay_inside_captured_graphs() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let resample = |args: &[DeviceArray]| -> Result<Vec<DeviceArray>> {
        let coefficients = cspline1d(&args[0], 0.0)?;
        Ok(vec![cspline1d_eval(&coefficients, &args[1], 0.5, 0.0)?])
    };
    let graphed = converter.graphify(|args| resample(args));
    let points = f64s(&device, &[0.1, 0.75, 1.6, 2.2, 3.9, -0.4]);

    for gain in [0.0, 0.5, 1.0] {
        let samples: Vec<f64> = wave(9).iter().map(|v| v * (1.0 + gain)).collect();
        let args = vec![f64s(&device, &samples), points.clone()];
        let captured = host(&graphed.call(&args)?[0]);
        let eager = host(&resample(args.as_slice())?[0]);
        assert_eq!(captured, eager);
    }
    let stats = converter.stats();
    assert_eq!(stats.captures, 1);
    assert_eq!(stats.replays, 2);
    Ok(())
}
