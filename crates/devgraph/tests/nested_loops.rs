mod common;

use anyhow::Result;
use devgraph::{DType, DeviceArray, GraphConverter, GraphError};

use common::{
    capturing, device, f64_scalar, graph_error, host, hosts, i64_scalar, mock, BlasCaptureGuard,
};

/// `[n, m]` -> `sum_{i < n} sum_{j < m} i * j`, with the inner loop recorded inside the outer
/// loop's body.
fn grid_sum<C: GraphConverter>(converter: &C, args: &[DeviceArray]) -> Result<Vec<DeviceArray>> {
    let device = converter.device();
    let (n, m) = (args[0].clone(), args[1].clone());
    let outer = converter.while_loop(
        |state| state[0].lt(&n),
        |state| {
            let i = state[0].clone();
            let inner = converter.while_loop(
                |inner| inner[0].lt(&m),
                |inner| {
                    Ok(vec![
                        inner[0].add_scalar(1)?,
                        inner[1].add(&inner[0].mul(&i)?)?,
                    ])
                },
                [DeviceArray::scalar(device, DType::I64, 0)?, state[1].clone()],
            )?;
            Ok(vec![state[0].add_scalar(1)?, inner[1].clone()])
        },
        [
            DeviceArray::scalar(device, DType::I64, 0)?,
            DeviceArray::scalar(device, DType::I64, 0)?,
        ],
    )?;
    Ok(vec![outer[1].clone()])
}

/// `[x]` -> `[steps]` of the Collatz sequence from `x`, branching inside the loop body.
fn collatz<C: GraphConverter>(converter: &C, args: &[DeviceArray]) -> Result<Vec<DeviceArray>> {
    let device = converter.device();
    let state = converter.while_loop(
        |state| state[0].gt_scalar(1.0),
        |state| {
            let x = state[0].copy()?;
            let half = x.mul_scalar(0.5)?.floor()?;
            let even = half.mul_scalar(2.0)?.eq(&x)?;
            converter.cond_else(
                &[x.clone()],
                |_| Ok(even.clone()),
                |ops| ops[0].assign(&half),
                |ops| ops[0].assign(&ops[0].mul_scalar(3.0)?.add_scalar(1.0)?),
            )?;
            Ok(vec![x, state[1].add_scalar(1)?])
        },
        [args[0].clone(), DeviceArray::scalar(device, DType::I64, 0)?],
    )?;
    Ok(vec![state[1].clone()])
}

/// `[x]` -> `[x', steps]` for the same walk as [`collatz`], with the branches and the step
/// counter writing straight into the loop-carried slots.
fn collatz_in_place<C: GraphConverter>(
    converter: &C,
    args: &[DeviceArray],
) -> Result<Vec<DeviceArray>> {
    let device = converter.device();
    let state = converter.while_loop(
        |state| state[0].gt_scalar(1.0),
        |state| {
            let half = state[0].mul_scalar(0.5)?.floor()?;
            let even = half.mul_scalar(2.0)?.eq(&state[0])?;
            converter.cond_else(
                &state[..1],
                |_| Ok(even.clone()),
                |ops| ops[0].assign(&half),
                |ops| ops[0].assign(&ops[0].mul_scalar(3.0)?.add_scalar(1.0)?),
            )?;
            state[1].assign(&state[1].add_scalar(1)?)?;
            Ok(state.to_vec())
        },
        [args[0].clone(), DeviceArray::scalar(device, DType::I64, 0)?],
    )?;
    Ok(state.into_vec())
}

fn host_collatz(mut x: f64) -> (f64, f64) {
    let mut steps = 0.0;
    while x > 1.0 {
        x = if x % 2.0 == 0.0 { x / 2.0 } else { 3.0 * x + 1.0 };
        steps += 1.0;
    }
    (x, steps)
}

#[test]
fn nested_loops_match_eager() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let eager = mock(&device);
    let graphed = converter.graphify(|args| grid_sum(&converter, args));

    for (n, m) in [(4, 5), (0, 3), (3, 0), (7, 2)] {
        let args = vec![i64_scalar(&device, n), i64_scalar(&device, m)];
        let captured = hosts(&graphed.call(&args)?);
        assert_eq!(captured, hosts(&grid_sum(&eager, &args)?), "n = {n}, m = {m}");
        let expected = (n * (n - 1) / 2) * (m * (m - 1) / 2);
        assert_eq!(captured, vec![vec![expected as f64]], "n = {n}, m = {m}");
    }

    let stats = converter.stats();
    assert_eq!(stats.captures, 1);
    assert_eq!(stats.replays, 3);
    Ok(())
}

#[test]
fn branches_inside_loops_match_eager() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let eager = mock(&device);
    let graphed = converter.graphify(|args| collatz(&converter, args));

    for (start, steps) in [(6.0, 8.0), (1.0, 0.0), (27.0, 111.0), (12.0, 9.0)] {
        let args = vec![f64_scalar(&device, start)];
        let captured = hosts(&graphed.call(&args)?);
        assert_eq!(captured, hosts(&collatz(&eager, &args)?), "start = {start}");
        assert_eq!(captured, vec![vec![steps]], "start = {start}");
    }
    assert_eq!(converter.stats().host_invocations, 1);
    Ok(())
}

#[test]
fn in_place_loop_bodies_match_eager_and_a_host_loop() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let eager = mock(&device);
    let graphed = converter.graphify(|args| collatz_in_place(&converter, args));

    for start in [6.0, 1.0, 27.0, 12.0, 0.0] {
        let args = vec![f64_scalar(&device, start)];
        let captured = hosts(&graphed.call(&args)?);
        assert_eq!(host(&args[0]), vec![start], "start = {start}");
        assert_eq!(captured, hosts(&collatz_in_place(&eager, &args)?), "start = {start}");
        assert_eq!(host(&args[0]), vec![start], "start = {start}");
        let (last, steps) = host_collatz(start);
        assert_eq!(captured, vec![vec![last], vec![steps]], "start = {start}");
    }
    let stats = converter.stats();
    assert_eq!(stats.captures, 1);
    assert_eq!(stats.replays, 4);
    Ok(())
}

/// `[matrix, v, steps]` -> `[v]` after `steps` rounds of two matrix products followed by a
/// normalisation, the products running in an inner loop.
fn power_steps<C: GraphConverter>(converter: &C, args: &[DeviceArray]) -> Result<Vec<DeviceArray>> {
    let device = converter.device();
    let (matrix, steps) = (args[0].clone(), args[2].clone());
    let outer = converter.while_loop(
        |state| state[0].lt(&steps),
        |state| {
            let inner = converter.while_loop(
                |inner| inner[0].lt_scalar(2),
                |inner| Ok(vec![inner[0].add_scalar(1)?, matrix.matmul(&inner[1])?]),
                [DeviceArray::scalar(device, DType::I64, 0)?, state[1].clone()],
            )?;
            let w = &inner[1];
            Ok(vec![state[0].add_scalar(1)?, w.div(&w.norm()?)?])
        },
        [DeviceArray::scalar(device, DType::I64, 0)?, args[1].clone()],
    )?;
    Ok(vec![outer[1].clone()])
}

fn host_power_steps(matrix: [[f64; 2]; 2], mut v: [f64; 2], steps: usize) -> [f64; 2] {
    for _ in 0..steps {
        for _ in 0..2 {
            v = [
                matrix[0][0] * v[0] + matrix[0][1] * v[1],
                matrix[1][0] * v[0] + matrix[1][1] * v[1],
            ];
        }
        let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
        v = [v[0] / norm, v[1] / norm];
    }
    v
}

#[test]
fn nested_loops_with_blas_kernels_match_a_host_loop() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let eager = mock(&device);
    let rows = [[2.0, 1.0], [1.0, 3.0]];
    let matrix = DeviceArray::from_f64(&device, [2, 2], vec![2.0, 1.0, 1.0, 3.0])?;
    let args = |start: [f64; 2], steps: i64| -> Result<Vec<DeviceArray>> {
        Ok(vec![
            matrix.clone(),
            DeviceArray::from_f64(&device, [2], start.to_vec())?,
            i64_scalar(&device, steps),
        ])
    };

    {
        let _blocked = BlasCaptureGuard::set(false);
        let graphed = converter.graphify(|args| power_steps(&converter, args));
        assert!(matches!(
            graph_error(graphed.call(&args([1.0, 0.0], 3)?)),
            GraphError::CaptureUnsupported { .. }
        ));
    }

    let _allowed = BlasCaptureGuard::set(true);
    let graphed = converter.graphify(|args| power_steps(&converter, args));
    for (start, steps) in [([1.0, 0.0], 5), ([0.0, 1.0], 1), ([3.0, -4.0], 0)] {
        let captured = hosts(&graphed.call(&args(start, steps)?)?);
        assert_eq!(captured, hosts(&power_steps(&eager, &args(start, steps)?)?));
        let expected = host_power_steps(rows, start, steps as usize);
        for (actual, expected) in captured[0].iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-12, "{actual} vs {expected}");
        }
    }
    let settled = host(&graphed.call(&args([1.0, 1.0], 40)?)?[0]);
    assert!((settled[0].hypot(settled[1]) - 1.0).abs() < 1e-12);
    assert_eq!(converter.stats().captures, 1);
    Ok(())
}
