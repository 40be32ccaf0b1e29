//! Demo workloads driven by the CLI. Every workload is written once against [`GraphConverter`]
//! and runs unchanged under the capturing and the eager converter.

use anyhow::Result;
use clap::ValueEnum;
use devgraph::signal::{cspline1d, cspline1d_eval};
use devgraph::{Branch, DType, Device, DeviceArray, GraphConverter};
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;

const KMEANS_CLUSTERS: [(f64, f64); 3] = [(0.0, 0.0), (6.0, 6.0), (0.0, 6.0)];
const KMEANS_MAX_ITERATIONS: i64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Workload {
    /// Counts an integer up to `size` in a single while loop.
    Counter,
    /// Sums `i * j` over a `size x size` grid with nested while loops.
    Nested,
    /// Lloyd's algorithm on three noisy clusters of `size` points each.
    Kmeans,
    /// Piecewise classification of a random value through a four-way multicond.
    Multicond,
    /// Resamples a noisy `size`-sample signal at half-sample spacing through a cubic spline.
    Spline,
}

impl Workload {
    /// Fresh arguments for one call. Shapes depend only on `size`, so every call of a workload
    /// shares one graph signature.
    pub fn inputs(self, device: &Device, size: usize, rng: &mut StdRng) -> Result<Vec<DeviceArray>> {
        let size = size.max(1);
        match self {
            Workload::Counter => Ok(vec![
                DeviceArray::scalar(device, DType::I64, rng.gen_range(0..size as i64))?,
                DeviceArray::scalar(device, DType::I64, size as i64)?,
            ]),
            Workload::Nested => {
                let n = rng.gen_range(0..=size as i64);
                Ok(vec![
                    DeviceArray::scalar(device, DType::I64, n)?,
                    DeviceArray::scalar(device, DType::I64, size as i64)?,
                ])
            }
            Workload::Kmeans => {
                let mut data = Vec::with_capacity(KMEANS_CLUSTERS.len() * size * 2);
                for (cx, cy) in KMEANS_CLUSTERS {
                    for _ in 0..size {
                        data.push(cx + rng.gen_range(-1.0..1.0));
                        data.push(cy + rng.gen_range(-1.0..1.0));
                    }
                }
                let points =
                    DeviceArray::from_f64(device, [KMEANS_CLUSTERS.len() * size, 2], data)?;
                let picks: Vec<i64> = (0..KMEANS_CLUSTERS.len())
                    .map(|cluster| (cluster * size) as i64)
                    .collect();
                let picks = DeviceArray::from_i64(device, [picks.len()], picks)?;
                let centroids = points.take(&picks)?;
                Ok(vec![points, centroids])
            }
            Workload::Multicond => Ok(vec![
                DeviceArray::scalar(device, DType::F64, rng.gen_range(-50.0..250.0))?,
                DeviceArray::scalar(device, DType::F64, 0.0)?,
            ]),
            Workload::Spline => {
                let samples: Vec<f64> = (0..size.max(4))
                    .map(|i| (i as f64 * 0.3).sin() + rng.gen_range(-0.05..0.05))
                    .collect();
                let points: Vec<f64> = (0..2 * samples.len() - 1)
                    .map(|j| j as f64 * 0.5)
                    .collect();
                Ok(vec![
                    DeviceArray::from_f64(device, [samples.len()], samples)?,
                    DeviceArray::from_f64(device, [points.len()], points)?,
                ])
            }
        }
    }

    pub fn run<C: GraphConverter>(
        self,
        converter: &C,
        args: &[DeviceArray],
    ) -> Result<Vec<DeviceArray>> {
        match self {
            Workload::Counter => counter(converter, args),
            Workload::Nested => grid_sum(converter, args),
            Workload::Kmeans => kmeans(converter, args),
            Workload::Multicond => classify(converter, args),
            Workload::Spline => resample(args),
        }
    }
}

/// `[start, limit]` -> `[final, steps]`
fn counter<C: GraphConverter>(converter: &C, args: &[DeviceArray]) -> Result<Vec<DeviceArray>> {
    let limit = args[1].clone();
    let state = converter.while_loop(
        |state| state[0].lt(&limit),
        |state| Ok(vec![state[0].add_scalar(1)?, state[1].add_scalar(1)?]),
        [
            args[0].copy()?,
            DeviceArray::scalar(converter.device(), DType::I64, 0)?,
        ],
    )?;
    Ok(state.into_vec())
}

/// `[n, m]` -> `[sum_{i < n} sum_{j < m} i * j]`
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

/// `[points, centroids]` -> `[centroids, iterations]`
fn kmeans<C: GraphConverter>(converter: &C, args: &[DeviceArray]) -> Result<Vec<DeviceArray>> {
    let device = converter.device();
    let points = args[0].clone();
    let (n, k) = (points.dims()[0], args[1].dims()[0]);
    let cluster_ids = DeviceArray::arange(device, k, DType::I64)?.reshape([1, k])?;

    let state = converter.while_loop(
        |state| {
            state[0]
                .lt_scalar(KMEANS_MAX_ITERATIONS)?
                .logical_and(&state[2].gt_scalar(0.0)?)
        },
        |state| {
            let centroids = &state[1];
            let diff = points
                .reshape([n, 1, 2])?
                .sub(&centroids.reshape([1, k, 2])?)?;
            let labels = diff.mul(&diff)?.sum_axis(2)?.argmin(Some(1))?;
            let one_hot = labels
                .reshape([n, 1])?
                .eq(&cluster_ids)?
                .astype(DType::F64)?;
            let sums = one_hot
                .reshape([n, k, 1])?
                .mul(&points.reshape([n, 1, 2])?)?
                .sum_axis(0)?;
            let counts = one_hot.sum_axis(0)?.reshape([k, 1])?;
            let means = sums.div(&counts.maximum_scalar(1.0)?)?;
            let updated = DeviceArray::select(&counts.gt_scalar(0.0)?, &means, centroids)?;
            let shift = updated.sub(centroids)?.abs()?.max()?;
            Ok(vec![state[0].add_scalar(1)?, updated, shift])
        },
        [
            DeviceArray::scalar(device, DType::I64, 0)?,
            args[1].copy()?,
            DeviceArray::scalar(device, DType::F64, f64::INFINITY)?,
        ],
    )?;
    Ok(vec![state[1].clone(), state[0].clone()])
}

/// `[x, out]` -> `[out]`, with `out` overwritten by a piecewise function of `x`.
fn classify<C: GraphConverter>(converter: &C, args: &[DeviceArray]) -> Result<Vec<DeviceArray>> {
    converter.multicond(
        args,
        vec![
            Branch::when(|ops| ops[0].lt_scalar(0.0), |ops| ops[1].fill(-1.0)),
            Branch::when(
                |ops| ops[0].lt_scalar(10.0),
                |ops| ops[1].assign(&ops[0].mul_scalar(2.0)?),
            ),
            Branch::when(
                |ops| ops[0].lt_scalar(100.0),
                |ops| ops[1].assign(&ops[0].sqrt()?),
            ),
            Branch::otherwise(|ops| ops[1].fill(0.0)),
        ],
    )?;
    Ok(vec![args[1].clone()])
}

/// `[samples, points]` -> `[values]`
fn resample(args: &[DeviceArray]) -> Result<Vec<DeviceArray>> {
    let coefficients = cspline1d(&args[0], 0.0)?;
    Ok(vec![cspline1d_eval(&coefficients, &args[1], 1.0, 0.0)?])
}
