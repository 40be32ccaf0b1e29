//! Separable 2-D FIR filtering with half-sample symmetric boundaries.

use crate::device::{BackendError, BackendResult, HostKernel};
use crate::tensor::{ArraySpec, HostData};

/// Maps `index` into `[0, len)` by reflecting about the half-sample points `-0.5` and
/// `len - 0.5`, so `d c b a | a b c d | d c b a`.
pub(crate) fn reflect_index(index: isize, len: usize) -> usize {
    let len = len as isize;
    let period = 2 * len;
    let folded = index.rem_euclid(period);
    if folded >= len {
        (period - 1 - folded) as usize
    } else {
        folded as usize
    }
}

/// `out[i] = sum_m taps[m] * line[reflect(i + c - m)]` with `c = taps.len() / 2`.
fn convolve_line(line: &[f64], taps: &[f64]) -> Vec<f64> {
    let centre = (taps.len() / 2) as isize;
    (0..line.len() as isize)
        .map(|i| {
            taps.iter()
                .enumerate()
                .map(|(m, tap)| tap * line[reflect_index(i + centre - m as isize, line.len())])
                .sum()
        })
        .collect()
}

/// Filters the columns of a row-major `rows x cols` image with `hcol`, then its rows with
/// `hrow`.
pub(crate) fn separable_filter(
    image: &[f64],
    rows: usize,
    cols: usize,
    hrow: &[f64],
    hcol: &[f64],
) -> Vec<f64> {
    let mut columns_done = vec![0.0; image.len()];
    let mut column = vec![0.0; rows];
    for c in 0..cols {
        for (r, value) in column.iter_mut().enumerate() {
            *value = image[r * cols + c];
        }
        for (r, value) in convolve_line(&column, hcol).into_iter().enumerate() {
            columns_done[r * cols + c] = value;
        }
    }
    columns_done
        .chunks(cols.max(1))
        .flat_map(|row| convolve_line(row, hrow))
        .collect()
}

/// Kernel launched by `sepfir2d`. Inputs are `[image, hrow, hcol]`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SepFir2dKernel {
    pub(crate) rows: usize,
    pub(crate) cols: usize,
}

impl HostKernel for SepFir2dKernel {
    fn name(&self) -> &str {
        "sepfir2d"
    }

    fn evaluate(&self, inputs: &[&HostData], output: &ArraySpec) -> BackendResult<HostData> {
        let [image, hrow, hcol] = inputs else {
            return Err(BackendError::invalid(
                "sepfir2d",
                format!("expected 3 inputs, got {}", inputs.len()),
            ));
        };
        let expected = self.rows * self.cols;
        if image.len() != expected || output.num_elements() != expected {
            return Err(BackendError::invalid(
                "sepfir2d",
                format!(
                    "image of {} elements for a {}x{} output {output}",
                    image.len(),
                    self.rows,
                    self.cols
                ),
            ));
        }
        let filtered = separable_filter(
            &image.to_f64_vec(),
            self.rows,
            self.cols,
            &hrow.to_f64_vec(),
            &hcol.to_f64_vec(),
        );
        Ok(HostData::from_f64_iter(output.dtype, filtered))
    }
}
