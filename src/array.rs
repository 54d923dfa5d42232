//! Functions and utilities for working with [ndarray] objects.
//!
//! These are the NumPy-style building blocks used by the envelope: bin edge generation,
//! right-inclusive digitization and one dimensional linear interpolation.

use crate::error::CloudError;

use ndarray::prelude::*;
use ndarray::s;
use serde_json::Value;

/// Returns `count + 1` linearly spaced bin edges spanning `[min, max]`.
///
/// The first and last edges are set to exactly `min` and `max` so that rounding can never leave
/// a boundary point outside of the bins.
pub fn linear_edges(min: f64, max: f64, count: usize) -> Array1<f64> {
    let mut edges = Array1::linspace(min, max, count + 1);
    pin_endpoints(&mut edges, min, max);
    edges
}

/// Returns `count + 1` geometrically spaced bin edges spanning `[min, max]`.
///
/// Both bounds must be non-zero and share a sign. Endpoints are pinned as for [linear_edges].
pub fn log_edges(min: f64, max: f64, count: usize) -> Result<Array1<f64>, CloudError> {
    if min == 0.0 || max == 0.0 || min.signum() != max.signum() {
        return Err(CloudError::InvalidDomain {
            min,
            max,
            reason: "log spacing requires non-zero bounds with the same sign",
        });
    }
    let sign = min.signum();
    let log_min = (min * sign).ln();
    let log_max = (max * sign).ln();
    let mut edges = Array1::linspace(log_min, log_max, count + 1).mapv_into(|e| sign * e.exp());
    pin_endpoints(&mut edges, min, max);
    Ok(edges)
}

fn pin_endpoints(edges: &mut Array1<f64>, min: f64, max: f64) {
    let last = edges.len() - 1;
    edges[0] = min;
    edges[last] = max;
}

/// Returns the bin index of `x` given the upper edges of each bin.
///
/// Equivalent to `numpy.digitize(x, upper_edges, right=True)`: the result is the number of upper
/// edges strictly less than `x`, so a value equal to an edge falls into the bin on its left.
/// Values above the last edge (and NaN) return `upper_edges.len()`.
pub fn digitize_right(x: f64, upper_edges: ArrayView1<f64>) -> usize {
    if x.is_nan() {
        return upper_edges.len();
    }
    // Edges are sorted, so a binary search over the contiguous slice is possible. Fall back to a
    // linear scan for non-contiguous views.
    match upper_edges.as_slice() {
        Some(edges) => edges.partition_point(|edge| *edge < x),
        None => upper_edges.iter().take_while(|edge| **edge < x).count(),
    }
}

/// Returns the midpoint of each pair of adjacent edges.
pub fn centers(edges: ArrayView1<f64>) -> Array1<f64> {
    let n = edges.len();
    (&edges.slice(s![1..]) + &edges.slice(s![..n - 1])) / 2.0
}

/// One dimensional linear interpolation.
///
/// Equivalent to `numpy.interp(x, xp, fp)` with `xp` increasing: values left of `xp[0]` take
/// `fp[0]`, values right of the last point take the last value.
///
/// # Arguments
///
/// * `x`: Coordinate to evaluate at
/// * `xp`: Known x coordinates, increasing, non-empty
/// * `fp`: Known values, same length as `xp`
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    debug_assert_eq!(xp.len(), fp.len());
    let last = xp.len() - 1;
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }
    // First index with xp[j] >= x. Guaranteed to be in 1..=last here.
    let j = xp.partition_point(|p| *p < x);
    let (x0, x1) = (xp[j - 1], xp[j]);
    let (f0, f1) = (fp[j - 1], fp[j]);
    if x1 == x0 {
        return f1;
    }
    f0 + (x - x0) * (f1 - f0) / (x1 - x0)
}

/// Replace NaN entries of `values` by interpolating over the non-NaN entries.
///
/// Returns [CloudError::EmptyEnvelope] if every entry is NaN.
///
/// # Arguments
///
/// * `positions`: x coordinate of each entry, increasing
/// * `values`: values to fill in place
pub fn fill_nan_by_interp(
    positions: ArrayView1<f64>,
    mut values: ArrayViewMut1<f64>,
) -> Result<(), CloudError> {
    if !values.iter().any(|v| v.is_nan()) {
        return Ok(());
    }
    let (xp, fp): (Vec<f64>, Vec<f64>) = positions
        .iter()
        .zip(values.iter())
        .filter(|(_, v)| !v.is_nan())
        .map(|(x, v)| (*x, *v))
        .unzip();
    if xp.is_empty() {
        return Err(CloudError::EmptyEnvelope);
    }
    for (x, v) in positions.iter().zip(values.iter_mut()) {
        if v.is_nan() {
            *v = interp(*x, &xp, &fp);
        }
    }
    Ok(())
}

/// Check that an array is a 2-column `(x, y)` table.
pub fn check_xy(array: &ArrayView2<f64>) -> Result<(), CloudError> {
    if array.ncols() != 2 {
        return Err(CloudError::UnsupportedShape {
            shape: array.shape().to_vec(),
            expected: "an (N, 2) array of x, y pairs",
        });
    }
    Ok(())
}

/// Build an `(N, 2)` array from a list of `(x, y)` pairs.
pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Array2<f64>, CloudError> {
    let flat: Vec<f64> = pairs.iter().flat_map(|(x, y)| [*x, *y]).collect();
    Array2::from_shape_vec((pairs.len(), 2), flat).map_err(CloudError::ShapeInvalid)
}

/// Build an `(N, 2)` array from the numeric `x_field` and `y_field` of JSON records.
///
/// Records where either field is absent or not a number are skipped. Returns the array and the
/// number of skipped records.
pub fn points_from_records(
    records: &[Value],
    x_field: &str,
    y_field: &str,
) -> Result<(Array2<f64>, usize), CloudError> {
    let pairs: Vec<(f64, f64)> = records
        .iter()
        .filter_map(|record| {
            let x = record.get(x_field)?.as_f64()?;
            let y = record.get(y_field)?.as_f64()?;
            Some((x, y))
        })
        .collect();
    let skipped = records.len() - pairs.len();
    Ok((from_pairs(&pairs)?, skipped))
}
