//! Min/max envelopes of sampled functions.
//!
//! An envelope divides an x domain into a fixed number of bins and records the smallest and
//! largest y value seen in each bin. Bins that received no points are filled by linear
//! interpolation between their non-empty neighbours. The result is an `(bin_count, 3)` array of
//! `[marker, min, max]` rows suitable for plotting an overview of dense data.
//!
//! Envelopes can be computed in one call with [envelope], or incrementally with
//! [EnvelopeState] when the input arrays arrive one at a time. Both produce identical output.

use std::str::FromStr;

use ndarray::prelude::*;
use ndarray::s;
use rayon::prelude::*;
use serde::Deserialize;
use strum_macros::Display;

use crate::array;
use crate::domain::{self, Combination, Domain};
use crate::error::CloudError;

/// Default number of envelope bins.
pub const DEFAULT_BIN_COUNT: usize = 100;

/// Which x value to report for each bin.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BinMark {
    /// Left edge of the bin
    Left,
    /// Right edge of the bin
    Right,
    /// Midpoint of the bin
    #[default]
    Center,
}

impl FromStr for BinMark {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "center" => Ok(Self::Center),
            _ => Err(CloudError::InvalidBinMark(s.to_string())),
        }
    }
}

/// How bin edges are spaced across the domain.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BinSpacing {
    /// Evenly spaced edges
    #[default]
    Linear,
    /// Geometrically spaced edges
    Log,
}

impl FromStr for BinSpacing {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "log" => Ok(Self::Log),
            _ => Err(CloudError::InvalidBinSpacing(s.to_string())),
        }
    }
}

/// Envelope configuration.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvelopeOptions {
    /// Number of bins to divide the domain into
    pub bin_count: usize,
    /// Bin edge spacing
    pub bin_spacing: BinSpacing,
    /// Bin marker reported in the first output column
    pub bin_mark: BinMark,
}

impl Default for EnvelopeOptions {
    fn default() -> Self {
        Self {
            bin_count: DEFAULT_BIN_COUNT,
            bin_spacing: BinSpacing::default(),
            bin_mark: BinMark::default(),
        }
    }
}

impl EnvelopeOptions {
    /// Return options with the given bin count and default spacing and marker.
    pub fn with_bin_count(bin_count: usize) -> Self {
        Self {
            bin_count,
            ..Default::default()
        }
    }

    /// Check the options before any computation takes place.
    pub fn validate(&self) -> Result<(), CloudError> {
        if self.bin_count == 0 {
            return Err(CloudError::InvalidBinCount(self.bin_count));
        }
        Ok(())
    }
}

/// Incremental envelope accumulator.
///
/// Created by [EnvelopeState::create], fed by any number of [EnvelopeState::update] calls and
/// turned into an output table by [EnvelopeState::finish]. `finish` consumes the state, so a
/// finished envelope cannot be updated again.
#[derive(Clone, Debug)]
pub struct EnvelopeState {
    /// `bin_count + 1` increasing bin edges.
    edges: Array1<f64>,
    /// `(bin_count, 2)` running minimum and maximum. NaN marks an empty bin.
    bounds: Array2<f64>,
    /// Marker policy applied by `finish`.
    mark: BinMark,
}

impl EnvelopeState {
    /// Create an empty envelope over `[min_x, max_x]`.
    ///
    /// # Arguments
    ///
    /// * `min_x`: Smallest x value of interest
    /// * `max_x`: Largest x value of interest
    /// * `options`: Bin count, spacing and marker
    pub fn create(min_x: f64, max_x: f64, options: &EnvelopeOptions) -> Result<Self, CloudError> {
        options.validate()?;
        if !min_x.is_finite() || !max_x.is_finite() {
            return Err(CloudError::InvalidDomain {
                min: min_x,
                max: max_x,
                reason: "bounds must be finite",
            });
        }
        if min_x > max_x {
            return Err(CloudError::InvalidDomain {
                min: min_x,
                max: max_x,
                reason: "minimum is greater than maximum",
            });
        }
        let edges = match options.bin_spacing {
            BinSpacing::Linear => array::linear_edges(min_x, max_x, options.bin_count),
            BinSpacing::Log => array::log_edges(min_x, max_x, options.bin_count)?,
        };
        Ok(Self {
            edges,
            bounds: Array2::from_elem((options.bin_count, 2), f64::NAN),
            mark: options.bin_mark,
        })
    }

    /// Number of bins.
    pub fn bin_count(&self) -> usize {
        self.bounds.nrows()
    }

    /// Domain covered by the bins.
    pub fn domain(&self) -> Domain {
        Domain::new(self.edges[0], self.edges[self.bin_count()])
    }

    /// Bin edges.
    pub fn edges(&self) -> ArrayView1<f64> {
        self.edges.view()
    }

    /// Fold an `(N, 2)` array of `(x, y)` points into the envelope.
    ///
    /// Points whose x lies outside the envelope's domain, or is NaN, are dropped.
    pub fn update(&mut self, points: ArrayView2<f64>) -> Result<(), CloudError> {
        array::check_xy(&points)?;
        let min_x = self.edges[0];
        let upper = self.edges.slice(s![1..]);
        let bin_count = upper.len();
        for point in points.rows() {
            let (x, y) = (point[0], point[1]);
            if x < min_x {
                continue;
            }
            let bin = array::digitize_right(x, upper);
            if bin == bin_count {
                continue;
            }
            fold(self.bounds.row_mut(bin), y, y);
        }
        Ok(())
    }

    /// Combine another envelope with identical bins into this one.
    pub fn merge(&mut self, other: &EnvelopeState) -> Result<(), CloudError> {
        if other.bin_count() != self.bin_count() {
            return Err(CloudError::ArgumentMismatch {
                what: "merged envelope bins",
                expected: self.bin_count(),
                actual: other.bin_count(),
            });
        }
        if other.edges != self.edges {
            let domain = other.domain();
            return Err(CloudError::InvalidDomain {
                min: domain.min,
                max: domain.max,
                reason: "merged envelope bins do not match",
            });
        }
        for (row, other_row) in self.bounds.rows_mut().into_iter().zip(other.bounds.rows()) {
            fold(row, other_row[0], other_row[1]);
        }
        Ok(())
    }

    /// Finish the envelope, returning a `(bin_count, 3)` array of `[marker, min, max]` rows.
    ///
    /// Empty bins are filled by linear interpolation over bin centers. Fails if no point ever
    /// landed inside the domain.
    pub fn finish(mut self) -> Result<Array2<f64>, CloudError> {
        let n = self.bin_count();
        let centers = array::centers(self.edges.view());
        array::fill_nan_by_interp(centers.view(), self.bounds.column_mut(0))?;
        array::fill_nan_by_interp(centers.view(), self.bounds.column_mut(1))?;

        let markers = match self.mark {
            BinMark::Left => self.edges.slice(s![..n]).to_owned(),
            BinMark::Right => self.edges.slice(s![1..]).to_owned(),
            BinMark::Center => centers,
        };
        let mut out = Array2::zeros((n, 3));
        out.column_mut(0).assign(&markers);
        out.slice_mut(s![.., 1..]).assign(&self.bounds);
        Ok(out)
    }
}

/// Update one `[min, max]` bin with a candidate minimum and maximum.
fn fold(mut bin: ArrayViewMut1<f64>, min: f64, max: f64) {
    if bin[0].is_nan() || min < bin[0] {
        bin[0] = min;
    }
    if bin[1].is_nan() || max > bin[1] {
        bin[1] = max;
    }
}

/// Compute the min/max envelope of a set of `(N, 2)` arrays.
///
/// The envelope spans the union of the arrays' domains. Each array is accumulated on its own
/// (in parallel) and the partial envelopes are merged before interpolation.
///
/// # Arguments
///
/// * `arrays`: `(x, y)` arrays, at least one
/// * `options`: Bin count, spacing and marker
pub fn envelope(
    arrays: &[ArrayView2<f64>],
    options: &EnvelopeOptions,
) -> Result<Array2<f64>, CloudError> {
    options.validate()?;
    for points in arrays {
        array::check_xy(points)?;
    }
    let domains = arrays
        .iter()
        .map(|points| domain::find_domain(points.view().into_dyn()))
        .collect::<Result<Vec<_>, _>>()?;
    let domain = domain::combine_domains(&domains, Combination::Union)?;
    tracing::debug!(
        "Computing envelope of {} arrays over {} with {} bins",
        arrays.len(),
        domain,
        options.bin_count
    );

    let empty = EnvelopeState::create(domain.min, domain.max, options)?;
    let state = arrays
        .par_iter()
        .map(|points| -> Result<EnvelopeState, CloudError> {
            let mut partial = empty.clone();
            partial.update(points.view())?;
            Ok(partial)
        })
        .try_reduce(
            || empty.clone(),
            |mut acc, partial| {
                acc.merge(&partial)?;
                Ok(acc)
            },
        )?;
    state.finish()
}
