//! Domains of data series.
//!
//! A domain is the x-axis extent `[min, max]` spanned by a series. Multiple domains can be
//! combined as their union (outer bound) or intersection (common overlap).

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayViewD, Axis};
use ndarray_stats::{errors::MinMaxError, QuantileExt};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::CloudError;

/// The `[min, max]` x-extent of one or more series.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Domain {
    pub min: f64,
    pub max: f64,
}

impl Domain {
    /// Return a new Domain.
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether this domain shares at least one point with `other`.
    pub fn overlaps(&self, other: &Domain) -> bool {
        !(other.max < self.min || other.min > self.max)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

impl From<(f64, f64)> for Domain {
    fn from((min, max): (f64, f64)) -> Self {
        Self::new(min, max)
    }
}

/// How to combine several domains.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, PartialEq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Combination {
    /// Smallest interval containing every domain
    #[default]
    Union,
    /// Largest interval contained in every domain
    Intersection,
}

impl FromStr for Combination {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "union" => Ok(Self::Union),
            "intersection" => Ok(Self::Intersection),
            _ => Err(CloudError::InvalidCombination(s.to_string())),
        }
    }
}

/// Map an [ndarray_stats] min/max failure onto a [CloudError].
fn min_max_error(error: MinMaxError) -> CloudError {
    match error {
        MinMaxError::EmptyInput => CloudError::EmptyInput {
            operation: "find_domain",
        },
        MinMaxError::UndefinedOrder => CloudError::UndefinedOrder {
            operation: "find_domain",
        },
    }
}

/// Find the domain of an input series.
///
/// A 1-D array is taken to be the x values themselves. For a 2-D array the first column is used.
///
/// # Arguments
///
/// * `data`: Series to inspect
pub fn find_domain(data: ArrayViewD<f64>) -> Result<Domain, CloudError> {
    let axis = match data.ndim() {
        1 => data,
        2 => {
            if data.shape()[1] == 0 {
                return Err(CloudError::UnsupportedShape {
                    shape: data.shape().to_vec(),
                    expected: "at least one column",
                });
            }
            data.index_axis_move(Axis(1), 0)
        }
        _ => {
            return Err(CloudError::UnsupportedShape {
                shape: data.shape().to_vec(),
                expected: "a 1-D or 2-D array",
            })
        }
    };
    let min = *axis.min().map_err(min_max_error)?;
    let max = *axis.max().map_err(min_max_error)?;
    Ok(Domain::new(min, max))
}

/// Combine a list of domains.
///
/// For a union the result is the outer bound of all domains. For an intersection a running
/// overlap is narrowed domain by domain, failing as soon as the next domain does not overlap it.
///
/// # Arguments
///
/// * `domains`: Domains to combine, at least one
/// * `how`: Combination policy
pub fn combine_domains(domains: &[Domain], how: Combination) -> Result<Domain, CloudError> {
    let (first, rest) = domains.split_first().ok_or(CloudError::EmptyInput {
        operation: "combine_domains",
    })?;
    match how {
        Combination::Union => Ok(rest.iter().fold(*first, |acc, d| {
            Domain::new(acc.min.min(d.min), acc.max.max(d.max))
        })),
        Combination::Intersection => {
            let mut running = *first;
            for next in rest {
                if !running.overlaps(next) {
                    return Err(CloudError::DisjointDomains {
                        running,
                        next: *next,
                    });
                }
                running = Domain::new(running.min.max(next.min), running.max.min(next.max));
            }
            Ok(running)
        }
    }
}

/// Find and combine the domains of several series.
pub fn combine_series_domains(
    series: &[ArrayViewD<f64>],
    how: Combination,
) -> Result<Domain, CloudError> {
    let domains = series
        .iter()
        .map(|s| find_domain(s.view()))
        .collect::<Result<Vec<_>, _>>()?;
    combine_domains(&domains, how)
}
