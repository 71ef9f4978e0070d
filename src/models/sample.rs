//! Parameter sample sets.
//!
//! A `SampleSet` is an ordered sequence of parameter vectors of fixed
//! dimensionality. Before a set is merged into an iteration it is sorted
//! canonically and deduplicated, which makes merge and set-difference
//! operations deterministic across reruns and rank boundaries.

use crate::models::{EikasiaError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An ordered set of parameter vectors with fixed dimensionality.
///
/// Sample sets are value types: they are copied across rank boundaries by
/// the collectives and never shared by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    n_par: usize,
    rows: Vec<Vec<f64>>,
}

impl SampleSet {
    /// Create an empty sample set for `n_par` model parameters.
    pub fn empty(n_par: usize) -> Self {
        Self {
            n_par,
            rows: Vec::new(),
        }
    }

    /// Create a sample set from raw rows.
    ///
    /// Every row must have length `n_par` and contain only finite values.
    pub fn new(n_par: usize, rows: Vec<Vec<f64>>) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_par {
                return Err(EikasiaError::InvalidSamples(format!(
                    "sample {} has {} parameters, expected {}",
                    i,
                    row.len(),
                    n_par
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(EikasiaError::InvalidSamples(format!(
                    "sample {} contains a non-finite value",
                    i
                )));
            }
        }
        Ok(Self { n_par, rows })
    }

    /// Number of parameters per sample.
    pub fn n_par(&self) -> usize {
        self.n_par
    }

    /// Number of samples in the set.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the set contains no samples.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The sample rows.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Iterate over the sample rows.
    pub fn iter(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.rows.iter().map(|r| r.as_slice())
    }

    /// Sort the set into its canonical (lexicographic) order and drop
    /// duplicate rows. Idempotent.
    pub fn canonicalize(&mut self) {
        self.rows.sort_unstable_by(|a, b| cmp_rows(a, b));
        self.rows.dedup();
    }

    /// Return a canonically sorted, deduplicated copy.
    pub fn canonicalized(mut self) -> Self {
        self.canonicalize();
        self
    }

    /// Append all rows of `other`, then canonicalize.
    pub fn merge(&mut self, other: &SampleSet) -> Result<()> {
        if other.n_par != self.n_par {
            return Err(EikasiaError::ShapeMismatch(format!(
                "cannot merge sample sets with {} and {} parameters",
                self.n_par, other.n_par
            )));
        }
        self.rows.extend(other.rows.iter().cloned());
        self.canonicalize();
        Ok(())
    }

    /// Return the rows of `self` that do not occur in `other`, in
    /// canonical order.
    pub fn difference(&self, other: &SampleSet) -> SampleSet {
        let rows = self
            .rows
            .iter()
            .filter(|row| !other.rows.iter().any(|o| o == *row))
            .cloned()
            .collect();
        SampleSet {
            n_par: self.n_par,
            rows,
        }
        .canonicalized()
    }

    /// Select the rows at `indices`, preserving the given order.
    pub fn select(&self, indices: &[usize]) -> SampleSet {
        SampleSet {
            n_par: self.n_par,
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

/// Lexicographic total order over parameter vectors.
fn cmp_rows(a: &[f64], b: &[f64]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.total_cmp(y) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    Ordering::Equal
}
