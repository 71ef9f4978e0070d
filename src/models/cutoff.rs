//! Implausibility cutoff vectors.
//!
//! A raw cutoff sequence may contain zeros ("wildcards"): a wildcard
//! inherits the nearest preceding non-zero cutoff, and wildcards leading
//! the sequence exempt that many of the largest implausibility values per
//! sample from checking. `cut_idx` is the index of the first real
//! (non-wildcard) cutoff.

use crate::models::{EikasiaError, Result};
use serde::{Deserialize, Serialize};

/// A validated implausibility cutoff vector.
///
/// Stores the cutoff values from the first real cutoff onward, together
/// with the number of leading wildcards (`cut_idx`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoffVector {
    cuts: Vec<f64>,
    cut_idx: usize,
}

impl CutoffVector {
    /// Validate and complete a raw cutoff sequence.
    ///
    /// Rules, applied in order:
    /// - all entries must be non-negative and finite;
    /// - each zero entry inherits the value of its predecessor;
    /// - an entry rising above its non-zero predecessor is invalid;
    /// - at least one non-zero entry must occur within the first
    ///   `n_data_total` entries.
    pub fn parse(raw: &[f64], n_data_total: usize) -> Result<Self> {
        if raw.is_empty() {
            return Err(EikasiaError::InvalidCutoffs(
                "cutoff vector is empty".to_string(),
            ));
        }
        for (i, &v) in raw.iter().enumerate() {
            if !v.is_finite() || v < 0.0 {
                return Err(EikasiaError::InvalidCutoffs(format!(
                    "cutoff {} is {}, expected a non-negative finite value",
                    i, v
                )));
            }
        }

        // Complete the sequence: wildcards inherit their predecessor.
        let mut completed = raw.to_vec();
        for i in 1..completed.len() {
            if completed[i] == 0.0 {
                completed[i] = completed[i - 1];
            } else if completed[i] > completed[i - 1] && completed[i - 1] != 0.0 {
                return Err(EikasiaError::InvalidCutoffs(format!(
                    "cutoff {} is higher than cutoff {} ({} > {})",
                    i,
                    i - 1,
                    completed[i],
                    completed[i - 1]
                )));
            }
        }

        // First real cutoff within the data-point count.
        let scan = completed.len().min(n_data_total);
        let cut_idx = completed[..scan]
            .iter()
            .position(|&v| v != 0.0)
            .ok_or_else(|| {
                EikasiaError::InvalidCutoffs(
                    "no non-wildcard implausibility cutoff was provided".to_string(),
                )
            })?;

        Ok(Self {
            cuts: completed[cut_idx..].to_vec(),
            cut_idx,
        })
    }

    /// The index of the first real cutoff (= number of leading wildcards).
    pub fn cut_idx(&self) -> usize {
        self.cut_idx
    }

    /// The cutoff values from the first real cutoff onward.
    pub fn cuts(&self) -> &[f64] {
        &self.cuts
    }

    /// The first real cutoff value.
    pub fn first_cut(&self) -> f64 {
        self.cuts[0]
    }
}
