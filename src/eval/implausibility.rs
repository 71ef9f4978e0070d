//! Implausibility computation and cutoff checking.
//!
//! Pure functions, no I/O. The univariate implausibility of a sample at
//! one data point is its normalized discrepancy from the observed value,
//! in standard-deviation units; the cutoff check compares each sample's
//! largest implausibility values against the cutoff vector.

use crate::link::{Model, ValueSpace};
use crate::models::{CutoffVector, EikasiaError, Result};

// Default discrepancy variances for logarithmic value spaces: a factor-2
// difference at 2 sigma, i.e. sigma = log(7/6) above and log(5/6) below.
const MD_VAR_LOG10: (f64, f64) = (0.0044818726418455815, 0.006269669725654501);
const MD_VAR_LN: (f64, f64) = (0.023762432091205918, 0.03324115007177121);

/// Perform the implausibility cutoff check on a batch of samples.
///
/// `uni_impl` holds one row per sample with the univariate implausibility
/// values of all active data points. Returns, per sample, whether it
/// passed every applicable cutoff and the implausibility value at the
/// first real (non-wildcard) cutoff position — always that position,
/// regardless of where the sample failed.
///
/// The scan runs column-wise: cutoff position 0 is checked across all
/// still-plausible samples, the plausible set shrinks, then position 1 is
/// checked on the smaller set, and the scan stops entirely once the set
/// is empty. This ordering matches the iteration semantics used
/// downstream and skips most comparisons when samples are rejected early.
pub fn check(cutoffs: &CutoffVector, uni_impl: &[Vec<f64>]) -> Result<(Vec<bool>, Vec<f64>)> {
    let n_sam = uni_impl.len();
    if n_sam == 0 {
        return Ok((Vec::new(), Vec::new()));
    }

    let n_data = uni_impl[0].len();
    if uni_impl.iter().any(|row| row.len() != n_data) {
        return Err(EikasiaError::ShapeMismatch(
            "implausibility rows have differing lengths".to_string(),
        ));
    }
    let cut_idx = cutoffs.cut_idx();
    if n_data <= cut_idx {
        return Err(EikasiaError::ShapeMismatch(format!(
            "{} data points cannot satisfy {} leading wildcards",
            n_data, cut_idx
        )));
    }

    // Sort each sample's values descending; leading wildcards exempt the
    // cut_idx largest values from checking.
    let sorted: Vec<Vec<f64>> = uni_impl
        .iter()
        .map(|row| {
            let mut r = row.clone();
            r.sort_unstable_by(|a, b| b.total_cmp(a));
            r
        })
        .collect();

    let first_cut: Vec<f64> = sorted.iter().map(|r| r[cut_idx]).collect();

    let mut pass = vec![true; n_sam];
    let mut active: Vec<usize> = (0..n_sam).collect();

    let n_checks = cutoffs.cuts().len().min(n_data - cut_idx);
    for k in 0..n_checks {
        let cut = cutoffs.cuts()[k];
        active.retain(|&s| {
            if sorted[s][cut_idx + k] <= cut {
                true
            } else {
                pass[s] = false;
                false
            }
        });
        if active.is_empty() {
            break;
        }
    }

    Ok((pass, first_cut))
}

/// Univariate implausibility per active data point.
///
/// All slices are parallel over this rank's active sub-systems. Errors
/// and discrepancy variances are (upper, lower) pairs; the upper entries
/// apply when the adjusted expectation lies at or above the observed
/// value, the lower entries otherwise.
pub fn univariate(
    adj_exp: &[f64],
    adj_var: &[f64],
    md_var: &[(f64, f64)],
    data_values: &[f64],
    data_errors: &[(f64, f64)],
) -> Result<Vec<f64>> {
    let n = data_values.len();
    if adj_exp.len() != n || adj_var.len() != n || md_var.len() != n || data_errors.len() != n {
        return Err(EikasiaError::ShapeMismatch(format!(
            "expected {} values per data accessor, got exp={} var={} md={} err={}",
            n,
            adj_exp.len(),
            adj_var.len(),
            md_var.len(),
            data_errors.len()
        )));
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let (md_up, md_lo) = md_var[i];
        let (err_up, err_lo) = data_errors[i];
        let (md, err) = if adj_exp[i] < data_values[i] {
            (md_lo, err_lo)
        } else {
            (md_up, err_up)
        };
        let diff = adj_exp[i] - data_values[i];
        let impl_sq = diff * diff / (adj_var[i] + md + err * err);
        out.push(impl_sq.sqrt());
    }
    Ok(out)
}

/// Default model discrepancy variance per data point, derived from the
/// data's value space: linear values get `(value/6)²`, logarithmic
/// spaces get fixed constants (a factor-2 spread at 2 sigma).
pub fn default_md_var(data_values: &[f64], spaces: &[ValueSpace]) -> Result<Vec<(f64, f64)>> {
    if data_values.len() != spaces.len() {
        return Err(EikasiaError::ShapeMismatch(format!(
            "{} data values but {} value spaces",
            data_values.len(),
            spaces.len()
        )));
    }
    data_values
        .iter()
        .zip(spaces.iter())
        .map(|(&value, space)| match space {
            ValueSpace::Linear => {
                let sigma = value / 6.0;
                Ok((sigma * sigma, sigma * sigma))
            }
            ValueSpace::Log10 => Ok(MD_VAR_LOG10),
            ValueSpace::Ln => Ok(MD_VAR_LN),
        })
        .collect()
}

/// Model discrepancy variance for one parameter set: the model's own if
/// it supplies one, the value-space default otherwise.
pub fn discrepancy_variance<M: Model>(
    model: &M,
    iteration: u32,
    par: &[f64],
    selectors: &[i64],
    data_values: &[f64],
    spaces: &[ValueSpace],
) -> Result<Vec<(f64, f64)>> {
    match model.discrepancy_variance(iteration, par, selectors)? {
        Some(md) => {
            if md.len() != data_values.len() {
                return Err(EikasiaError::ShapeMismatch(format!(
                    "model supplied {} discrepancy variances for {} data points",
                    md.len(),
                    data_values.len()
                )));
            }
            Ok(md)
        }
        None => default_md_var(data_values, spaces),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CutoffVector;

    /// Reference implementation: full per-sample scan over all cutoffs.
    fn check_naive(cutoffs: &CutoffVector, uni_impl: &[Vec<f64>]) -> (Vec<bool>, Vec<f64>) {
        let cut_idx = cutoffs.cut_idx();
        let mut pass = Vec::new();
        let mut first_cut = Vec::new();
        for row in uni_impl {
            let mut sorted = row.clone();
            sorted.sort_unstable_by(|a, b| b.total_cmp(a));
            let remaining = &sorted[cut_idx..];
            first_cut.push(remaining[0]);
            let ok = remaining
                .iter()
                .zip(cutoffs.cuts().iter())
                .all(|(&v, &c)| v <= c);
            pass.push(ok);
        }
        (pass, first_cut)
    }

    fn pseudo_rows(n_sam: usize, n_data: usize) -> Vec<Vec<f64>> {
        // Deterministic pseudo-random values in [0, 8)
        let mut state = 0x2545f491u64;
        (0..n_sam)
            .map(|_| {
                (0..n_data)
                    .map(|_| {
                        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                        (state >> 33) as f64 / (1u64 << 31) as f64 * 8.0
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn column_scan_matches_naive_scan() {
        for &(n_sam, n_data) in &[(1usize, 3usize), (7, 4), (40, 6)] {
            for raw in [
                vec![0.0, 4.0, 3.8, 3.5],
                vec![3.0],
                vec![0.0, 0.0, 5.0, 2.0],
            ] {
                let cutoffs = CutoffVector::parse(&raw, n_data).unwrap();
                if n_data <= cutoffs.cut_idx() {
                    continue;
                }
                let rows = pseudo_rows(n_sam, n_data);
                let fast = check(&cutoffs, &rows).unwrap();
                let naive = check_naive(&cutoffs, &rows);
                assert_eq!(fast.0, naive.0);
                assert_eq!(fast.1, naive.1);
            }
        }
    }

    #[test]
    fn tightening_a_cutoff_never_revives_a_sample() {
        let rows = pseudo_rows(30, 4);
        let loose = CutoffVector::parse(&[0.0, 5.0, 4.0], 4).unwrap();
        let tight = CutoffVector::parse(&[0.0, 4.0, 4.0], 4).unwrap();
        let (pass_loose, _) = check(&loose, &rows).unwrap();
        let (pass_tight, _) = check(&tight, &rows).unwrap();
        for (l, t) in pass_loose.iter().zip(pass_tight.iter()) {
            // pass under tight implies pass under loose
            assert!(!*t || *l);
        }
    }

    #[test]
    fn recorded_value_is_at_first_real_cutoff() {
        // Sample fails at the second cutoff, but the recorded value is
        // still the one at the first real cutoff position.
        let cutoffs = CutoffVector::parse(&[0.0, 4.0, 1.0], 3).unwrap();
        let rows = vec![vec![9.0, 3.0, 2.0]];
        let (pass, first_cut) = check(&cutoffs, &rows).unwrap();
        assert_eq!(pass, vec![false]);
        assert_eq!(first_cut, vec![3.0]);
    }

    #[test]
    fn wildcards_exempt_the_largest_values() {
        // Two leading wildcards: the two largest values are skipped.
        let cutoffs = CutoffVector::parse(&[0.0, 0.0, 3.0], 3).unwrap();
        let rows = vec![vec![100.0, 50.0, 2.0], vec![100.0, 50.0, 3.5]];
        let (pass, first_cut) = check(&cutoffs, &rows).unwrap();
        assert_eq!(pass, vec![true, false]);
        assert_eq!(first_cut, vec![2.0, 3.5]);
    }

    #[test]
    fn too_many_wildcards_for_the_data_is_an_error() {
        let cutoffs = CutoffVector::parse(&[0.0, 0.0, 3.0], 3).unwrap();
        let rows = vec![vec![1.0, 2.0]];
        assert!(check(&cutoffs, &rows).is_err());
    }

    #[test]
    fn empty_batch_passes_through() {
        let cutoffs = CutoffVector::parse(&[3.0], 2).unwrap();
        let (pass, first_cut) = check(&cutoffs, &[]).unwrap();
        assert!(pass.is_empty() && first_cut.is_empty());
    }

    #[test]
    fn univariate_uses_asymmetric_errors() {
        // adj_exp below the data value selects the lower error.
        let uni = univariate(
            &[1.0, 5.0],
            &[0.0, 0.0],
            &[(0.0, 0.0), (0.0, 0.0)],
            &[3.0, 3.0],
            &[(1.0, 2.0), (1.0, 2.0)],
        )
        .unwrap();
        assert!((uni[0] - 1.0).abs() < 1e-12); // |1-3| / sqrt(2²)
        assert!((uni[1] - 2.0).abs() < 1e-12); // |5-3| / sqrt(1²)
    }

    #[test]
    fn default_md_var_matches_value_spaces() {
        let md = default_md_var(
            &[6.0, 1.0, 1.0],
            &[ValueSpace::Linear, ValueSpace::Log10, ValueSpace::Ln],
        )
        .unwrap();
        assert_eq!(md[0], (1.0, 1.0));
        // log10(7/6)² and log10(5/6)²
        assert!((md[1].0 - (7.0f64 / 6.0).log10().powi(2)).abs() < 1e-15);
        assert!((md[1].1 - (5.0f64 / 6.0).log10().powi(2)).abs() < 1e-15);
        // ln(7/6)² and ln(5/6)²
        assert!((md[2].0 - (7.0f64 / 6.0).ln().powi(2)).abs() < 1e-15);
        assert!((md[2].1 - (5.0f64 / 6.0).ln().powi(2)).abs() < 1e-15);
    }
}
