//! Simple sine wave model, used for exercising the pipeline.

use crate::link::{CallProfile, DataSelector, Model};
use crate::models::Result;

/// A four-parameter sine wave model.
///
/// The value at data point `x` is `A + 0.1·B·sin(C·x + D)`.
#[derive(Debug, Clone, Default)]
pub struct SineWaveModel;

impl Model for SineWaveModel {
    fn n_par(&self) -> usize {
        4
    }

    fn par_ranges(&self) -> Vec<(f64, f64)> {
        // A, B, C, D
        vec![(2.0, 7.0), (-1.0, 12.0), (0.0, 10.0), (1.5, 5.0)]
    }

    fn call_profile(&self) -> CallProfile {
        CallProfile {
            multi: true,
            every_rank: false,
        }
    }

    fn call(&self, _iteration: u32, par: &[f64], data_idx: &[DataSelector]) -> Result<Vec<f64>> {
        let (a, b, c, d) = (par[0], par[1], par[2], par[3]);
        Ok(data_idx
            .iter()
            .map(|&x| a + 0.1 * b * (c * x as f64 + d).sin())
            .collect())
    }

    fn discrepancy_variance(
        &self,
        _iteration: u32,
        _par: &[f64],
        data_idx: &[DataSelector],
    ) -> Result<Option<Vec<(f64, f64)>>> {
        Ok(Some(vec![(0.01, 0.01); data_idx.len()]))
    }
}
