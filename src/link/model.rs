//! The external model collaborator.
//!
//! The model is the expensive simulation the emulator stands in for. The
//! pipeline only needs to call it, ask which evaluation strategy it
//! supports, and optionally query its discrepancy variances.

use crate::models::{Result, SampleSet};
use serde::{Deserialize, Serialize};

/// Identifier of a single observed data point.
pub type DataSelector = i64;

/// The space a data point's value lives in, which determines the default
/// model discrepancy variance when the model does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSpace {
    /// Plain linear values.
    Linear,
    /// Base-10 logarithmic values.
    Log10,
    /// Natural logarithmic values.
    Ln,
}

/// How a model wants to be called. Fixed per model, never chosen
/// dynamically per call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallProfile {
    /// If true, the model takes a whole sample batch in one call;
    /// otherwise it is called once per sample.
    pub multi: bool,
    /// If true, every rank in the process group calls the model (the
    /// model coordinates internally); otherwise only the controller
    /// calls it and outputs are redistributed afterwards.
    pub every_rank: bool,
}

/// A user-supplied model.
pub trait Model {
    /// Number of model parameters.
    fn n_par(&self) -> usize;

    /// Lower/upper bound per model parameter.
    fn par_ranges(&self) -> Vec<(f64, f64)>;

    /// The evaluation strategy this model supports.
    fn call_profile(&self) -> CallProfile {
        CallProfile::default()
    }

    /// Evaluate the model for one parameter set, returning one value per
    /// requested data point.
    fn call(&self, iteration: u32, par: &[f64], data_idx: &[DataSelector]) -> Result<Vec<f64>>;

    /// Evaluate the model for a whole sample batch.
    ///
    /// The default forwards to [`call`](Model::call) sample by sample;
    /// models with `multi` profiles override this.
    fn call_batch(
        &self,
        iteration: u32,
        samples: &SampleSet,
        data_idx: &[DataSelector],
    ) -> Result<Vec<Vec<f64>>> {
        samples
            .iter()
            .map(|par| self.call(iteration, par, data_idx))
            .collect()
    }

    /// Model discrepancy variance per data point, as (upper, lower)
    /// pairs.
    ///
    /// `Ok(None)` means the model does not supply discrepancy variances
    /// and the pipeline falls back to defaults derived from each data
    /// point's value space.
    fn discrepancy_variance(
        &self,
        iteration: u32,
        par: &[f64],
        data_idx: &[DataSelector],
    ) -> Result<Option<Vec<(f64, f64)>>> {
        let _ = (iteration, par, data_idx);
        Ok(None)
    }
}
