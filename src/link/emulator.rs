//! The external emulator collaborator.
//!
//! The emulator holds the regression/covariance machinery that is out of
//! scope here. The pipeline drives it through this trait: it asks for
//! adjusted expectation/variance values per sample, inspects construction
//! checkpoints to decide how to (re)build an iteration, and hands each
//! rank its shard of model realization data.
//!
//! Sub-systems (one per data point) are assigned to exactly one rank
//! each; all per-iteration data accessors return values for this rank's
//! active sub-systems, in a fixed order aligned with
//! [`active_subsystems`](Emulator::active_subsystems).

use crate::link::{DataSelector, ValueSpace};
use crate::models::{ConstructionCheckpoint, Result, SampleSet};
use serde::{Deserialize, Serialize};

/// The emulator implementation family.
///
/// The generic evaluate/analyze traversal is defined for the default
/// kind only and fails fast on anything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmulatorKind {
    /// The standard Bayes-linear emulator.
    Default,
    /// Any other emulator implementation.
    Custom(String),
}

/// One rank's share of the model realization data for an iteration:
/// one output column per owned sub-system, each of sample-set length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizationShard {
    /// Output columns, one per sub-system owned by the receiving rank.
    pub columns: Vec<Vec<f64>>,
}

/// A user-supplied emulator.
pub trait Emulator {
    /// The implementation family of this emulator.
    fn kind(&self) -> EmulatorKind {
        EmulatorKind::Default
    }

    /// Index of the last fully constructed iteration (0 if none).
    fn last_complete_iteration(&self) -> u32;

    /// Construction checkpoint of an iteration, or `None` if its
    /// construction was never started.
    fn construction_checkpoint(&self, iteration: u32) -> Option<ConstructionCheckpoint>;

    /// Minimum number of samples the regression method needs for cross
    /// validation.
    fn min_cross_val(&self) -> usize;

    /// Discard all iterations and prepare a fresh first iteration.
    fn reset(&mut self) -> Result<()>;

    /// Prepare construction of the given iteration, discarding any data
    /// from a later or conflicting construction. Returns true if
    /// persisted pipeline data must be reloaded.
    fn prepare_iteration(&mut self, iteration: u32) -> Result<bool>;

    /// Run the remaining construction sub-steps of an iteration (fit the
    /// sub-systems), continuing from its checkpoint.
    fn construct_iteration(&mut self, iteration: u32) -> Result<()>;

    /// Persist this rank's shard of the model realization data.
    fn store_realization(
        &mut self,
        iteration: u32,
        samples: &SampleSet,
        shard: RealizationShard,
    ) -> Result<()>;

    /// Adjusted expectation and variance per active sub-system for one
    /// parameter set.
    fn evaluate(&self, iteration: u32, par: &[f64]) -> Result<(Vec<f64>, Vec<f64>)>;

    /// Indices of this rank's active sub-systems.
    fn active_subsystems(&self, iteration: u32) -> Result<Vec<usize>>;

    /// Observed data values for this rank's active sub-systems.
    fn data_values(&self, iteration: u32) -> Result<Vec<f64>>;

    /// Observed data errors (upper, lower) for this rank's active
    /// sub-systems.
    fn data_errors(&self, iteration: u32) -> Result<Vec<(f64, f64)>>;

    /// Value spaces for this rank's active sub-systems.
    fn data_spaces(&self, iteration: u32) -> Result<Vec<ValueSpace>>;

    /// Data selectors for this rank's active sub-systems.
    fn data_selectors(&self, iteration: u32) -> Result<Vec<DataSelector>>;

    /// Data selectors for all sub-systems of all ranks, in rank-partition
    /// order (controller view).
    fn flat_selectors(&self, iteration: u32) -> Result<Vec<DataSelector>>;

    /// Number of active sub-systems on this rank.
    fn n_data(&self, iteration: u32) -> Result<usize>;

    /// Total number of active sub-systems across all ranks.
    fn n_data_total(&self, iteration: u32) -> Result<usize>;

    /// Number of sub-systems owned by each rank (controller view);
    /// contiguous index ranges summing to the total data-point count.
    fn subsystem_counts(&self, iteration: u32) -> Result<Vec<usize>>;

    /// Parameter-space bounds this iteration's samples are drawn from.
    fn sample_space(&self, iteration: u32) -> Result<Vec<(f64, f64)>>;

    /// The model evaluation samples of this iteration.
    fn sample_set(&self, iteration: u32) -> Result<SampleSet>;
}
