//! Iteration records and construction checkpoints.

use crate::models::{CutoffVector, SampleSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A sub-step of emulator iteration construction that may still be
/// pending.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConstructionStep {
    /// Model realization data not yet evaluated.
    ModelRealization,
    /// Active parameters not yet determined.
    ActiveParameters,
    /// Regression not yet performed.
    Regression,
    /// Residual variance not yet computed.
    ResidualVariance,
    /// Covariance matrix not yet computed.
    Covariance,
}

/// The set of construction sub-steps still pending for one iteration.
///
/// A non-empty checkpoint means the iteration is incomplete. Iterations
/// complete strictly in order: an empty checkpoint at index `i` implies
/// empty checkpoints at all indices below `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionCheckpoint {
    pending: BTreeSet<ConstructionStep>,
}

impl ConstructionCheckpoint {
    /// A checkpoint with every sub-step pending (fresh iteration).
    pub fn full() -> Self {
        Self {
            pending: BTreeSet::from([
                ConstructionStep::ModelRealization,
                ConstructionStep::ActiveParameters,
                ConstructionStep::Regression,
                ConstructionStep::ResidualVariance,
                ConstructionStep::Covariance,
            ]),
        }
    }

    /// A checkpoint with nothing pending (complete iteration).
    pub fn complete() -> Self {
        Self::default()
    }

    /// A checkpoint with exactly the given sub-steps pending.
    pub fn with_pending(steps: impl IntoIterator<Item = ConstructionStep>) -> Self {
        Self {
            pending: steps.into_iter().collect(),
        }
    }

    /// Whether no sub-steps are pending.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the given sub-step is still pending.
    pub fn is_pending(&self, step: ConstructionStep) -> bool {
        self.pending.contains(&step)
    }

    /// Mark a sub-step as done.
    pub fn finish(&mut self, step: ConstructionStep) {
        self.pending.remove(&step);
    }

    /// The pending sub-steps.
    pub fn pending(&self) -> impl Iterator<Item = ConstructionStep> + '_ {
        self.pending.iter().copied()
    }
}

/// The persisted result of analyzing one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Cutoff vector used during the analysis.
    pub cutoffs: CutoffVector,
    /// Number of evaluation samples that were analyzed.
    pub n_eval: usize,
    /// The samples that survived every implausibility cutoff.
    pub plausible: SampleSet,
    /// When the analysis finished.
    pub analyzed_at: DateTime<Utc>,
}

/// Completion state of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    /// Never constructed.
    Unconstructed,
    /// Construction started but interrupted mid-way.
    PartiallyConstructed,
    /// Fully constructed, not yet analyzed.
    Unanalyzed,
    /// Fully constructed and analyzed.
    Analyzed,
}

/// Introspection snapshot of one iteration, as reported by
/// [`details`](crate::pipeline::Pipeline::details).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationDetails {
    /// Iteration index (1-based).
    pub iteration: u32,
    /// Completion state.
    pub status: IterationStatus,
    /// Construction sub-steps still pending, if any.
    pub pending_steps: Vec<ConstructionStep>,
    /// Number of evaluation samples used during analysis (0 if unanalyzed).
    pub n_eval: usize,
    /// Number of plausible samples surviving analysis (0 if unanalyzed).
    pub n_plausible: usize,
    /// Fraction of parameter space still plausible, if analyzed.
    pub parameter_space_remaining: Option<f64>,
}
