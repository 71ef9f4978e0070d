//! Remote-call descriptors dispatched from the controller to workers.
//!
//! A call is a closed set of known operations rather than an arbitrary
//! function reference. Arguments that must differ per rank are expressed
//! as [`ArgSource::Local`] references, resolved against the receiving
//! rank's own state right before execution.

use crate::models::SampleSet;
use serde::{Deserialize, Serialize};

/// An argument that is either carried inline or resolved rank-locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArgSource<T> {
    /// The value itself, identical on every rank.
    Inline(T),
    /// A reference into the receiving rank's local state.
    Local(LocalRef),
}

/// Known rank-local values a call argument can refer to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LocalRef {
    /// The plausible sample set recorded for the given iteration.
    PlausibleSamples(u32),
}

/// The operations the controller can dispatch into the process group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteCall {
    /// Discard all emulator iterations and prepare a fresh first one.
    CreateEmulator,
    /// Prepare construction of the given iteration.
    PrepareIteration(u32),
    /// Evaluate samples in the model and distribute the realization
    /// data to the owning sub-systems.
    GatherIterationData {
        /// The iteration under construction.
        iteration: u32,
        /// The samples to evaluate.
        samples: ArgSource<SampleSet>,
    },
    /// Analyze the last constructed iteration.
    Analyze,
}

/// Rank-local result of executing a remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nothing to report.
    Unit,
    /// Whether persisted pipeline data must be reloaded
    /// (from [`RemoteCall::PrepareIteration`]).
    Reload(bool),
}
