//! eikasia - Iterative history matching over a process group.
//!
//! ## Architecture
//!
//! eikasia drives successive emulator iterations of an expensive model:
//! evaluate candidate parameter samples against the emulator, cut away
//! the regions of parameter space that are statistically implausible
//! given the observed data, and seed the next iteration with the
//! survivors.
//!
//! - **Process group**: one controller rank plus workers, coordinated
//!   exclusively through blocking collectives (broadcast, scatter,
//!   gather, barrier, all-reduce)
//! - **Call dispatch**: workers enter a listening mode and execute call
//!   descriptors broadcast by the controller, so a single logical
//!   control flow can fan dynamically-chosen work out to the group
//! - **Iteration controller**: decides per iteration whether to
//!   construct from scratch, resume from a crash-resumable checkpoint,
//!   or skip; then analyzes the iteration and persists the plausible
//!   samples
//!
//! The emulator's regression machinery and the model itself are
//! external collaborators behind the [`link::Emulator`] and
//! [`link::Model`] traits.

pub mod comm;
pub mod eval;
pub mod link;
pub mod models;
pub mod pipeline;
pub mod sampling;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
pub use comm::{Dispatch, LocalGroup, ProcessGroup, Role};
pub use eval::{EvaluationReport, ProjectionData};
pub use link::{Emulator, EmulatorKind, Model, SineWaveModel};
pub use models::{
    Config, ConfigError, CutoffVector, EikasiaError, IterationDetails, IterationStatus, Result,
    SampleSet,
};
pub use pipeline::{Pipeline, RemoteCall};
pub use store::{FileStore, PersistentStore};
