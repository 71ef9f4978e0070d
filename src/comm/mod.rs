//! Process-group collectives and the worker listening mode.

mod dispatch;
mod group;

pub use dispatch::*;
pub use group::*;
