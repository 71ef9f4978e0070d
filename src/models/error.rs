//! Error types for eikasia.
//!
//! Taxonomy:
//! - Usage: invalid input, caught before any collective call
//! - State: operation incompatible with the pipeline's current state
//! - Infrastructure: a collective failed to complete (fatal, no retry)
//! - Internal: invariant violations (bugs)

use thiserror::Error;

/// Top-level error type for eikasia.
#[derive(Debug, Error)]
pub enum EikasiaError {
    // ═══════════════════════════════════════════════════════════════════
    // USAGE — invalid input, rejected before any collective call
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid cutoff vector: {0}")]
    InvalidCutoffs(String),

    #[error("Invalid sample set: {0}")]
    InvalidSamples(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Emulator kind '{0}' is not supported by the generic traversal")]
    UnsupportedEmulator(String),

    #[error("Invalid iteration index: {0}")]
    InvalidIteration(String),

    // ═══════════════════════════════════════════════════════════════════
    // STATE — operation conflicts with pipeline state, aborted
    // ═══════════════════════════════════════════════════════════════════

    #[error(
        "Construction of iteration {next} has already been started. \
         Reanalysis of iteration {current} is not possible"
    )]
    ReanalysisBlocked { current: u32, next: u32 },

    #[error(
        "No plausible regions were found in the analysis of iteration {0}. \
         Construction is not possible"
    )]
    NoPlausibleRegions(u32),

    #[error(
        "Number of plausible samples is lower than the number of cross \
         validations used during regression ({found} < {required}). \
         Construction is not possible"
    )]
    InsufficientPlausibleSamples { found: usize, required: usize },

    #[error("Iteration {0} has not been constructed yet")]
    NotConstructed(u32),

    // ═══════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE — a collective failed, fatal at this layer
    // ═══════════════════════════════════════════════════════════════════

    #[error("Collective operation failed: {0}")]
    Collective(String),

    #[error("Worker received an exit key that does not match its session")]
    SessionKeyMismatch,

    #[error("Aborted by the controller: {0}")]
    PeerAbort(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    // ═══════════════════════════════════════════════════════════════════
    // INTERNAL — invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EikasiaError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error was caused by invalid caller input.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidCutoffs(_)
                | Self::InvalidSamples(_)
                | Self::ShapeMismatch(_)
                | Self::UnsupportedEmulator(_)
                | Self::InvalidIteration(_)
        )
    }

    /// Check if this error reflects an incompatible pipeline state.
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            Self::ReanalysisBlocked { .. }
                | Self::NoPlausibleRegions(_)
                | Self::InsufficientPlausibleSamples { .. }
                | Self::NotConstructed(_)
        )
    }
}

/// Result type alias for eikasia.
pub type Result<T> = std::result::Result<T, EikasiaError>;
