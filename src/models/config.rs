//! Configuration models for eikasia.
//!
//! All tunable parameters of the iteration controller are collected here
//! and loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for an eikasia pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sample design settings
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Implausibility analysis settings
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            analysis: AnalysisConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// Sample design configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Number of model evaluation samples in the first iteration's design
    #[serde(default = "default_n_sam_init")]
    pub n_sam_init: usize,

    /// Base number of emulator evaluation samples per model parameter;
    /// an analysis evaluates `base_eval_sam * n_par` samples
    #[serde(default = "default_base_eval_sam")]
    pub base_eval_sam: usize,

    /// Seed for the Latin-hypercube designs (random if absent)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_n_sam_init() -> usize {
    500
}

fn default_base_eval_sam() -> usize {
    800
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n_sam_init: default_n_sam_init(),
            base_eval_sam: default_base_eval_sam(),
            seed: None,
        }
    }
}

/// Implausibility analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Default implausibility cutoff sequence; zeros are wildcards that
    /// inherit the previous cutoff value
    #[serde(default = "default_impl_cut")]
    pub impl_cut: Vec<f64>,
}

fn default_impl_cut() -> Vec<f64> {
    vec![0.0, 4.0, 3.8, 3.5]
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            impl_cut: default_impl_cut(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for persisted iteration data
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("eikasia_run")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
