//! Model evaluation and realization distribution.
//!
//! Evaluating a sample batch in the model happens in one of three fixed
//! strategies, chosen by the model's call profile: every rank calls the
//! model once per sample, every rank calls it once for the whole batch,
//! or only the controller calls it. Afterwards the output columns are
//! partitioned by each rank's owned sub-systems and scattered; a barrier
//! guarantees all ranks have durably stored their shard before any
//! dependent step runs.

use crate::comm::ProcessGroup;
use crate::link::{DataSelector, Emulator, Model, RealizationShard};
use crate::models::{EikasiaError, Result, SampleSet};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::info;

/// Timing and throughput of one model evaluation pass. Observability
/// output only — nothing downstream depends on it.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalStats {
    /// Number of samples evaluated.
    pub n_sam: usize,
    /// Wall time of the whole pass in seconds.
    pub wall_secs: f64,
    /// Average wall seconds per sample.
    pub avg_eval_secs: f64,
    /// Model invocations summed over all ranks.
    pub model_calls: u64,
}

/// Model outputs for a sample batch: one row per sample, one column per
/// data point in flat selector order.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutputs {
    /// Output rows.
    pub rows: Vec<Vec<f64>>,
}

/// Evaluate a sample batch in the model.
///
/// The batch is sorted canonically first so results are reproducible
/// independent of submission order. Returns the sorted batch, the model
/// outputs on ranks that called the model (`None` elsewhere), and timing
/// statistics.
pub fn evaluate_samples<G: ProcessGroup, M: Model>(
    group: &G,
    model: &M,
    iteration: u32,
    samples: SampleSet,
    selectors: &[DataSelector],
) -> Result<(SampleSet, Option<ModelOutputs>, EvalStats)> {
    let samples = samples.canonicalized();
    let n_sam = samples.len();
    let profile = model.call_profile();

    info!(iteration, n_sam, "evaluating model samples");
    let start = Instant::now();
    let mut calls: u64 = 0;

    let outputs = if group.is_controller() || profile.every_rank {
        let rows = if profile.multi {
            calls += 1;
            model.call_batch(iteration, &samples, selectors)?
        } else {
            let bar = progress_bar(group, n_sam);
            let mut rows = Vec::with_capacity(n_sam);
            for par in samples.iter() {
                rows.push(model.call(iteration, par, selectors)?);
                calls += 1;
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
            }
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            rows
        };

        if rows.len() != n_sam {
            return Err(EikasiaError::ShapeMismatch(format!(
                "model returned {} output rows for {} samples",
                rows.len(),
                n_sam
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != selectors.len() {
                return Err(EikasiaError::ShapeMismatch(format!(
                    "model output {} has {} values for {} data points",
                    i,
                    row.len(),
                    selectors.len()
                )));
            }
        }
        Some(ModelOutputs { rows })
    } else {
        None
    };

    group.barrier()?;
    let model_calls = group.all_sum(calls)?;

    let wall_secs = start.elapsed().as_secs_f64();
    let stats = EvalStats {
        n_sam,
        wall_secs,
        avg_eval_secs: if n_sam > 0 {
            wall_secs / n_sam as f64
        } else {
            0.0
        },
        model_calls,
    };
    info!(
        iteration,
        wall_secs = format!("{:.3}", stats.wall_secs),
        avg_eval_secs = format!("{:.3}", stats.avg_eval_secs),
        model_calls,
        "finished evaluating model samples"
    );
    Ok((samples, outputs, stats))
}

fn progress_bar<G: ProcessGroup>(group: &G, n: usize) -> Option<ProgressBar> {
    if !group.is_controller() {
        return None;
    }
    let bar = ProgressBar::new(n as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%)")
            .unwrap()
            .progress_chars("##-"),
    );
    Some(bar)
}

/// Distribute model outputs to the owning ranks and persist each shard.
///
/// The controller partitions the output columns into contiguous
/// per-rank ranges (as reported by the emulator), broadcasts the sorted
/// sample set, and scatters the shards; every rank then stores its own
/// shard and the trailing barrier guarantees this happened everywhere.
pub fn distribute_realization<G: ProcessGroup, E: Emulator>(
    group: &G,
    emulator: &mut E,
    iteration: u32,
    samples: &SampleSet,
    outputs: Option<ModelOutputs>,
) -> Result<()> {
    let parts = if group.is_controller() {
        let outputs = outputs.ok_or_else(|| {
            EikasiaError::Internal("controller has no model outputs to distribute".to_string())
        })?;
        let counts = emulator.subsystem_counts(iteration)?;
        if counts.len() != group.size() {
            return Err(EikasiaError::ShapeMismatch(format!(
                "{} sub-system ranges for {} ranks",
                counts.len(),
                group.size()
            )));
        }
        let n_data: usize = counts.iter().sum();
        if emulator.n_data_total(iteration)? != n_data {
            return Err(EikasiaError::ShapeMismatch(
                "sub-system ranges do not sum to the data-point count".to_string(),
            ));
        }

        // Transpose sample-major rows into data-point columns
        let columns: Vec<Vec<f64>> = (0..n_data)
            .map(|d| outputs.rows.iter().map(|row| row[d]).collect())
            .collect();

        let mut parts = Vec::with_capacity(counts.len());
        let mut offset = 0;
        for &count in &counts {
            parts.push(RealizationShard {
                columns: columns[offset..offset + count].to_vec(),
            });
            offset += count;
        }
        Some(parts)
    } else {
        None
    };

    info!(iteration, "distributing model realization data");
    let samples = group.broadcast(if group.is_controller() {
        Some(samples.clone())
    } else {
        None
    })?;
    let shard = group.scatter(parts)?;
    emulator.store_realization(iteration, &samples, shard)?;
    group.barrier()?;
    Ok(())
}
