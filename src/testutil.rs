//! Test support: an SPMD harness over `LocalGroup` and mock
//! model/emulator collaborators.

use crate::comm::{LocalGroup, ProcessGroup};
use crate::link::{
    CallProfile, DataSelector, Emulator, Model, RealizationShard, ValueSpace,
};
use crate::models::{
    ConstructionCheckpoint, ConstructionStep, EikasiaError, Result, SampleSet,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Install a test log subscriber; later calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run the same closure on every rank of a fresh local group, one thread
/// per rank, and collect the per-rank results in rank order.
pub fn run_spmd<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(LocalGroup) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = LocalGroup::split(size)
        .into_iter()
        .map(|group| {
            let f = Arc::clone(&f);
            thread::spawn(move || f(group))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

/// Call-counting model over the unit hypercube. Outputs are all zero;
/// the mock emulator ignores them anyway.
pub struct MockModel {
    n_par: usize,
    profile: CallProfile,
    calls: AtomicU64,
}

impl MockModel {
    pub fn new(n_par: usize) -> Self {
        Self {
            n_par,
            profile: CallProfile::default(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_profile(n_par: usize, profile: CallProfile) -> Self {
        Self {
            n_par,
            profile,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of times the model was called on this rank.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Model for MockModel {
    fn n_par(&self) -> usize {
        self.n_par
    }

    fn par_ranges(&self) -> Vec<(f64, f64)> {
        vec![(0.0, 1.0); self.n_par]
    }

    fn call_profile(&self) -> CallProfile {
        self.profile
    }

    fn call(&self, _iteration: u32, _par: &[f64], data_idx: &[DataSelector]) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(vec![0.0; data_idx.len()])
    }

    fn discrepancy_variance(
        &self,
        _iteration: u32,
        _par: &[f64],
        data_idx: &[DataSelector],
    ) -> Result<Option<Vec<(f64, f64)>>> {
        Ok(Some(vec![(0.0, 0.0); data_idx.len()]))
    }
}

/// Deterministic emulator: each rank owns one sub-system, the adjusted
/// expectation for any sample is `scale * par[0]` with zero variance,
/// observed data is zero with unit errors. The univariate implausibility
/// of a sample is therefore exactly `scale * par[0]` at every
/// sub-system.
pub struct MockEmulator {
    rank: usize,
    size: usize,
    n_par: usize,
    scale: f64,
    min_cross_val: usize,
    checkpoints: Vec<ConstructionCheckpoint>,
    realizations: Vec<Option<(SampleSet, RealizationShard)>>,
}

impl MockEmulator {
    pub fn new<G: ProcessGroup>(group: &G, n_par: usize, scale: f64, min_cross_val: usize) -> Self {
        Self {
            rank: group.rank(),
            size: group.size(),
            n_par,
            scale,
            min_cross_val,
            checkpoints: Vec::new(),
            realizations: Vec::new(),
        }
    }

    /// Open the next iteration with a full checkpoint.
    pub fn begin_iteration(&mut self, iteration: u32) {
        assert_eq!(iteration as usize, self.checkpoints.len() + 1);
        self.checkpoints.push(ConstructionCheckpoint::full());
        self.realizations.push(None);
    }

    /// Script an iteration with an arbitrary checkpoint state.
    pub fn push_scripted(&mut self, checkpoint: ConstructionCheckpoint) {
        self.checkpoints.push(checkpoint);
        self.realizations.push(None);
    }

    /// This rank's stored realization shard for an iteration.
    pub fn realization(&self, iteration: u32) -> Option<&RealizationShard> {
        self.realizations
            .get(iteration as usize - 1)
            .and_then(|r| r.as_ref())
            .map(|(_, shard)| shard)
    }

    fn idx(&self, iteration: u32) -> Result<usize> {
        let idx = iteration as usize;
        if idx == 0 || idx > self.checkpoints.len() {
            return Err(EikasiaError::Internal(format!(
                "mock emulator has no iteration {}",
                iteration
            )));
        }
        Ok(idx - 1)
    }
}

impl Emulator for MockEmulator {
    fn last_complete_iteration(&self) -> u32 {
        self.checkpoints
            .iter()
            .take_while(|ck| ck.is_complete())
            .count() as u32
    }

    fn construction_checkpoint(&self, iteration: u32) -> Option<ConstructionCheckpoint> {
        if iteration == 0 {
            return None;
        }
        self.checkpoints.get(iteration as usize - 1).cloned()
    }

    fn min_cross_val(&self) -> usize {
        self.min_cross_val
    }

    fn reset(&mut self) -> Result<()> {
        self.checkpoints.clear();
        self.realizations.clear();
        self.begin_iteration(1);
        Ok(())
    }

    fn prepare_iteration(&mut self, iteration: u32) -> Result<bool> {
        self.checkpoints.truncate(iteration as usize - 1);
        self.realizations.truncate(iteration as usize - 1);
        self.begin_iteration(iteration);
        Ok(false)
    }

    fn construct_iteration(&mut self, iteration: u32) -> Result<()> {
        let idx = self.idx(iteration)?;
        if self.checkpoints[idx].is_pending(ConstructionStep::ModelRealization) {
            return Err(EikasiaError::Internal(
                "construct called without realization data".to_string(),
            ));
        }
        self.checkpoints[idx] = ConstructionCheckpoint::complete();
        Ok(())
    }

    fn store_realization(
        &mut self,
        iteration: u32,
        samples: &SampleSet,
        shard: RealizationShard,
    ) -> Result<()> {
        let idx = self.idx(iteration)?;
        self.realizations[idx] = Some((samples.clone(), shard));
        self.checkpoints[idx].finish(ConstructionStep::ModelRealization);
        Ok(())
    }

    fn evaluate(&self, _iteration: u32, par: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        Ok((vec![self.scale * par[0]], vec![0.0]))
    }

    fn active_subsystems(&self, _iteration: u32) -> Result<Vec<usize>> {
        Ok(vec![self.rank])
    }

    fn data_values(&self, _iteration: u32) -> Result<Vec<f64>> {
        Ok(vec![0.0])
    }

    fn data_errors(&self, _iteration: u32) -> Result<Vec<(f64, f64)>> {
        Ok(vec![(1.0, 1.0)])
    }

    fn data_spaces(&self, _iteration: u32) -> Result<Vec<ValueSpace>> {
        Ok(vec![ValueSpace::Linear])
    }

    fn data_selectors(&self, _iteration: u32) -> Result<Vec<DataSelector>> {
        Ok(vec![self.rank as DataSelector])
    }

    fn flat_selectors(&self, _iteration: u32) -> Result<Vec<DataSelector>> {
        Ok((0..self.size as DataSelector).collect())
    }

    fn n_data(&self, _iteration: u32) -> Result<usize> {
        Ok(1)
    }

    fn n_data_total(&self, _iteration: u32) -> Result<usize> {
        Ok(self.size)
    }

    fn subsystem_counts(&self, _iteration: u32) -> Result<Vec<usize>> {
        Ok(vec![1; self.size])
    }

    fn sample_space(&self, _iteration: u32) -> Result<Vec<(f64, f64)>> {
        Ok(vec![(0.0, 1.0); self.n_par])
    }

    fn sample_set(&self, iteration: u32) -> Result<SampleSet> {
        let idx = self.idx(iteration)?;
        Ok(self.realizations[idx]
            .as_ref()
            .map(|(samples, _)| samples.clone())
            .unwrap_or_else(|| SampleSet::empty(self.n_par)))
    }
}
