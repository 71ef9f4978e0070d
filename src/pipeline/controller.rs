//! The iteration controller.
//!
//! The pipeline drives the history-matching loop: decide whether an
//! iteration must be built from scratch, resumed from its construction
//! checkpoint, or is already complete; obtain model realization data and
//! hand it to the emulator; analyze the constructed iteration against a
//! large evaluation design and persist the surviving plausible samples.
//!
//! Every rank holds a `Pipeline` over the same collaborators and calls
//! the public methods in lockstep. Iteration metadata is owned and
//! mutated by the controller only; workers hold read-only mirrors
//! populated through broadcasts. Checks that must agree across ranks are
//! computed once on the controller and the decision — not the data — is
//! broadcast.

use crate::comm::{Dispatch, ProcessGroup, Role};
use crate::eval::{self, AnalyzeHooks, EvaluateHooks, EvaluationReport, ProjectHooks};
use crate::link::{Emulator, Model};
use crate::models::{
    AnalysisRecord, Config, ConstructionStep, CutoffVector, EikasiaError, IterationDetails,
    IterationStatus, Result, SampleSet,
};
use crate::pipeline::{ArgSource, LocalRef, RemoteCall, Reply};
use crate::sampling;
use crate::store::{PersistentStore, StatEntry};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Controller decision on how to handle a construction request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum ConstructPlan {
    /// Build the iteration from the beginning.
    FromScratch,
    /// Continue from the recorded checkpoint sub-step.
    Resume,
    /// Nothing to build.
    AlreadyDone {
        /// Whether the iteration has been analyzed as well.
        analyzed: bool,
    },
}

/// The iteration controller and its rank-local state.
pub struct Pipeline<G, M, E, S> {
    group: Arc<G>,
    model: M,
    emulator: E,
    store: S,
    config: Config,
    sessions: Vec<u32>,
    /// Cutoffs per iteration (index 0 unused).
    cutoffs: Vec<Option<CutoffVector>>,
    /// Analysis records per iteration (index 0 unused); mirrored on
    /// workers, persisted by the controller.
    records: Vec<Option<AnalysisRecord>>,
    rng: StdRng,
}

impl<G, M, E, S> Pipeline<G, M, E, S>
where
    G: ProcessGroup,
    M: Model,
    E: Emulator,
    S: PersistentStore,
{
    /// Create a pipeline over the given collaborators, reloading any
    /// persisted analysis records of already-complete iterations.
    pub fn new(group: Arc<G>, model: M, emulator: E, store: S, config: Config) -> Result<Self> {
        let seed = config.sampling.seed.unwrap_or_else(rand::random);
        let mut pipeline = Self {
            group,
            model,
            emulator,
            store,
            config,
            sessions: Vec::new(),
            cutoffs: Vec::new(),
            records: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        };
        pipeline.reload()?;
        Ok(pipeline)
    }

    /// The configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The emulator collaborator.
    pub fn emulator(&self) -> &E {
        &self.emulator
    }

    pub(crate) fn comm_group(&self) -> &G {
        &self.group
    }

    pub(crate) fn model_ref(&self) -> &M {
        &self.model
    }

    /// The model collaborator.
    pub fn model(&self) -> &M {
        &self.model
    }

    #[cfg(test)]
    pub(crate) fn emulator_mut(&mut self) -> &mut E {
        &mut self.emulator
    }

    /// The persisted analysis record of an iteration, if it has been
    /// analyzed.
    pub fn analysis(&self, iteration: u32) -> Option<&AnalysisRecord> {
        self.record(iteration)
    }

    // ── Rank-local record keeping ─────────────────────────────────────

    pub(crate) fn record(&self, iteration: u32) -> Option<&AnalysisRecord> {
        self.records.get(iteration as usize).and_then(|r| r.as_ref())
    }

    fn set_record(&mut self, iteration: u32, record: AnalysisRecord) {
        let idx = iteration as usize;
        if self.records.len() <= idx {
            self.records.resize_with(idx + 1, || None);
        }
        self.records[idx] = Some(record);
    }

    fn clear_record(&mut self, iteration: u32) {
        let idx = iteration as usize;
        if idx < self.records.len() {
            self.records[idx] = None;
        }
    }

    pub(crate) fn cutoff_for(&self, iteration: u32) -> Result<&CutoffVector> {
        self.cutoffs
            .get(iteration as usize)
            .and_then(|c| c.as_ref())
            .ok_or_else(|| {
                EikasiaError::Internal(format!(
                    "no cutoff vector set for iteration {}",
                    iteration
                ))
            })
    }

    fn set_cutoff(&mut self, iteration: u32, cutoffs: CutoffVector) {
        let idx = iteration as usize;
        if self.cutoffs.len() <= idx {
            self.cutoffs.resize_with(idx + 1, || None);
        }
        self.cutoffs[idx] = Some(cutoffs);
    }

    /// Rebuild the rank-local mirrors from the store (after a restart or
    /// an emulator-triggered reload).
    fn reload(&mut self) -> Result<()> {
        self.cutoffs.clear();
        self.records.clear();
        for i in 1..=self.emulator.last_complete_iteration() {
            match self.store.load::<AnalysisRecord>(i, "analysis")? {
                Some(record) => {
                    self.set_cutoff(i, record.cutoffs.clone());
                    self.set_record(i, record);
                }
                None => {
                    let cuts = CutoffVector::parse(
                        &self.config.analysis.impl_cut,
                        self.emulator.n_data_total(i)?,
                    )?;
                    self.set_cutoff(i, cuts);
                }
            }
        }
        Ok(())
    }

    /// Resolve a call argument against this rank's local state.
    fn resolve_samples(&self, samples: ArgSource<SampleSet>) -> Result<SampleSet> {
        match samples {
            ArgSource::Inline(set) => Ok(set),
            ArgSource::Local(LocalRef::PlausibleSamples(iteration)) => self
                .record(iteration)
                .map(|r| r.plausible.clone())
                .ok_or_else(|| {
                    EikasiaError::Internal(format!(
                        "no plausible samples recorded for iteration {}",
                        iteration
                    ))
                }),
        }
    }

    /// Broadcast the controller's outcome of a shared step, so workers
    /// abort when the controller did.
    fn sync_outcome(&self, local: Result<()>) -> Result<()> {
        match self.group.role() {
            Role::Controller => {
                let wire: std::result::Result<(), String> =
                    local.as_ref().map(|_| ()).map_err(|e| e.to_string());
                self.group.broadcast(Some(wire))?;
                local
            }
            Role::Worker => {
                let wire: std::result::Result<(), String> = self.group.broadcast(None)?;
                local?;
                wire.map_err(EikasiaError::PeerAbort)
            }
        }
    }

    // ── Construction ──────────────────────────────────────────────────

    /// Construct the given iteration (the next one if `None`), resuming
    /// from its checkpoint when possible.
    ///
    /// With `force`, the iteration is rebuilt from scratch regardless of
    /// its checkpoint. With `analyze_after`, a successful construction
    /// is followed by [`analyze`](Self::analyze). Returns the iteration
    /// index that was handled.
    pub fn construct(
        &mut self,
        iteration: Option<u32>,
        analyze_after: bool,
        force: bool,
    ) -> Result<u32> {
        let last = self.emulator.last_complete_iteration();
        let i = iteration.unwrap_or(last + 1);
        if i == 0 {
            return Err(EikasiaError::InvalidIteration(
                "iterations are numbered from 1".to_string(),
            ));
        }
        if i > last + 1 {
            return Err(EikasiaError::InvalidIteration(format!(
                "cannot construct iteration {} while iteration {} is incomplete",
                i,
                last + 1
            )));
        }

        let start = Instant::now();

        // Controller triages from the checkpoint; the decision is
        // broadcast, never re-derived per rank.
        let plan = if self.group.is_controller() {
            let plan = if force {
                ConstructPlan::FromScratch
            } else {
                match self.emulator.construction_checkpoint(i) {
                    None => ConstructPlan::FromScratch,
                    Some(ck) if ck.is_pending(ConstructionStep::ModelRealization) => {
                        ConstructPlan::FromScratch
                    }
                    Some(ck) if ck.is_complete() && i <= last => ConstructPlan::AlreadyDone {
                        analyzed: self.record(i).map(|r| r.n_eval > 0).unwrap_or(false),
                    },
                    Some(_) => ConstructPlan::Resume,
                }
            };
            self.group.broadcast(Some(plan))?
        } else {
            self.group.broadcast(None)?
        };

        match plan {
            ConstructPlan::AlreadyDone { analyzed } => {
                info!(iteration = i, "iteration already fully constructed, skipping");
                if analyze_after && !analyzed {
                    self.analyze(None)?;
                } else {
                    let _ = self.details(Some(i))?;
                }
                return Ok(i);
            }
            ConstructPlan::FromScratch => {
                info!(iteration = i, "starting construction");
                let outcome = self
                    .with_worker_mode(|p| p.construct_body(i))
                    .map(|_| ());
                self.sync_outcome(outcome)?;
            }
            ConstructPlan::Resume => {
                info!(iteration = i, "continuing construction from checkpoint");
            }
        }

        // Fit the emulator sub-systems, continuing from the checkpoint.
        self.emulator.construct_iteration(i)?;

        // Fresh iteration starts unanalyzed, with the configured cutoffs.
        let cuts = CutoffVector::parse(
            &self.config.analysis.impl_cut,
            self.emulator.n_data_total(i)?,
        )?;
        self.set_cutoff(i, cuts);
        self.clear_record(i);

        if self.group.is_controller() {
            let elapsed = start.elapsed().as_secs_f64();
            self.store.save_statistics(
                i,
                &[StatEntry::new(
                    "tot_construct_time",
                    format!("{:.2}", elapsed),
                    "s",
                )],
            )?;
            info!(
                iteration = i,
                seconds = format!("{:.2}", elapsed),
                "finished construction"
            );
        }

        if analyze_after {
            self.analyze(None)?;
        } else {
            let _ = self.details(Some(i))?;
        }
        Ok(i)
    }

    /// Controller-side construction body, run inside worker mode.
    fn construct_body(&mut self, i: u32) -> Result<()> {
        if i == 1 {
            self.make_call(RemoteCall::CreateEmulator)?;
            let design = sampling::lhd(
                self.config.sampling.n_sam_init,
                &self.model.par_ranges(),
                &mut self.rng,
            )?;
            info!(n_sam = design.len(), "created initial model evaluation design");
            self.make_call(RemoteCall::GatherIterationData {
                iteration: 1,
                samples: ArgSource::Inline(design),
            })?;
        } else {
            // The previous iteration must be analyzed before its
            // survivors can seed this one.
            let analyzed = self
                .record(i - 1)
                .map(|r| r.n_eval > 0)
                .unwrap_or(false);
            if !analyzed {
                warn!(
                    iteration = i - 1,
                    "previous iteration has not been analyzed; performing analysis first"
                );
                self.make_call(RemoteCall::Analyze)?;
            }

            let n_plausible = self
                .record(i - 1)
                .map(|r| r.plausible.len())
                .unwrap_or(0);
            if n_plausible == 0 {
                return Err(EikasiaError::NoPlausibleRegions(i - 1));
            }
            let required = self.emulator.min_cross_val();
            if n_plausible < required {
                return Err(EikasiaError::InsufficientPlausibleSamples {
                    found: n_plausible,
                    required,
                });
            }

            self.make_call(RemoteCall::PrepareIteration(i))?;
            self.make_call(RemoteCall::GatherIterationData {
                iteration: i,
                samples: ArgSource::Local(LocalRef::PlausibleSamples(i - 1)),
            })?;
        }
        Ok(())
    }

    /// Evaluate samples in the model and distribute realization data to
    /// the owning sub-systems. Runs on every rank in lockstep.
    fn gather_iteration_data(&mut self, iteration: u32, samples: SampleSet) -> Result<()> {
        let selectors = self.group.broadcast(if self.group.is_controller() {
            Some(self.emulator.flat_selectors(iteration)?)
        } else {
            None
        })?;

        let (sorted, outputs, stats) = eval::evaluate_samples(
            &*self.group,
            &self.model,
            iteration,
            samples,
            &selectors,
        )?;
        eval::distribute_realization(
            &*self.group,
            &mut self.emulator,
            iteration,
            &sorted,
            outputs,
        )?;

        if self.group.is_controller() {
            self.store.save_statistics(
                iteration,
                &[
                    StatEntry::new(
                        "tot_model_eval_time",
                        format!("{:.3}", stats.wall_secs),
                        "s",
                    ),
                    StatEntry::new(
                        "avg_model_eval_time",
                        format!("{:.3}", stats.avg_eval_secs),
                        "s",
                    ),
                    StatEntry::new("comm_size_model", format!("{}", self.group.size()), ""),
                ],
            )?;
        }
        Ok(())
    }

    // ── Analysis ──────────────────────────────────────────────────────

    /// Analyze the last constructed iteration: evaluate a large design
    /// against the emulator and persist the plausible survivors.
    ///
    /// `cutoff_override` replaces the configured cutoff sequence for
    /// this analysis (controller argument; workers pass `None`).
    pub fn analyze(&mut self, cutoff_override: Option<&[f64]>) -> Result<()> {
        let i = self.emulator.last_complete_iteration();
        if i == 0 {
            return Err(EikasiaError::NotConstructed(1));
        }
        info!(iteration = i, "analyzing iteration");
        let start = Instant::now();

        // Guards and design generation happen once on the controller;
        // workers receive the outcome.
        let (cuts, eval_set) = match self.group.role() {
            Role::Controller => {
                let prepared = self.prepare_analysis(i, cutoff_override);
                let wire: std::result::Result<(CutoffVector, SampleSet), String> = prepared
                    .as_ref()
                    .map(|v| v.clone())
                    .map_err(|e| e.to_string());
                self.group.broadcast(Some(wire))?;
                prepared?
            }
            Role::Worker => {
                let wire: std::result::Result<(CutoffVector, SampleSet), String> =
                    self.group.broadcast(None)?;
                wire.map_err(EikasiaError::PeerAbort)?
            }
        };

        self.set_cutoff(i, cuts.clone());
        let n_eval = eval_set.len();
        let survivors = self.evaluate_sample_set(i, &eval_set, AnalyzeHooks)?;

        let record = AnalysisRecord {
            cutoffs: cuts,
            n_eval,
            plausible: survivors,
            analyzed_at: Utc::now(),
        };
        self.set_record(i, record.clone());

        if self.group.is_controller() {
            let n_impl = record.plausible.len();
            if n_impl == 0 {
                warn!(
                    iteration = i,
                    "no plausible regions were found; constructing the next iteration \
                     will not be possible"
                );
            } else if n_impl < self.emulator.min_cross_val() {
                warn!(
                    iteration = i,
                    n_plausible = n_impl,
                    required = self.emulator.min_cross_val(),
                    "fewer plausible samples than the regression cross-validation \
                     minimum; constructing the next iteration will not be possible"
                );
            } else if n_impl < self.config.sampling.n_sam_init {
                warn!(
                    iteration = i,
                    n_plausible = n_impl,
                    n_sam_init = self.config.sampling.n_sam_init,
                    "fewer plausible samples than the first iteration's design; the \
                     next iteration might not produce a more accurate emulator"
                );
            }

            self.store.save(i, "analysis", &record)?;

            let elapsed = start.elapsed().as_secs_f64();
            let eval_rate = if elapsed > 0.0 {
                n_eval as f64 / elapsed
            } else {
                0.0
            };
            let space_remaining = self.parameter_space_remaining(i)?.unwrap_or(0.0);
            self.store.save_statistics(
                i,
                &[
                    StatEntry::new("tot_analyze_time", format!("{:.2}", elapsed), "s"),
                    StatEntry::new("avg_emul_eval_rate", format!("{:.2}", eval_rate), "1/s"),
                    StatEntry::new(
                        "par_space_remaining",
                        format!("{:.3}", space_remaining * 100.0),
                        "%",
                    ),
                    StatEntry::new("comm_size_anal", format!("{}", self.group.size()), ""),
                ],
            )?;
            info!(
                iteration = i,
                n_eval,
                n_plausible = n_impl,
                seconds = format!("{:.2}", elapsed),
                space_remaining = format!("{:.3}%", space_remaining * 100.0),
                "finished analysis"
            );
        }

        let _ = self.details(Some(i))?;
        Ok(())
    }

    /// Controller-side analysis preparation: re-analysis guard, cutoff
    /// validation and evaluation design generation.
    fn prepare_analysis(
        &mut self,
        i: u32,
        cutoff_override: Option<&[f64]>,
    ) -> Result<(CutoffVector, SampleSet)> {
        // Re-analysis would invalidate a downstream construction that
        // already consumed this iteration's survivors.
        if let Some(ck) = self.emulator.construction_checkpoint(i + 1) {
            if !ck.is_pending(ConstructionStep::ModelRealization) {
                return Err(EikasiaError::ReanalysisBlocked {
                    current: i,
                    next: i + 1,
                });
            }
        }

        let n_data_total = self.emulator.n_data_total(i)?;
        let raw = cutoff_override.unwrap_or(&self.config.analysis.impl_cut);
        let cuts = CutoffVector::parse(raw, n_data_total)?;

        let n_eval = self.config.sampling.base_eval_sam * self.model.n_par();
        let space = self.emulator.sample_space(i)?;
        let constraints = self.emulator.sample_set(i)?;
        let eval_set = sampling::lhd_constrained(n_eval, &space, &constraints, &mut self.rng)?;
        info!(
            iteration = i,
            n_eval = eval_set.len(),
            "created emulator evaluation sample set"
        );
        Ok((cuts, eval_set))
    }

    // ── Evaluation and projection ─────────────────────────────────────

    /// Evaluate a sample set against the emulator up to the given
    /// iteration (the last constructed one if `None`).
    ///
    /// Returns the full diagnostics report on the controller, `None` on
    /// workers.
    pub fn evaluate(
        &self,
        samples: &SampleSet,
        iteration: Option<u32>,
    ) -> Result<Option<EvaluationReport>> {
        let last = self.emulator.last_complete_iteration();
        let i = iteration.unwrap_or(last);
        if i == 0 || i > last {
            return Err(EikasiaError::NotConstructed(i.max(1)));
        }
        if samples.n_par() != self.model.n_par() {
            return Err(EikasiaError::ShapeMismatch(format!(
                "samples have {} parameters, model has {}",
                samples.n_par(),
                self.model.n_par()
            )));
        }

        self.group.barrier()?;
        let report = self.evaluate_sample_set(i, samples, EvaluateHooks::default())?;
        self.group.barrier()?;
        Ok(report)
    }

    /// Run one full cycle: construct, analyze, and produce projection
    /// data for the iteration (figure generation is external).
    pub fn run_cycle(&mut self, iteration: Option<u32>, force: bool) -> Result<u32> {
        let i = self.construct(iteration, true, force)?;

        if self.record(i).map(|r| r.n_eval > 0).unwrap_or(false) {
            let design = match self.group.role() {
                Role::Controller => {
                    let n = self.config.sampling.base_eval_sam * self.model.n_par();
                    let space = self.emulator.sample_space(i)?;
                    let design = sampling::lhd(n, &space, &mut self.rng)?;
                    self.group.broadcast(Some(design))?
                }
                Role::Worker => self.group.broadcast(None)?,
            };
            let data = self.evaluate_sample_set(i, &design, ProjectHooks::default())?;
            if let Some(data) = data {
                self.store.save(i, "projection", &data)?;
            }
        } else {
            warn!(
                iteration = i,
                "iteration is not analyzed; skipping projection data"
            );
        }
        Ok(i)
    }

    // ── Introspection ─────────────────────────────────────────────────

    /// Completion state and analysis results of an iteration. Local to
    /// this rank, never collective.
    pub fn details(&self, iteration: Option<u32>) -> Result<IterationDetails> {
        let last = self.emulator.last_complete_iteration();
        let i = iteration.unwrap_or(last.max(1));

        let checkpoint = self.emulator.construction_checkpoint(i);

        // Iterations complete strictly in order.
        if checkpoint.as_ref().map(|c| c.is_complete()).unwrap_or(false) {
            for j in 1..i {
                let complete = self
                    .emulator
                    .construction_checkpoint(j)
                    .map(|c| c.is_complete())
                    .unwrap_or(false);
                if !complete {
                    return Err(EikasiaError::Internal(format!(
                        "iteration {} is complete but iteration {} is not",
                        i, j
                    )));
                }
            }
        }

        let record = self.record(i);
        let analyzed = record.map(|r| r.n_eval > 0).unwrap_or(false);
        let status = match &checkpoint {
            None => IterationStatus::Unconstructed,
            Some(ck) if !ck.is_complete() => IterationStatus::PartiallyConstructed,
            Some(_) if analyzed => IterationStatus::Analyzed,
            Some(_) => IterationStatus::Unanalyzed,
        };

        let details = IterationDetails {
            iteration: i,
            status,
            pending_steps: checkpoint
                .map(|ck| ck.pending().collect())
                .unwrap_or_default(),
            n_eval: record.map(|r| r.n_eval).unwrap_or(0),
            n_plausible: record.map(|r| r.plausible.len()).unwrap_or(0),
            parameter_space_remaining: if analyzed {
                self.parameter_space_remaining(i)?
            } else {
                None
            },
        };
        info!(
            iteration = details.iteration,
            status = ?details.status,
            n_eval = details.n_eval,
            n_plausible = details.n_plausible,
            "iteration details"
        );
        Ok(details)
    }

    /// Fraction of the full parameter space that is still plausible
    /// after this iteration's analysis.
    fn parameter_space_remaining(&self, iteration: u32) -> Result<Option<f64>> {
        let record = match self.record(iteration) {
            Some(r) if r.n_eval > 0 => r,
            _ => return Ok(None),
        };
        let f_sam = record.plausible.len() as f64 / record.n_eval as f64;

        let par_ranges = self.model.par_ranges();
        let space = self.emulator.sample_space(iteration)?;
        let f_space: f64 = space
            .iter()
            .zip(par_ranges.iter())
            .map(|(&(slo, shi), &(plo, phi))| (shi - slo) / (phi - plo))
            .product();
        Ok(Some(f_sam * f_space))
    }
}

impl<G, M, E, S> Dispatch for Pipeline<G, M, E, S>
where
    G: ProcessGroup,
    M: Model,
    E: Emulator,
    S: PersistentStore,
{
    type Call = RemoteCall;
    type Reply = Reply;
    type Group = G;

    fn comm(&self) -> &Arc<G> {
        &self.group
    }

    fn sessions(&self) -> &Vec<u32> {
        &self.sessions
    }

    fn sessions_mut(&mut self) -> &mut Vec<u32> {
        &mut self.sessions
    }

    fn execute(&mut self, call: RemoteCall) -> Result<Reply> {
        match call {
            RemoteCall::CreateEmulator => {
                self.emulator.reset()?;
                self.cutoffs.clear();
                self.records.clear();
                Ok(Reply::Unit)
            }
            RemoteCall::PrepareIteration(iteration) => {
                let reload = self.emulator.prepare_iteration(iteration)?;
                if reload {
                    self.reload()?;
                }
                Ok(Reply::Reload(reload))
            }
            RemoteCall::GatherIterationData { iteration, samples } => {
                let samples = self.resolve_samples(samples)?;
                self.gather_iteration_data(iteration, samples)?;
                Ok(Reply::Unit)
            }
            RemoteCall::Analyze => {
                self.analyze(None)?;
                Ok(Reply::Unit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalGroup;
    use crate::eval::{HybridHooks, ProjectHooks};
    use crate::models::ConstructionCheckpoint;
    use crate::store::FileStore;
    use crate::testutil::{init_logging, run_spmd, MockEmulator, MockModel};
    use tempfile::TempDir;

    fn test_config(impl_cut: Vec<f64>, n_sam_init: usize, base_eval_sam: usize) -> Config {
        let mut config = Config::default();
        config.sampling.n_sam_init = n_sam_init;
        config.sampling.base_eval_sam = base_eval_sam;
        config.sampling.seed = Some(7);
        config.analysis.impl_cut = impl_cut;
        config
    }

    type TestPipeline = Pipeline<LocalGroup, MockModel, MockEmulator, FileStore>;

    fn single_rank_pipeline(
        config: Config,
        scale: f64,
        min_cross_val: usize,
        dir: &TempDir,
    ) -> TestPipeline {
        let group = Arc::new(LocalGroup::split(1).pop().unwrap());
        let model = MockModel::new(2);
        let emulator = MockEmulator::new(&*group, 2, scale, min_cross_val);
        let store = FileStore::new(dir.path()).unwrap();
        Pipeline::new(group, model, emulator, store, config).unwrap()
    }

    #[test]
    fn analyze_without_construction_is_a_state_error() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = single_rank_pipeline(test_config(vec![3.0], 4, 4), 1.0, 1, &dir);
        let err = pipeline.analyze(None).unwrap_err();
        assert!(matches!(err, EikasiaError::NotConstructed(1)));
    }

    #[test]
    fn resume_from_regression_checkpoint_skips_model_evaluation() {
        let dir = TempDir::new().unwrap();
        let group = Arc::new(LocalGroup::split(1).pop().unwrap());
        let model = MockModel::new(2);
        let mut emulator = MockEmulator::new(&*group, 2, 1.0, 1);
        // Realization done, regression interrupted.
        emulator.push_scripted(ConstructionCheckpoint::with_pending([
            ConstructionStep::Regression,
        ]));
        let store = FileStore::new(dir.path()).unwrap();
        let mut pipeline =
            Pipeline::new(group, model, emulator, store, test_config(vec![3.0], 4, 4)).unwrap();

        let i = pipeline.construct(Some(1), false, false).unwrap();
        assert_eq!(i, 1);
        assert_eq!(pipeline.model().calls(), 0);
        assert_eq!(pipeline.emulator().last_complete_iteration(), 1);

        let details = pipeline.details(Some(1)).unwrap();
        assert_eq!(details.status, IterationStatus::Unanalyzed);
    }

    #[test]
    fn force_rebuilds_a_complete_iteration() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = single_rank_pipeline(test_config(vec![3.0], 6, 4), 1.0, 1, &dir);

        pipeline.construct(Some(1), false, false).unwrap();
        assert_eq!(pipeline.model().calls(), 6);

        // Without force: no-op.
        pipeline.construct(Some(1), false, false).unwrap();
        assert_eq!(pipeline.model().calls(), 6);

        // With force: full rebuild.
        pipeline.construct(Some(1), false, true).unwrap();
        assert_eq!(pipeline.model().calls(), 12);
    }

    #[test]
    fn skipping_ahead_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = single_rank_pipeline(test_config(vec![3.0], 4, 4), 1.0, 1, &dir);
        let err = pipeline.construct(Some(3), false, false).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn reanalysis_after_downstream_realization_is_blocked() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = single_rank_pipeline(test_config(vec![3.0], 4, 4), 1.0, 1, &dir);
        pipeline.construct(Some(1), true, false).unwrap();

        // Construction of iteration 2 has advanced past its realization.
        pipeline
            .emulator_mut()
            .push_scripted(ConstructionCheckpoint::with_pending([
                ConstructionStep::Regression,
            ]));

        let err = pipeline.analyze(None).unwrap_err();
        assert!(matches!(
            err,
            EikasiaError::ReanalysisBlocked { current: 1, next: 2 }
        ));
    }

    #[test]
    fn run_cycle_persists_analysis_and_projection_data() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let mut pipeline = single_rank_pipeline(test_config(vec![3.0], 4, 4), 1.0, 1, &dir);

        let i = pipeline.run_cycle(None, false).unwrap();
        assert_eq!(i, 1);

        // scale 1.0 keeps every sample plausible (p0 <= 3.0 always).
        let record = pipeline.analysis(1).unwrap();
        assert_eq!(record.n_eval, 8);
        assert_eq!(record.plausible.len(), 8);

        let analysis = dir.path().join("iteration_001").join("analysis.json");
        let projection = dir.path().join("iteration_001").join("projection.json");
        assert!(analysis.exists());
        assert!(projection.exists());
    }

    #[test]
    fn hybrid_hooks_turn_implausibility_into_a_log_prior() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = single_rank_pipeline(test_config(vec![3.0], 4, 4), 7.5, 1, &dir);
        pipeline.construct(Some(1), false, false).unwrap();

        // Implausibility 7.5 * 0.2 = 1.5 <= 3.0: ln(1 - 1.5/3.0)
        let set = SampleSet::new(2, vec![vec![0.2, 0.5]]).unwrap();
        let (survivors, ln_prior) = pipeline
            .evaluate_sample_set(1, &set, HybridHooks::default())
            .unwrap();
        assert_eq!(survivors.len(), 1);
        assert!((ln_prior - 0.5f64.ln()).abs() < 1e-12);

        // Implausibility 7.5 * 0.6 = 4.5 > 3.0: rejected outright
        let set = SampleSet::new(2, vec![vec![0.6, 0.5]]).unwrap();
        let (survivors, ln_prior) = pipeline
            .evaluate_sample_set(1, &set, HybridHooks::default())
            .unwrap();
        assert!(survivors.is_empty());
        assert_eq!(ln_prior, f64::NEG_INFINITY);
    }

    #[test]
    fn project_hooks_record_first_cut_values() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = single_rank_pipeline(test_config(vec![3.0], 4, 4), 7.5, 1, &dir);
        pipeline.construct(Some(1), false, false).unwrap();

        let set = SampleSet::new(2, vec![vec![0.2, 0.5], vec![0.6, 0.5]]).unwrap();
        let data = pipeline
            .evaluate_sample_set(1, &set, ProjectHooks::default())
            .unwrap()
            .unwrap();
        assert_eq!(data.plausible, vec![true, false]);
        assert!((data.first_cut[0] - 1.5).abs() < 1e-12);
        assert!((data.first_cut[1] - 4.5).abs() < 1e-12);
    }

    #[test]
    fn two_rank_analysis_keeps_the_deterministic_survivors() {
        // 3 parameters, 2 ranks (one sub-system each), cutoffs [0, 3.0]:
        // the wildcard covers the largest of the two identical
        // implausibility values, the real cutoff tests the other.
        // Implausibility is 7.5 * par[0], so a sample survives iff
        // par[0] <= 0.4. The 18-point design has exactly 7 strata
        // centers at or below 0.4 in every dimension.
        init_logging();
        let results = run_spmd(2, |group| {
            let group = Arc::new(group);
            let dir = TempDir::new().unwrap();
            let model = MockModel::new(3);
            let emulator = MockEmulator::new(&*group, 3, 7.5, 10);
            let store = FileStore::new(dir.path()).unwrap();
            let config = test_config(vec![0.0, 3.0], 5, 6);
            let mut pipeline =
                Pipeline::new(Arc::clone(&group), model, emulator, store, config).unwrap();

            pipeline.construct(Some(1), true, false).unwrap();

            let record = pipeline.analysis(1).unwrap().clone();

            // Too few survivors for min_cross_val = 10.
            let err = pipeline.construct(Some(2), false, false).unwrap_err();
            (group.is_controller(), record, err)
        });

        for (is_controller, record, err) in &results {
            assert_eq!(record.n_eval, 18);
            assert_eq!(record.plausible.len(), 7);
            for row in record.plausible.iter() {
                assert!(row[0] <= 0.4 + 1e-12);
            }
            if *is_controller {
                assert!(err.is_state());
                assert!(matches!(
                    err,
                    EikasiaError::InsufficientPlausibleSamples {
                        found: 7,
                        required: 10
                    }
                ));
            } else {
                assert!(matches!(err, EikasiaError::PeerAbort(_)));
            }
        }
    }

    #[test]
    fn two_rank_evaluation_reports_per_sample_diagnostics() {
        let results = run_spmd(2, |group| {
            let group = Arc::new(group);
            let dir = TempDir::new().unwrap();
            let model = MockModel::new(3);
            let emulator = MockEmulator::new(&*group, 3, 7.5, 1);
            let store = FileStore::new(dir.path()).unwrap();
            let config = test_config(vec![0.0, 3.0], 5, 6);
            let mut pipeline =
                Pipeline::new(Arc::clone(&group), model, emulator, store, config).unwrap();

            pipeline.construct(Some(1), false, false).unwrap();

            // 10 samples, exactly 4 with par[0] <= 0.4
            let p0 = [0.05, 0.1, 0.2, 0.39, 0.5, 0.6, 0.7, 0.8, 0.9, 0.95];
            let rows = p0.iter().map(|&v| vec![v, 0.5, 0.5]).collect();
            let samples = SampleSet::new(3, rows).unwrap();
            pipeline.evaluate(&samples, None).unwrap()
        });

        // Report exists on the controller only.
        assert!(results[1].is_none());
        let report = results[0].as_ref().unwrap();
        assert_eq!(report.plausible.iter().filter(|&&p| p).count(), 4);
        assert_eq!(report.plausible[..4], [true, true, true, true]);
        assert_eq!(report.iter_stop, vec![1; 10]);
        // Both ranks' sub-systems report the same adjusted expectation.
        let expected = 7.5 * 0.2;
        assert_eq!(report.adj_exp[2].len(), 2);
        assert!((report.adj_exp[2][0] - expected).abs() < 1e-12);
        assert!((report.uni_impl[2][1] - expected).abs() < 1e-12);
    }

    #[test]
    fn unanalyzed_previous_iteration_is_analyzed_automatically() {
        let results = run_spmd(2, |group| {
            let group = Arc::new(group);
            let dir = TempDir::new().unwrap();
            let model = MockModel::new(2);
            // scale 1.0: every sample stays plausible
            let emulator = MockEmulator::new(&*group, 2, 1.0, 1);
            let store = FileStore::new(dir.path()).unwrap();
            let config = test_config(vec![0.0, 3.0], 4, 4);
            let mut pipeline =
                Pipeline::new(Arc::clone(&group), model, emulator, store, config).unwrap();

            pipeline.construct(Some(1), false, false).unwrap();
            assert!(pipeline.analysis(1).is_none());

            // Constructing iteration 2 forces the missing analysis first.
            pipeline.construct(Some(2), false, false).unwrap();
            (
                pipeline.analysis(1).map(|r| r.n_eval),
                pipeline.emulator().last_complete_iteration(),
            )
        });

        for (n_eval, last) in results {
            assert_eq!(n_eval, Some(8));
            assert_eq!(last, 2);
        }
    }

    #[test]
    fn zero_survivors_block_the_next_construction() {
        let results = run_spmd(2, |group| {
            let group = Arc::new(group);
            let dir = TempDir::new().unwrap();
            let model = MockModel::new(2);
            // Implausibility 50 * par[0] exceeds 3.0 for every stratum
            // center of the 8-point design.
            let emulator = MockEmulator::new(&*group, 2, 50.0, 1);
            let store = FileStore::new(dir.path()).unwrap();
            let config = test_config(vec![0.0, 3.0], 4, 4);
            let mut pipeline =
                Pipeline::new(Arc::clone(&group), model, emulator, store, config).unwrap();

            pipeline.construct(Some(1), true, false).unwrap();
            assert_eq!(pipeline.analysis(1).unwrap().plausible.len(), 0);

            let err = pipeline.construct(Some(2), false, false).unwrap_err();
            (group.is_controller(), err)
        });

        assert!(matches!(results[0].1, EikasiaError::NoPlausibleRegions(1)));
        assert!(matches!(results[1].1, EikasiaError::PeerAbort(_)));
    }
}
