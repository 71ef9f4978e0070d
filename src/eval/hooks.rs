//! Extension points of the generic evaluate/analyze traversal.
//!
//! The traversal ([`Pipeline::evaluate_sample_set`]) is shared by four
//! use cases; each one specializes it through a [`TraversalHooks`]
//! strategy with five ordered slots: `pre`, `per_sample`, `per_analysis`,
//! `post` and `exit`. Only the controller runs `per_analysis` and `exit`.
//!
//! [`Pipeline::evaluate_sample_set`]: crate::pipeline::Pipeline::evaluate_sample_set

use crate::comm::ProcessGroup;
use crate::models::{CutoffVector, Result, SampleSet};
use serde::{Deserialize, Serialize};

/// Shared context handed to every hook.
pub struct TraversalCx<'a, G: ProcessGroup> {
    /// The process group the traversal runs on.
    pub group: &'a G,
    /// The iteration the traversal runs up to.
    pub target_iteration: u32,
    /// Total number of samples in the evaluated set.
    pub n_sam: usize,
}

/// One sample's emulator evaluation at one iteration (this rank's active
/// sub-systems only).
pub struct SampleEval<'a> {
    /// Adjusted expectation values.
    pub adj_exp: &'a [f64],
    /// Adjusted variance values.
    pub adj_var: &'a [f64],
    /// Univariate implausibility values.
    pub uni_impl: &'a [f64],
}

/// The controller's implausibility verdict for one iteration of the
/// traversal.
pub struct IterationOutcome<'a> {
    /// The iteration that was analyzed.
    pub iteration: u32,
    /// Cutoffs applied at this iteration.
    pub cutoffs: &'a CutoffVector,
    /// Global sample indices that entered this iteration, in order.
    pub active_before: &'a [usize],
    /// Per entry of `active_before`: passed all cutoffs?
    pub pass: &'a [bool],
    /// Per entry of `active_before`: implausibility at the first real
    /// cutoff.
    pub first_cut: &'a [f64],
}

/// The five hook slots of the generic traversal.
///
/// Hooks default to no-ops; `finish` turns the accumulated state into
/// the use case's result. A use case whose result only exists on the
/// controller returns an `Option` and yields `None` on workers — never
/// an undefined value.
pub trait TraversalHooks<G: ProcessGroup> {
    /// The traversal's result type.
    type Output;

    /// Runs once before any evaluation.
    fn pre(&mut self, _cx: &TraversalCx<G>) -> Result<()> {
        Ok(())
    }

    /// Runs after each sample's emulator evaluation. `sample` is the
    /// global index into the evaluated set.
    fn per_sample(
        &mut self,
        _cx: &TraversalCx<G>,
        _iteration: u32,
        _sample: usize,
        _eval: &SampleEval,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs on the controller after each iteration's implausibility
    /// check.
    fn per_analysis(&mut self, _cx: &TraversalCx<G>, _outcome: &IterationOutcome) -> Result<()> {
        Ok(())
    }

    /// Runs on every rank after the iteration loop (or its early exit).
    fn post(&mut self, _cx: &TraversalCx<G>, _survivors: &[usize], _plausible: &[bool]) -> Result<()> {
        Ok(())
    }

    /// Runs on the controller only, after `post`.
    fn exit(&mut self, _cx: &TraversalCx<G>) -> Result<()> {
        Ok(())
    }

    /// Produce the result.
    fn finish(
        self,
        cx: &TraversalCx<G>,
        sample_set: &SampleSet,
        survivors: &[usize],
        plausible: &[bool],
    ) -> Self::Output;
}

// ── Analyze ───────────────────────────────────────────────────────────

/// Construction-analysis use case: the result is the surviving sample
/// subset, available on every rank.
#[derive(Debug, Default)]
pub struct AnalyzeHooks;

impl<G: ProcessGroup> TraversalHooks<G> for AnalyzeHooks {
    type Output = SampleSet;

    fn finish(
        self,
        _cx: &TraversalCx<G>,
        sample_set: &SampleSet,
        survivors: &[usize],
        _plausible: &[bool],
    ) -> SampleSet {
        sample_set.select(survivors)
    }
}

// ── Evaluate ──────────────────────────────────────────────────────────

/// Full per-sample diagnostics of an external evaluation query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Whether each sample passed the implausibility checks at the
    /// target iteration.
    pub plausible: Vec<bool>,
    /// Last iteration at which each sample was still evaluated.
    pub iter_stop: Vec<u32>,
    /// Adjusted expectation values per sample (all ranks' sub-systems
    /// concatenated, from the last iteration the sample reached).
    pub adj_exp: Vec<Vec<f64>>,
    /// Adjusted variance values per sample.
    pub adj_var: Vec<Vec<f64>>,
    /// Univariate implausibility values per sample.
    pub uni_impl: Vec<Vec<f64>>,
}

/// External evaluation query use case. The report is produced on the
/// controller; workers yield `None`.
#[derive(Debug, Default)]
pub struct EvaluateHooks {
    adj_exp: Vec<Vec<f64>>,
    adj_var: Vec<Vec<f64>>,
    uni_impl: Vec<Vec<f64>>,
    iter_stop: Vec<u32>,
    merged: Option<(Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<Vec<f64>>)>,
    gathered: Option<[Vec<Vec<Vec<f64>>>; 3]>,
}

impl<G: ProcessGroup> TraversalHooks<G> for EvaluateHooks {
    type Output = Option<EvaluationReport>;

    fn pre(&mut self, cx: &TraversalCx<G>) -> Result<()> {
        self.adj_exp = vec![Vec::new(); cx.n_sam];
        self.adj_var = vec![Vec::new(); cx.n_sam];
        self.uni_impl = vec![Vec::new(); cx.n_sam];
        self.iter_stop = vec![0; cx.n_sam];
        Ok(())
    }

    fn per_sample(
        &mut self,
        _cx: &TraversalCx<G>,
        _iteration: u32,
        sample: usize,
        eval: &SampleEval,
    ) -> Result<()> {
        // Last write wins: the report carries the values from the last
        // iteration each sample was still evaluated in.
        self.adj_exp[sample] = eval.adj_exp.to_vec();
        self.adj_var[sample] = eval.adj_var.to_vec();
        self.uni_impl[sample] = eval.uni_impl.to_vec();
        Ok(())
    }

    fn per_analysis(&mut self, _cx: &TraversalCx<G>, outcome: &IterationOutcome) -> Result<()> {
        for &sample in outcome.active_before {
            self.iter_stop[sample] = outcome.iteration;
        }
        Ok(())
    }

    fn post(&mut self, cx: &TraversalCx<G>, _survivors: &[usize], _plausible: &[bool]) -> Result<()> {
        let exp = cx.group.gather(self.adj_exp.clone())?;
        let var = cx.group.gather(self.adj_var.clone())?;
        let uni = cx.group.gather(self.uni_impl.clone())?;
        if let (Some(exp), Some(var), Some(uni)) = (exp, var, uni) {
            self.gathered = Some([exp, var, uni]);
        }
        Ok(())
    }

    fn exit(&mut self, cx: &TraversalCx<G>) -> Result<()> {
        if let Some([exp, var, uni]) = self.gathered.take() {
            let concat = |ranks: Vec<Vec<Vec<f64>>>| -> Vec<Vec<f64>> {
                (0..cx.n_sam)
                    .map(|s| {
                        ranks
                            .iter()
                            .flat_map(|rank| rank[s].iter().copied())
                            .collect()
                    })
                    .collect()
            };
            self.merged = Some((concat(exp), concat(var), concat(uni)));
        }
        Ok(())
    }

    fn finish(
        self,
        _cx: &TraversalCx<G>,
        _sample_set: &SampleSet,
        _survivors: &[usize],
        plausible: &[bool],
    ) -> Option<EvaluationReport> {
        let (adj_exp, adj_var, uni_impl) = self.merged?;
        Some(EvaluationReport {
            plausible: plausible.to_vec(),
            iter_stop: self.iter_stop,
            adj_exp,
            adj_var,
            uni_impl,
        })
    }
}

// ── Hybrid ────────────────────────────────────────────────────────────

/// Hybrid-sampler integration: turns the implausibility of a single
/// proposed sample into a log-prior contribution, broadcast to every
/// rank.
#[derive(Debug, Default)]
pub struct HybridHooks {
    ln_prior: f64,
}

impl<G: ProcessGroup> TraversalHooks<G> for HybridHooks {
    type Output = (SampleSet, f64);

    fn per_analysis(&mut self, _cx: &TraversalCx<G>, outcome: &IterationOutcome) -> Result<()> {
        if let Some(pos) = outcome.active_before.iter().position(|&g| g == 0) {
            self.ln_prior = if outcome.pass[pos] {
                (1.0 - outcome.first_cut[pos] / outcome.cutoffs.first_cut()).ln()
            } else {
                f64::NEG_INFINITY
            };
        }
        Ok(())
    }

    fn post(&mut self, cx: &TraversalCx<G>, _survivors: &[usize], _plausible: &[bool]) -> Result<()> {
        // Broadcast the bit pattern: the log-prior is -inf for rejected
        // samples, which plain float encodings cannot carry.
        let bits = cx.group.broadcast(if cx.group.is_controller() {
            Some(self.ln_prior.to_bits())
        } else {
            None
        })?;
        self.ln_prior = f64::from_bits(bits);
        Ok(())
    }

    fn finish(
        self,
        _cx: &TraversalCx<G>,
        sample_set: &SampleSet,
        survivors: &[usize],
        _plausible: &[bool],
    ) -> (SampleSet, f64) {
        (sample_set.select(survivors), self.ln_prior)
    }
}

// ── Project ───────────────────────────────────────────────────────────

/// Per-sample projection data: the raw material for projection figures,
/// which are produced outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionData {
    /// Whether each sample passed the implausibility checks.
    pub plausible: Vec<bool>,
    /// Implausibility at the first real cutoff, from the last iteration
    /// each sample reached (0 for samples never analyzed).
    pub first_cut: Vec<f64>,
}

/// Projection use case. Data is produced on the controller; workers
/// yield `None`.
#[derive(Debug, Default)]
pub struct ProjectHooks {
    first_cut: Vec<f64>,
}

impl<G: ProcessGroup> TraversalHooks<G> for ProjectHooks {
    type Output = Option<ProjectionData>;

    fn pre(&mut self, cx: &TraversalCx<G>) -> Result<()> {
        self.first_cut = vec![0.0; cx.n_sam];
        Ok(())
    }

    fn per_analysis(&mut self, _cx: &TraversalCx<G>, outcome: &IterationOutcome) -> Result<()> {
        for (j, &sample) in outcome.active_before.iter().enumerate() {
            self.first_cut[sample] = outcome.first_cut[j];
        }
        Ok(())
    }

    fn finish(
        self,
        cx: &TraversalCx<G>,
        _sample_set: &SampleSet,
        _survivors: &[usize],
        plausible: &[bool],
    ) -> Option<ProjectionData> {
        if !cx.group.is_controller() {
            return None;
        }
        Some(ProjectionData {
            plausible: plausible.to_vec(),
            first_cut: self.first_cut,
        })
    }
}
