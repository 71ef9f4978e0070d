//! The generic evaluate/analyze traversal.
//!
//! One implementation serves all four use cases (construction analysis,
//! external evaluation query, hybrid-sampler integration, projection):
//! walk the iterations up to a target, evaluate every still-plausible
//! sample in the emulator, let the controller apply the implausibility
//! cutoffs, and broadcast the surviving index set before the next
//! iteration's evaluation begins. Specialization happens exclusively
//! through [`TraversalHooks`].

use crate::comm::ProcessGroup;
use crate::eval::implausibility;
use crate::eval::{IterationOutcome, SampleEval, TraversalCx, TraversalHooks};
use crate::link::{Emulator, EmulatorKind, Model};
use crate::models::{EikasiaError, Result, SampleSet};
use crate::pipeline::Pipeline;
use crate::store::PersistentStore;
use tracing::debug;

impl<G, M, E, S> Pipeline<G, M, E, S>
where
    G: ProcessGroup,
    M: Model,
    E: Emulator,
    S: PersistentStore,
{
    /// Evaluate a sample set against the emulator through all iterations
    /// up to `target`, specialized by `hooks`.
    ///
    /// Implausibility shards are gathered on the controller, the cutoff
    /// decision is broadcast back, and the loop ends early once no
    /// sample remains plausible. Results for iteration `i` are fully
    /// resolved (barrier-separated) before iteration `i + 1`'s
    /// evaluation reads begin.
    pub fn evaluate_sample_set<H>(
        &self,
        target: u32,
        sample_set: &SampleSet,
        mut hooks: H,
    ) -> Result<H::Output>
    where
        H: TraversalHooks<G>,
    {
        // The traversal is only defined for the default emulator kind.
        if let EmulatorKind::Custom(name) = self.emulator().kind() {
            return Err(EikasiaError::UnsupportedEmulator(name));
        }

        let group = self.comm_group();
        let n_sam = sample_set.len();
        let cx = TraversalCx {
            group,
            target_iteration: target,
            n_sam,
        };
        hooks.pre(&cx)?;

        let mut plausible = vec![true; n_sam];
        let mut active: Vec<usize> = (0..n_sam).collect();
        let mut active_set = sample_set.clone();

        for i in 1..=target {
            debug!(
                iteration = i,
                n_active = active.len(),
                "analyzing evaluation sample set"
            );

            let data_values = self.emulator().data_values(i)?;
            let data_errors = self.emulator().data_errors(i)?;
            let data_spaces = self.emulator().data_spaces(i)?;
            let selectors = self.emulator().data_selectors(i)?;

            // Evaluate this rank's sub-systems for every active sample.
            let mut uni_rows: Vec<Vec<f64>> = Vec::with_capacity(active.len());
            for (j, par) in active_set.iter().enumerate() {
                let (adj_exp, adj_var) = self.emulator().evaluate(i, par)?;
                let md_var = implausibility::discrepancy_variance(
                    self.model_ref(),
                    i,
                    par,
                    &selectors,
                    &data_values,
                    &data_spaces,
                )?;
                let uni =
                    implausibility::univariate(&adj_exp, &adj_var, &md_var, &data_values, &data_errors)?;
                hooks.per_sample(
                    &cx,
                    i,
                    active[j],
                    &SampleEval {
                        adj_exp: &adj_exp,
                        adj_var: &adj_var,
                        uni_impl: &uni,
                    },
                )?;
                uni_rows.push(uni);
            }

            // Controller collects all shards and applies the cutoffs.
            let gathered = group.gather(uni_rows)?;
            let decision: Option<Vec<usize>> = if let Some(rank_rows) = gathered {
                let merged: Vec<Vec<f64>> = (0..active.len())
                    .map(|j| {
                        rank_rows
                            .iter()
                            .flat_map(|rows| rows[j].iter().copied())
                            .collect()
                    })
                    .collect();
                let cutoffs = self.cutoff_for(i)?;
                let (pass, first_cut) = implausibility::check(cutoffs, &merged)?;
                for (j, &ok) in pass.iter().enumerate() {
                    if !ok {
                        plausible[active[j]] = false;
                    }
                }
                hooks.per_analysis(
                    &cx,
                    &IterationOutcome {
                        iteration: i,
                        cutoffs,
                        active_before: &active,
                        pass: &pass,
                        first_cut: &first_cut,
                    },
                )?;
                Some((0..n_sam).filter(|&s| plausible[s]).collect())
            } else {
                None
            };

            group.barrier()?;

            // The decision, not the data, goes back out.
            let next_active: Vec<usize> = group.broadcast(decision)?;
            let mut next_plausible = vec![false; n_sam];
            for &s in &next_active {
                next_plausible[s] = true;
            }
            plausible = next_plausible;
            active = next_active;

            if active.is_empty() {
                debug!(iteration = i, "no plausible samples remain, ending early");
                break;
            }
            active_set = sample_set.select(&active);
        }

        hooks.post(&cx, &active, &plausible)?;
        if group.is_controller() {
            hooks.exit(&cx)?;
        }
        Ok(hooks.finish(&cx, sample_set, &active, &plausible))
    }
}
