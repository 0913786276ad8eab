//! Self-tuning subtile refinement.
//!
//! A refinement is speculative: the candidate subtiling is installed
//! while the previous one is archived, interaction timings are
//! collected for both generations, and a later verdict either keeps
//! the candidate or rolls back to the archive. Rejected candidates are
//! cached by shape, so retrying the same refinement later skips the
//! reconstruction.

use std::collections::HashMap;

use log::info;

use crate::communication::Collective;
use crate::component::Component;
use crate::constants_config::{Domain, SimConfig, TilingShapes};
use crate::errors::TilingError;
use crate::tiling::Tiling;

/// (component name, tiling name)
type StashKey = (String, String);

/// Per-interaction refinement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementState {
    /// No refinement in flight.
    Stable,
    /// A candidate subtiling is installed; the previous one is
    /// archived pending the accept/reject verdict.
    Tentative,
}

/// Outcome of an accept-or-reject round on this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementVerdict {
    Accepted([usize; 3]),
    Rejected,
}

/// Coordinates tentative subtiling refinements across the components
/// of this process and, through the collective exchange, keeps the
/// refinement cadence synchronized across all processes.
#[derive(Debug, Default)]
pub struct RefinementCoordinator {
    state: HashMap<String, RefinementState>,
    /// Subtilings archived while a candidate is on trial.
    stored: HashMap<StashKey, Tiling>,
    /// Previously rejected candidates, keyed additionally by their
    /// shape so a retried refinement can reuse them.
    rejected: HashMap<(String, String, [usize; 3]), Tiling>,
}

impl RefinementCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refinement state for an interaction.
    pub fn state(&self, interaction_name: &str) -> RefinementState {
        self.state
            .get(interaction_name)
            .copied()
            .unwrap_or(RefinementState::Stable)
    }

    /// Tentatively refines the subtilings of an interaction on every
    /// component carrying them.
    ///
    /// The current subtiling (and its "subtiles 2" variant, when
    /// present) is archived and replaced by a candidate whose shape
    /// grows by one along the axis with the largest subtile extent,
    /// driving toward cubic subtiles over repeated refinements. A
    /// cached rejected candidate of that exact shape is reinstalled
    /// instead of being rebuilt. Timing counters carry over to the
    /// installed candidate.
    pub fn tentatively_refine(
        &mut self,
        interaction_name: &str,
        components: &mut [Component],
        domain: &Domain,
        shapes: &mut TilingShapes,
        config: &SimConfig,
    ) -> Result<(), TilingError> {
        let subtiling_name = format!("{} (subtiles)", interaction_name);
        let subtiling_name_2 = format!("{} (subtiles 2)", interaction_name);
        let mut new_shape: Option<[usize; 3]> = None;
        for component in components.iter_mut() {
            let Some(subtiling) = component.tilings.remove(&subtiling_name) else {
                continue;
            };
            let computation_time_total = subtiling.computation_time_total;
            let refinement_offset = subtiling.refinement_offset;
            let subtile_extent = subtiling.tile_extent;
            let current_shape = subtiling.shape;
            self.stored
                .insert((component.name.clone(), subtiling_name.clone()), subtiling);
            let has_second = match component.tilings.remove(&subtiling_name_2) {
                Some(subtiling_2) => {
                    self.stored.insert(
                        (component.name.clone(), subtiling_name_2.clone()),
                        subtiling_2,
                    );
                    true
                }
                None => false,
            };
            let new_shape = *new_shape.get_or_insert_with(|| {
                let mut shape = shapes.get(&subtiling_name).unwrap_or(current_shape);
                let max_extent = subtile_extent[0].max(subtile_extent[1]).max(subtile_extent[2]);
                for dim in 0..3 {
                    if subtile_extent[dim] == max_extent {
                        shape[dim] += 1;
                    }
                }
                shape
            });
            shapes.set(&subtiling_name, new_shape);
            // Reuse a previously rejected candidate of this exact
            // shape, restoring its accumulated timing state.
            let rejected_key =
                (component.name.clone(), subtiling_name.clone(), new_shape);
            if let Some(mut candidate) = self.rejected.remove(&rejected_key) {
                candidate.computation_time_total = computation_time_total;
                candidate.refinement_offset = refinement_offset;
                component
                    .tilings
                    .insert(subtiling_name.clone(), candidate);
                if has_second {
                    let rejected_key_2 =
                        (component.name.clone(), subtiling_name_2.clone(), new_shape);
                    match self.rejected.remove(&rejected_key_2) {
                        Some(candidate_2) => {
                            component
                                .tilings
                                .insert(subtiling_name_2.clone(), candidate_2);
                        }
                        None => {
                            component.init_tiling(&subtiling_name_2, domain, shapes, config)?;
                        }
                    }
                }
                continue;
            }
            component.init_tiling(&subtiling_name, domain, shapes, config)?;
            if let Some(candidate) = component.tilings.get_mut(&subtiling_name) {
                candidate.computation_time_total = computation_time_total;
                candidate.refinement_offset = refinement_offset;
            }
            if has_second {
                component.init_tiling(&subtiling_name_2, domain, shapes, config)?;
            }
        }
        self.state
            .insert(interaction_name.to_string(), RefinementState::Tentative);
        Ok(())
    }

    /// Judges the tentative refinement of an interaction from per-rung
    /// timing statistics and either keeps or rolls back the candidate
    /// subtilings.
    ///
    /// All three arrays have length `2 * n_rungs`: the lower half holds
    /// statistics gathered with the candidate ("new") subtiling, the
    /// upper half those of the archived ("old") one, per lowest active
    /// rung. The old cost is deliberately exaggerated by
    /// `refinement_sigmas` standard deviations, biasing toward
    /// acceptance. The verdicts of all ranks are then exchanged
    /// collectively; any rank accepting makes every rank fast-forward
    /// its refinement timer, keeping the cadence synchronized.
    pub fn accept_or_reject(
        &mut self,
        interaction_name: &str,
        time_sums: &[f64],
        time_sqsums: &[f64],
        time_counts: &[usize],
        components: &mut [Component],
        collective: &impl Collective,
        shapes: &mut TilingShapes,
        config: &SimConfig,
    ) -> Result<RefinementVerdict, TilingError> {
        if self.state(interaction_name) != RefinementState::Tentative {
            return Err(TilingError::CalculationError(format!(
                "accept_or_reject called for \"{}\" without a tentative refinement",
                interaction_name
            )));
        }
        let n_rungs = config.n_rungs;
        for (name, len) in [
            ("time_sums", time_sums.len()),
            ("time_sqsums", time_sqsums.len()),
            ("time_counts", time_counts.len()),
        ] {
            if len != 2 * n_rungs {
                return Err(TilingError::MismatchedArrays {
                    name: name.to_string(),
                    expected: 2 * n_rungs,
                    found: len,
                });
            }
        }
        let mut means = vec![0.0; 2 * n_rungs];
        for index in 0..2 * n_rungs {
            if time_counts[index] > 0 {
                means[index] = time_sums[index] / time_counts[index] as f64;
            }
        }
        let mut stds_old = vec![0.0; n_rungs];
        for rung_index in 0..n_rungs {
            let index = n_rungs + rung_index;
            let n = time_counts[index];
            if n > 0 {
                let variance = time_sqsums[index] / n as f64 - means[index] * means[index];
                stds_old[rung_index] = variance.max(0.0).sqrt();
            }
        }
        // Pessimistic total of the old computations: mean plus a few
        // standard deviations, encouraging early refinement.
        let sigmas = config.refinement_sigmas;
        let mut time_total_old = 0.0;
        for rung_index in 0..n_rungs {
            let index = n_rungs + rung_index;
            if time_counts[index] == 0 || time_counts[rung_index] == 0 {
                continue;
            }
            time_total_old +=
                time_counts[index] as f64 * (means[index] + sigmas * stds_old[rung_index]);
        }
        // Time the new subtiling would have needed for the old amount
        // of work.
        let mut time_total_new = 0.0;
        for rung_index in 0..n_rungs {
            if time_counts[rung_index] == 0 || time_counts[n_rungs + rung_index] == 0 {
                continue;
            }
            time_total_new += time_counts[n_rungs + rung_index] as f64 * means[rung_index];
        }
        let subtiling_name = format!("{} (subtiles)", interaction_name);
        let subtiling_name_2 = format!("{} (subtiles 2)", interaction_name);
        let accepted = time_total_new < time_total_old;
        let verdict;
        let message: [i64; 3];
        if accepted {
            // Drop the archived old subtilings; the candidates stay.
            self.stored
                .retain(|(_, name), _| name != &subtiling_name && name != &subtiling_name_2);
            let shape = shapes.get(&subtiling_name).ok_or_else(|| {
                TilingError::CalculationError(format!(
                    "No recorded shape for \"{}\"",
                    subtiling_name
                ))
            })?;
            message = [shape[0] as i64, shape[1] as i64, shape[2] as i64];
            verdict = RefinementVerdict::Accepted(shape);
        } else {
            // Roll back: restore the archived subtilings and cache the
            // rejected candidates under their shape for later reuse.
            let keys: Vec<StashKey> = self
                .stored
                .keys()
                .filter(|(_, name)| name == &subtiling_name || name == &subtiling_name_2)
                .cloned()
                .collect();
            let mut old_shape = None;
            for key in keys {
                let Some(mut archived) = self.stored.remove(&key) else {
                    continue;
                };
                let (component_name, name) = &key;
                let Some(component) = components
                    .iter_mut()
                    .find(|component| &component.name == component_name)
                else {
                    continue;
                };
                if let Some(candidate) = component.tilings.remove(name) {
                    archived.computation_time_total = candidate.computation_time_total;
                    archived.refinement_offset = candidate.refinement_offset;
                    if name == &subtiling_name {
                        old_shape = Some(archived.shape);
                    }
                    self.rejected.insert(
                        (component_name.clone(), name.clone(), candidate.shape),
                        candidate,
                    );
                }
                component.tilings.insert(name.clone(), archived);
            }
            if let Some(shape) = old_shape {
                shapes.set(&subtiling_name, shape);
            }
            message = [0, 0, 0];
            verdict = RefinementVerdict::Rejected;
        }
        self.state
            .insert(interaction_name.to_string(), RefinementState::Stable);
        // Exchange verdicts with every rank; a zero shape encodes
        // rejection.
        let all_messages = collective.allgather(&message);
        let mut any_acceptance = false;
        for rank in 0..collective.size() {
            let verdict_of_rank = &all_messages[3 * rank..3 * rank + 3];
            if verdict_of_rank[0] == 0 {
                continue;
            }
            any_acceptance = true;
            info!(
                "Rank {}: refined {} subtile decomposition: {}×{}×{}",
                rank,
                interaction_name,
                verdict_of_rank[0],
                verdict_of_rank[1],
                verdict_of_rank[2],
            );
        }
        // Fast-forward the refinement cycle on every rank as soon as a
        // single rank accepts, so all ranks start collecting timings
        // for the next attempt together.
        if any_acceptance {
            for component in components.iter_mut() {
                if let Some(subtiling) = component.tilings.get_mut(&subtiling_name) {
                    subtiling.refinement_offset += subtiling
                        .refinement_period
                        .saturating_sub(config.refinement_period_min);
                }
            }
        }
        Ok(verdict)
    }
}
