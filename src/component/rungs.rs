//! Adaptive time-step rung classification.
//!
//! Rung 0 uses the full base time step; rung r uses a step of
//! `base_step / 2^r`. A particle's rung is chosen from its comoving
//! velocity relative to the distance `fac_softening * softening_length`
//! it may cross per step, giving a power-of-two stratification: each
//! rung up doubles the tolerable step-to-softening ratio.
//!
//! Inter-rung jumps use a strict two-phase flag/apply split, so that
//! every jump decision is made against the pre-jump rung populations.

use rayon::prelude::*;

use crate::component::Component;

impl Component {
    /// Factor converting squared momentum to squared comoving velocity.
    fn comoving_v2_factor(&self) -> f64 {
        let inv = 1.0 / (self.scale_factor.powf(2.0 - 3.0 * self.w_eff) * self.mass);
        inv * inv
    }

    /// Assigns a time-step rung to every particle.
    ///
    /// Particles with comoving v² at or below
    /// `(fac_softening * softening_length / dt)²` land on rung 0;
    /// beyond that, each quadrupling of v² adds one rung, up to
    /// `n_rungs - 1`. Components without rungs put everything on
    /// rung 0.
    pub fn assign_rungs(&mut self, dt: f64, fac_softening: f64) {
        let n_local = self.n_local();
        if !self.use_rungs {
            for n in &mut self.rungs_n {
                *n = 0;
            }
            self.rungs_n[0] = n_local;
            self.set_lowest_highest_populated_rung();
            return;
        }
        let v2_factor = self.comoving_v2_factor();
        let v_threshold = fac_softening * self.softening_length / dt;
        let v2_threshold = v_threshold * v_threshold;
        let top_rung = (self.n_rungs - 1) as i8;
        let Component {
            mom_x,
            mom_y,
            mom_z,
            rung_indices,
            ..
        } = &mut *self;
        rung_indices[..n_local]
            .par_iter_mut()
            .zip(mom_x[..n_local].par_iter())
            .zip(mom_y[..n_local].par_iter())
            .zip(mom_z[..n_local].par_iter())
            .for_each(|(((rung_index, &mx), &my), &mz)| {
                let v2 = (mx * mx + my * my + mz * mz) * v2_factor;
                *rung_index = if v2 <= v2_threshold {
                    0
                } else {
                    let rung = (0.5 * (v2 / v2_threshold).log2()) as i32 + 1;
                    rung.min(top_rung as i32) as i8
                };
            });
        for n in &mut self.rungs_n {
            *n = 0;
        }
        for &rung_index in &self.rung_indices[..n_local] {
            self.rungs_n[rung_index as usize] += 1;
        }
        self.set_lowest_highest_populated_rung();
    }

    /// Flags inter-rung jumps for every active particle, without
    /// applying them. Returns whether any jump was flagged.
    ///
    /// `rung_integrals` has length `2 * n_rungs`; a sentinel of -1 at
    /// `n_rungs + r` disallows down-jumps from rung r this kick, which
    /// callers use to permit down-jumps only every second kick and so
    /// avoid oscillation. An extra hysteresis margin of
    /// `downjump_fac²` is applied on top of the quarter-threshold.
    pub fn flag_rung_jumps(
        &mut self,
        dt: f64,
        rung_integrals: &[f64],
        fac_softening: f64,
        downjump_fac: f64,
    ) -> bool {
        if !self.use_rungs {
            return false;
        }
        let n_local = self.n_local();
        let v2_factor = self.comoving_v2_factor();
        let v_threshold = fac_softening * self.softening_length / dt;
        let v2_threshold = v_threshold * v_threshold;
        let top_rung = (self.n_rungs - 1) as i8;
        let lowest_active_rung = self.lowest_active_rung as i8;
        let n_rungs = self.n_rungs;
        let downjump_fac2 = downjump_fac * downjump_fac;
        let Component {
            mom_x,
            mom_y,
            mom_z,
            rung_indices,
            rung_jumps,
            ..
        } = &mut *self;
        rung_jumps[..n_local]
            .par_iter_mut()
            .zip(rung_indices[..n_local].par_iter())
            .zip(mom_x[..n_local].par_iter())
            .zip(mom_y[..n_local].par_iter())
            .zip(mom_z[..n_local].par_iter())
            .map(|((((jump, &rung_index), &mx), &my), &mz)| {
                if rung_index < lowest_active_rung {
                    return false;
                }
                let v2 = (mx * mx + my * my + mz * mz) * v2_factor;
                // Maximum allowed v² on this rung: 4^rung times the
                // rung-0 threshold.
                let v2_max = 4.0f64.powi(rung_index as i32) * v2_threshold;
                if v2 > v2_max {
                    if rung_index < top_rung {
                        *jump = 1;
                        return true;
                    }
                    return false;
                }
                // At rung 0 there is nowhere further down.
                if rung_index == 0 {
                    return false;
                }
                if rung_integrals[n_rungs + rung_index as usize] == -1.0 {
                    return false;
                }
                let v2_min = 0.25 * v2_max;
                if v2 < downjump_fac2 * v2_min {
                    *jump = -1;
                    return true;
                }
                false
            })
            .reduce(|| false, |a, b| a | b)
    }

    /// Applies all flagged inter-rung jumps and clears the flags.
    pub fn apply_rung_jumps(&mut self) {
        let n_local = self.n_local();
        for i in 0..n_local {
            let jump = self.rung_jumps[i];
            if jump == 0 {
                continue;
            }
            let rung_index = self.rung_indices[i];
            self.rungs_n[rung_index as usize] -= 1;
            let rung_index = rung_index + jump;
            self.rungs_n[rung_index as usize] += 1;
            self.rung_indices[i] = rung_index;
            self.rung_jumps[i] = 0;
        }
        self.set_lowest_highest_populated_rung();
    }

    /// Recomputes the lowest and highest populated rung from the
    /// per-rung occupancy counts.
    pub fn set_lowest_highest_populated_rung(&mut self) {
        let mut lowest = (self.n_rungs - 1) as u8;
        let mut highest = 0;
        for rung_index in 0..self.n_rungs {
            if self.rungs_n[rung_index] > 0 {
                lowest = rung_index as u8;
                break;
            }
        }
        for rung_index in (0..self.n_rungs).rev() {
            if self.rungs_n[rung_index] > 0 {
                highest = rung_index as u8;
                break;
            }
        }
        self.lowest_populated_rung = lowest;
        self.highest_populated_rung = highest;
    }
}
