// src/constants_config.rs

use std::collections::HashMap;

use crate::errors::TilingError;

/// Tunable parameters shared by every tiling and component.
///
/// The growth factor and the refinement sigma margin are calibration
/// values, not physical constants, and so are kept configurable.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of time-step rungs. Rung `r` uses a step of
    /// `base_step / 2^r`.
    pub n_rungs: usize,
    /// Geometric growth factor for tile rung buckets.
    pub rung_growth: f64,
    /// Number of standard deviations added to the measured old cost
    /// when judging a subtiling refinement, biasing toward acceptance.
    pub refinement_sigmas: f64,
    /// Lower bound on the subtiling refinement period,
    /// in base time steps.
    pub refinement_period_min: usize,
    /// Per-interaction short-range parameters, keyed by
    /// interaction name (e.g. "gravity").
    pub interactions: HashMap<String, InteractionParams>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            n_rungs: 8,
            rung_growth: 1.1,
            refinement_sigmas: 0.3,
            refinement_period_min: 2,
            interactions: HashMap::new(),
        }
    }
}

impl SimConfig {
    /// Looks up the parameters of a named interaction.
    pub fn interaction(&self, name: &str) -> Result<&InteractionParams, TilingError> {
        self.interactions.get(name).ok_or_else(|| {
            TilingError::CalculationError(format!(
                "No short-range parameters registered for interaction \"{}\"",
                name
            ))
        })
    }
}

/// Short-range parameters of a single interaction.
#[derive(Debug, Clone)]
pub struct InteractionParams {
    /// Short-range cutoff length; coarse tiles must be at least
    /// this large in every direction.
    pub cutoff: f64,
    /// How the subtiling shape is chosen.
    pub subtiling: SubtilingSpec,
}

/// Subtiling shape selection for one interaction.
#[derive(Debug, Clone, Copy)]
pub enum SubtilingSpec {
    /// A fixed, user-chosen subtile lattice shape.
    Shape([usize; 3]),
    /// Automatic refinement: start from a heuristic shape and refine
    /// every `refinement_period` base time steps.
    Automatic { refinement_period: usize },
}

/// The spatial extent of the local domain, as handed down by the
/// domain decomposition. The tilings of a component are anchored to
/// this volume.
#[derive(Debug, Clone, Copy)]
pub struct Domain {
    /// Side length of the full simulation box.
    pub boxsize: f64,
    /// Left, backward, lower corner of the local domain.
    pub location: [f64; 3],
    /// Size of the local domain along each axis.
    pub extent: [f64; 3],
}

impl Domain {
    /// A single-process domain covering the whole box.
    pub fn whole_box(boxsize: f64) -> Self {
        Self {
            boxsize,
            location: [0.0; 3],
            extent: [boxsize; 3],
        }
    }
}

/// Shared table of tile-lattice shapes, keyed by tiling name.
///
/// All components of a process agree on the shape of equally named
/// tilings through this table; the refinement coordinator updates it
/// when a refinement is accepted or rolled back. It is an explicit
/// struct passed by reference rather than module-level state.
#[derive(Debug, Clone, Default)]
pub struct TilingShapes {
    shapes: HashMap<String, [usize; 3]>,
}

impl TilingShapes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tiling_name: &str) -> Option<[usize; 3]> {
        self.shapes.get(tiling_name).copied()
    }

    pub fn set(&mut self, tiling_name: &str, shape: [usize; 3]) {
        self.shapes.insert(tiling_name.to_string(), shape);
    }
}
