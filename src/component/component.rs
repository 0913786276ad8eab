//! The particle container: structure-of-arrays position/momentum data,
//! per-particle rung state, and the registry of tilings attached to it.

use std::collections::HashMap;

use log::info;

use crate::constants_config::{Domain, SimConfig, SubtilingSpec, TilingShapes};
use crate::errors::TilingError;
use crate::tiling::{ParticleView, Tiling};

/// Target number of particles per subtile when the subtiling shape is
/// chosen automatically. Performs well as long as the particles are
/// not too clustered.
const PARTICLES_PER_SUBTILE_MIN: f64 = 8.0;
const PARTICLES_PER_SUBTILE_MAX: f64 = 14.0;

/// A collection of particles local to this process.
///
/// Particle properties live in parallel growable arrays, all of equal
/// length; positions and momenta are the live state, while the `dmom_*`
/// buffers hold momentum updates during kicks and double as scratch
/// space for the in-memory tile sort. Cross-references from tilings
/// into these arrays are plain indices, never owned data.
#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    pub pos_x: Vec<f64>,
    pub pos_y: Vec<f64>,
    pub pos_z: Vec<f64>,
    pub mom_x: Vec<f64>,
    pub mom_y: Vec<f64>,
    pub mom_z: Vec<f64>,
    pub dmom_x: Vec<f64>,
    pub dmom_y: Vec<f64>,
    pub dmom_z: Vec<f64>,
    /// Time-step rung of each particle.
    pub rung_indices: Vec<i8>,
    /// Pending inter-rung jump of each particle: -1, 0 or +1.
    pub rung_jumps: Vec<i8>,
    /// Number of particles on each rung.
    pub rungs_n: Vec<usize>,
    pub lowest_populated_rung: u8,
    pub highest_populated_rung: u8,
    /// Rung below which particles are not kicked this sub-step.
    pub lowest_active_rung: u8,
    /// Mass of a single particle.
    pub mass: f64,
    /// Gravitational softening length.
    pub softening_length: f64,
    /// Scale factor of the background expansion, updated by the driver.
    pub scale_factor: f64,
    /// Effective equation-of-state parameter. Zero for matter.
    pub w_eff: f64,
    /// Whether this component uses adaptive time stepping. When false,
    /// every particle stays on rung 0.
    pub use_rungs: bool,
    pub n_rungs: usize,
    /// Tilings attached to this component, keyed by tiling name.
    pub tilings: HashMap<String, Tiling>,
}

impl Component {
    /// Creates an empty component. Particles are added with
    /// [`Component::push_particle`] or bulk-grown with
    /// [`Component::resize_particles`].
    pub fn new(name: &str, mass: f64, softening_length: f64, config: &SimConfig) -> Self {
        Self {
            name: name.to_string(),
            pos_x: Vec::new(),
            pos_y: Vec::new(),
            pos_z: Vec::new(),
            mom_x: Vec::new(),
            mom_y: Vec::new(),
            mom_z: Vec::new(),
            dmom_x: Vec::new(),
            dmom_y: Vec::new(),
            dmom_z: Vec::new(),
            rung_indices: Vec::new(),
            rung_jumps: Vec::new(),
            rungs_n: vec![0; config.n_rungs],
            lowest_populated_rung: 0,
            highest_populated_rung: 0,
            lowest_active_rung: 0,
            mass,
            softening_length,
            scale_factor: 1.0,
            w_eff: 0.0,
            use_rungs: true,
            n_rungs: config.n_rungs,
            tilings: HashMap::new(),
        }
    }

    /// Number of particles local to this process.
    pub fn n_local(&self) -> usize {
        self.pos_x.len()
    }

    /// Appends one particle on rung 0.
    pub fn push_particle(&mut self, pos: [f64; 3], mom: [f64; 3]) {
        self.pos_x.push(pos[0]);
        self.pos_y.push(pos[1]);
        self.pos_z.push(pos[2]);
        self.mom_x.push(mom[0]);
        self.mom_y.push(mom[1]);
        self.mom_z.push(mom[2]);
        self.dmom_x.push(0.0);
        self.dmom_y.push(0.0);
        self.dmom_z.push(0.0);
        self.rung_indices.push(0);
        self.rung_jumps.push(0);
        self.rungs_n[0] += 1;
        self.set_lowest_highest_populated_rung();
    }

    /// Grows every particle array to hold `n_local` particles.
    /// New particles start on rung 0.
    pub fn resize_particles(&mut self, n_local: usize) {
        let old = self.pos_x.len();
        if n_local >= old {
            self.rungs_n[0] += n_local - old;
        }
        self.pos_x.resize(n_local, 0.0);
        self.pos_y.resize(n_local, 0.0);
        self.pos_z.resize(n_local, 0.0);
        self.mom_x.resize(n_local, 0.0);
        self.mom_y.resize(n_local, 0.0);
        self.mom_z.resize(n_local, 0.0);
        self.dmom_x.resize(n_local, 0.0);
        self.dmom_y.resize(n_local, 0.0);
        self.dmom_z.resize(n_local, 0.0);
        self.rung_indices.resize(n_local, 0);
        self.rung_jumps.resize(n_local, 0);
        self.set_lowest_highest_populated_rung();
    }

    /// A read-only view of the data tilings sort on.
    pub fn view(&self) -> ParticleView {
        ParticleView {
            pos_x: &self.pos_x,
            pos_y: &self.pos_y,
            pos_z: &self.pos_z,
            rung_indices: &self.rung_indices,
            use_rungs: self.use_rungs,
            lowest_active_rung: self.lowest_active_rung,
            n_local: self.pos_x.len(),
        }
    }

    /// Verifies that all particle arrays have equal length.
    pub fn ensure_consistent(&self) -> Result<(), TilingError> {
        let expected = self.pos_x.len();
        let lengths = [
            ("pos_y", self.pos_y.len()),
            ("pos_z", self.pos_z.len()),
            ("mom_x", self.mom_x.len()),
            ("mom_y", self.mom_y.len()),
            ("mom_z", self.mom_z.len()),
            ("dmom_x", self.dmom_x.len()),
            ("dmom_y", self.dmom_y.len()),
            ("dmom_z", self.dmom_z.len()),
            ("rung_indices", self.rung_indices.len()),
            ("rung_jumps", self.rung_jumps.len()),
        ];
        for (name, found) in lengths {
            if found != expected {
                return Err(TilingError::MismatchedArrays {
                    name: name.to_string(),
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Initializes a named tiling on this component, if not already
    /// present.
    ///
    /// Known names are "trivial", "X (tiles)", "X (subtiles)" and
    /// "X (subtiles 2)", where X is an interaction registered in
    /// `config`. Subtilings require their coarse tiling to exist.
    /// Shapes are taken from the shared `shapes` table when present,
    /// so all components of a process agree; otherwise they are
    /// computed and recorded there.
    pub fn init_tiling(
        &mut self,
        tiling_name: &str,
        domain: &Domain,
        shapes: &mut TilingShapes,
        config: &SimConfig,
    ) -> Result<(), TilingError> {
        if self.tilings.contains_key(tiling_name) {
            return Ok(());
        }
        let n_rungs = self.n_rungs;
        let (shape, extent, location, initial_sizes, refinement_period);
        if tiling_name == "trivial" {
            // A single tile spanning the box; no spatial subdivision,
            // just rung bucketing.
            shape = [1, 1, 1];
            shapes.set(tiling_name, shape);
            extent = [domain.boxsize; 3];
            location = Some([0.0; 3]);
            initial_sizes = (0..n_rungs).map(|r| self.rungs_n[r] / 2).collect::<Vec<_>>();
            refinement_period = 0;
        } else if let Some(interaction) = tiling_name.strip_suffix(" (tiles)") {
            let params = config.interaction(interaction)?;
            shape = match shapes.get(tiling_name) {
                Some(shape) => shape,
                None => {
                    // A tile must be at least as large as the
                    // short-range cutoff in every direction, while
                    // maximizing the number of tiles.
                    let mut shape = [1; 3];
                    for dim in 0..3 {
                        shape[dim] = ((domain.extent[dim] / params.cutoff) as usize).max(1);
                    }
                    info!(
                        "Tile decomposition for {}: {}×{}×{}",
                        interaction, shape[0], shape[1], shape[2],
                    );
                    shapes.set(tiling_name, shape);
                    shape
                }
            };
            extent = domain.extent;
            location = Some(domain.location);
            let n_tiles = shape[0] * shape[1] * shape[2];
            initial_sizes = (0..n_rungs)
                .map(|r| self.rungs_n[r] / (2 * n_tiles))
                .collect();
            refinement_period = 0;
        } else if let Some(interaction) = subtiling_interaction(tiling_name) {
            let params = config.interaction(interaction)?;
            let coarse_name = format!("{} (tiles)", interaction);
            let coarse = self
                .tilings
                .get(&coarse_name)
                .ok_or_else(|| TilingError::MissingCoarseTiling(tiling_name.to_string()))?;
            let coarse_size = coarse.size;
            let coarse_tile_extent = coarse.tile_extent;
            refinement_period = match params.subtiling {
                SubtilingSpec::Automatic { refinement_period } => refinement_period,
                SubtilingSpec::Shape(_) => 0,
            };
            // The two subtiling variants of an interaction share the
            // shape recorded under the primary name.
            let shape_key = format!("{} (subtiles)", interaction);
            shape = match shapes.get(&shape_key) {
                Some(shape) => shape,
                None => {
                    let shape = match params.subtiling {
                        SubtilingSpec::Shape(shape) => shape,
                        SubtilingSpec::Automatic { .. } => automatic_subtiling_shape(
                            coarse_tile_extent,
                            coarse_size,
                            self.n_local(),
                        ),
                    };
                    info!(
                        "Subtile decomposition for {}: {}×{}×{}",
                        interaction, shape[0], shape[1], shape[2],
                    );
                    shapes.set(&shape_key, shape);
                    shape
                }
            };
            // The whole subtiling lives within one coarse tile. It is
            // relocated over successive coarse tiles during use, so the
            // initial location does not matter.
            extent = coarse_tile_extent;
            location = None;
            let n_subtiles = shape[0] * shape[1] * shape[2] * coarse_size;
            initial_sizes = (0..n_rungs)
                .map(|r| self.rungs_n[r] / (2 * n_subtiles))
                .collect();
        } else {
            return Err(TilingError::UnknownTiling(tiling_name.to_string()));
        }
        let mut tiling = Tiling::new(
            tiling_name,
            &shape,
            extent,
            &initial_sizes,
            refinement_period,
            config,
        )?;
        if let Some(location) = location {
            tiling.relocate(location);
        }
        self.tilings.insert(tiling_name.to_string(), tiling);
        Ok(())
    }
}

/// Extracts the interaction name from a subtiling name, accepting both
/// the primary and the double-buffered variant.
fn subtiling_interaction(tiling_name: &str) -> Option<&str> {
    tiling_name
        .strip_suffix(" (subtiles)")
        .or_else(|| tiling_name.strip_suffix(" (subtiles 2)"))
}

/// Heuristic initial subtiling shape: the most cubic lattice with
/// roughly `PARTICLES_PER_SUBTILE_MIN`–`MAX` particles per subtile,
/// with at least 2 subtiles per axis unless that would outnumber
/// the particles.
fn automatic_subtiling_shape(
    tile_extent: [f64; 3],
    n_coarse_tiles: usize,
    n_local: usize,
) -> [usize; 3] {
    let target = (PARTICLES_PER_SUBTILE_MIN * PARTICLES_PER_SUBTILE_MAX).sqrt();
    let per_tile = n_local as f64 / n_coarse_tiles.max(1) as f64;
    let n_subtiles = (per_tile / target).max(1.0);
    let tile_volume = tile_extent[0] * tile_extent[1] * tile_extent[2];
    // Cube-like subtiles: subdivisions proportional to the tile extent.
    let factor = (n_subtiles / tile_volume).cbrt();
    let mut shape = [1; 3];
    for dim in 0..3 {
        shape[dim] = ((tile_extent[dim] * factor).round() as usize).max(1);
    }
    let mut shape_atleast2 = shape;
    for n in &mut shape_atleast2 {
        if *n == 1 {
            *n = 2;
        }
    }
    let n_subtiles_atleast2 =
        n_coarse_tiles * shape_atleast2[0] * shape_atleast2[1] * shape_atleast2[2];
    if n_subtiles_atleast2 < n_local {
        shape = shape_atleast2;
    }
    shape
}
