use log::debug;

use crate::constants_config::SimConfig;
use crate::errors::TilingError;

/// Content classification of a single tile, updated during `sort`.
///
/// "Active" means the tile holds at least one particle on a rung at or
/// above the component's lowest active rung. The ordering matters:
/// a tile's tag only ever increases while sorting into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TileContents {
    /// No particles at all.
    Empty,
    /// Only particles on inactive rungs.
    Inactive,
    /// At least one particle on an active rung.
    Active,
}

/// One rung bucket within a tile: particle indices into the owning
/// component's arrays. Capacity and occupancy are tracked separately
/// so that the geometric growth rule stays exact.
#[derive(Debug, Clone)]
struct RungBucket {
    indices: Vec<usize>,
    n: usize,
}

impl RungBucket {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            indices: vec![0; capacity],
            n: 0,
        }
    }
}

/// One spatial tile: a fixed array of per-rung buckets.
#[derive(Debug, Clone)]
struct Tile {
    rungs: Vec<RungBucket>,
}

/// Read-only view of the particle data a tiling sorts.
///
/// Components hand this out to avoid borrowing conflicts between the
/// tiling registry and the particle arrays.
#[derive(Clone, Copy)]
pub struct ParticleView<'a> {
    pub pos_x: &'a [f64],
    pub pos_y: &'a [f64],
    pub pos_z: &'a [f64],
    pub rung_indices: &'a [i8],
    pub use_rungs: bool,
    pub lowest_active_rung: u8,
    pub n_local: usize,
}

/// A spatial partition of a rectangular volume into
/// `shape[0]×shape[1]×shape[2]` tiles, with particles bucketed by
/// rung within each tile.
///
/// Buckets store particle indices referencing the component's arrays,
/// never particle data itself. The tiling named "trivial" is a
/// degenerate 1×1×1 tiling used purely for rung bucketing.
#[derive(Debug, Clone)]
pub struct Tiling {
    pub name: String,
    pub is_trivial: bool,
    pub shape: [usize; 3],
    /// Total number of tiles, `shape[0]*shape[1]*shape[2]`.
    pub size: usize,
    /// Precomputed mapping from linear to 3D tile indices.
    layout_1d_to_3d: Vec<[usize; 3]>,
    tiles: Vec<Tile>,
    contain_particles: Vec<TileContents>,
    /// Left, backward, lower corner of the tiling.
    pub location: [f64; 3],
    /// Physical size of the full tiling along each axis.
    pub extent: [f64; 3],
    /// Physical size of a single tile along each axis.
    pub tile_extent: [f64; 3],
    n_rungs: usize,
    rung_growth: f64,
    /// Base time steps between automatic refinement attempts
    /// (0 disables refinement).
    pub refinement_period: usize,
    pub refinement_offset: usize,
    /// Interaction time since the last measurement, incremented by the
    /// force evaluator.
    pub computation_time: f64,
    /// Interaction time since the start of the time step.
    pub computation_time_total: f64,
}

impl Tiling {
    /// Creates a tiling of the given shape and physical extent.
    ///
    /// `shape` must hold one entry (cubic tiling) or three;
    /// `initial_bucket_sizes` must hold one entry (same capacity for
    /// every rung) or one per rung. A nonzero `refinement_period` is
    /// divided by the number of distinct tile-extent values, so that
    /// non-cubic subtiles, which refine one or two axes at a time,
    /// refine proportionally faster per axis.
    ///
    /// The tiling is anchored at the origin; use [`Tiling::relocate`]
    /// to position it.
    pub fn new(
        name: &str,
        shape: &[usize],
        extent: [f64; 3],
        initial_bucket_sizes: &[usize],
        refinement_period: usize,
        config: &SimConfig,
    ) -> Result<Self, TilingError> {
        let shape: [usize; 3] = match shape {
            [n] => [*n; 3],
            [i, j, k] => [*i, *j, *k],
            other => return Err(TilingError::InvalidShape(other.to_vec())),
        };
        if shape.iter().any(|&n| n < 1) {
            return Err(TilingError::InvalidShape(shape.to_vec()));
        }
        let size = shape[0] * shape[1] * shape[2];
        let mut layout_1d_to_3d = Vec::with_capacity(size);
        for i in 0..shape[0] {
            for j in 0..shape[1] {
                for k in 0..shape[2] {
                    layout_1d_to_3d.push([i, j, k]);
                }
            }
        }
        let n_rungs = config.n_rungs;
        let bucket_sizes: Vec<usize> = match initial_bucket_sizes {
            [n] => vec![*n; n_rungs],
            sizes if sizes.len() == n_rungs => sizes.to_vec(),
            sizes => {
                return Err(TilingError::InvalidRungSizes {
                    given: sizes.len(),
                    expected: n_rungs,
                })
            }
        };
        let tiles = (0..size)
            .map(|_| Tile {
                rungs: bucket_sizes
                    .iter()
                    .map(|&capacity| RungBucket::with_capacity(capacity))
                    .collect(),
            })
            .collect();
        let mut tile_extent = [0.0; 3];
        for dim in 0..3 {
            tile_extent[dim] = extent[dim] / shape[dim] as f64;
        }
        let mut refinement_period = refinement_period;
        if refinement_period > 0 {
            let mut distinct = 1;
            if tile_extent[1] != tile_extent[0] {
                distinct += 1;
            }
            if tile_extent[2] != tile_extent[0] && tile_extent[2] != tile_extent[1] {
                distinct += 1;
            }
            refinement_period =
                (refinement_period as f64 / distinct as f64).round() as usize;
            if refinement_period < config.refinement_period_min {
                refinement_period = config.refinement_period_min;
            }
        }
        debug!(
            "Created tiling \"{}\" with shape {}×{}×{}",
            name, shape[0], shape[1], shape[2],
        );
        Ok(Self {
            name: name.to_string(),
            is_trivial: name == "trivial",
            shape,
            size,
            layout_1d_to_3d,
            tiles,
            contain_particles: vec![TileContents::Empty; size],
            location: [0.0; 3],
            extent,
            tile_extent,
            n_rungs,
            rung_growth: config.rung_growth,
            refinement_period,
            refinement_offset: 0,
            computation_time: 0.0,
            computation_time_total: 0.0,
        })
    }

    /// Rebinds the tiling's physical anchor without touching buckets.
    /// Used to reposition a shared subtiling over successive
    /// coarse tiles.
    pub fn relocate(&mut self, location: [f64; 3]) {
        self.location = location;
    }

    /// Converts a linear tile index into its 3D equivalent.
    pub fn tile_index_to_3d(&self, tile_index: usize) -> [usize; 3] {
        self.layout_1d_to_3d[tile_index]
    }

    /// Converts a 3D tile index into its linear equivalent.
    fn tile_index(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.shape[1] + j) * self.shape[2] + k
    }

    /// Content classification of a tile, valid after the last `sort`.
    pub fn contents(&self, tile_index: usize) -> TileContents {
        self.contain_particles[tile_index]
    }

    /// The occupied part of one rung bucket: particle indices into the
    /// component's arrays, in insertion order.
    pub fn bucket(&self, tile_index: usize, rung_index: usize) -> &[usize] {
        let bucket = &self.tiles[tile_index].rungs[rung_index];
        &bucket.indices[..bucket.n]
    }

    /// Allocated capacity of one rung bucket.
    pub fn bucket_capacity(&self, tile_index: usize, rung_index: usize) -> usize {
        self.tiles[tile_index].rungs[rung_index].indices.len()
    }

    /// Reallocates a single rung bucket. With `new_size` left out, the
    /// bucket grows geometrically; the added one guarantees progress
    /// even for an empty bucket.
    pub fn resize(&mut self, tile_index: usize, rung_index: usize, new_size: Option<usize>) {
        let rung_growth = self.rung_growth;
        let bucket = &mut self.tiles[tile_index].rungs[rung_index];
        let new_size = new_size
            .unwrap_or_else(|| (rung_growth * bucket.indices.len() as f64) as usize + 1);
        bucket.indices.resize(new_size, 0);
    }

    /// Sorts particles into tiles and rung buckets.
    ///
    /// Without a coarse tiling, every local particle is sorted. With
    /// one, only the particles already bucketed under the given coarse
    /// tile are considered; the trivial tiling is a no-op in that case,
    /// as its single tile is sorted by construction.
    ///
    /// Sorting is idempotent given unchanged positions and rungs.
    /// A particle outside the tiling volume is a fatal indexing error.
    pub fn sort(&mut self, particles: &ParticleView, coarse: Option<(&Tiling, usize)>) {
        if self.is_trivial && coarse.is_some() {
            return;
        }
        for tile in &mut self.tiles {
            for bucket in &mut tile.rungs {
                bucket.n = 0;
            }
        }
        for contents in &mut self.contain_particles {
            *contents = TileContents::Empty;
        }
        match coarse {
            None => {
                for particle_index in 0..particles.n_local {
                    self.place(particle_index, particles);
                }
            }
            Some((coarse_tiling, coarse_tile_index)) => {
                for coarse_rung_index in 0..self.n_rungs {
                    for &particle_index in
                        coarse_tiling.bucket(coarse_tile_index, coarse_rung_index)
                    {
                        self.place(particle_index, particles);
                    }
                }
            }
        }
    }

    /// Buckets one particle, growing the destination bucket if full
    /// and updating the tile's content tag.
    fn place(&mut self, particle_index: usize, particles: &ParticleView) {
        let tile_index = if self.is_trivial {
            0
        } else {
            let pos = [
                particles.pos_x[particle_index],
                particles.pos_y[particle_index],
                particles.pos_z[particle_index],
            ];
            let mut index_3d = [0usize; 3];
            for dim in 0..3 {
                let offset = (pos[dim] - self.location[dim]) / self.tile_extent[dim];
                assert!(
                    offset >= 0.0 && (offset as usize) < self.shape[dim],
                    "particle {} at ({}, {}, {}) lies outside tiling \"{}\"",
                    particle_index,
                    pos[0],
                    pos[1],
                    pos[2],
                    self.name,
                );
                index_3d[dim] = offset as usize;
            }
            self.tile_index(index_3d[0], index_3d[1], index_3d[2])
        };
        let rung_index = if particles.use_rungs {
            particles.rung_indices[particle_index] as usize
        } else {
            0
        };
        if self.tiles[tile_index].rungs[rung_index].n
            == self.tiles[tile_index].rungs[rung_index].indices.len()
        {
            self.resize(tile_index, rung_index, None);
        }
        let bucket = &mut self.tiles[tile_index].rungs[rung_index];
        bucket.indices[bucket.n] = particle_index;
        bucket.n += 1;
        let contains = if (rung_index as u8) < particles.lowest_active_rung {
            TileContents::Inactive
        } else {
            TileContents::Active
        };
        if self.contain_particles[tile_index] < contains {
            self.contain_particles[tile_index] = contains;
        }
    }

    /// Total number of particles across all buckets of all tiles.
    pub fn total_occupancy(&self) -> usize {
        self.tiles
            .iter()
            .map(|tile| tile.rungs.iter().map(|bucket| bucket.n).sum::<usize>())
            .sum()
    }

    /// Records interaction time measured by the force evaluator.
    pub fn add_computation_time(&mut self, elapsed: f64) {
        self.computation_time += elapsed;
        self.computation_time_total += elapsed;
    }

    /// Returns and clears the time accumulated since the last call,
    /// leaving the running per-step total untouched.
    pub fn take_computation_time(&mut self) -> f64 {
        std::mem::take(&mut self.computation_time)
    }

    /// Whether an automatic refinement attempt is due at the given
    /// base time step.
    pub fn refinement_due(&self, base_step: usize) -> bool {
        self.refinement_period > 0
            && (base_step + self.refinement_offset) % self.refinement_period == 0
    }
}
