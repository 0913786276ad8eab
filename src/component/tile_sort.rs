//! In-memory particle reordering along the tile visiting order.

use crate::component::Component;
use crate::constants_config::{Domain, SimConfig, TilingShapes};
use crate::errors::TilingError;
use crate::tiling::TileContents;

impl Component {
    /// Sorts the named tiling, initializing it on first use.
    ///
    /// When a subtiling name is also given, the particle position and
    /// momentum arrays are physically permuted to match the
    /// tile → subtile → rung visiting order, improving cache locality
    /// for the subsequent force evaluations. The shared subtiling is
    /// relocated and re-sorted over each occupied coarse tile; the
    /// otherwise-idle `dmom_*` buffers serve as scratch space, and the
    /// coarse tiling is re-sorted afterwards since its buckets hold
    /// pre-permutation indices.
    ///
    /// The O(N) extra copies only pay off when this is called at a
    /// cadence much lower than the force evaluation itself.
    pub fn tile_sort(
        &mut self,
        tiling_name: &str,
        subtiling_name: Option<&str>,
        domain: &Domain,
        shapes: &mut TilingShapes,
        config: &SimConfig,
    ) -> Result<(), TilingError> {
        self.ensure_consistent()?;
        self.init_tiling(tiling_name, domain, shapes, config)?;
        if let Some(subtiling_name) = subtiling_name {
            self.init_tiling(subtiling_name, domain, shapes, config)?;
        }
        // Take the tiling out of the registry while working on it, so
        // the particle arrays stay borrowable.
        let mut tiling = self
            .tilings
            .remove(tiling_name)
            .ok_or_else(|| TilingError::UnknownTiling(tiling_name.to_string()))?;
        tiling.sort(&self.view(), None);
        if let Some(subtiling_name) = subtiling_name {
            let mut subtiling = self
                .tilings
                .remove(subtiling_name)
                .ok_or_else(|| TilingError::UnknownTiling(subtiling_name.to_string()))?;
            let n_local = self.n_local();
            let lowest = self.lowest_populated_rung as usize;
            let highest = self.highest_populated_rung as usize;
            // Two passes: momenta first, then positions. Positions must
            // go last, as the subtile sorting reads them.
            for quantity in 0..2 {
                let mut count = 0;
                for tile_index in 0..tiling.size {
                    if tiling.contents(tile_index) == TileContents::Empty {
                        continue;
                    }
                    let tile_index_3d = tiling.tile_index_to_3d(tile_index);
                    let mut tile_location = [0.0; 3];
                    for dim in 0..3 {
                        tile_location[dim] = tiling.location[dim]
                            + tile_index_3d[dim] as f64 * tiling.tile_extent[dim];
                    }
                    subtiling.relocate(tile_location);
                    subtiling.sort(&self.view(), Some((&tiling, tile_index)));
                    for subtile_index in 0..subtiling.size {
                        if subtiling.contents(subtile_index) == TileContents::Empty {
                            continue;
                        }
                        for rung_index in lowest..=highest {
                            for &particle_index in subtiling.bucket(subtile_index, rung_index) {
                                if quantity == 0 {
                                    self.dmom_x[count] = self.mom_x[particle_index];
                                    self.dmom_y[count] = self.mom_y[particle_index];
                                    self.dmom_z[count] = self.mom_z[particle_index];
                                } else {
                                    self.dmom_x[count] = self.pos_x[particle_index];
                                    self.dmom_y[count] = self.pos_y[particle_index];
                                    self.dmom_z[count] = self.pos_z[particle_index];
                                }
                                count += 1;
                            }
                        }
                    }
                }
                if quantity == 0 {
                    self.mom_x[..n_local].copy_from_slice(&self.dmom_x[..n_local]);
                    self.mom_y[..n_local].copy_from_slice(&self.dmom_y[..n_local]);
                    self.mom_z[..n_local].copy_from_slice(&self.dmom_z[..n_local]);
                } else {
                    self.pos_x[..n_local].copy_from_slice(&self.dmom_x[..n_local]);
                    self.pos_y[..n_local].copy_from_slice(&self.dmom_y[..n_local]);
                    self.pos_z[..n_local].copy_from_slice(&self.dmom_z[..n_local]);
                }
            }
            self.tilings
                .insert(subtiling_name.to_string(), subtiling);
            // Bucket indices now point at pre-permutation slots.
            tiling.sort(&self.view(), None);
        }
        self.tilings.insert(tiling_name.to_string(), tiling);
        Ok(())
    }
}
