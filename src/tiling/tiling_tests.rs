use rand::prelude::*;

use crate::assert_float_eq;
use crate::constants_config::SimConfig;
use crate::errors::TilingError;
use crate::tiling::{ParticleView, TileContents, Tiling};

fn config(n_rungs: usize) -> SimConfig {
    SimConfig {
        n_rungs,
        ..Default::default()
    }
}

fn view<'a>(
    pos_x: &'a [f64],
    pos_y: &'a [f64],
    pos_z: &'a [f64],
    rung_indices: &'a [i8],
    lowest_active_rung: u8,
) -> ParticleView<'a> {
    ParticleView {
        pos_x,
        pos_y,
        pos_z,
        rung_indices,
        use_rungs: true,
        lowest_active_rung,
        n_local: pos_x.len(),
    }
}

#[test]
fn test_new_cubic_from_scalar() {
    // A single shape entry yields a cubic tiling.
    let tiling = Tiling::new("test", &[2], [10.0; 3], &[0], 0, &config(4))
        .expect("Failed to create tiling");
    assert_eq!(tiling.shape, [2, 2, 2]);
    assert_eq!(tiling.size, 8);
    assert_eq!(tiling.tile_extent, [5.0; 3]);
}

#[test]
fn test_new_invalid_shape() {
    // A zero axis is a configuration error.
    let result = Tiling::new("test", &[2, 0, 2], [10.0; 3], &[0], 0, &config(4));
    assert!(matches!(result, Err(TilingError::InvalidShape(_))));
    // So is a non-3D shape.
    let result = Tiling::new("test", &[2, 2], [10.0; 3], &[0], 0, &config(4));
    assert!(matches!(result, Err(TilingError::InvalidShape(_))));
}

#[test]
fn test_new_invalid_rung_sizes() {
    // Initial bucket sizes must be scalar or one per rung.
    let result = Tiling::new("test", &[2], [10.0; 3], &[1, 2], 0, &config(4));
    assert!(matches!(
        result,
        Err(TilingError::InvalidRungSizes { given: 2, expected: 4 })
    ));
}

#[test]
fn test_tile_index_to_3d() {
    let tiling = Tiling::new("test", &[2, 3, 4], [12.0; 3], &[0], 0, &config(4))
        .expect("Failed to create tiling");
    // Row-major layout: the k axis varies fastest.
    assert_eq!(tiling.tile_index_to_3d(0), [0, 0, 0]);
    assert_eq!(tiling.tile_index_to_3d(1), [0, 0, 1]);
    assert_eq!(tiling.tile_index_to_3d(4), [0, 1, 0]);
    assert_eq!(tiling.tile_index_to_3d(12), [1, 0, 0]);
    assert_eq!(tiling.tile_index_to_3d(23), [1, 2, 3]);
}

#[test]
fn test_sort_places_particle_in_expected_tile() {
    // Shape (2,2,2) over extent 10 anchored at the origin: a particle
    // at (6,1,1) belongs to the tile with 3D index (1,0,0).
    let mut tiling = Tiling::new("test", &[2], [10.0; 3], &[0], 0, &config(4))
        .expect("Failed to create tiling");
    let (pos_x, pos_y, pos_z) = (vec![6.0], vec![1.0], vec![1.0]);
    let rung_indices = vec![0i8];
    tiling.sort(&view(&pos_x, &pos_y, &pos_z, &rung_indices, 0), None);
    let tile_index = 4; // linear index of (1,0,0)
    assert_eq!(tiling.tile_index_to_3d(tile_index), [1, 0, 0]);
    assert_eq!(tiling.bucket(tile_index, 0), &[0]);
    // Every other tile stays empty.
    for other in 0..tiling.size {
        if other != tile_index {
            assert_eq!(tiling.contents(other), TileContents::Empty);
        }
    }
}

#[test]
fn test_sort_partitions_all_particles() {
    // After a sort, every particle index appears in exactly one bucket.
    let mut rng = StdRng::seed_from_u64(7);
    let n = 200;
    let pos_x: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..10.0)).collect();
    let pos_y: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..10.0)).collect();
    let pos_z: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..10.0)).collect();
    let rung_indices: Vec<i8> = (0..n).map(|_| rng.gen_range(0..4)).collect();
    let mut tiling = Tiling::new("test", &[3], [10.0; 3], &[2], 0, &config(4))
        .expect("Failed to create tiling");
    tiling.sort(&view(&pos_x, &pos_y, &pos_z, &rung_indices, 0), None);
    assert_eq!(tiling.total_occupancy(), n);
    let mut seen: Vec<usize> = Vec::new();
    for tile_index in 0..tiling.size {
        for rung_index in 0..4 {
            seen.extend_from_slice(tiling.bucket(tile_index, rung_index));
        }
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..n).collect::<Vec<_>>());
}

#[test]
fn test_sort_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(11);
    let n = 50;
    let pos_x: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..10.0)).collect();
    let pos_y: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..10.0)).collect();
    let pos_z: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..10.0)).collect();
    let rung_indices = vec![0i8; n];
    let mut tiling = Tiling::new("test", &[2], [10.0; 3], &[0], 0, &config(4))
        .expect("Failed to create tiling");
    let particles = view(&pos_x, &pos_y, &pos_z, &rung_indices, 0);
    tiling.sort(&particles, None);
    let first: Vec<Vec<usize>> = (0..tiling.size)
        .map(|tile_index| tiling.bucket(tile_index, 0).to_vec())
        .collect();
    tiling.sort(&particles, None);
    let second: Vec<Vec<usize>> = (0..tiling.size)
        .map(|tile_index| tiling.bucket(tile_index, 0).to_vec())
        .collect();
    assert_eq!(first, second);
}

#[test]
fn test_trivial_sort_with_coarse_is_noop() {
    // The trivial tiling is already sorted with respect to any coarse
    // tile; sorting it against one must not clear its buckets.
    let cfg = config(4);
    let mut trivial = Tiling::new("trivial", &[1], [10.0; 3], &[0], 0, &cfg)
        .expect("Failed to create tiling");
    let mut coarse = Tiling::new("test", &[2], [10.0; 3], &[0], 0, &cfg)
        .expect("Failed to create tiling");
    let (pos_x, pos_y, pos_z) = (vec![1.0, 6.0], vec![1.0, 6.0], vec![1.0, 6.0]);
    let rung_indices = vec![0i8, 0];
    let particles = view(&pos_x, &pos_y, &pos_z, &rung_indices, 0);
    trivial.sort(&particles, None);
    coarse.sort(&particles, None);
    assert_eq!(trivial.bucket(0, 0), &[0, 1]);
    trivial.sort(&particles, Some((&coarse, 0)));
    assert_eq!(trivial.bucket(0, 0), &[0, 1]);
}

#[test]
fn test_coarse_to_fine_sort() {
    // Sorting against one coarse tile only rebuckets that tile's
    // particles.
    let cfg = config(4);
    let mut coarse = Tiling::new("coarse", &[2, 1, 1], [10.0; 3], &[0], 0, &cfg)
        .expect("Failed to create tiling");
    let mut fine = Tiling::new("fine", &[5, 1, 1], coarse.tile_extent, &[0], 0, &cfg)
        .expect("Failed to create tiling");
    let (pos_x, pos_y, pos_z) = (
        vec![1.0, 6.0, 9.5],
        vec![5.0, 5.0, 5.0],
        vec![5.0, 5.0, 5.0],
    );
    let rung_indices = vec![0i8; 3];
    let particles = view(&pos_x, &pos_y, &pos_z, &rung_indices, 0);
    coarse.sort(&particles, None);
    // Relocate the fine tiling over the second coarse tile.
    fine.relocate([5.0, 0.0, 0.0]);
    fine.sort(&particles, Some((&coarse, 1)));
    assert_eq!(fine.total_occupancy(), 2);
    assert_eq!(fine.bucket(1, 0), &[1]); // x = 6.0 -> subtile 1
    assert_eq!(fine.bucket(4, 0), &[2]); // x = 9.5 -> subtile 4
}

#[test]
fn test_bucket_growth() {
    // Starting from capacity 1 with growth 1.1, capacities follow
    // floor(1.1 * cap) + 1: 1, 2, 3, 4, 5, ...
    let mut tiling = Tiling::new("test", &[1, 1, 1], [10.0; 3], &[1], 0, &config(4))
        .expect("Failed to create tiling");
    assert_eq!(tiling.bucket_capacity(0, 0), 1);
    tiling.resize(0, 0, None);
    assert_eq!(tiling.bucket_capacity(0, 0), 2);
    tiling.resize(0, 0, None);
    assert_eq!(tiling.bucket_capacity(0, 0), 3);
    // Explicit sizes are honored exactly.
    tiling.resize(0, 0, Some(100));
    assert_eq!(tiling.bucket_capacity(0, 0), 100);
    tiling.resize(0, 0, None);
    assert_eq!(tiling.bucket_capacity(0, 0), 111);
}

#[test]
fn test_sort_grows_full_buckets() {
    // Sorting many particles into a single bucket of capacity 0 must
    // silently grow it.
    let n = 17;
    let pos_x = vec![1.0; n];
    let pos_y = vec![1.0; n];
    let pos_z = vec![1.0; n];
    let rung_indices = vec![0i8; n];
    let mut tiling = Tiling::new("test", &[1], [10.0; 3], &[0], 0, &config(4))
        .expect("Failed to create tiling");
    tiling.sort(&view(&pos_x, &pos_y, &pos_z, &rung_indices, 0), None);
    assert_eq!(tiling.bucket(0, 0).len(), n);
}

#[test]
fn test_contents_tags() {
    let cfg = config(4);
    let mut tiling = Tiling::new("test", &[2, 1, 1], [10.0; 3], &[0], 0, &cfg)
        .expect("Failed to create tiling");
    // One particle on rung 1 in the first tile, one on rung 3 in the
    // second. With the lowest active rung at 2, the first tile holds
    // only inactive particles.
    let (pos_x, pos_y, pos_z) = (vec![1.0, 6.0], vec![1.0, 1.0], vec![1.0, 1.0]);
    let rung_indices = vec![1i8, 3];
    tiling.sort(&view(&pos_x, &pos_y, &pos_z, &rung_indices, 2), None);
    assert_eq!(tiling.contents(0), TileContents::Inactive);
    assert_eq!(tiling.contents(1), TileContents::Active);
}

#[test]
fn test_refinement_period_rescaling() {
    // Two distinct tile-extent values halve the period.
    let cfg = config(4);
    let tiling = Tiling::new("test", &[2, 2, 2], [8.0, 8.0, 4.0], &[0], 10, &cfg)
        .expect("Failed to create tiling");
    assert_eq!(tiling.refinement_period, 5);
    // Cubic tiles keep the period unchanged.
    let tiling = Tiling::new("test", &[2], [8.0; 3], &[0], 10, &cfg)
        .expect("Failed to create tiling");
    assert_eq!(tiling.refinement_period, 10);
    // The rescaled period never drops below the configured minimum.
    let tiling = Tiling::new("test", &[2, 2, 2], [8.0, 4.0, 2.0], &[0], 3, &cfg)
        .expect("Failed to create tiling");
    assert_eq!(tiling.refinement_period, cfg.refinement_period_min);
    // A zero period disables refinement outright.
    let tiling = Tiling::new("test", &[2], [8.0; 3], &[0], 0, &cfg)
        .expect("Failed to create tiling");
    assert_eq!(tiling.refinement_period, 0);
    assert!(!tiling.refinement_due(0));
}

#[test]
fn test_refinement_due() {
    let mut tiling = Tiling::new("test", &[2], [8.0; 3], &[0], 5, &config(4))
        .expect("Failed to create tiling");
    assert!(tiling.refinement_due(0));
    assert!(!tiling.refinement_due(1));
    assert!(tiling.refinement_due(5));
    tiling.refinement_offset += 2;
    assert!(tiling.refinement_due(3));
}

#[test]
fn test_computation_time_accumulators() {
    let mut tiling = Tiling::new("test", &[1], [8.0; 3], &[0], 0, &config(4))
        .expect("Failed to create tiling");
    tiling.add_computation_time(1.5);
    tiling.add_computation_time(0.5);
    assert_float_eq(tiling.take_computation_time(), 2.0, 1e-12, None);
    assert_eq!(tiling.take_computation_time(), 0.0);
    assert_float_eq(tiling.computation_time_total, 2.0, 1e-12, None);
}
