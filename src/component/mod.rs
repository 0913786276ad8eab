mod component;
mod rungs;
mod tile_sort;

pub use component::*;
