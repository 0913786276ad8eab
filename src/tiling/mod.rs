mod tiling;

pub use tiling::*;

#[cfg(test)]
mod tiling_tests;
