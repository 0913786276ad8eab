mod refinement;

pub use refinement::*;
