use std::fmt;
use std::error::Error;

/// Represents errors that can occur while building or using tilings.
///
/// All of these are configuration errors: they reflect a logically
/// inconsistent simulation setup for which no degraded mode exists,
/// so callers are expected to propagate them and abort the run.
#[derive(Debug, Clone, PartialEq)]
pub enum TilingError {
    /// Indicates a tiling shape that is not 3D or has an axis below 1.
    InvalidShape(Vec<usize>),
    /// Indicates a per-rung bucket size list of the wrong length.
    InvalidRungSizes { given: usize, expected: usize },
    /// Indicates a tiling name with no known initialization recipe.
    UnknownTiling(String),
    /// Indicates a subtiling initialized before its coarse tiling.
    MissingCoarseTiling(String),
    /// Indicates particle arrays of unequal length on a component.
    MismatchedArrays { name: String, expected: usize, found: usize },
    /// A general error for operations that produce invalid results.
    CalculationError(String),
}

impl fmt::Display for TilingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TilingError::InvalidShape(shape) => write!(
                f,
                "Tilings need a 3D shape with all axes at least 1, but shape {:?} was given",
                shape,
            ),
            TilingError::InvalidRungSizes { given, expected } => write!(
                f,
                "Got {} initial rung sizes, but need one for each of the {} rungs",
                given, expected,
            ),
            TilingError::UnknownTiling(name) => {
                write!(f, "Tiling with name \"{}\" not implemented", name)
            }
            TilingError::MissingCoarseTiling(name) => write!(
                f,
                "Cannot initialize the \"{}\" subtiling without its coarse tiling",
                name,
            ),
            TilingError::MismatchedArrays { name, expected, found } => write!(
                f,
                "Particle array \"{}\" has length {} but {} was expected",
                name, found, expected,
            ),
            TilingError::CalculationError(msg) => write!(f, "Calculation error: {}", msg),
        }
    }
}

impl Error for TilingError {}
