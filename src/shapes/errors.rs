use std::error::Error;
use std::fmt;

/// Errors raised while constructing a single shape from its declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeError {
    /// structurally invalid declaration: unparseable expression, missing or
    /// duplicated initial values, initial value for an unknown symbol
    MalformedInput(String),
    /// the declared order does not match the highest derivative of the
    /// shape's own symbol found in the right-hand side
    OrderMismatch {
        symbol: String,
        declared: usize,
        found: usize,
    },
    /// no linear homogeneous ODE of order <= max_order fits the function
    UnsolvableOrder { symbol: String, max_order: usize },
    /// no sample time could be found at which the function is nonzero
    DegenerateSample { symbol: String, max_t: usize },
    /// a user symbol collides with the reserved function/constant namespace
    SymbolNameCollision { symbol: String },
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShapeError::MalformedInput(msg) => write!(f, "malformed input: {}", msg),
            ShapeError::OrderMismatch {
                symbol,
                declared,
                found,
            } => write!(
                f,
                "wrong number of initial values for \"{}\": expected {}, got {}",
                symbol, found, declared
            ),
            ShapeError::UnsolvableOrder { symbol, max_order } => write!(
                f,
                "shape \"{}\" does not satisfy any linear homogeneous ODE of order <= {}",
                symbol, max_order
            ),
            ShapeError::DegenerateSample { symbol, max_t } => write!(
                f,
                "cannot find a sample time in 1..{} at which shape \"{}\" is nonzero",
                max_t, symbol
            ),
            ShapeError::SymbolNameCollision { symbol } => write!(
                f,
                "symbol \"{}\" collides with a reserved function name",
                symbol
            ),
        }
    }
}

impl Error for ShapeError {}

/// Errors raised while operating on an assembled system.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemError {
    /// a propagator was requested for a subsystem whose residual vector is
    /// not identically zero; propagators are only exact for homogeneous
    /// linear systems
    NonHomogeneousSubsystem { symbol: String },
    /// the subsystem is linear and homogeneous but outside the closed forms
    /// this crate synthesizes (strongly coupled block larger than two state
    /// variables, or resonant cross-coupling); the caller falls back to the
    /// numeric path
    PropagatorSynthesis(String),
}

impl fmt::Display for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SystemError::NonHomogeneousSubsystem { symbol } => write!(
                f,
                "subsystem is not homogeneous: residual for \"{}\" is nonzero",
                symbol
            ),
            SystemError::PropagatorSynthesis(msg) => {
                write!(f, "propagator synthesis failed: {}", msg)
            }
        }
    }
}

impl Error for SystemError {}
