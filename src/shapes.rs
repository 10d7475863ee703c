#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
/// error taxonomy of the shape analysis: structurally invalid declarations,
/// failed order inference, and propagator-side failures
pub mod errors;
///____________________________________________________________________________________________________________________________
/// # Shape
/// canonical representation of one declared dynamical quantity as a linear
/// constant-coefficient-plus-residual ODE of bounded order
///
/// A shape is assumed to satisfy
///
///   x^(n) = N + sum_{i=0}^{n-1} c_i * x^(i)
///
/// where the c_i are the `derivative_factors` (the purely linear part) and N
/// is the `nonlinear_residual` (constants, products of state variables,
/// nonlinear functions, coupling to other shapes' variables). A shape is
/// constructed either from an explicit function of time (the minimal ODE it
/// satisfies is inferred, up to a bounded order) or from an explicit ODE
/// definition with one initial value per derivative order.
///# Example#
/// ```
/// use RustedShapes::shapes::shape::Shape;
/// let shape = Shape::from_function("I", "t*exp(-t/tau_syn)", "t", 100, 4).unwrap();
/// assert_eq!(shape.order, 2);
/// ```
pub mod shape;
///____________________________________________________________________________________________________________________________
/// # SystemOfShapes
/// the global companion-form system x' = A*x + C assembled from all shapes:
/// state vector, linear coefficient matrix, residual vector, dependency graph
/// extraction, linear-constant-coefficient classification and its fixpoint
/// propagation, non-destructive subsystem projection and the symbolic
/// jacobian exported to the numeric integration side
pub mod system_of_shapes;
///____________________________________________________________________________________________________________________________
/// # Propagator synthesis
/// exact update rules for the analytically solvable subsystem: the symbolic
/// matrix exponential P = exp(A*h) computed blockwise, one minted placeholder
/// symbol per structurally nonzero entry, and per-variable update expressions
pub mod propagator;
///____________________________________________________________________________________________________________________________
/// # Analysis entry point
/// the declaration surface (prime-marked expressions and initial values), the
/// explicit configuration value, the two-pass known-symbol collection, and
/// the orchestration from declarations to analytic and numeric solver outputs
pub mod analysis;

#[cfg(test)]
mod shapes_tests;
