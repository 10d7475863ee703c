#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
/// a module turns a String expression into a symbolic expression
///
///# Example
/// ```
/// use RustedShapes::symbolic::symbolic_engine::Expr;
/// let input = "t*exp(-t/tau)";
/// let parsed_expression = Expr::parse_expression(input);
/// println!(" parsed_expression {}", parsed_expression);
/// let dxdt = parsed_expression.diff("t");
/// println!("{}, time derivative: {}  \n", input, dxdt);
/// ```
pub mod parse_expr;
///____________________________________________________________________________________________________________________________
/// # Symbolic engine
/// a module
/// 1) turns a String expression into a symbolic expression
/// 2) differentiates and substitutes symbolic expressions
/// 3) turns a symbolic expression into a string expression for printing and control of results
///# Example#
/// ```
/// use RustedShapes::symbolic::symbolic_engine::Expr;
/// let input = "V/tau + I_syn";
/// let parsed_expression = Expr::parse_expression(input);
/// // all arguments of the expression
/// let all = parsed_expression.all_arguments_are_variables();
/// println!("all arguments are variables {:?}", all);
/// // differentiate with respect to V and I_syn
/// let df_dV = parsed_expression.diff("V");
/// let df_dI = parsed_expression.diff("I_syn");
/// println!("df_dV = {}, df_dI = {}", df_dV, df_dI);
/// // substitute a variable by a value and evaluate
/// let at_point = parsed_expression.set_variable("V", 1.0);
/// println!("at_point = {}", at_point);
/// ```
pub mod symbolic_engine;
pub mod symbolic_engine_derivatives;
///________________________________________________________________________________________________________________________________________________
/// exact simplification of symbolic expressions: a cheap local rewrite pass and
/// a canonical rational normal form (expand-and-collect with exact rational
/// coefficients) which backs the exact zero test. The zero test is what order
/// inference and the linear/nonlinear separation stand on, so it must be exact
/// and not ride on floating point cancellation.
///# Example#
/// ```
/// use RustedShapes::symbolic::symbolic_engine::Expr;
/// let e = Expr::parse_expression("t/tau - t/tau + exp(-t/tau)*exp(t/tau) - 1");
/// assert!(e.is_identically_zero());
/// ```
pub mod symbolic_simplify;
///________________________________________________________________________________________________________________________________________________
/// symbolic vectors and matrices: transpose, products, general cofactor
/// determinant, adjugate inverse, Kronecker product, elementwise map /
/// substitute / diff / simplify and numeric evaluation into nalgebra types
pub mod symbolic_vectors;
