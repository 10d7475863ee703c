//! Canonical representation of one declared dynamical quantity ("shape") and
//! the two construction paths: inference of the minimal linear homogeneous
//! ODE a function of time satisfies, and linear/nonlinear separation of an
//! explicitly given ODE right-hand side.
//!
//! In the input and output, derivatives are marked by one prime per order
//! (`x`, `x'`, `x''`); internally each derivative level is its own plain
//! symbol with a `__d` suffix per order (`x`, `x__d`, `x__d__d`), so the
//! symbolic engine never has to know about derivative markers.

use crate::shapes::errors::ShapeError;
use crate::symbolic::parse_expr::{is_reserved_name, parse_expression_func};
use crate::symbolic::symbolic_engine::Expr;
use crate::symbolic::symbolic_simplify::separate_linear;
use crate::symbolic::symbolic_vectors::{ExprMatrix, ExprVector};
use log::debug;
use std::collections::HashMap;

/// internal name of the `level`-th derivative of `symbol`: x, x__d, x__d__d, ...
pub fn derived_symbol(symbol: &str, level: usize) -> String {
    format!("{}{}", symbol, "__d".repeat(level))
}

/// prime-marked name of the `level`-th derivative of `symbol`: x, x', x'', ...
pub fn primed_symbol(symbol: &str, level: usize) -> String {
    format!("{}{}", symbol, "'".repeat(level))
}

/// prime-marked name -> internal name ("x''" -> "x__d__d")
pub fn primed_to_internal(name: &str) -> String {
    name.replace('\'', "__d")
}

/// internal name -> prime-marked name ("x__d__d" -> "x''")
pub fn internal_to_primed(name: &str) -> String {
    name.replace("__d", "'")
}

/// Canonical representation of a shape as
/// `x^(n) = nonlinear_residual + sum_i derivative_factors[i] * x^(i)`.
///
/// Constructed once, immutable thereafter.
#[derive(Clone, Debug)]
pub struct Shape {
    /// base (zeroth-derivative) symbol, without qualifiers
    pub symbol: String,
    /// order of the ODE the shape satisfies
    pub order: usize,
    /// one internal symbol per derivative level, highest derivative first
    /// (companion-form convention)
    pub state_variables: Vec<String>,
    /// value of each derivative level at t = 0, keyed by prime-marked name;
    /// exactly `order` entries
    pub initial_values: HashMap<String, Expr>,
    /// coefficients of the purely linear part, ascending (coefficient of the
    /// base symbol first); exactly `order` entries
    pub derivative_factors: Vec<Expr>,
    /// everything in the defining equation not captured by
    /// `derivative_factors`: constants, products of state variables,
    /// nonlinear functions, coupling to other shapes' variables
    pub nonlinear_residual: Expr,
    /// informational bound on admissible numeric values, not enforced here
    pub lower_bound: Option<Expr>,
    /// informational bound on admissible numeric values, not enforced here
    pub upper_bound: Option<Expr>,
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Shape \"{}\" of order {}", self.symbol, self.order)
    }
}

impl Shape {
    /// Consistency-checked construction; all other constructors funnel here.
    pub fn new(
        symbol: &str,
        order: usize,
        initial_values: HashMap<String, Expr>,
        derivative_factors: Vec<Expr>,
        nonlinear_residual: Expr,
    ) -> Result<Shape, ShapeError> {
        if is_reserved_name(symbol) {
            return Err(ShapeError::SymbolNameCollision {
                symbol: symbol.to_string(),
            });
        }
        if initial_values.len() != order {
            return Err(ShapeError::MalformedInput(format!(
                "shape \"{}\": {} initial values for order {} equation",
                symbol,
                initial_values.len(),
                order
            )));
        }
        if derivative_factors.len() != order {
            return Err(ShapeError::MalformedInput(format!(
                "shape \"{}\": {} derivative factors for order {} equation",
                symbol,
                derivative_factors.len(),
                order
            )));
        }
        let state_variables = (0..order)
            .rev()
            .map(|level| derived_symbol(symbol, level))
            .collect();
        Ok(Shape {
            symbol: symbol.to_string(),
            order,
            state_variables,
            initial_values,
            derivative_factors,
            nonlinear_residual,
            lower_bound: None,
            upper_bound: None,
        })
    }

    /// Attaches informational numeric bounds; consumed at construction time.
    pub fn with_bounds(mut self, lower: Option<Expr>, upper: Option<Expr>) -> Shape {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    /// internal symbols of all derivative levels, ascending: x, x__d, ...
    pub fn all_variable_symbols(&self) -> Vec<String> {
        (0..self.order)
            .map(|level| derived_symbol(&self.symbol, level))
            .collect()
    }

    /// prime-marked names of all derivative levels, ascending: x, x', ...
    pub fn all_variable_symbols_primed(&self) -> Vec<String> {
        (0..self.order)
            .map(|level| primed_symbol(&self.symbol, level))
            .collect()
    }

    /// initial value for a prime-marked name, e.g. `"I'"`
    pub fn get_initial_value(&self, sym: &str) -> Option<&Expr> {
        self.initial_values.get(sym)
    }

    /// the full right-hand side of the highest-derivative equation:
    /// `nonlinear_residual + sum_i derivative_factors[i] * x^(i)`
    pub fn reconstituted_rhs(&self) -> Expr {
        let mut rhs = self.nonlinear_residual.clone();
        for (level, factor) in self.derivative_factors.iter().enumerate() {
            if factor.is_zero() {
                continue;
            }
            rhs = rhs
                + factor.clone() * Expr::Var(derived_symbol(&self.symbol, level));
        }
        rhs
    }

    /// true iff the shape's definition is linear and constant-coefficient in
    /// every state variable known across `shapes`: the derivative factors
    /// must not depend on any state variable at all, and any state variable
    /// appearing in the residual must appear purely linearly (zero second
    /// derivative against the whole known-symbol set).
    pub fn is_lin_const_coeff(&self, shapes: &[Shape]) -> bool {
        let mut all_symbols: Vec<String> = Vec::new();
        for shape in shapes {
            all_symbols.extend(shape.all_variable_symbols());
        }
        for factor in &self.derivative_factors {
            for sym in &all_symbols {
                if !factor.diff(sym).is_identically_zero() {
                    return false;
                }
            }
        }
        for sym in &all_symbols {
            let expr = self.nonlinear_residual.diff(sym);
            if !expr.is_identically_zero() {
                for sym2 in &all_symbols {
                    if !expr.diff(sym2).is_identically_zero() {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Creates a Shape from a function of time by inferring the minimal
    /// linear homogeneous ODE it satisfies.
    ///
    /// Successive time derivatives of the definition are evaluated at
    /// integer sample times to build a linear system for the candidate
    /// derivative factors; a candidate order is accepted only when the
    /// resulting ODE is satisfied identically (exact symbolic zero test).
    /// Sample times where the base function vanishes or where the sample
    /// matrix is singular are skipped.
    ///
    /// # Arguments
    /// * `symbol` - the name of the shape (e.g. "I_in")
    /// * `definition` - the defining expression of time
    ///   (e.g. "(e/tau_syn_in) * t * exp(-t/tau_syn_in)")
    /// * `time_symbol` - the variable standing for the current time
    /// * `max_t` - bound of the integer sample time scan
    /// * `max_order` - bound of the ODE order search
    pub fn from_function(
        symbol: &str,
        definition: &str,
        time_symbol: &str,
        max_t: usize,
        max_order: usize,
    ) -> Result<Shape, ShapeError> {
        let definition = parse_expression_func(definition).map_err(|e| {
            ShapeError::MalformedInput(format!("shape \"{}\": {}", symbol, e))
        })?;
        debug!(
            "processing shape {}, defining expression = {}",
            symbol, definition
        );

        // all time derivatives of the definition up to the order under test
        let mut derivatives = vec![definition.clone(), definition.diff(time_symbol)];

        // a sample time at which the function itself does not vanish, to
        // avoid a division by zero in the first-order candidate
        let mut t_val = None;
        for t_ in 1..max_t {
            let probe = definition.set_variable(time_symbol, t_ as f64);
            if !probe.is_identically_zero() {
                t_val = Some(t_);
                break;
            }
        }
        let t_val = t_val.ok_or(ShapeError::DegenerateSample {
            symbol: symbol.to_string(),
            max_t,
        })? as f64;

        // first the candidate of order 1, i.e. x' = c0 * x
        let mut order = 1;
        let factor = Expr::Div(derivatives[1].clone().boxed(), derivatives[0].clone().boxed())
            .set_variable(time_symbol, t_val)
            .simplify();
        let diff_rhs_lhs =
            derivatives[1].clone() - factor.clone() * derivatives[0].clone();
        let mut derivative_factors = vec![factor];
        let mut found_ode = diff_rhs_lhs.is_identically_zero();

        while !found_ode && order < max_order {
            order += 1;
            debug!("shape {}: checking order {}", symbol, order);
            derivatives.push(derivatives.last().unwrap().diff(time_symbol));

            // X holds the derivatives 0..order evaluated at `order` distinct
            // sample times, Y the order-th derivative at the same times; scan
            // the offset until X is invertible
            let mut solved: Option<ExprVector> = None;
            for t_ in 1..max_t {
                let mut x_mat = ExprMatrix::zeros(order, order);
                let mut y_vec = ExprVector::zeros(order);
                for i in 0..order {
                    let sample = (i + t_) as f64;
                    y_vec[i] = derivatives[order]
                        .set_variable(time_symbol, sample)
                        .simplify();
                    for j in 0..order {
                        x_mat[(i, j)] = derivatives[j]
                            .set_variable(time_symbol, sample)
                            .simplify();
                    }
                }
                if let Some(inv) = x_mat.inverse() {
                    solved = Some(inv.mul_vector(&y_vec));
                    break;
                }
            }
            let Some(candidate) = solved else {
                // no invertible sample matrix at this order; try the next one
                continue;
            };
            let candidate: Vec<Expr> =
                candidate.iter().map(|f| f.simplify()).collect();

            let mut diff_rhs_lhs = derivatives[order].clone();
            for (k, factor) in candidate.iter().enumerate() {
                diff_rhs_lhs =
                    diff_rhs_lhs - factor.clone() * derivatives[k].clone();
            }
            if diff_rhs_lhs.is_identically_zero() {
                derivative_factors = candidate;
                found_ode = true;
            }
        }

        if !found_ode {
            return Err(ShapeError::UnsolvableOrder {
                symbol: symbol.to_string(),
                max_order,
            });
        }

        let initial_values: HashMap<String, Expr> = derivatives[..order]
            .iter()
            .enumerate()
            .map(|(level, d)| {
                (
                    primed_symbol(symbol, level),
                    d.set_variable(time_symbol, 0.0).simplify(),
                )
            })
            .collect();
        let derivative_factors: Vec<Expr> =
            derivative_factors.iter().map(|df| df.simplify()).collect();
        Shape::new(
            symbol,
            order,
            initial_values,
            derivative_factors,
            Expr::Const(0.0),
        )
    }

    /// Creates a Shape from an ODE right-hand side and one initial value per
    /// derivative order.
    ///
    /// The right-hand side is separated into a purely linear part (the
    /// `derivative_factors` of this shape's own derivative levels) and the
    /// `nonlinear_residual`. The separation is permissive: any term that is
    /// not linear in exactly one known state variable with a state-free
    /// coefficient - including linear coupling to *other* shapes' variables -
    /// is routed into the residual, never rejected.
    ///
    /// `all_variable_symbols` is the full set of state-variable names known
    /// across all shapes being parsed together (prime-marked), collected by
    /// the caller in a pre-pass; it is what makes cross-shape coupling
    /// detection possible.
    ///
    /// # Examples
    /// ```rust, ignore
    /// Shape::from_ode("alpha",
    ///                 "-1/tau^2 * alpha - 2/tau * alpha'",
    ///                 &initial_values, &[]);
    /// ```
    pub fn from_ode(
        symbol: &str,
        definition: &str,
        initial_values: &HashMap<String, String>,
        all_variable_symbols: &[String],
    ) -> Result<Shape, ShapeError> {
        let order = initial_values.len();
        if order == 0 {
            return Err(ShapeError::MalformedInput(format!(
                "no initial values specified for equation with variable symbol \"{}\"",
                symbol
            )));
        }

        Self::initial_values_sanity_checks(symbol, definition, initial_values, order)?;

        // parse the initial values
        let mut parsed_ivs: HashMap<String, Expr> = HashMap::new();
        for (name, value) in initial_values {
            let expr = parse_expression_func(value).map_err(|e| {
                ShapeError::MalformedInput(format!(
                    "initial value for \"{}\": {}",
                    name, e
                ))
            })?;
            parsed_ivs.insert(name.clone(), expr);
        }

        // switch from prime markers to internal derivative symbols
        let rhs = parse_expression_func(&definition.replace('\'', "__d")).map_err(|e| {
            ShapeError::MalformedInput(format!("shape \"{}\": {}", symbol, e))
        })?;

        let mut known: Vec<String> = all_variable_symbols
            .iter()
            .map(|s| primed_to_internal(s))
            .collect();
        if !known.contains(&symbol.to_string()) {
            // standalone use: the shape only knows its own derivative levels
            known.extend((0..order).map(|level| derived_symbol(symbol, level)));
        }

        // the purely linear part of the shape goes into `derivative_factors`;
        // linear coupling to foreign symbols goes back into the residual as
        // explicit coupling terms
        let mut separation = separate_linear(&rhs, &known);
        let derivative_factors: Vec<Expr> = (0..order)
            .map(|level| {
                separation
                    .linear_coefficients
                    .remove(&derived_symbol(symbol, level))
                    .unwrap_or(Expr::Const(0.0))
            })
            .collect();
        let mut residual = separation.residual;
        let mut foreign: Vec<(String, Expr)> =
            separation.linear_coefficients.into_iter().collect();
        foreign.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, coefficient) in foreign {
            residual = residual + coefficient * Expr::Var(name);
        }
        let residual = residual.simplify();
        debug!(
            "created shape {} with derivative_factors = {:?}, residual = {}",
            symbol, derivative_factors, residual
        );

        Shape::new(symbol, order, parsed_ivs, derivative_factors, residual)
    }

    fn initial_values_sanity_checks(
        symbol: &str,
        definition: &str,
        initial_values: &HashMap<String, String>,
        order: usize,
    ) -> Result<(), ShapeError> {
        // the highest derivative of the shape's own symbol appearing on the
        // right-hand side fixes the order the declaration must have
        let own_occurrence =
            regex::Regex::new(&format!(r"\b{}('+)", regex::escape(symbol)))
                .expect("static pattern");
        let mut order_from_definition = 1;
        for cap in own_occurrence.captures_iter(definition) {
            let marked = cap[1].len() + 1;
            if marked > order_from_definition {
                order_from_definition = marked;
            }
        }
        if order_from_definition != order {
            return Err(ShapeError::OrderMismatch {
                symbol: symbol.to_string(),
                declared: order,
                found: order_from_definition,
            });
        }

        // each derivative order 0..order-1 needs exactly one initial value
        let iv_name = regex::Regex::new(&format!(r"^{}('*)$", regex::escape(symbol)))
            .expect("static pattern");
        let mut specified = vec![false; order];
        for name in initial_values.keys() {
            let Some(cap) = iv_name.captures(name) else {
                return Err(ShapeError::MalformedInput(format!(
                    "in definition for \"{}\": initial value specified for unknown \
                     variable symbol \"{}\"",
                    symbol, name
                )));
            };
            let level = cap[1].len();
            if level >= order {
                return Err(ShapeError::MalformedInput(format!(
                    "initial value for \"{}\": differential order {} exceeds \
                     equation order {}",
                    name, level, order
                )));
            }
            if specified[level] {
                return Err(ShapeError::MalformedInput(format!(
                    "initial value for derivative order {} of \"{}\" specified \
                     more than once",
                    level, symbol
                )));
            }
            specified[level] = true;
        }
        if !specified.iter().all(|s| *s) {
            return Err(ShapeError::MalformedInput(format!(
                "initial value not specified for all differential orders of \"{}\"",
                symbol
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ivs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_function_exponential_decay_is_first_order() {
        let shape = Shape::from_function("I", "exp(-t/tau)", "t", 100, 4).unwrap();
        assert_eq!(shape.order, 1);
        // I' = -1/tau * I
        let expected = Expr::parse_expression("-1/tau");
        assert!(
            (shape.derivative_factors[0].clone() - expected).is_identically_zero()
        );
        assert!(
            (shape.get_initial_value("I").unwrap().clone() - Expr::Const(1.0))
                .is_identically_zero()
        );
    }

    #[test]
    fn test_from_function_alpha_shape_is_second_order() {
        let shape = Shape::from_function("I", "t*exp(-t/tau)", "t", 100, 4).unwrap();
        assert_eq!(shape.order, 2);
        assert_eq!(shape.state_variables, vec!["I__d", "I"]);
        // I'' = -1/tau^2 * I - 2/tau * I'
        assert!(
            (shape.derivative_factors[0].clone()
                - Expr::parse_expression("-1/tau^2"))
            .is_identically_zero()
        );
        assert!(
            (shape.derivative_factors[1].clone() - Expr::parse_expression("-2/tau"))
                .is_identically_zero()
        );
        // substituted back, the residual of the inferred ODE must vanish
        let x = Expr::parse_expression("t*exp(-t/tau)");
        let residual = x.n_th_derivative("t", 2)
            - shape.derivative_factors[0].clone() * x.clone()
            - shape.derivative_factors[1].clone() * x.diff("t");
        assert!(residual.is_identically_zero());
        // initial values: I(0) = 0, I'(0) = 1
        assert!(shape
            .get_initial_value("I")
            .unwrap()
            .is_identically_zero());
        assert!(
            (shape.get_initial_value("I'").unwrap().clone() - Expr::Const(1.0))
                .is_identically_zero()
        );
    }

    #[test]
    fn test_from_function_unsolvable() {
        let err = Shape::from_function("z", "1/(1 + t)", "t", 100, 2).unwrap_err();
        assert!(matches!(err, ShapeError::UnsolvableOrder { .. }));
    }

    #[test]
    fn test_from_function_degenerate() {
        let err = Shape::from_function("z", "0", "t", 100, 4).unwrap_err();
        assert!(matches!(err, ShapeError::DegenerateSample { .. }));
    }

    #[test]
    fn test_from_ode_linear() {
        let shape =
            Shape::from_ode("V", "-V/tau", &ivs(&[("V", "0")]), &[]).unwrap();
        assert_eq!(shape.order, 1);
        assert!(
            (shape.derivative_factors[0].clone() - Expr::parse_expression("-1/tau"))
                .is_identically_zero()
        );
        assert!(shape.nonlinear_residual.is_identically_zero());
    }

    #[test]
    fn test_from_ode_second_order() {
        let shape = Shape::from_ode(
            "alpha",
            "-1/tau^2 * alpha - 2/tau * alpha'",
            &ivs(&[("alpha", "0"), ("alpha'", "e/tau")]),
            &[],
        )
        .unwrap();
        assert_eq!(shape.order, 2);
        assert!(
            (shape.derivative_factors[0].clone()
                - Expr::parse_expression("-1/tau^2"))
            .is_identically_zero()
        );
        assert!(
            (shape.derivative_factors[1].clone() - Expr::parse_expression("-2/tau"))
                .is_identically_zero()
        );
    }

    #[test]
    fn test_from_ode_nonlinear_goes_to_residual() {
        let known = vec!["z".to_string(), "y".to_string()];
        let shape =
            Shape::from_ode("z", "z*y", &ivs(&[("z", "1")]), &known).unwrap();
        assert_eq!(shape.order, 1);
        assert!(shape.derivative_factors[0].is_identically_zero());
        assert!(
            (shape.nonlinear_residual.clone() - Expr::parse_expression("z*y"))
                .is_identically_zero()
        );
    }

    #[test]
    fn test_from_ode_foreign_linear_coupling_goes_to_residual() {
        let known = vec!["V".to_string(), "I".to_string(), "I'".to_string()];
        let shape = Shape::from_ode(
            "V",
            "-V/tau + I/C_m",
            &ivs(&[("V", "0")]),
            &known,
        )
        .unwrap();
        assert!(
            (shape.derivative_factors[0].clone() - Expr::parse_expression("-1/tau"))
                .is_identically_zero()
        );
        assert!(
            (shape.nonlinear_residual.clone() - Expr::parse_expression("I/C_m"))
                .is_identically_zero()
        );
    }

    #[test]
    fn test_round_trip_reconstitution() {
        for rhs in [
            "-V/tau",
            "-V/tau + k",
            "V*V",
            "-V/tau + V*V + exp(V)",
        ] {
            let shape =
                Shape::from_ode("V", rhs, &ivs(&[("V", "0")]), &[]).unwrap();
            let original =
                parse_expression_func(&rhs.replace('\'', "__d")).unwrap();
            let rebuilt = shape.reconstituted_rhs();
            assert!(
                (rebuilt - original).is_identically_zero(),
                "round trip failed for {}",
                rhs
            );
        }
    }

    #[test]
    fn test_initial_value_validation() {
        // missing initial value for order 2
        let err = Shape::from_ode(
            "x",
            "-x/tau - x'",
            &ivs(&[("x", "0")]),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::OrderMismatch { .. }));
        // initial value for a foreign symbol
        let err = Shape::from_ode(
            "x",
            "-x/tau",
            &ivs(&[("y", "0")]),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::MalformedInput(_)));
        // derivative order out of range
        let err = Shape::from_ode(
            "x",
            "-x/tau",
            &ivs(&[("x''", "0")]),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::MalformedInput(_)));
    }

    #[test]
    fn test_reserved_symbol_collision() {
        let err =
            Shape::from_ode("exp", "-exp/tau", &ivs(&[("exp", "0")]), &[]).unwrap_err();
        // the reserved word already trips the parser of the right-hand side
        assert!(matches!(
            err,
            ShapeError::MalformedInput(_) | ShapeError::SymbolNameCollision { .. }
        ));
        let err = Shape::new(
            "sin",
            0,
            HashMap::new(),
            Vec::new(),
            Expr::Const(0.0),
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::SymbolNameCollision { .. }));
    }

    #[test]
    fn test_is_lin_const_coeff() {
        let v = Shape::from_ode("V", "-V/tau", &ivs(&[("V", "0")]), &[]).unwrap();
        assert!(v.is_lin_const_coeff(&[v.clone()]));

        let known = vec!["z".to_string(), "y".to_string()];
        let z = Shape::from_ode("z", "z*y", &ivs(&[("z", "1")]), &known).unwrap();
        let y = Shape::from_ode("y", "-y", &ivs(&[("y", "1")]), &known).unwrap();
        assert!(!z.is_lin_const_coeff(&[z.clone(), y.clone()]));
        assert!(y.is_lin_const_coeff(&[z, y.clone()]));
    }

    #[test]
    fn test_linear_foreign_coupling_is_lin_const_coeff() {
        let known = vec!["V".to_string(), "I".to_string()];
        let v = Shape::from_ode("V", "-V/tau + I/C_m", &ivs(&[("V", "0")]), &known)
            .unwrap();
        let i = Shape::from_ode("I", "-I/tau_s", &ivs(&[("I", "1")]), &known).unwrap();
        assert!(v.is_lin_const_coeff(&[v.clone(), i.clone()]));
    }
}
