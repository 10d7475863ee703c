//! Scenario tests driving the whole pipeline: declarations in, analytic and
//! numeric solvers out.

use crate::shapes::analysis::{analysis, AnalysisConfig, ShapeDecl};
use crate::shapes::shape::Shape;
use crate::shapes::system_of_shapes::SystemOfShapes;
use crate::symbolic::symbolic_engine::Expr;
use approx::assert_relative_eq;
use std::collections::HashMap;

fn quiet() -> AnalysisConfig {
    AnalysisConfig {
        loglevel: Some("off".to_string()),
        ..AnalysisConfig::default()
    }
}

fn ivs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// V' = -V/tau (linear, constant coefficient) next to the alpha kernel
/// I = t*exp(-t/tau_syn): both solve analytically, with no dependency
/// between them, and the full three-variable system gets a propagator.
#[test]
fn scenario_decay_and_alpha_kernel() {
    let v = Shape::from_ode("V", "-V/tau", &ivs(&[("V", "0")]), &[]).unwrap();
    let i = Shape::from_function("I", "t*exp(-t/tau_syn)", "t", 100, 4).unwrap();

    // I is inferred as a second-order ODE with nonzero derivative factors
    assert_eq!(i.order, 2);
    assert!(!i.derivative_factors[0].is_identically_zero());
    assert!(!i.derivative_factors[1].is_identically_zero());

    let sys = SystemOfShapes::from_shapes(vec![v, i]);
    assert_eq!(sys.state_variables, vec!["V", "I__d", "I"]);

    // the dependency graph has no edge between the V and I blocks
    let edges = sys.get_dependency_edges();
    for (from, to) in &edges {
        assert_eq!(
            from == "V",
            to == "V",
            "unexpected cross-shape edge {} -> {}",
            from,
            to
        );
    }

    // both shapes classify as lin-cc, and propagation changes nothing
    let initial = sys.get_lin_cc_symbols();
    assert!(initial.values().all(|is_lin| *is_lin));
    let propagated = sys.propagate_lin_cc_judgements(&initial, &edges);
    assert_eq!(initial, propagated);

    // propagator generation succeeds for the full three-variable system;
    // every state variable gets an update rule, V's has a single term, and
    // the companion block of I is dense (repeated eigenvalue -1/tau_syn)
    let solver = sys.compute_propagator("__h").unwrap();
    assert_eq!(solver.update_expressions.len(), 3);
    assert_eq!(solver.propagators.len(), 5);
    let v_update = solver.update_expressions.get("V").unwrap();
    let expected = Expr::parse_expression("__P__V__V * V");
    assert!((v_update.clone() - expected).is_identically_zero());
    assert!(solver.propagators.contains_key("__P__I__I"));
    assert!(solver.propagators.contains_key("__P__I__d__I__d"));
}

/// the same scenario through the analysis entry point
#[test]
fn scenario_decay_and_alpha_kernel_through_analysis() {
    let decls = vec![
        ShapeDecl::new("V' = -V/tau").with_initial_value("0"),
        ShapeDecl::new("I = t*exp(-t/tau_syn)"),
    ];
    let outcome = analysis(&decls, &quiet()).unwrap();
    assert!(outcome.numeric.is_none());
    let analytic = outcome.analytic.unwrap();
    assert_eq!(analytic.state_variables.len(), 3);
    // initial values are carried over: I(0) = 0, I'(0) = 1, V(0) = 0
    assert!(analytic.initial_values["V"].is_identically_zero());
    assert!(analytic.initial_values["I"].is_identically_zero());
    assert!(
        (analytic.initial_values["I__d"].clone() - Expr::Const(1.0))
            .is_identically_zero()
    );
}

/// z' = z*y is nonlinear: no self-linear term, the product lands in the
/// residual, the classification is false and propagates to dependents.
#[test]
fn scenario_bilinear_coupling() {
    let decls = vec![
        ShapeDecl::new("z' = z*y").with_initial_value("1"),
        ShapeDecl::new("y' = -y/tau").with_initial_value("1"),
    ];
    let outcome = analysis(&decls, &quiet()).unwrap();

    let numeric = outcome.numeric.unwrap();
    assert_eq!(numeric.system.state_variables, vec!["z"]);
    let z_shape = &numeric.system.shapes[0];
    assert!(z_shape.derivative_factors[0].is_identically_zero());
    assert!(
        (z_shape.nonlinear_residual.clone() - Expr::parse_expression("z*y"))
            .is_identically_zero()
    );

    let analytic = outcome.analytic.unwrap();
    assert_eq!(analytic.state_variables, vec!["y"]);
}

/// the propagator of the full analytic system agrees numerically with a
/// truncated exponential series
#[test]
fn scenario_propagator_matches_series() {
    let decls = vec![
        ShapeDecl::new("V' = -V/tau").with_initial_value("0"),
        ShapeDecl::new("I = t*exp(-t/tau_syn)"),
    ];
    let outcome = analysis(&decls, &quiet()).unwrap();
    let analytic = outcome.analytic.unwrap();

    let vars = ["tau", "tau_syn", "__h"];
    let values = [10.0, 2.0, 0.1];

    // rebuild the system matrix to compare against
    let v = Shape::from_ode("V", "-V/tau", &ivs(&[("V", "0")]), &[]).unwrap();
    let i = Shape::from_function("I", "t*exp(-t/tau_syn)", "t", 100, 4).unwrap();
    let sys = SystemOfShapes::from_shapes(vec![v, i]);
    let a_num = sys.A.evaluate(&vars, &values) * 0.1;

    let n = sys.state_variables.len();
    let mut reference = nalgebra::DMatrix::<f64>::identity(n, n);
    let mut power = nalgebra::DMatrix::<f64>::identity(n, n);
    let mut factorial = 1.0;
    for k in 1..25 {
        power = &power * &a_num;
        factorial *= k as f64;
        reference += &power / factorial;
    }

    for (row, rsym) in sys.state_variables.iter().enumerate() {
        for (col, csym) in sys.state_variables.iter().enumerate() {
            let name = format!("__P__{}__{}", rsym, csym);
            let p_num = analytic
                .propagators
                .get(&name)
                .map(|p| p.eval_expression(&vars, &values))
                .unwrap_or(0.0);
            assert_relative_eq!(
                p_num,
                reference[(row, col)],
                epsilon = 1e-9,
                max_relative = 1e-9
            );
        }
    }
}

/// mixed analytic/numeric split with cross-shape linear coupling: the
/// membrane equation couples linearly to the synaptic kernel and both stay
/// analytic; a nonlinear gating shape goes numeric on its own
#[test]
fn scenario_mixed_membrane_kernel_gate() {
    let decls = vec![
        ShapeDecl::new("V' = -V/tau_m + I/C_m").with_initial_value("0"),
        ShapeDecl::new("I = t*exp(-t/tau_s)"),
        ShapeDecl::new("g' = g*g - g").with_initial_value("0.5"),
    ];
    let outcome = analysis(&decls, &quiet()).unwrap();

    let analytic = outcome.analytic.unwrap();
    let mut analytic_syms = analytic.state_variables.clone();
    analytic_syms.sort();
    assert_eq!(analytic_syms, vec!["I", "I__d", "V"]);
    // the coupling surfaces as propagator entries from I's columns into V
    assert!(analytic.propagators.contains_key("__P__V__I"));

    let numeric = outcome.numeric.unwrap();
    assert_eq!(numeric.system.state_variables, vec!["g"]);
    let rhs = numeric.update_expressions.get("g").unwrap();
    assert!(
        (rhs.clone() - Expr::parse_expression("g*g - g")).is_identically_zero()
    );
}
