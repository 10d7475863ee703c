//! The global linear dynamical system assembled from all shapes:
//!
//!   x' = A*x + C
//!
//! where `x` is the concatenation of every shape's state variables (highest
//! derivative first per shape, shapes in input order), `A` is the N x N
//! linear coefficient matrix and `C` the nonlinear/inhomogeneous residual
//! vector. Within each shape's block all but the top row are trivial
//! derivative-chaining identities; the top row carries the partial
//! derivatives of the shape's full defining expression with respect to every
//! global state variable, so that linear coupling between shapes surfaces in
//! `A` while genuinely nonlinear terms remain in `C`.

use crate::shapes::shape::{derived_symbol, Shape};
use crate::symbolic::symbolic_engine::Expr;
use crate::symbolic::symbolic_vectors::{ExprMatrix, ExprVector};
use log::debug;
use std::collections::{HashMap, HashSet, VecDeque};

/// a directed dependency: `to`'s equation depends on `from`
pub type DependencyEdge = (String, String);

#[derive(Clone, Debug)]
pub struct SystemOfShapes {
    /// global state-variable symbols, one per row of `A`
    pub state_variables: Vec<String>,
    /// linear coefficient matrix
    pub A: ExprMatrix,
    /// nonlinear/inhomogeneous residual per row
    pub C: ExprVector,
    /// the owned shapes, for provenance and initial-value lookup
    pub shapes: Vec<Shape>,
}

impl SystemOfShapes {
    /// Constructs the global companion-form system including all shapes.
    /// Assembly either fully succeeds or the process never yields a value;
    /// no partially assembled system escapes.
    pub fn from_shapes(shapes: Vec<Shape>) -> SystemOfShapes {
        let state_variables: Vec<String> = shapes
            .iter()
            .flat_map(|shape| shape.state_variables.iter().cloned())
            .collect();
        let n = state_variables.len();
        let index: HashMap<&str, usize> = state_variables
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();

        let mut a_mat = ExprMatrix::zeros(n, n);
        let mut c_vec = ExprVector::zeros(n);

        for shape in &shapes {
            let full = shape.reconstituted_rhs();
            let top =
                index[derived_symbol(&shape.symbol, shape.order - 1).as_str()];

            // the top row of the block is the full linearization of the
            // defining expression against the complete global symbol set
            for (j, sym) in state_variables.iter().enumerate() {
                a_mat[(top, j)] = full.diff(sym).simplify();
            }

            // the remaining rows chain the derivatives: x^(k)' = x^(k+1)
            for level in 0..shape.order - 1 {
                let row = index[derived_symbol(&shape.symbol, level).as_str()];
                let col = index[derived_symbol(&shape.symbol, level + 1).as_str()];
                a_mat[(row, col)] = Expr::Const(1.0);
            }

            // C is what remains after subtracting every term linear in any
            // global state variable
            let mut remainder = full.clone();
            for (j, sym) in state_variables.iter().enumerate() {
                if a_mat[(top, j)].is_zero() {
                    continue;
                }
                remainder = remainder
                    - a_mat[(top, j)].clone() * Expr::Var(sym.clone());
            }
            c_vec[top] = remainder.simplify();
        }

        SystemOfShapes {
            state_variables,
            A: a_mat,
            C: c_vec,
            shapes,
        }
    }

    /// The full right-hand side per row, rebuilt from the owning shapes.
    /// For the complete system this coincides with `A*x + C`; for a
    /// projection it stays exact even when the row references symbols whose
    /// columns were projected away (those appear as free symbols).
    pub fn reconstituted_rhs(&self) -> ExprVector {
        let index: HashMap<&str, usize> = self
            .state_variables
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        let mut out = ExprVector::zeros(self.state_variables.len());
        for shape in &self.shapes {
            for level in 0..shape.order {
                let row = index[derived_symbol(&shape.symbol, level).as_str()];
                out[row] = if level == shape.order - 1 {
                    shape.reconstituted_rhs().simplify()
                } else {
                    Expr::Var(derived_symbol(&shape.symbol, level + 1))
                };
            }
        }
        out
    }

    /// Jacobian of the full reconstituted right-hand side with respect to
    /// the state vector; consumed by the numeric integration side.
    pub fn jacobian(&self) -> ExprMatrix {
        let rhs = self.reconstituted_rhs();
        let n = self.state_variables.len();
        let mut jac = ExprMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                jac[(i, j)] = rhs[i].diff(&self.state_variables[j]).simplify();
            }
        }
        jac
    }

    /// Directed dependency edges between global state variables: an edge
    /// (sym1, sym2) is present iff sym2's row depends on sym1, either through
    /// a nonzero `A` entry or through a nonzero derivative of the `C` entry.
    pub fn get_dependency_edges(&self) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();
        for (i, sym1) in self.state_variables.iter().enumerate() {
            for (j, sym2) in self.state_variables.iter().enumerate() {
                if !self.A[(j, i)].is_identically_zero() {
                    edges.push((sym1.clone(), sym2.clone()));
                } else if !self.C[j].diff(sym1).is_identically_zero() {
                    edges.push((sym1.clone(), sym2.clone()));
                }
            }
        }
        edges
    }

    /// Initial linear-constant-coefficient judgement per state variable: a
    /// shape is lin-cc iff its own definition is linear with state-free
    /// coefficients; all derivative levels of a shape share the judgement.
    pub fn get_lin_cc_symbols(&self) -> HashMap<String, bool> {
        let mut node_is_lin = HashMap::new();
        for shape in &self.shapes {
            let is_lin = shape.is_lin_const_coeff(&self.shapes);
            for sym in shape.all_variable_symbols() {
                node_is_lin.insert(sym, is_lin);
            }
        }
        node_is_lin
    }

    /// Breadth-first fixpoint over the dependency edges: a symbol whose
    /// equation depends (directly or transitively) on a non-lin-cc symbol
    /// cannot be solved analytically either. Demotion is monotone, so the
    /// fixpoint terminates and re-running it is a no-op.
    pub fn propagate_lin_cc_judgements(
        &self,
        node_is_lin: &HashMap<String, bool>,
        edges: &[DependencyEdge],
    ) -> HashMap<String, bool> {
        let mut judgements = node_is_lin.clone();

        // adjacency: for each symbol, the symbols whose equations depend on it
        let mut dependents_of: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, to) in edges {
            dependents_of
                .entry(from.as_str())
                .or_default()
                .push(to.as_str());
        }

        let mut queue: VecDeque<String> = judgements
            .iter()
            .filter(|(_, is_lin)| !**is_lin)
            .map(|(sym, _)| sym.clone())
            .collect();
        while let Some(sym) = queue.pop_front() {
            if let Some(dependents) = dependents_of.get(sym.as_str()) {
                for dependent in dependents {
                    if judgements.get(*dependent).copied().unwrap_or(false) {
                        debug!(
                            "marking dependent node {} as not lin-cc",
                            dependent
                        );
                        judgements.insert(dependent.to_string(), false);
                        queue.push_back(dependent.to_string());
                    }
                }
            }
        }
        judgements
    }

    /// Non-destructive projection onto a subset of the global state symbols.
    /// The result is only dynamically self-contained when the subset has no
    /// incoming dependency from excluded symbols; ensuring that is the
    /// caller's responsibility.
    pub fn get_sub_system(&self, symbols: &HashSet<String>) -> SystemOfShapes {
        let idx: Vec<usize> = self
            .state_variables
            .iter()
            .enumerate()
            .filter(|(_, sym)| symbols.contains(*sym))
            .map(|(i, _)| i)
            .collect();
        let state_variables: Vec<String> =
            idx.iter().map(|&i| self.state_variables[i].clone()).collect();
        let a_sub = self.A.select(&idx, &idx);
        let c_sub = self.C.select(&idx);
        let shapes_sub: Vec<Shape> = self
            .shapes
            .iter()
            .filter(|shape| symbols.contains(&shape.symbol))
            .cloned()
            .collect();
        SystemOfShapes {
            state_variables,
            A: a_sub,
            C: c_sub,
            shapes: shapes_sub,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::shape::Shape;
    use std::collections::HashMap as Map;

    fn ivs(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn two_shape_system() -> SystemOfShapes {
        // V' = -V/tau + I/C_m  coupled to the alpha shape I
        let known = vec![
            "V".to_string(),
            "I".to_string(),
            "I'".to_string(),
        ];
        let v = Shape::from_ode("V", "-V/tau + I/C_m", &ivs(&[("V", "0")]), &known)
            .unwrap();
        let i = Shape::from_function("I", "t*exp(-t/tau_s)", "t", 100, 4).unwrap();
        SystemOfShapes::from_shapes(vec![v, i])
    }

    #[test]
    fn test_state_vector_order() {
        let sys = two_shape_system();
        assert_eq!(sys.state_variables, vec!["V", "I__d", "I"]);
    }

    #[test]
    fn test_companion_form_invariant() {
        let sys = two_shape_system();
        // every non-top row within a shape's block has exactly one nonzero
        // entry, equal to one, at the next-higher derivative's column
        let mut offset = 0;
        for shape in &sys.shapes {
            for r in 1..shape.order {
                let row = offset + r;
                let mut nonzero = Vec::new();
                for j in 0..sys.state_variables.len() {
                    if !sys.A[(row, j)].is_identically_zero() {
                        nonzero.push(j);
                    }
                }
                assert_eq!(nonzero, vec![row - 1]);
                assert!(
                    (sys.A[(row, row - 1)].clone() - Expr::Const(1.0))
                        .is_identically_zero()
                );
                assert!(sys.C[row].is_identically_zero());
            }
            offset += shape.order;
        }
    }

    #[test]
    fn test_cross_shape_linear_coupling_lands_in_a() {
        let sys = two_shape_system();
        // row of V: dV'/dV = -1/tau, dV'/dI = 1/C_m, dV'/dI__d = 0
        assert!(
            (sys.A[(0, 0)].clone() - Expr::parse_expression("-1/tau"))
                .is_identically_zero()
        );
        assert!(
            (sys.A[(0, 2)].clone() - Expr::parse_expression("1/C_m"))
                .is_identically_zero()
        );
        assert!(sys.A[(0, 1)].is_identically_zero());
        assert!(sys.C[0].is_identically_zero());
    }

    #[test]
    fn test_reconstitution_consistency_nonlinear() {
        // A*x + C must reproduce the right-hand side also for nonlinear rows
        let known = vec!["z".to_string(), "y".to_string()];
        let z = Shape::from_ode("z", "z*y", &ivs(&[("z", "1")]), &known).unwrap();
        let y = Shape::from_ode("y", "-y", &ivs(&[("y", "1")]), &known).unwrap();
        let sys = SystemOfShapes::from_shapes(vec![z, y]);
        let rhs = sys.reconstituted_rhs();
        assert!(
            (rhs[0].clone() - Expr::parse_expression("z*y")).is_identically_zero()
        );
        assert!(
            (rhs[1].clone() - Expr::parse_expression("-y")).is_identically_zero()
        );
        // the one-pass linearization makes A*x + C agree with the shapes
        let x = ExprVector::new(
            sys.state_variables
                .iter()
                .map(|s| Expr::Var(s.clone()))
                .collect(),
        );
        let ax = sys.A.mul_vector(&x);
        for i in 0..rhs.len() {
            let from_matrix = ax[i].clone() + sys.C[i].clone();
            assert!((from_matrix - rhs[i].clone()).is_identically_zero());
        }
    }

    #[test]
    fn test_dependency_edges_uncoupled() {
        let v = Shape::from_ode("V", "-V/tau", &ivs(&[("V", "0")]), &[]).unwrap();
        let i = Shape::from_function("I", "t*exp(-t/tau_s)", "t", 100, 4).unwrap();
        let sys = SystemOfShapes::from_shapes(vec![v, i]);
        let edges = sys.get_dependency_edges();
        // no edge may connect the V block with the I block
        for (from, to) in &edges {
            let from_v = from == "V";
            let to_v = to == "V";
            assert_eq!(from_v, to_v, "unexpected edge {} -> {}", from, to);
        }
    }

    #[test]
    fn test_dependency_edges_coupled() {
        let sys = two_shape_system();
        let edges = sys.get_dependency_edges();
        // V's row depends on I
        assert!(edges.contains(&("I".to_string(), "V".to_string())));
        // I does not depend on V
        assert!(!edges.contains(&("V".to_string(), "I".to_string())));
        assert!(!edges.contains(&("V".to_string(), "I__d".to_string())));
    }

    #[test]
    fn test_lin_cc_classification_and_propagation() {
        let known = vec!["z".to_string(), "y".to_string(), "w".to_string()];
        let z = Shape::from_ode("z", "z*y", &ivs(&[("z", "1")]), &known).unwrap();
        let y = Shape::from_ode("y", "-y", &ivs(&[("y", "1")]), &known).unwrap();
        let w = Shape::from_ode("w", "-w + z", &ivs(&[("w", "0")]), &known).unwrap();
        let sys = SystemOfShapes::from_shapes(vec![z, y, w]);
        let edges = sys.get_dependency_edges();
        let initial = sys.get_lin_cc_symbols();
        assert_eq!(initial["z"], false);
        assert_eq!(initial["y"], true);
        assert_eq!(initial["w"], true);
        let propagated = sys.propagate_lin_cc_judgements(&initial, &edges);
        // w depends on z, which is nonlinear, so w is demoted; y survives
        assert_eq!(propagated["z"], false);
        assert_eq!(propagated["w"], false);
        assert_eq!(propagated["y"], true);
    }

    #[test]
    fn test_propagation_is_monotone_and_idempotent() {
        let sys = two_shape_system();
        let edges = sys.get_dependency_edges();
        let initial = sys.get_lin_cc_symbols();
        let once = sys.propagate_lin_cc_judgements(&initial, &edges);
        for (sym, is_lin) in &once {
            // demotions only: nothing may flip from false to true
            if !initial[sym] {
                assert!(!is_lin);
            }
        }
        let twice = sys.propagate_lin_cc_judgements(&once, &edges);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_get_sub_system_projection() {
        let sys = two_shape_system();
        let subset: HashSet<String> =
            ["I".to_string(), "I__d".to_string()].into_iter().collect();
        let sub = sys.get_sub_system(&subset);
        assert_eq!(sub.state_variables, vec!["I__d", "I"]);
        assert_eq!(sub.A.shape(), (2, 2));
        assert_eq!(sub.C.len(), 2);
        assert_eq!(sub.shapes.len(), 1);
        assert_eq!(sub.shapes[0].symbol, "I");
        // the parent system is untouched
        assert_eq!(sys.state_variables.len(), 3);
    }

    #[test]
    fn test_jacobian_of_linear_system_equals_a() {
        let sys = two_shape_system();
        let jac = sys.jacobian();
        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    (jac[(i, j)].clone() - sys.A[(i, j)].clone())
                        .is_identically_zero()
                );
            }
        }
    }
}
