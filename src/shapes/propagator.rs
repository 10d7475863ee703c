//! Exact propagator synthesis for homogeneous linear subsystems: the
//! symbolic matrix exponential P = exp(A*h), one minted placeholder symbol
//! per structurally nonzero entry of P, and per-variable update rules
//! `x_new = sum(P_placeholder * x_old)`.
//!
//! The exponential is computed blockwise. Shape blocks are condensed by
//! strongly connected components of the block-coupling graph and ordered so
//! that the permuted matrix is block upper triangular. Diagonal components of
//! size one and two have closed forms (scalar exponential, Putzer's two-point
//! formula with an exact repeated-eigenvalue branch); off-diagonal strips are
//! recovered from the Sylvester equation
//!
//!   A11*X - X*A22 = exp(A11*h)*C - C*exp(A22*h)
//!
//! solved through Kronecker products and the adjugate inverse. Components
//! larger than two state variables, and resonant couplings (singular
//! Sylvester system), are outside these closed forms and are reported as
//! `PropagatorSynthesis` errors so the caller can fall back to the numeric
//! path, which is always available.

use crate::shapes::errors::SystemError;
use crate::shapes::system_of_shapes::SystemOfShapes;
use crate::symbolic::symbolic_engine::Expr;
use crate::symbolic::symbolic_vectors::{ExprMatrix, ExprVector};
use log::{debug, info};
use std::collections::HashMap;

/// The analytic-solver output: placeholder definitions and update rules.
#[derive(Clone, Debug)]
pub struct PropagatorSolver {
    /// state variables in system order
    pub state_variables: Vec<String>,
    /// minted placeholder symbol -> propagator matrix entry
    pub propagators: HashMap<String, Expr>,
    /// state variable -> linear combination of placeholders times variables
    pub update_expressions: HashMap<String, Expr>,
}

impl SystemOfShapes {
    /// Synthesizes the exact propagator `P = exp(A*h)` for a self-contained
    /// homogeneous linear subsystem and emits one update rule per state
    /// variable. Fails with `NonHomogeneousSubsystem` when the residual
    /// vector is not identically zero, and with `PropagatorSynthesis` when
    /// the subsystem is outside the closed forms (see module docs).
    pub fn compute_propagator(
        &self,
        timestep_symbol: &str,
    ) -> Result<PropagatorSolver, SystemError> {
        for (i, c) in self.C.iter().enumerate() {
            if !c.is_identically_zero() {
                return Err(SystemError::NonHomogeneousSubsystem {
                    symbol: self.state_variables[i].clone(),
                });
            }
        }

        let mut blocks = Vec::new();
        let mut offset = 0;
        for shape in &self.shapes {
            blocks.push(offset..offset + shape.order);
            offset += shape.order;
        }
        assert_eq!(
            offset,
            self.state_variables.len(),
            "subsystem must consist of whole shape blocks"
        );

        let h = Expr::Var(timestep_symbol.to_string());
        let p_mat = expm_blockwise(&self.A, &blocks, &h)?;

        let n = self.state_variables.len();
        let mut propagators = HashMap::new();
        let mut update_expressions = HashMap::new();
        for row in 0..n {
            let mut update: Option<Expr> = None;
            for col in 0..n {
                let entry = p_mat[(row, col)].clone();
                if entry.is_identically_zero() {
                    continue;
                }
                let name = format!(
                    "__P__{}__{}",
                    self.state_variables[row], self.state_variables[col]
                );
                propagators.insert(name.clone(), entry);
                let term = Expr::Var(name)
                    * Expr::Var(self.state_variables[col].clone());
                update = Some(match update {
                    None => term,
                    Some(prev) => prev + term,
                });
            }
            update_expressions.insert(
                self.state_variables[row].clone(),
                update.unwrap_or(Expr::Const(0.0)),
            );
        }
        info!(
            "generated propagators for {} state variables ({} nonzero entries)",
            n,
            propagators.len()
        );
        Ok(PropagatorSolver {
            state_variables: self.state_variables.clone(),
            propagators,
            update_expressions,
        })
    }
}

/// exp(A*h) for the block structure described in the module docs
fn expm_blockwise(
    a: &ExprMatrix,
    blocks: &[std::ops::Range<usize>],
    h: &Expr,
) -> Result<ExprMatrix, SystemError> {
    let n = a.nrows();
    let nblocks = blocks.len();

    // block p depends on block q iff p's rows reference q's columns
    let mut depends: Vec<Vec<usize>> = vec![Vec::new(); nblocks];
    for p in 0..nblocks {
        for q in 0..nblocks {
            if p == q {
                continue;
            }
            let coupled = blocks[p].clone().any(|r| {
                blocks[q]
                    .clone()
                    .any(|c| !a[(r, c)].is_identically_zero())
            });
            if coupled {
                depends[p].push(q);
            }
        }
    }

    let components = strongly_connected_components(&depends);
    let order = topological_component_order(&depends, &components);

    // permutation: state indices, component by component in dependency order
    let mut perm: Vec<usize> = Vec::with_capacity(n);
    let mut sizes: Vec<usize> = Vec::with_capacity(order.len());
    for &comp_id in &order {
        let mut indices: Vec<usize> = components[comp_id]
            .iter()
            .flat_map(|&b| blocks[b].clone())
            .collect();
        indices.sort_unstable();
        if indices.len() > 2 {
            return Err(SystemError::PropagatorSynthesis(format!(
                "closed-form exponential is limited to coupled blocks of at \
                 most two state variables, got {}",
                indices.len()
            )));
        }
        sizes.push(indices.len());
        perm.extend(indices);
    }

    let a_perm = a.select(&perm, &perm);
    debug!("block-triangular ordering: {:?} (sizes {:?})", perm, sizes);
    let p_perm = expm_triangular(&a_perm, &sizes, h)?;

    // undo the permutation
    let mut p_mat = ExprMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            p_mat[(perm[i], perm[j])] = p_perm[(i, j)].clone();
        }
    }
    Ok(p_mat)
}

/// exp of a block upper triangular matrix, recursing on the leading block
fn expm_triangular(
    a: &ExprMatrix,
    sizes: &[usize],
    h: &Expr,
) -> Result<ExprMatrix, SystemError> {
    let n = a.nrows();
    if sizes.len() == 1 {
        return expm_dense(a, h);
    }
    let m = sizes[0];
    let a11 = a.submatrix(0..m, 0..m);
    let a22 = a.submatrix(m..n, m..n);
    let c12 = a.submatrix(0..m, m..n);
    let e11 = expm_dense(&a11, h)?;
    let e22 = expm_triangular(&a22, &sizes[1..], h)?;

    let coupled = (0..m).any(|i| {
        (0..n - m).any(|j| !c12[(i, j)].is_identically_zero())
    });
    let x12 = if coupled {
        let rhs = e11
            .mul_matrix(&c12)
            .sub_matrix(&c12.mul_matrix(&e22))
            .simplify();
        sylvester_solve(&a11, &a22, &rhs)?
    } else {
        ExprMatrix::zeros(m, n - m)
    };

    let mut out = ExprMatrix::zeros(n, n);
    for i in 0..m {
        for j in 0..m {
            out[(i, j)] = e11[(i, j)].clone();
        }
        for j in 0..n - m {
            out[(i, m + j)] = x12[(i, j)].clone();
        }
    }
    for i in 0..n - m {
        for j in 0..n - m {
            out[(m + i, m + j)] = e22[(i, j)].clone();
        }
    }
    Ok(out)
}

/// closed-form exponential of a dense block of size one or two
fn expm_dense(a: &ExprMatrix, h: &Expr) -> Result<ExprMatrix, SystemError> {
    match a.nrows() {
        1 => {
            let rate = a[(0, 0)].clone();
            let entry = if rate.is_identically_zero() {
                Expr::Const(1.0)
            } else {
                Expr::Exp((rate * h.clone()).boxed()).simplify()
            };
            Ok(ExprMatrix::new(vec![vec![entry]]))
        }
        2 => {
            let tr = (a[(0, 0)].clone() + a[(1, 1)].clone()).simplify();
            let det = (a[(0, 0)].clone() * a[(1, 1)].clone()
                - a[(0, 1)].clone() * a[(1, 0)].clone())
            .simplify();
            let disc =
                (tr.clone() * tr.clone() - Expr::Const(4.0) * det).simplify();
            let mut out = ExprMatrix::zeros(2, 2);
            if disc.is_identically_zero() {
                // repeated eigenvalue: exp(A*h) = e^(l*h) * (I + h*(A - l*I))
                let lambda =
                    Expr::Div(tr.boxed(), Expr::Const(2.0).boxed()).simplify();
                let elh = Expr::Exp((lambda.clone() * h.clone()).boxed());
                for i in 0..2 {
                    for j in 0..2 {
                        let delta = if i == j {
                            Expr::Const(1.0)
                        } else {
                            Expr::Const(0.0)
                        };
                        let shifted = a[(i, j)].clone()
                            - lambda.clone() * delta.clone();
                        out[(i, j)] = (elh.clone()
                            * (delta + h.clone() * shifted))
                            .simplify();
                    }
                }
            } else {
                // distinct eigenvalues l1, l2 = (tr +- sqrt(disc))/2:
                // exp(A*h) = (e^(l1*h)*(A - l2*I) - e^(l2*h)*(A - l1*I))/(l1 - l2)
                let sq = Expr::Pow(disc.boxed(), Expr::Const(0.5).boxed());
                let two = Expr::Const(2.0);
                let l1 = Expr::Div(
                    (tr.clone() + sq.clone()).boxed(),
                    two.clone().boxed(),
                );
                let l2 = Expr::Div((tr - sq.clone()).boxed(), two.boxed());
                let e1 = Expr::Exp((l1.clone() * h.clone()).boxed());
                let e2 = Expr::Exp((l2.clone() * h.clone()).boxed());
                for i in 0..2 {
                    for j in 0..2 {
                        let delta = if i == j {
                            Expr::Const(1.0)
                        } else {
                            Expr::Const(0.0)
                        };
                        let num = e1.clone()
                            * (a[(i, j)].clone() - l2.clone() * delta.clone())
                            - e2.clone()
                                * (a[(i, j)].clone() - l1.clone() * delta);
                        out[(i, j)] =
                            Expr::Div(num.boxed(), sq.clone().boxed()).simplify();
                    }
                }
            }
            Ok(out)
        }
        k => Err(SystemError::PropagatorSynthesis(format!(
            "closed-form exponential is limited to blocks of at most two \
             state variables, got {}",
            k
        ))),
    }
}

/// Solves A*X - X*B = R through vectorization: the Kronecker system
/// (I (x) A - B^T (x) I) vec(X) = vec(R). Singular when A and B share an
/// eigenvalue (resonance).
fn sylvester_solve(
    a: &ExprMatrix,
    b: &ExprMatrix,
    r: &ExprMatrix,
) -> Result<ExprMatrix, SystemError> {
    let m = a.nrows();
    let k = b.nrows();
    let lhs = ExprMatrix::identity(k)
        .kronecker(a)
        .sub_matrix(&b.transpose().kronecker(&ExprMatrix::identity(m)));
    let inv = lhs.inverse().ok_or_else(|| {
        SystemError::PropagatorSynthesis(
            "resonant eigenvalues in cross-shape coupling (singular Sylvester \
             system)"
                .to_string(),
        )
    })?;
    let mut vec_r = ExprVector::zeros(m * k);
    for j in 0..k {
        for i in 0..m {
            vec_r[j * m + i] = r[(i, j)].clone();
        }
    }
    let z = inv.mul_vector(&vec_r);
    let mut x = ExprMatrix::zeros(m, k);
    for j in 0..k {
        for i in 0..m {
            x[(i, j)] = z[j * m + i].simplify();
        }
    }
    Ok(x)
}

/// Kosaraju's algorithm over the block graph; returns components as lists of
/// block indices.
fn strongly_connected_components(depends: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = depends.len();
    let mut visited = vec![false; n];
    let mut finish_order = Vec::with_capacity(n);

    fn dfs_forward(
        v: usize,
        depends: &[Vec<usize>],
        visited: &mut [bool],
        finish_order: &mut Vec<usize>,
    ) {
        visited[v] = true;
        for &w in &depends[v] {
            if !visited[w] {
                dfs_forward(w, depends, visited, finish_order);
            }
        }
        finish_order.push(v);
    }

    for v in 0..n {
        if !visited[v] {
            dfs_forward(v, depends, &mut visited, &mut finish_order);
        }
    }

    let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (v, targets) in depends.iter().enumerate() {
        for &w in targets {
            reverse[w].push(v);
        }
    }

    let mut component = vec![usize::MAX; n];
    let mut components: Vec<Vec<usize>> = Vec::new();
    for &v in finish_order.iter().rev() {
        if component[v] != usize::MAX {
            continue;
        }
        let id = components.len();
        let mut stack = vec![v];
        let mut members = Vec::new();
        component[v] = id;
        while let Some(u) = stack.pop() {
            members.push(u);
            for &w in &reverse[u] {
                if component[w] == usize::MAX {
                    component[w] = id;
                    stack.push(w);
                }
            }
        }
        members.sort_unstable();
        components.push(members);
    }
    components
}

/// Kahn's algorithm on the component condensation: dependents come first, so
/// the permuted matrix is block upper triangular.
fn topological_component_order(
    depends: &[Vec<usize>],
    components: &[Vec<usize>],
) -> Vec<usize> {
    let nblocks = depends.len();
    let ncomp = components.len();
    let mut comp_of = vec![0usize; nblocks];
    for (id, members) in components.iter().enumerate() {
        for &b in members {
            comp_of[b] = id;
        }
    }
    // edge X -> Y iff component X depends on component Y
    let mut out_edges: Vec<Vec<usize>> = vec![Vec::new(); ncomp];
    let mut indegree = vec![0usize; ncomp];
    for (p, targets) in depends.iter().enumerate() {
        for &q in targets {
            let (x, y) = (comp_of[p], comp_of[q]);
            if x != y && !out_edges[x].contains(&y) {
                out_edges[x].push(y);
                indegree[y] += 1;
            }
        }
    }
    let mut queue: std::collections::VecDeque<usize> =
        (0..ncomp).filter(|&c| indegree[c] == 0).collect();
    let mut order = Vec::with_capacity(ncomp);
    while let Some(c) = queue.pop_front() {
        order.push(c);
        for &y in &out_edges[c] {
            indegree[y] -= 1;
            if indegree[y] == 0 {
                queue.push_back(y);
            }
        }
    }
    debug_assert_eq!(order.len(), ncomp, "condensation must be acyclic");
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::shape::Shape;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use std::collections::HashMap as Map;

    fn ivs(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_single_decay_propagator() {
        let v = Shape::from_ode("V", "-V/tau", &ivs(&[("V", "0")]), &[]).unwrap();
        let sys = SystemOfShapes::from_shapes(vec![v]);
        let solver = sys.compute_propagator("__h").unwrap();
        assert_eq!(solver.propagators.len(), 1);
        let p = solver.propagators.get("__P__V__V").unwrap();
        let expected = Expr::parse_expression("exp(-__h/tau)");
        assert!((p.clone() - expected).is_identically_zero());
        let update = solver.update_expressions.get("V").unwrap();
        let expected = Expr::parse_expression("__P__V__V * V");
        assert!((update.clone() - expected).is_identically_zero());
    }

    #[test]
    fn test_alpha_block_repeated_eigenvalue() {
        let i = Shape::from_function("I", "t*exp(-t/tau_s)", "t", 100, 4).unwrap();
        let sys = SystemOfShapes::from_shapes(vec![i]);
        let solver = sys.compute_propagator("__h").unwrap();
        // the companion exponential for the alpha kernel is dense
        assert_eq!(solver.propagators.len(), 4);
        let p = solver.propagators.get("__P__I__I").unwrap();
        let expected = Expr::parse_expression("exp(-__h/tau_s)*(1 + __h/tau_s)");
        assert!((p.clone() - expected).is_identically_zero());
        let p = solver.propagators.get("__P__I__I__d").unwrap();
        let expected = Expr::parse_expression("exp(-__h/tau_s)*__h");
        assert!((p.clone() - expected).is_identically_zero());
    }

    #[test]
    fn test_nonhomogeneous_subsystem_is_rejected() {
        let v =
            Shape::from_ode("V", "-V/tau + k", &ivs(&[("V", "0")]), &[]).unwrap();
        let sys = SystemOfShapes::from_shapes(vec![v]);
        let err = sys.compute_propagator("__h").unwrap_err();
        assert!(matches!(err, SystemError::NonHomogeneousSubsystem { .. }));
    }

    #[test]
    fn test_homogeneous_subsystem_is_accepted() {
        let v = Shape::from_ode("V", "-V/tau", &ivs(&[("V", "0")]), &[]).unwrap();
        let sys = SystemOfShapes::from_shapes(vec![v]);
        assert!(sys.compute_propagator("__h").is_ok());
    }

    #[test]
    fn test_order_three_block_is_out_of_scope() {
        // x''' = 0 is lin-cc but its block is larger than the closed forms
        let x = Shape::from_ode(
            "x",
            "0*x''",
            &ivs(&[("x", "0"), ("x'", "1"), ("x''", "0")]),
            &[],
        )
        .unwrap();
        let sys = SystemOfShapes::from_shapes(vec![x]);
        let err = sys.compute_propagator("__h").unwrap_err();
        assert!(matches!(err, SystemError::PropagatorSynthesis(_)));
    }

    fn numeric_expm(a: &DMatrix<f64>, terms: usize) -> DMatrix<f64> {
        let n = a.nrows();
        let mut sum = DMatrix::<f64>::identity(n, n);
        let mut power = DMatrix::<f64>::identity(n, n);
        let mut factorial = 1.0;
        for k in 1..terms {
            power = &power * a;
            factorial *= k as f64;
            sum += &power / factorial;
        }
        sum
    }

    #[test]
    fn test_coupled_system_propagator_matches_series() {
        // V' = -V/tau + I/C_m with the alpha kernel I: triangular coupling
        let known =
            vec!["V".to_string(), "I".to_string(), "I'".to_string()];
        let v = Shape::from_ode(
            "V",
            "-V/tau + I/C_m",
            &ivs(&[("V", "0")]),
            &known,
        )
        .unwrap();
        let i = Shape::from_function("I", "t*exp(-t/tau_s)", "t", 100, 4).unwrap();
        let sys = SystemOfShapes::from_shapes(vec![v, i]);
        let solver = sys.compute_propagator("__h").unwrap();

        let vars = ["tau", "tau_s", "C_m", "__h"];
        let values = [10.0, 2.0, 250.0, 0.1];
        let a_num = sys.A.evaluate(&vars, &values);
        let reference = numeric_expm(&(a_num * 0.1), 25);

        let n = sys.state_variables.len();
        for row in 0..n {
            for col in 0..n {
                let name = format!(
                    "__P__{}__{}",
                    sys.state_variables[row], sys.state_variables[col]
                );
                let p_num = match solver.propagators.get(&name) {
                    Some(p) => p.eval_expression(&vars, &values),
                    None => 0.0,
                };
                assert_relative_eq!(
                    p_num,
                    reference[(row, col)],
                    epsilon = 1e-9,
                    max_relative = 1e-9
                );
            }
        }
    }

    #[test]
    fn test_mutually_coupled_pair() {
        // two first-order shapes feeding each other form one 2x2 component
        let known = vec!["u".to_string(), "w".to_string()];
        let u = Shape::from_ode("u", "-2*u + w", &ivs(&[("u", "1")]), &known)
            .unwrap();
        let w = Shape::from_ode("w", "u - 3*w", &ivs(&[("w", "0")]), &known)
            .unwrap();
        let sys = SystemOfShapes::from_shapes(vec![u, w]);
        let solver = sys.compute_propagator("__h").unwrap();
        assert_eq!(solver.propagators.len(), 4);

        let vars = ["__h"];
        let values = [0.05];
        let a_num = sys.A.evaluate(&vars, &values);
        let reference = numeric_expm(&(a_num * 0.05), 25);
        for (row, rsym) in sys.state_variables.iter().enumerate() {
            for (col, csym) in sys.state_variables.iter().enumerate() {
                let name = format!("__P__{}__{}", rsym, csym);
                let p_num = solver
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
}
