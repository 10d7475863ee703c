//! Analytical differentiation, variable extraction and direct numeric
//! evaluation for the symbolic engine. Differentiation implements the standard
//! calculus rules (power rule, product rule, quotient rule, chain rule) for
//! every operator the engine carries; the power rule covers symbolic exponents
//! through the logarithmic form d(b^e) = b^e * (e' * ln b + e * b'/b).

use crate::symbolic::symbolic_engine::Expr;

impl Expr {
    /// DIFFERENTIATION

    /// Computes the analytical derivative of the expression with respect to a
    /// variable. For multivariable expressions this is the partial derivative.
    ///
    /// # Examples
    /// ```rust, ignore
    /// let f = Expr::parse_expression("t*exp(-t/tau)");
    /// let df_dt = f.diff("t");
    /// ```
    pub fn diff(&self, var: &str) -> Expr {
        match self {
            Expr::Var(name) => {
                if name == var {
                    Expr::Const(1.0)
                } else {
                    Expr::Const(0.0)
                }
            }
            Expr::Const(_) => Expr::Const(0.0),
            Expr::Add(lhs, rhs) => Expr::Add(Box::new(lhs.diff(var)), Box::new(rhs.diff(var))),
            Expr::Sub(lhs, rhs) => Expr::Sub(Box::new(lhs.diff(var)), Box::new(rhs.diff(var))),
            Expr::Mul(lhs, rhs) => Expr::Add(
                Box::new(Expr::Mul(Box::new(lhs.diff(var)), rhs.clone())),
                Box::new(Expr::Mul(lhs.clone(), Box::new(rhs.diff(var)))),
            ),
            Expr::Div(lhs, rhs) => Expr::Div(
                Box::new(Expr::Sub(
                    Box::new(Expr::Mul(Box::new(lhs.diff(var)), rhs.clone())),
                    Box::new(Expr::Mul(Box::new(rhs.diff(var)), lhs.clone())),
                )),
                Box::new(Expr::Mul(rhs.clone(), rhs.clone())),
            ),
            Expr::Pow(base, exp) => {
                if !exp.contains_variable(var) {
                    // constant exponent: n * base^(n-1) * base'
                    Expr::Mul(
                        Box::new(Expr::Mul(
                            exp.clone(),
                            Box::new(Expr::Pow(
                                base.clone(),
                                Box::new(Expr::Sub(exp.clone(), Box::new(Expr::Const(1.0)))),
                            )),
                        )),
                        Box::new(base.diff(var)),
                    )
                } else {
                    // general case: b^e * (e' * ln(b) + e * b'/b)
                    Expr::Mul(
                        Box::new(self.clone()),
                        Box::new(Expr::Add(
                            Box::new(Expr::Mul(
                                Box::new(exp.diff(var)),
                                Box::new(Expr::Ln(base.clone())),
                            )),
                            Box::new(Expr::Div(
                                Box::new(Expr::Mul(exp.clone(), Box::new(base.diff(var)))),
                                base.clone(),
                            )),
                        )),
                    )
                }
            }
            Expr::Exp(arg) => {
                Expr::Mul(Box::new(Expr::Exp(arg.clone())), Box::new(arg.diff(var)))
            }
            Expr::Ln(arg) => Expr::Div(Box::new(arg.diff(var)), arg.clone()),
            Expr::sin(arg) => {
                Expr::Mul(Box::new(Expr::cos(arg.clone())), Box::new(arg.diff(var)))
            }
            Expr::cos(arg) => Expr::Mul(
                Box::new(Expr::Mul(
                    Box::new(Expr::Const(-1.0)),
                    Box::new(Expr::sin(arg.clone())),
                )),
                Box::new(arg.diff(var)),
            ),
            Expr::tg(arg) => Expr::Mul(
                Box::new(Expr::Div(
                    Box::new(Expr::Const(1.0)),
                    Box::new(Expr::Pow(
                        Box::new(Expr::cos(arg.clone())),
                        Box::new(Expr::Const(2.0)),
                    )),
                )),
                Box::new(arg.diff(var)),
            ),
            Expr::ctg(arg) => Expr::Mul(
                Box::new(Expr::Div(
                    Box::new(Expr::Const(-1.0)),
                    Box::new(Expr::Pow(
                        Box::new(Expr::sin(arg.clone())),
                        Box::new(Expr::Const(2.0)),
                    )),
                )),
                Box::new(arg.diff(var)),
            ),
            Expr::arcsin(arg) => Expr::Div(
                Box::new(arg.diff(var)),
                Box::new(Expr::Pow(
                    Box::new(Expr::Sub(
                        Box::new(Expr::Const(1.0)),
                        Box::new(Expr::Pow(arg.clone(), Box::new(Expr::Const(2.0)))),
                    )),
                    Box::new(Expr::Const(0.5)),
                )),
            ),
            Expr::arccos(arg) => Expr::Div(
                Box::new(Expr::Mul(
                    Box::new(Expr::Const(-1.0)),
                    Box::new(arg.diff(var)),
                )),
                Box::new(Expr::Pow(
                    Box::new(Expr::Sub(
                        Box::new(Expr::Const(1.0)),
                        Box::new(Expr::Pow(arg.clone(), Box::new(Expr::Const(2.0)))),
                    )),
                    Box::new(Expr::Const(0.5)),
                )),
            ),
            Expr::arctg(arg) => Expr::Div(
                Box::new(arg.diff(var)),
                Box::new(Expr::Add(
                    Box::new(Expr::Const(1.0)),
                    Box::new(Expr::Pow(arg.clone(), Box::new(Expr::Const(2.0)))),
                )),
            ),
            Expr::arcctg(arg) => Expr::Div(
                Box::new(Expr::Mul(
                    Box::new(Expr::Const(-1.0)),
                    Box::new(arg.diff(var)),
                )),
                Box::new(Expr::Add(
                    Box::new(Expr::Const(1.0)),
                    Box::new(Expr::Pow(arg.clone(), Box::new(Expr::Const(2.0)))),
                )),
            ),
            Expr::sinh(arg) => {
                Expr::Mul(Box::new(Expr::cosh(arg.clone())), Box::new(arg.diff(var)))
            }
            Expr::cosh(arg) => {
                Expr::Mul(Box::new(Expr::sinh(arg.clone())), Box::new(arg.diff(var)))
            }
            Expr::tanh(arg) => Expr::Mul(
                Box::new(Expr::Sub(
                    Box::new(Expr::Const(1.0)),
                    Box::new(Expr::Pow(
                        Box::new(Expr::tanh(arg.clone())),
                        Box::new(Expr::Const(2.0)),
                    )),
                )),
                Box::new(arg.diff(var)),
            ),
        }
    } // end of diff

    /// Computes the n-th derivative with respect to one variable, simplifying
    /// between steps to keep the intermediate trees small.
    pub fn n_th_derivative(&self, var_name: &str, n: usize) -> Expr {
        let mut expr = self.clone();
        for _ in 0..n {
            expr = expr.diff(var_name).simplify();
        }
        expr
    }

    /// Extracts all unique variable names from the symbolic expression.
    /// Returns a sorted, deduplicated list.
    ///
    /// # Examples
    /// ```rust, ignore
    /// let expr = Expr::parse_expression("V/tau + V*I");
    /// assert_eq!(expr.all_arguments_are_variables(), vec!["I", "V", "tau"]);
    /// ```
    pub fn all_arguments_are_variables(&self) -> Vec<String> {
        let mut vars = Vec::new();
        self.collect_variables(&mut vars);
        vars.sort();
        vars.dedup();
        vars
    }

    fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Var(name) => out.push(name.clone()),
            Expr::Const(_) => {}
            Expr::Add(lhs, rhs)
            | Expr::Sub(lhs, rhs)
            | Expr::Mul(lhs, rhs)
            | Expr::Div(lhs, rhs)
            | Expr::Pow(lhs, rhs) => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            _ => {
                let (_, arg) = self.unary_parts().expect("all n-ary variants matched above");
                arg.collect_variables(out);
            }
        }
    }

    /// DIRECT EXPRESSION EVALUATION

    /// Evaluates the expression numerically with the given variable bindings.
    /// Variables are matched positionally: `vars[i]` takes the value
    /// `values[i]`. Unbound variables evaluate to NaN (and are reported by the
    /// caller through other means); this mirrors one-shot evaluation without
    /// building a closure.
    pub fn eval_expression(&self, vars: &[&str], values: &[f64]) -> f64 {
        match self {
            Expr::Var(name) => match vars.iter().position(|v| v == name) {
                Some(index) => values[index],
                None => f64::NAN,
            },
            Expr::Const(val) => *val,
            Expr::Add(lhs, rhs) => {
                lhs.eval_expression(vars, values) + rhs.eval_expression(vars, values)
            }
            Expr::Sub(lhs, rhs) => {
                lhs.eval_expression(vars, values) - rhs.eval_expression(vars, values)
            }
            Expr::Mul(lhs, rhs) => {
                lhs.eval_expression(vars, values) * rhs.eval_expression(vars, values)
            }
            Expr::Div(lhs, rhs) => {
                lhs.eval_expression(vars, values) / rhs.eval_expression(vars, values)
            }
            Expr::Pow(base, exp) => base
                .eval_expression(vars, values)
                .powf(exp.eval_expression(vars, values)),
            _ => {
                let (name, arg) = self.unary_parts().expect("all n-ary variants matched above");
                let x = arg.eval_expression(vars, values);
                match name {
                    "exp" => x.exp(),
                    "ln" => x.ln(),
                    "sin" => x.sin(),
                    "cos" => x.cos(),
                    "tg" => x.tan(),
                    "ctg" => 1.0 / x.tan(),
                    "arcsin" => x.asin(),
                    "arccos" => x.acos(),
                    "arctg" => x.atan(),
                    "arcctg" => std::f64::consts::FRAC_PI_2 - x.atan(),
                    "sinh" => x.sinh(),
                    "cosh" => x.cosh(),
                    "tanh" => x.tanh(),
                    _ => unreachable!(),
                }
            }
        }
    } // end of eval_expression
}
