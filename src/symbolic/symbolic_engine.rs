//! # Symbolic Engine Module
//!
//! Core symbolic expression type for the shape analysis framework. Expressions
//! are immutable trees over named variables, numeric constants and the operator
//! set {+, -, *, /, ^, exp, log, trigonometric, hyperbolic}. Every
//! transformation (substitution, differentiation, simplification) produces a
//! new value; nothing is mutated in place.
//!
//! ## Main Structures and Methods
//!
//! ### `Expr` Enum
//! The core symbolic expression type supporting:
//! - **Variables**: `Var(String)` - symbolic variables like "V_m", "tau_syn"
//! - **Constants**: `Const(f64)` - numerical constants
//! - **Operations**: `Add`, `Sub`, `Mul`, `Div`, `Pow` - basic arithmetic
//! - **Functions**: `Exp`, `Ln`, `sin`, `cos`, `sinh`, ... - mathematical functions
//!
//! ### Key Methods
//! - `Symbols(symbols: &str)` - Create multiple variables from comma-separated string
//! - `diff(var: &str)` - Analytical differentiation (see symbolic_engine_derivatives)
//! - `simplify()` / `is_identically_zero()` - canonical form and exact zero test
//!   (see symbolic_simplify)
//! - `set_variable()` / `substitute_variable()` - substitution by value or expression

#![allow(non_camel_case_types)]

use std::collections::HashMap;
use std::fmt;

/// Core symbolic expression enum representing mathematical expressions as an
/// abstract syntax tree. Uses Box<Expr> for recursive structure, allowing
/// arbitrarily deep expression trees.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Symbolic variable with a name (e.g., "V_m", "tau", "t")
    Var(String),
    /// Numerical constant value
    Const(f64),
    /// Addition operation: left + right
    Add(Box<Expr>, Box<Expr>),
    /// Subtraction operation: left - right
    Sub(Box<Expr>, Box<Expr>),
    /// Multiplication operation: left * right
    Mul(Box<Expr>, Box<Expr>),
    /// Division operation: left / right
    Div(Box<Expr>, Box<Expr>),
    /// Power operation: base ^ exponent
    Pow(Box<Expr>, Box<Expr>),
    /// Exponential function: e^x
    Exp(Box<Expr>),
    /// Natural logarithm: ln(x)
    Ln(Box<Expr>),
    /// Sine function
    sin(Box<Expr>),
    /// Cosine function
    cos(Box<Expr>),
    /// Tangent function - mathematical notation 'tg'
    tg(Box<Expr>),
    /// Cotangent function - mathematical notation 'ctg'
    ctg(Box<Expr>),
    /// Arcsine function
    arcsin(Box<Expr>),
    /// Arccosine function
    arccos(Box<Expr>),
    /// Arctangent function - mathematical notation 'arctg'
    arctg(Box<Expr>),
    /// Arccotangent function - mathematical notation 'arcctg'
    arcctg(Box<Expr>),
    /// Hyperbolic sine
    sinh(Box<Expr>),
    /// Hyperbolic cosine
    cosh(Box<Expr>),
    /// Hyperbolic tangent
    tanh(Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Const(val) => write!(f, "{}", val),
            Expr::Add(lhs, rhs) => write!(f, "({} + {})", lhs, rhs),
            Expr::Sub(lhs, rhs) => write!(f, "({} - {})", lhs, rhs),
            Expr::Mul(lhs, rhs) => write!(f, "({} * {})", lhs, rhs),
            Expr::Div(lhs, rhs) => write!(f, "({} / {})", lhs, rhs),
            Expr::Pow(base, exp) => write!(f, "({} ^ {})", base, exp),
            _ => {
                let (name, arg) = self.unary_parts().expect("all n-ary variants matched above");
                write!(f, "{}({})", name, arg)
            }
        }
    }
}

impl std::ops::Add for Expr {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Expr::Add(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Sub for Expr {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Expr::Sub(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Mul for Expr {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Expr::Mul(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Div for Expr {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Expr::Div(self.boxed(), rhs.boxed())
    }
}

impl std::ops::AddAssign for Expr {
    fn add_assign(&mut self, rhs: Self) {
        *self = Expr::Add(Box::new(self.clone()), Box::new(rhs));
    }
}

impl std::ops::SubAssign for Expr {
    fn sub_assign(&mut self, rhs: Self) {
        *self = Expr::Sub(Box::new(self.clone()), Box::new(rhs));
    }
}

impl std::ops::MulAssign for Expr {
    fn mul_assign(&mut self, rhs: Self) {
        *self = Expr::Mul(Box::new(self.clone()), Box::new(rhs));
    }
}

impl std::ops::Neg for Expr {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Expr::Mul(Box::new(Expr::Const(-1.0)), Box::new(self))
    }
}

impl Expr {
    /// BASIC FEATURES

    /// Creates multiple symbolic variables from a comma-separated string.
    ///
    /// # Examples
    /// ```rust, ignore
    /// let vars = Expr::Symbols("V, I_syn, tau");
    /// assert_eq!(vars.len(), 3);
    /// ```
    pub fn Symbols(symbols: &str) -> Vec<Expr> {
        symbols
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| Expr::Var(s.to_string()))
            .collect()
    }

    /// Convenience method to wrap expression in Box for recursive structures.
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    /// Creates exponential function e^(self).
    pub fn exp(self) -> Expr {
        Expr::Exp(self.boxed())
    }

    /// Creates natural logarithm ln(self).
    pub fn ln(self) -> Expr {
        Expr::Ln(self.boxed())
    }

    /// Creates power expression self^rhs.
    pub fn pow(self, rhs: Expr) -> Expr {
        Expr::Pow(self.boxed(), rhs.boxed())
    }

    /// Checks if expression is syntactically the constant zero. For the exact
    /// semantic test use `is_identically_zero` from the simplification module.
    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(val) if *val == 0.0)
    }

    /// Function name and argument for the single-argument function variants,
    /// None for variables, constants and binary operations.
    pub fn unary_parts(&self) -> Option<(&'static str, &Expr)> {
        match self {
            Expr::Exp(a) => Some(("exp", a)),
            Expr::Ln(a) => Some(("ln", a)),
            Expr::sin(a) => Some(("sin", a)),
            Expr::cos(a) => Some(("cos", a)),
            Expr::tg(a) => Some(("tg", a)),
            Expr::ctg(a) => Some(("ctg", a)),
            Expr::arcsin(a) => Some(("arcsin", a)),
            Expr::arccos(a) => Some(("arccos", a)),
            Expr::arctg(a) => Some(("arctg", a)),
            Expr::arcctg(a) => Some(("arcctg", a)),
            Expr::sinh(a) => Some(("sinh", a)),
            Expr::cosh(a) => Some(("cosh", a)),
            Expr::tanh(a) => Some(("tanh", a)),
            _ => None,
        }
    }

    /// Rebuilds a single-argument function variant from its name. The name must
    /// come from `unary_parts` (or the parser's function table).
    pub fn rebuild_unary(name: &str, arg: Expr) -> Expr {
        match name {
            "exp" => Expr::Exp(arg.boxed()),
            "ln" => Expr::Ln(arg.boxed()),
            "sin" => Expr::sin(arg.boxed()),
            "cos" => Expr::cos(arg.boxed()),
            "tg" => Expr::tg(arg.boxed()),
            "ctg" => Expr::ctg(arg.boxed()),
            "arcsin" => Expr::arcsin(arg.boxed()),
            "arccos" => Expr::arccos(arg.boxed()),
            "arctg" => Expr::arctg(arg.boxed()),
            "arcctg" => Expr::arcctg(arg.boxed()),
            "sinh" => Expr::sinh(arg.boxed()),
            "cosh" => Expr::cosh(arg.boxed()),
            "tanh" => Expr::tanh(arg.boxed()),
            _ => panic!("unknown unary function name: {}", name),
        }
    }

    /// Rebuilds the expression with every direct child replaced by
    /// `f(child)`. Leaves (variables, constants) are returned unchanged.
    /// The workhorse behind the substitution family below.
    pub fn map_children<F>(&self, f: &F) -> Expr
    where
        F: Fn(&Expr) -> Expr,
    {
        match self {
            Expr::Var(_) | Expr::Const(_) => self.clone(),
            Expr::Add(lhs, rhs) => Expr::Add(Box::new(f(lhs)), Box::new(f(rhs))),
            Expr::Sub(lhs, rhs) => Expr::Sub(Box::new(f(lhs)), Box::new(f(rhs))),
            Expr::Mul(lhs, rhs) => Expr::Mul(Box::new(f(lhs)), Box::new(f(rhs))),
            Expr::Div(lhs, rhs) => Expr::Div(Box::new(f(lhs)), Box::new(f(rhs))),
            Expr::Pow(base, exp) => Expr::Pow(Box::new(f(base)), Box::new(f(exp))),
            _ => {
                let (name, arg) = self.unary_parts().expect("all n-ary variants matched above");
                Expr::rebuild_unary(name, f(arg))
            }
        }
    }

    /// Substitutes a variable with a constant value throughout the expression.
    ///
    /// # Arguments
    /// * `var` - Name of the variable to substitute
    /// * `value` - Numerical value to substitute for the variable
    pub fn set_variable(&self, var: &str, value: f64) -> Expr {
        match self {
            Expr::Var(name) if name == var => Expr::Const(value),
            _ => self.map_children(&|child| child.set_variable(var, value)),
        }
    }

    /// Substitutes multiple variables with constant values using a HashMap.
    /// Only variables present in the map are substituted.
    pub fn set_variable_from_map(&self, var_map: &HashMap<String, f64>) -> Expr {
        match self {
            Expr::Var(name) if var_map.contains_key(name) => Expr::Const(var_map[name]),
            _ => self.map_children(&|child| child.set_variable_from_map(var_map)),
        }
    }

    /// Substitutes a variable with an expression.
    pub fn substitute_variable(&self, var: &str, replacement: &Expr) -> Expr {
        match self {
            Expr::Var(name) if name == var => replacement.clone(),
            _ => self.map_children(&|child| child.substitute_variable(var, replacement)),
        }
    }

    /// Renames variables according to a map of old name -> new name.
    pub fn rename_variables(&self, var_map: &HashMap<String, String>) -> Expr {
        match self {
            Expr::Var(name) if var_map.contains_key(name) => Expr::Var(var_map[name].clone()),
            _ => self.map_children(&|child| child.rename_variables(var_map)),
        }
    }

    /// Checks whether the expression contains a variable with the given name.
    pub fn contains_variable(&self, var_name: &str) -> bool {
        match self {
            Expr::Var(name) => name == var_name,
            Expr::Const(_) => false,
            Expr::Add(lhs, rhs)
            | Expr::Sub(lhs, rhs)
            | Expr::Mul(lhs, rhs)
            | Expr::Div(lhs, rhs)
            | Expr::Pow(lhs, rhs) => {
                lhs.contains_variable(var_name) || rhs.contains_variable(var_name)
            }
            _ => {
                let (_, arg) = self.unary_parts().expect("all n-ary variants matched above");
                arg.contains_variable(var_name)
            }
        }
    }
}

/// Macro to create symbolic variables from a comma-separated list
/// Usage: symbols!(x, y, z) -> creates variables x, y, z
#[macro_export]
macro_rules! symbols {
    ($($var:ident),+ $(,)?) => {
        {
            let var_names = stringify!($($var),+);
            let vars = Expr::Symbols(var_names);
            let mut iter = vars.into_iter();
            ($(
                {
                    let $var = iter.next().unwrap();
                    $var
                }
            ),+)
        }
    };
}
