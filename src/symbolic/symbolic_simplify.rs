//! # Symbolic Expression Simplification Module
//!
//! Two complementary tiers of simplification:
//!
//! 1. `simplify_()` - a cheap local rewrite pass: constant folding, algebraic
//!    identities (x + 0 = x, x * 1 = x, x^0 = 1, ...), power rules. Used by
//!    the symbolic linear algebra internals where full canonicalization would
//!    be wasted work.
//! 2. `simplify()` / `is_identically_zero()` - the canonical rational normal
//!    form: the expression is expanded and collected into a sum of monomials
//!    over *atoms* (variables, function applications, irreducible sums in
//!    denominators or under fractional powers) with exact rational
//!    coefficients. Two expressions are equal iff their normal forms are; an
//!    expression is zero iff its normal form has no terms.
//!
//! The normal form is what the rest of the crate stands on: ODE order
//! inference has to prove residuals like x'' + 2/tau*x' + x/tau^2 identically
//! zero, which requires exact coefficient arithmetic (num::BigRational, never
//! floating point cancellation) and cancellation of exponential factors.
//! Exponential atoms are therefore content-normalized: exp(-2*t/tau) is
//! carried as exp(t/tau)^-2, so products and quotients of exponentials cancel
//! through ordinary exponent arithmetic.

use crate::symbolic::symbolic_engine::Expr;
use itertools::Itertools;
use num::BigInt;
use num::BigRational;
use num::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::collections::{BTreeMap, HashMap};

pub(crate) type Coeff = BigRational;

/// Sums raised to an integer power at most this large are expanded
/// distributively; larger powers stay atomic.
const EXPAND_POW_LIMIT: i64 = 8;

/// One multiplicative factor of a monomial: an atomic base expression raised
/// to an exact rational exponent.
#[derive(Clone, Debug)]
struct Factor {
    base: Expr,
    exp: Coeff,
}

/// Product of factors, keyed by the canonical rendering of each base.
#[derive(Clone, Debug, Default)]
struct Monomial {
    factors: BTreeMap<String, Factor>,
}

impl Monomial {
    fn key(&self) -> String {
        self.factors
            .iter()
            .map(|(k, f)| format!("{}^{}", k, f.exp))
            .join("*")
    }

    fn insert(&mut self, f: Factor) {
        if f.exp.is_zero() {
            return;
        }
        let key = format!("{}", f.base);
        match self.factors.get_mut(&key) {
            Some(existing) => {
                existing.exp += f.exp;
                if existing.exp.is_zero() {
                    self.factors.remove(&key);
                }
            }
            None => {
                self.factors.insert(key, f);
            }
        }
    }

    fn inverse(&self) -> Monomial {
        let mut out = Monomial::default();
        for f in self.factors.values() {
            out.insert(Factor {
                base: f.base.clone(),
                exp: -f.exp.clone(),
            });
        }
        out
    }
}

/// Sum of monomials with exact rational coefficients, keyed by monomial key.
#[derive(Clone, Debug, Default)]
pub(crate) struct NormalSum {
    terms: BTreeMap<String, (Monomial, Coeff)>,
}

impl NormalSum {
    fn zero() -> Self {
        NormalSum::default()
    }

    fn one() -> Self {
        NormalSum::constant(Coeff::one())
    }

    fn constant(c: Coeff) -> Self {
        let mut out = NormalSum::zero();
        out.add_term(Monomial::default(), c);
        out
    }

    pub(crate) fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    fn add_term(&mut self, m: Monomial, c: Coeff) {
        if c.is_zero() {
            return;
        }
        let key = m.key();
        match self.terms.get_mut(&key) {
            Some((_, existing)) => {
                *existing += c;
                if existing.is_zero() {
                    self.terms.remove(&key);
                }
            }
            None => {
                self.terms.insert(key, (m, c));
            }
        }
    }

    fn add_assign(&mut self, other: NormalSum) {
        for (_, (m, c)) in other.terms {
            self.add_term(m, c);
        }
    }

    fn scale(&self, c: &Coeff) -> NormalSum {
        if c.is_zero() {
            return NormalSum::zero();
        }
        let mut out = NormalSum::zero();
        for (m, tc) in self.terms.values() {
            out.add_term(m.clone(), tc.clone() * c.clone());
        }
        out
    }

    fn mul(&self, other: &NormalSum) -> NormalSum {
        let mut out = NormalSum::zero();
        for (ma, ca) in self.terms.values() {
            for (mb, cb) in other.terms.values() {
                let mut merged = ma.clone();
                for f in mb.factors.values() {
                    merged.insert(f.clone());
                }
                out.add_assign(normalize_monomial(merged, ca.clone() * cb.clone()));
            }
        }
        out
    }

    fn pow_int(&self, n: i64) -> NormalSum {
        let mut out = NormalSum::one();
        for _ in 0..n {
            out = out.mul(self);
        }
        out
    }

    fn as_constant(&self) -> Option<Coeff> {
        if self.terms.is_empty() {
            return Some(Coeff::zero());
        }
        if self.terms.len() == 1 {
            let (m, c) = self.terms.values().next().unwrap();
            if m.factors.is_empty() {
                return Some(c.clone());
            }
        }
        None
    }

    fn single_monomial(&self) -> Option<(Monomial, Coeff)> {
        if self.terms.len() == 1 {
            let (m, c) = self.terms.values().next().unwrap();
            Some((m.clone(), c.clone()))
        } else {
            None
        }
    }
}

fn coeff_pow(c: &Coeff, n: i64) -> Coeff {
    let mut result = Coeff::one();
    let mut base = if n < 0 { c.recip() } else { c.clone() };
    let mut k = n.unsigned_abs();
    while k > 0 {
        if k & 1 == 1 {
            result = result * base.clone();
        }
        base = base.clone() * base.clone();
        k >>= 1;
    }
    result
}

fn coeff_from_f64(v: f64) -> Option<Coeff> {
    BigRational::from_float(v)
}

fn coeff_to_expr(c: &Coeff) -> Expr {
    let num = c.numer();
    let den = c.denom();
    let num_f = num.to_f64().unwrap_or(f64::INFINITY);
    if den.is_one() {
        return Expr::Const(num_f);
    }
    let den_f = den.to_f64().unwrap_or(f64::INFINITY);
    let direct = c.to_f64().unwrap_or(f64::INFINITY);
    // prefer a plain constant when it round-trips exactly
    if coeff_from_f64(direct).as_ref() == Some(c) {
        Expr::Const(direct)
    } else {
        Expr::Div(Box::new(Expr::Const(num_f)), Box::new(Expr::Const(den_f)))
    }
}

/// Signed coefficient content of a sum: gcd of the coefficients, carrying the
/// sign of the lexicographically first term so that primitives have a
/// positive leading coefficient.
fn content(ns: &NormalSum) -> Coeff {
    let mut num_gcd = BigInt::zero();
    let mut den_lcm = BigInt::one();
    let mut first_negative = false;
    for (i, (_, c)) in ns.terms.values().enumerate() {
        if i == 0 {
            first_negative = c.is_negative();
        }
        num_gcd = num_gcd.gcd(&c.numer().abs());
        den_lcm = den_lcm.lcm(c.denom());
    }
    if num_gcd.is_zero() {
        return Coeff::one();
    }
    let g = Coeff::new(num_gcd, den_lcm);
    if first_negative { -g } else { g }
}

/// Splits a multi-term sum into signed content, the common monomial of all
/// terms, and the reduced primitive remainder.
fn factor_sum(ns: &NormalSum) -> (Coeff, Monomial, NormalSum) {
    let g = content(ns);
    let mut common = Monomial::default();
    let mut terms = ns.terms.values();
    if let Some((m0, _)) = terms.next() {
        for f0 in m0.factors.values() {
            let key = format!("{}", f0.base);
            let mut min_exp = Some(f0.exp.clone());
            for (m, _) in ns.terms.values().skip(1) {
                match m.factors.get(&key) {
                    Some(f) => {
                        if f.exp < *min_exp.as_ref().unwrap() {
                            min_exp = Some(f.exp.clone());
                        }
                    }
                    None => {
                        min_exp = None;
                        break;
                    }
                }
            }
            if let Some(e) = min_exp {
                common.insert(Factor {
                    base: f0.base.clone(),
                    exp: e,
                });
            }
        }
    }
    let ginv = g.recip();
    let common_inv = common.inverse();
    let mut reduced = NormalSum::zero();
    for (m, c) in ns.terms.values() {
        let mut rm = m.clone();
        for f in common_inv.factors.values() {
            rm.insert(f.clone());
        }
        reduced.add_term(rm, c.clone() * ginv.clone());
    }
    (g, common, reduced)
}

/// Canonicalizes a raw monomial: merges exponential factors into a single
/// content-normalized exponential atom, and expands positive integer powers
/// of sum atoms distributively. May therefore return a multi-term sum.
fn normalize_monomial(m: Monomial, c: Coeff) -> NormalSum {
    if c.is_zero() {
        return NormalSum::zero();
    }

    // merge every exponential factor into one combined argument
    let mut exp_arg = NormalSum::zero();
    let mut rest = Monomial::default();
    let mut saw_exp = false;
    for f in m.factors.values() {
        if let Expr::Exp(arg) = &f.base {
            saw_exp = true;
            exp_arg.add_assign(normalize(arg).scale(&f.exp));
        } else {
            rest.insert(f.clone());
        }
    }
    if saw_exp && !exp_arg.is_zero() {
        let g = content(&exp_arg);
        let primitive = reconstruct(&exp_arg.scale(&g.recip()));
        rest.insert(Factor {
            base: Expr::Exp(primitive.boxed()),
            exp: g,
        });
    }

    // expand positive integer powers of sums
    let mut expandable: Vec<(Expr, i64)> = Vec::new();
    let mut kept = Monomial::default();
    for f in rest.factors.values() {
        let is_sum = matches!(f.base, Expr::Add(_, _) | Expr::Sub(_, _));
        let int_exp = if f.exp.is_integer() {
            f.exp.to_integer().to_i64()
        } else {
            None
        };
        match (is_sum, int_exp) {
            (true, Some(n)) if n >= 1 && n <= EXPAND_POW_LIMIT => {
                expandable.push((f.base.clone(), n))
            }
            _ => kept.insert(f.clone()),
        }
    }
    if expandable.is_empty() {
        let mut out = NormalSum::zero();
        out.add_term(kept, c);
        return out;
    }
    let mut out = NormalSum::zero();
    out.add_term(kept, c);
    for (base, n) in expandable {
        out = out.mul(&normalize(&base).pow_int(n));
    }
    out
}

/// Division of two normal sums, preferring exact quotients: a monomial
/// denominator divides directly, a polynomial denominator is tried for exact
/// multivariate division, and only irreducible remainders become inverse
/// atoms.
fn div_sums(na: NormalSum, nb: NormalSum) -> NormalSum {
    if nb.is_zero() {
        // undefined; keep the division around as an opaque atom
        let mut m = Monomial::default();
        m.insert(Factor {
            base: Expr::Div(reconstruct(&na).boxed(), Expr::Const(0.0).boxed()),
            exp: Coeff::one(),
        });
        let mut out = NormalSum::zero();
        out.add_term(m, Coeff::one());
        return out;
    }
    if let Some((m, c)) = nb.single_monomial() {
        let mut inv = NormalSum::zero();
        inv.add_term(m.inverse(), c.recip());
        return na.mul(&inv);
    }
    if let Some(q) = try_div(&na, &nb) {
        return q;
    }
    let (g, common, reduced) = factor_sum(&nb);
    let mut inv = Monomial::default();
    for f in common.inverse().factors.values() {
        inv.insert(f.clone());
    }
    inv.insert(Factor {
        base: reconstruct(&reduced),
        exp: -Coeff::one(),
    });
    let mut inv_sum = NormalSum::zero();
    inv_sum.add_term(inv, g.recip());
    na.mul(&inv_sum)
}

/// Exact multivariate polynomial division; None when the quotient is not a
/// finite sum of monomials within the step bound.
fn try_div(num: &NormalSum, den: &NormalSum) -> Option<NormalSum> {
    let (dm, dc) = den.terms.values().next().map(|(m, c)| (m.clone(), c.clone()))?;
    let dm_inv = dm.inverse();
    let mut rem = num.clone();
    let mut quot = NormalSum::zero();
    let max_steps = 8 * (num.terms.len() + den.terms.len()) + 16;
    let mut steps = 0;
    while !rem.is_zero() {
        steps += 1;
        if steps > max_steps {
            return None;
        }
        let (rm, rc) = {
            let (m, c) = rem.terms.values().next().unwrap();
            (m.clone(), c.clone())
        };
        let mut qm = rm;
        for f in dm_inv.factors.values() {
            qm.insert(f.clone());
        }
        let q = normalize_monomial(qm, rc * dc.recip());
        quot.add_assign(q.clone());
        rem.add_assign(q.mul(den).scale(&-Coeff::one()));
    }
    Some(quot)
}

fn atom(base: Expr) -> NormalSum {
    let mut m = Monomial::default();
    m.insert(Factor {
        base,
        exp: Coeff::one(),
    });
    let mut out = NormalSum::zero();
    out.add_term(m, Coeff::one());
    out
}

fn pow_const(base: &Expr, k: &Coeff) -> NormalSum {
    if k.is_zero() {
        return NormalSum::one();
    }
    if k.is_one() {
        return normalize(base);
    }
    let nb = normalize(base);
    if k.is_integer() {
        if let Some(n) = k.to_integer().to_i64() {
            if n > 0 {
                if let Some((m, c)) = nb.single_monomial() {
                    let mut pm = Monomial::default();
                    for f in m.factors.values() {
                        pm.insert(Factor {
                            base: f.base.clone(),
                            exp: f.exp.clone() * k.clone(),
                        });
                    }
                    return normalize_monomial(pm, coeff_pow(&c, n));
                }
                if n <= EXPAND_POW_LIMIT {
                    return nb.pow_int(n);
                }
                let (g, common, reduced) = factor_sum(&nb);
                let mut pm = Monomial::default();
                for f in common.factors.values() {
                    pm.insert(Factor {
                        base: f.base.clone(),
                        exp: f.exp.clone() * k.clone(),
                    });
                }
                pm.insert(Factor {
                    base: reconstruct(&reduced),
                    exp: k.clone(),
                });
                return normalize_monomial(pm, coeff_pow(&g, n));
            } else {
                let pos = pow_const(base, &-k.clone());
                return div_sums(NormalSum::one(), pos);
            }
        }
    }
    // fractional exponent
    if let Some(c) = nb.as_constant() {
        if c.is_one() {
            return NormalSum::one();
        }
    }
    if let Some((m, c)) = nb.single_monomial() {
        if c.is_one() && !m.factors.is_empty() {
            let mut pm = Monomial::default();
            for f in m.factors.values() {
                pm.insert(Factor {
                    base: f.base.clone(),
                    exp: f.exp.clone() * k.clone(),
                });
            }
            return normalize_monomial(pm, Coeff::one());
        }
    }
    let mut m = Monomial::default();
    m.insert(Factor {
        base: reconstruct(&nb),
        exp: k.clone(),
    });
    let mut out = NormalSum::zero();
    out.add_term(m, Coeff::one());
    out
}

pub(crate) fn normalize(expr: &Expr) -> NormalSum {
    match expr {
        Expr::Var(_) => atom(expr.clone()),
        Expr::Const(c) => match coeff_from_f64(*c) {
            Some(r) => {
                if r.is_zero() {
                    NormalSum::zero()
                } else {
                    NormalSum::constant(r)
                }
            }
            None => atom(expr.clone()),
        },
        Expr::Add(a, b) => {
            let mut na = normalize(a);
            na.add_assign(normalize(b));
            na
        }
        Expr::Sub(a, b) => {
            let mut na = normalize(a);
            na.add_assign(normalize(b).scale(&-Coeff::one()));
            na
        }
        Expr::Mul(a, b) => normalize(a).mul(&normalize(b)),
        Expr::Div(a, b) => div_sums(normalize(a), normalize(b)),
        Expr::Pow(base, exp) => {
            let ne = normalize(exp);
            match ne.as_constant() {
                Some(k) => pow_const(base, &k),
                None => atom(Expr::Pow(
                    reconstruct(&normalize(base)).boxed(),
                    reconstruct(&ne).boxed(),
                )),
            }
        }
        Expr::Exp(arg) => {
            let na = normalize(arg);
            if na.is_zero() {
                return NormalSum::one();
            }
            let g = content(&na);
            let primitive = reconstruct(&na.scale(&g.recip()));
            let mut m = Monomial::default();
            m.insert(Factor {
                base: Expr::Exp(primitive.boxed()),
                exp: g,
            });
            let mut out = NormalSum::zero();
            out.add_term(m, Coeff::one());
            out
        }
        Expr::Ln(arg) => {
            let na = normalize(arg);
            if na.as_constant().map(|c| c.is_one()).unwrap_or(false) {
                return NormalSum::zero();
            }
            atom(Expr::Ln(reconstruct(&na).boxed()))
        }
        _ => {
            let (name, arg) = expr.unary_parts().expect("all n-ary variants matched above");
            let na = normalize(arg);
            let arg_const = na.as_constant();
            let at_zero = arg_const.as_ref().map(|c| c.is_zero()).unwrap_or(false);
            let at_one = arg_const.as_ref().map(|c| c.is_one()).unwrap_or(false);
            match name {
                "sin" | "tg" | "arcsin" | "arctg" | "sinh" | "tanh" if at_zero => {
                    NormalSum::zero()
                }
                "cos" | "cosh" if at_zero => NormalSum::one(),
                "arccos" if at_one => NormalSum::zero(),
                _ => atom(Expr::rebuild_unary(name, reconstruct(&na))),
            }
        }
    }
}

fn exponent_expr(e: &Coeff) -> Expr {
    coeff_to_expr(e)
}

fn term_expr(m: &Monomial, c: &Coeff) -> Expr {
    let mut num_factors: Vec<Expr> = Vec::new();
    let mut den_factors: Vec<Expr> = Vec::new();
    for f in m.factors.values() {
        if f.exp.is_negative() {
            let e = -f.exp.clone();
            if e.is_one() {
                den_factors.push(f.base.clone());
            } else {
                den_factors.push(Expr::Pow(f.base.clone().boxed(), exponent_expr(&e).boxed()));
            }
        } else if f.exp.is_one() {
            num_factors.push(f.base.clone());
        } else {
            num_factors.push(Expr::Pow(
                f.base.clone().boxed(),
                exponent_expr(&f.exp).boxed(),
            ));
        }
    }
    let cnum = Coeff::from(c.numer().clone());
    let cden = c.denom();
    if !cnum.is_one() || num_factors.is_empty() {
        num_factors.insert(0, Expr::Const(cnum.to_f64().unwrap_or(f64::INFINITY)));
    }
    if !cden.is_one() {
        den_factors.insert(0, Expr::Const(cden.to_f64().unwrap_or(f64::INFINITY)));
    }
    let num_expr = num_factors
        .into_iter()
        .reduce(|a, b| Expr::Mul(a.boxed(), b.boxed()))
        .unwrap_or(Expr::Const(1.0));
    match den_factors
        .into_iter()
        .reduce(|a, b| Expr::Mul(a.boxed(), b.boxed()))
    {
        Some(den_expr) => Expr::Div(num_expr.boxed(), den_expr.boxed()),
        None => num_expr,
    }
}

pub(crate) fn reconstruct(ns: &NormalSum) -> Expr {
    if ns.terms.is_empty() {
        return Expr::Const(0.0);
    }
    let mut acc: Option<Expr> = None;
    for (m, c) in ns.terms.values() {
        acc = Some(match acc {
            None => term_expr(m, c),
            Some(prev) => {
                if c.is_negative() {
                    Expr::Sub(prev.boxed(), term_expr(m, &-c.clone()).boxed())
                } else {
                    Expr::Add(prev.boxed(), term_expr(m, c).boxed())
                }
            }
        });
    }
    acc.unwrap()
}

/// Irreducible sum denominators appearing in the normal form: atom key ->
/// (base expression, largest inverse power).
fn sum_denominators(ns: &NormalSum) -> HashMap<String, (Expr, i64)> {
    let mut denoms: HashMap<String, (Expr, i64)> = HashMap::new();
    for (m, _) in ns.terms.values() {
        for (key, f) in &m.factors {
            if !matches!(f.base, Expr::Add(_, _) | Expr::Sub(_, _)) {
                continue;
            }
            if !f.exp.is_integer() || !f.exp.is_negative() {
                continue;
            }
            let Some(k) = (-f.exp.clone()).to_integer().to_i64() else {
                continue;
            };
            let entry = denoms.entry(key.clone()).or_insert((f.base.clone(), 0));
            if k > entry.1 {
                entry.1 = k;
            }
        }
    }
    denoms
}

/// Multiplies the sum through by every irreducible sum denominator (expanded)
/// so that a rational function that is identically zero actually collects to
/// zero. The result differs from the input by a nonzero factor, which is all
/// the zero test needs.
fn clear_denominators(ns: &NormalSum, depth: usize) -> NormalSum {
    let denoms = sum_denominators(ns);
    if denoms.is_empty() || depth > 4 {
        return ns.clone();
    }
    let mut out = NormalSum::zero();
    for (m, c) in ns.terms.values() {
        // keep everything except the inverse powers being cleared
        let mut stripped = Monomial::default();
        for (key, f) in &m.factors {
            let cleared = denoms.contains_key(key)
                && f.exp.is_integer()
                && f.exp.is_negative();
            if !cleared {
                stripped.insert(f.clone());
            }
        }
        // every term is multiplied by base^kmax in total
        let mut mult = NormalSum::one();
        for (key, (base, kmax)) in &denoms {
            let consumed = m
                .factors
                .get(key)
                .filter(|f| f.exp.is_integer() && f.exp.is_negative())
                .and_then(|f| (-f.exp.clone()).to_integer().to_i64())
                .unwrap_or(0);
            if *kmax > consumed {
                mult = mult.mul(&normalize(base).pow_int(kmax - consumed));
            }
        }
        out.add_assign(normalize_monomial(stripped, c.clone()).mul(&mult));
    }
    clear_denominators(&out, depth + 1)
}

/// Re-divides a sum whose terms all share an inverse sum atom: multiply
/// through by the atom base once and attempt the exact division. Turns
/// per-term quotients like `(c*D)/D` back into `c` after adjugate solves.
fn reduce_fractions(mut ns: NormalSum) -> NormalSum {
    for _ in 0..8 {
        if ns.terms.is_empty() {
            break;
        }
        let mut candidate: Option<Expr> = None;
        let first = &ns.terms.values().next().unwrap().0;
        'atoms: for (key, f) in &first.factors {
            if !matches!(f.base, Expr::Add(_, _) | Expr::Sub(_, _)) {
                continue;
            }
            if !f.exp.is_integer() || !f.exp.is_negative() {
                continue;
            }
            for (m, _) in ns.terms.values() {
                match m.factors.get(key) {
                    Some(g) if g.exp.is_integer() && g.exp.is_negative() => {}
                    _ => continue 'atoms,
                }
            }
            candidate = Some(f.base.clone());
            break;
        }
        let Some(base) = candidate else {
            break;
        };
        let mut num = NormalSum::zero();
        for (m, c) in ns.terms.values() {
            let mut lifted = m.clone();
            lifted.insert(Factor {
                base: base.clone(),
                exp: Coeff::one(),
            });
            num.add_assign(normalize_monomial(lifted, c.clone()));
        }
        match try_div(&num, &normalize(&base)) {
            Some(q) => ns = q,
            None => break,
        }
    }
    ns
}

/// Result of splitting an expression into per-symbol linear coefficients and
/// a residual: `expr = sum(coefficients[s] * s) + residual` exactly.
#[derive(Debug, Clone)]
pub struct LinearSeparation {
    pub linear_coefficients: HashMap<String, Expr>,
    pub residual: Expr,
}

/// Separates an expression into terms linear in the given symbols and a
/// residual. A term counts as linear in a symbol iff the symbol appears as a
/// plain factor with exponent one and the remaining quotient is free of every
/// given symbol; all other terms (constants, products of two or more symbols,
/// nonlinear functions of symbols, symbol-dependent coefficients) stay in the
/// residual.
pub fn separate_linear(expr: &Expr, symbols: &[String]) -> LinearSeparation {
    let nf = normalize(expr);
    let mut lin: HashMap<String, NormalSum> = HashMap::new();
    let mut residual = NormalSum::zero();
    'terms: for (m, c) in nf.terms.values() {
        let mut hit: Option<(String, Coeff)> = None;
        let mut hits = 0usize;
        for f in m.factors.values() {
            if let Expr::Var(name) = &f.base {
                if symbols.contains(name) {
                    hits += 1;
                    hit = Some((name.clone(), f.exp.clone()));
                    continue;
                }
            }
            // any other factor must be free of the known symbols
            let free = f.base.all_arguments_are_variables();
            if free.iter().any(|v| symbols.contains(v)) {
                residual.add_term(m.clone(), c.clone());
                continue 'terms;
            }
        }
        match hit {
            Some((name, e)) if hits == 1 && e.is_one() => {
                let mut qm = m.clone();
                qm.insert(Factor {
                    base: Expr::Var(name.clone()),
                    exp: -Coeff::one(),
                });
                lin.entry(name)
                    .or_insert_with(NormalSum::zero)
                    .add_term(qm, c.clone());
            }
            _ => residual.add_term(m.clone(), c.clone()),
        }
    }
    LinearSeparation {
        linear_coefficients: lin
            .into_iter()
            .map(|(name, ns)| (name, reconstruct(&ns)))
            .collect(),
        residual: reconstruct(&residual),
    }
}

impl Expr {
    //___________________________________SIMPLIFICATION____________________________________

    /// Canonical simplification through the rational normal form. The result
    /// is deterministic: equal expressions simplify to identical trees.
    pub fn simplify(&self) -> Expr {
        reconstruct(&reduce_fractions(normalize(self)))
    }

    /// Exact zero test: true iff the expression reduces to zero in the
    /// rational normal form, with sum denominators cleared first so that
    /// rational functions cancel.
    pub fn is_identically_zero(&self) -> bool {
        let nf = normalize(self);
        if nf.is_zero() {
            return true;
        }
        clear_denominators(&nf, 0).is_zero()
    }

    /// Cheap local rewrite pass: constant folding and algebraic identities,
    /// no expansion or term collection. Preferred inside matrix kernels where
    /// the canonical pass would be wasted on intermediate values.
    pub fn simplify_(&self) -> Expr {
        match self {
            Expr::Var(_) | Expr::Const(_) => self.clone(),
            Expr::Add(lhs, rhs) => {
                let lhs = lhs.simplify_();
                let rhs = rhs.simplify_();
                match (&lhs, &rhs) {
                    (Expr::Const(a), Expr::Const(b)) => Expr::Const(a + b),
                    (Expr::Const(z), _) if *z == 0.0 => rhs,
                    (_, Expr::Const(z)) if *z == 0.0 => lhs,
                    _ => Expr::Add(Box::new(lhs), Box::new(rhs)),
                }
            }
            Expr::Sub(lhs, rhs) => {
                let lhs = lhs.simplify_();
                let rhs = rhs.simplify_();
                match (&lhs, &rhs) {
                    (Expr::Const(a), Expr::Const(b)) => Expr::Const(a - b),
                    (_, Expr::Const(z)) if *z == 0.0 => lhs,
                    _ if lhs == rhs => Expr::Const(0.0),
                    _ => Expr::Sub(Box::new(lhs), Box::new(rhs)),
                }
            }
            Expr::Mul(lhs, rhs) => {
                let lhs = lhs.simplify_();
                let rhs = rhs.simplify_();
                match (&lhs, &rhs) {
                    (Expr::Const(a), Expr::Const(b)) => Expr::Const(a * b),
                    (Expr::Const(z), _) | (_, Expr::Const(z)) if *z == 0.0 => Expr::Const(0.0),
                    (Expr::Const(o), _) if *o == 1.0 => rhs,
                    (_, Expr::Const(o)) if *o == 1.0 => lhs,
                    (Expr::Pow(base1, exp1), Expr::Pow(base2, exp2)) if base1 == base2 => {
                        let new_exp = Expr::Add(exp1.clone(), exp2.clone()).simplify_();
                        Expr::Pow(base1.clone(), Box::new(new_exp)).simplify_()
                    }
                    _ => Expr::Mul(Box::new(lhs), Box::new(rhs)),
                }
            }
            Expr::Div(lhs, rhs) => {
                let lhs = lhs.simplify_();
                let rhs = rhs.simplify_();
                match (&lhs, &rhs) {
                    (Expr::Const(a), Expr::Const(b)) if *b != 0.0 => Expr::Const(a / b),
                    (Expr::Const(z), _) if *z == 0.0 => Expr::Const(0.0),
                    (_, Expr::Const(o)) if *o == 1.0 => lhs,
                    _ if lhs == rhs => Expr::Const(1.0),
                    _ => Expr::Div(Box::new(lhs), Box::new(rhs)),
                }
            }
            Expr::Pow(base, exp) => {
                let base = base.simplify_();
                let exp = exp.simplify_();
                match (&base, &exp) {
                    (Expr::Const(a), Expr::Const(b)) => Expr::Const(a.powf(*b)),
                    (_, Expr::Const(z)) if *z == 0.0 => Expr::Const(1.0),
                    (_, Expr::Const(o)) if *o == 1.0 => base,
                    (Expr::Const(z), _) if *z == 0.0 => Expr::Const(0.0),
                    (Expr::Const(o), _) if *o == 1.0 => Expr::Const(1.0),
                    (Expr::Pow(inner_base, inner_exp), _) => {
                        let new_exp = Expr::Mul(inner_exp.clone(), Box::new(exp)).simplify_();
                        Expr::Pow(inner_base.clone(), Box::new(new_exp))
                    }
                    _ => Expr::Pow(Box::new(base), Box::new(exp)),
                }
            }
            Expr::Exp(arg) => {
                let arg = arg.simplify_();
                match &arg {
                    Expr::Const(z) if *z == 0.0 => Expr::Const(1.0),
                    _ => Expr::Exp(Box::new(arg)),
                }
            }
            Expr::Ln(arg) => {
                let arg = arg.simplify_();
                match &arg {
                    Expr::Const(o) if *o == 1.0 => Expr::Const(0.0),
                    _ => Expr::Ln(Box::new(arg)),
                }
            }
            _ => {
                let (name, arg) = self.unary_parts().expect("all n-ary variants matched above");
                let arg = arg.simplify_();
                match (&arg, name) {
                    (Expr::Const(z), "sin" | "tg" | "arcsin" | "arctg" | "sinh" | "tanh")
                        if *z == 0.0 =>
                    {
                        Expr::Const(0.0)
                    }
                    (Expr::Const(z), "cos" | "cosh") if *z == 0.0 => Expr::Const(1.0),
                    (Expr::Const(o), "arccos") if *o == 1.0 => Expr::Const(0.0),
                    _ => Expr::rebuild_unary(name, arg),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    #[test]
    fn test_zero_test_cancellation() {
        let e = Expr::parse_expression("x + x - 2*x");
        assert!(e.is_identically_zero());
        let e = Expr::parse_expression("x*y - y*x");
        assert!(e.is_identically_zero());
        let e = Expr::parse_expression("x");
        assert!(!e.is_identically_zero());
    }

    #[test]
    fn test_rational_coefficients_are_exact() {
        // 1/3 + 1/3 + 1/3 - 1 must be exactly zero, not f64-approximately
        let third = Expr::Div(Box::new(Expr::Const(1.0)), Box::new(Expr::Const(3.0)));
        let e = third.clone() + third.clone() + third - Expr::Const(1.0);
        assert!(e.is_identically_zero());
    }

    #[test]
    fn test_exponential_atoms_cancel() {
        let e = Expr::parse_expression("exp(-t/tau)*exp(t/tau) - 1");
        assert!(e.is_identically_zero());
        let e = Expr::parse_expression("exp(2*t)/exp(t) - exp(t)");
        assert!(e.is_identically_zero());
    }

    #[test]
    fn test_alpha_function_residual_is_zero() {
        // x = t*exp(-t/tau) satisfies x'' + 2/tau x' + x/tau^2 = 0
        let x = Expr::parse_expression("t*exp(-t/tau)");
        let dx = x.diff("t");
        let ddx = dx.diff("t");
        let residual = ddx
            + Expr::parse_expression("2/tau") * dx
            + Expr::parse_expression("1/tau^2") * x;
        assert!(residual.is_identically_zero());
    }

    #[test]
    fn test_monomial_quotient_cancellation() {
        let e = Expr::parse_expression("(x^2*y)/(x*y) - x");
        assert!(e.is_identically_zero());
    }

    #[test]
    fn test_polynomial_quotient() {
        let e = Expr::parse_expression("(x^2 - 1)/(x - 1) - x - 1");
        assert!(e.is_identically_zero());
    }

    #[test]
    fn test_sum_power_expansion() {
        let e = Expr::parse_expression("(x + 1)^2 - x^2 - 2*x - 1");
        assert!(e.is_identically_zero());
    }

    #[test]
    fn test_fraction_sum_reduces() {
        let e = Expr::parse_expression("x/(x+y) + y/(x+y)");
        assert_eq!(e.simplify(), Expr::Const(1.0));
        let e = Expr::parse_expression("x/(x+y) + y/(x+y) - 1");
        assert!(e.is_identically_zero());
        let e = Expr::parse_expression("x/(x+y) - y/(x+y)");
        assert!(!e.is_identically_zero());
    }

    #[test]
    fn test_simplify_is_canonical() {
        let a = Expr::parse_expression("x*(y + z)").simplify();
        let b = Expr::parse_expression("x*y + x*z").simplify();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sqrt_squares_back() {
        let d = Expr::parse_expression("a - b");
        let sq = Expr::Pow(d.clone().boxed(), Expr::Const(0.5).boxed());
        let e = sq.clone() * sq - d;
        assert!(e.is_identically_zero());
    }

    #[test]
    fn test_separate_linear_mixed() {
        let symbols = vec!["x".to_string(), "y".to_string()];
        let e = Expr::parse_expression("-x/tau + 3*y + x*y + k");
        let sep = separate_linear(&e, &symbols);
        let cx = sep.linear_coefficients.get("x").unwrap();
        let cy = sep.linear_coefficients.get("y").unwrap();
        assert!((cx.clone() + Expr::parse_expression("1/tau")).is_identically_zero());
        assert!((cy.clone() - Expr::Const(3.0)).is_identically_zero());
        // residual keeps the bilinear and constant parts
        let expected = Expr::parse_expression("x*y + k");
        assert!((sep.residual.clone() - expected).is_identically_zero());
        // exact reconstitution
        let rebuilt = cx.clone() * var("x") + cy.clone() * var("y") + sep.residual.clone();
        assert!((rebuilt - e).is_identically_zero());
    }

    #[test]
    fn test_separate_linear_function_coupling_is_residual() {
        let symbols = vec!["x".to_string()];
        let e = Expr::parse_expression("x*exp(x)");
        let sep = separate_linear(&e, &symbols);
        assert!(sep.linear_coefficients.is_empty());
        assert!((sep.residual.clone() - e).is_identically_zero());
    }

    #[test]
    fn test_simplify_local_rules() {
        let e = Expr::parse_expression("x + 0").simplify_();
        assert_eq!(e, var("x"));
        let e = Expr::parse_expression("1*x").simplify_();
        assert_eq!(e, var("x"));
        let e = Expr::parse_expression("x^0").simplify_();
        assert_eq!(e, Expr::Const(1.0));
        let e = Expr::Exp(Expr::Const(0.0).boxed()).simplify_();
        assert_eq!(e, Expr::Const(1.0));
    }
}
