//! a module turns a String expression into a symbolic expression
//!
//! Hand-rolled tokenizer plus precedence-climbing parser. The accepted syntax:
//! - Variables: `V_m`, `tau_syn`, `t`
//! - Constants: `3.14`, `2.5e-3`
//! - Operators: `+`, `-`, `*`, `/`, `^` (power, right associative)
//! - Functions: `exp`, `ln`/`log`, `sin`, `cos`, `tg`/`tan`, `ctg`/`cot`,
//!   `arcsin`/`asin`, `arccos`/`acos`, `arctg`/`atan`/`arctan`,
//!   `arcctg`/`acot`, `sinh`, `cosh`, `tanh`, `sqrt`
//! - Parentheses for grouping
//!
//! The function-name table doubles as the reserved namespace: a user symbol
//! equal to one of these names would shadow the function syntax, which is why
//! shape construction rejects such symbols up front.

use crate::symbolic::symbolic_engine::Expr;

/// Names that are recognized as functions (or function aliases) by the parser
/// and are therefore not available as user variable symbols.
pub const RESERVED_FUNCTION_NAMES: &[&str] = &[
    "exp", "ln", "log", "sin", "cos", "tg", "tan", "ctg", "cot", "arcsin", "asin", "arccos",
    "acos", "arctg", "atan", "arctan", "arcctg", "acot", "sinh", "cosh", "tanh", "sqrt",
];

/// true iff the name collides with the parser's function/constant namespace
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_FUNCTION_NAMES.contains(&name)
}

fn build_function(name: &str, arg: Expr) -> Expr {
    match name {
        "exp" => Expr::Exp(arg.boxed()),
        "ln" | "log" => Expr::Ln(arg.boxed()),
        "sin" => Expr::sin(arg.boxed()),
        "cos" => Expr::cos(arg.boxed()),
        "tg" | "tan" => Expr::tg(arg.boxed()),
        "ctg" | "cot" => Expr::ctg(arg.boxed()),
        "arcsin" | "asin" => Expr::arcsin(arg.boxed()),
        "arccos" | "acos" => Expr::arccos(arg.boxed()),
        "arctg" | "atan" | "arctan" => Expr::arctg(arg.boxed()),
        "arcctg" | "acot" => Expr::arcctg(arg.boxed()),
        "sinh" => Expr::sinh(arg.boxed()),
        "cosh" => Expr::cosh(arg.boxed()),
        "tanh" => Expr::tanh(arg.boxed()),
        "sqrt" => Expr::Pow(arg.boxed(), Expr::Const(0.5).boxed()),
        _ => unreachable!("not a reserved function name: {}", name),
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // scientific notation: 2e-3, 1.5E+6
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number literal \"{}\"", text))?;
                tokens.push(Token::Num(value));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(format!("unexpected character '{}' in expression", c)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(format!("expected {:?}, found {:?}", token, t)),
            None => Err(format!("expected {:?}, found end of input", token)),
        }
    }

    // add := mul (('+'|'-') mul)*
    fn parse_add(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_mul()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    let rhs = self.parse_mul()?;
                    lhs = Expr::Add(lhs.boxed(), rhs.boxed());
                }
                Some(Token::Minus) => {
                    self.next();
                    let rhs = self.parse_mul()?;
                    lhs = Expr::Sub(lhs.boxed(), rhs.boxed());
                }
                _ => return Ok(lhs),
            }
        }
    }

    // mul := unary (('*'|'/') unary)*
    fn parse_mul(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Mul(lhs.boxed(), rhs.boxed());
                }
                Some(Token::Slash) => {
                    self.next();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Div(lhs.boxed(), rhs.boxed());
                }
                _ => return Ok(lhs),
            }
        }
    }

    // unary := '-' unary | '+' unary | power
    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.next();
                let inner = self.parse_unary()?;
                Ok(match inner {
                    Expr::Const(v) => Expr::Const(-v),
                    other => Expr::Mul(Expr::Const(-1.0).boxed(), other.boxed()),
                })
            }
            Some(Token::Plus) => {
                self.next();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    // power := atom ('^' unary)?, right associative
    fn parse_power(&mut self) -> Result<Expr, String> {
        let base = self.parse_atom()?;
        if let Some(Token::Caret) = self.peek() {
            self.next();
            let exp = self.parse_unary()?;
            return Ok(Expr::Pow(base.boxed(), exp.boxed()));
        }
        Ok(base)
    }

    // atom := number | ident '(' expr ')' | ident | '(' expr ')'
    fn parse_atom(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Num(v)) => Ok(Expr::Const(v)),
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    if !is_reserved_name(&name) {
                        return Err(format!("unknown function \"{}\"", name));
                    }
                    self.next();
                    let arg = self.parse_add()?;
                    self.expect(Token::RParen)?;
                    Ok(build_function(&name, arg))
                } else {
                    if is_reserved_name(&name) {
                        return Err(format!(
                            "\"{}\" is a reserved function name and cannot be used as a variable",
                            name
                        ));
                    }
                    Ok(Expr::Var(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_add()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(t) => Err(format!("unexpected token {:?}", t)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Parses a mathematical expression from its string representation.
pub fn parse_expression_func(input: &str) -> Result<Expr, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty expression".to_string());
    }
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_add()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!(
            "trailing input after position {} in \"{}\"",
            parser.pos, input
        ));
    }
    Ok(expr)
}

impl Expr {
    /// Parses a mathematical expression from string representation.
    ///
    /// # Panics
    /// Panics if the expression cannot be parsed (invalid syntax). Use
    /// `parse_expression_func` for the fallible variant.
    ///
    /// # Examples
    /// ```rust, ignore
    /// let expr = Expr::parse_expression("t*exp(-t/tau)");
    /// ```
    pub fn parse_expression(input: &str) -> Expr {
        match parse_expression_func(input) {
            Ok(expr) => expr,
            Err(err) => panic!("failed to parse \"{}\": {}", input, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exponential() {
        let expr = parse_expression_func("exp(x)").unwrap();
        assert_eq!(expr, Expr::Exp(Box::new(Expr::Var("x".to_string()))));
    }

    #[test]
    fn test_parse_constant() {
        let expr = parse_expression_func("42").unwrap();
        assert_eq!(expr, Expr::Const(42.0));
    }

    #[test]
    fn test_parse_scientific() {
        let expr = parse_expression_func("2.5e-3").unwrap();
        assert_eq!(expr, Expr::Const(2.5e-3));
    }

    #[test]
    fn test_parse_variable() {
        let expr = parse_expression_func("V_m").unwrap();
        assert_eq!(expr, Expr::Var("V_m".to_string()));
    }

    #[test]
    fn test_parse_addition() {
        let expr = parse_expression_func("x + 2").unwrap();
        assert_eq!(
            expr,
            Expr::Add(
                Box::new(Expr::Var("x".to_string())),
                Box::new(Expr::Const(2.0))
            )
        );
    }

    #[test]
    fn test_parse_subtraction_chain_left_associative() {
        // x - y - z must parse as (x - y) - z
        let expr = parse_expression_func("x - y - z").unwrap();
        let x = Box::new(Expr::Var("x".to_string()));
        let y = Box::new(Expr::Var("y".to_string()));
        let z = Box::new(Expr::Var("z".to_string()));
        assert_eq!(expr, Expr::Sub(Box::new(Expr::Sub(x, y)), z));
    }

    #[test]
    fn test_parse_power() {
        let expr = parse_expression_func("x^2").unwrap();
        assert_eq!(
            expr,
            Expr::Pow(
                Box::new(Expr::Var("x".to_string())),
                Box::new(Expr::Const(2.0))
            )
        );
    }

    #[test]
    fn test_parse_negative_exponent() {
        let expr = parse_expression_func("x^-2").unwrap();
        assert_eq!(
            expr,
            Expr::Pow(
                Box::new(Expr::Var("x".to_string())),
                Box::new(Expr::Const(-2.0))
            )
        );
    }

    #[test]
    fn test_parse_unary_minus() {
        let expr = parse_expression_func("-x").unwrap();
        assert_eq!(
            expr,
            Expr::Mul(
                Box::new(Expr::Const(-1.0)),
                Box::new(Expr::Var("x".to_string()))
            )
        );
        let expr = parse_expression_func("-3").unwrap();
        assert_eq!(expr, Expr::Const(-3.0));
    }

    #[test]
    fn test_parse_precedence() {
        // x + y*z must parse multiplication first
        let expr = parse_expression_func("x + y*z").unwrap();
        assert_eq!(
            expr,
            Expr::Add(
                Box::new(Expr::Var("x".to_string())),
                Box::new(Expr::Mul(
                    Box::new(Expr::Var("y".to_string())),
                    Box::new(Expr::Var("z".to_string()))
                ))
            )
        );
    }

    #[test]
    fn test_parse_expression_with_brackets() {
        let expr = parse_expression_func("(x + y) * z").unwrap();
        assert_eq!(
            expr,
            Expr::Mul(
                Box::new(Expr::Add(
                    Box::new(Expr::Var("x".to_string())),
                    Box::new(Expr::Var("y".to_string()))
                )),
                Box::new(Expr::Var("z".to_string()))
            )
        );
    }

    #[test]
    fn test_parse_alias_functions() {
        assert_eq!(
            parse_expression_func("tan(x)").unwrap(),
            Expr::tg(Box::new(Expr::Var("x".to_string())))
        );
        assert_eq!(
            parse_expression_func("log(x)").unwrap(),
            Expr::Ln(Box::new(Expr::Var("x".to_string())))
        );
        assert_eq!(
            parse_expression_func("asin(x)").unwrap(),
            Expr::arcsin(Box::new(Expr::Var("x".to_string())))
        );
    }

    #[test]
    fn test_parse_hyperbolic() {
        assert_eq!(
            parse_expression_func("tanh(x)").unwrap(),
            Expr::tanh(Box::new(Expr::Var("x".to_string())))
        );
    }

    #[test]
    fn test_parse_sqrt_as_power() {
        let expr = parse_expression_func("sqrt(x)").unwrap();
        assert_eq!(
            expr,
            Expr::Pow(
                Box::new(Expr::Var("x".to_string())),
                Box::new(Expr::Const(0.5))
            )
        );
    }

    #[test]
    fn test_parse_shape_function() {
        let expr = parse_expression_func("t*exp(-t/tau)").unwrap();
        let t = || Box::new(Expr::Var("t".to_string()));
        let tau = Box::new(Expr::Var("tau".to_string()));
        // unary minus binds tighter than division: (-t)/tau
        let inner = Expr::Div(
            Box::new(Expr::Mul(Box::new(Expr::Const(-1.0)), t())),
            tau,
        );
        assert_eq!(
            expr,
            Expr::Mul(t(), Box::new(Expr::Exp(Box::new(inner))))
        );
    }

    #[test]
    fn test_invalid_expression() {
        assert!(parse_expression_func("(x +").is_err());
        assert!(parse_expression_func("x + * y").is_err());
        assert!(parse_expression_func("").is_err());
    }

    #[test]
    fn test_unmatched_brackets() {
        assert!(parse_expression_func("(x + y").is_err());
    }

    #[test]
    fn test_reserved_name_as_variable_is_rejected() {
        assert!(parse_expression_func("exp + 1").is_err());
        assert!(parse_expression_func("unknownfn(x)").is_err());
    }
}
