//! A restricted arithmetic expression engine: numeric literals, identifiers,
//! `+ - * /`, parentheses, and a small fixed set of unary/binary math
//! functions. No side effects, no references outside the supplied binding.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ParseError {}

fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
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
            '*' | '\u{00D7}' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' | '\u{00F7}' => {
                tokens.push(Token::Slash);
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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ParseError(format!("invalid number literal: {text}")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => return Err(ParseError(format!("unexpected character: {other}"))),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryFn {
    Abs,
    Sqrt,
    Ln,
    Log10,
    Exp,
    Floor,
    Ceil,
    Round,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFn {
    Min,
    Max,
    Pow,
}

fn lookup_unary(name: &str) -> Option<UnaryFn> {
    match name {
        "abs" => Some(UnaryFn::Abs),
        "sqrt" => Some(UnaryFn::Sqrt),
        "ln" => Some(UnaryFn::Ln),
        "log10" => Some(UnaryFn::Log10),
        "exp" => Some(UnaryFn::Exp),
        "floor" => Some(UnaryFn::Floor),
        "ceil" => Some(UnaryFn::Ceil),
        "round" => Some(UnaryFn::Round),
        _ => None,
    }
}

fn lookup_binary(name: &str) -> Option<BinaryFn> {
    match name {
        "min" => Some(BinaryFn::Min),
        "max" => Some(BinaryFn::Max),
        "pow" => Some(BinaryFn::Pow),
        _ => None,
    }
}

/// Parsed arithmetic AST. Cheap to clone; shared via the parsed-expression
/// cache keyed by `(formulaId, version)`.
#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Unary(UnaryFn, Box<Expr>),
    Binary(BinaryFn, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: &Token) -> Result<(), ParseError> {
        match self.advance() {
            Some(ref t) if t == want => Ok(()),
            other => Err(ParseError(format!("expected {want:?}, found {other:?}"))),
        }
    }

    // expr := term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Minus) => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    // term := factor (('*' | '/') factor)*
    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    let rhs = self.parse_factor()?;
                    lhs = Expr::Mul(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Slash) => {
                    self.advance();
                    let rhs = self.parse_factor()?;
                    lhs = Expr::Div(Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    // factor := '-' factor | primary
    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let inner = self.parse_factor()?;
                Ok(Expr::Neg(Box::new(inner)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_factor()
            }
            _ => self.parse_primary(),
        }
    }

    // primary := number | ident ['(' args ')'] | '(' expr ')'
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Token::RParen)) {
                        args.push(self.parse_expr()?);
                        while matches!(self.peek(), Some(Token::Comma)) {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Token::RParen)?;
                    if let Some(f) = lookup_unary(&name) {
                        if args.len() != 1 {
                            return Err(ParseError(format!("{name} takes exactly 1 argument")));
                        }
                        return Ok(Expr::Unary(f, Box::new(args.remove(0))));
                    }
                    if let Some(f) = lookup_binary(&name) {
                        if args.len() != 2 {
                            return Err(ParseError(format!("{name} takes exactly 2 arguments")));
                        }
                        let b = args.remove(1);
                        let a = args.remove(0);
                        return Ok(Expr::Binary(f, Box::new(a), Box::new(b)));
                    }
                    Err(ParseError(format!("unknown function: {name}")))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(ParseError(format!("unexpected token: {other:?}"))),
        }
    }
}

/// Parse `src` into an AST. Parse once per formula; callers cache the result
/// keyed by `(formulaId, version)`.
pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ParseError("trailing tokens after expression".to_string()));
    }
    Ok(expr)
}

/// Collect every free identifier referenced by the expression.
pub fn free_identifiers(expr: &Expr) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect(expr, &mut out);
    out
}

fn collect(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Var(name) => {
            out.insert(name.clone());
        }
        Expr::Neg(e) | Expr::Unary(_, e) => collect(e, out),
        Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) | Expr::Binary(_, a, b) => {
            collect(a, out);
            collect(b, out);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("missing variable: {0}")]
    MissingVariable(String),
}

/// Evaluate `expr` against `binding`. Non-finite results coerce to `0`
/// (mirrors the source's `Number(...) || 0` behavior).
pub fn evaluate(expr: &Expr, binding: &BTreeMap<String, f64>) -> Result<f64, EvalError> {
    let raw = eval_inner(expr, binding)?;
    Ok(if raw.is_finite() { raw } else { 0.0 })
}

fn eval_inner(expr: &Expr, binding: &BTreeMap<String, f64>) -> Result<f64, EvalError> {
    Ok(match expr {
        Expr::Number(n) => *n,
        Expr::Var(name) => *binding
            .get(name)
            .ok_or_else(|| EvalError::MissingVariable(name.clone()))?,
        Expr::Neg(e) => -eval_inner(e, binding)?,
        Expr::Add(a, b) => eval_inner(a, binding)? + eval_inner(b, binding)?,
        Expr::Sub(a, b) => eval_inner(a, binding)? - eval_inner(b, binding)?,
        Expr::Mul(a, b) => eval_inner(a, binding)? * eval_inner(b, binding)?,
        Expr::Div(a, b) => eval_inner(a, binding)? / eval_inner(b, binding)?,
        Expr::Unary(f, e) => {
            let v = eval_inner(e, binding)?;
            match f {
                UnaryFn::Abs => v.abs(),
                UnaryFn::Sqrt => v.sqrt(),
                UnaryFn::Ln => v.ln(),
                UnaryFn::Log10 => v.log10(),
                UnaryFn::Exp => v.exp(),
                UnaryFn::Floor => v.floor(),
                UnaryFn::Ceil => v.ceil(),
                UnaryFn::Round => v.round(),
            }
        }
        Expr::Binary(f, a, b) => {
            let x = eval_inner(a, binding)?;
            let y = eval_inner(b, binding)?;
            match f {
                BinaryFn::Min => x.min(y),
                BinaryFn::Max => x.max(y),
                BinaryFn::Pow => x.powf(y),
            }
        }
    })
}

/// Process-wide, read-mostly cache of parsed expressions keyed by
/// `(formulaId, version)`. Invalidated on formula update by the caller
/// dropping the old entry (new version ⇒ new key, no explicit eviction
/// needed since stale versions simply stop being requested).
pub struct FormulaCache {
    entries: std::sync::RwLock<BTreeMap<(String, u32), std::sync::Arc<Expr>>>,
}

impl Default for FormulaCache {
    fn default() -> Self {
        Self {
            entries: std::sync::RwLock::new(BTreeMap::new()),
        }
    }
}

impl FormulaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached AST for `(formula_id, version)`, parsing and
    /// inserting on first use.
    pub fn get_or_parse(
        &self,
        formula_id: &str,
        version: u32,
        expression: &str,
    ) -> Result<std::sync::Arc<Expr>, ParseError> {
        let key = (formula_id.to_string(), version);
        if let Some(cached) = self.entries.read().unwrap().get(&key) {
            return Ok(cached.clone());
        }
        let parsed = std::sync::Arc::new(parse(expression)?);
        self.entries.write().unwrap().insert(key, parsed.clone());
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn evaluates_basic_arithmetic() {
        let e = parse("A * B + 2").unwrap();
        let result = evaluate(&e, &binding(&[("A", 3.0), ("B", 4.0)])).unwrap();
        assert_eq!(result, 14.0);
    }

    #[test]
    fn respects_precedence_and_parens() {
        let e = parse("(A + B) * 2").unwrap();
        let result = evaluate(&e, &binding(&[("A", 1.0), ("B", 2.0)])).unwrap();
        assert_eq!(result, 6.0);
    }

    #[test]
    fn fails_on_missing_variable() {
        let e = parse("A + B").unwrap();
        let err = evaluate(&e, &binding(&[("A", 1.0)])).unwrap_err();
        matches!(err, EvalError::MissingVariable(ref n) if n == "B");
    }

    #[test]
    fn collects_free_identifiers() {
        let e = parse("A * B + sqrt(C)").unwrap();
        let ids = free_identifiers(&e);
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("A") && ids.contains("B") && ids.contains("C"));
    }

    #[test]
    fn coerces_division_by_zero_to_zero() {
        let e = parse("A / B").unwrap();
        let result = evaluate(&e, &binding(&[("A", 1.0), ("B", 0.0)])).unwrap();
        assert_eq!(result, 0.0);
    }

    #[test]
    fn supports_unary_and_binary_functions() {
        let e = parse("max(A, B) - abs(C)").unwrap();
        let result = evaluate(&e, &binding(&[("A", 1.0), ("B", 5.0), ("C", -2.0)])).unwrap();
        assert_eq!(result, 3.0);
    }

    #[test]
    fn cache_returns_same_ast_for_same_formula_version() {
        let cache = FormulaCache::new();
        let a = cache.get_or_parse("f1", 1, "A + B").unwrap();
        let b = cache.get_or_parse("f1", 1, "A + B").unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_reparses_on_version_bump() {
        let cache = FormulaCache::new();
        let v1 = cache.get_or_parse("f1", 1, "A + B").unwrap();
        let v2 = cache.get_or_parse("f1", 2, "A * B").unwrap();
        assert!(!std::sync::Arc::ptr_eq(&v1, &v2));
    }
}
