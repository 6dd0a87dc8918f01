//! Boolean expressions for `when` gates.
//!
//! Grammar, highest precedence first: parentheses, unary `!`, `==`/`!=`,
//! `&&`, `||`. Atoms are identifiers (scope lookups), signed decimal
//! numbers, single- or double-quoted strings with `\n \r \t \\ \' \"`
//! escapes, `true`, `false` and `null`. `&&` and `||` short-circuit.
//!
//! Numeric equality compares as 64-bit floats with an absolute tolerance of
//! 1e-12. Comparing values of different types is an error, with one
//! accommodation: a string operand that spells a boolean or a number (the
//! form CLI-seeded variables arrive in) compares by its parsed value.
//! Unknown identifiers are errors.

use std::fmt;

use serde_json::Value;

use crate::context::Scope;
use crate::errors::{Error, Result};

const NUMERIC_EQ_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    Num(f64),
    Str(String),
    Null,
    Ident(String),
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    And,
    Or,
}

impl Expr {
    /// True when the expression can produce a boolean at its root: a bool
    /// literal, an identifier, a negation or any binary operator. Bare
    /// number/string/null literals are not valid gates.
    pub fn is_boolean_rooted(&self) -> bool {
        matches!(
            self,
            Expr::Bool(_) | Expr::Ident(_) | Expr::Not(_) | Expr::Binary { .. }
        )
    }
}

/// Values an expression can evaluate to.
#[derive(Debug, Clone, PartialEq)]
enum EvalValue {
    Bool(bool),
    Num(f64),
    Str(String),
    Null,
}

impl EvalValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Num(_) => "number",
            Self::Str(_) => "string",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for EvalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Null => f.write_str("null"),
        }
    }
}

/// Parses `input` into an expression tree.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::Expression(format!(
            "unexpected trailing input in expression {input:?}"
        )));
    }
    Ok(expr)
}

/// Evaluates a `when` expression against the scope, requiring a boolean
/// result.
pub fn evaluate(input: &str, scope: &Scope) -> Result<bool> {
    let expr = parse(input)?;
    match eval(&expr, scope)? {
        EvalValue::Bool(b) => Ok(b),
        other => Err(Error::Expression(format!(
            "expression {input:?} evaluated to {} ({}), expected a boolean",
            other,
            other.type_name()
        ))),
    }
}

fn eval(expr: &Expr, scope: &Scope) -> Result<EvalValue> {
    match expr {
        Expr::Bool(b) => Ok(EvalValue::Bool(*b)),
        Expr::Num(n) => Ok(EvalValue::Num(*n)),
        Expr::Str(s) => Ok(EvalValue::Str(s.clone())),
        Expr::Null => Ok(EvalValue::Null),
        Expr::Ident(name) => {
            let value = scope
                .value(name)
                .ok_or_else(|| Error::Expression(format!("unknown identifier '{name}'")))?;
            scope_value(name, value)
        }
        Expr::Not(inner) => match eval(inner, scope)? {
            EvalValue::Bool(b) => Ok(EvalValue::Bool(!b)),
            other => Err(Error::Expression(format!(
                "operator '!' requires a boolean, got {}",
                other.type_name()
            ))),
        },
        Expr::Binary { op, lhs, rhs } => match op {
            BinOp::And => {
                let left = eval_bool(lhs, scope, "&&")?;
                if !left {
                    return Ok(EvalValue::Bool(false));
                }
                Ok(EvalValue::Bool(eval_bool(rhs, scope, "&&")?))
            }
            BinOp::Or => {
                let left = eval_bool(lhs, scope, "||")?;
                if left {
                    return Ok(EvalValue::Bool(true));
                }
                Ok(EvalValue::Bool(eval_bool(rhs, scope, "||")?))
            }
            BinOp::Eq => Ok(EvalValue::Bool(eq(&eval(lhs, scope)?, &eval(rhs, scope)?)?)),
            BinOp::Ne => Ok(EvalValue::Bool(!eq(
                &eval(lhs, scope)?,
                &eval(rhs, scope)?,
            )?)),
        },
    }
}

fn eval_bool(expr: &Expr, scope: &Scope, op: &str) -> Result<bool> {
    match eval(expr, scope)? {
        EvalValue::Bool(b) => Ok(b),
        other => Err(Error::Expression(format!(
            "operator '{op}' requires boolean operands, got {}",
            other.type_name()
        ))),
    }
}

fn eq(lhs: &EvalValue, rhs: &EvalValue) -> Result<bool> {
    match (lhs, rhs) {
        (EvalValue::Num(a), EvalValue::Num(b)) => Ok((a - b).abs() <= NUMERIC_EQ_TOLERANCE),
        (EvalValue::Bool(a), EvalValue::Bool(b)) => Ok(a == b),
        (EvalValue::Str(a), EvalValue::Str(b)) => Ok(a == b),
        (EvalValue::Null, EvalValue::Null) => Ok(true),
        // Scope variables seeded from the CLI arrive as strings; a string
        // that spells a boolean or a number compares by its parsed value.
        (EvalValue::Str(s), EvalValue::Bool(b)) | (EvalValue::Bool(b), EvalValue::Str(s)) => {
            match s.parse::<bool>() {
                Ok(parsed) => Ok(parsed == *b),
                Err(_) => Err(mismatch(lhs, rhs)),
            }
        }
        (EvalValue::Str(s), EvalValue::Num(n)) | (EvalValue::Num(n), EvalValue::Str(s)) => {
            match s.trim().parse::<f64>() {
                Ok(parsed) => Ok((parsed - n).abs() <= NUMERIC_EQ_TOLERANCE),
                Err(_) => Err(mismatch(lhs, rhs)),
            }
        }
        _ => Err(mismatch(lhs, rhs)),
    }
}

fn mismatch(lhs: &EvalValue, rhs: &EvalValue) -> Error {
    Error::Expression(format!(
        "cannot compare {} with {}",
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn scope_value(name: &str, value: &Value) -> Result<EvalValue> {
    match value {
        Value::Bool(b) => Ok(EvalValue::Bool(*b)),
        Value::Number(n) => n
            .as_f64()
            .map(EvalValue::Num)
            .ok_or_else(|| Error::Expression(format!("variable '{name}' is not a finite number"))),
        Value::String(s) => Ok(EvalValue::Str(s.clone())),
        Value::Null => Ok(EvalValue::Null),
        Value::Array(_) | Value::Object(_) => Err(Error::Expression(format!(
            "variable '{name}' is not a scalar"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Lexer and parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Num(f64),
    Str(String),
    True,
    False,
    Null,
    Not,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(Error::Expression("expected '==' operator".to_string()));
                }
                tokens.push(Token::EqEq);
            }
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    return Err(Error::Expression("expected '&&' operator".to_string()));
                }
                tokens.push(Token::AndAnd);
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(Error::Expression("expected '||' operator".to_string()));
                }
                tokens.push(Token::OrOr);
            }
            '"' | '\'' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('n') => literal.push('\n'),
                            Some('r') => literal.push('\r'),
                            Some('t') => literal.push('\t'),
                            Some(e @ ('\\' | '\'' | '"')) => literal.push(e),
                            Some(other) => {
                                return Err(Error::Expression(format!(
                                    "invalid escape '\\{other}' in string"
                                )))
                            }
                            None => {
                                return Err(Error::Expression(
                                    "unterminated string literal".to_string(),
                                ))
                            }
                        },
                        Some(e) if e == c => break,
                        Some(e) => literal.push(e),
                        None => {
                            return Err(Error::Expression(
                                "unterminated string literal".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(literal));
            }
            '+' | '-' | '0'..='9' => {
                let mut number = String::new();
                number.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let parsed = number
                    .parse::<f64>()
                    .map_err(|_| Error::Expression(format!("invalid number '{number}'")))?;
                tokens.push(Token::Num(parsed));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(ident),
                });
            }
            other => {
                return Err(Error::Expression(format!(
                    "unexpected character '{other}' in expression"
                )))
            }
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

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinOp::Eq,
                Some(Token::NotEq) => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(Error::Expression("expected ')'".to_string())),
                }
            }
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Null) => Ok(Expr::Null),
            Some(other) => Err(Error::Expression(format!(
                "unexpected token {other:?} in expression"
            ))),
            None => Err(Error::Expression("unexpected end of expression".to_string())),
        }
    }
}
