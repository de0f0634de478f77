//! Graph expressions
//!
//! A catalog expression is a whitespace-separated list of terms, each an
//! arithmetic expression over `MSG.field` references, e.g.
//! `ATT.Roll ATT.DesRoll` or `GPS.Alt-BARO.Alt`. A trailing `:N` on a term
//! selects a plot axis and is ignored here.

use crate::error::{ExplorerError, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Split an expression string into terms at top-level whitespace
pub fn split_terms(expression: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for ch in expression.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if ch.is_whitespace() && depth <= 0 {
            if !current.is_empty() {
                terms.push(strip_axis_suffix(&current));
                current.clear();
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        terms.push(strip_axis_suffix(&current));
    }
    terms
}

fn strip_axis_suffix(term: &str) -> String {
    static AXIS: OnceLock<Option<Regex>> = OnceLock::new();
    let axis = AXIS.get_or_init(|| Regex::new(r":\d+$").ok());
    match axis {
        Some(re) => re.replace(term, "").into_owned(),
        None => term.to_string(),
    }
}

/// Reference to one field of one message type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldRef {
    pub msg_type: String,
    pub field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Degrees,
    Radians,
    Sin,
    Cos,
    Tan,
    Min,
    Max,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "abs" => Function::Abs,
            "sqrt" => Function::Sqrt,
            "degrees" => Function::Degrees,
            "radians" => Function::Radians,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "min" => Function::Min,
            "max" => Function::Max,
            _ => return None,
        };
        Some(function)
    }

    fn arity(self) -> usize {
        match self {
            Function::Min | Function::Max => 2,
            _ => 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match (self, args) {
            (Function::Abs, [x]) => x.abs(),
            (Function::Sqrt, [x]) => x.sqrt(),
            (Function::Degrees, [x]) => x.to_degrees(),
            (Function::Radians, [x]) => x.to_radians(),
            (Function::Sin, [x]) => x.sin(),
            (Function::Cos, [x]) => x.cos(),
            (Function::Tan, [x]) => x.tan(),
            (Function::Min, [a, b]) => a.min(*b),
            (Function::Max, [a, b]) => a.max(*b),
            _ => f64::NAN,
        }
    }
}

/// Parsed graph term
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Field(FieldRef),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    pub fn parse(input: &str) -> Result<Expr> {
        let mut parser = ExprParser::new(input);
        let expr = parser.parse_expr()?;
        parser.expect_end()?;
        Ok(expr)
    }

    /// Distinct field references, sorted
    pub fn references(&self) -> Vec<FieldRef> {
        let mut refs = BTreeSet::new();
        self.collect_refs(&mut refs);
        refs.into_iter().collect()
    }

    fn collect_refs(&self, refs: &mut BTreeSet<FieldRef>) {
        match self {
            Expr::Number(_) => {}
            Expr::Field(field) => {
                refs.insert(field.clone());
            }
            Expr::Neg(inner) => inner.collect_refs(refs),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_refs(refs);
                rhs.collect_refs(refs);
            }
            Expr::Call(_, args) => args.iter().for_each(|arg| arg.collect_refs(refs)),
        }
    }

    /// Evaluate with field values from `lookup`; `None` when a field has no value yet
    pub fn evaluate<F>(&self, lookup: &F) -> Option<f64>
    where
        F: Fn(&FieldRef) -> Option<f64>,
    {
        let value = match self {
            Expr::Number(v) => *v,
            Expr::Field(field) => lookup(field)?,
            Expr::Neg(inner) => -inner.evaluate(lookup)?,
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.evaluate(lookup)?;
                let b = rhs.evaluate(lookup)?;
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                }
            }
            Expr::Call(function, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(lookup))
                    .collect::<Option<Vec<f64>>>()?;
                function.apply(&values)
            }
        };
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

struct ExprParser<'a> {
    lexer: ExprLexer<'a>,
    lookahead: Option<Token>,
}

impl<'a> ExprParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lexer: ExprLexer::new(input),
            lookahead: None,
        }
    }

    // expr := term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Expr> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.peek_token()? {
                Some(Token::Op('+')) => BinaryOp::Add,
                Some(Token::Op('-')) => BinaryOp::Sub,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_term()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    // term := unary (('*' | '/') unary)*
    fn parse_term(&mut self) -> Result<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek_token()? {
                Some(Token::Op('*')) => BinaryOp::Mul,
                Some(Token::Op('/')) => BinaryOp::Div,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_unary()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek_token()? {
            Some(Token::Op('-')) => {
                self.next_token()?;
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Op('+')) => {
                self.next_token()?;
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next_token()? {
            Some(Token::Number(v)) => Ok(Expr::Number(v)),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect_token(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                if self.peek_token()? == Some(Token::LParen) {
                    self.next_token()?;
                    self.parse_call(&name)
                } else {
                    parse_field_ref(&name).map(Expr::Field)
                }
            }
            Some(token) => Err(parse_error(format!("unexpected token {:?}", token))),
            None => Err(parse_error("unexpected end of expression")),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr> {
        let function = Function::from_name(name)
            .ok_or_else(|| parse_error(format!("unknown function '{}'", name)))?;
        let mut args = vec![self.parse_expr()?];
        while self.peek_token()? == Some(Token::Comma) {
            self.next_token()?;
            args.push(self.parse_expr()?);
        }
        self.expect_token(&Token::RParen)?;
        if args.len() != function.arity() {
            return Err(parse_error(format!(
                "{} takes {} argument(s), got {}",
                name,
                function.arity(),
                args.len()
            )));
        }
        Ok(Expr::Call(function, args))
    }

    fn expect_token(&mut self, expected: &Token) -> Result<()> {
        match self.next_token()? {
            Some(token) if &token == expected => Ok(()),
            Some(token) => Err(parse_error(format!("expected {:?}, got {:?}", expected, token))),
            None => Err(parse_error(format!("expected {:?}", expected))),
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.next_token()? {
            None => Ok(()),
            Some(token) => Err(parse_error(format!("trailing input at {:?}", token))),
        }
    }

    fn peek_token(&mut self) -> Result<Option<Token>> {
        if self.lookahead.is_none() {
            self.lookahead = self.lexer.next_token()?;
        }
        Ok(self.lookahead.clone())
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        match self.lookahead.take() {
            Some(token) => Ok(Some(token)),
            None => self.lexer.next_token(),
        }
    }
}

struct ExprLexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    index: usize,
}

impl<'a> ExprLexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            index: 0,
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        while self.index < self.bytes.len() && self.bytes[self.index].is_ascii_whitespace() {
            self.index += 1;
        }
        let Some(&ch) = self.bytes.get(self.index) else {
            return Ok(None);
        };
        let token = match ch {
            b'(' => {
                self.index += 1;
                Token::LParen
            }
            b')' => {
                self.index += 1;
                Token::RParen
            }
            b',' => {
                self.index += 1;
                Token::Comma
            }
            b'+' | b'-' | b'*' | b'/' => {
                self.index += 1;
                Token::Op(ch as char)
            }
            b'0'..=b'9' | b'.' => self.lex_number()?,
            _ if is_ident_start(ch) => self.lex_identifier(),
            _ => {
                return Err(parse_error(format!(
                    "unexpected character '{}' at {}",
                    ch as char, self.index
                )))
            }
        };
        Ok(Some(token))
    }

    fn lex_number(&mut self) -> Result<Token> {
        let start = self.index;
        while self.index < self.bytes.len() {
            let ch = self.bytes[self.index];
            let exponent_sign = (ch == b'+' || ch == b'-')
                && matches!(self.bytes.get(self.index.wrapping_sub(1)), Some(b'e' | b'E'));
            if ch.is_ascii_digit() || ch == b'.' || ch == b'e' || ch == b'E' || exponent_sign {
                self.index += 1;
            } else {
                break;
            }
        }
        let text = &self.input[start..self.index];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| parse_error(format!("invalid number '{}'", text)))
    }

    fn lex_identifier(&mut self) -> Token {
        let start = self.index;
        self.index += 1;
        while self.index < self.bytes.len() && is_ident_continue(self.bytes[self.index]) {
            self.index += 1;
        }
        Token::Ident(self.input[start..self.index].to_string())
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'.'
}

fn parse_field_ref(name: &str) -> Result<FieldRef> {
    match name.split_once('.') {
        Some((msg_type, field))
            if !msg_type.is_empty() && !field.is_empty() && !field.contains('.') =>
        {
            Ok(FieldRef {
                msg_type: msg_type.to_string(),
                field: field.to_string(),
            })
        }
        _ => Err(parse_error(format!("expected MSG.field, got '{}'", name))),
    }
}

fn parse_error(msg: impl Into<String>) -> ExplorerError {
    ExplorerError::Parse(msg.into())
}
