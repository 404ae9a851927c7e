//! Predicate expressions over records
//!
//! A small SQL-like boolean language used by expectations and row filters:
//!
//! ```text
//! event_id IS NOT NULL
//! user_id > 0 AND amount <= 500.0
//! event_type IN ('view', 'add_to_cart', 'purchase')
//! NOT (country = 'US' OR country = 'CA')
//! ```
//!
//! Evaluation uses three-valued logic: any comparison with a null operand is
//! unknown, and unknown propagates through `AND`, `OR` and `NOT` the way SQL
//! defines it.

use crate::error::{PredicateError, PredicateResult};
use medallion_types::{Record, Value};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn test(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Field(String),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Evaluate to `Some(bool)` or `None` for unknown
    pub fn evaluate(&self, record: &Record) -> Option<bool> {
        match self {
            Expr::Literal(Value::Bool(b)) => Some(*b),
            Expr::Literal(_) => None,
            Expr::Field(name) => record.value(name).as_bool(),
            Expr::IsNull { expr, negated } => Some(expr.value(record).is_null() != *negated),
            Expr::Compare { left, op, right } => left
                .value(record)
                .compare(&right.value(record))
                .map(|ordering| op.test(ordering)),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let needle = expr.value(record);
                if needle.is_null() {
                    return None;
                }
                let mut saw_unknown = false;
                for candidate in list {
                    match needle.compare(&candidate.value(record)) {
                        Some(Ordering::Equal) => return Some(!*negated),
                        Some(_) => {}
                        None => saw_unknown = true,
                    }
                }
                if saw_unknown {
                    None
                } else {
                    Some(*negated)
                }
            }
            Expr::And(left, right) => match (left.evaluate(record), right.evaluate(record)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Expr::Or(left, right) => match (left.evaluate(record), right.evaluate(record)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Expr::Not(inner) => inner.evaluate(record).map(|b| !b),
        }
    }

    /// Scalar value of an operand position
    fn value(&self, record: &Record) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Field(name) => record.value(name).clone(),
            other => other.evaluate(record).map(Value::Bool).unwrap_or(Value::Null),
        }
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Field(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::IsNull { expr, .. } | Expr::Not(expr) => expr.collect_fields(out),
            Expr::Compare { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expr::InList { expr, list, .. } => {
                expr.collect_fields(out);
                for item in list {
                    item.collect_fields(out);
                }
            }
        }
    }
}

/// A parsed predicate together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    source: String,
    expr: Expr,
}

impl Predicate {
    pub fn parse(source: &str) -> PredicateResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(PredicateError::UnexpectedToken {
                found: token.to_string(),
                expected: "end of expression".to_string(),
            });
        }
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// Three-valued evaluation
    pub fn evaluate(&self, record: &Record) -> Option<bool> {
        self.expr.evaluate(record)
    }

    /// True only when the predicate evaluates to TRUE; unknown does not match
    pub fn matches(&self, record: &Record) -> bool {
        self.evaluate(record) == Some(true)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Field names referenced by the predicate, in first-use order
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.expr.collect_fields(&mut out);
        out
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Op(CompareOp),
    Minus,
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
    Is,
    In,
    Null,
    True,
    False,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) | Token::Number(s) => write!(f, "{}", s),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Op(op) => {
                let text = match op {
                    CompareOp::Eq => "=",
                    CompareOp::NotEq => "!=",
                    CompareOp::Lt => "<",
                    CompareOp::LtEq => "<=",
                    CompareOp::Gt => ">",
                    CompareOp::GtEq => ">=",
                };
                write!(f, "{}", text)
            }
            Token::Minus => write!(f, "-"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::Is => write!(f, "IS"),
            Token::In => write!(f, "IN"),
            Token::Null => write!(f, "NULL"),
            Token::True => write!(f, "TRUE"),
            Token::False => write!(f, "FALSE"),
        }
    }
}

fn tokenize(input: &str) -> PredicateResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
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
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CompareOp::NotEq));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op(CompareOp::LtEq));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Op(CompareOp::NotEq));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(CompareOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::GtEq));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                    i += 1;
                }
            }
            '\'' => {
                let start = i;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(PredicateError::UnterminatedString { position: start }),
                        // '' is an escaped quote
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IS" => Token::Is,
                    "IN" => Token::In,
                    "NULL" => Token::Null,
                    "TRUE" => Token::True,
                    "FALSE" => Token::False,
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            other => {
                return Err(PredicateError::UnexpectedChar {
                    ch: other,
                    position: i,
                })
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

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> PredicateResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(PredicateError::UnexpectedToken {
                found: token.to_string(),
                expected: expected.to_string(),
            }),
            None => Err(PredicateError::UnexpectedEnd {
                expected: expected.to_string(),
            }),
        }
    }

    fn parse_or(&mut self) -> PredicateResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PredicateResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> PredicateResult<Expr> {
        if self.eat(&Token::Not) {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> PredicateResult<Expr> {
        let left = self.parse_operand()?;

        match self.peek() {
            Some(Token::Is) => {
                self.pos += 1;
                let negated = self.eat(&Token::Not);
                self.expect(Token::Null)?;
                Ok(Expr::IsNull {
                    expr: Box::new(left),
                    negated,
                })
            }
            Some(Token::Op(op)) => {
                let op = *op;
                self.pos += 1;
                let right = self.parse_operand()?;
                Ok(Expr::Compare {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                })
            }
            Some(Token::In) => {
                self.pos += 1;
                self.parse_in_list(left, false)
            }
            Some(Token::Not) if self.tokens.get(self.pos + 1) == Some(&Token::In) => {
                self.pos += 2;
                self.parse_in_list(left, true)
            }
            _ => Ok(left),
        }
    }

    fn parse_in_list(&mut self, expr: Expr, negated: bool) -> PredicateResult<Expr> {
        self.expect(Token::LParen)?;
        let mut list = vec![self.parse_operand()?];
        while self.eat(&Token::Comma) {
            list.push(self.parse_operand()?);
        }
        self.expect(Token::RParen)?;
        Ok(Expr::InList {
            expr: Box::new(expr),
            list,
            negated,
        })
    }

    fn parse_operand(&mut self) -> PredicateResult<Expr> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Expr::Field(name)),
            Some(Token::Number(text)) => parse_number(&text, false),
            Some(Token::Minus) => match self.next() {
                Some(Token::Number(text)) => parse_number(&text, true),
                Some(token) => Err(PredicateError::UnexpectedToken {
                    found: token.to_string(),
                    expected: "number".to_string(),
                }),
                None => Err(PredicateError::UnexpectedEnd {
                    expected: "number".to_string(),
                }),
            },
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(PredicateError::UnexpectedToken {
                found: token.to_string(),
                expected: "field, literal or '('".to_string(),
            }),
            None => Err(PredicateError::UnexpectedEnd {
                expected: "field, literal or '('".to_string(),
            }),
        }
    }
}

fn parse_number(text: &str, negative: bool) -> PredicateResult<Expr> {
    let invalid = || PredicateError::InvalidNumber {
        literal: text.to_string(),
    };
    let value = if text.contains('.') {
        let f: f64 = text.parse().map_err(|_| invalid())?;
        Value::Float(if negative { -f } else { f })
    } else {
        let i: i64 = text.parse().map_err(|_| invalid())?;
        Value::Int(if negative { -i } else { i })
    };
    Ok(Expr::Literal(value))
}
