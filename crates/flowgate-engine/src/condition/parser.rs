//! Recursive-descent parser producing the condition AST.
//!
//! Precedence, lowest first: `||`, `&&`, comparison, unary `!`.
//! Comparisons do not chain, so `a == b == c` is a syntax error.
//! Nesting, counting parentheses, `!` and chained `&&`/`||` operands, is
//! capped at [`MAX_DEPTH`] so parsing and evaluation stay bounded.

use serde_json::Value;

use super::lexer::{Lexer, Token, TokenKind};
use crate::error::{EngineError, EngineResult};

/// Deepest expression tree the parser accepts.
pub const MAX_DEPTH: usize = 64;

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        write!(f, "{}", symbol)
    }
}

/// Parsed condition expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Parse an expression string into an [`Expr`].
pub fn parse(source: &str) -> EngineResult<Expr> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        depth: 0,
    };

    if parser.check(&TokenKind::Eof) {
        return Err(parser.error("empty expression"));
    }

    let expr = parser.parse_or()?;
    if !parser.check(&TokenKind::Eof) {
        return Err(parser.error(format!("unexpected token '{}'", parser.current().kind)));
    }
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn parse_or(&mut self) -> EngineResult<Expr> {
        let saved = self.depth;
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            self.descend()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = saved;
        Ok(left)
    }

    fn parse_and(&mut self) -> EngineResult<Expr> {
        let saved = self.depth;
        let mut left = self.parse_comparison()?;
        while self.eat(&TokenKind::And) {
            self.descend()?;
            let right = self.parse_comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = saved;
        Ok(left)
    }

    fn parse_comparison(&mut self) -> EngineResult<Expr> {
        let left = self.parse_unary()?;

        let op = match self.current().kind {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Le => CompareOp::Le,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Ge => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.advance();

        let right = self.parse_unary()?;

        if matches!(
            self.current().kind,
            TokenKind::Eq | TokenKind::Ne | TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge
        ) {
            return Err(self.error("comparison operators cannot be chained"));
        }

        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_unary(&mut self) -> EngineResult<Expr> {
        if self.eat(&TokenKind::Not) {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> EngineResult<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Number(n) => {
                let value = self.number(n)?;
                self.advance();
                Ok(Expr::Literal(value))
            }
            TokenKind::Minus => {
                self.advance();
                match self.current().kind {
                    TokenKind::Number(n) => {
                        let value = self.number(-n)?;
                        self.advance();
                        Ok(Expr::Literal(value))
                    }
                    _ => Err(self.error("expected number after '-'")),
                }
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenKind::Path(segments) => {
                self.advance();
                Ok(Expr::Path(segments))
            }
            TokenKind::OpenParen => {
                self.descend()?;
                self.advance();
                let inner = self.parse_or()?;
                if !self.eat(&TokenKind::CloseParen) {
                    return Err(self.error("expected ')'"));
                }
                self.depth -= 1;
                Ok(inner)
            }
            TokenKind::Eof => Err(self.error("unexpected end of expression")),
            other => Err(self.error(format!("unexpected token '{}'", other))),
        }
    }

    fn descend(&mut self) -> EngineResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!(
                "expression nested deeper than {} levels",
                MAX_DEPTH
            )));
        }
        Ok(())
    }

    fn number(&self, n: f64) -> EngineResult<Value> {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(|| self.error("numeric literal out of range"))
    }

    fn current(&self) -> &Token {
        // tokenize() always terminates the stream with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> EngineError {
        EngineError::ConditionSyntax {
            expression: self.source.to_string(),
            position: self.current().position,
            message: message.into(),
        }
    }
}
