//! Tokenizer for condition expressions.

use crate::error::{EngineError, EngineResult};

/// A token with its character offset in the source expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

/// Token types
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    /// Dotted path such as `request.priority` or `items.0.sku`.
    Path(Vec<String>),
    Number(f64),
    Str(String),
    True,
    False,
    Null,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Minus,
    OpenParen,
    CloseParen,

    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(segments) => write!(f, "{}", segments.join(".")),
            Self::Number(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "'{}'", s),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Null => write!(f, "null"),
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::And => write!(f, "&&"),
            Self::Or => write!(f, "||"),
            Self::Not => write!(f, "!"),
            Self::Minus => write!(f, "-"),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::Eof => write!(f, "end of expression"),
        }
    }
}

/// Lexer for condition expressions.
pub struct Lexer<'a> {
    source: &'a str,
    input: Vec<char>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            input: source.chars().collect(),
            pos: 0,
        }
    }

    /// Tokenize the entire input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> EngineResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.pos >= self.input.len() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    position: self.pos,
                });
                return Ok(tokens);
            }

            tokens.push(self.next_token()?);
        }
    }

    fn next_token(&mut self) -> EngineResult<Token> {
        let start = self.pos;
        let ch = self.input[self.pos];

        let kind = match ch {
            '(' => {
                self.pos += 1;
                TokenKind::OpenParen
            }
            ')' => {
                self.pos += 1;
                TokenKind::CloseParen
            }
            '-' => {
                self.pos += 1;
                TokenKind::Minus
            }
            '=' if self.peek_at(1) == Some('=') => {
                self.pos += 2;
                TokenKind::Eq
            }
            '!' if self.peek_at(1) == Some('=') => {
                self.pos += 2;
                TokenKind::Ne
            }
            '!' => {
                self.pos += 1;
                TokenKind::Not
            }
            '<' if self.peek_at(1) == Some('=') => {
                self.pos += 2;
                TokenKind::Le
            }
            '<' => {
                self.pos += 1;
                TokenKind::Lt
            }
            '>' if self.peek_at(1) == Some('=') => {
                self.pos += 2;
                TokenKind::Ge
            }
            '>' => {
                self.pos += 1;
                TokenKind::Gt
            }
            '&' if self.peek_at(1) == Some('&') => {
                self.pos += 2;
                TokenKind::And
            }
            '|' if self.peek_at(1) == Some('|') => {
                self.pos += 2;
                TokenKind::Or
            }
            '\'' | '"' => self.read_string(ch)?,
            c if c.is_ascii_digit() => self.read_number()?,
            c if is_ident_start(c) => self.read_path_or_keyword()?,
            _ => return Err(self.error(start, format!("unexpected character '{}'", ch))),
        };

        Ok(Token {
            kind,
            position: start,
        })
    }

    fn read_string(&mut self, quote: char) -> EngineResult<TokenKind> {
        let start = self.pos;
        self.pos += 1;

        let mut text = String::new();
        while self.pos < self.input.len() && self.input[self.pos] != quote {
            let ch = self.input[self.pos];
            if ch == '\\' {
                let escaped = self
                    .peek_at(1)
                    .ok_or_else(|| self.error(self.pos, "dangling escape in string literal"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                self.pos += 2;
            } else {
                text.push(ch);
                self.pos += 1;
            }
        }

        if self.pos >= self.input.len() {
            return Err(self.error(start, "unterminated string literal"));
        }

        self.pos += 1;
        Ok(TokenKind::Str(text))
    }

    fn read_number(&mut self) -> EngineResult<TokenKind> {
        let start = self.pos;
        let mut text = String::new();
        let mut seen_dot = false;

        while self.pos < self.input.len() {
            let ch = self.input[self.pos];
            if ch.is_ascii_digit() {
                text.push(ch);
            } else if ch == '.' && !seen_dot && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                seen_dot = true;
                text.push(ch);
            } else {
                break;
            }
            self.pos += 1;
        }

        if self.pos < self.input.len() && is_ident_start(self.input[self.pos]) {
            return Err(self.error(start, format!("malformed number '{}'", text)));
        }

        match text.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(TokenKind::Number(n)),
            Ok(_) => Err(self.error(start, "numeric literal out of range")),
            Err(_) => Err(self.error(start, format!("malformed number '{}'", text))),
        }
    }

    fn read_path_or_keyword(&mut self) -> EngineResult<TokenKind> {
        let start = self.pos;
        let mut segments = vec![self.read_segment()];

        while self.input.get(self.pos) == Some(&'.') {
            self.pos += 1;
            match self.input.get(self.pos) {
                Some(c) if is_ident_char(*c) => segments.push(self.read_segment()),
                _ => return Err(self.error(self.pos, "expected path segment after '.'")),
            }
        }

        if segments.len() == 1 {
            match segments[0].as_str() {
                "true" => return Ok(TokenKind::True),
                "false" => return Ok(TokenKind::False),
                "null" => return Ok(TokenKind::Null),
                _ => {}
            }
        }

        if segments.iter().any(|s| s.is_empty()) {
            return Err(self.error(start, "empty path segment"));
        }

        Ok(TokenKind::Path(segments))
    }

    fn read_segment(&mut self) -> String {
        let mut segment = String::new();
        while let Some(c) = self.input.get(self.pos) {
            if !is_ident_char(*c) {
                break;
            }
            segment.push(*c);
            self.pos += 1;
        }
        segment
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn error(&self, position: usize, message: impl Into<String>) -> EngineError {
        EngineError::ConditionSyntax {
            expression: self.source.to_string(),
            position,
            message: message.into(),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_comparison_tokens() {
        assert_eq!(
            kinds("request.priority == 'URGENT'"),
            vec![
                TokenKind::Path(vec!["request".into(), "priority".into()]),
                TokenKind::Eq,
                TokenKind::Str("URGENT".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            kinds("!(a >= 1.5) || b != null && c <= -2"),
            vec![
                TokenKind::Not,
                TokenKind::OpenParen,
                TokenKind::Path(vec!["a".into()]),
                TokenKind::Ge,
                TokenKind::Number(1.5),
                TokenKind::CloseParen,
                TokenKind::Or,
                TokenKind::Path(vec!["b".into()]),
                TokenKind::Ne,
                TokenKind::Null,
                TokenKind::And,
                TokenKind::Path(vec!["c".into()]),
                TokenKind::Le,
                TokenKind::Minus,
                TokenKind::Number(2.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numeric_path_segment() {
        assert_eq!(
            kinds("items.0.sku"),
            vec![
                TokenKind::Path(vec!["items".into(), "0".into(), "sku".into()]),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""say \"hi\"""#),
            vec![TokenKind::Str("say \"hi\"".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("name == 'abc").tokenize().unwrap_err();
        match err {
            EngineError::ConditionSyntax { position, .. } => assert_eq!(position, 8),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_number_rejected() {
        let source = format!("amount == {}", "9".repeat(400));
        match Lexer::new(&source).tokenize().unwrap_err() {
            EngineError::ConditionSyntax { position, message, .. } => {
                assert_eq!(position, 10);
                assert!(message.contains("out of range"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_single_equals_rejected() {
        assert!(Lexer::new("a = 1").tokenize().is_err());
        assert!(Lexer::new("a & b").tokenize().is_err());
        assert!(Lexer::new("a.").tokenize().is_err());
    }
}
