//! Lexer for rule expressions using Logos
//!
//! Aggregation function names and time units are ordinary identifiers here;
//! the parser resolves them contextually (case-insensitively). The word
//! forms `AND` and `OR` are uppercase-only keywords.

use logos::Logos;
use std::fmt;

/// Token type for rule expressions
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[token("||")]
    OrOr,
    #[token("OR")]
    Or,
    #[token("&&")]
    AndAnd,
    #[token("AND")]
    And,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,

    #[token(">=")]
    Ge,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token("<")]
    Lt,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    #[regex(r"[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| Some(lex.slice().to_string()))]
    Ident(String),

    /// Byte sequence the grammar does not recognize
    Error(String),

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::OrOr => write!(f, "||"),
            Token::Or => write!(f, "OR"),
            Token::AndAnd => write!(f, "&&"),
            Token::And => write!(f, "AND"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Ge => write!(f, ">="),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Lt => write!(f, "<"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Number(n) => write!(f, "{}", n),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Error(s) => write!(f, "{}", s),
            Token::Eof => write!(f, "EOF"),
        }
    }
}

/// Spanned token with byte positions
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

/// Lexer wrapper that produces spanned tokens and a trailing `Eof`
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    eof_emitted: bool,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            eof_emitted: false,
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = SpannedToken;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(Ok(token)) => {
                let span = self.inner.span();
                Some(SpannedToken {
                    token,
                    start: span.start,
                    end: span.end,
                })
            }
            Some(Err(())) => {
                let span = self.inner.span();
                Some(SpannedToken {
                    token: Token::Error(self.inner.slice().to_string()),
                    start: span.start,
                    end: span.end,
                })
            }
            None if !self.eof_emitted => {
                self.eof_emitted = true;
                let pos = self.inner.span().end;
                Some(SpannedToken {
                    token: Token::Eof,
                    start: pos,
                    end: pos,
                })
            }
            None => None,
        }
    }
}

/// Tokenize a source string into spanned tokens
pub fn tokenize(source: &str) -> Vec<SpannedToken> {
    Lexer::new(source).collect()
}
