//! Lexer for kernel source text using logos
//!
//! Supports tokens like:
//! - Keywords: kernel, fn, for, in, let, return
//! - Identifiers: a, output, relu
//! - Numbers: 1, 2.5, 1e-3
//! - Operators: +, -, *, /, %, @
//! - Punctuation: (, ), [, ], {, }, ,, ;, ., =

use logos::Logos;

use crate::error::{SpecializeError, SpecializeResult};

/// Token types for the kernel language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")] // Skip whitespace
#[logos(skip r"#[^\n]*")] // Line comments
pub enum Token {
    // Literals
    #[regex(r"[0-9]+(\.[0-9]+)?[eE][+-]?[0-9]+|[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    // Keywords
    #[token("kernel")]
    Kernel,

    #[token("fn")]
    Fn,

    #[token("for")]
    For,

    #[token("in")]
    In,

    #[token("let")]
    Let,

    #[token("return")]
    Return,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("@")]
    At,

    #[token("=")]
    Equals,

    #[token(".")]
    Dot,

    // Punctuation
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token(",")]
    Comma,

    #[token(";")]
    Semicolon,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Float(n) => write!(f, "{:?}", n),
            Token::Int(n) => write!(f, "{}", n),
            Token::Kernel => write!(f, "kernel"),
            Token::Fn => write!(f, "fn"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::Let => write!(f, "let"),
            Token::Return => write!(f, "return"),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::At => write!(f, "@"),
            Token::Equals => write!(f, "="),
            Token::Dot => write!(f, "."),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
        }
    }
}

/// Lexer wrapper that turns unknown input into positioned errors
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Get current position in source
    pub fn span(&self) -> std::ops::Range<usize> {
        self.inner.span()
    }

    /// Next token, `None` at end of input
    pub fn next_token(&mut self) -> SpecializeResult<Option<Token>> {
        match self.inner.next() {
            None => Ok(None),
            Some(Ok(token)) => Ok(Some(token)),
            Some(Err(())) => Err(SpecializeError::LexerError {
                position: self.inner.span().start,
                message: format!("unexpected input `{}`", self.inner.slice()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        while let Some(tok) = lexer.next_token().unwrap() {
            out.push(tok);
        }
        out
    }

    #[test]
    fn test_indexed_assignment() {
        assert_eq!(
            tokens("output[y, x] = a[y, x] + b;"),
            vec![
                Token::Ident("output".to_string()),
                Token::LBracket,
                Token::Ident("y".to_string()),
                Token::Comma,
                Token::Ident("x".to_string()),
                Token::RBracket,
                Token::Equals,
                Token::Ident("a".to_string()),
                Token::LBracket,
                Token::Ident("y".to_string()),
                Token::Comma,
                Token::Ident("x".to_string()),
                Token::RBracket,
                Token::Plus,
                Token::Ident("b".to_string()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn test_keywords_and_loop_header() {
        assert_eq!(
            tokens("for y, x in output.indices() {"),
            vec![
                Token::For,
                Token::Ident("y".to_string()),
                Token::Comma,
                Token::Ident("x".to_string()),
                Token::In,
                Token::Ident("output".to_string()),
                Token::Dot,
                Token::Ident("indices".to_string()),
                Token::LParen,
                Token::RParen,
                Token::LBrace,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("3 2.5 1e-3 4.0E2"),
            vec![
                Token::Int(3),
                Token::Float(2.5),
                Token::Float(1e-3),
                Token::Float(400.0),
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(
            tokens("format inner"),
            vec![
                Token::Ident("format".to_string()),
                Token::Ident("inner".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            tokens("a # trailing comment\n+ b"),
            vec![
                Token::Ident("a".to_string()),
                Token::Plus,
                Token::Ident("b".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_character_is_error() {
        let mut lexer = Lexer::new("a $ b");
        assert!(lexer.next_token().unwrap().is_some());
        match lexer.next_token() {
            Err(SpecializeError::LexerError { position, .. }) => assert_eq!(position, 2),
            other => panic!("Expected lexer error, got {:?}", other),
        }
    }
}
