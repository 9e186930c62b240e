/*!
# Trace Text Lexer

Token definitions for the persisted trace format, plus a cursor for walking
one line of tokens with positioned errors.

The format is line oriented, so lexing happens per line and the token stream
never holds more than one line of a trace file.
*/

use std::fmt;

use logos::Logos;

use crate::core::{Result, TraceError};

/// Tokens of the trace text format.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\f]+")]
pub enum TraceToken {
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<u64>().ok())]
    Number(u64),

    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("-")]
    Dash,

    #[token("COMPLETE")]
    Complete,
    #[token("INCOMPLETE")]
    Incomplete,
}

impl fmt::Display for TraceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceToken::Number(n) => write!(f, "{n}"),
            TraceToken::LBrace => write!(f, "{{"),
            TraceToken::RBrace => write!(f, "}}"),
            TraceToken::LParen => write!(f, "("),
            TraceToken::RParen => write!(f, ")"),
            TraceToken::Comma => write!(f, ","),
            TraceToken::Dash => write!(f, "-"),
            TraceToken::Complete => write!(f, "COMPLETE"),
            TraceToken::Incomplete => write!(f, "INCOMPLETE"),
        }
    }
}

/// Tokens of one trace line, consumed left to right.
#[derive(Debug)]
pub struct TokenCursor {
    tokens: Vec<TraceToken>,
    pos: usize,
    line: usize,
}

impl TokenCursor {
    /// Tokenize one line. `line_no` is 1-based and only used in errors.
    pub fn new(text: &str, line_no: usize) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut lexer = TraceToken::lexer(text);
        while let Some(result) = lexer.next() {
            match result {
                Ok(token) => tokens.push(token),
                Err(()) => {
                    return Err(TraceError::syntax(
                        line_no,
                        format!(
                            "unrecognized input {:?} at column {}",
                            lexer.slice(),
                            lexer.span().start + 1
                        ),
                    ));
                }
            }
        }
        Ok(TokenCursor {
            tokens,
            pos: 0,
            line: line_no,
        })
    }

    pub fn line_no(&self) -> usize {
        self.line
    }

    pub fn peek(&self) -> Option<TraceToken> {
        self.tokens.get(self.pos).copied()
    }

    pub fn next(&mut self) -> Option<TraceToken> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Consume a number token.
    pub fn expect_number(&mut self) -> Result<u64> {
        match self.next() {
            Some(TraceToken::Number(n)) => Ok(n),
            found => Err(self.unexpected("a number", found)),
        }
    }

    /// Consume exactly the given punctuation token.
    pub fn expect(&mut self, expected: TraceToken) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            found => Err(self.unexpected(&format!("'{expected}'"), found)),
        }
    }

    /// Require that the whole line has been consumed.
    pub fn expect_end(&mut self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.unexpected("end of line", Some(token))),
        }
    }

    pub fn unexpected(&self, wanted: &str, found: Option<TraceToken>) -> TraceError {
        match found {
            Some(token) => {
                TraceError::syntax(self.line, format!("expected {wanted}, found '{token}'"))
            }
            None => TraceError::syntax(self.line, format!("expected {wanted}, found end of line")),
        }
    }
}
