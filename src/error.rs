use std::fmt;

use thiserror::Error;

use crate::token::{Token, TokenType};

/// Mirrors the book's `report(line, where, message)`: `where` is empty for
/// lexer errors, `" at end"` or `" at '<lexeme>'"` for parser/resolver
/// errors. Kept as its own type (rather than folded into the message
/// string) so `SourceError::at` can derive it from a `Token` once.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Bare,
    End,
    Token(String),
}

/// A single lex, parse, or resolve diagnostic. The `Display` impl below is
/// the byte-stable wire format external tooling greps for; don't reformat it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceError {
    pub line: u32,
    pub location: Location,
    pub message: String,
}

impl SourceError {
    pub fn lex(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            location: Location::Bare,
            message: message.into(),
        }
    }

    /// Used by both the parser and the resolver: the resolver reports its
    /// static errors (shadowing, stray `this`/`super`/`return`) through the
    /// same "at token" shape the parser uses.
    pub fn at(token: &Token, message: impl Into<String>) -> Self {
        let location = if token.token_type == TokenType::Eof {
            Location::End
        } else {
            Location::Token(token.lexeme.clone())
        };
        Self {
            line: token.line,
            location,
            message: message.into(),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Location::Bare => write!(f, "[line {}] Error: {}", self.line, self.message),
            Location::End => write!(f, "[line {} at end] Error: {}", self.line, self.message),
            Location::Token(lexeme) => {
                write!(f, "[line {} at '{}'] Error: {}", self.line, lexeme, self.message)
            }
        }
    }
}

impl std::error::Error for SourceError {}

/// The accumulated lex/parse/resolve errors for one `run`. Non-empty means
/// the run stops before interpretation ever begins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics(pub Vec<SourceError>);

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, error: SourceError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

/// A runtime type/arity/name error, carrying the offending token so the
/// interpreter can report a line number.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Runtime error line {}: {message}", token.line)]
pub struct RuntimeError {
    pub token: Token,
    pub message: String,
}

impl RuntimeError {
    pub fn new(token: Token, message: impl Into<String>) -> Self {
        Self {
            token,
            message: message.into(),
        }
    }
}

/// Top-level error threaded across the `run(source)` boundary and out to the
/// CLI. Not used inside the interpreter's own control flow: `return` unwinds
/// via `std::ops::ControlFlow`, never through this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Diagnostics(#[from] Diagnostics),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
