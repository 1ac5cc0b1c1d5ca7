//! Error types shared across the engine core.

use std::fmt;

/// Semantic chess error: an operation was asked to do something the rules or
/// the current position cannot support (unmakeable move, corrupt state, no
/// piece where one was required). The current request is abandoned; the
/// caller decides whether to recover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChessError {
    msg: String,
}

impl ChessError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl fmt::Display for ChessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for ChessError {}

/// A known gap: the requested case is recognized but not handled. Callers
/// must not guess a result; the proof-game filter converts this into an
/// "unknown" verdict with an info tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotImplementedError {
    msg: String,
}

impl NotImplementedError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl fmt::Display for NotImplementedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not implemented: {}", self.msg)
    }
}

impl std::error::Error for NotImplementedError {}
