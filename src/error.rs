//! Crate-wide error type (§7 of the design doc).
//!
//! Two families: `Fatal` indicates a programmer-visible bug or an unusable
//! input that the whole run cannot recover from; `Drop` indicates that the
//! current trace or program simply isn't expressible in the target's
//! universe, and the enclosing loop should skip it and carry on.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TraceError>;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("fatal: {0}")]
    Fatal(#[from] FatalKind),

    #[error("dropped: {0}")]
    Drop(#[from] DropKind),
}

#[derive(Debug, Error)]
pub enum FatalKind {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("trace lexer failed on line {line}: {message}")]
    LexerFailure { line: usize, message: String },

    #[error("unknown flag token `{0}` during expression evaluation")]
    UnknownFlagToken(String),

    #[error("unknown inner-call name `{0}`")]
    UnknownInnerCall(String),

    #[error("validation failed for program {index}: {message}")]
    ValidationFailed { index: usize, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DropKind {
    #[error("no generic syscall handle for `{0}`")]
    MissingHandle(String),

    #[error("program layout exceeded the {limit:#x}-byte memory budget (needed {needed:#x})")]
    MemoryBudgetExceeded { needed: u64, limit: u64 },

    #[error("serialised program exceeds the exec buffer budget ({size} > {limit} bytes)")]
    SerializedTooLarge { size: usize, limit: usize },
}

impl TraceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TraceError::Fatal(_))
    }
}
