// Module: Errors
// Typed error values shared across the workflow engine.

use std::fmt;

use thiserror::Error;

/// Classification of an [`Error`], used by reports and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Parse,
    Template,
    Expression,
    RateLimit,
    Transport,
    ResponseRead,
    AssertionFailure,
    CaptureFailure,
    Extraction,
    InvalidInput,
    NotFound,
    Unsupported,
    NoTls,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Parse => "parse",
            Self::Template => "template",
            Self::Expression => "expression",
            Self::RateLimit => "rate limit",
            Self::Transport => "transport",
            Self::ResponseRead => "response read",
            Self::AssertionFailure => "assertion",
            Self::CaptureFailure => "capture",
            Self::Extraction => "extraction",
            Self::InvalidInput => "invalid input",
            Self::NotFound => "not found",
            Self::Unsupported => "unsupported",
            Self::NoTls => "no tls",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Error type for everything that can go wrong while preparing, dispatching
/// or evaluating a workflow step.
///
/// The message alone is user-facing; callers that need to branch use
/// [`Error::kind`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Parse(String),

    #[error("template: {0}")]
    Template(String),

    #[error("expression: {0}")]
    Expression(String),

    #[error("rate limit: {0}")]
    RateLimit(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("failed to read response body: {0}")]
    ResponseRead(String),

    /// An assertion evaluated to false. The message carries the selector
    /// identifier, operator, expected and actual values.
    #[error("{0}")]
    AssertionFailure(String),

    /// A capture could not be extracted or stored.
    #[error("{0}")]
    CaptureFailure(String),

    #[error("{0}")]
    Extraction(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("no TLS connection state available")]
    NoTls,

    #[error("interrupted")]
    Cancelled,

    /// Wraps any error with the 1-based index (and optional name) of the
    /// step it occurred in.
    #[error("{}", step_message(.index, .name, .source))]
    Step {
        index: usize,
        name: Option<String>,
        #[source]
        source: Box<Error>,
    },
}

fn step_message(index: &usize, name: &Option<String>, source: &Error) -> String {
    match name {
        Some(name) => format!("step {index} ({name}): {source}"),
        None => format!("step {index}: {source}"),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Template(_) => ErrorKind::Template,
            Self::Expression(_) => ErrorKind::Expression,
            Self::RateLimit(_) => ErrorKind::RateLimit,
            Self::Transport(_) => ErrorKind::Transport,
            Self::ResponseRead(_) => ErrorKind::ResponseRead,
            Self::AssertionFailure(_) => ErrorKind::AssertionFailure,
            Self::CaptureFailure(_) => ErrorKind::CaptureFailure,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::NoTls => ErrorKind::NoTls,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Step { source, .. } => source.kind(),
        }
    }

    /// Attaches step position to an error bubbling out of a step.
    pub fn at_step(self, index: usize, name: Option<&str>) -> Self {
        Self::Step {
            index,
            name: name.map(str::to_owned),
            source: Box::new(self),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

pub type Result<T> = std::result::Result<T, Error>;
