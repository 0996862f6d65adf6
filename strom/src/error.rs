use std::fmt;

/// Every failure the engine can surface, one variant per error kind.
///
/// Errors propagate out of the interpreter until a REPL frame prints and
/// recovers, or the audio driver logs them and drops the offending player.
/// User code has no try/except.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Parser or compile-time structural failure.
    Syntax(String),
    /// Operator applied to a value of a kind it does not handle.
    WrongType {
        what: &'static str,
        expected: &'static str,
        got: &'static str,
    },
    /// Numeric or index bound violated.
    OutOfRange(String),
    /// Dictionary lookup fell through the scope chain.
    NotFound(String),
    /// Interpreter popped an empty stack region.
    StackUnderflow,
    /// Interpreter stack exceeded its bound.
    StackOverflow,
    /// An operation that requires a finite stream was invoked on an
    /// indefinite one.
    IndefiniteOperation(&'static str),
    /// Dispatch has no method for the given argument kinds.
    UndefinedOperation(&'static str),
    /// Catch-all for backend/OS errors surfaced up.
    Failed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short discriminant name, shown to non-REPL callers.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Syntax(_) => "syntax",
            Error::WrongType { .. } => "wrong type",
            Error::OutOfRange(_) => "out of range",
            Error::NotFound(_) => "not found",
            Error::StackUnderflow => "stack underflow",
            Error::StackOverflow => "stack overflow",
            Error::IndefiniteOperation(_) => "indefinite operation",
            Error::UndefinedOperation(_) => "undefined operation",
            Error::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Syntax(msg) => write!(f, "syntax error: {msg}"),
            Error::WrongType {
                what,
                expected,
                got,
            } => {
                write!(f, "wrong type for {what}: expected {expected}, got {got}")
            }
            Error::OutOfRange(msg) => write!(f, "out of range: {msg}"),
            Error::NotFound(key) => write!(f, "not found: {key}"),
            Error::StackUnderflow => write!(f, "stack underflow"),
            Error::StackOverflow => write!(f, "stack overflow"),
            Error::IndefiniteOperation(what) => {
                write!(f, "operation on indefinite stream: {what}")
            }
            Error::UndefinedOperation(what) => {
                write!(f, "undefined operation: {what}")
            }
            Error::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Shorthand used all over the dispatch code.
pub fn wrong_type(
    what: &'static str,
    expected: &'static str,
    got: &'static str,
) -> Error {
    Error::WrongType {
        what,
        expected,
        got,
    }
}
