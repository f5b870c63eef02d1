//! Runtime error facilities.
//!
//! A runtime error is a single logical throw carrying an error kind, the
//! position it originated at, and a chain of enrichment messages added by
//! the executors it unwound through. User-thrown values ride along in
//! `thrown` so `try`/`catch` can match them against their class types.

use shale_parser::SourcePosition;

use crate::values::Value;

/// Classifies runtime errors; each kind maps to a catchable built-in
/// exception type of the same name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A lexing failure surfaced at runtime (e.g. inside `eval`).
    Lex,
    /// A parse failure surfaced at runtime.
    Parser,
    /// An operation was applied to a type that does not support it.
    IncompatibleType,
    /// A function was called with an incompatible parameter list.
    FuncParams,
    /// An identifier could not be resolved.
    IdNotFound,
    /// A conflicting symbol definition.
    SymbolDef,
    /// Invalid arguments to an operation or built-in.
    InvalidArgs,
    /// The executor reached a node it has no rule for.
    InvalidOpcode,
    /// A module import failed.
    Import,
    /// An `assert` failed.
    Assert,
    /// An error inside `eval`.
    Eval,
    /// A value thrown by user code.
    ObjectThrown,
    /// Functionality that is recognized but not implemented.
    NotImplemented,
    /// A host I/O failure.
    Io,
}

impl ErrorKind {
    /// The name of the catchable exception type for this kind.
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Lex => "LexError",
            Self::Parser => "ParserError",
            Self::IncompatibleType => "IncompatibleType",
            Self::FuncParams => "FuncParams",
            Self::IdNotFound => "IdNotFound",
            Self::SymbolDef => "SymbolDef",
            Self::InvalidArgs => "InvalidArgs",
            Self::InvalidOpcode => "InvalidOpcode",
            Self::Import => "ImportError",
            Self::Assert => "AssertError",
            Self::Eval => "EvalError",
            Self::ObjectThrown => "ObjectThrown",
            Self::NotImplemented => "NotImplemented",
            Self::Io => "IoError",
        }
    }

    /// All kinds that get a catchable type registered in the system table.
    pub const CATCHABLE: &'static [Self] = &[
        Self::Lex,
        Self::Parser,
        Self::IncompatibleType,
        Self::FuncParams,
        Self::IdNotFound,
        Self::SymbolDef,
        Self::InvalidArgs,
        Self::InvalidOpcode,
        Self::Import,
        Self::Assert,
        Self::Eval,
        Self::NotImplemented,
        Self::Io,
    ];
}

/// One entry in an error's message chain.
#[derive(Clone, Debug)]
pub struct TraceMessage {
    /// The message text.
    pub message: String,
    /// The position the message refers to.
    pub pos: SourcePosition,
    /// The literal source line; filled in by the interpreter façade.
    pub source_line: Option<String>,
}

/// A runtime error.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    /// The error classification.
    pub kind: ErrorKind,
    /// The primary message.
    pub message: String,
    /// Where the error originated, once known.
    pub pos: Option<SourcePosition>,
    /// Enrichment messages, outermost first.
    pub trace: Vec<TraceMessage>,
    /// The thrown value for `throw` statements.
    pub thrown: Option<Value>,
}

impl Error {
    /// Returns a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            pos: None,
            trace: vec![],
            thrown: None,
        }
    }

    /// Returns a new error carrying a position.
    pub fn at(kind: ErrorKind, message: impl Into<String>, pos: SourcePosition) -> Self {
        Self {
            kind,
            message: message.into(),
            pos: Some(pos),
            trace: vec![],
            thrown: None,
        }
    }

    /// Returns an error representing a user-thrown value.
    pub fn thrown(value: Value, pos: SourcePosition) -> Self {
        Self {
            kind: ErrorKind::ObjectThrown,
            message: format!("uncaught exception: {}", value.format()),
            pos: Some(pos),
            trace: vec![],
            thrown: Some(value),
        }
    }

    /// Sets the position unless one is already recorded. Executors call
    /// this as errors unwind so the innermost position wins.
    #[must_use]
    pub fn or_pos(mut self, pos: SourcePosition) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos);
        }
        self
    }

    /// Appends an enrichment message to the chain.
    #[must_use]
    pub fn chain(mut self, message: impl Into<String>, pos: SourcePosition) -> Self {
        self.trace.push(TraceMessage {
            message: message.into(),
            pos,
            source_line: None,
        });
        self
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, format!("i/o error: {err}"))
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Self::new(ErrorKind::Io, format!("system error: {errno}"))
    }
}

/// Shorthand for incompatible-type errors, the most common failure in the
/// object model.
pub fn incompatible_type(operation: &str, type_name: &str) -> Error {
    Error::new(
        ErrorKind::IncompatibleType,
        format!("'{type_name}' has no '{operation}' operation"),
    )
}

/// Convenience for returning a not-implemented error.
pub fn unimp<T>(msg: &str) -> Result<T, Error> {
    Err(Error::new(ErrorKind::NotImplemented, msg))
}
