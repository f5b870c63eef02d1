//! Lexing and parsing errors.

use crate::token::{SourcePosition, Token};

/// An error produced while scanning source text.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LexError {
    /// An unterminated string literal reached the end of the input.
    #[error("unterminated string literal at {0}")]
    UnterminatedString(SourcePosition),

    /// An invalid escape sequence inside a string literal.
    #[error("invalid escape sequence '\\{1}' at {0}")]
    InvalidEscape(SourcePosition, char),

    /// A character with no meaning in the current lexicon.
    #[error("unexpected character '{1}' at {0}")]
    StrayChar(SourcePosition, char),

    /// A malformed numeric literal.
    #[error("malformed number at {0}")]
    MalformedNumber(SourcePosition),
}

impl LexError {
    /// Returns the source position at which the error occurred.
    pub const fn position(&self) -> SourcePosition {
        match self {
            Self::UnterminatedString(pos)
            | Self::InvalidEscape(pos, _)
            | Self::StrayChar(pos, _)
            | Self::MalformedNumber(pos) => *pos,
        }
    }

    /// Returns true if the error could be caused by an input stream that was
    /// cut short; the REPL uses this to request a continuation line.
    pub const fn is_incomplete(&self) -> bool {
        matches!(self, Self::UnterminatedString(..))
    }
}

/// A single parse diagnostic with its position.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{pos}: {message}")]
pub struct ParseDiagnostic {
    /// The diagnostic text.
    pub message: String,
    /// Where the problem was detected.
    pub pos: SourcePosition,
    /// True iff the failure was an unexpected end-of-input inside an open
    /// construct.
    pub at_end_of_input: bool,
}

/// The aggregate result of a failed parse.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ParseError {
    /// One or more syntax errors were recorded.
    #[error("{}", first_message(.0))]
    Syntax(Vec<ParseDiagnostic>),

    /// A lexer error terminated the parse.
    #[error(transparent)]
    Lex(LexError),
}

fn first_message(diags: &[ParseDiagnostic]) -> String {
    diags
        .first()
        .map_or_else(|| String::from("syntax error"), ToString::to_string)
}

impl ParseError {
    /// Returns all recorded diagnostics, most specific first.
    pub fn diagnostics(&self) -> Vec<ParseDiagnostic> {
        match self {
            Self::Syntax(diags) => diags.clone(),
            Self::Lex(err) => vec![ParseDiagnostic {
                message: err.to_string(),
                pos: err.position(),
                at_end_of_input: false,
            }],
        }
    }

    /// Returns true if the parse failed because the statement was not yet
    /// complete (an unclosed brace, a trailing operator, an unterminated
    /// string). The REPL consults this to decide between reporting an error
    /// and prompting for a continuation line.
    pub fn is_incomplete(&self) -> bool {
        match self {
            Self::Syntax(diags) => diags.last().is_some_and(|d| d.at_end_of_input),
            Self::Lex(err) => err.is_incomplete(),
        }
    }

    /// Returns the position of the first diagnostic.
    pub fn position(&self) -> SourcePosition {
        match self {
            Self::Syntax(diags) => diags.first().map(|d| d.pos).unwrap_or_default(),
            Self::Lex(err) => err.position(),
        }
    }
}

pub(crate) fn unexpected(token: &Token, expected: &str) -> ParseDiagnostic {
    ParseDiagnostic {
        message: format!(
            "expected {expected}, found {}",
            token.kind.describe()
        ),
        pos: token.pos,
        at_end_of_input: token.kind == crate::token::TokenKind::Eof,
    }
}
