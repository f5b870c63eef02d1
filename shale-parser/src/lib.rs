//! Parser for the shale shell language.
//!
//! This crate implements the front half of the interpreter: a dual-lexicon
//! lexer, the abstract syntax tree, and a hand-written recursive-descent
//! parser that resolves the scripting/shell ambiguity (`x = a/b` is a
//! division; `ls a/b` is a command word). It has no runtime dependencies on
//! the shell itself and can be used standalone to parse scripts.

pub mod ast;
mod error;
mod lexer;
mod parser;
mod token;

pub use error::{LexError, ParseDiagnostic, ParseError};
pub use lexer::{Lexer, LexerCheckpoint};
pub use parser::{parse, Parser};
pub use token::{SourcePosition, Token, TokenKind, TokenValue};
