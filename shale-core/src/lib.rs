//! Core runtime for the shale shell: the object model, symbol-table
//! stack, tree-walking executor, and the shell command executor.
//!
//! The parsing front end lives in `shale-parser`; interactive input lives
//! in `shale-interactive`. This crate is deliberately synchronous: script
//! statements execute in source order and the interpreter blocks only in
//! the command executor (pipe reads and `waitpid`).

pub mod builtins;
pub mod classes;
pub mod cmdexec;
pub mod error;
pub mod functions;
pub mod interp;
pub mod interpreter;
pub mod iterators;
pub mod jobs;
pub mod methods;
pub mod modules;
pub mod openfiles;
pub mod pathsearch;
pub mod patterns;
pub mod shell;
pub mod symtab;
pub mod values;

mod sys;

#[cfg(test)]
mod tests;

pub use error::{Error, ErrorKind};
pub use interp::{Flow, Interp};
pub use interpreter::{render_file_error, render_repl_error, Interpreter, ReadOutcome};
pub use openfiles::{OpenFile, OpenFiles};
pub use shell::ShellEnv;
pub use values::{TypeTag, Value};
