//! Errors surfaced by the interactive shell.

/// An error occurring in the interactive front end.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// The line editor failed.
    #[error("input error: {0}")]
    ReadlineError(#[from] rustyline::error::ReadlineError),

    /// An error from the shell runtime.
    #[error(transparent)]
    ShellRuntime(#[from] shale_core::Error),

    /// An I/O error.
    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),
}
