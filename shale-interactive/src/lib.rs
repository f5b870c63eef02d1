//! Interactive REPL front-end for the shale shell.
//!
//! Line editing and history come from rustyline; prompts come from the
//! interpreter (user-defined `PS1`/`PS2` functions with `"> "`/`"| "`
//! fallbacks). Ctrl-C cancels the current input line and redraws the
//! prompt; Ctrl-D ends the session.

mod error;
mod interactive_shell;

pub use error::ShellError;
pub use interactive_shell::InteractiveShell;
