//! The interactive shell loop.

use std::path::PathBuf;

use rustyline::error::ReadlineError;

use shale_core::{render_repl_error, Interpreter, ReadOutcome};

use crate::ShellError;

/// The file executed before the first prompt of an interactive session.
const STARTUP_FILE_NAME: &str = ".shalerc";

/// An interactive shell session: an interpreter plus a line editor.
pub struct InteractiveShell {
    interpreter: Interpreter,
    editor: rustyline::DefaultEditor,
}

impl InteractiveShell {
    /// Creates an interactive session around the given interpreter. Puts
    /// the shell in its own process group, grabs the terminal, and saves
    /// the termios state.
    pub fn new(interpreter: Interpreter) -> Result<Self, ShellError> {
        interpreter.env().borrow_mut().init_interactive()?;

        let editor = rustyline::DefaultEditor::new()?;

        Ok(Self {
            interpreter,
            editor,
        })
    }

    /// Runs the startup file (`$HOME/.shalerc`), if present.
    pub fn run_startup_file(&mut self) {
        let Some(path) = startup_file_path() else {
            return;
        };
        if !path.exists() {
            return;
        }

        if let Err(err) = self.interpreter.exec_file(&path, &[]) {
            eprintln!("{}", shale_core::render_file_error(&err, &path));
        }
    }

    /// Runs the read/eval loop until end of input.
    pub fn run(&mut self) -> Result<(), ShellError> {
        let editor = &mut self.editor;

        self.interpreter.exec_interactive(
            |interpreter, continuation| {
                let prompt = interpreter.prompt(continuation);

                match editor.readline(&prompt) {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = editor.add_history_entry(line.as_str());
                        }
                        ReadOutcome::Line(line)
                    }
                    // Ctrl-C: abandon the current line, show a fresh
                    // prompt.
                    Err(ReadlineError::Interrupted) => ReadOutcome::Cancelled,
                    Err(ReadlineError::Eof) => ReadOutcome::Eof,
                    Err(err) => {
                        tracing::error!(target: "repl", "line editor failed: {err}");
                        ReadOutcome::Eof
                    }
                }
            },
            |err| {
                eprintln!("{}", render_repl_error(err));
            },
        );

        Ok(())
    }
}

fn startup_file_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(STARTUP_FILE_NAME))
}
