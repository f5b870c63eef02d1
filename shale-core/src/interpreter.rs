//! The interpreter façade.
//!
//! Owns the symbol-table stack and the shell environment, registers the
//! standard variables (`__main__`, `__file__`, `args`, …), and drives the
//! parse/execute cycle for files and interactive sessions. Runtime errors
//! are enriched with the file name and the literal source line of every
//! message before they surface.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use shale_parser::{ParseError, SourcePosition};

use crate::builtins;
use crate::error::{Error, ErrorKind};
use crate::functions::KwArgs;
use crate::interp::Interp;
use crate::shell::ShellEnv;
use crate::symtab::{ScopeKind, SymbolAttr, SymbolTable, SymbolTableStack};
use crate::values::Value;

/// What the REPL's line callback produced.
pub enum ReadOutcome {
    /// A line of input.
    Line(String),
    /// The input stream ended.
    Eof,
    /// The user cancelled the current line (Ctrl-C).
    Cancelled,
}

/// The interpreter: persistent scopes plus the shell environment.
pub struct Interpreter {
    interp: Interp,
    is_main: bool,
}

impl Interpreter {
    /// Returns a new interpreter. `main` marks the entry-point file;
    /// `argv` feeds `sys.argv`.
    pub fn new(main: bool, argv: &[String]) -> Self {
        let sys = Rc::new(RefCell::new(SymbolTable::new(ScopeKind::Root)));
        let scopes = SymbolTableStack::new(sys);
        builtins::register(&scopes, argv);

        let env = Rc::new(RefCell::new(ShellEnv::new()));

        let mut interpreter = Self {
            interp: Interp::new(scopes, env),
            is_main: main,
        };

        // The module variables are always present; file execution
        // overwrites them with real paths.
        let cwd = std::env::current_dir()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        interpreter.insert_var("__main__", Value::Bool(main));
        interpreter.insert_var("__file__", Value::str(""));
        interpreter.insert_var("__file_path__", Value::str(""));
        interpreter.insert_var("__path__", Value::str(cwd));
        interpreter.insert_var("args", Value::array(vec![]));

        interpreter
    }

    /// The shared shell environment.
    pub fn env(&self) -> Rc<RefCell<ShellEnv>> {
        Rc::clone(&self.interp.env)
    }

    /// Mutable access to the executor state.
    pub fn interp_mut(&mut self) -> &mut Interp {
        &mut self.interp
    }

    /// Looks a symbol up in the persistent scopes.
    pub fn lookup_symbol(&self, name: &str) -> Option<Value> {
        self.interp.lookup_symbol(name)
    }

    fn insert_var(&mut self, name: &str, value: Value) {
        let main = self.interp.scopes.main_table();
        main.borrow_mut().set(name, SymbolAttr::new(value, true));
    }

    fn register_vars(&mut self) {
        self.insert_var("__main__", Value::Bool(self.is_main));
    }

    fn register_file_vars(&mut self, path: &Path) {
        let full = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        self.insert_var(
            "__file__",
            Value::str(
                full.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            ),
        );
        self.insert_var("__file_path__", Value::str(full.to_string_lossy()));
        self.insert_var(
            "__path__",
            Value::str(
                full.parent()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default(),
            ),
        );
    }

    fn register_args(&mut self, args: &[String]) {
        self.insert_var(
            "args",
            Value::array(args.iter().map(Value::str).collect()),
        );
    }

    /// Reads, parses, and executes a script file. The returned error is
    /// already enriched with the file name and source lines.
    pub fn exec_file(&mut self, path: &Path, args: &[String]) -> Result<(), Error> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::new(
                ErrorKind::Io,
                format!("can't open file: {}: {e}", path.display()),
            )
        })?;

        let program = match shale_parser::parse(&source) {
            Ok(program) => program,
            Err(parse_err) => {
                return Err(enrich(parse_to_error(&parse_err), path, &source));
            }
        };

        self.register_vars();
        self.register_file_vars(path);
        self.register_args(args);

        self.interp
            .exec_program(&program)
            .map_err(|e| enrich(e, path, &source))
    }

    /// Parses and executes one source string in the persistent root scope
    /// (one REPL batch).
    pub fn exec_source(&mut self, source: &str) -> Result<(), Error> {
        let program = shale_parser::parse(source).map_err(|e| parse_to_error(&e))?;

        self.register_vars();
        self.interp.exec_program(&program)
    }

    /// The interactive loop. `read_line` is called with the interpreter
    /// (for prompt lookups) and a continuation flag; incomplete statements
    /// accumulate across lines. Errors are reported through `report` and
    /// the loop continues; the loop ends at end-of-input.
    pub fn exec_interactive(
        &mut self,
        mut read_line: impl FnMut(&mut Self, bool) -> ReadOutcome,
        mut report: impl FnMut(&Error),
    ) {
        let mut buffer = String::new();
        let mut continuation = false;

        loop {
            let line = match read_line(self, continuation) {
                ReadOutcome::Line(line) => line,
                ReadOutcome::Eof => break,
                ReadOutcome::Cancelled => {
                    buffer.clear();
                    continuation = false;
                    continue;
                }
            };

            if continuation {
                buffer.push('\n');
                buffer.push_str(&line);
            } else {
                buffer = line;
            }

            if buffer.trim().is_empty() {
                continuation = false;
                continue;
            }

            match shale_parser::parse(&buffer) {
                Ok(program) => {
                    continuation = false;
                    self.register_vars();
                    if let Err(err) = self.interp.exec_program(&program) {
                        report(&err);
                    }
                }
                Err(parse_err) => {
                    if parse_err.is_incomplete() {
                        // Keep the buffer and ask for a continuation line.
                        continuation = true;
                    } else {
                        continuation = false;
                        report(&parse_to_error(&parse_err));
                    }
                }
            }
        }
    }

    /// Computes the prompt: a user-defined `PS1`/`PS2` function returning
    /// a string wins; otherwise the defaults.
    pub fn prompt(&mut self, continuation: bool) -> String {
        let (name, fallback) = if continuation {
            ("PS2", "| ")
        } else {
            ("PS1", "> ")
        };

        if let Some(Value::Func(func)) = self.interp.lookup_symbol(name) {
            match self.interp.call_func(&func, None, vec![], KwArgs::new()) {
                Ok(Value::Str(prompt)) => return prompt.to_string(),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(target: "prompt", "{name} failed: {err}");
                }
            }
        }

        fallback.to_string()
    }
}

fn parse_to_error(parse_err: &ParseError) -> Error {
    let diags = parse_err.diagnostics();
    let mut err = Error::at(
        ErrorKind::Parser,
        diags
            .first()
            .map_or_else(|| String::from("syntax error"), |d| d.message.clone()),
        parse_err.position(),
    );

    for diag in diags.iter().skip(1) {
        err = err.chain(diag.message.clone(), diag.pos);
    }

    err
}

/// Attaches the file name and the literal source line to every message of
/// the error.
fn enrich(mut err: Error, path: &Path, source: &str) -> Error {
    let lines: Vec<&str> = source.lines().collect();
    let line_at = |pos: Option<SourcePosition>| {
        pos.and_then(|p| lines.get(p.line as usize - 1))
            .map(|l| (*l).to_string())
    };

    let file = path.display().to_string();
    err.message = format!("{file}: {}", err.message);

    for trace in &mut err.trace {
        if trace.source_line.is_none() {
            trace.source_line = lines
                .get(trace.pos.line as usize - 1)
                .map(|l| (*l).to_string());
        }
    }

    if let Some(line) = line_at(err.pos) {
        let pos = err.pos.unwrap_or_default();
        err = err.chain(format!(">> {line}"), pos);
    }

    err
}

/// Formats an error for file-mode presentation: file, 1-indexed line, the
/// source line, and the message chain.
pub fn render_file_error(err: &Error, path: &Path) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let pos = err.pos.unwrap_or_default();
    let _ = writeln!(out, "File: '{}'", path.display());
    let _ = writeln!(out, "  line: {}", pos.line);
    let _ = writeln!(out, "Error: {}", err.message);

    for trace in &err.trace {
        if let Some(line) = &trace.source_line {
            let _ = writeln!(out, "  line: {}  >> {}", trace.pos.line, line);
        }
        let _ = writeln!(out, "  {}", trace.message);
    }

    out
}

/// Formats an error for REPL presentation: line, column, and text.
pub fn render_repl_error(err: &Error) -> String {
    use std::fmt::Write;

    let pos = err.pos.unwrap_or_default();
    let mut out = format!("Error: {}: {}: {}", pos.line, pos.column, err.message);
    for trace in &err.trace {
        let _ = write!(out, "\n  {}: {}: {}", trace.pos.line, trace.pos.column, trace.message);
    }
    out
}
