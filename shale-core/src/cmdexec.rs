//! The shell command executor.
//!
//! Resolution order for a simple command: alias expansion (one level),
//! scripted `cmd` declarations, built-in commands, then a `$PATH` search
//! for an external binary. Pipelines allocate their pipes up front, start
//! every child in its own process group (the leader's pid is the group id),
//! hand the terminal to foreground groups, and wait with `WUNTRACED`.

use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::rc::Rc;

use command_fds::{CommandFdExt, FdMapping};

use shale_parser::ast;
use shale_parser::SourcePosition;

use crate::error::{Error, ErrorKind};
use crate::interp::{Flow, Interp, RETURN_KEY};
use crate::openfiles::OpenFile;
use crate::symtab::{CmdEntry, ScopeKind, SymbolAttr, SymbolTableStack};
use crate::values::{CmdResultValue, Value};
use crate::{patterns, pathsearch, sys};

/// One stage of a pipeline.
struct Segment<'a> {
    simple: &'a ast::SimpleCmd,
    is_path: bool,
    redirects: Vec<&'a ast::IoRedirect>,
    /// `|&`: this stage's stderr joins its stdout pipe.
    stderr_to_next: bool,
}

/// Executes a command statement, returning its exit code.
pub fn exec_command(interp: &mut Interp, cmd: &ast::Cmd) -> Result<i32, Error> {
    match cmd {
        ast::Cmd::AndOr { op, left, right } => {
            let code = exec_command(interp, left)?;
            let run_right = match op {
                ast::AndOrOp::And => code == 0,
                ast::AndOrOp::Or => code != 0,
            };
            if run_right {
                exec_command(interp, right)
            } else {
                Ok(code)
            }
        }
        ast::Cmd::Background(inner) => Ok(run_pipeline(interp, inner, true, false)?.0),
        _ => Ok(run_pipeline(interp, cmd, false, false)?.0),
    }
}

/// Runs `$(cmd)` and returns the command-result value.
pub fn run_substitution(interp: &mut Interp, cmd: &ast::Cmd) -> Result<Value, Error> {
    let (out, status) = capture_output(interp, cmd)?;
    Ok(Value::CmdResult(Rc::new(CmdResultValue {
        out,
        err: String::new(),
        status: i64::from(status),
    })))
}

/// Runs a command with stdout captured; returns the output with trailing
/// newlines trimmed, and the exit code of the last process.
pub(crate) fn capture_output(
    interp: &mut Interp,
    cmd: &ast::Cmd,
) -> Result<(String, i32), Error> {
    match cmd {
        ast::Cmd::AndOr { op, left, right } => {
            let (mut out, code) = capture_output(interp, left)?;
            let run_right = match op {
                ast::AndOrOp::And => code == 0,
                ast::AndOrOp::Or => code != 0,
            };
            if !run_right {
                return Ok((out, code));
            }
            let (right_out, code) = capture_output(interp, right)?;
            if !out.is_empty() && !right_out.is_empty() {
                out.push('\n');
            }
            out.push_str(&right_out);
            Ok((out, code))
        }
        ast::Cmd::Background(_) => Err(Error::new(
            ErrorKind::InvalidArgs,
            "cannot capture a background command",
        )),
        _ => {
            let (code, captured) = run_pipeline(interp, cmd, false, true)?;
            let out = captured.unwrap_or_default();
            Ok((out.trim_end_matches('\n').to_string(), code))
        }
    }
}

fn run_pipeline(
    interp: &mut Interp,
    cmd: &ast::Cmd,
    background: bool,
    capture: bool,
) -> Result<(i32, Option<String>), Error> {
    let mut segments = vec![];
    flatten(cmd, &mut segments)?;

    // A standalone simple command may resolve in-process: alias expansion,
    // then scripted commands, then built-ins.
    if segments.len() == 1 && !segments[0].is_path {
        let argv = expand_argv(interp, segments[0].simple)?;
        let argv = expand_alias(interp, argv)?;

        if let Some(entry) = interp.scopes.lookup_cmd(&argv[0]) {
            if segments[0].redirects.is_empty() && !background && !capture {
                match entry {
                    CmdEntry::Decl { body, captured } => {
                        return Ok((run_scripted_cmd(interp, &body, &captured, &argv[1..])?, None));
                    }
                    CmdEntry::Native { func, .. } => {
                        let code = func(interp, &argv[1..])?;
                        interp.env.borrow_mut().last_foreground_exit_code = Some(code);
                        return Ok((code, None));
                    }
                    CmdEntry::Alias(_) => {}
                }
            } else if !matches!(entry, CmdEntry::Alias(_)) {
                return Err(Error::at(
                    ErrorKind::NotImplemented,
                    format!(
                        "'{}' is a shell command and cannot be redirected, backgrounded, \
                         or captured",
                        argv[0]
                    ),
                    segments[0].simple.pos,
                ));
            }
        }

        return spawn_and_finish(interp, &segments, vec![argv], background, capture);
    }

    let mut argvs = Vec::with_capacity(segments.len());
    for segment in &segments {
        let argv = expand_argv(interp, segment.simple)?;
        let argv = if segment.is_path {
            argv
        } else {
            let argv = expand_alias(interp, argv)?;
            if matches!(
                interp.scopes.lookup_cmd(&argv[0]),
                Some(CmdEntry::Decl { .. } | CmdEntry::Native { .. })
            ) {
                return Err(Error::at(
                    ErrorKind::NotImplemented,
                    format!("'{}' cannot run inside a pipeline", argv[0]),
                    segment.simple.pos,
                ));
            }
            argv
        };
        argvs.push(argv);
    }

    spawn_and_finish(interp, &segments, argvs, background, capture)
}

fn flatten<'a>(cmd: &'a ast::Cmd, out: &mut Vec<Segment<'a>>) -> Result<(), Error> {
    match cmd {
        ast::Cmd::Simple(simple) => out.push(Segment {
            simple,
            is_path: false,
            redirects: vec![],
            stderr_to_next: false,
        }),
        ast::Cmd::FilePath(simple) => out.push(Segment {
            simple,
            is_path: true,
            redirects: vec![],
            stderr_to_next: false,
        }),
        ast::Cmd::Redirected { cmd, redirects } => {
            flatten(cmd, out)?;
            if let Some(last) = out.last_mut() {
                last.redirects.extend(redirects.iter());
            }
        }
        ast::Cmd::Pipe {
            left,
            right,
            stderr_too,
        } => {
            flatten(left, out)?;
            if let Some(last) = out.last_mut() {
                last.stderr_to_next = *stderr_too;
            }
            flatten(right, out)?;
        }
        ast::Cmd::AndOr { .. } | ast::Cmd::Background(_) => {
            return Err(Error::new(
                ErrorKind::InvalidOpcode,
                "malformed command nesting",
            ));
        }
    }
    Ok(())
}

//
// Word expansion.
//

/// Builds the argv of a simple command from its word pieces: evaluation,
/// tilde expansion, field splitting of unquoted substitutions, and glob
/// expansion (empty globs keep the literal word).
fn expand_argv(interp: &mut Interp, simple: &ast::SimpleCmd) -> Result<Vec<String>, Error> {
    let words = expand_pieces(interp, &simple.pieces, true)?;
    if words.is_empty() {
        return Err(Error::at(
            ErrorKind::InvalidArgs,
            "empty command",
            simple.pos,
        ));
    }
    Ok(words)
}

/// Expands a piece list into words. Pieces glue together until one carries
/// the blank-after flag.
pub(crate) fn expand_pieces(
    interp: &mut Interp,
    pieces: &[ast::CmdPiece],
    glob: bool,
) -> Result<Vec<String>, Error> {
    let mut words: Vec<String> = vec![];

    let mut current = String::new();
    let mut current_quoted = false;
    let mut started = false;

    for (index, piece) in pieces.iter().enumerate() {
        let last_of_word = piece.blank_after() || index + 1 == pieces.len();

        match piece {
            ast::CmdPiece::Literal { text, quoted, .. } => {
                current_quoted |= *quoted;
                current.push_str(text);
            }
            ast::CmdPiece::Var { name, .. } => {
                current.push_str(&lookup_var(interp, name));
            }
            ast::CmdPiece::Expr { expr, .. } => {
                let value = interp.eval_expr(expr)?;
                current.push_str(&value.format());
            }
            ast::CmdPiece::CmdSub { cmd, quoted, pos, .. } => {
                let (out, _code) = capture_output(interp, cmd)
                    .map_err(|e| e.or_pos(*pos))?;

                // An unquoted substitution standing alone in its word is
                // split on IFS whitespace.
                if !*quoted && !started && last_of_word && current.is_empty() {
                    words.extend(split_fields(&out));
                    current_quoted = false;
                    started = false;
                    continue;
                }

                current.push_str(&out);
            }
        }

        started = true;
        if last_of_word {
            finish_word(
                std::mem::take(&mut current),
                current_quoted,
                glob,
                &mut words,
            )?;
            current_quoted = false;
            started = false;
        }
    }

    Ok(words)
}

fn split_fields(text: &str) -> Vec<String> {
    let ifs = std::env::var("IFS").unwrap_or_else(|_| String::from(" \t\n"));
    text.split(|c| ifs.contains(c))
        .filter(|f| !f.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn lookup_var(interp: &Interp, name: &str) -> String {
    if let Some(value) = interp.scopes.lookup(name) {
        return value.format();
    }
    std::env::var(name).unwrap_or_default()
}

/// Applies tilde and glob expansion to a finished word. Both are
/// suppressed for words with quoted segments; a glob with no matches
/// keeps the literal word.
fn finish_word(
    word: String,
    quoted: bool,
    glob: bool,
    out: &mut Vec<String>,
) -> Result<(), Error> {
    if quoted {
        out.push(word);
        return Ok(());
    }

    let word = expand_tilde(&word);

    if glob && patterns::is_glob_pattern(&word) {
        let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        let matches = patterns::expand_glob(&cwd, &word)?;
        if matches.is_empty() {
            out.push(word);
        } else {
            out.extend(matches);
        }
        return Ok(());
    }

    out.push(word);
    Ok(())
}

fn expand_tilde(word: &str) -> String {
    if let Some(rest) = word.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{home}{rest}");
            }
        }
    }
    word.to_string()
}

/// One level of alias expansion on argv[0].
fn expand_alias(interp: &mut Interp, mut argv: Vec<String>) -> Result<Vec<String>, Error> {
    if let Some(CmdEntry::Alias(words)) = interp.scopes.lookup_cmd(&argv[0]) {
        let mut replacement = expand_pieces(interp, &words, true)?;
        replacement.extend(argv.drain(1..));
        argv = replacement;
    }
    Ok(argv)
}

//
// Scripted commands.
//

fn run_scripted_cmd(
    interp: &mut Interp,
    body: &ast::Block,
    captured: &SymbolTableStack,
    args: &[String],
) -> Result<i32, Error> {
    let mut scopes = captured.clone();
    scopes.push(ScopeKind::Function);
    scopes.insert_entry(
        "args",
        SymbolAttr::new(
            Value::array(args.iter().map(Value::str).collect()),
            false,
        ),
    )?;

    let saved = std::mem::replace(&mut interp.scopes, scopes);
    let flow = interp.exec_stmt(&ast::Stmt {
        kind: ast::StmtKind::Block(body.clone()),
        pos: body.pos,
    });
    let returned = interp.scopes.lookup(RETURN_KEY);
    interp.scopes = saved;

    let code = match flow? {
        Flow::Return => match returned {
            Some(Value::Int(n)) => i32::try_from(n).unwrap_or(1),
            _ => 0,
        },
        _ => 0,
    };

    interp.env.borrow_mut().last_foreground_exit_code = Some(code);
    Ok(code)
}

//
// External processes.
//

fn spawn_and_finish(
    interp: &mut Interp,
    segments: &[Segment<'_>],
    argvs: Vec<Vec<String>>,
    background: bool,
    capture: bool,
) -> Result<(i32, Option<String>), Error> {
    let command_line = argvs
        .iter()
        .map(|argv| argv.join(" "))
        .collect::<Vec<_>>()
        .join(" | ");

    let capture_pipe = if capture {
        Some(os_pipe::pipe()?)
    } else {
        None
    };
    let (capture_reader, capture_writer) = match capture_pipe {
        Some((reader, writer)) => (Some(reader), Some(writer)),
        None => (None, None),
    };

    let (pids, pgid) = spawn_children(interp, segments, argvs, background, capture_writer)?;

    if background {
        let mut env = interp.env.borrow_mut();
        env.last_background_pid = Some(pgid);
        env.jobs.add(pids, command_line);
        return Ok((0, None));
    }

    // Read the whole capture to EOF before reaping: a full pipe buffer
    // would otherwise leave the children blocked on write forever.
    let captured = match capture_reader {
        Some(mut reader) => {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut reader, &mut buf)?;
            Some(buf)
        }
        None => None,
    };

    let code = wait_for_pipeline(&pids);

    {
        let mut env = interp.env.borrow_mut();
        env.last_foreground_pid = Some(pgid);
        env.last_foreground_exit_code = Some(code);
        if !capture {
            env.restore_terminal();
        }
    }

    Ok((code, captured))
}

#[allow(clippy::too_many_lines)]
fn spawn_children(
    interp: &mut Interp,
    segments: &[Segment<'_>],
    argvs: Vec<Vec<String>>,
    background: bool,
    capture: Option<os_pipe::PipeWriter>,
) -> Result<(Vec<i32>, i32), Error> {
    let interactive = interp.env.borrow().interactive;
    let take_terminal = interactive && !background && capture.is_none();

    let mut pids: Vec<i32> = vec![];
    let mut pgid: Option<i32> = None;
    let mut prev_reader: Option<os_pipe::PipeReader> = None;

    let last_index = segments.len() - 1;

    for (index, (segment, argv)) in segments.iter().zip(argvs).enumerate() {
        let program = if segment.is_path {
            std::path::PathBuf::from(&argv[0])
        } else {
            pathsearch::find_executable(&argv[0]).ok_or_else(|| {
                Error::at(
                    ErrorKind::IdNotFound,
                    format!("command not found: {}", argv[0]),
                    segment.simple.pos,
                )
            })?
        };

        let mut command = Command::new(&program);
        command.args(&argv[1..]);

        // Wire the pipeline: stdin from the previous stage, stdout into
        // the next pipe (or the capture pipe for the last stage).
        if let Some(reader) = prev_reader.take() {
            command.stdin(Stdio::from(reader));
        }

        if index < last_index {
            let (reader, writer) = os_pipe::pipe()?;
            if segment.stderr_to_next {
                command.stderr(Stdio::from(writer.try_clone()?));
            }
            command.stdout(Stdio::from(writer));
            prev_reader = Some(reader);
        } else if let Some(writer) = capture.as_ref() {
            command.stdout(Stdio::from(writer.try_clone()?));
        }

        apply_redirects(interp, &mut command, &segment.redirects)?;

        // Each pipeline is one process group; the leader's pid is the
        // group id. Both parent and child set the group to close the race.
        let leader = pgid.unwrap_or(0);
        unsafe {
            command.pre_exec(move || {
                sys::signal::restore_default_signals()?;
                nix::unistd::setpgid(
                    nix::unistd::Pid::from_raw(0),
                    nix::unistd::Pid::from_raw(leader),
                )
                .map_err(std::io::Error::other)?;
                Ok(())
            });
        }

        let child = command.spawn().map_err(|e| {
            Error::at(
                ErrorKind::Io,
                format!("failed to execute '{}': {e}", argv[0]),
                segment.simple.pos,
            )
        })?;

        #[allow(clippy::cast_possible_wrap)]
        let pid = child.id() as i32;

        let group = pgid.unwrap_or(pid);
        let _ = nix::unistd::setpgid(
            nix::unistd::Pid::from_raw(pid),
            nix::unistd::Pid::from_raw(group),
        );

        if pgid.is_none() {
            pgid = Some(pid);
            if take_terminal {
                let _ = sys::terminal::move_to_foreground(pid);
            }
        }

        tracing::debug!(target: "cmd", "spawned {} (pid {pid}, pgid {group})", argv[0]);
        pids.push(pid);
    }

    // The capture writer must not survive in the parent or the read side
    // would never see EOF.
    drop(capture);

    Ok((pids, pgid.unwrap_or(0)))
}

/// Waits for every process of a foreground pipeline; the pipeline's exit
/// code is the exit code of its last (rightmost) process.
fn wait_for_pipeline(pids: &[i32]) -> i32 {
    let mut last_code = 0;

    for pid in pids {
        let code = match sys::signal::wait_for_child(*pid) {
            Ok(nix::sys::wait::WaitStatus::Exited(_, code)) => code,
            Ok(nix::sys::wait::WaitStatus::Signaled(_, signal, _)) => 128 + signal as i32,
            Ok(nix::sys::wait::WaitStatus::Stopped(_, _)) => {
                128 + nix::sys::signal::Signal::SIGTSTP as i32
            }
            Ok(_) => 0,
            Err(e) => {
                tracing::warn!(target: "cmd", "waitpid({pid}) failed: {e}");
                0
            }
        };
        last_code = code;
    }

    last_code
}

fn apply_redirects(
    interp: &mut Interp,
    command: &mut Command,
    redirects: &[&ast::IoRedirect],
) -> Result<(), Error> {
    let mut extra_fds: Vec<(u32, OpenFile)> = vec![];

    for redirect in redirects {
        let target = expand_redirect_target(interp, redirect)?;

        match redirect.kind {
            ast::RedirKind::Out | ast::RedirKind::Append => {
                let file = open_target(&target, redirect.kind, redirect.pos)?;
                match redirect.fd.unwrap_or(1) {
                    1 => {
                        command.stdout(Stdio::from(file));
                    }
                    2 => {
                        command.stderr(Stdio::from(file));
                    }
                    fd => extra_fds.push((fd, OpenFile::File(file))),
                }
            }
            ast::RedirKind::In => {
                let file = std::fs::File::open(&target).map_err(|e| {
                    Error::at(
                        ErrorKind::Io,
                        format!("failed to redirect from {target}: {e}"),
                        redirect.pos,
                    )
                })?;
                match redirect.fd.unwrap_or(0) {
                    0 => {
                        command.stdin(Stdio::from(file));
                    }
                    fd => extra_fds.push((fd, OpenFile::File(file))),
                }
            }
            ast::RedirKind::OutErr => {
                let file = open_target(&target, ast::RedirKind::Out, redirect.pos)?;
                let clone = file.try_clone().map_err(Error::from)?;
                command.stdout(Stdio::from(file));
                command.stderr(Stdio::from(clone));
            }
            ast::RedirKind::HereString => {
                let (reader, mut writer) = os_pipe::pipe()?;
                std::io::Write::write_all(&mut writer, target.as_bytes())?;
                std::io::Write::write_all(&mut writer, b"\n")?;
                drop(writer);
                command.stdin(Stdio::from(reader));
            }
        }
    }

    if !extra_fds.is_empty() {
        let mappings = extra_fds
            .into_iter()
            .map(|(fd, file)| {
                Ok(FdMapping {
                    child_fd: i32::try_from(fd).unwrap_or(-1),
                    parent_fd: file.into_owned_fd()?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        command
            .fd_mappings(mappings)
            .map_err(|_| Error::new(ErrorKind::Io, "failed to map file descriptors"))?;
    }

    Ok(())
}

fn expand_redirect_target(
    interp: &mut Interp,
    redirect: &ast::IoRedirect,
) -> Result<String, Error> {
    let words = expand_pieces(interp, &redirect.target, false)?;
    words.into_iter().next().ok_or_else(|| {
        Error::at(
            ErrorKind::InvalidArgs,
            "redirection requires a target",
            redirect.pos,
        )
    })
}

fn open_target(
    target: &str,
    kind: ast::RedirKind,
    pos: SourcePosition,
) -> Result<std::fs::File, Error> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true);
    if kind == ast::RedirKind::Append {
        options.append(true);
    } else {
        options.truncate(true);
    }

    options.open(target).map_err(|e| {
        Error::at(
            ErrorKind::Io,
            format!("failed to redirect to {target}: {e}"),
            pos,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tilde_expands_only_at_word_start() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_tilde("~"), "/home/tester");
        assert_eq!(expand_tilde("~/src"), "/home/tester/src");
        assert_eq!(expand_tilde("a~b"), "a~b");
        assert_eq!(expand_tilde("~user"), "~user");
    }

    #[test]
    fn fields_split_on_ifs_whitespace() {
        std::env::remove_var("IFS");
        assert_eq!(split_fields("a b\tc\nd"), vec!["a", "b", "c", "d"]);
        assert_eq!(split_fields("  padded  "), vec!["padded"]);
        assert!(split_fields("").is_empty());
    }
}
