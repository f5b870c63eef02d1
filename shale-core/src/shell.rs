//! Process-wide shell state.
//!
//! The original design's global shell singleton is threaded through the
//! executor as an explicit context value: terminal ownership, saved
//! termios, job bookkeeping, the import table, and the pid/exit-code
//! registers the scripting layer exposes.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Error;
use crate::jobs::JobManager;
use crate::sys;
use crate::values::Value;

/// Mutable shell-wide state shared by the executors.
pub struct ShellEnv {
    /// Whether the shell owns an interactive terminal.
    pub interactive: bool,
    /// The shell's own process group, once established.
    pub shell_pgid: Option<i32>,
    /// Termios state saved at startup, restored after foreground jobs.
    pub(crate) saved_termios: Option<sys::terminal::TerminalSettings>,
    /// Pid of the most recent foreground child.
    pub last_foreground_pid: Option<i32>,
    /// Pid of the most recent background job leader.
    pub last_background_pid: Option<i32>,
    /// Exit code of the most recent foreground pipeline.
    pub last_foreground_exit_code: Option<i32>,
    /// Background jobs.
    pub jobs: JobManager,
    /// Process-wide module cache: absolute path → module value.
    pub import_table: HashMap<PathBuf, Value>,
}

impl ShellEnv {
    /// Returns a new, non-interactive shell environment.
    pub fn new() -> Self {
        Self {
            interactive: false,
            shell_pgid: None,
            saved_termios: None,
            last_foreground_pid: None,
            last_background_pid: None,
            last_foreground_exit_code: None,
            jobs: JobManager::new(),
            import_table: HashMap::new(),
        }
    }

    /// Interactive startup: take a process group, grab the terminal,
    /// ignore job-control signals, and save the termios state.
    pub fn init_interactive(&mut self) -> Result<(), Error> {
        if !sys::terminal::stdin_is_terminal() {
            return Ok(());
        }

        self.interactive = true;

        sys::signal::ignore_job_control_signals()?;

        if let Err(e) = sys::signal::lead_new_process_group() {
            // Already a group leader (e.g. launched from a job-control
            // shell); not fatal.
            tracing::debug!(target: "shell", "setpgid failed: {e}");
        }

        let pgid = sys::terminal::own_process_group();
        self.shell_pgid = Some(pgid);
        let _ = sys::terminal::move_to_foreground(pgid);

        self.saved_termios = sys::terminal::get_term_attr(std::io::stdin()).ok();

        Ok(())
    }

    /// Reclaims the terminal and restores termios after a foreground job.
    pub fn restore_terminal(&self) {
        if !self.interactive {
            return;
        }

        let _ = sys::terminal::reclaim_terminal();
        if let Some(settings) = &self.saved_termios {
            let _ = sys::terminal::set_term_attr_now(std::io::stdin(), settings);
        }
    }
}

impl Default for ShellEnv {
    fn default() -> Self {
        Self::new()
    }
}
