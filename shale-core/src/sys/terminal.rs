//! Controlling-terminal ownership and termios state.

use std::io::IsTerminal;
use std::os::fd::AsFd;

use crate::error::Error;

/// Saved termios state for the shell's terminal.
#[derive(Clone)]
pub(crate) struct TerminalSettings {
    termios: nix::sys::termios::Termios,
}

/// Reads the terminal attributes of `fd`.
pub(crate) fn get_term_attr<Fd: AsFd>(fd: Fd) -> Result<TerminalSettings, Error> {
    Ok(TerminalSettings {
        termios: nix::sys::termios::tcgetattr(fd)?,
    })
}

/// Applies saved terminal attributes to `fd` immediately.
pub(crate) fn set_term_attr_now<Fd: AsFd>(
    fd: Fd,
    settings: &TerminalSettings,
) -> Result<(), Error> {
    nix::sys::termios::tcsetattr(fd, nix::sys::termios::SetArg::TCSANOW, &settings.termios)?;
    Ok(())
}

/// Whether standard input is a terminal.
pub(crate) fn stdin_is_terminal() -> bool {
    std::io::stdin().is_terminal()
}

/// Returns the calling process's process-group id.
pub(crate) fn own_process_group() -> i32 {
    nix::unistd::getpgrp().as_raw()
}

/// Gives the terminal to the given process group.
pub(crate) fn move_to_foreground(pgid: i32) -> Result<(), Error> {
    nix::unistd::tcsetpgrp(std::io::stdin(), nix::unistd::Pid::from_raw(pgid))?;
    Ok(())
}

/// Reclaims the terminal for the shell's own process group.
pub(crate) fn reclaim_terminal() -> Result<(), Error> {
    if stdin_is_terminal() {
        let pgid = nix::unistd::getpgid(None)?;
        let _ = nix::unistd::tcsetpgrp(std::io::stdin(), pgid);
    }
    Ok(())
}

/// Returns the process group currently owning the terminal.
pub(crate) fn foreground_process_group() -> Option<i32> {
    nix::unistd::tcgetpgrp(std::io::stdin())
        .ok()
        .map(nix::unistd::Pid::as_raw)
}
