//! Signal dispositions and process-group plumbing.

use crate::error::Error;

/// Puts the calling process in its own process group.
pub(crate) fn lead_new_process_group() -> Result<(), Error> {
    nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))?;
    Ok(())
}

/// Ignores the interactive and job-control signals. Called once at
/// interactive startup; non-interactive runs leave dispositions alone.
pub(crate) fn ignore_job_control_signals() -> Result<(), Error> {
    let ignore = nix::sys::signal::SigAction::new(
        nix::sys::signal::SigHandler::SigIgn,
        nix::sys::signal::SaFlags::empty(),
        nix::sys::signal::SigSet::empty(),
    );

    for signal in [
        nix::sys::signal::Signal::SIGINT,
        nix::sys::signal::Signal::SIGQUIT,
        nix::sys::signal::Signal::SIGTSTP,
        nix::sys::signal::Signal::SIGTTIN,
        nix::sys::signal::Signal::SIGTTOU,
        nix::sys::signal::Signal::SIGCHLD,
    ] {
        unsafe { nix::sys::signal::sigaction(signal, &ignore) }?;
    }

    Ok(())
}

/// Restores default dispositions for the signals a child should see.
/// Runs between fork and exec.
pub(crate) fn restore_default_signals() -> Result<(), std::io::Error> {
    let default = nix::sys::signal::SigAction::new(
        nix::sys::signal::SigHandler::SigDfl,
        nix::sys::signal::SaFlags::empty(),
        nix::sys::signal::SigSet::empty(),
    );

    for signal in [
        nix::sys::signal::Signal::SIGINT,
        nix::sys::signal::Signal::SIGQUIT,
        nix::sys::signal::Signal::SIGTSTP,
        nix::sys::signal::Signal::SIGTTIN,
        nix::sys::signal::Signal::SIGTTOU,
        nix::sys::signal::Signal::SIGCHLD,
    ] {
        unsafe { nix::sys::signal::sigaction(signal, &default) }
            .map_err(std::io::Error::other)?;
    }

    Ok(())
}

/// Waits for a specific child, reporting stopped children as well.
pub(crate) fn wait_for_child(
    pid: i32,
) -> Result<nix::sys::wait::WaitStatus, nix::errno::Errno> {
    nix::sys::wait::waitpid(
        nix::unistd::Pid::from_raw(pid),
        Some(nix::sys::wait::WaitPidFlag::WUNTRACED),
    )
}

/// Polls a child without blocking; `None` means still running.
pub(crate) fn poll_child(
    pid: i32,
) -> Result<Option<nix::sys::wait::WaitStatus>, nix::errno::Errno> {
    match nix::sys::wait::waitpid(
        nix::unistd::Pid::from_raw(pid),
        Some(nix::sys::wait::WaitPidFlag::WNOHANG | nix::sys::wait::WaitPidFlag::WUNTRACED),
    ) {
        Ok(nix::sys::wait::WaitStatus::StillAlive) => Ok(None),
        Ok(status) => Ok(Some(status)),
        Err(e) => Err(e),
    }
}
