use std::fmt;
use std::io;
use std::os::fd::RawFd;

use tracing::{debug, warn};

use crate::error::{JobError, Result};

/// Signals a job-control shell keeps away from itself. Children get them back.
const JOB_CONTROL_SIGNALS: &[libc::c_int] = &[libc::SIGTSTP, libc::SIGTTIN, libc::SIGTTOU];
const INTERACTIVE_SIGNALS: &[libc::c_int] = &[libc::SIGINT, libc::SIGQUIT];
const CHILD_DEFAULT_SIGNALS: &[libc::c_int] = &[
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
    libc::SIGCHLD,
    libc::SIGPIPE,
];

pub(crate) fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // Already exec'd or gone; the child makes the same call itself.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

pub fn process_group_id(pid: libc::pid_t) -> io::Result<libc::pid_t> {
    loop {
        let rc = unsafe { libc::getpgid(pid) };
        if rc >= 0 {
            return Ok(rc);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

pub(crate) fn send_signal_to_group(pgid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// `waitpid` with EINTR retry. `Ok(None)` means `WNOHANG` found nothing to report.
pub(crate) fn wait_pid(
    pid: libc::pid_t,
    flags: libc::c_int,
) -> io::Result<Option<(libc::pid_t, libc::c_int)>> {
    let mut raw_status: libc::c_int = 0;

    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, flags) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(None);
        }
        return Ok(Some((rc, raw_status)));
    }
}

fn set_disposition(signal: libc::c_int, handler: libc::sighandler_t) -> io::Result<()> {
    let previous = unsafe { libc::signal(signal, handler) };
    if previous == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Keep terminal-generated stop signals (and, when interactive, interrupts)
/// from acting on the shell itself.
///
/// SIGCHLD goes back to its default: an inherited SIG_IGN makes the kernel
/// reap children before the shell can collect their status.
pub fn ignore_job_control_signals(interactive: bool) -> io::Result<()> {
    set_disposition(libc::SIGCHLD, libc::SIG_DFL)?;
    for &signal in JOB_CONTROL_SIGNALS {
        set_disposition(signal, libc::SIG_IGN)?;
    }
    if interactive {
        for &signal in INTERACTIVE_SIGNALS {
            set_disposition(signal, libc::SIG_IGN)?;
        }
    }
    Ok(())
}

/// Runs in a freshly forked child: nothing the shell ignores may leak into
/// the program it is about to become.
pub(crate) fn restore_default_signals() {
    for &signal in CHILD_DEFAULT_SIGNALS {
        unsafe {
            libc::signal(signal, libc::SIG_DFL);
        }
    }
}

struct SignalIgnoreGuard {
    signal: libc::c_int,
    previous: libc::sighandler_t,
}

impl SignalIgnoreGuard {
    fn ignore(signal: libc::c_int) -> io::Result<Self> {
        let previous = unsafe { libc::signal(signal, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { signal, previous })
    }
}

impl Drop for SignalIgnoreGuard {
    fn drop(&mut self) {
        unsafe {
            libc::signal(self.signal, self.previous);
        }
    }
}

fn set_terminal_foreground(fd: RawFd, pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    let _sigttou = SignalIgnoreGuard::ignore(libc::SIGTTOU)?;
    loop {
        let rc = unsafe { libc::tcsetpgrp(fd, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

fn terminal_foreground(fd: RawFd) -> io::Result<libc::pid_t> {
    let rc = unsafe { libc::tcgetpgrp(fd) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc)
}

/// Snapshot of the terminal's line-discipline settings.
#[derive(Clone, Copy)]
pub struct TerminalMode(libc::termios);

impl TerminalMode {
    pub fn capture(fd: RawFd) -> io::Result<Self> {
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut termios) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(TerminalMode(termios))
    }

    pub fn apply(&self, fd: RawFd) -> io::Result<()> {
        loop {
            let rc = unsafe { libc::tcsetattr(fd, libc::TCSADRAIN, &self.0) };
            if rc == 0 {
                return Ok(());
            }

            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }
    }
}

impl fmt::Debug for TerminalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalMode")
            .field("c_lflag", &self.0.c_lflag)
            .finish_non_exhaustive()
    }
}

/// The shell's view of its controlling terminal.
///
/// A detached terminal (stdin is not a tty) turns every foreground handover
/// into a no-op while process groups are still created for each pipeline.
#[derive(Debug)]
pub struct Terminal {
    fd: RawFd,
    shell_pgid: libc::pid_t,
    shell_mode: Option<TerminalMode>,
    interactive: bool,
}

impl Terminal {
    pub fn detached() -> Self {
        Terminal {
            fd: libc::STDIN_FILENO,
            shell_pgid: unsafe { libc::getpgrp() },
            shell_mode: None,
            interactive: false,
        }
    }

    /// Set the shell up for job control.
    ///
    /// When stdin is a terminal, waits until the shell is in the terminal's
    /// foreground, moves it into its own process group, takes the terminal
    /// and records the shell's terminal mode.
    pub fn init() -> Result<Self> {
        let fd = libc::STDIN_FILENO;
        if unsafe { libc::isatty(fd) } != 1 {
            ignore_job_control_signals(false)
                .map_err(|e| JobError::terminal("signal", e))?;
            return Ok(Terminal::detached());
        }

        loop {
            let pgrp = unsafe { libc::getpgrp() };
            let foreground =
                terminal_foreground(fd).map_err(|e| JobError::terminal("tcgetpgrp", e))?;
            if foreground == pgrp {
                break;
            }
            unsafe {
                libc::kill(-pgrp, libc::SIGTTIN);
            }
        }

        ignore_job_control_signals(true).map_err(|e| JobError::terminal("signal", e))?;

        let pid = unsafe { libc::getpid() };
        if let Err(err) = set_process_group(pid, pid) {
            // Session leaders cannot move; they already lead their own group.
            debug!(%err, "shell keeps its process group");
        }
        let shell_pgid = unsafe { libc::getpgrp() };
        set_terminal_foreground(fd, shell_pgid)
            .map_err(|e| JobError::terminal("tcsetpgrp", e))?;
        let shell_mode =
            TerminalMode::capture(fd).map_err(|e| JobError::terminal("tcgetattr", e))?;

        debug!(shell_pgid, "job control enabled");
        Ok(Terminal {
            fd,
            shell_pgid,
            shell_mode: Some(shell_mode),
            interactive: true,
        })
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn shell_pgid(&self) -> libc::pid_t {
        self.shell_pgid
    }

    /// Give the terminal to `pgid` until the returned guard is finished or dropped.
    pub fn hand_over(&self, pgid: libc::pid_t) -> ForegroundGuard<'_> {
        if self.interactive {
            if let Err(err) = set_terminal_foreground(self.fd, pgid) {
                warn!("{}", JobError::terminal("tcsetpgrp", err));
            }
        }
        ForegroundGuard {
            terminal: self,
            active: true,
        }
    }

    /// Called from a forked child so the terminal is the job's before it execs.
    pub(crate) fn claim_for_child(&self, pgid: libc::pid_t) {
        if self.interactive {
            let _ = set_terminal_foreground(self.fd, pgid);
        }
    }

    /// Take the terminal back after a launch that failed half way.
    pub(crate) fn reclaim(&self) {
        let _ = self.take_back();
    }

    pub fn apply_mode(&self, mode: &TerminalMode) {
        if !self.interactive {
            return;
        }
        if let Err(err) = mode.apply(self.fd) {
            warn!("{}", JobError::terminal("tcsetattr", err));
        }
    }

    /// Return the terminal to the shell; yields the mode the job left behind.
    fn take_back(&self) -> Option<TerminalMode> {
        if !self.interactive {
            return None;
        }
        if let Err(err) = set_terminal_foreground(self.fd, self.shell_pgid) {
            warn!("{}", JobError::terminal("tcsetpgrp", err));
        }
        let job_mode = match TerminalMode::capture(self.fd) {
            Ok(mode) => Some(mode),
            Err(err) => {
                warn!("{}", JobError::terminal("tcgetattr", err));
                None
            }
        };
        if let Some(shell_mode) = &self.shell_mode {
            self.apply_mode(shell_mode);
        }
        job_mode
    }
}

/// Foreground ownership lent to a job's process group.
#[must_use]
pub struct ForegroundGuard<'a> {
    terminal: &'a Terminal,
    active: bool,
}

impl ForegroundGuard<'_> {
    /// Reclaim the terminal for the shell and restore the shell's mode.
    /// Returns the job's terminal mode at the moment it lost the terminal.
    pub fn finish(mut self) -> Option<TerminalMode> {
        self.active = false;
        self.terminal.take_back()
    }
}

impl Drop for ForegroundGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            let _ = self.terminal.take_back();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_terminal_reports_own_group() {
        let terminal = Terminal::detached();
        assert!(!terminal.is_interactive());
        assert_eq!(terminal.shell_pgid(), unsafe { libc::getpgrp() });
    }

    #[test]
    fn detached_handover_yields_no_mode() {
        let terminal = Terminal::detached();
        let guard = terminal.hand_over(terminal.shell_pgid());
        assert!(guard.finish().is_none());
    }

    #[test]
    fn group_signal_rejects_invalid_group() {
        let err = send_signal_to_group(0, libc::SIGCONT).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn own_process_group_is_queryable() {
        let pid = unsafe { libc::getpid() };
        assert_eq!(process_group_id(pid).unwrap(), unsafe { libc::getpgrp() });
    }

    #[test]
    fn wait_without_children_of_that_pid_fails() {
        // pid 1 is never our child.
        let err = wait_pid(1, libc::WNOHANG).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ECHILD));
    }
}
