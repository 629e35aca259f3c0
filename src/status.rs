use std::fmt;

/// One state change reported by `waitpid` for a single process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEvent {
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
    Continued,
}

impl WaitEvent {
    #[allow(unused_unsafe)]
    pub fn from_raw(raw_status: libc::c_int) -> Option<WaitEvent> {
        if unsafe { libc::WIFEXITED(raw_status) } {
            return Some(WaitEvent::Exited(unsafe { libc::WEXITSTATUS(raw_status) }));
        }
        if unsafe { libc::WIFSIGNALED(raw_status) } {
            return Some(WaitEvent::Signaled(unsafe { libc::WTERMSIG(raw_status) }));
        }
        if unsafe { libc::WIFSTOPPED(raw_status) } {
            return Some(WaitEvent::Stopped(unsafe { libc::WSTOPSIG(raw_status) }));
        }
        if unsafe { libc::WIFCONTINUED(raw_status) } {
            return Some(WaitEvent::Continued);
        }
        None
    }
}

/// Convert a raw wait status into shell-style exit code semantics.
///
/// Processes terminated by a signal map to `128 + signal`. Stop and continue
/// reports carry no exit code.
pub fn exit_code_from_wait_status(raw_status: libc::c_int) -> Option<i32> {
    match WaitEvent::from_raw(raw_status)? {
        WaitEvent::Exited(code) => Some(code),
        WaitEvent::Signaled(signal) => Some(128 + signal),
        WaitEvent::Stopped(_) | WaitEvent::Continued => None,
    }
}

/// Raw wait status of a process that exited with `code`.
///
/// Used for work that never had a process of its own (in-shell builtins,
/// stages that were never started).
pub fn exited(code: i32) -> libc::c_int {
    (code & 0xff) << 8
}

/// Aggregate lifecycle state of a whole pipeline, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Completed,
}

impl JobState {
    pub fn label(self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Stopped => "stopped",
            JobState::Completed => "completed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_exit_status_decodes() {
        assert_eq!(WaitEvent::from_raw(exited(0)), Some(WaitEvent::Exited(0)));
        assert_eq!(exit_code_from_wait_status(exited(7)), Some(7));
        assert_eq!(exit_code_from_wait_status(exited(256 + 3)), Some(3));
    }

    #[test]
    fn signal_termination_maps_to_128_plus_signal() {
        // Raw layout for "killed by SIGINT" on Linux and the BSDs.
        let raw = libc::SIGINT;
        assert_eq!(WaitEvent::from_raw(raw), Some(WaitEvent::Signaled(libc::SIGINT)));
        assert_eq!(exit_code_from_wait_status(raw), Some(128 + libc::SIGINT));
    }

    #[test]
    fn stop_report_has_no_exit_code() {
        let raw = (libc::SIGTSTP << 8) | 0x7f;
        assert_eq!(WaitEvent::from_raw(raw), Some(WaitEvent::Stopped(libc::SIGTSTP)));
        assert_eq!(exit_code_from_wait_status(raw), None);
    }

    #[test]
    fn state_labels() {
        assert_eq!(JobState::Running.to_string(), "running");
        assert_eq!(JobState::Stopped.label(), "stopped");
        assert_eq!(JobState::Completed.label(), "completed");
    }
}
