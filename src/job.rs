use tracing::{debug, warn};

use crate::context::ShellContext;
use crate::error::{JobError, Result};
use crate::jobs::JobId;
use crate::redirect::{Endpoint, RedirectTarget, StageIo, resolve_or_inherit};
use crate::status::JobState;
use crate::terminal::{self, Terminal, TerminalMode};
use crate::unit::{Dispatch, ExecutableUnit, StageLaunch};

/// A pipeline of units sharing one process group: the shell's notion of a job.
#[derive(Debug)]
pub struct Pipeline {
    display_text: String,
    units: Vec<ExecutableUnit>,
    /// Where the first unit reads from; `None` inherits the shell's stdin.
    pub stdin: Option<RedirectTarget>,
    /// Where the last unit writes to; `None` inherits the shell's stdout.
    pub stdout: Option<RedirectTarget>,
    /// Where every unit writes its errors; `None` inherits the shell's stderr.
    pub stderr: Option<RedirectTarget>,
    pgid: Option<libc::pid_t>,
    saved_mode: Option<TerminalMode>,
    launched: bool,
    id: Option<JobId>,
    notified: bool,
    background: bool,
}

impl Pipeline {
    pub fn new(display_text: impl Into<String>, units: Vec<ExecutableUnit>) -> Self {
        Pipeline {
            display_text: display_text.into(),
            units,
            stdin: None,
            stdout: None,
            stderr: None,
            pgid: None,
            saved_mode: None,
            launched: false,
            id: None,
            notified: false,
            background: false,
        }
    }

    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    pub fn units(&self) -> &[ExecutableUnit] {
        &self.units
    }

    pub fn pgid(&self) -> Option<libc::pid_t> {
        self.pgid
    }

    pub fn id(&self) -> Option<JobId> {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: JobId) {
        self.id = Some(id);
        for unit in &mut self.units {
            unit.job = Some(id);
        }
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn set_foreground(&mut self) {
        self.background = false;
    }

    pub fn set_background(&mut self) {
        self.background = true;
    }

    pub fn is_notified(&self) -> bool {
        self.notified
    }

    pub fn set_notified(&mut self, notified: bool) {
        self.notified = notified;
    }

    /// At least one unit became a process.
    pub fn has_started(&self) -> bool {
        self.units.iter().any(|unit| unit.pid().is_some())
    }

    /// Every unit has terminated.
    pub fn is_completed(&self) -> bool {
        self.units.iter().all(ExecutableUnit::is_completed)
    }

    /// Every unit has terminated or stopped, and at least one is stopped.
    pub fn is_stopped(&self) -> bool {
        self.units.iter().all(|unit| unit.is_completed() || unit.is_stopped())
            && self.units.iter().any(ExecutableUnit::is_stopped)
    }

    pub fn state(&self) -> JobState {
        if self.is_completed() {
            JobState::Completed
        } else if self.is_stopped() {
            JobState::Stopped
        } else {
            JobState::Running
        }
    }

    /// Exit code of the last unit, once it has terminated.
    pub fn exit_code(&self) -> Option<i32> {
        self.units.last().and_then(ExecutableUnit::exit_code)
    }

    /// `[<id>] <pgid> (<label>) <text>`; the id is left out until the job is
    /// in the table and `-` stands for a missing process group.
    pub fn format_job_info(&self, label: &str) -> String {
        let pgid = self
            .pgid
            .map_or_else(|| "-".to_string(), |pgid| pgid.to_string());
        match self.id {
            Some(id) => format!("[{id}] {pgid} ({label}) {}", self.display_text),
            None => format!("{pgid} ({label}) {}", self.display_text),
        }
    }

    /// Start every unit.
    ///
    /// A pipeline of one builtin runs inside the shell. Anything else is
    /// forked into a fresh process group connected by pipes, then either
    /// waited for in the foreground or left running in the background.
    ///
    /// On error the units that were already forked keep running and the ones
    /// that never started are marked completed with status 1.
    pub fn launch(&mut self, ctx: &mut ShellContext) -> Result<()> {
        if self.launched {
            return Err(JobError::AlreadyLaunched);
        }
        if self.units.is_empty() {
            return Err(JobError::EmptyPipeline);
        }
        self.launched = true;

        if let Err(err) = self.spawn_units(ctx) {
            self.abandon_unstarted();
            if self.has_started() && !self.background {
                ctx.terminal.reclaim();
            }
            return Err(err);
        }

        if !self.has_started() {
            return Ok(());
        }
        if self.background {
            self.put_in_background(false);
        } else {
            self.put_in_foreground(&ctx.terminal, false);
        }
        Ok(())
    }

    fn spawn_units(&mut self, ctx: &mut ShellContext) -> Result<()> {
        for unit in &mut self.units {
            unit.prepare(ctx)?;
        }

        if self.units.len() == 1 && self.units[0].is_builtin() {
            let wiring = self.builtin_wiring()?;
            let launch = StageLaunch {
                in_process: true,
                ..StageLaunch::default()
            };
            self.units[0].execute(ctx, wiring, launch)?;
            return Ok(());
        }

        let stderr = resolve_or_inherit(self.stderr.as_ref())?;
        let mut next_stdin = resolve_or_inherit(self.stdin.as_ref())?;
        let count = self.units.len();

        for index in 0..count {
            let (stdout, next_reader) = if index + 1 == count {
                (resolve_or_inherit(self.stdout.as_ref())?, None)
            } else {
                let (reader, writer) = os_pipe::pipe().map_err(|e| JobError::io("pipe", e))?;
                (
                    Endpoint::from_pipe_writer(writer),
                    Some(Endpoint::from_pipe_reader(reader)),
                )
            };

            let wiring = StageIo {
                stdin: std::mem::replace(&mut next_stdin, Endpoint::Inherit),
                stdout,
                stderr: stderr.share(),
            };
            let launch = StageLaunch {
                pgid: self.pgid,
                foreground: !self.background,
                in_process: false,
                retained: next_reader.as_ref().and_then(Endpoint::raw_fd),
            };

            match self.units[index].execute(ctx, wiring, launch)? {
                Dispatch::Spawned(pid) => {
                    if self.pgid.is_none() {
                        self.pgid = Some(pid);
                    }
                }
                Dispatch::Finished(code) => {
                    debug!(code, "stage finished without forking");
                }
            }
            next_stdin = next_reader.unwrap_or(Endpoint::Inherit);
        }
        Ok(())
    }

    /// Stream wiring for a builtin running in the shell. `2>&1` has to follow
    /// the redirected stdout since no `dup2` happens here.
    fn builtin_wiring(&self) -> Result<StageIo> {
        let stdin = resolve_or_inherit(self.stdin.as_ref())?;
        let stdout = resolve_or_inherit(self.stdout.as_ref())?;
        let stderr = match &self.stderr {
            Some(RedirectTarget::Descriptor(fd)) if *fd == libc::STDOUT_FILENO => stdout.share(),
            other => resolve_or_inherit(other.as_ref())?,
        };
        Ok(StageIo {
            stdin,
            stdout,
            stderr,
        })
    }

    fn abandon_unstarted(&mut self) {
        for unit in &mut self.units {
            if unit.pid().is_none() && !unit.is_completed() {
                unit.mark_finished(1);
            }
        }
    }

    /// Give the job the terminal, optionally continue it, and wait until it
    /// completes or stops. The job's terminal mode is saved for a later `fg`.
    pub fn put_in_foreground(&mut self, terminal: &Terminal, continue_stopped: bool) {
        self.background = false;
        let Some(pgid) = self.pgid else {
            return;
        };
        if self.is_completed() {
            return;
        }

        let guard = terminal.hand_over(pgid);
        if continue_stopped {
            if let Some(mode) = &self.saved_mode {
                terminal.apply_mode(mode);
            }
            self.continue_job();
        }
        self.update_status();
        if let Some(mode) = guard.finish() {
            self.saved_mode = Some(mode);
        }
    }

    pub fn put_in_background(&mut self, continue_stopped: bool) {
        self.background = true;
        if continue_stopped {
            self.continue_job();
        }
    }

    /// Send SIGCONT to the job's process group and forget that it was stopped.
    /// Does nothing unless some unit is stopped.
    pub fn continue_job(&mut self) {
        let Some(pgid) = self.pgid else {
            return;
        };
        if !self.units.iter().any(ExecutableUnit::is_stopped) {
            return;
        }
        for unit in &mut self.units {
            if !unit.is_completed() {
                unit.clear_stopped();
            }
        }
        self.notified = false;
        if let Err(err) = terminal::send_signal_to_group(pgid, libc::SIGCONT) {
            warn!(pgid, %err, "failed to continue job");
        }
    }

    /// Collect status changes of the job's processes.
    ///
    /// Blocking waits return once the job has completed or stopped; a
    /// non-blocking wait records whatever is pending and returns.
    pub fn wait(&mut self, blocking: bool) {
        let Some(pgid) = self.pgid else {
            return;
        };
        let mut flags = libc::WUNTRACED | libc::WCONTINUED;
        if !blocking {
            flags |= libc::WNOHANG;
        }

        while !self.is_completed() && !(blocking && self.is_stopped()) {
            match terminal::wait_pid(-pgid, flags) {
                Ok(Some((pid, raw_status))) => {
                    if !self.mark_process_status(pid, raw_status) {
                        debug!(pid, pgid, "status for a process outside the job");
                    }
                }
                Ok(None) => break,
                Err(err) if err.raw_os_error() == Some(libc::ECHILD) => {
                    debug!(pgid, "job processes were reaped elsewhere");
                    self.forget_unreaped();
                    break;
                }
                Err(err) => {
                    warn!(pgid, %err, "waitpid failed");
                    break;
                }
            }
        }
    }

    /// Poll the job: block while it owns the terminal, otherwise just look.
    pub fn update_status(&mut self) {
        self.wait(!self.background);
    }

    /// Record a status observed for `pid`. Returns whether `pid` belongs to
    /// this job. Reports for units that already terminated are ignored.
    pub fn mark_process_status(&mut self, pid: libc::pid_t, raw_status: libc::c_int) -> bool {
        match self.units.iter_mut().find(|unit| unit.pid() == Some(pid)) {
            Some(unit) => {
                unit.record(raw_status);
                true
            }
            None => false,
        }
    }

    fn forget_unreaped(&mut self) {
        for unit in &mut self.units {
            if unit.pid().is_some() && !unit.is_completed() {
                unit.mark_lost();
            }
        }
    }
}
