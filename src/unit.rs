use std::ffi::CString;
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use tracing::debug;

use crate::builtins::{self, BuiltinFn};
use crate::context::ShellContext;
use crate::error::{JobError, Result};
use crate::expander::{self, Arg};
use crate::jobs::JobId;
use crate::parser;
use crate::redirect::{Endpoint, StageIo};
use crate::search;
use crate::status::{self, WaitEvent};
use crate::terminal;

/// How one stage is started, decided by the pipeline that owns it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageLaunch {
    /// Group to join; `None` makes the new process lead its own group.
    pub pgid: Option<libc::pid_t>,
    pub foreground: bool,
    /// Run a builtin inside the shell process instead of forking.
    pub in_process: bool,
    /// Descriptor the child must close before running (the read end of
    /// this stage's own output pipe).
    pub retained: Option<RawFd>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Ran to completion in the shell with this exit code.
    Finished(i32),
    /// A child process was forked.
    Spawned(libc::pid_t),
}

/// One command of a pipeline: its arguments and the state of its process.
#[derive(Debug, Clone)]
pub struct ExecutableUnit {
    args: Vec<Arg>,
    prepared: bool,
    is_builtin: bool,
    pid: libc::pid_t,
    status: Option<libc::c_int>,
    completed: bool,
    stopped: bool,
    pub(crate) job: Option<JobId>,
}

impl ExecutableUnit {
    pub fn new(args: Vec<Arg>) -> Self {
        ExecutableUnit {
            args,
            prepared: false,
            is_builtin: false,
            pid: -1,
            status: None,
            completed: false,
            stopped: false,
            job: None,
        }
    }

    /// A unit whose arguments are taken verbatim, with no wildcard matching.
    pub fn literal<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecutableUnit::new(args.into_iter().map(Arg::literal).collect())
    }

    pub fn name(&self) -> &str {
        self.args.first().map(|arg| arg.text.as_str()).unwrap_or_default()
    }

    pub fn argv(&self) -> Vec<String> {
        self.args.iter().map(|arg| arg.text.clone()).collect()
    }

    pub fn is_builtin(&self) -> bool {
        self.is_builtin
    }

    pub fn pid(&self) -> Option<libc::pid_t> {
        (self.pid > 0).then_some(self.pid)
    }

    pub fn raw_status(&self) -> Option<libc::c_int> {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn job(&self) -> Option<JobId> {
        self.job
    }

    /// Shell-style exit code, once the unit has terminated.
    pub fn exit_code(&self) -> Option<i32> {
        if !self.completed {
            return None;
        }
        self.status.and_then(status::exit_code_from_wait_status)
    }

    /// Resolve an alias for the command name, expand wildcard arguments and
    /// decide whether this is a builtin. Runs once; later calls do nothing.
    pub fn prepare(&mut self, ctx: &ShellContext) -> Result<()> {
        if self.prepared {
            return Ok(());
        }

        let alias = self
            .args
            .first()
            .filter(|first| !first.glob)
            .and_then(|first| ctx.aliases.get(&first.text));
        if let Some(value) = alias {
            let words = parser::tokenize_words(value)?;
            let rest = self.args.split_off(1);
            self.args = expander::expand_words(&words, ctx);
            self.args.extend(rest);
        }

        let mut expanded = Vec::with_capacity(self.args.len());
        for arg in self.args.drain(..) {
            if arg.glob {
                expanded.extend(expander::expand_wildcards(&arg.text).into_iter().map(Arg::literal));
            } else {
                expanded.push(arg);
            }
        }
        self.args = expanded;

        if self.args.is_empty() {
            return Err(JobError::user("empty command"));
        }
        self.is_builtin = builtins::lookup(self.name()).is_some();
        self.prepared = true;
        Ok(())
    }

    /// Start this unit with the given stream wiring.
    ///
    /// `wiring` is consumed: every descriptor it owns is closed in the shell
    /// when this returns, whichever way the unit ran.
    pub fn execute(
        &mut self,
        ctx: &mut ShellContext,
        wiring: StageIo,
        launch: StageLaunch,
    ) -> Result<Dispatch> {
        self.prepare(ctx)?;
        let handler = if self.is_builtin {
            builtins::lookup(self.name())
        } else {
            None
        };

        if launch.in_process {
            if let Some(handler) = handler {
                let code = self.run_in_shell(handler, ctx, wiring);
                return Ok(Dispatch::Finished(code));
            }
        }

        let pid = self.fork_child(handler, ctx, &wiring, launch)?;
        Ok(Dispatch::Spawned(pid))
    }

    fn run_in_shell(&mut self, handler: BuiltinFn, ctx: &mut ShellContext, wiring: StageIo) -> i32 {
        let StageIo { stdout, stderr, .. } = wiring;
        let mut out = stdout.into_writer(|| Box::new(io::stdout()));
        let mut err = stderr.into_writer(|| Box::new(io::stderr()));
        let args = self.argv();

        debug!(builtin = self.name(), "running builtin in the shell");
        let mut code = handler(ctx, &args[1..], &mut *out, &mut *err);
        if let Err(flush_err) = out.flush() {
            let _ = writeln!(err, "{}: write error: {flush_err}", self.name());
            code = code.max(1);
        }
        let _ = err.flush();

        self.mark_finished(code);
        code
    }

    fn fork_child(
        &mut self,
        handler: Option<BuiltinFn>,
        ctx: &mut ShellContext,
        wiring: &StageIo,
        launch: StageLaunch,
    ) -> Result<libc::pid_t> {
        // Everything the child needs is allocated before forking.
        let argv = self.c_argv()?;
        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());
        let envp = ctx.environment();
        let mut envp_ptrs: Vec<*const libc::c_char> = envp.iter().map(|var| var.as_ptr()).collect();
        envp_ptrs.push(std::ptr::null());

        let program = match handler {
            Some(_) => None,
            None => match search::locate(self.name(), ctx.var("PATH")) {
                Some(path) => Some(program_path(path)?),
                None => None,
            },
        };

        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(JobError::io("fork", io::Error::last_os_error()));
        }

        if pid == 0 {
            let pid = unsafe { libc::getpid() };
            let pgid = launch.pgid.unwrap_or(pid);
            let _ = terminal::set_process_group(0, pgid);
            if launch.foreground {
                ctx.terminal.claim_for_child(pgid);
            }
            terminal::restore_default_signals();

            if let Err(err) = wiring.install() {
                child_exit(1, &JobError::io("dup2", err));
            }
            if let Some(fd) = launch.retained {
                unsafe {
                    libc::close(fd);
                }
            }

            if let Some(handler) = handler {
                ctx.forked_stage = true;
                let args = self.argv();
                let mut out = Endpoint::Borrowed(libc::STDOUT_FILENO).into_writer(|| Box::new(io::sink()));
                let mut err = Endpoint::Borrowed(libc::STDERR_FILENO).into_writer(|| Box::new(io::sink()));
                let mut code = handler(ctx, &args[1..], &mut *out, &mut *err);
                if out.flush().is_err() {
                    code = code.max(1);
                }
                unsafe { libc::_exit(code) }
            }

            let source = match &program {
                Some(path) => {
                    unsafe {
                        libc::execve(path.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
                    }
                    io::Error::last_os_error()
                }
                None if self.name().contains('/') => io::Error::from_raw_os_error(libc::ENOENT),
                None => io::Error::new(io::ErrorKind::NotFound, "command not found"),
            };
            child_exit(
                1,
                &JobError::Exec {
                    program: self.name().to_string(),
                    source,
                },
            );
        }

        self.pid = pid;
        let pgid = launch.pgid.unwrap_or(pid);
        if let Err(err) = terminal::set_process_group(pid, pgid) {
            debug!(pid, pgid, %err, "setpgid from the shell failed");
        }
        debug!(pid, pgid, program = self.name(), "forked stage");
        Ok(pid)
    }

    fn c_argv(&self) -> Result<Vec<CString>> {
        self.args
            .iter()
            .map(|arg| {
                CString::new(arg.text.as_bytes())
                    .map_err(|_| JobError::user(format!("{}: argument contains a NUL byte", self.name())))
            })
            .collect()
    }

    /// Record a status reported by `waitpid` for this unit's process.
    ///
    /// Returns `false` when nothing changed: the unit had already terminated
    /// (so the same report arriving twice is harmless) or the status is not
    /// one `waitpid` produces.
    pub fn record(&mut self, raw_status: libc::c_int) -> bool {
        if self.completed {
            return false;
        }
        match WaitEvent::from_raw(raw_status) {
            Some(WaitEvent::Stopped(_)) => {
                self.stopped = true;
                self.status = Some(raw_status);
            }
            Some(WaitEvent::Continued) => self.stopped = false,
            Some(WaitEvent::Exited(_) | WaitEvent::Signaled(_)) => {
                self.completed = true;
                self.stopped = false;
                self.status = Some(raw_status);
            }
            None => return false,
        }
        true
    }

    /// Complete the unit with `code` without a process of its own.
    pub fn mark_finished(&mut self, code: i32) {
        self.status = Some(status::exited(code));
        self.completed = true;
        self.stopped = false;
    }

    /// The process is gone but its status was collected elsewhere.
    pub(crate) fn mark_lost(&mut self) {
        self.completed = true;
        self.stopped = false;
    }

    pub(crate) fn clear_stopped(&mut self) {
        self.stopped = false;
    }

    #[cfg(test)]
    pub(crate) fn with_pid(mut self, pid: libc::pid_t) -> Self {
        self.pid = pid;
        self
    }
}

fn program_path(path: PathBuf) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| JobError::user(format!("{}: path contains a NUL byte", path.display())))
}

/// Report a failure from inside a forked child and leave without running
/// any of the shell's exit handling.
fn child_exit(code: i32, err: &JobError) -> ! {
    let message = format!("jobsh: {err}\n");
    unsafe {
        libc::write(libc::STDERR_FILENO, message.as_ptr().cast(), message.len());
        libc::_exit(code)
    }
}
