use std::io::{self, Write};
use std::path::PathBuf;

use tracing::debug;

use crate::builtins::STOPPED_STATUS;
use crate::context::ShellContext;
use crate::editor::LineEditor;
use crate::error::{JobError, Result};
use crate::expander;
use crate::job::Pipeline;
use crate::parser::{self, ParsedLine, Redirection, Word};
use crate::redirect::RedirectTarget;
use crate::status::JobState;
use crate::unit::ExecutableUnit;

pub const DEFAULT_PROMPT: &str = "jobsh> ";

/// How the interactive loop behaves.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub prompt: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions { prompt: true }
    }
}

/// Expand a parsed line into a pipeline ready to launch.
pub fn build_pipeline(ctx: &ShellContext, line: ParsedLine) -> Result<Pipeline> {
    let units = line
        .stages
        .iter()
        .map(|words| ExecutableUnit::new(expander::expand_words(words, ctx)))
        .collect();
    let mut job = Pipeline::new(line.text, units);

    for redirection in &line.redirections {
        let (fd, target) = match redirection {
            Redirection::File { fd, mode, word } => (
                *fd,
                RedirectTarget::Path {
                    path: redirect_path(word, ctx)?,
                    mode: *mode,
                },
            ),
            Redirection::Descriptor { fd, to } if fd == to => continue,
            Redirection::Descriptor { fd, to } => (*fd, RedirectTarget::Descriptor(*to)),
        };
        match fd {
            libc::STDIN_FILENO => job.stdin = Some(target),
            libc::STDOUT_FILENO => job.stdout = Some(target),
            _ => job.stderr = Some(target),
        }
    }

    if line.background {
        job.set_background();
    }
    Ok(job)
}

/// A redirection word must expand to exactly one path.
fn redirect_path(word: &Word, ctx: &ShellContext) -> Result<PathBuf> {
    let arg = expander::expand_word(word, ctx);
    let mut paths = if arg.glob {
        expander::expand_wildcards(&arg.text)
    } else {
        vec![arg.text.clone()]
    };
    match (paths.pop(), paths.is_empty()) {
        (Some(path), true) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Err(JobError::user(format!("{}: ambiguous redirect", arg.text))),
    }
}

/// Run one line of input and return its status, which also becomes `$?`.
pub fn execute_line(ctx: &mut ShellContext, line: &str) -> i32 {
    ctx.add_history(line);

    let parsed = match parser::parse_line(line) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return ctx.last_status,
        Err(err) => return finish(ctx, report(&err)),
    };
    let mut job = match build_pipeline(ctx, parsed) {
        Ok(job) => job,
        Err(err) => return finish(ctx, report(&err)),
    };

    let status = match job.launch(ctx) {
        Ok(()) => settle(ctx, job),
        Err(err) => {
            if job.has_started() && !job.is_completed() {
                // Keep the stages that did start so they get reaped.
                job.set_background();
                let id = ctx.jobs.insert(job);
                debug!(id, "tracking partially started job");
            }
            eprintln!("jobsh: {err}");
            1
        }
    };
    finish(ctx, status)
}

fn report(err: &JobError) -> i32 {
    eprintln!("jobsh: {err}");
    err.status()
}

fn finish(ctx: &mut ShellContext, status: i32) -> i32 {
    ctx.last_status = status;
    status
}

/// Decide what happens to a job once `launch` has returned.
fn settle(ctx: &mut ShellContext, job: Pipeline) -> i32 {
    match job.state() {
        JobState::Completed => job.exit_code().unwrap_or(1),
        JobState::Running if job.is_background() => {
            let pgid = job.pgid();
            let id = ctx.jobs.insert(job);
            match pgid {
                Some(pgid) => println!("[{id}] {pgid}"),
                None => println!("[{id}]"),
            }
            0
        }
        JobState::Stopped | JobState::Running => {
            let id = ctx.jobs.insert(job);
            if let Some(job) = ctx.jobs.get_mut(id) {
                println!("{}", job.format_job_info(JobState::Stopped.label()));
                job.set_notified(true);
            }
            STOPPED_STATUS
        }
    }
}

/// Collect background status changes and tell the user about them.
pub fn report_job_events(ctx: &mut ShellContext, out: &mut dyn Write) {
    ctx.jobs.reap();
    for line in ctx.jobs.drain_notifications() {
        let _ = writeln!(out, "{line}");
    }
    let _ = out.flush();
}

/// Read and execute lines until end of input or `exit`. Returns the shell's
/// exit status.
pub fn run(ctx: &mut ShellContext, options: RunOptions) -> i32 {
    let mut editor = LineEditor::new();

    loop {
        report_job_events(ctx, &mut io::stdout());

        let prompt = if options.prompt {
            ctx.var("PS1").unwrap_or(DEFAULT_PROMPT).to_string()
        } else {
            String::new()
        };
        let line = match editor.read_line(&prompt, &ctx.history) {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                eprintln!("jobsh: {}", JobError::io("read input", err));
                break;
            }
        };

        execute_line(ctx, &line);
        if let Some(code) = ctx.exit_request {
            return code;
        }
    }
    ctx.last_status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::OpenMode;

    fn build(line: &str, ctx: &ShellContext) -> Pipeline {
        let parsed = parser::parse_line(line).unwrap().unwrap();
        build_pipeline(ctx, parsed).unwrap()
    }

    #[test]
    fn redirections_land_on_their_streams() {
        let mut ctx = ShellContext::detached();
        ctx.set_var("OUT", "result.txt");
        let job = build("sort < in.txt 2>&1 >> $OUT", &ctx);
        assert_eq!(job.stdin, Some(RedirectTarget::input("in.txt")));
        assert_eq!(
            job.stdout,
            Some(RedirectTarget::Path {
                path: PathBuf::from("result.txt"),
                mode: OpenMode::Append,
            })
        );
        assert_eq!(job.stderr, Some(RedirectTarget::Descriptor(libc::STDOUT_FILENO)));
        assert!(!job.is_background());
    }

    #[test]
    fn later_redirection_wins_and_self_duplication_is_dropped() {
        let ctx = ShellContext::detached();
        let job = build("ls > a > b >&1 &", &ctx);
        assert_eq!(job.stdout, Some(RedirectTarget::overwrite("b")));
        assert!(job.is_background());
        assert_eq!(job.units().len(), 1);
    }

    #[test]
    fn stages_are_expanded_with_context() {
        let mut ctx = ShellContext::detached();
        ctx.set_var("WHO", "world");
        let job = build("echo hello $WHO | tr a-z A-Z", &ctx);
        let argv: Vec<Vec<String>> = job.units().iter().map(ExecutableUnit::argv).collect();
        assert_eq!(argv, vec![vec!["echo", "hello", "world"], vec!["tr", "a-z", "A-Z"]]);
        assert_eq!(job.display_text(), "echo hello $WHO | tr a-z A-Z");
    }

    #[test]
    fn ambiguous_redirect_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), "").unwrap();
        std::fs::write(dir.path().join("b.log"), "").unwrap();
        let ctx = ShellContext::detached();
        let line = format!("echo x > {}/*.log", dir.path().display());
        let parsed = parser::parse_line(&line).unwrap().unwrap();
        let err = build_pipeline(&ctx, parsed).unwrap_err();
        assert!(err.to_string().ends_with("*.log: ambiguous redirect"), "{err}");

        let parsed = parser::parse_line("echo x > $UNSET_JOBSH_VAR").unwrap().unwrap();
        assert!(build_pipeline(&ctx, parsed).is_err());
    }

    #[test]
    fn execute_line_sets_last_status() {
        let mut ctx = ShellContext::detached();
        assert_eq!(execute_line(&mut ctx, "sh -c 'exit 3'"), 3);
        assert_eq!(ctx.last_status, 3);
        assert_eq!(execute_line(&mut ctx, "   "), 3, "blank lines keep $?");
        assert_eq!(execute_line(&mut ctx, "ls |"), 2);
        assert_eq!(ctx.last_status, 2);
        assert_eq!(ctx.history, vec!["sh -c 'exit 3'", "ls |"]);
        assert!(ctx.jobs.is_empty());
    }

    #[test]
    fn exit_builtin_sets_exit_request() {
        let mut ctx = ShellContext::detached();
        execute_line(&mut ctx, "exit 5");
        assert_eq!(ctx.exit_request, Some(5));
    }
}
