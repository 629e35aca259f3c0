use std::io::{self, Write};
use std::path::PathBuf;

use crate::context::ShellContext;
use crate::error::JobError;
use crate::search;
use crate::status::JobState;

/// A builtin handler. `args` excludes the command name; the return value is
/// the exit status.
pub type BuiltinFn = fn(&mut ShellContext, &[String], &mut dyn Write, &mut dyn Write) -> i32;

/// Status of a job that stopped while in the foreground.
pub const STOPPED_STATUS: i32 = 128 + libc::SIGTSTP;

/// Name, usage line and handler of every builtin.
const BUILTINS: &[(&str, &str, BuiltinFn)] = &[
    ("cd", "cd [dir | -]", builtin_cd),
    ("pwd", "pwd", builtin_pwd),
    ("echo", "echo [-n] [arg ...]", builtin_echo),
    ("exit", "exit [n]", builtin_exit),
    ("export", "export [name[=value] ...]", builtin_export),
    ("unset", "unset name ...", builtin_unset),
    ("alias", "alias [name[=value] ...]", builtin_alias),
    ("unalias", "unalias [-a] name ...", builtin_unalias),
    ("history", "history", builtin_history),
    ("help", "help", builtin_help),
    ("type", "type name ...", builtin_type),
    ("jobs", "jobs", builtin_jobs),
    ("fg", "fg [%job]", builtin_fg),
    ("bg", "bg [%job]", builtin_bg),
    ("wait", "wait [%job ...]", builtin_wait),
];

/// Find the handler for a builtin name.
pub fn lookup(name: &str) -> Option<BuiltinFn> {
    BUILTINS
        .iter()
        .find(|(builtin, _, _)| *builtin == name)
        .map(|(_, _, handler)| *handler)
}

pub fn is_builtin(name: &str) -> bool {
    lookup(name).is_some()
}

/// Print `<builtin>: <error>` and return the error's status.
fn fail(stderr: &mut dyn Write, builtin: &str, err: &JobError) -> i32 {
    let _ = writeln!(stderr, "{builtin}: {err}");
    err.status()
}

/// Report a failed write to the builtin's output as `<builtin>: write error`.
fn written(stderr: &mut dyn Write, builtin: &str, result: io::Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(err) => {
            let _ = writeln!(stderr, "{builtin}: write error: {err}");
            1
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn builtin_cd(
    ctx: &mut ShellContext,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    if args.len() > 1 {
        return fail(stderr, "cd", &JobError::user("too many arguments"));
    }

    let target = match args.first().map(String::as_str) {
        Some("-") => match &ctx.previous_dir {
            Some(previous) => previous.clone(),
            None => return fail(stderr, "cd", &JobError::user("no previous directory")),
        },
        Some(dir) => PathBuf::from(dir),
        None => match ctx.var("HOME") {
            Some(home) => PathBuf::from(home),
            None => return fail(stderr, "cd", &JobError::user("HOME not set")),
        },
    };

    let current = std::env::current_dir().ok();
    if let Err(err) = std::env::set_current_dir(&target) {
        let _ = writeln!(stderr, "cd: {}: {err}", target.display());
        return 1;
    }

    if args.first().is_some_and(|arg| arg == "-") {
        let _ = writeln!(stdout, "{}", target.display());
    }
    if let Some(current) = current {
        ctx.set_var("OLDPWD", current.display().to_string());
        ctx.previous_dir = Some(current);
    }
    if let Ok(now) = std::env::current_dir() {
        ctx.set_var("PWD", now.display().to_string());
    }
    0
}

fn builtin_pwd(
    _ctx: &mut ShellContext,
    _args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    match std::env::current_dir() {
        Ok(path) => written(stderr, "pwd", writeln!(stdout, "{}", path.display()).map(|()| 0)),
        Err(e) => {
            let _ = writeln!(stderr, "pwd: {e}");
            1
        }
    }
}

fn builtin_echo(
    _ctx: &mut ShellContext,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let (newline, words) = match args.first().map(String::as_str) {
        Some("-n") => (false, &args[1..]),
        _ => (true, args),
    };
    let text = words.join(" ");
    let result = if newline {
        writeln!(stdout, "{text}")
    } else {
        write!(stdout, "{text}")
    };
    written(stderr, "echo", result.and_then(|()| stdout.flush()).map(|()| 0))
}

fn builtin_exit(
    ctx: &mut ShellContext,
    args: &[String],
    _stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let code = match args.first() {
        None => ctx.last_status,
        Some(s) => match s.parse::<i32>() {
            Ok(code) => code,
            Err(_) => {
                let _ = writeln!(stderr, "exit: {s}: numeric argument required");
                2
            }
        },
    };
    ctx.exit_request = Some(code);
    code
}

fn builtin_export(
    ctx: &mut ShellContext,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    if args.is_empty() {
        let listing = ctx
            .env
            .iter()
            .try_for_each(|(name, value)| writeln!(stdout, "export {name}={value:?}"));
        return written(stderr, "export", listing.map(|()| 0));
    }

    let mut status = 0;
    for arg in args {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (arg.as_str(), None),
        };
        if !is_identifier(name) {
            status = fail(stderr, "export", &JobError::user(format!("`{arg}': not a valid identifier")));
            continue;
        }
        match value {
            Some(value) => ctx.set_var(name, value),
            None if ctx.var(name).is_none() => ctx.set_var(name, ""),
            None => {}
        }
    }
    status
}

fn builtin_unset(
    ctx: &mut ShellContext,
    args: &[String],
    _stdout: &mut dyn Write,
    _stderr: &mut dyn Write,
) -> i32 {
    for name in args {
        ctx.remove_var(name);
    }
    0
}

fn builtin_alias(
    ctx: &mut ShellContext,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    if args.is_empty() {
        let listing = ctx
            .aliases
            .iter()
            .try_for_each(|(name, value)| writeln!(stdout, "alias {name}='{value}'"));
        return written(stderr, "alias", listing.map(|()| 0));
    }

    let mut status = 0;
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                ctx.aliases.insert(name.to_string(), value.to_string());
            }
            Some(_) => {
                status = fail(stderr, "alias", &JobError::user(format!("`{arg}': invalid alias name")));
            }
            None => match ctx.aliases.get(arg) {
                Some(value) => {
                    if let Err(err) = writeln!(stdout, "alias {arg}='{value}'") {
                        return written(stderr, "alias", Err(err));
                    }
                }
                None => {
                    let _ = writeln!(stderr, "alias: {arg}: not found");
                    status = 1;
                }
            },
        }
    }
    status
}

fn builtin_unalias(
    ctx: &mut ShellContext,
    args: &[String],
    _stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    if args.is_empty() {
        return fail(stderr, "unalias", &JobError::user("usage: unalias [-a] name ..."));
    }
    if args.iter().any(|arg| arg == "-a") {
        ctx.aliases.clear();
        return 0;
    }

    let mut status = 0;
    for name in args {
        if ctx.aliases.remove(name).is_none() {
            let _ = writeln!(stderr, "unalias: {name}: not found");
            status = 1;
        }
    }
    status
}

fn builtin_history(
    ctx: &mut ShellContext,
    _args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let listing = ctx
        .history
        .iter()
        .enumerate()
        .try_for_each(|(index, line)| writeln!(stdout, "{:5}  {line}", index + 1));
    written(stderr, "history", listing.map(|()| 0))
}

fn builtin_help(
    _ctx: &mut ShellContext,
    _args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let listing = writeln!(stdout, "jobsh builtins:")
        .and_then(|()| BUILTINS.iter().try_for_each(|(_, usage, _)| writeln!(stdout, "  {usage}")));
    written(stderr, "help", listing.map(|()| 0))
}

fn builtin_type(
    ctx: &mut ShellContext,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let mut exit_code = 0;
    for arg in args {
        let described = if let Some(value) = ctx.aliases.get(arg) {
            writeln!(stdout, "{arg} is aliased to `{value}'")
        } else if is_builtin(arg) {
            writeln!(stdout, "{arg} is a shell builtin")
        } else {
            match search::locate(arg, ctx.var("PATH")) {
                Some(path) => writeln!(stdout, "{arg} is {}", path.display()),
                None => {
                    let _ = writeln!(stderr, "{arg}: not found");
                    exit_code = 1;
                    Ok(())
                }
            }
        };
        if let Err(err) = described {
            return written(stderr, "type", Err(err));
        }
    }
    exit_code
}

// ── Job control builtins ──

/// List all tracked jobs, then forget the ones that have completed.
fn builtin_jobs(
    ctx: &mut ShellContext,
    _args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    // A forked pipeline stage sees a copy of the table but is not the parent
    // of any job, so it lists what the shell knew at fork time.
    if !ctx.forked_stage {
        ctx.jobs.refresh();
    }

    let mut finished = Vec::new();
    let listing = ctx.jobs.jobs_sorted().into_iter().try_for_each(|job| {
        let state = job.state();
        if state == JobState::Completed {
            finished.extend(job.id());
        }
        writeln!(stdout, "{}", job.format_job_info(state.label()))
    });
    if !ctx.forked_stage {
        for id in finished {
            ctx.jobs.remove(id);
        }
    }
    written(stderr, "jobs", listing.map(|()| 0))
}

/// Jobs can only be resumed or waited for by the shell that started them.
fn require_job_control(ctx: &ShellContext, stderr: &mut dyn Write, builtin: &str) -> Option<i32> {
    ctx.forked_stage
        .then(|| fail(stderr, builtin, &JobError::user("no job control in a pipeline stage")))
}

/// Bring a background or stopped job to the foreground and wait for it.
fn builtin_fg(
    ctx: &mut ShellContext,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    if let Some(status) = require_job_control(ctx, stderr, "fg") {
        return status;
    }
    if args.len() > 1 {
        return fail(stderr, "fg", &JobError::user("too many arguments"));
    }
    let id = match ctx.jobs.select(args.first().map(String::as_str)) {
        Ok(id) => id,
        Err(err) => return fail(stderr, "fg", &err),
    };
    let Some(job) = ctx.jobs.get_mut(id) else {
        return fail(stderr, "fg", &JobError::user(format!("{id}: no such job")));
    };

    let _ = writeln!(stdout, "{}", job.format_job_info(JobState::Running.label()));
    let _ = stdout.flush();
    let was_stopped = job.is_stopped();
    job.set_foreground();
    job.put_in_foreground(&ctx.terminal, was_stopped);

    match job.state() {
        JobState::Stopped => {
            let _ = writeln!(stdout, "{}", job.format_job_info(JobState::Stopped.label()));
            job.set_notified(true);
            STOPPED_STATUS
        }
        JobState::Completed => {
            let code = job.exit_code().unwrap_or(1);
            ctx.jobs.remove(id);
            code
        }
        // Only reachable when the job has no process group to wait on.
        JobState::Running => 0,
    }
}

/// Resume a stopped job in the background.
fn builtin_bg(
    ctx: &mut ShellContext,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    if let Some(status) = require_job_control(ctx, stderr, "bg") {
        return status;
    }
    if args.len() > 1 {
        return fail(stderr, "bg", &JobError::user("too many arguments"));
    }
    let id = match ctx.jobs.select(args.first().map(String::as_str)) {
        Ok(id) => id,
        Err(err) => return fail(stderr, "bg", &err),
    };
    let Some(job) = ctx.jobs.get_mut(id) else {
        return fail(stderr, "bg", &JobError::user(format!("{id}: no such job")));
    };

    let was_stopped = job.is_stopped();
    job.put_in_background(was_stopped);
    let _ = writeln!(stdout, "{}", job.format_job_info(JobState::Running.label()));
    0
}

/// Block until the named jobs, or all running jobs, finish.
fn builtin_wait(
    ctx: &mut ShellContext,
    args: &[String],
    _stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    if let Some(status) = require_job_control(ctx, stderr, "wait") {
        return status;
    }
    let ids = if args.is_empty() {
        ctx.jobs.running_ids()
    } else {
        let mut ids = Vec::with_capacity(args.len());
        for arg in args {
            match ctx.jobs.select(Some(arg)) {
                Ok(id) => ids.push(id),
                Err(err) => return fail(stderr, "wait", &err),
            }
        }
        ids
    };

    let mut status = 0;
    for id in ids {
        let Some(job) = ctx.jobs.get_mut(id) else {
            continue;
        };
        job.wait(true);
        status = match job.state() {
            JobState::Completed => {
                let code = job.exit_code().unwrap_or(1);
                ctx.jobs.remove(id);
                code
            }
            JobState::Stopped => STOPPED_STATUS,
            JobState::Running => 0,
        };
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ctx: &mut ShellContext, line: &[&str]) -> (i32, String, String) {
        let handler = lookup(line[0]).expect("builtin");
        let args: Vec<String> = line[1..].iter().map(|s| s.to_string()).collect();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = handler(ctx, &args, &mut out, &mut err);
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    /// Output that refuses every write, like `/dev/full`.
    struct FullWriter;

    impl Write for FullWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(libc::ENOSPC))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_errors_fail_the_builtin() {
        let mut ctx = ShellContext::detached();
        ctx.add_history("echo one");
        ctx.aliases.insert("ll".into(), "ls -l".into());
        for line in [&["echo", "hi"][..], &["pwd"], &["history"], &["alias"], &["type", "cd"], &["help"]] {
            let handler = lookup(line[0]).unwrap();
            let args: Vec<String> = line[1..].iter().map(|s| s.to_string()).collect();
            let mut err = Vec::new();
            let code = handler(&mut ctx, &args, &mut FullWriter, &mut err);
            let err = String::from_utf8(err).unwrap();
            assert_eq!(code, 1, "{line:?}");
            assert!(err.starts_with(&format!("{}: write error: ", line[0])), "{err}");
        }
    }

    #[test]
    fn job_builtins_refuse_to_run_in_a_forked_stage() {
        let mut ctx = ShellContext::detached();
        ctx.forked_stage = true;
        for name in ["fg", "bg", "wait"] {
            let (code, out, err) = run(&mut ctx, &[name]);
            assert_eq!(code, 2);
            assert!(out.is_empty());
            assert_eq!(err, format!("{name}: no job control in a pipeline stage\n"));
        }
        assert_eq!(run(&mut ctx, &["jobs"]).0, 0);
    }

    #[test]
    fn table_lookup() {
        for name in ["cd", "pwd", "echo", "exit", "export", "unset", "alias", "unalias"] {
            assert!(is_builtin(name), "{name}");
        }
        for name in ["history", "help", "type", "jobs", "fg", "bg", "wait"] {
            assert!(is_builtin(name), "{name}");
        }
        assert!(!is_builtin("ls"));
    }

    #[test]
    fn echo_joins_arguments() {
        let mut ctx = ShellContext::detached();
        assert_eq!(run(&mut ctx, &["echo", "a", "b"]), (0, "a b\n".into(), String::new()));
        assert_eq!(run(&mut ctx, &["echo", "-n", "x"]).1, "x");
        assert_eq!(run(&mut ctx, &["echo"]).1, "\n");
    }

    #[test]
    fn exit_requests_shell_exit() {
        let mut ctx = ShellContext::detached();
        ctx.last_status = 4;
        assert_eq!(run(&mut ctx, &["exit"]).0, 4);
        assert_eq!(ctx.exit_request, Some(4));

        let (code, _, err) = run(&mut ctx, &["exit", "abc"]);
        assert_eq!(code, 2);
        assert_eq!(err, "exit: abc: numeric argument required\n");
        assert_eq!(ctx.exit_request, Some(2));
    }

    #[test]
    fn export_and_unset_edit_context() {
        let mut ctx = ShellContext::detached();
        assert_eq!(run(&mut ctx, &["export", "FOO=bar", "EMPTY"]).0, 0);
        assert_eq!(ctx.var("FOO"), Some("bar"));
        assert_eq!(ctx.var("EMPTY"), Some(""));

        let (_, out, _) = run(&mut ctx, &["export"]);
        assert!(out.contains("export FOO=\"bar\"\n"), "{out}");

        let (code, _, err) = run(&mut ctx, &["export", "1BAD=x"]);
        assert_eq!(code, 2);
        assert_eq!(err, "export: `1BAD=x': not a valid identifier\n");

        run(&mut ctx, &["unset", "FOO"]);
        assert_eq!(ctx.var("FOO"), None);
    }

    #[test]
    fn alias_define_show_and_remove() {
        let mut ctx = ShellContext::detached();
        run(&mut ctx, &["alias", "ll=ls -l"]);
        assert_eq!(ctx.aliases.get("ll").map(String::as_str), Some("ls -l"));
        assert_eq!(run(&mut ctx, &["alias", "ll"]).1, "alias ll='ls -l'\n");
        assert_eq!(run(&mut ctx, &["alias"]).1, "alias ll='ls -l'\n");

        let (code, _, err) = run(&mut ctx, &["alias", "nope"]);
        assert_eq!((code, err.as_str()), (1, "alias: nope: not found\n"));

        assert_eq!(run(&mut ctx, &["unalias", "ll"]).0, 0);
        assert!(ctx.aliases.is_empty());
        assert_eq!(run(&mut ctx, &["unalias", "ll"]).0, 1);
    }

    #[test]
    fn history_is_numbered() {
        let mut ctx = ShellContext::detached();
        ctx.add_history("ls");
        ctx.add_history("pwd");
        assert_eq!(run(&mut ctx, &["history"]).1, "    1  ls\n    2  pwd\n");
    }

    #[test]
    fn help_lists_every_builtin() {
        let mut ctx = ShellContext::detached();
        let out = run(&mut ctx, &["help"]).1;
        for (name, _, _) in BUILTINS {
            assert!(out.contains(&format!("  {name}")), "{name} missing from help");
        }
    }

    #[test]
    fn type_reports_kind() {
        let mut ctx = ShellContext::detached();
        ctx.aliases.insert("ll".into(), "ls -l".into());
        let (code, out, err) = run(&mut ctx, &["type", "ll", "cd", "sh", "jobsh-missing-xyz"]);
        assert_eq!(code, 1);
        assert!(out.contains("ll is aliased to `ls -l'"), "{out}");
        assert!(out.contains("cd is a shell builtin"), "{out}");
        assert!(out.contains("sh is /"), "{out}");
        assert_eq!(err, "jobsh-missing-xyz: not found\n");
    }

    #[test]
    fn job_builtins_report_bad_ids() {
        let mut ctx = ShellContext::detached();
        assert_eq!(run(&mut ctx, &["fg"]), (2, String::new(), "fg: no current job\n".into()));
        assert_eq!(run(&mut ctx, &["bg", "%x"]).2, "bg: %x: invalid job id\n");
        assert_eq!(run(&mut ctx, &["fg", "99"]).2, "fg: 99: no such job\n");
        assert_eq!(run(&mut ctx, &["wait", "3"]).2, "wait: 3: no such job\n");
        assert_eq!(run(&mut ctx, &["fg", "1", "2"]).2, "fg: too many arguments\n");
    }

    #[test]
    fn jobs_and_wait_on_empty_table() {
        let mut ctx = ShellContext::detached();
        assert_eq!(run(&mut ctx, &["jobs"]), (0, String::new(), String::new()));
        assert_eq!(run(&mut ctx, &["wait"]).0, 0);
    }

    #[test]
    fn cd_without_previous_directory() {
        let mut ctx = ShellContext::detached();
        let (code, _, err) = run(&mut ctx, &["cd", "-"]);
        assert_eq!(code, 2);
        assert_eq!(err, "cd: no previous directory\n");
        let (code, _, err) = run(&mut ctx, &["cd", "a", "b"]);
        assert_eq!(code, 2);
        assert_eq!(err, "cd: too many arguments\n");
    }
}
