mod common;

use common::{run_shell, stdout_of};

#[test]
fn pipeline_sigpipe_does_not_abort_shell() {
    // head exits after one line; yes dies of SIGPIPE, the shell must not.
    let output = run_shell(&["yes | head -1", "echo ALIVE", "echo STATUS:$?"]);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(stdout.contains("STATUS:0"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn shell_ignores_sigtstp_at_prompt() {
    let output = run_shell(&["kill -TSTP $$", "echo ALIVE"]);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
}

#[test]
fn signalled_command_reports_128_plus_signal() {
    let output = run_shell(&["sh -c 'kill -TERM $$'", "echo STATUS:$?"]);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("STATUS:143"), "stdout was: {stdout}");
}

#[test]
fn stopped_foreground_job_can_be_resumed_in_background() {
    let output = run_shell(&[
        "sh -c 'kill -STOP $$; exit 3'",
        "echo STOP:$?",
        "jobs",
        "bg",
        "wait",
        "echo WAIT:$?",
    ]);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("(stopped) sh -c 'kill -STOP $$; exit 3'"), "stdout was: {stdout}");
    assert!(stdout.contains("STOP:148"), "stdout was: {stdout}");
    assert!(stdout.contains("(running) sh -c"), "stdout was: {stdout}");
    assert!(stdout.contains("WAIT:3"), "stdout was: {stdout}");
}

#[test]
fn inherited_sigchld_ignore_keeps_exit_statuses() {
    use std::io::Write;
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    let mut command = Command::new(env!("CARGO_BIN_EXE_jobsh"));
    command
        .arg("--no-prompt")
        .env("JOBSH_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // SIG_IGN survives exec, so the shell starts with SIGCHLD ignored.
    unsafe {
        command.pre_exec(|| {
            libc::signal(libc::SIGCHLD, libc::SIG_IGN);
            Ok(())
        });
    }
    let mut child = command.spawn().expect("spawn jobsh");
    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in ["false", "echo S:$?", "sh -c 'exit 7'", "echo T:$?", "exit"] {
            writeln!(stdin, "{line}").expect("write line");
        }
    }
    let output = child.wait_with_output().expect("wait output");
    let stdout = stdout_of(&output);
    assert!(stdout.contains("S:1"), "stdout was: {stdout}");
    assert!(stdout.contains("T:7"), "stdout was: {stdout}");
}
