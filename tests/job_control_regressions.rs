mod common;

use common::{run_shell, stderr_of, stdout_of};

#[test]
fn wait_returns_background_job_exit_status() {
    let output = run_shell(&["sh -c 'sleep 1; exit 7' &", "wait", "echo WAIT:$?"]);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("WAIT:7"), "stdout was: {stdout}");
}

#[test]
fn background_launch_prints_job_id_and_pgid() {
    let output = run_shell(&["sleep 1 &", "echo BG:$?", "wait"]);
    let stdout = stdout_of(&output);
    let first = stdout.lines().next().unwrap_or_default();
    let mut parts = first.split_whitespace();
    assert_eq!(parts.next(), Some("[1]"), "stdout was: {stdout}");
    assert!(parts.next().and_then(|pgid| pgid.parse::<i32>().ok()).is_some(), "stdout was: {stdout}");
    assert!(stdout.contains("BG:0"), "stdout was: {stdout}");
}

#[test]
fn wait_invalid_job_id_sets_nonzero_status() {
    let output = run_shell(&["wait %99999", "echo WAIT:$?"]);
    let stdout = stdout_of(&output);
    let stderr = stderr_of(&output);
    assert!(stdout.contains("WAIT:2"), "stdout was: {stdout}");
    assert!(stderr.contains("wait: %99999: no such job"), "stderr was: {stderr}");
}

#[test]
fn fg_preserves_signal_exit_code() {
    let output = run_shell(&["sh -c 'sleep 1; kill -INT $$' &", "fg", "echo FG:$?"]);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("(running) sh -c 'sleep 1; kill -INT $$'"), "stdout was: {stdout}");
    assert!(stdout.contains("FG:130"), "stdout was: {stdout}");
}

#[test]
fn fg_with_unknown_job_leaves_existing_jobs_alone() {
    let output = run_shell(&["sleep 1 &", "fg 99", "echo FG:$?", "jobs", "wait", "echo WAIT:$?"]);
    let stdout = stdout_of(&output);
    let stderr = stderr_of(&output);
    assert!(stderr.contains("fg: 99: no such job"), "stderr was: {stderr}");
    assert!(stdout.contains("FG:2"), "stdout was: {stdout}");
    assert!(stdout.contains("(running) sleep 1 &"), "stdout was: {stdout}");
    assert!(stdout.contains("WAIT:0"), "stdout was: {stdout}");
}

#[test]
fn fg_without_jobs_reports_no_current_job() {
    let output = run_shell(&["fg", "bg", "echo STATUS:$?"]);
    let stderr = stderr_of(&output);
    assert!(stderr.contains("fg: no current job"), "stderr was: {stderr}");
    assert!(stderr.contains("bg: no current job"), "stderr was: {stderr}");
    assert!(stdout_of(&output).contains("STATUS:2"));
}

#[test]
fn finished_background_job_is_reported_before_next_prompt() {
    let output = run_shell(&["true &", "sleep 1", "echo NEXT"]);
    let stdout = stdout_of(&output);
    let report = stdout.find("(completed) true &");
    let next = stdout.find("NEXT");
    assert!(report.is_some() && report < next, "stdout was: {stdout}");
}

#[test]
fn job_builtins_in_a_pipeline_stage_leave_jobs_alone() {
    let output = run_shell(&[
        "sleep 2 &",
        "jobs | cat",
        "fg | cat",
        "wait | cat",
        "jobs",
        "wait",
        "echo WAIT:$?",
    ]);
    let stdout = stdout_of(&output);
    let stderr = stderr_of(&output);
    assert!(!stdout.contains("(completed)"), "stdout was: {stdout}");
    assert_eq!(stdout.matches("(running) sleep 2 &").count(), 2, "stdout was: {stdout}");
    assert!(stderr.contains("fg: no job control in a pipeline stage"), "stderr was: {stderr}");
    assert!(stderr.contains("wait: no job control in a pipeline stage"), "stderr was: {stderr}");
    assert!(stdout.contains("WAIT:0"), "stdout was: {stdout}");
}
