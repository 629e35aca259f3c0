//! Pipelines launched through the library, without the prompt loop.

use std::time::{Duration, Instant};

use jobsh::context::ShellContext;
use jobsh::error::JobError;
use jobsh::job::Pipeline;
use jobsh::parser;
use jobsh::shell;
use jobsh::status::JobState;
use jobsh::terminal;

fn pipeline(ctx: &ShellContext, line: &str) -> Pipeline {
    let parsed = parser::parse_line(line).unwrap().unwrap();
    shell::build_pipeline(ctx, parsed).unwrap()
}

#[test]
fn stages_share_one_new_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let mut ctx = ShellContext::detached();

    let mut job = pipeline(&ctx, &format!("echo hi | tr a-z A-Z > {}", out.display()));
    job.launch(&mut ctx).unwrap();

    assert_eq!(job.state(), JobState::Completed);
    assert_eq!(job.exit_code(), Some(0));
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "HI\n");

    let pgid = job.pgid().expect("forked pipeline has a group");
    assert_eq!(job.units()[0].pid(), Some(pgid), "first stage leads the group");
    assert_ne!(pgid, terminal::process_group_id(0).unwrap());
}

#[test]
fn long_pipeline_passes_data_through_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let mut ctx = ShellContext::detached();

    let line = format!(
        "printf 'b\\na\\nc\\n' | cat | sort | cat | head -2 > {}",
        out.display()
    );
    let mut job = pipeline(&ctx, &line);
    job.launch(&mut ctx).unwrap();
    assert_eq!(job.units().len(), 5);
    assert!(job.units().iter().all(|unit| unit.is_completed()));
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "a\nb\n");
}

#[test]
fn background_launch_returns_without_waiting() {
    let mut ctx = ShellContext::detached();
    let mut job = pipeline(&ctx, "sleep 1 &");

    let started = Instant::now();
    job.launch(&mut ctx).unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(job.is_background());
    assert_eq!(job.state(), JobState::Running);

    job.wait(true);
    assert_eq!(job.state(), JobState::Completed);
    assert_eq!(job.exit_code(), Some(0));
}

#[test]
fn exit_code_comes_from_last_stage() {
    let mut ctx = ShellContext::detached();
    let mut job = pipeline(&ctx, "sh -c 'exit 5' | sh -c 'exit 6'");
    job.launch(&mut ctx).unwrap();
    assert_eq!(job.exit_code(), Some(6));
}

#[test]
fn missing_input_file_fails_before_anything_runs() {
    let mut ctx = ShellContext::detached();
    let mut job = pipeline(&ctx, "cat < /nonexistent/jobsh-input | wc -l");
    let err = job.launch(&mut ctx).unwrap_err();
    assert!(matches!(err, JobError::Io { .. }), "{err:?}");
    assert!(!job.has_started());
    assert!(job.units().iter().all(|unit| unit.pid().is_none()));
}

#[test]
fn unknown_program_exits_with_one() {
    let mut ctx = ShellContext::detached();
    let mut job = pipeline(&ctx, "jobsh-no-such-program-abc 2> /dev/null");
    job.launch(&mut ctx).unwrap();
    assert_eq!(job.exit_code(), Some(1));
}

#[test]
fn stopped_job_resumes_in_background() {
    let mut ctx = ShellContext::detached();
    let mut job = pipeline(&ctx, "sh -c 'kill -STOP $$; exit 3'");
    job.launch(&mut ctx).unwrap();
    assert_eq!(job.state(), JobState::Stopped);
    assert_eq!(job.exit_code(), None);

    job.put_in_background(true);
    assert_eq!(job.state(), JobState::Running);
    job.wait(true);
    assert_eq!(job.state(), JobState::Completed);
    assert_eq!(job.exit_code(), Some(3));
}

#[test]
fn continuing_a_running_job_changes_nothing() {
    let mut ctx = ShellContext::detached();
    let mut job = pipeline(&ctx, "sleep 1 &");
    job.launch(&mut ctx).unwrap();

    let before = (job.state(), job.is_notified(), job.is_background());
    assert_eq!(before.0, JobState::Running);
    job.continue_job();
    assert_eq!((job.state(), job.is_notified(), job.is_background()), before);

    job.wait(true);
    assert_eq!(job.exit_code(), Some(0));
}
