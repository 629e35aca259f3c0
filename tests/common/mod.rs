#![allow(dead_code)]

use std::io::Write;
use std::process::{Command, Output, Stdio};

/// Feed `lines` to a prompt-less shell on a pipe, followed by `exit`.
pub fn run_shell(lines: &[&str]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_jobsh"))
        .arg("--no-prompt")
        .env("JOBSH_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn jobsh");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
        writeln!(stdin, "exit").expect("write exit");
    }

    child.wait_with_output().expect("wait output")
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
