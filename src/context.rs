use std::collections::BTreeMap;
use std::ffi::CString;
use std::path::PathBuf;

use crate::jobs::JobTable;
use crate::terminal::Terminal;

pub const MAX_HISTORY_SIZE: usize = 10_000;

/// Everything a command can observe or change about the running shell.
///
/// Builtins and pipeline launches receive it explicitly; nothing in the crate
/// keeps shell state in globals.
#[derive(Debug)]
pub struct ShellContext {
    /// Variables handed to every child as its environment.
    pub env: BTreeMap<String, String>,
    pub aliases: BTreeMap<String, String>,
    /// Submitted lines, oldest first.
    pub history: Vec<String>,
    pub jobs: JobTable,
    pub terminal: Terminal,
    pub last_status: i32,
    pub previous_dir: Option<PathBuf>,
    /// Set by `exit`; the driver stops reading input once this is `Some`.
    pub exit_request: Option<i32>,
    /// True in a forked pipeline stage running a builtin. Such a process
    /// holds a copy of the job table but is not the parent of any job.
    pub forked_stage: bool,
}

impl ShellContext {
    pub fn new(terminal: Terminal) -> Self {
        ShellContext {
            env: std::env::vars_os()
                .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
                .collect(),
            aliases: BTreeMap::new(),
            history: Vec::new(),
            jobs: JobTable::new(),
            terminal,
            last_status: 0,
            previous_dir: None,
            exit_request: None,
            forked_stage: false,
        }
    }

    /// A context without job control, for non-interactive use and tests.
    pub fn detached() -> Self {
        ShellContext::new(Terminal::detached())
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    pub fn remove_var(&mut self, name: &str) -> Option<String> {
        self.env.remove(name)
    }

    /// `NAME=value` strings for `execve`. Entries that cannot be passed
    /// through C (embedded NUL) are skipped.
    pub fn environment(&self) -> Vec<CString> {
        self.env
            .iter()
            .filter_map(|(name, value)| CString::new(format!("{name}={value}")).ok())
            .collect()
    }

    /// Record a submitted line.
    ///
    /// Blank lines and consecutive duplicates are ignored; the oldest entries
    /// are dropped beyond `MAX_HISTORY_SIZE`.
    pub fn add_history(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        if self.history.last().map(String::as_str) == Some(trimmed) {
            return;
        }
        self.history.push(trimmed.to_string());
        if self.history.len() > MAX_HISTORY_SIZE {
            let excess = self.history.len() - MAX_HISTORY_SIZE;
            self.history.drain(..excess);
        }
    }
}
