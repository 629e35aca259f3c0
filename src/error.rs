use std::io;

/// All errors produced by the job-control engine.
///
/// None of these are fatal to the shell: callers print them and turn them into
/// a non-zero status.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    /// A pipe/open/dup/close/fork call failed while wiring a pipeline.
    #[error("{op}: {source}")]
    Io {
        op: String,
        #[source]
        source: io::Error,
    },

    /// `execve` failed inside a forked child.
    #[error("{program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Malformed input: bad builtin arguments, unknown job ids, syntax errors.
    #[error("{0}")]
    UserInput(String),

    /// Querying or changing the terminal mode or its foreground group failed.
    #[error("terminal: {op}: {source}")]
    TerminalState {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("cannot launch an empty pipeline")]
    EmptyPipeline,

    #[error("pipeline has already been launched")]
    AlreadyLaunched,
}

impl JobError {
    pub fn io(op: impl Into<String>, source: io::Error) -> Self {
        JobError::Io {
            op: op.into(),
            source,
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        JobError::UserInput(message.into())
    }

    pub fn terminal(op: &'static str, source: io::Error) -> Self {
        JobError::TerminalState { op, source }
    }

    /// Shell status reported for this error.
    pub fn status(&self) -> i32 {
        match self {
            JobError::UserInput(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_carries_os_description() {
        let err = JobError::io(
            "open missing.txt",
            io::Error::from_raw_os_error(libc::ENOENT),
        );
        let text = err.to_string();
        assert!(text.starts_with("open missing.txt: "), "{text}");
        assert!(text.contains("No such file"), "{text}");
        assert_eq!(err.status(), 1);
    }

    #[test]
    fn user_input_is_reported_verbatim() {
        let err = JobError::user("99: no such job");
        assert_eq!(err.to_string(), "99: no such job");
        assert_eq!(err.status(), 2);
    }
}
