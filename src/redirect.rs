use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use crate::error::{JobError, Result};

/// How a path redirection opens its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Write, create, truncate (`>`).
    Overwrite,
    /// Write, create, append (`>>`).
    Append,
    /// Read only (`<`).
    Input,
}

/// The four flavours of redirection, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Overwrite,
    Append,
    Input,
    Descriptor,
}

/// A resolved source or destination for one standard stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    /// An already-open descriptor the shell does not own (e.g. `2>&1`).
    Descriptor(RawFd),
    /// A file opened lazily at launch time.
    Path { path: PathBuf, mode: OpenMode },
}

impl RedirectTarget {
    pub fn overwrite(path: impl Into<PathBuf>) -> Self {
        RedirectTarget::Path {
            path: path.into(),
            mode: OpenMode::Overwrite,
        }
    }

    pub fn append(path: impl Into<PathBuf>) -> Self {
        RedirectTarget::Path {
            path: path.into(),
            mode: OpenMode::Append,
        }
    }

    pub fn input(path: impl Into<PathBuf>) -> Self {
        RedirectTarget::Path {
            path: path.into(),
            mode: OpenMode::Input,
        }
    }

    pub fn kind(&self) -> RedirectKind {
        match self {
            RedirectTarget::Descriptor(_) => RedirectKind::Descriptor,
            RedirectTarget::Path { mode, .. } => match mode {
                OpenMode::Overwrite => RedirectKind::Overwrite,
                OpenMode::Append => RedirectKind::Append,
                OpenMode::Input => RedirectKind::Input,
            },
        }
    }

    /// Produce the endpoint a stage will use.
    ///
    /// Descriptor targets are borrowed: nothing is opened and nothing will be
    /// closed. Path targets open exactly one new descriptor, owned by the caller.
    pub fn resolve(&self) -> Result<Endpoint> {
        match self {
            RedirectTarget::Descriptor(fd) => Ok(Endpoint::Borrowed(*fd)),
            RedirectTarget::Path { path, mode } => {
                let file = open_for(path, *mode)
                    .map_err(|e| JobError::io(format!("open {}", path.display()), e))?;
                Ok(Endpoint::Owned(OwnedFd::from(file)))
            }
        }
    }
}

fn open_for(path: &Path, mode: OpenMode) -> io::Result<File> {
    let mut options = OpenOptions::new();
    match mode {
        OpenMode::Overwrite => options.write(true).create(true).truncate(true),
        OpenMode::Append => options.append(true).create(true),
        OpenMode::Input => options.read(true),
    };
    options.open(path)
}

/// Resolve an optional pipeline-level redirect; `None` inherits the shell's stream.
pub fn resolve_or_inherit(target: Option<&RedirectTarget>) -> Result<Endpoint> {
    match target {
        Some(target) => target.resolve(),
        None => Ok(Endpoint::Inherit),
    }
}

/// What one standard stream of a stage is wired to.
#[derive(Debug)]
pub enum Endpoint {
    /// Keep whatever the shell itself has on that descriptor.
    Inherit,
    /// A descriptor created for this launch; closed when dropped.
    Owned(OwnedFd),
    /// A descriptor somebody else owns; never closed here.
    Borrowed(RawFd),
}

impl Endpoint {
    pub fn from_pipe_reader(reader: os_pipe::PipeReader) -> Self {
        Endpoint::Owned(unsafe { OwnedFd::from_raw_fd(reader.into_raw_fd()) })
    }

    pub fn from_pipe_writer(writer: os_pipe::PipeWriter) -> Self {
        Endpoint::Owned(unsafe { OwnedFd::from_raw_fd(writer.into_raw_fd()) })
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            Endpoint::Inherit => None,
            Endpoint::Owned(fd) => Some(fd.as_raw_fd()),
            Endpoint::Borrowed(fd) => Some(*fd),
        }
    }

    /// A non-owning view, used to hand one resolved stderr to every stage.
    pub fn share(&self) -> Endpoint {
        match self.raw_fd() {
            Some(fd) => Endpoint::Borrowed(fd),
            None => Endpoint::Inherit,
        }
    }

    /// Duplicate onto `target` (0, 1 or 2). Only called in a forked child.
    pub(crate) fn install(&self, target: RawFd) -> io::Result<()> {
        let Some(fd) = self.raw_fd() else {
            return Ok(());
        };
        if fd == target {
            return Ok(());
        }
        loop {
            if unsafe { libc::dup2(fd, target) } >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    /// A writer for an in-shell builtin; `fallback` serves `Inherit`.
    pub fn into_writer(self, fallback: fn() -> Box<dyn Write>) -> Box<dyn Write> {
        match self {
            Endpoint::Inherit => fallback(),
            Endpoint::Owned(fd) => Box::new(File::from(fd)),
            Endpoint::Borrowed(fd) => Box::new(BorrowedWriter(ManuallyDrop::new(unsafe {
                File::from_raw_fd(fd)
            }))),
        }
    }
}

/// Writes through a descriptor without taking ownership of it.
struct BorrowedWriter(ManuallyDrop<File>);

impl Write for BorrowedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Full wiring of one pipeline stage.
#[derive(Debug)]
pub struct StageIo {
    pub stdin: Endpoint,
    pub stdout: Endpoint,
    pub stderr: Endpoint,
}

impl StageIo {
    pub fn inherit() -> Self {
        StageIo {
            stdin: Endpoint::Inherit,
            stdout: Endpoint::Inherit,
            stderr: Endpoint::Inherit,
        }
    }

    /// Install all three streams in a forked child, in stdin, stdout, stderr
    /// order so that `2>&1` sees the stage's real stdout.
    pub(crate) fn install(&self) -> io::Result<()> {
        self.stdin.install(libc::STDIN_FILENO)?;
        self.stdout.install(libc::STDOUT_FILENO)?;
        self.stderr.install(libc::STDERR_FILENO)?;
        Ok(())
    }
}
