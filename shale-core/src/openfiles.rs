//! Files open within a shell instance.
//!
//! The interpreter performs its own I/O (the `print` family, redirections
//! targeting the shell itself) through these handles so that captured
//! output and redirected descriptors compose with external commands.

use std::collections::HashMap;
use std::process::Stdio;

use crate::error::Error;

/// A file open in a shell context.
pub enum OpenFile {
    /// The process's original standard input.
    Stdin(std::io::Stdin),
    /// The process's original standard output.
    Stdout(std::io::Stdout),
    /// The process's original standard error.
    Stderr(std::io::Stderr),
    /// A file opened for reading or writing.
    File(std::fs::File),
    /// The read end of a pipe.
    PipeReader(os_pipe::PipeReader),
    /// The write end of a pipe.
    PipeWriter(os_pipe::PipeWriter),
}

impl OpenFile {
    /// Tries to duplicate the open file.
    pub fn try_dup(&self) -> Result<Self, Error> {
        let result = match self {
            Self::Stdin(_) => Self::Stdin(std::io::stdin()),
            Self::Stdout(_) => Self::Stdout(std::io::stdout()),
            Self::Stderr(_) => Self::Stderr(std::io::stderr()),
            Self::File(f) => Self::File(f.try_clone()?),
            Self::PipeReader(r) => Self::PipeReader(r.try_clone()?),
            Self::PipeWriter(w) => Self::PipeWriter(w.try_clone()?),
        };

        Ok(result)
    }

    /// Converts the open file into an owned descriptor.
    pub fn into_owned_fd(self) -> Result<std::os::fd::OwnedFd, Error> {
        use std::os::fd::AsFd;

        match self {
            Self::Stdin(f) => Ok(f.as_fd().try_clone_to_owned()?),
            Self::Stdout(f) => Ok(f.as_fd().try_clone_to_owned()?),
            Self::Stderr(f) => Ok(f.as_fd().try_clone_to_owned()?),
            Self::File(f) => Ok(f.into()),
            Self::PipeReader(r) => Ok(r.into()),
            Self::PipeWriter(w) => Ok(w.into()),
        }
    }
}

impl From<OpenFile> for Stdio {
    fn from(open_file: OpenFile) -> Self {
        match open_file {
            OpenFile::Stdin(_) | OpenFile::Stdout(_) | OpenFile::Stderr(_) => Self::inherit(),
            OpenFile::File(f) => f.into(),
            OpenFile::PipeReader(r) => r.into(),
            OpenFile::PipeWriter(w) => w.into(),
        }
    }
}

impl std::io::Read for OpenFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Stdin(f) => f.read(buf),
            Self::File(f) => f.read(buf),
            Self::PipeReader(r) => r.read(buf),
            _ => Err(std::io::Error::other("file is not readable")),
        }
    }
}

impl std::io::Write for OpenFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Stdout(f) => f.write(buf),
            Self::Stderr(f) => f.write(buf),
            Self::File(f) => f.write(buf),
            Self::PipeWriter(w) => w.write(buf),
            _ => Err(std::io::Error::other("file is not writable")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(f) => f.flush(),
            Self::Stderr(f) => f.flush(),
            Self::File(f) => f.flush(),
            Self::PipeWriter(w) => w.flush(),
            _ => Ok(()),
        }
    }
}

/// The open files of a shell context, keyed by descriptor number.
pub struct OpenFiles {
    files: HashMap<u32, OpenFile>,
}

impl Default for OpenFiles {
    fn default() -> Self {
        Self {
            files: HashMap::from([
                (Self::STDIN_FD, OpenFile::Stdin(std::io::stdin())),
                (Self::STDOUT_FD, OpenFile::Stdout(std::io::stdout())),
                (Self::STDERR_FD, OpenFile::Stderr(std::io::stderr())),
            ]),
        }
    }
}

impl OpenFiles {
    /// Descriptor number of standard input.
    pub const STDIN_FD: u32 = 0;
    /// Descriptor number of standard output.
    pub const STDOUT_FD: u32 = 1;
    /// Descriptor number of standard error.
    pub const STDERR_FD: u32 = 2;

    /// Duplicates the whole set.
    pub fn try_clone(&self) -> Result<Self, Error> {
        let mut files = HashMap::new();
        for (fd, file) in &self.files {
            files.insert(*fd, file.try_dup()?);
        }
        Ok(Self { files })
    }

    /// Returns a duplicate of the file at `fd`.
    pub fn dup(&self, fd: u32) -> Result<Option<OpenFile>, Error> {
        self.files.get(&fd).map(OpenFile::try_dup).transpose()
    }

    /// Returns a duplicate of standard output; usable with `write!`.
    pub fn stdout(&self) -> Result<OpenFile, Error> {
        Ok(self
            .dup(Self::STDOUT_FD)?
            .unwrap_or_else(|| OpenFile::Stdout(std::io::stdout())))
    }

    /// Returns a duplicate of standard error.
    pub fn stderr(&self) -> Result<OpenFile, Error> {
        Ok(self
            .dup(Self::STDERR_FD)?
            .unwrap_or_else(|| OpenFile::Stderr(std::io::stderr())))
    }

    /// Returns a duplicate of standard input.
    pub fn stdin(&self) -> Result<OpenFile, Error> {
        Ok(self
            .dup(Self::STDIN_FD)?
            .unwrap_or_else(|| OpenFile::Stdin(std::io::stdin())))
    }

    /// Associates `fd` with `file`, returning the displaced file.
    pub fn set(&mut self, fd: u32, file: OpenFile) -> Option<OpenFile> {
        self.files.insert(fd, file)
    }

    /// Removes and returns the file at `fd`.
    pub fn remove(&mut self, fd: u32) -> Option<OpenFile> {
        self.files.remove(&fd)
    }

    /// Iterates over the descriptor/file pairs, consuming the set.
    pub fn into_iter(self) -> impl Iterator<Item = (u32, OpenFile)> {
        self.files.into_iter()
    }
}
