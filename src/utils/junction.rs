//! Byte conduits between stages: anonymous pipes for the linear chain and
//! named FIFOs (inside a per-run workspace) for the fan-out tail.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::debug;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tempfile::TempDir;
use tokio::process::ChildStdout;

use crate::config::defs::{PipelineError, WORKSPACE_PREFIX};

#[derive(Debug, Clone, PartialEq)]
pub enum JunctionKind {
    Pipe,
    NamedFifo(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Junction {
    pub id: &'static str,
    pub kind: JunctionKind,
}

impl Junction {
    pub fn pipe(id: &'static str) -> Self {
        Junction { id, kind: JunctionKind::Pipe }
    }

    pub fn fifo_path(&self) -> Option<&Path> {
        match &self.kind {
            JunctionKind::NamedFifo(path) => Some(path),
            JunctionKind::Pipe => None,
        }
    }
}


/// Ephemeral directory owned by one run. Holds the named FIFOs and spool files.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Creates a fresh workspace under `parent`; every run gets its own so FIFO
    /// names never collide.
    pub fn create(parent: &Path) -> Result<Self, PipelineError> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| PipelineError::Resource(format!("Failed to create workspace in {}: {}", parent.display(), e)))?;
        debug!("Workspace created at {}", dir.path().display());
        Ok(Workspace { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Allocates a named FIFO junction inside the workspace.
    pub fn fifo(&self, id: &'static str) -> Result<Junction, PipelineError> {
        let path = self.dir.path().join(id);
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR)
            .map_err(|e| PipelineError::Resource(format!("mkfifo {} failed: {}", path.display(), e)))?;
        Ok(Junction { id, kind: JunctionKind::NamedFifo(path) })
    }

    /// Anonymous scratch file inside the workspace.
    pub fn spool(&self) -> io::Result<File> {
        tempfile::tempfile_in(self.dir.path())
    }

    /// Removes the directory and everything in it. Consumes the workspace so it
    /// can only happen once.
    pub fn close(self) -> Result<(), PipelineError> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| PipelineError::Resource(format!("Failed to remove workspace {}: {}", path.display(), e)))?;
        debug!("Workspace {} removed", path.display());
        Ok(())
    }
}


/// A write end of a FIFO kept open by the orchestrator on behalf of the producer.
///
/// While it is alive the reader cannot see end-of-stream, so it must be dropped
/// once the producer has been reaped or failed to launch.
#[derive(Debug)]
pub struct FifoHold {
    id: &'static str,
    _writer: File,
}

impl FifoHold {
    pub fn id(&self) -> &'static str {
        self.id
    }
}

/// Opens the consumer side of a FIFO without waiting for the producer.
///
/// The read end is opened non-blocking (a reader never waits for a writer), a
/// hold write end is opened against it, then the read end is switched back to
/// blocking mode for the child or task that will consume it.
///
/// # Arguments
///
/// * `junction` - A named FIFO junction.
///
/// # Returns
/// The blocking read end and the hold for the producer.
pub fn open_fifo(junction: &Junction) -> Result<(File, FifoHold), PipelineError> {
    let path = junction
        .fifo_path()
        .ok_or_else(|| PipelineError::Resource(format!("Junction {} is not a named FIFO", junction.id)))?;
    let resource_err = |what: &str, e: &dyn std::fmt::Display| {
        PipelineError::Resource(format!("Failed to {} {}: {}", what, path.display(), e))
    };

    let reader = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| resource_err("open read end of", &e))?;
    let writer = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| resource_err("open hold on", &e))?;
    fcntl(reader.as_raw_fd(), FcntlArg::F_SETFL(OFlag::empty()))
        .map_err(|e| resource_err("restore blocking mode on", &e))?;

    Ok((reader, FifoHold { id: junction.id, _writer: writer }))
}

/// Turns a producer's stdout into the next stage's stdin.
pub fn pipe_to_stdio(stdout: ChildStdout) -> io::Result<Stdio> {
    stdout.try_into()
}
