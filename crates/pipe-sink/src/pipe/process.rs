//! Child process ownership and pipe lifecycle
//!
//! Spawns `sh -c <command>` with its stdin wired to a fresh pipe, keeps the
//! write end non-blocking for the sink's whole steady state, and owns the
//! drain/close/wait teardown sequence. Exactly one child per pipe; it is
//! reaped exactly once.

use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, Stdio};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use super::writer::StreamWriter;
use crate::common::PipeSinkError;

/// Lifecycle of the pipe and its child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    /// Spawned and accepting writes
    Running,
    /// Teardown started: blocking mode restored, staged bytes draining
    Draining,
    /// Child reaped; no further operations are valid
    Terminated,
}

/// How the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with the given status code
    Exited(i32),

    /// Killed by a signal or otherwise abnormally terminated
    Abnormal { signal: Option<i32> },

    /// Waiting for the child failed with the given OS errno
    WaitFailed(i32),
}

/// Owns the spawned command process and the write end of its stdin pipe.
///
/// The parent never holds the pipe's read end — the spawn layer hands it to
/// the child and closes its own copy. Teardown restores blocking mode so the
/// final drain delivers every staged byte, closes the write end (EOF to the
/// child), then waits for this specific child and reports how it ended.
#[derive(Debug)]
pub struct ProcessPipe {
    child: Child,

    /// Present only while `Running`; taken at teardown so dropping it closes
    /// the write end before the wait
    writer: Option<StreamWriter>,

    state: PipeState,

    /// Cached once terminated so repeated shutdowns do not re-wait
    outcome: Option<ExitOutcome>,

    /// Sink identifier, carried for log lines
    id: String,
}

impl ProcessPipe {
    /// Spawn `sh -c command` with its stdin wired to a fresh pipe.
    ///
    /// The command string reaches the shell verbatim. Any failure here leaves
    /// nothing behind: a child spawned before a later setup step fails is
    /// killed and reaped before the error is returned.
    pub(crate) fn spawn(
        id: &str,
        command: &str,
        record_size: usize,
        buffer_size: usize,
    ) -> Result<Self, PipeSinkError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(PipeSinkError::Spawn)?;

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                reap(&mut child);
                return Err(PipeSinkError::StdinUnavailable);
            }
        };

        // The write end stays non-blocking for the sink's whole steady state;
        // the spawn layer already created it close-on-exec.
        if let Err(errno) = set_nonblocking(stdin.as_fd()) {
            drop(stdin);
            reap(&mut child);
            return Err(PipeSinkError::FdFlags(errno));
        }

        Ok(Self {
            child,
            writer: Some(StreamWriter::new(stdin, record_size, buffer_size)),
            state: PipeState::Running,
            outcome: None,
            id: id.to_string(),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipeState {
        self.state
    }

    /// Staged bytes not yet accepted by the OS pipe
    pub(crate) fn pending(&self) -> usize {
        self.writer.as_ref().map_or(0, StreamWriter::pending)
    }

    /// Write a batch of whole records. Valid only while `Running`.
    pub(crate) fn write(
        &mut self,
        records: &[u8],
        unbuffered: bool,
    ) -> Result<usize, PipeSinkError> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_records(records, unbuffered),
            None => Err(PipeSinkError::Closed),
        }
    }

    /// Best-effort drain of the staging buffer
    pub(crate) fn flush(&mut self) -> Result<(), PipeSinkError> {
        match self.writer.as_mut() {
            Some(writer) => writer.drain(),
            None => Err(PipeSinkError::Closed),
        }
    }

    /// Drain, close, and reap the child, reporting how it ended.
    ///
    /// Idempotent: after the first call the cached outcome is returned.
    /// Failures here are logged and swallowed — teardown also runs from the
    /// drop path, where raising is not an option.
    pub fn shutdown(&mut self) -> ExitOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }

        self.state = PipeState::Draining;

        if let Some(mut writer) = self.writer.take() {
            // Back to blocking mode: the final drain must deliver the staged
            // bytes instead of stopping at a full pipe.
            if let Err(errno) = clear_nonblocking(writer.stdin().as_fd()) {
                tracing::warn!(sink = %self.id, %errno, "failed to restore blocking mode");
            }
            if let Err(e) = writer.drain() {
                tracing::warn!(sink = %self.id, error = %e, "failed to drain staged records");
            }
            // Dropping the writer closes the write end; the child sees EOF.
        }

        // Targeted wait for our child; interrupted waits are retried.
        let outcome = match self.child.wait() {
            Ok(status) => match status.code() {
                Some(code) => {
                    tracing::info!(sink = %self.id, code, "command process exited");
                    ExitOutcome::Exited(code)
                }
                None => {
                    let signal = status.signal();
                    tracing::warn!(sink = %self.id, ?signal, "abnormal command process termination");
                    ExitOutcome::Abnormal { signal }
                }
            },
            Err(e) => {
                tracing::error!(sink = %self.id, error = %e, "waiting for command process failed");
                ExitOutcome::WaitFailed(e.raw_os_error().unwrap_or(0))
            }
        };

        self.state = PipeState::Terminated;
        self.outcome = Some(outcome);
        outcome
    }
}

impl Drop for ProcessPipe {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            self.shutdown();
        }
    }
}

/// Kill and reap a child whose setup failed, so construction leaks nothing
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

// =============================================================================
// Descriptor flag helpers
// =============================================================================

/// Set `O_NONBLOCK` on a descriptor, preserving its other flags
pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<(), Errno> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Clear `O_NONBLOCK` on a descriptor, preserving its other flags
pub(crate) fn clear_nonblocking(fd: BorrowedFd<'_>) -> Result<(), Errno> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) & !OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

#[cfg(test)]
#[path = "process_test.rs"]
mod process_test;
