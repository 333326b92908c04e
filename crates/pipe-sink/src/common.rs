//! Common types shared across the crate
//!
//! Error taxonomy and crate-wide constants.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Default staging-buffer capacity (64 KiB, one Linux pipe buffer's worth)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Errors from the pipe sink
///
/// Would-block is deliberately absent: a full pipe is flow control and shows
/// up as a reduced accepted count, never as an error.
#[derive(Debug, Error)]
pub enum PipeSinkError {
    /// Rejected configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to spawn the command process
    #[error("failed to spawn command process: {0}")]
    Spawn(#[source] io::Error),

    /// The spawned child did not expose a stdin handle
    #[error("child stdin was not captured")]
    StdinUnavailable,

    /// fcntl on the pipe's write end failed
    #[error("failed to configure pipe descriptor: {0}")]
    FdFlags(#[source] Errno),

    /// Record buffer length is not a whole number of records
    #[error("record buffer of {len} bytes is not a multiple of record size {record_size}")]
    MisalignedBatch { len: usize, record_size: usize },

    /// Hard I/O failure on the pipe; the stream cannot continue
    #[error("write to command process failed: {0}")]
    Write(#[source] io::Error),

    /// The sink has already been torn down
    #[error("pipe closed")]
    Closed,
}

impl PipeSinkError {
    /// Create a configuration error
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if the sink can keep running after this error
    ///
    /// A misaligned batch rejects one call without touching the stream; a
    /// write failure or a closed pipe means the sink is done and should be
    /// torn down.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MisalignedBatch { .. })
    }
}

#[cfg(test)]
#[path = "common_test.rs"]
mod common_test;
