//! Record-oriented write discipline over the pipe's write end
//!
//! Records enter the staging buffer only whole; the kernel-facing drain may
//! stop at any byte offset, so the unsent remainder stays staged and the byte
//! stream handed to the child can never start mid-record.

use std::io::{self, ErrorKind, Write};
use std::process::ChildStdin;

use bytes::{Buf, BytesMut};

use crate::common::PipeSinkError;

/// Staged, record-granular writer over the pipe's write end.
///
/// The descriptor is non-blocking while the sink is running: a drain stops at
/// would-block and keeps the remainder staged. During teardown the owner
/// switches the descriptor back to blocking mode and the same drain loop runs
/// to empty.
#[derive(Debug)]
pub(crate) struct StreamWriter {
    stdin: ChildStdin,

    /// Size of one record; records are staged and accounted in this unit
    record_size: usize,

    /// Bytes accepted from the caller but not yet accepted by the OS pipe
    buf: BytesMut,

    /// Staging capacity; always at least one record
    capacity: usize,
}

impl StreamWriter {
    /// Wrap the child's stdin handle.
    ///
    /// `capacity` is clamped so at least one record can always be staged.
    pub(crate) fn new(stdin: ChildStdin, record_size: usize, capacity: usize) -> Self {
        let capacity = capacity.max(record_size);
        Self {
            stdin,
            record_size,
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Borrow the underlying stdin handle (for descriptor flag changes)
    pub(crate) fn stdin(&self) -> &ChildStdin {
        &self.stdin
    }

    /// Bytes staged but not yet accepted by the OS pipe
    pub(crate) fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Write a batch of whole records, returning how many were accepted.
    ///
    /// A record is accepted once all of its bytes are staged; staged bytes go
    /// out to the pipe ahead of any later record. When the staging buffer and
    /// the OS pipe are both full, the remaining records are rejected and the
    /// caller retries them on a later invocation.
    pub(crate) fn write_records(
        &mut self,
        records: &[u8],
        unbuffered: bool,
    ) -> Result<usize, PipeSinkError> {
        debug_assert_eq!(records.len() % self.record_size, 0);

        // Free up room first; also keeps delivery in call order.
        self.drain()?;

        let mut accepted = 0;
        for record in records.chunks_exact(self.record_size) {
            if self.buf.len() + self.record_size > self.capacity {
                self.drain()?;
                if self.buf.len() + self.record_size > self.capacity {
                    break;
                }
            }
            self.buf.extend_from_slice(record);
            accepted += 1;
        }

        if unbuffered {
            self.drain()?;
        }

        Ok(accepted)
    }

    /// Push staged bytes into the pipe until it stops accepting them.
    ///
    /// Would-block is flow control, not an error: the remainder stays staged
    /// for the next call. With the descriptor in blocking mode (teardown)
    /// this loop runs until the buffer is empty.
    pub(crate) fn drain(&mut self) -> Result<(), PipeSinkError> {
        while !self.buf.is_empty() {
            match self.stdin.write(&self.buf) {
                Ok(0) => {
                    return Err(PipeSinkError::Write(io::Error::new(
                        ErrorKind::WriteZero,
                        "pipe accepted zero bytes",
                    )));
                }
                Ok(n) => self.buf.advance(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PipeSinkError::Write(e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "writer_test.rs"]
mod writer_test;
