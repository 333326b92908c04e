//! Pipe sink - streams fixed-size records into a shell command
//!
//! Spawns `sh -c <command>` once at construction and forwards every accepted
//! record to the child's standard input: raw record bytes, back to back, no
//! framing. The pipe's write end is non-blocking, so a full OS pipe shows up
//! as a reduced accepted count, never as a stalled caller — the caller
//! retries the remainder on a later invocation.
//!
//! # Data Flow
//!
//! ```text
//! [Caller] --records--> [PipeSink] --staged bytes--> [OS pipe] --> [sh -c command]
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pipe_sink::{PipeSink, PipeSinkConfig};
//!
//! let config = PipeSinkConfig::new("gzip -c > capture.gz", 16).with_unbuffered(true);
//! let mut sink = PipeSink::new(config)?;
//!
//! let accepted = sink.process(&records)?;
//!
//! // Drains staged bytes, closes the pipe, waits for the child.
//! let outcome = sink.shutdown();
//! ```

mod process;
mod writer;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::{DEFAULT_BUFFER_SIZE, PipeSinkError};
use process::ProcessPipe;

pub use process::{ExitOutcome, PipeState};

/// Configuration for the pipe sink
#[derive(Debug, Clone)]
pub struct PipeSinkConfig {
    /// Sink identifier (used in log lines)
    pub id: String,

    /// Shell command the records are piped into (`sh -c <command>`)
    pub command: String,

    /// Size of one record in bytes; every batch is a whole multiple of this
    pub record_size: usize,

    /// Staging-buffer capacity in bytes
    pub buffer_size: usize,

    /// Flush staged bytes through to the pipe after every write
    pub unbuffered: bool,
}

impl PipeSinkConfig {
    /// Create a config for the given command and record size
    pub fn new(command: impl Into<String>, record_size: usize) -> Self {
        Self {
            id: "pipe".into(),
            command: command.into(),
            record_size,
            buffer_size: DEFAULT_BUFFER_SIZE,
            unbuffered: false,
        }
    }

    /// Set the sink identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the staging-buffer capacity
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Start in unbuffered mode
    pub fn with_unbuffered(mut self, unbuffered: bool) -> Self {
        self.unbuffered = unbuffered;
        self
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Metrics for the pipe sink
#[derive(Debug, Default)]
pub struct PipeSinkMetrics {
    /// Total batches handed to `process`
    batches_received: AtomicU64,

    /// Records accepted into the stream
    records_accepted: AtomicU64,

    /// Records rejected under backpressure (retried by the caller)
    records_rejected: AtomicU64,

    /// Bytes accepted into the stream
    bytes_accepted: AtomicU64,

    /// Hard write failures
    write_errors: AtomicU64,

    /// Explicit flush operations
    flush_count: AtomicU64,
}

impl PipeSinkMetrics {
    /// Create new metrics instance
    #[inline]
    pub const fn new() -> Self {
        Self {
            batches_received: AtomicU64::new(0),
            records_accepted: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
            bytes_accepted: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
        }
    }

    /// Record a batch handed to `process`
    #[inline]
    pub fn record_received(&self) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a write
    #[inline]
    pub fn record_batch(&self, accepted: u64, rejected: u64, bytes: u64) {
        self.records_accepted.fetch_add(accepted, Ordering::Relaxed);
        self.records_rejected.fetch_add(rejected, Ordering::Relaxed);
        self.bytes_accepted.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a hard write failure
    #[inline]
    pub fn record_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an explicit flush
    #[inline]
    pub fn record_flush(&self) {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            bytes_accepted: self.bytes_accepted.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        self.batches_received.store(0, Ordering::Relaxed);
        self.records_accepted.store(0, Ordering::Relaxed);
        self.records_rejected.store(0, Ordering::Relaxed);
        self.bytes_accepted.store(0, Ordering::Relaxed);
        self.write_errors.store(0, Ordering::Relaxed);
        self.flush_count.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of pipe sink metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_received: u64,
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub bytes_accepted: u64,
    pub write_errors: u64,
    pub flush_count: u64,
}

// =============================================================================
// PipeSink Implementation
// =============================================================================

/// Streaming sink that forwards fixed-size records to a command process
///
/// Owns exactly one spawned command process for its whole lifetime. `process`
/// never blocks the caller; teardown drains the staging buffer, closes the
/// pipe, and blocks until the child is reaped.
#[derive(Debug)]
pub struct PipeSink {
    /// Configuration
    config: PipeSinkConfig,

    /// The spawned command process and its stdin pipe
    pipe: ProcessPipe,

    /// Flush staged bytes after every write; toggled between writes
    unbuffered: bool,

    /// Metrics (Arc so snapshots stay readable while the sink is borrowed)
    metrics: Arc<PipeSinkMetrics>,
}

impl PipeSink {
    /// Spawn the command process and wire up the sink.
    ///
    /// Fails without leaving a partial sink behind: a child spawned before a
    /// later setup step fails is killed and reaped.
    pub fn new(config: PipeSinkConfig) -> Result<Self, PipeSinkError> {
        if config.record_size == 0 {
            return Err(PipeSinkError::config(
                "record size must be greater than zero",
            ));
        }

        let pipe = ProcessPipe::spawn(
            &config.id,
            &config.command,
            config.record_size,
            config.buffer_size,
        )?;

        tracing::info!(
            sink = %config.id,
            command = %config.command,
            record_size = config.record_size,
            "pipe sink starting"
        );

        let unbuffered = config.unbuffered;
        Ok(Self {
            config,
            pipe,
            unbuffered,
            metrics: Arc::new(PipeSinkMetrics::new()),
        })
    }

    /// Get the sink name/id
    #[inline]
    pub fn name(&self) -> &str {
        &self.config.id
    }

    /// Get reference to metrics
    #[inline]
    pub fn metrics(&self) -> &PipeSinkMetrics {
        &self.metrics
    }

    /// Whether every write is flushed straight through to the pipe
    #[inline]
    pub fn unbuffered(&self) -> bool {
        self.unbuffered
    }

    /// Toggle unbuffered mode; takes effect on the next write
    pub fn set_unbuffered(&mut self, unbuffered: bool) {
        self.unbuffered = unbuffered;
    }

    /// Current lifecycle state of the underlying pipe
    pub fn state(&self) -> PipeState {
        self.pipe.state()
    }

    /// Staged bytes not yet accepted by the OS pipe
    pub fn pending(&self) -> usize {
        self.pipe.pending()
    }

    /// Forward a batch of records, returning how many were accepted.
    ///
    /// `records` must be a whole number of `record_size`-sized elements. The
    /// accepted count can be short of the batch when the staging buffer and
    /// the OS pipe are both full — that is backpressure, not an error; the
    /// caller retries the remainder on a later call. A hard I/O failure (the
    /// child is gone) is fatal to the stream and surfaced as an error.
    pub fn process(&mut self, records: &[u8]) -> Result<usize, PipeSinkError> {
        let record_size = self.config.record_size;
        if records.len() % record_size != 0 {
            return Err(PipeSinkError::MisalignedBatch {
                len: records.len(),
                record_size,
            });
        }

        self.metrics.record_received();

        let count = records.len() / record_size;
        match self.pipe.write(records, self.unbuffered) {
            Ok(accepted) => {
                self.metrics.record_batch(
                    accepted as u64,
                    (count - accepted) as u64,
                    (accepted * record_size) as u64,
                );
                Ok(accepted)
            }
            Err(e) => {
                self.metrics.record_error();
                Err(e)
            }
        }
    }

    /// Push staged bytes into the pipe without waiting for the next batch
    ///
    /// Best effort: a full OS pipe leaves the remainder staged rather than
    /// blocking the caller.
    pub fn flush(&mut self) -> Result<(), PipeSinkError> {
        self.pipe.flush()?;
        self.metrics.record_flush();
        Ok(())
    }

    /// Tear the sink down and report how the child ended.
    ///
    /// Restores blocking mode, drains the staging buffer, closes the pipe,
    /// and waits for the child. Dropping the sink performs the same teardown;
    /// the explicit call is for callers that want the outcome.
    pub fn shutdown(mut self) -> ExitOutcome {
        let outcome = self.pipe.shutdown();

        let s = self.metrics.snapshot();
        tracing::info!(
            sink = %self.config.id,
            batches = s.batches_received,
            records = s.records_accepted,
            bytes = s.bytes_accepted,
            errors = s.write_errors,
            "pipe sink shutting down"
        );

        outcome
    }
}

#[cfg(test)]
#[path = "pipe_test.rs"]
mod pipe_test;
