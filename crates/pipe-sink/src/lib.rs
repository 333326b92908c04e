//! Pipe Sink
//!
//! Streams fixed-size binary records into the standard input of a spawned
//! shell command. The hard part is the coupling of three concerns that must
//! not deadlock or leak descriptors or zombie processes:
//!
//! - **Process lifecycle**: one child per sink, spawned at construction via
//!   `sh -c`, reaped exactly once at teardown.
//! - **Non-blocking pipe I/O**: writes never stall the caller; a full OS
//!   pipe surfaces as a reduced accepted count the caller retries later.
//! - **Deterministic shutdown**: teardown restores blocking mode, drains the
//!   staging buffer, closes the pipe (EOF to the child), waits for the child,
//!   and reports how it ended.
//!
//! # Architecture
//!
//! ```text
//! [Caller] --records--> [PipeSink] --> [StreamWriter] --> [OS pipe] --> [sh -c command]
//!                           |               |
//!                       [metrics]    [staging buffer]
//! ```
//!
//! The wire format is raw record bytes, back to back — no framing, headers,
//! or delimiters. The child's output is not read back.

/// Pipe sink - forwards records to a spawned command process
pub mod pipe;

/// Common types shared by the crate (errors, constants)
mod common;

pub use common::{DEFAULT_BUFFER_SIZE, PipeSinkError};
pub use pipe::{
    ExitOutcome, MetricsSnapshot, PipeSink, PipeSinkConfig, PipeSinkMetrics, PipeState,
};
