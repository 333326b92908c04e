//! Tests for the pipe sink
//!
//! The round-trip tests capture the child's stdin in a file and compare it
//! byte-for-byte against the records handed to `process`.

use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::tempdir;

use super::{ExitOutcome, MetricsSnapshot, PipeSink, PipeSinkConfig, PipeSinkMetrics, PipeState};
use crate::common::PipeSinkError;

/// Build a batch of `count` records with recognizable, distinct bytes
fn make_records(count: usize, record_size: usize, seed: u8) -> Vec<u8> {
    let mut records = Vec::with_capacity(count * record_size);
    for i in 0..count {
        records.extend(std::iter::repeat(seed.wrapping_add(i as u8)).take(record_size));
    }
    records
}

// ============================================================================
// Metrics Tests
// ============================================================================

#[test]
fn test_metrics_new() {
    let metrics = PipeSinkMetrics::new();
    assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
}

#[test]
fn test_metrics_record_and_reset() {
    let metrics = PipeSinkMetrics::new();

    metrics.record_received();
    metrics.record_batch(10, 2, 640);
    metrics.record_error();
    metrics.record_flush();

    let s = metrics.snapshot();
    assert_eq!(s.batches_received, 1);
    assert_eq!(s.records_accepted, 10);
    assert_eq!(s.records_rejected, 2);
    assert_eq!(s.bytes_accepted, 640);
    assert_eq!(s.write_errors, 1);
    assert_eq!(s.flush_count, 1);

    metrics.reset();
    assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
}

// ============================================================================
// Construction Tests
// ============================================================================

#[test]
fn test_zero_record_size_is_rejected() {
    let err = PipeSink::new(PipeSinkConfig::new("cat > /dev/null", 0)).unwrap_err();
    assert!(matches!(err, PipeSinkError::Config(_)));
}

#[test]
fn test_config_builders() {
    let config = PipeSinkConfig::new("cat", 16)
        .with_id("archive")
        .with_buffer_size(4096)
        .with_unbuffered(true);

    assert_eq!(config.id, "archive");
    assert_eq!(config.command, "cat");
    assert_eq!(config.record_size, 16);
    assert_eq!(config.buffer_size, 4096);
    assert!(config.unbuffered);
}

#[test]
fn test_create_and_process_survives() {
    let mut sink = PipeSink::new(PipeSinkConfig::new("cat > /dev/null", 32)).unwrap();
    assert_eq!(sink.state(), PipeState::Running);
    assert_eq!(sink.name(), "pipe");

    let records = make_records(16, 32, 1);
    assert_eq!(sink.process(&records).unwrap(), 16);
}

// ============================================================================
// Round-Trip Tests
// ============================================================================

#[test]
fn test_roundtrip_bytes_reach_child_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("capture.bin");
    let command = format!("cat > '{}'", path.display());

    let config = PipeSinkConfig::new(command, 64).with_unbuffered(true);
    let mut sink = PipeSink::new(config).unwrap();

    let mut expected = Vec::new();
    for seed in [0x10, 0x40, 0x90] {
        let batch = make_records(8, 64, seed);
        assert_eq!(sink.process(&batch).unwrap(), 8);
        expected.extend_from_slice(&batch);
    }

    assert_eq!(sink.shutdown(), ExitOutcome::Exited(0));
    assert_eq!(fs::read(&path).unwrap(), expected);
}

#[test]
fn test_unbuffered_toggle_preserves_stream() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("capture.bin");
    let command = format!("cat > '{}'", path.display());

    let mut sink = PipeSink::new(PipeSinkConfig::new(command, 16)).unwrap();
    assert!(!sink.unbuffered());

    let mut expected = Vec::new();

    let batch = make_records(4, 16, 0x01);
    sink.process(&batch).unwrap();
    expected.extend_from_slice(&batch);

    sink.set_unbuffered(true);
    assert!(sink.unbuffered());
    let batch = make_records(4, 16, 0x51);
    sink.process(&batch).unwrap();
    expected.extend_from_slice(&batch);

    sink.set_unbuffered(false);
    let batch = make_records(4, 16, 0xA1);
    sink.process(&batch).unwrap();
    expected.extend_from_slice(&batch);

    // Teardown drains whatever is still staged before the child sees EOF.
    assert_eq!(sink.shutdown(), ExitOutcome::Exited(0));
    assert_eq!(fs::read(&path).unwrap(), expected);
}

// ============================================================================
// Failure-Path Tests
// ============================================================================

#[test]
fn test_dead_child_surfaces_write_error() {
    let config = PipeSinkConfig::new("true", 64).with_unbuffered(true);
    let mut sink = PipeSink::new(config).unwrap();

    let records = make_records(4, 64, 0);
    let deadline = Instant::now() + Duration::from_secs(10);

    // The first writes can land in the pipe buffer before the child exits;
    // once it is gone the write must fail rather than misbehave.
    let err = loop {
        match sink.process(&records) {
            Ok(_) => {
                assert!(
                    Instant::now() < deadline,
                    "never observed a write failure against an exited child"
                );
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => break e,
        }
    };

    assert!(matches!(err, PipeSinkError::Write(_)));
    assert!(!err.is_recoverable());
    assert!(sink.metrics().snapshot().write_errors >= 1);
}

#[test]
fn test_shutdown_reports_child_exit_code() {
    let mut sink = PipeSink::new(PipeSinkConfig::new("cat > /dev/null; exit 7", 8)).unwrap();
    sink.process(&make_records(2, 8, 0)).unwrap();

    assert_eq!(sink.shutdown(), ExitOutcome::Exited(7));
}

#[test]
fn test_misaligned_batch_is_rejected_without_breaking_the_sink() {
    let mut sink = PipeSink::new(PipeSinkConfig::new("cat > /dev/null", 8)).unwrap();

    let err = sink.process(&[0u8; 10]).unwrap_err();
    assert!(matches!(
        err,
        PipeSinkError::MisalignedBatch {
            len: 10,
            record_size: 8
        }
    ));
    assert!(err.is_recoverable());

    // The stream is untouched; aligned batches still go through.
    assert_eq!(sink.process(&[0u8; 16]).unwrap(), 2);
}

#[test]
fn test_empty_batch_is_a_noop() {
    let mut sink = PipeSink::new(PipeSinkConfig::new("cat > /dev/null", 8)).unwrap();
    assert_eq!(sink.process(&[]).unwrap(), 0);
}

// ============================================================================
// Backpressure Tests
// ============================================================================

#[test]
fn test_partial_acceptance_then_recovery_once_child_drains() {
    let record_size = 1024;
    let config = PipeSinkConfig::new("sleep 1; cat > /dev/null", record_size)
        .with_buffer_size(2 * record_size);
    let mut sink = PipeSink::new(config).unwrap();

    let data = make_records(256, record_size, 0);

    // While the child sleeps, the pipe and staging buffers fill up and the
    // tail of the batch is rejected.
    let first = sink.process(&data).unwrap();
    assert!(first < 256, "a never-reading child must cause rejection");

    // Retry the remainder until the child starts draining.
    let mut offset = first * record_size;
    let deadline = Instant::now() + Duration::from_secs(30);
    while offset < data.len() {
        let accepted = sink.process(&data[offset..]).unwrap();
        offset += accepted * record_size;
        if accepted == 0 {
            assert!(Instant::now() < deadline, "remainder was never accepted");
            thread::sleep(Duration::from_millis(50));
        }
    }

    let s = sink.metrics().snapshot();
    assert_eq!(s.records_accepted, 256);
    assert!(s.records_rejected > 0);

    assert_eq!(sink.shutdown(), ExitOutcome::Exited(0));
}

// ============================================================================
// Flush and Metrics Integration
// ============================================================================

#[test]
fn test_flush_pushes_staged_bytes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("capture.bin");
    let command = format!("cat > '{}'", path.display());

    let mut sink = PipeSink::new(PipeSinkConfig::new(command, 32)).unwrap();

    let batch = make_records(4, 32, 0x11);
    sink.process(&batch).unwrap();
    sink.flush().unwrap();
    assert_eq!(sink.pending(), 0);
    assert_eq!(sink.metrics().snapshot().flush_count, 1);

    assert_eq!(sink.shutdown(), ExitOutcome::Exited(0));
    assert_eq!(fs::read(&path).unwrap(), batch);
}

#[test]
fn test_metrics_track_accepted_records() {
    let mut sink = PipeSink::new(PipeSinkConfig::new("cat > /dev/null", 16)).unwrap();

    sink.process(&make_records(3, 16, 0)).unwrap();
    sink.process(&make_records(5, 16, 0)).unwrap();

    let s = sink.metrics().snapshot();
    assert_eq!(s.batches_received, 2);
    assert_eq!(s.records_accepted, 8);
    assert_eq!(s.bytes_accepted, 128);
    assert_eq!(s.write_errors, 0);
}
