//! Tests for batch module

use super::*;
use crate::config::Channel;
use crate::cursor::ChangeRow;
use crate::types::{BatchAlgorithm, DataId, EventType};
use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn row(id: DataId) -> ChangeRow {
    ChangeRow::new(id, "default", "orders", EventType::Insert, Utc::now())
}

fn limits(max_rows: usize, algorithm: BatchAlgorithm) -> BatchLimits {
    BatchLimits {
        max_rows,
        max_bytes: None,
        max_age: None,
        algorithm,
    }
}

fn accumulator(limits: BatchLimits) -> BatchAccumulator {
    BatchAccumulator::new("default", limits, Arc::new(BatchSequence::default()))
}

// ============================================================================
// Sequence Tests
// ============================================================================

#[test]
fn test_sequence_starts_after_seed() {
    let sequence = BatchSequence::starting_after(41);
    assert_eq!(sequence.next_id(), 42);
    assert_eq!(sequence.next_id(), 43);
    assert_eq!(sequence.current(), 43);
}

#[test]
fn test_limits_from_channel() {
    let channel = Channel::new("default")
        .with_max_batch_size(0)
        .with_max_batch_bytes(1024)
        .with_batch_algorithm(BatchAlgorithm::Transactional);
    let limits = BatchLimits::from_channel(&channel);
    assert_eq!(limits.max_rows, 1);
    assert_eq!(limits.max_bytes, Some(1024));
    assert_eq!(limits.max_age, None);
    assert_eq!(limits.algorithm, BatchAlgorithm::Transactional);
}

// ============================================================================
// Accumulator Tests
// ============================================================================

#[test]
fn test_one_batch_per_node() {
    let mut acc = accumulator(limits(10, BatchAlgorithm::Default));
    for id in 1..=3 {
        assert!(acc.offer(&row(id), "001", true).is_none());
        assert!(acc.offer(&row(id), "002", true).is_none());
    }
    assert_eq!(acc.open_count(), 2);

    let batches = acc.finish();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].node_id, "001");
    assert_eq!(batches[0].data_ids, vec![1, 2, 3]);
    assert_eq!(batches[1].node_id, "002");
    assert_ne!(batches[0].batch_id, batches[1].batch_id);
    assert!(batches.iter().all(|b| b.status == BatchStatus::Routing));
}

#[test]
fn test_default_closes_at_limit_on_boundary() {
    let mut acc = accumulator(limits(2, BatchAlgorithm::Default));
    assert!(acc.offer(&row(1), "001", false).is_none());
    // limit reached mid-transaction
    assert!(acc.offer(&row(2), "001", false).is_none());
    let closed = acc.offer(&row(3), "001", true).unwrap();
    assert_eq!(closed.data_ids, vec![1, 2, 3]);
    assert_eq!(acc.open_count(), 0);
    assert_eq!(acc.closed_count(), 1);

    assert!(acc.offer(&row(4), "001", true).is_none());
    let rest = acc.finish();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].data_ids, vec![4]);
    assert!(rest[0].batch_id > closed.batch_id);
}

#[test]
fn test_transactional_closes_every_boundary() {
    let mut acc = accumulator(limits(100, BatchAlgorithm::Transactional));
    assert!(acc.offer(&row(1), "001", false).is_none());
    assert_eq!(acc.offer(&row(2), "001", true).unwrap().data_ids, vec![1, 2]);
    assert_eq!(acc.offer(&row(3), "001", true).unwrap().data_ids, vec![3]);
}

#[test]
fn test_nontransactional_ignores_boundaries() {
    let mut acc = accumulator(limits(2, BatchAlgorithm::Nontransactional));
    assert!(acc.offer(&row(1), "001", false).is_none());
    assert_eq!(acc.offer(&row(2), "001", false).unwrap().data_ids, vec![1, 2]);
}

#[test]
fn test_byte_limit() {
    let mut limits = limits(1000, BatchAlgorithm::Default);
    limits.max_bytes = Some(row(1).approximate_size() * 2);
    let mut acc = accumulator(limits);
    assert!(acc.offer(&row(1), "001", true).is_none());
    assert_eq!(acc.offer(&row(2), "001", true).unwrap().len(), 2);
}

#[test]
fn test_age_limit() {
    let mut limits = limits(1000, BatchAlgorithm::Default);
    limits.max_age = Some(Duration::ZERO);
    let mut acc = accumulator(limits);
    assert_eq!(acc.offer(&row(1), "001", true).unwrap().len(), 1);
}

#[test]
fn test_no_empty_batches() {
    let acc = accumulator(limits(10, BatchAlgorithm::Default));
    assert!(acc.finish().is_empty());
}

#[test]
fn test_shared_sequence_across_channels() {
    let sequence = Arc::new(BatchSequence::starting_after(10));
    let mut a = BatchAccumulator::new("a", limits(1, BatchAlgorithm::Default), sequence.clone());
    let mut b = BatchAccumulator::new("b", limits(1, BatchAlgorithm::Default), sequence.clone());
    let first = a.offer(&row(1), "001", true).unwrap();
    let second = b.offer(&row(1), "001", true).unwrap();
    assert_eq!((first.batch_id, second.batch_id), (11, 12));
    assert_eq!(sequence.current(), 12);
}

#[test]
fn test_batch_status_codes() {
    let mut batch = OutgoingBatch::new(1, "default", "001", Utc::now());
    assert!(batch.is_empty());
    batch.data_ids = vec![5, 9, 7];
    assert_eq!(batch.max_data_id(), Some(9));
    batch.mark_ready();
    assert_eq!(batch.status, BatchStatus::New);
    assert_eq!(BatchStatus::from_code(batch.status.code()), Some(BatchStatus::New));
}
