// src/scheduler/mod.rs
//! Splitting a parameter list across workers and remote output capacity.

pub mod worker;

use std::sync::Arc;

use crate::error::ExtractError;
use crate::period::ReferencePeriod;
use crate::schema::ImportSchema;

pub use worker::{JobDistributionScheduler, WorkerOutcome, WorkerReport};

/// Concurrent sessions the remote host allows one user.
pub const MAX_WORKERS: usize = 6;

/// Everything one worker needs to submit its share of the parameters.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub schema: Arc<ImportSchema>,
    pub period: ReferencePeriod,
    pub batch: Vec<String>,
    pub worker_index: usize,
    pub max_batch_size: usize,
}

impl WorkItem {
    /// Remote session this worker attaches to.
    pub fn session_number(&self) -> u32 {
        self.worker_index as u32 + 1
    }

    /// Sequential submission units, each at most `max_batch_size` long.
    pub fn sub_batches(&self) -> impl Iterator<Item = &[String]> {
        self.batch.chunks(self.max_batch_size.max(1))
    }
}

/// Result units each worker may produce out of the shared capacity.
pub fn per_worker_capacity(
    shared_capacity: usize,
    worker_count: usize,
) -> Result<usize, ExtractError> {
    check_worker_count(worker_count)?;
    match shared_capacity / worker_count {
        0 => Err(ExtractError::config(format!(
            "shared capacity {shared_capacity} leaves nothing for {worker_count} workers"
        ))),
        capacity => Ok(capacity),
    }
}

fn check_worker_count(worker_count: usize) -> Result<(), ExtractError> {
    if (1..=MAX_WORKERS).contains(&worker_count) {
        Ok(())
    } else {
        Err(ExtractError::config(format!(
            "worker count {worker_count} outside 1..={MAX_WORKERS}"
        )))
    }
}

/// Contiguous, near-equal partitions; the first `len % parts` get one extra.
pub fn partition<T>(items: &[T], parts: usize) -> Vec<&[T]> {
    if parts == 0 {
        return Vec::new();
    }
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        out.push(&items[start..start + len]);
        start += len;
    }
    out
}

/// Largest sub-batch that keeps a partition within `capacity` submissions.
pub fn max_batch_size(partition_len: usize, capacity: usize) -> usize {
    partition_len.div_ceil(capacity.max(1)).max(1)
}

/// Assign every parameter to exactly one worker. Returns one item per
/// worker, including workers whose partition is empty.
pub fn distribute(
    parameters: &[String],
    worker_count: usize,
    shared_capacity: usize,
    schema: Arc<ImportSchema>,
    period: &ReferencePeriod,
) -> Result<Vec<WorkItem>, ExtractError> {
    let capacity = per_worker_capacity(shared_capacity, worker_count)?;

    Ok(partition(parameters, worker_count)
        .into_iter()
        .enumerate()
        .map(|(worker_index, part)| WorkItem {
            schema: schema.clone(),
            period: period.clone(),
            batch: part.to_vec(),
            worker_index,
            max_batch_size: max_batch_size(part.len(), capacity),
        })
        .collect())
}
