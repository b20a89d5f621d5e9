// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::ReconError;
use crate::memory::{BufferPool, MemoryBudget};
use crate::observability::messages::{memory::BuffersReleased, StructuredLog};

/// Proof that a pipeline holds the device. Consumed by
/// [`DeviceContext::relinquish`].
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceClaim {
    owner: u64,
}

impl DeviceClaim {
    pub fn owner(&self) -> u64 {
        self.owner
    }
}

/// The accelerator as seen by the scheduler: its memory pool and which
/// pipeline currently owns it.
///
/// Only one pipeline may hold the device at a time. The context is passed
/// explicitly by `&mut` so ownership transfer between consecutive pipelines
/// is visible in the call graph.
#[derive(Debug)]
pub struct DeviceContext {
    pool: BufferPool,
    owner: Option<u64>,
    next_owner: u64,
}

impl DeviceContext {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            pool: BufferPool::device(capacity_bytes),
            owner: None,
            next_owner: 1,
        }
    }

    /// A device whose pool capacity is the full available memory; the
    /// planning fraction is applied by the estimator, not the allocator.
    pub fn from_budget(budget: &MemoryBudget) -> Self {
        Self::new(budget.available_bytes)
    }

    pub fn claim(&mut self) -> Result<DeviceClaim, ReconError> {
        if let Some(owner) = self.owner {
            return Err(ReconError::DeviceBusy { owner });
        }
        let owner = self.next_owner;
        self.next_owner += 1;
        self.owner = Some(owner);
        Ok(DeviceClaim { owner })
    }

    /// Releases every device buffer and hands the device back.
    pub fn relinquish(&mut self, claim: DeviceClaim) {
        let (buffers, bytes) = self.pool.release_all();
        BuffersReleased {
            pool: self.pool.kind().name(),
            owner: claim.owner,
            buffers,
            bytes,
        }
        .log();
        if self.owner == Some(claim.owner) {
            self.owner = None;
        }
    }

    pub fn owner(&self) -> Option<u64> {
        self.owner
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }
}
