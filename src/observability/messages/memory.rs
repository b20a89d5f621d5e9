// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for memory estimation and buffer pool events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// The estimator settled on a chunk size for one memory budget.
///
/// # Log Level
/// `info!` - Drives the whole task plan
///
/// # Example
/// ```
/// use chunked_tomo::observability::messages::memory::ChunkSizeEstimated;
///
/// let msg = ChunkSizeEstimated {
///     device: "device",
///     budget_bytes: 8_000_000_000,
///     chunk_size: 300,
///     required_bytes: 7_900_000_000,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct ChunkSizeEstimated {
    pub device: &'static str,
    pub budget_bytes: u64,
    pub chunk_size: usize,
    pub required_bytes: u64,
}

impl Display for ChunkSizeEstimated {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Estimated {} chunk size: {} rows ({} of {} bytes)",
            self.device, self.chunk_size, self.required_bytes, self.budget_bytes
        )
    }
}

impl StructuredLog for ChunkSizeEstimated {
    fn log(&self) {
        tracing::info!(
            device = self.device,
            budget_bytes = self.budget_bytes,
            chunk_size = self.chunk_size,
            required_bytes = self.required_bytes,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "chunk_size_estimated",
            span_name = name,
            device = self.device,
            chunk_size = self.chunk_size,
        )
    }
}

/// A pool allocated a buffer.
///
/// # Log Level
/// `debug!` - Buffer traffic
pub struct BufferAllocated<'a> {
    pub pool: &'static str,
    pub buffer: &'a str,
    pub bytes: u64,
    pub used_bytes: u64,
}

impl Display for BufferAllocated<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Allocated {} buffer '{}': {} bytes ({} in use)",
            self.pool, self.buffer, self.bytes, self.used_bytes
        )
    }
}

impl StructuredLog for BufferAllocated<'_> {
    fn log(&self) {
        tracing::debug!(
            pool = self.pool,
            buffer = self.buffer,
            bytes = self.bytes,
            used_bytes = self.used_bytes,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "buffer_allocated",
            span_name = name,
            pool = self.pool,
            buffer = self.buffer,
        )
    }
}

/// A pipeline handed the device back and its buffers were freed.
///
/// # Log Level
/// `debug!` - Buffer traffic
pub struct BuffersReleased {
    pub pool: &'static str,
    pub owner: u64,
    pub buffers: usize,
    pub bytes: u64,
}

impl Display for BuffersReleased {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Pipeline {} released {} {} buffers ({} bytes)",
            self.owner, self.buffers, self.pool, self.bytes
        )
    }
}

impl StructuredLog for BuffersReleased {
    fn log(&self) {
        tracing::debug!(
            pool = self.pool,
            owner = self.owner,
            buffers = self.buffers,
            bytes = self.bytes,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "buffers_released",
            span_name = name,
            owner = self.owner,
            bytes = self.bytes,
        )
    }
}
