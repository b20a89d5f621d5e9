// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Runtime errors raised while planning and executing a reconstruction.
//!
//! Every variant belongs to one of four families (see [`ErrorKind`]). None of
//! them is retried: chunk sizing exists to prevent capacity and resource
//! failures by construction, so when one surfaces the whole job aborts.

use thiserror::Error;

use crate::engine::Step;
use crate::errors::ValidationError;
use crate::histogram::HistogramError;
use crate::sino::HalftomoError;

/// Error family, used by callers to decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised before any task executes.
    Configuration,
    /// The memory budgets cannot accommodate the job as configured.
    Capacity,
    /// Collaborators disagree on shapes or contracts; internal inconsistency.
    Contract,
    /// The accelerator or a collaborator ran out of a resource.
    Resource,
}

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Configuration validation failed:\n{}", join_errors(.0))]
    InvalidConfiguration(Vec<ValidationError>),

    #[error("Invalid task [{z_start}, {z_end}) with an upper margin of {margin_up} rows")]
    InvalidTask {
        z_start: usize,
        z_end: usize,
        margin_up: usize,
    },

    #[error("Step '{0}' is enabled but no kernel was supplied for it")]
    MissingKernel(Step),

    #[error("Cannot register a hook for step '{0}': the step is not enabled")]
    HookOnDisabledStep(Step),

    #[error(
        "The {device} memory budget of {budget_bytes} bytes cannot hold a single chunk: {required_bytes} bytes are needed for {rows} rows"
    )]
    ChunkSizeZero {
        device: &'static str,
        budget_bytes: u64,
        required_bytes: u64,
        rows: usize,
    },

    #[error("A margin of {margin} rows does not fit in a device chunk of {chunk_size} rows")]
    MarginTooLarge { margin: usize, chunk_size: usize },

    #[error(
        "Device chunk of {chunk_size} rows is too small to split {n_angles} projections of a {delta_z}-row task into groups"
    )]
    GroupSizeZero {
        chunk_size: usize,
        delta_z: usize,
        n_angles: usize,
    },

    #[error("Shape mismatch at step '{step}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        step: Step,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(
        "Pipeline was built for delta_z = {expected} but the sub-region has delta_z = {actual}"
    )]
    SubRegionHeightMismatch { expected: usize, actual: usize },

    #[error("Task of height {delta_z} fits a device chunk of {chunk_size} rows; the limited-memory variant is not needed")]
    SubchunkingNotRequired { delta_z: usize, chunk_size: usize },

    #[error("Buffer '{0}' is not allocated")]
    BufferNotFound(String),

    #[error(
        "Out of {pool} memory allocating '{buffer}': {requested_bytes} bytes requested, {used_bytes} of {capacity_bytes} bytes in use"
    )]
    OutOfMemory {
        pool: &'static str,
        buffer: String,
        requested_bytes: u64,
        used_bytes: u64,
        capacity_bytes: u64,
    },

    #[error("Device context is held by pipeline {owner}")]
    DeviceBusy { owner: u64 },

    #[error("Kernel for step '{step}' failed: {source}")]
    Kernel {
        step: Step,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} failed: {source}")]
    Collaborator {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Halftomo(#[from] HalftomoError),

    #[error(transparent)]
    Histogram(#[from] HistogramError),
}

impl ReconError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconError::InvalidConfiguration(_)
            | ReconError::InvalidTask { .. }
            | ReconError::MissingKernel(_)
            | ReconError::HookOnDisabledStep(_) => ErrorKind::Configuration,
            ReconError::ChunkSizeZero { .. }
            | ReconError::MarginTooLarge { .. }
            | ReconError::GroupSizeZero { .. } => ErrorKind::Capacity,
            ReconError::ShapeMismatch { .. }
            | ReconError::SubRegionHeightMismatch { .. }
            | ReconError::SubchunkingNotRequired { .. }
            | ReconError::BufferNotFound(_)
            | ReconError::Histogram(_) => ErrorKind::Contract,
            ReconError::Halftomo(_) => ErrorKind::Configuration,
            ReconError::OutOfMemory { .. }
            | ReconError::DeviceBusy { .. }
            | ReconError::Kernel { .. }
            | ReconError::Collaborator { .. } => ErrorKind::Resource,
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
