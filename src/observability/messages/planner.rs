// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for task planning and pipeline lifecycle events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// The planner produced its task list.
///
/// # Log Level
/// `info!` - Plan lifecycle
///
/// # Example
/// ```
/// use chunked_tomo::observability::messages::planner::TaskPlanComputed;
///
/// let msg = TaskPlanComputed {
///     n_tasks: 4,
///     margin: 20,
///     gpu_max_chunk: 300,
///     cpu_max_chunk: 2000,
///     chunk_budget: 260,
///     variant: "full",
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct TaskPlanComputed {
    pub n_tasks: usize,
    pub margin: usize,
    pub gpu_max_chunk: usize,
    pub cpu_max_chunk: usize,
    pub chunk_budget: usize,
    pub variant: &'static str,
}

impl Display for TaskPlanComputed {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Planned {} tasks of up to {} slices (margin {}, device chunk {}, host chunk {}, {} pipeline)",
            self.n_tasks,
            self.chunk_budget,
            self.margin,
            self.gpu_max_chunk,
            self.cpu_max_chunk,
            self.variant
        )
    }
}

impl StructuredLog for TaskPlanComputed {
    fn log(&self) {
        tracing::info!(
            n_tasks = self.n_tasks,
            margin = self.margin,
            gpu_max_chunk = self.gpu_max_chunk,
            cpu_max_chunk = self.cpu_max_chunk,
            chunk_budget = self.chunk_budget,
            variant = self.variant,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "task_plan",
            span_name = name,
            n_tasks = self.n_tasks,
            margin = self.margin,
            variant = self.variant,
        )
    }
}

/// The margin did not fit in a device chunk and a fallback was applied.
///
/// # Log Level
/// `warn!` - Results may lose accuracy near task boundaries
pub struct MarginFallbackApplied {
    pub policy: &'static str,
    pub margin: usize,
    pub gpu_max_chunk: usize,
}

impl Display for MarginFallbackApplied {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Margin of {} rows does not fit in a device chunk of {} rows; applying '{}' fallback",
            self.margin, self.gpu_max_chunk, self.policy
        )
    }
}

impl StructuredLog for MarginFallbackApplied {
    fn log(&self) {
        tracing::warn!(
            policy = self.policy,
            margin = self.margin,
            gpu_max_chunk = self.gpu_max_chunk,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "margin_fallback",
            span_name = name,
            policy = self.policy,
            margin = self.margin,
        )
    }
}

/// A chunk size override exceeds what the estimator considers safe.
///
/// # Log Level
/// `warn!` - The job may run out of device memory
pub struct ChunkSizeOverridden {
    pub requested: usize,
    pub estimated: usize,
}

impl Display for ChunkSizeOverridden {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Using chunk size {} although only {} rows are estimated to fit",
            self.requested, self.estimated
        )
    }
}

impl StructuredLog for ChunkSizeOverridden {
    fn log(&self) {
        tracing::warn!(
            requested = self.requested,
            estimated = self.estimated,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "chunk_size_overridden",
            span_name = name,
            requested = self.requested,
            estimated = self.estimated,
        )
    }
}

/// A pipeline instance was built for a new task height.
///
/// # Log Level
/// `info!` - Pipeline lifecycle
pub struct PipelineCreated {
    pub delta_z: usize,
    pub variant: &'static str,
    pub backend: &'static str,
}

impl Display for PipelineCreated {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Creating {} {} pipeline for delta_z = {}",
            self.variant, self.backend, self.delta_z
        )
    }
}

impl StructuredLog for PipelineCreated {
    fn log(&self) {
        tracing::info!(
            delta_z = self.delta_z,
            variant = self.variant,
            backend = self.backend,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "pipeline",
            span_name = name,
            delta_z = self.delta_z,
            variant = self.variant,
        )
    }
}

/// The active pipeline was moved to the next sub-region.
///
/// # Log Level
/// `debug!` - Lifecycle detail
pub struct PipelineReused {
    pub delta_z: usize,
    pub z_start: usize,
}

impl Display for PipelineReused {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Reusing pipeline (delta_z = {}) from slice {}",
            self.delta_z, self.z_start
        )
    }
}

impl StructuredLog for PipelineReused {
    fn log(&self) {
        tracing::debug!(delta_z = self.delta_z, z_start = self.z_start, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "pipeline_reused",
            span_name = name,
            delta_z = self.delta_z,
            z_start = self.z_start,
        )
    }
}

/// # Log Level
/// `info!` - Task lifecycle
pub struct TaskStarted {
    /// Zero-based position in the plan
    pub index: usize,
    pub total: usize,
    pub z_start: usize,
    pub z_end: usize,
    pub delta_z: usize,
}

impl Display for TaskStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Task {}/{}: slices [{}, {}), {} rows loaded",
            self.index + 1,
            self.total,
            self.z_start,
            self.z_end,
            self.delta_z
        )
    }
}

impl StructuredLog for TaskStarted {
    fn log(&self) {
        tracing::info!(
            index = self.index,
            total = self.total,
            z_start = self.z_start,
            z_end = self.z_end,
            delta_z = self.delta_z,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "task",
            span_name = name,
            index = self.index,
            z_start = self.z_start,
            z_end = self.z_end,
        )
    }
}

/// # Log Level
/// `info!` - Task lifecycle
pub struct TaskCompleted {
    pub index: usize,
    pub n_slices: usize,
    pub duration: Duration,
}

impl Display for TaskCompleted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Task {} completed: {} slices in {:?}",
            self.index + 1,
            self.n_slices,
            self.duration
        )
    }
}

impl StructuredLog for TaskCompleted {
    fn log(&self) {
        tracing::info!(
            index = self.index,
            n_slices = self.n_slices,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "task_completed",
            span_name = name,
            index = self.index,
            duration = ?self.duration,
        )
    }
}

/// # Log Level
/// `error!` - The job aborts
pub struct TaskFailed<'a> {
    pub index: usize,
    pub error: &'a dyn std::error::Error,
}

impl Display for TaskFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Task {} failed: {}", self.index + 1, self.error)
    }
}

impl StructuredLog for TaskFailed<'_> {
    fn log(&self) {
        tracing::error!(index = self.index, error = %self.error, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "task_failed",
            span_name = name,
            index = self.index,
            error = %self.error,
        )
    }
}
