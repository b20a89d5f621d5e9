// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The chunked reconstruction scheduler.
//!
//! - [`planner`] splits the requested slices into tasks that fit the memory
//!   budgets, with filter-dependent margins.
//! - [`pipeline`] runs the enabled steps over one task.
//! - [`limited_memory`] streams a task that does not fit the device in two
//!   nested passes.
//! - [`runner`] walks a plan, reusing pipelines between tasks of equal height.

pub mod limited_memory;
pub mod margins;
pub mod pipeline;
pub mod planner;
pub mod runner;
mod steps;
mod task;

#[cfg(test)]
mod integration_tests;

pub use limited_memory::LimitedMemorySubchunker;
pub use margins::{filter_margin, paganin_margin, unsharp_margin};
pub use pipeline::{
    Backend, ChunkOutcome, ChunkedPipeline, HookContext, PipelineLayout, PostStepHook,
    StageShapes,
};
pub use planner::{tile_tasks, TaskPlan, VolumeTaskPlanner};
pub use runner::{ReconstructionSummary, VolumeReconstruction};
pub use steps::{Step, StepDomain, StepSet};
pub use task::{Margin, PipelineVariant, PlannedTask, Task};
