// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Splitting the requested z-range into tasks that fit in memory.
//!
//! Planning happens once per job:
//!
//! 1. The vertical margin is derived from the enabled filters (or taken from
//!    the configuration, or disabled).
//! 2. The estimator converts the device and host budgets into maximum chunk
//!    heights.
//! 3. If the margin cannot fit in a device chunk, the configured
//!    [`MarginFallback`] decides between the limited-memory variant, dropping
//!    the margin, or failing.
//! 4. The range `[z_min, z_max)` is tiled into windows of
//!    `chunk - 2 * margin` slices; each window's margins are clamped to the
//!    volume and the last window is shrunk to end exactly at `z_max`.

use serde::Serialize;

use crate::config::{MarginFallback, ReconstructionConfig};
use crate::engine::margins::filter_margin;
use crate::engine::{PipelineVariant, PlannedTask, Task};
use crate::errors::ReconError;
use crate::memory::MemoryEstimator;
use crate::observability::messages::planner::{
    ChunkSizeOverridden, MarginFallbackApplied, TaskPlanComputed,
};
use crate::observability::messages::StructuredLog;

/// Ordered list of tasks plus the sizing that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPlan {
    pub tasks: Vec<PlannedTask>,
    /// Vertical margin in rows, after any fallback
    pub margin: usize,
    pub gpu_max_chunk: usize,
    pub cpu_max_chunk: usize,
    /// Maximum slices per task
    pub chunk_budget: usize,
    /// `LimitedMemory` when at least one task needs it
    pub variant: PipelineVariant,
    /// Fallback applied because the margin did not fit, if any
    pub fallback: Option<MarginFallback>,
}

impl TaskPlan {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Tiles `[z_min, z_max)` into windows of at most `n_slices` slices.
pub fn tile_tasks(
    z_min: usize,
    z_max: usize,
    n_z: usize,
    margin: usize,
    n_slices: usize,
) -> Result<Vec<Task>, ReconError> {
    let n_slices = n_slices.max(1);
    let mut tasks = Vec::new();
    let mut start = z_min;
    while start < z_max {
        let end = (start + n_slices).min(z_max);
        tasks.push(Task::with_clamped_margin(start, end, margin, n_z)?);
        start = end;
    }
    Ok(tasks)
}

pub struct VolumeTaskPlanner<'a> {
    config: &'a ReconstructionConfig,
    estimator: MemoryEstimator,
}

impl<'a> VolumeTaskPlanner<'a> {
    pub fn new(config: &'a ReconstructionConfig) -> Self {
        Self {
            config,
            estimator: MemoryEstimator::from_config(config),
        }
    }

    pub fn estimator(&self) -> &MemoryEstimator {
        &self.estimator
    }

    /// Margin before any fallback.
    pub fn requested_margin(&self) -> usize {
        let res = &self.config.resources;
        if res.disable_margin {
            0
        } else {
            res.margin.unwrap_or_else(|| filter_margin(self.config))
        }
    }

    fn chunk_size(&self, device: &'static str, budget_bytes: u64) -> Result<usize, ReconError> {
        let rows = self.estimator.estimate(device, budget_bytes);
        if rows == 0 {
            let first = self.estimator.first_trial();
            return Err(ReconError::ChunkSizeZero {
                device,
                budget_bytes,
                required_bytes: self.estimator.required_memory(first),
                rows: first,
            });
        }
        Ok(rows)
    }

    pub fn plan(&self) -> Result<TaskPlan, ReconError> {
        let cfg = self.config;
        let res = &cfg.resources;
        let n_z = cfg.dataset.geometry().n_z;
        let (z_min, z_max) = cfg.reconstruction.z_range(n_z);
        let delta_z = z_max.saturating_sub(z_min);

        let estimated = self.chunk_size("device", res.device.budget_bytes())?;
        let gpu_max_chunk = match res.chunk_size {
            Some(requested) if requested > 0 => {
                if requested > estimated {
                    ChunkSizeOverridden {
                        requested,
                        estimated,
                    }
                    .log();
                }
                requested
            }
            _ => estimated,
        };
        let cpu_max_chunk = self.chunk_size("host", res.host.budget_bytes())?;

        let mut margin = self.requested_margin();
        let mut limited_memory = false;
        let mut fallback = None;

        // a single stage is expected, but loading the margins would split it
        let margins_split_stage = delta_z <= gpu_max_chunk
            && delta_z + margin.min(z_min) + margin.min(n_z.saturating_sub(z_max)) > gpu_max_chunk;
        if margin > 0 && (1 + 2 * margin > gpu_max_chunk || margins_split_stage) {
            let policy = res.on_insufficient_margin;
            match policy {
                MarginFallback::Fail => {
                    return Err(ReconError::MarginTooLarge {
                        margin,
                        chunk_size: gpu_max_chunk,
                    })
                }
                MarginFallback::DropMargin => {
                    MarginFallbackApplied {
                        policy: "drop_margin",
                        margin,
                        gpu_max_chunk,
                    }
                    .log();
                    margin = 0;
                }
                MarginFallback::LimitedMemory => {
                    MarginFallbackApplied {
                        policy: "limited_memory",
                        margin,
                        gpu_max_chunk,
                    }
                    .log();
                    limited_memory = true;
                }
            }
            fallback = Some(policy);
        }

        let stage_budget = if limited_memory {
            cpu_max_chunk
        } else {
            gpu_max_chunk
        };
        let chunk_budget = if delta_z + 2 * margin <= stage_budget {
            delta_z
        } else {
            stage_budget.saturating_sub(2 * margin).max(1)
        };

        let tasks: Vec<PlannedTask> = tile_tasks(z_min, z_max, n_z, margin, chunk_budget)?
            .into_iter()
            .map(|task| PlannedTask {
                task,
                variant: if task.delta_z() > gpu_max_chunk {
                    PipelineVariant::LimitedMemory
                } else {
                    PipelineVariant::Full
                },
            })
            .collect();

        let variant = if tasks
            .iter()
            .any(|t| t.variant == PipelineVariant::LimitedMemory)
        {
            PipelineVariant::LimitedMemory
        } else {
            PipelineVariant::Full
        };

        let plan = TaskPlan {
            tasks,
            margin,
            gpu_max_chunk,
            cpu_max_chunk,
            chunk_budget,
            variant,
            fallback,
        };
        TaskPlanComputed {
            n_tasks: plan.len(),
            margin,
            gpu_max_chunk,
            cpu_max_chunk,
            chunk_budget,
            variant: variant.name(),
        }
        .log();
        Ok(plan)
    }
}
