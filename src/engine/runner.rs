// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Driving a whole job: plan, then one pipeline per run of equally-sized tasks.

use std::time::Instant;

use serde::Serialize;

use crate::config::consts::DEFAULT_HISTOGRAM_EDGE_TOLERANCE;
use crate::config::{validate_config, ReconstructionConfig};
use crate::engine::pipeline::{Backend, ChunkOutcome, ChunkedPipeline, PipelineLayout};
use crate::engine::planner::{TaskPlan, VolumeTaskPlanner};
use crate::engine::PlannedTask;
use crate::errors::ReconError;
use crate::histogram::Histogram;
use crate::memory::DeviceContext;
use crate::observability::messages::planner::{
    PipelineReused, TaskCompleted, TaskFailed, TaskStarted,
};
use crate::observability::messages::StructuredLog;
use crate::traits::KernelSet;

/// What a finished job produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReconstructionSummary {
    pub chunks: Vec<ChunkOutcome>,
    /// Histogram of the whole reconstructed range
    pub histogram: Option<Histogram>,
    pub pipelines_created: usize,
    pub plan: TaskPlan,
    /// File prefix of the first written task, kept across pipeline rebuilds
    pub first_file_prefix: Option<String>,
}

/// A validated job, ready to run.
///
/// Tasks run strictly in plan order. Consecutive tasks with the same height
/// and variant share one pipeline, which is moved between sub-regions;
/// otherwise the active pipeline is torn down, releasing every device
/// buffer, before the next is built.
pub struct VolumeReconstruction {
    config: ReconstructionConfig,
    kernels: KernelSet,
    backend: Backend,
}

impl VolumeReconstruction {
    pub fn new(
        config: ReconstructionConfig,
        kernels: KernelSet,
        backend: Backend,
    ) -> Result<Self, ReconError> {
        validate_config(&config).map_err(ReconError::InvalidConfiguration)?;
        Ok(Self {
            config,
            kernels,
            backend,
        })
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    pub fn plan(&self) -> Result<TaskPlan, ReconError> {
        VolumeTaskPlanner::new(&self.config).plan()
    }

    pub fn run(self, ctx: &mut DeviceContext) -> Result<ReconstructionSummary, ReconError> {
        let plan = self.plan()?;
        let Self {
            config,
            mut kernels,
            backend,
        } = self;

        let total = plan.len();
        let mut active: Option<ChunkedPipeline> = None;
        let mut chunks = Vec::with_capacity(total);
        let mut pipelines_created = 0;
        let mut first_file_prefix: Option<String> = None;

        for (index, planned) in plan.tasks.iter().enumerate() {
            let PlannedTask { task, variant } = *planned;
            let start_msg = TaskStarted {
                index,
                total,
                z_start: task.z_start(),
                z_end: task.z_end(),
                delta_z: task.delta_z(),
            };
            start_msg.log();
            let span = start_msg.span("process_task");
            let _guard = span.enter();
            let started = Instant::now();

            let reusable = active
                .as_ref()
                .is_some_and(|p| p.delta_z() == task.delta_z() && p.variant() == variant);
            let result = if reusable {
                match active.as_mut() {
                    Some(pipeline) => pipeline.set_subregion(task).map(|()| {
                        PipelineReused {
                            delta_z: task.delta_z(),
                            z_start: task.z_start(),
                        }
                        .log();
                    }),
                    None => Ok(()),
                }
            } else {
                if let Some(previous) = active.take() {
                    kernels = previous.teardown(ctx);
                }
                let layout = PipelineLayout {
                    backend,
                    variant,
                    device_chunk: plan.gpu_max_chunk,
                };
                ChunkedPipeline::new(config.clone(), task, std::mem::take(&mut kernels), layout, ctx)
                    .map(|pipeline| {
                        pipelines_created += 1;
                        active = Some(pipeline);
                    })
            };

            let outcome = result.and_then(|()| match active.as_mut() {
                Some(pipeline) => pipeline.process_chunk(ctx),
                None => Err(ReconError::BufferNotFound("active pipeline".to_string())),
            });

            match outcome {
                Ok(outcome) => {
                    TaskCompleted {
                        index,
                        n_slices: outcome.n_slices,
                        duration: started.elapsed(),
                    }
                    .log();
                    if first_file_prefix.is_none() && outcome.written.is_some() {
                        first_file_prefix = active.as_ref().map(|p| p.write_metadata().file_prefix);
                    }
                    chunks.push(outcome);
                }
                Err(error) => {
                    TaskFailed {
                        index,
                        error: &error,
                    }
                    .log();
                    if let Some(pipeline) = active.take() {
                        pipeline.teardown(ctx);
                    }
                    return Err(error);
                }
            }
        }

        if let Some(pipeline) = active.take() {
            pipeline.teardown(ctx);
        }

        let tolerance = config
            .histogram
            .as_ref()
            .map_or(DEFAULT_HISTOGRAM_EDGE_TOLERANCE, |h| h.edge_tolerance);
        let mut histogram: Option<Histogram> = None;
        for part in chunks.iter().filter_map(|c| c.histogram.as_ref()) {
            match histogram.as_mut() {
                Some(merged) => merged.merge(part, tolerance)?,
                None => histogram = Some(part.clone()),
            }
        }

        Ok(ReconstructionSummary {
            chunks,
            histogram,
            pipelines_created,
            plan,
            first_file_prefix,
        })
    }
}
