// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Two-pass streaming of a task that does not fit the device.
//!
//! Pass 1 streams groups of whole projections at the task's full height
//! through the projection-domain steps. The group size comes from the device
//! chunk expressed in projections: `floor(n_angles * chunk_size / delta_z)`.
//! Double flat-field needs every projection at once, so it runs on the host
//! between a flat-field group loop and a loop over the remaining steps.
//!
//! Pass 2 builds every sinogram on the host, then streams groups of
//! `chunk_size` sinograms through reconstruction, accumulating one partial
//! histogram per group. The partials are merged before the single write.

use ndarray::s;

use crate::config::consts::DEFAULT_HISTOGRAM_EDGE_TOLERANCE;
use crate::engine::pipeline::{check_shape, reconstruct_stack, working_pool, ChunkedPipeline};
use crate::engine::{Step, StepDomain};
use crate::errors::ReconError;
use crate::histogram::{merge_histograms, Histogram};
use crate::memory::{DeviceContext, RADIOS, RECS, SINOS};
use crate::observability::messages::pipeline::{RadiosCropped, SubchunkPassStarted};
use crate::observability::messages::StructuredLog;

const RADIOS_GROUP: &str = "radios_group";
const RADIOS_CROPPED: &str = "radios_cropped";
const SINOS_GROUP: &str = "sinos_group";
const RECS_GROUP: &str = "recs_group";

pub struct LimitedMemorySubchunker<'p> {
    pipeline: &'p mut ChunkedPipeline,
    chunk_size: usize,
    radios_group: usize,
}

impl<'p> LimitedMemorySubchunker<'p> {
    /// Number of whole projections of height `delta_z` that fit in
    /// `chunk_size` full-width rows.
    pub fn radios_group_size(
        n_angles: usize,
        chunk_size: usize,
        delta_z: usize,
    ) -> Result<usize, ReconError> {
        if delta_z <= chunk_size {
            return Err(ReconError::SubchunkingNotRequired {
                delta_z,
                chunk_size,
            });
        }
        let group = n_angles * chunk_size / delta_z;
        if group == 0 {
            return Err(ReconError::GroupSizeZero {
                chunk_size,
                delta_z,
                n_angles,
            });
        }
        Ok(group)
    }

    pub fn new(pipeline: &'p mut ChunkedPipeline) -> Result<Self, ReconError> {
        let chunk_size = pipeline.layout.device_chunk;
        let radios_group = Self::radios_group_size(
            pipeline.config.dataset.geometry().n_angles,
            chunk_size,
            pipeline.delta_z(),
        )?;
        Ok(Self {
            pipeline,
            chunk_size,
            radios_group,
        })
    }

    pub fn radios_group(&self) -> usize {
        self.radios_group
    }

    pub fn run(mut self, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        self.process_radios(ctx)?;
        self.process_sinos(ctx)?;
        if self.pipeline.config.steps.contains(Step::Write) {
            self.pipeline.execute_step(Step::Write, ctx)?;
        }
        Ok(())
    }

    fn process_radios(&mut self, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let p = &mut *self.pipeline;
        let radios = p.load_radios()?;
        p.host.store(RADIOS, radios)?;
        p.run_hook(Step::Read, ctx)?;

        let steps: Vec<Step> = p
            .config
            .steps
            .in_domain(StepDomain::Projection)
            .into_iter()
            .filter(|s| *s != Step::Read)
            .collect();
        let (before, after): (Vec<Step>, Vec<Step>) =
            steps.iter().copied().partition(|s| *s < Step::DoubleFlatfield);

        self.radios_groups(&before, ctx)?;
        if steps.contains(&Step::DoubleFlatfield) {
            self.host_double_flatfield()?;
        }
        self.radios_groups(
            &after
                .into_iter()
                .filter(|s| *s != Step::DoubleFlatfield)
                .collect::<Vec<_>>(),
            ctx,
        )?;

        let p = &mut *self.pipeline;
        if !p.state.cropped {
            p.state.cropped = true;
            let margin = p.task.margin;
            if margin.up > 0 || margin.down > 0 {
                p.host.crop_rows(RADIOS, p.task.inner_rows())?;
            }
        }
        working_pool(p.layout.backend, &mut p.host, ctx).release(RADIOS_GROUP);

        // hooks see the whole host stack, so they wait for the last group
        for step in steps {
            p.run_hook(step, ctx)?;
        }
        Ok(())
    }

    /// Streams the host radios through `steps`, one projection group at a
    /// time. If the crop step is among them, groups are cropped on the
    /// backend and copied back into a cropped host stack.
    fn radios_groups(&mut self, steps: &[Step], ctx: &mut DeviceContext) -> Result<(), ReconError> {
        if steps.is_empty() {
            return Ok(());
        }
        let group_size = self.radios_group;
        let p = &mut *self.pipeline;
        let n_angles = p.config.dataset.geometry().n_angles;
        let crop_step = p.config.steps.crop_step().filter(|c| steps.contains(c));
        let inner_rows = p.task.inner_rows();
        let margin = p.task.margin;
        let shapes = p.shapes();
        let expected: Vec<(Step, [usize; 3])> = steps
            .iter()
            .filter_map(|s| p.expected_input(*s).map(|(_, shape)| (*s, shape)))
            .collect();

        if crop_step.is_some() {
            p.host.acquire(RADIOS_CROPPED, shapes.cropped)?;
        }

        SubchunkPassStarted {
            pass: 1,
            groups: n_angles.div_ceil(group_size),
            group_size,
        }
        .log();

        for g0 in (0..n_angles).step_by(group_size) {
            let g1 = (g0 + group_size).min(n_angles);
            let group = p.host.view(RADIOS)?.slice(s![g0..g1, .., ..]).to_owned();
            let pool = working_pool(p.layout.backend, &mut p.host, ctx);
            pool.store(RADIOS_GROUP, group)?;

            for &(step, shape) in &expected {
                let actual = pool
                    .shape(RADIOS_GROUP)
                    .ok_or_else(|| ReconError::BufferNotFound(RADIOS_GROUP.to_string()))?;
                check_shape(step, [g1 - g0, shape[1], shape[2]], actual)?;
                let kernel = p
                    .kernels
                    .in_place_mut(step)
                    .ok_or(ReconError::MissingKernel(step))?;
                kernel
                    .apply(pool.view_mut(RADIOS_GROUP)?, g0..g1)
                    .map_err(|source| ReconError::Kernel { step, source })?;
                if crop_step == Some(step) && (margin.up > 0 || margin.down > 0) {
                    pool.crop_rows(RADIOS_GROUP, inner_rows.clone())?;
                }
            }

            let processed = pool.fetch(RADIOS_GROUP)?;
            let target = if crop_step.is_some() { RADIOS_CROPPED } else { RADIOS };
            p.host
                .view_mut(target)?
                .slice_mut(s![g0..g1, .., ..])
                .assign(&processed);
        }

        if crop_step.is_some() {
            let cropped = p.host.take(RADIOS_CROPPED)?;
            p.host.store(RADIOS, cropped)?;
            p.state.cropped = true;
            if margin.up > 0 || margin.down > 0 {
                RadiosCropped {
                    up: margin.up,
                    down: margin.down,
                    rows: inner_rows.len(),
                }
                .log();
            }
        }
        Ok(())
    }

    fn host_double_flatfield(&mut self) -> Result<(), ReconError> {
        let p = &mut *self.pipeline;
        let n_angles = p.config.dataset.geometry().n_angles;
        let step = Step::DoubleFlatfield;
        if let Some((_, expected)) = p.expected_input(step) {
            let actual = p
                .host
                .shape(RADIOS)
                .ok_or_else(|| ReconError::BufferNotFound(RADIOS.to_string()))?;
            check_shape(step, expected, actual)?;
        }
        let kernel = p
            .kernels
            .in_place_mut(step)
            .ok_or(ReconError::MissingKernel(step))?;
        kernel
            .apply(p.host.view_mut(RADIOS)?, 0..n_angles)
            .map_err(|source| ReconError::Kernel { step, source })
    }

    fn process_sinos(&mut self, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let p = &mut *self.pipeline;
        let n_angles = p.config.dataset.geometry().n_angles;
        let shapes = p.shapes();

        if p.config.steps.contains(Step::SinoNormalization) {
            let step = Step::SinoNormalization;
            let actual = p
                .host
                .shape(RADIOS)
                .ok_or_else(|| ReconError::BufferNotFound(RADIOS.to_string()))?;
            check_shape(step, shapes.cropped, actual)?;
            let kernel = p
                .kernels
                .in_place_mut(step)
                .ok_or(ReconError::MissingKernel(step))?;
            kernel
                .apply(p.host.view_mut(RADIOS)?.permuted_axes([1, 0, 2]), 0..n_angles)
                .map_err(|source| ReconError::Kernel { step, source })?;
            p.run_hook(step, ctx)?;
        }

        if !p.config.steps.contains(Step::BuildSino) {
            return Ok(());
        }
        let builder = p
            .sino_builder
            .as_ref()
            .ok_or(ReconError::MissingKernel(Step::BuildSino))?;
        p.host.acquire(SINOS, shapes.sinos)?;
        let (radios, sinos) = p.host.pair_mut(RADIOS, SINOS)?;
        builder.build_into(radios, sinos)?;
        p.host.release(RADIOS);
        p.run_hook(Step::BuildSino, ctx)?;

        if !p.config.steps.contains(Step::Reconstruction) {
            return Ok(());
        }
        let with_histogram = p.config.steps.contains(Step::Histogram);
        let n_recs = shapes.recs[0];
        let (ny, nx) = (shapes.recs[1], shapes.recs[2]);
        p.host.acquire(RECS, shapes.recs)?;

        SubchunkPassStarted {
            pass: 2,
            groups: n_recs.div_ceil(self.chunk_size),
            group_size: self.chunk_size,
        }
        .log();

        let mut partials: Vec<Histogram> = Vec::new();
        for r0 in (0..n_recs).step_by(self.chunk_size) {
            let r1 = (r0 + self.chunk_size).min(n_recs);
            let group = p.host.view(SINOS)?.slice(s![r0..r1, .., ..]).to_owned();
            let pool = working_pool(p.layout.backend, &mut p.host, ctx);
            pool.store(SINOS_GROUP, group)?;
            pool.acquire(RECS_GROUP, [r1 - r0, ny, nx])?;
            let (sinos, recs) = pool.pair_mut(SINOS_GROUP, RECS_GROUP)?;
            let reconstructor = p
                .kernels
                .reconstructor_mut()
                .ok_or(ReconError::MissingKernel(Step::Reconstruction))?;
            reconstruct_stack(reconstructor, sinos, recs)?;

            if with_histogram {
                let kernel = p
                    .kernels
                    .histogram_mut()
                    .ok_or(ReconError::MissingKernel(Step::Histogram))?;
                let partial = kernel
                    .compute(pool.view(RECS_GROUP)?)
                    .map_err(|source| ReconError::Kernel {
                        step: Step::Histogram,
                        source,
                    })?;
                partials.push(partial);
            }

            let slices = pool.fetch(RECS_GROUP)?;
            pool.release(SINOS_GROUP);
            p.host
                .view_mut(RECS)?
                .slice_mut(s![r0..r1, .., ..])
                .assign(&slices);
        }
        working_pool(p.layout.backend, &mut p.host, ctx).release(RECS_GROUP);
        p.host.release(SINOS);
        p.run_hook(Step::Reconstruction, ctx)?;

        if with_histogram {
            let tolerance = p
                .config
                .histogram
                .as_ref()
                .map_or(DEFAULT_HISTOGRAM_EDGE_TOLERANCE, |h| h.edge_tolerance);
            p.state.histogram = Some(merge_histograms(&partials, tolerance)?);
            p.run_hook(Step::Histogram, ctx)?;
        }
        Ok(())
    }
}
