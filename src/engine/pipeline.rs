// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The per-task processing state machine.
//!
//! A [`ChunkedPipeline`] is built for one chunk height (`delta_z`) and walks
//! the enabled steps in their fixed order:
//!
//! ```text
//! read → flatfield → double_flatfield → ccd_correction → phase_retrieval
//!      → unsharp_mask → take_log → radios_movement → sino_normalization
//!      → build_sino → reconstruction → histogram → write
//! ```
//!
//! Two transitions are built in. After the last margin-consuming filter
//! (`unsharp_mask` if enabled, else `phase_retrieval`) the margin rows are
//! cropped away; the crop is idempotent and is also forced before the first
//! sinogram-domain step. After any step, the hook registered for it runs.
//! Device pipelines register a download hook on `reconstruction` so the
//! remaining steps read the slices from host memory.
//!
//! Every step checks the shape of its input buffer against the shape
//! computed when the pipeline was built and fails with
//! [`ReconError::ShapeMismatch`] on disagreement.

use std::time::Instant;

use ndarray::{ArrayView3, ArrayViewMut3, Axis};
use serde::Serialize;

use crate::config::{OutputScheme, ReconstructionConfig};
use crate::engine::limited_memory::LimitedMemorySubchunker;
use crate::engine::{PipelineVariant, Step, StepDomain, Task};
use crate::errors::{ReconError, ValidationError};
use crate::histogram::Histogram;
use crate::memory::{BufferPool, DeviceClaim, DeviceContext, RADIOS, RECS, SINOS};
use crate::observability::messages::pipeline::{
    ChunkWritten, HookOverwritten, RadiosCropped, StepCompleted, StepStarted,
};
use crate::observability::messages::planner::PipelineCreated;
use crate::observability::messages::StructuredLog;
use crate::preproc::FlatTable;
use crate::sino::SinoBuilder;
use crate::traits::{KernelSet, ReconParams, Reconstructor, StepParams, WriteMetadata, WrittenChunk};

/// Where the working buffers of a pipeline live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Host,
    Device,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Host => "host",
            Backend::Device => "device",
        }
    }
}

/// How a pipeline is laid out on the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLayout {
    pub backend: Backend,
    pub variant: PipelineVariant,
    /// Device chunk height in rows, the sub-chunk size of the
    /// limited-memory variant
    pub device_chunk: usize,
}

/// Mutable view of the pipeline handed to post-step hooks.
pub struct HookContext<'a> {
    pub step: Step,
    pub task: &'a Task,
    pub host: &'a mut BufferPool,
    pub device: &'a mut BufferPool,
}

/// Callback run synchronously after a step completes.
///
/// In the full variant a hook runs right after its step. In the
/// limited-memory variant the projection-domain steps after `read` are
/// applied group by group, so their hooks run together, in step order, once
/// the last projection group is back on the host and cropped, before
/// sinogram normalization. The `read` hook and the hooks of the sinogram
/// and volume steps run right after their step in both variants.
pub type PostStepHook = Box<dyn FnMut(&mut HookContext<'_>) -> Result<(), ReconError>>;

/// Expected array shapes at each stage of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageShapes {
    /// `(n_angles, delta_z, n_cols)`
    pub radios: [usize; 3],
    /// `(n_angles, n_recs, n_cols)`
    pub cropped: [usize; 3],
    /// `(n_recs, angles, width)`
    pub sinos: [usize; 3],
    /// `(n_recs, ny, nx)`
    pub recs: [usize; 3],
}

/// What one task produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkOutcome {
    pub task: Task,
    pub n_slices: usize,
    pub histogram: Option<Histogram>,
    pub written: Option<WrittenChunk>,
}

#[derive(Debug, Default)]
pub(super) struct ChunkState {
    pub(super) cropped: bool,
    pub(super) histogram: Option<Histogram>,
    pub(super) written: Option<WrittenChunk>,
}

pub struct ChunkedPipeline {
    pub(super) config: ReconstructionConfig,
    pub(super) layout: PipelineLayout,
    pub(super) task: Task,
    delta_z: usize,
    pub(super) kernels: KernelSet,
    pub(super) sino_builder: Option<SinoBuilder>,
    flat_table: FlatTable,
    pub(super) host: BufferPool,
    hooks: Vec<Option<PostStepHook>>,
    claim: Option<DeviceClaim>,
    pub(super) state: ChunkState,
}

/// The pool holding the working buffers of a `backend`.
pub(super) fn working_pool<'a>(
    backend: Backend,
    host: &'a mut BufferPool,
    ctx: &'a mut DeviceContext,
) -> &'a mut BufferPool {
    match backend {
        Backend::Host => host,
        Backend::Device => ctx.pool_mut(),
    }
}

/// The pool holding the reconstructed slices: host memory once they have
/// been downloaded, the working pool otherwise.
fn recs_pool<'a>(
    backend: Backend,
    host: &'a mut BufferPool,
    ctx: &'a mut DeviceContext,
) -> &'a mut BufferPool {
    if backend == Backend::Device && !host.is_live(RECS) {
        ctx.pool_mut()
    } else {
        host
    }
}

/// Reconstructs every sinogram of `sinos` into the matching slice of `recs`.
pub(super) fn reconstruct_stack(
    reconstructor: &mut dyn Reconstructor,
    sinos: ArrayView3<f32>,
    mut recs: ArrayViewMut3<f32>,
) -> Result<(), ReconError> {
    for (sino, slice) in sinos.axis_iter(Axis(0)).zip(recs.axis_iter_mut(Axis(0))) {
        reconstructor
            .reconstruct(sino, slice)
            .map_err(|source| ReconError::Kernel {
                step: Step::Reconstruction,
                source,
            })?;
    }
    Ok(())
}

pub(super) fn check_shape(step: Step, expected: [usize; 3], actual: [usize; 3]) -> Result<(), ReconError> {
    if expected != actual {
        return Err(ReconError::ShapeMismatch {
            step,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

fn download_recs(ctx: &mut HookContext<'_>) -> Result<(), ReconError> {
    let recs = ctx.device.fetch(RECS)?;
    ctx.host.store(RECS, recs)
}

impl ChunkedPipeline {
    /// Builds a pipeline for `task` and configures every kernel.
    ///
    /// Fails before touching any data if a step's prerequisite is disabled,
    /// an enabled step has no collaborator, or half-tomography is impossible
    /// for the geometry. A device pipeline claims `ctx` until
    /// [`teardown`](Self::teardown).
    pub fn new(
        config: ReconstructionConfig,
        task: Task,
        kernels: KernelSet,
        layout: PipelineLayout,
        ctx: &mut DeviceContext,
    ) -> Result<Self, ReconError> {
        let steps = &config.steps;
        let mut problems = Vec::new();
        if !steps.contains(Step::Read) {
            problems.push(ValidationError::ReadStepMissing);
        }
        for (step, requires) in steps.missing_prerequisites() {
            problems.push(ValidationError::MissingPrerequisite { step, requires });
        }
        if !problems.is_empty() {
            return Err(ReconError::InvalidConfiguration(problems));
        }
        if let Some(step) = kernels.missing(steps).first() {
            return Err(ReconError::MissingKernel(*step));
        }

        let ds = &config.dataset;
        let geo = ds.geometry();
        if layout.variant == PipelineVariant::LimitedMemory {
            LimitedMemorySubchunker::radios_group_size(geo.n_angles, layout.device_chunk, task.delta_z())?;
        }
        let sino_builder = if steps.contains(Step::BuildSino) {
            Some(SinoBuilder::new(geo.n_angles, geo.n_cols, &config.build_sino)?)
        } else {
            None
        };
        let flat_table = FlatTable::new(&ds.flat_positions, &ds.projection_indices());

        let mut pipeline = Self {
            delta_z: task.delta_z(),
            task,
            kernels,
            sino_builder,
            flat_table,
            host: BufferPool::host(),
            hooks: (0..Step::ALL.len()).map(|_| None).collect(),
            claim: None,
            state: ChunkState::default(),
            layout,
            config,
        };
        pipeline.configure_kernels()?;

        if layout.backend == Backend::Device {
            pipeline.claim = Some(ctx.claim()?);
            if layout.variant == PipelineVariant::Full
                && pipeline.config.steps.contains(Step::Reconstruction)
            {
                pipeline.hooks[Step::Reconstruction.index()] = Some(Box::new(download_recs));
            }
        }

        PipelineCreated {
            delta_z: pipeline.delta_z,
            variant: layout.variant.name(),
            backend: layout.backend.name(),
        }
        .log();
        Ok(pipeline)
    }

    pub fn delta_z(&self) -> usize {
        self.delta_z
    }

    pub fn variant(&self) -> PipelineVariant {
        self.layout.variant
    }

    pub fn backend(&self) -> Backend {
        self.layout.backend
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn host_pool(&self) -> &BufferPool {
        &self.host
    }

    pub fn flat_table(&self) -> &FlatTable {
        &self.flat_table
    }

    /// Shapes of the binned, subsampled data at each stage.
    pub fn shapes(&self) -> StageShapes {
        let geo = self.config.dataset.geometry();
        let n_recs = self.task.n_recs();
        let sinos = match &self.sino_builder {
            Some(builder) => builder.output_shape(n_recs),
            None => [n_recs, geo.n_angles, geo.n_cols],
        };
        let (ny, nx) = self.config.reconstruction.roi(sinos[2]).shape();
        StageShapes {
            radios: [geo.n_angles, self.delta_z, geo.n_cols],
            cropped: [geo.n_angles, n_recs, geo.n_cols],
            sinos,
            recs: [n_recs, ny, nx],
        }
    }

    /// Buffer a step reads, and the shape it must have.
    pub fn expected_input(&self, step: Step) -> Option<(&'static str, [usize; 3])> {
        let shapes = self.shapes();
        match step.domain() {
            StepDomain::Projection if step == Step::Read => None,
            StepDomain::Projection => {
                let cropped = self
                    .config
                    .steps
                    .crop_step()
                    .is_some_and(|crop| step > crop);
                Some((RADIOS, if cropped { shapes.cropped } else { shapes.radios }))
            }
            StepDomain::Sinogram => Some((RADIOS, shapes.cropped)),
            StepDomain::Volume if step == Step::Reconstruction => Some((SINOS, shapes.sinos)),
            StepDomain::Volume => Some((RECS, shapes.recs)),
        }
    }

    /// Shape an in-place kernel is configured with.
    fn kernel_shape(&self, step: Step) -> Option<[usize; 3]> {
        let (_, shape) = self.expected_input(step)?;
        if step == Step::SinoNormalization {
            // radios seen as a stack of sinograms
            Some([shape[1], shape[0], shape[2]])
        } else {
            Some(shape)
        }
    }

    fn configure_kernels(&mut self) -> Result<(), ReconError> {
        let in_place: Vec<(Step, [usize; 3])> = self
            .config
            .steps
            .iter()
            .filter(|s| KernelSet::is_in_place(*s))
            .filter_map(|s| self.kernel_shape(s).map(|shape| (s, shape)))
            .collect();
        for (step, shape) in in_place {
            self.configure_in_place(step, shape)?;
        }

        if self.config.steps.contains(Step::Reconstruction) {
            let sinos = self.shapes().sinos;
            let params = ReconParams {
                rotation_center: self
                    .sino_builder
                    .as_ref()
                    .map(|b| b.rotation_center())
                    .unwrap_or_else(|| self.config.build_sino.rotation_center(sinos[2])),
                roi: self.config.reconstruction.roi(sinos[2]),
            };
            let reconstructor = self
                .kernels
                .reconstructor_mut()
                .ok_or(ReconError::MissingKernel(Step::Reconstruction))?;
            reconstructor
                .configure((sinos[1], sinos[2]), &params)
                .map_err(|source| ReconError::Kernel {
                    step: Step::Reconstruction,
                    source,
                })?;
        }
        Ok(())
    }

    fn configure_in_place(&mut self, step: Step, shape: [usize; 3]) -> Result<(), ReconError> {
        let params = StepParams {
            sub_region: self.task.loaded_region(),
            margin: self.task.margin,
            flat_table: &self.flat_table,
        };
        let kernel = self
            .kernels
            .in_place_mut(step)
            .ok_or(ReconError::MissingKernel(step))?;
        kernel
            .configure(shape, &params)
            .map_err(|source| ReconError::Kernel { step, source })
    }

    /// Moves the pipeline to another task of the same height.
    ///
    /// Only the flat-field is reconfigured, since the flats it interpolates
    /// depend on the rows loaded. When the new task's margins differ from
    /// the current ones the cropped shapes change too, and every kernel is
    /// reconfigured.
    pub fn set_subregion(&mut self, task: Task) -> Result<(), ReconError> {
        if task.delta_z() != self.delta_z {
            return Err(ReconError::SubRegionHeightMismatch {
                expected: self.delta_z,
                actual: task.delta_z(),
            });
        }
        let margins_changed = task.margin != self.task.margin;
        self.task = task;
        if margins_changed {
            return self.configure_kernels();
        }
        if self.config.steps.contains(Step::Flatfield) {
            if let Some(shape) = self.kernel_shape(Step::Flatfield) {
                self.configure_in_place(Step::Flatfield, shape)?;
            }
        }
        Ok(())
    }

    /// Registers `hook` to run after `step`, replacing any previous hook.
    pub fn register_hook(&mut self, step: Step, hook: PostStepHook) -> Result<(), ReconError> {
        if !self.config.steps.contains(step) {
            return Err(ReconError::HookOnDisabledStep(step));
        }
        let slot = &mut self.hooks[step.index()];
        if slot.is_some() {
            HookOverwritten { step }.log();
        }
        *slot = Some(hook);
        Ok(())
    }

    pub fn has_hook(&self, step: Step) -> bool {
        self.hooks[step.index()].is_some()
    }

    /// Runs every enabled step on the current task.
    pub fn process_chunk(&mut self, ctx: &mut DeviceContext) -> Result<ChunkOutcome, ReconError> {
        self.state = ChunkState::default();
        if self.layout.backend == Backend::Device {
            // never let a stale stack from the previous task stand in for this one
            self.host.release(RECS);
        }
        match self.layout.variant {
            PipelineVariant::Full => {
                let steps: Vec<Step> = self.config.steps.iter().collect();
                self.execute_steps(&steps, ctx)?;
            }
            PipelineVariant::LimitedMemory => {
                LimitedMemorySubchunker::new(self)?.run(ctx)?;
            }
        }
        Ok(ChunkOutcome {
            task: self.task,
            n_slices: self.task.n_recs(),
            histogram: self.state.histogram.clone(),
            written: self.state.written.clone(),
        })
    }

    pub fn execute_steps(&mut self, steps: &[Step], ctx: &mut DeviceContext) -> Result<(), ReconError> {
        for &step in steps {
            self.execute_step(step, ctx)?;
        }
        Ok(())
    }

    pub(super) fn execute_step(&mut self, step: Step, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let started = Instant::now();
        StepStarted {
            step,
            z_start: self.task.z_start(),
        }
        .log();

        if step.domain() != StepDomain::Projection {
            self.crop_radios(ctx)?;
        }
        self.check_input(step, ctx)?;

        match step {
            Step::Read => self.read(ctx)?,
            Step::SinoNormalization => self.normalize_sinos(ctx)?,
            Step::BuildSino => self.build_sinos(ctx)?,
            Step::Reconstruction => self.reconstruct(ctx)?,
            Step::Histogram => self.compute_histogram(ctx)?,
            Step::Write => self.write(ctx)?,
            other => self.apply_radios_kernel(other, ctx)?,
        }

        if self.config.steps.crop_step() == Some(step) {
            self.crop_radios(ctx)?;
        }
        self.run_hook(step, ctx)?;

        StepCompleted {
            step,
            duration: started.elapsed(),
        }
        .log();
        Ok(())
    }

    fn check_input(&mut self, step: Step, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let Some((name, expected)) = self.expected_input(step) else {
            return Ok(());
        };
        let pool = if name == RECS {
            recs_pool(self.layout.backend, &mut self.host, ctx)
        } else {
            working_pool(self.layout.backend, &mut self.host, ctx)
        };
        let actual = pool
            .shape(name)
            .ok_or_else(|| ReconError::BufferNotFound(name.to_string()))?;
        check_shape(step, expected, actual)
    }

    pub(super) fn run_hook(&mut self, step: Step, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let Some(hook) = self.hooks[step.index()].as_mut() else {
            return Ok(());
        };
        let mut hook_ctx = HookContext {
            step,
            task: &self.task,
            host: &mut self.host,
            device: ctx.pool_mut(),
        };
        hook(&mut hook_ctx)
    }

    pub(super) fn load_radios(&mut self) -> Result<ndarray::Array3<f32>, ReconError> {
        let expected = self.shapes().radios;
        let region = self.task.loaded_region();
        let sampling = self.config.dataset.sampling();
        let reader = self
            .kernels
            .reader_mut()
            .ok_or(ReconError::MissingKernel(Step::Read))?;
        let radios = reader
            .load(region, sampling)
            .map_err(|source| ReconError::Collaborator {
                operation: "read",
                source,
            })?;
        let (a, b, c) = radios.dim();
        check_shape(Step::Read, expected, [a, b, c])?;
        Ok(radios)
    }

    fn read(&mut self, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let radios = self.load_radios()?;
        working_pool(self.layout.backend, &mut self.host, ctx).store(RADIOS, radios)?;
        self.state.cropped = false;
        Ok(())
    }

    fn apply_radios_kernel(&mut self, step: Step, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let n_angles = self.config.dataset.geometry().n_angles;
        let pool = working_pool(self.layout.backend, &mut self.host, ctx);
        let kernel = self
            .kernels
            .in_place_mut(step)
            .ok_or(ReconError::MissingKernel(step))?;
        kernel
            .apply(pool.view_mut(RADIOS)?, 0..n_angles)
            .map_err(|source| ReconError::Kernel { step, source })
    }

    fn normalize_sinos(&mut self, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let n_angles = self.config.dataset.geometry().n_angles;
        let pool = working_pool(self.layout.backend, &mut self.host, ctx);
        let kernel = self
            .kernels
            .in_place_mut(Step::SinoNormalization)
            .ok_or(ReconError::MissingKernel(Step::SinoNormalization))?;
        let sinos = pool.view_mut(RADIOS)?.permuted_axes([1, 0, 2]);
        kernel
            .apply(sinos, 0..n_angles)
            .map_err(|source| ReconError::Kernel {
                step: Step::SinoNormalization,
                source,
            })
    }

    /// Cuts the margin rows from the radios. Runs at most once per chunk.
    pub(super) fn crop_radios(&mut self, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        if self.state.cropped {
            return Ok(());
        }
        self.state.cropped = true;
        let margin = self.task.margin;
        if margin.up == 0 && margin.down == 0 {
            return Ok(());
        }
        let rows = self.task.inner_rows();
        let pool = working_pool(self.layout.backend, &mut self.host, ctx);
        pool.crop_rows(RADIOS, rows.clone())?;
        RadiosCropped {
            up: margin.up,
            down: margin.down,
            rows: rows.len(),
        }
        .log();
        Ok(())
    }

    fn build_sinos(&mut self, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let shape = self.shapes().sinos;
        let builder = self
            .sino_builder
            .as_ref()
            .ok_or(ReconError::MissingKernel(Step::BuildSino))?;
        let pool = working_pool(self.layout.backend, &mut self.host, ctx);
        pool.acquire(SINOS, shape)?;
        let (radios, sinos) = pool.pair_mut(RADIOS, SINOS)?;
        builder.build_into(radios, sinos)?;
        Ok(())
    }

    fn reconstruct(&mut self, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let shape = self.shapes().recs;
        let pool = working_pool(self.layout.backend, &mut self.host, ctx);
        pool.acquire(RECS, shape)?;
        let (sinos, recs) = pool.pair_mut(SINOS, RECS)?;
        let reconstructor = self
            .kernels
            .reconstructor_mut()
            .ok_or(ReconError::MissingKernel(Step::Reconstruction))?;
        reconstruct_stack(reconstructor, sinos, recs)
    }

    fn compute_histogram(&mut self, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let pool = recs_pool(self.layout.backend, &mut self.host, ctx);
        let kernel = self
            .kernels
            .histogram_mut()
            .ok_or(ReconError::MissingKernel(Step::Histogram))?;
        let histogram = kernel
            .compute(pool.view(RECS)?)
            .map_err(|source| ReconError::Kernel {
                step: Step::Histogram,
                source,
            })?;
        self.state.histogram = Some(histogram);
        Ok(())
    }

    /// Output metadata for the current task.
    ///
    /// Mergeable outputs get one file per task, named after the task's first
    /// slice so the pieces can be assembled into one volume indexed by z.
    pub fn write_metadata(&self) -> WriteMetadata {
        let output = &self.config.output;
        let file_prefix = match output.scheme {
            OutputScheme::Mergeable => format!("{}_{:04}", output.file_prefix, self.task.z_start()),
            OutputScheme::Standalone => output.file_prefix.clone(),
        };
        WriteMetadata {
            location: output.location.clone(),
            file_prefix,
            scheme: output.scheme,
            rotation_center: self
                .sino_builder
                .as_ref()
                .map(|b| b.rotation_center())
                .unwrap_or_else(|| {
                    self.config
                        .build_sino
                        .rotation_center(self.config.dataset.geometry().n_cols)
                }),
        }
    }

    pub(super) fn write(&mut self, ctx: &mut DeviceContext) -> Result<(), ReconError> {
        let metadata = self.write_metadata();
        let start_index = self.task.z_start();
        let pool = recs_pool(self.layout.backend, &mut self.host, ctx);
        let writer = self
            .kernels
            .writer_mut()
            .ok_or(ReconError::MissingKernel(Step::Write))?;
        let mut written = writer
            .write(pool.view(RECS)?, start_index, &metadata)
            .map_err(|source| ReconError::Collaborator {
                operation: "write",
                source,
            })?;
        if let Some(histogram) = &self.state.histogram {
            let path = writer
                .write_histogram(histogram, &written)
                .map_err(|source| ReconError::Collaborator {
                    operation: "write histogram",
                    source,
                })?;
            written.histogram_path = Some(path);
        }
        ChunkWritten {
            path: &written.path,
            start_index,
            n_slices: written.n_slices,
            histogram: written.histogram_path.as_deref(),
        }
        .log();
        self.state.written = Some(written);
        Ok(())
    }

    /// Releases every buffer, hands the device back and returns the kernels
    /// for the next pipeline.
    pub fn teardown(mut self, ctx: &mut DeviceContext) -> KernelSet {
        self.host.release_all();
        if let Some(claim) = self.claim.take() {
            ctx.relinquish(claim);
        }
        self.kernels
    }
}

impl std::fmt::Debug for ChunkedPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedPipeline")
            .field("layout", &self.layout)
            .field("task", &self.task)
            .field("delta_z", &self.delta_z)
            .field("kernels", &self.kernels)
            .field("hooks", &self.hooks.iter().filter(|h| h.is_some()).count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::stub::{
        stub_kernels, synthetic_config, MemoryReader, RecordingKernel, RecordingLog,
    };
    use crate::config::Binning;
    use crate::engine::Margin;
    use std::cell::Cell;
    use std::rc::Rc;

    fn layout(backend: Backend) -> PipelineLayout {
        PipelineLayout {
            backend,
            variant: PipelineVariant::Full,
            device_chunk: 64,
        }
    }

    #[test]
    fn test_steps_run_in_order_with_crop_after_phase() {
        let config = synthetic_config(
            "[read, flatfield, phase_retrieval, take_log, build_sino, reconstruction]",
        );
        let log = RecordingLog::default();
        let task = Task::with_clamped_margin(8, 16, 4, 32).unwrap();
        let mut ctx = DeviceContext::new(1 << 24);
        let mut pipeline =
            ChunkedPipeline::new(config.clone(), task, stub_kernels(&config, &log), layout(Backend::Host), &mut ctx)
                .unwrap();

        let outcome = pipeline.process_chunk(&mut ctx).unwrap();
        assert_eq!(outcome.n_slices, 8);
        assert_eq!(
            log.applied(),
            vec![
                (Step::Flatfield, [4, 16, 6]),
                (Step::PhaseRetrieval, [4, 16, 6]),
                (Step::TakeLog, [4, 8, 6]),
            ]
        );
        assert_eq!(pipeline.host_pool().shape(RECS), Some([8, 6, 6]));
    }

    #[test]
    fn test_crop_is_forced_before_sinograms_without_filters() {
        let config = synthetic_config("[read, build_sino, reconstruction]");
        let task = Task::new(4, 8, Margin::vertical(2, 2)).unwrap();
        let mut ctx = DeviceContext::new(1 << 24);
        let mut pipeline = ChunkedPipeline::new(
            config.clone(),
            task,
            stub_kernels(&config, &RecordingLog::default()),
            layout(Backend::Host),
            &mut ctx,
        )
        .unwrap();
        pipeline.process_chunk(&mut ctx).unwrap();
        assert_eq!(pipeline.host_pool().shape(SINOS), Some([4, 4, 6]));
    }

    #[test]
    fn test_missing_kernel_is_reported_before_processing() {
        let config = synthetic_config("[read, flatfield, build_sino, reconstruction]");
        let kernels = KernelSet::new().with_reader(Box::new(MemoryReader::ramp(4, 32, 6)));
        let err = ChunkedPipeline::new(
            config,
            Task::new(0, 8, Margin::default()).unwrap(),
            kernels,
            layout(Backend::Host),
            &mut DeviceContext::new(1 << 20),
        )
        .unwrap_err();
        assert!(matches!(err, ReconError::MissingKernel(Step::Flatfield)));
    }

    #[test]
    fn test_missing_prerequisite_is_a_configuration_error() {
        let config = synthetic_config("[read, reconstruction]");
        let log = RecordingLog::default();
        let err = ChunkedPipeline::new(
            config.clone(),
            Task::new(0, 8, Margin::default()).unwrap(),
            stub_kernels(&config, &log),
            layout(Backend::Host),
            &mut DeviceContext::new(1 << 20),
        )
        .unwrap_err();
        assert!(matches!(err, ReconError::InvalidConfiguration(ref problems)
            if problems == &vec![ValidationError::MissingPrerequisite {
                step: Step::Reconstruction,
                requires: Step::BuildSino,
            }]));
    }

    #[test]
    fn test_reader_shape_mismatch_is_a_contract_error() {
        let config = synthetic_config("[read, build_sino]");
        // the reader returns 5 columns but the dataset declares 6
        let kernels = KernelSet::new().with_reader(Box::new(MemoryReader::ramp(4, 32, 5)));
        let mut ctx = DeviceContext::new(1 << 20);
        let mut pipeline = ChunkedPipeline::new(
            config,
            Task::new(0, 8, Margin::default()).unwrap(),
            kernels,
            layout(Backend::Host),
            &mut ctx,
        )
        .unwrap();
        let err = pipeline.process_chunk(&mut ctx).unwrap_err();
        assert!(matches!(
            err,
            ReconError::ShapeMismatch {
                step: Step::Read,
                ..
            }
        ));
        assert_eq!(err.kind(), crate::errors::ErrorKind::Contract);
    }

    #[test]
    fn test_hooks_on_disabled_steps_are_rejected_and_overwrites_allowed() {
        let config = synthetic_config("[read, take_log]");
        let log = RecordingLog::default();
        let mut ctx = DeviceContext::new(1 << 20);
        let mut pipeline = ChunkedPipeline::new(
            config.clone(),
            Task::new(0, 8, Margin::default()).unwrap(),
            stub_kernels(&config, &log),
            layout(Backend::Host),
            &mut ctx,
        )
        .unwrap();

        assert!(matches!(
            pipeline.register_hook(Step::Flatfield, Box::new(|_| Ok(()))),
            Err(ReconError::HookOnDisabledStep(Step::Flatfield))
        ));

        pipeline
            .register_hook(Step::TakeLog, Box::new(|_| Err(ReconError::BufferNotFound("first".into()))))
            .unwrap();
        pipeline
            .register_hook(
                Step::TakeLog,
                Box::new(|ctx: &mut HookContext<'_>| {
                    ctx.host.acquire("hooked", [1, 1, 1])?;
                    Ok(())
                }),
            )
            .unwrap();
        pipeline.process_chunk(&mut ctx).unwrap();
        assert!(pipeline.host_pool().is_live("hooked"));
    }

    #[test]
    fn test_device_backend_downloads_recs_and_releases_on_teardown() {
        let config = synthetic_config("[read, take_log, build_sino, reconstruction, write]");
        let log = RecordingLog::default();
        let mut ctx = DeviceContext::new(1 << 24);
        let mut pipeline = ChunkedPipeline::new(
            config.clone(),
            Task::new(0, 8, Margin::default()).unwrap(),
            stub_kernels(&config, &log),
            layout(Backend::Device),
            &mut ctx,
        )
        .unwrap();
        assert!(pipeline.has_hook(Step::Reconstruction));
        assert!(ctx.owner().is_some());

        let outcome = pipeline.process_chunk(&mut ctx).unwrap();
        assert!(pipeline.host_pool().is_live(RECS));
        assert!(ctx.pool().stats().bytes_uploaded > 0);
        assert_eq!(ctx.pool().stats().bytes_downloaded, 8 * 6 * 6 * 4);
        let written = outcome.written.unwrap();
        assert_eq!(written.start_index, 0);
        assert_eq!(written.path, std::path::PathBuf::from("/tmp/recs/rec_0000.raw"));
        assert_eq!(written.histogram_path, None);

        let kernels = pipeline.teardown(&mut ctx);
        assert!(kernels.has(Step::TakeLog));
        assert_eq!(ctx.pool().used_bytes(), 0);
        assert!(ctx.owner().is_none());
    }

    #[test]
    fn test_set_subregion_reconfigures_flatfield_only() {
        let config = synthetic_config("[read, flatfield, take_log]");
        let log = RecordingLog::default();
        let mut ctx = DeviceContext::new(1 << 20);
        let mut pipeline = ChunkedPipeline::new(
            config.clone(),
            Task::new(0, 8, Margin::default()).unwrap(),
            stub_kernels(&config, &log),
            layout(Backend::Host),
            &mut ctx,
        )
        .unwrap();
        let before = log.configured();
        assert_eq!(before.len(), 2);

        pipeline.set_subregion(Task::new(8, 16, Margin::default()).unwrap()).unwrap();
        let after = log.configured();
        assert_eq!(after.len(), 3);
        assert_eq!(after[2], (Step::Flatfield, (8, 16)));

        assert!(matches!(
            pipeline.set_subregion(Task::new(16, 20, Margin::default()).unwrap()),
            Err(ReconError::SubRegionHeightMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_kernel_failure_carries_step() {
        let config = synthetic_config("[read, take_log]");
        let kernels = KernelSet::new()
            .with_reader(Box::new(MemoryReader::ramp(4, 32, 6)))
            .with_in_place(Step::TakeLog, Box::new(RecordingKernel::failing(Step::TakeLog)));
        let mut ctx = DeviceContext::new(1 << 20);
        let mut pipeline = ChunkedPipeline::new(
            config,
            Task::new(0, 8, Margin::default()).unwrap(),
            kernels,
            layout(Backend::Host),
            &mut ctx,
        )
        .unwrap();
        let err = pipeline.process_chunk(&mut ctx).unwrap_err();
        assert!(matches!(err, ReconError::Kernel { step: Step::TakeLog, .. }));
    }

    #[test]
    fn test_binned_reader_feeds_binned_shapes() {
        let mut config = synthetic_config("[read, take_log, build_sino, reconstruction]");
        config.dataset.n_z = 64;
        config.dataset.n_cols = 12;
        config.dataset.binning = Binning { rows: 2, cols: 2 };
        config.dataset.subsampling = 2;
        let log = RecordingLog::default();
        let mut ctx = DeviceContext::new(1 << 20);
        let mut pipeline = ChunkedPipeline::new(
            config.clone(),
            Task::new(8, 16, Margin::default()).unwrap(),
            stub_kernels(&config, &log),
            layout(Backend::Host),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(
            pipeline.shapes(),
            StageShapes {
                radios: [2, 8, 6],
                cropped: [2, 8, 6],
                sinos: [8, 2, 6],
                recs: [8, 6, 6],
            }
        );

        let first = Rc::new(Cell::new(0.0f32));
        let seen = first.clone();
        pipeline
            .register_hook(
                Step::Read,
                Box::new(move |ctx: &mut HookContext<'_>| {
                    seen.set(ctx.host.view(RADIOS)?[[1, 0, 0]]);
                    Ok(())
                }),
            )
            .unwrap();
        pipeline.process_chunk(&mut ctx).unwrap();

        assert_eq!(log.loads(), vec![(8, 16)]);
        assert_eq!(log.applied(), vec![(Step::TakeLog, [2, 8, 6])]);
        // projection 2, mean of detector rows 16-17 and columns 0-1
        assert_eq!(first.get(), 1.0 + 1.0 + 16.5 * 0.25 + 0.5 * 0.125);
        assert_eq!(pipeline.host_pool().shape(RECS), Some([8, 6, 6]));
    }
}
