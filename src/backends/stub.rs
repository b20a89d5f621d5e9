// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! In-memory collaborators for tests.
//!
//! Every stub transforms data deterministically and element-wise (per
//! projection for radios), so processing a chunk whole or in groups must give
//! identical results.

use std::cell::RefCell;
use std::ops::Range;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, ensure};
use ndarray::{s, Array3, ArrayView2, ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis};

use crate::backends::local::FixedBinsHistogram;
use crate::config::{ReconstructionConfig, Sampling};
use crate::engine::{Step, StepDomain};
use crate::histogram::Histogram;
use crate::traits::{
    ChunkReader, InPlaceKernel, KernelSet, ReconParams, Reconstructor, StepParams,
    VolumeWriter, WriteMetadata, WrittenChunk,
};

/// A small job: 4 projections of a 32 x 6 detector, with `steps` given as a
/// YAML list.
pub fn synthetic_config(steps: &str) -> ReconstructionConfig {
    let yaml = format!(
        r#"
dataset:
  n_angles: 4
  n_z: 32
  n_cols: 6
  flat_positions: [0, 3]
steps: {}
histogram:
  bins: 32
  range: [-1000.0, 1000.0]
resources:
  device:
    available_bytes: 16777216
  host:
    available_bytes: 1073741824
output:
  location: /tmp/recs
  file_prefix: rec
"#,
        steps
    );
    serde_yaml::from_str(&yaml).expect("synthetic config must parse")
}

#[derive(Default)]
struct Records {
    applied: Vec<(Step, [usize; 3])>,
    configured: Vec<(Step, (usize, usize))>,
    loads: Vec<(usize, usize)>,
    written: Vec<(usize, Array3<f32>, WriteMetadata)>,
    histograms: Vec<(PathBuf, Histogram)>,
}

/// Shared journal of what the stubs were asked to do.
#[derive(Clone, Default)]
pub struct RecordingLog(Rc<RefCell<Records>>);

impl RecordingLog {
    pub fn applied(&self) -> Vec<(Step, [usize; 3])> {
        self.0.borrow().applied.clone()
    }

    pub fn configured(&self) -> Vec<(Step, (usize, usize))> {
        self.0.borrow().configured.clone()
    }

    pub fn loads(&self) -> Vec<(usize, usize)> {
        self.0.borrow().loads.clone()
    }

    pub fn written(&self) -> Vec<(usize, Array3<f32>, WriteMetadata)> {
        self.0.borrow().written.clone()
    }

    /// Histograms written, with the stack each belongs to.
    pub fn histograms(&self) -> Vec<(PathBuf, Histogram)> {
        self.0.borrow().histograms.clone()
    }

    /// Every written stack concatenated in write order.
    pub fn written_volume(&self) -> Option<Array3<f32>> {
        let written = self.written();
        let views: Vec<ArrayView3<f32>> = written.iter().map(|(_, v, _)| v.view()).collect();
        ndarray::concatenate(Axis(0), &views).ok()
    }
}

/// Serves slices of a synthetic `(n_angles, n_z, n_cols)` acquisition,
/// binned and subsampled on request.
pub struct MemoryReader {
    volume: Array3<f32>,
    log: Option<RecordingLog>,
}

impl MemoryReader {
    pub fn ramp(n_angles: usize, n_z: usize, n_cols: usize) -> Self {
        Self {
            volume: Array3::from_shape_fn((n_angles, n_z, n_cols), |(a, z, c)| {
                1.0 + a as f32 * 0.5 + z as f32 * 0.25 + c as f32 * 0.125
            }),
            log: None,
        }
    }

    pub fn with_log(mut self, log: &RecordingLog) -> Self {
        self.log = Some(log.clone());
        self
    }
}

impl ChunkReader for MemoryReader {
    fn load(&mut self, sub_region: (usize, usize), sampling: Sampling) -> anyhow::Result<Array3<f32>> {
        let (z0, z1) = sub_region;
        let (rows, cols) = (sampling.binning.rows, sampling.binning.cols);
        ensure!(
            rows > 0 && cols > 0 && sampling.subsampling > 0,
            "invalid sampling {:?}",
            sampling
        );
        ensure!(
            z0 < z1 && z1 * rows <= self.volume.len_of(Axis(1)),
            "rows [{}, {}) outside the acquisition",
            z0,
            z1
        );
        if let Some(log) = &self.log {
            log.0.borrow_mut().loads.push(sub_region);
        }
        let step = sampling.subsampling as isize;
        let raw = self.volume.slice(s![..;step, z0 * rows..z1 * rows, ..]);
        let n_cols = raw.len_of(Axis(2)) / cols;
        let area = (rows * cols) as f32;
        Ok(Array3::from_shape_fn((raw.len_of(Axis(0)), z1 - z0, n_cols), |(a, z, c)| {
            raw.slice(s![a, z * rows..(z + 1) * rows, c * cols..(c + 1) * cols])
                .sum()
                / area
        }))
    }
}

/// Records its calls and applies `0.5 * v + offset`, the offset depending on
/// the projection index for projection-domain steps.
pub struct RecordingKernel {
    step: Step,
    log: Option<RecordingLog>,
    fail: bool,
}

impl RecordingKernel {
    pub fn new(step: Step, log: &RecordingLog) -> Self {
        Self {
            step,
            log: Some(log.clone()),
            fail: false,
        }
    }

    pub fn failing(step: Step) -> Self {
        Self {
            step,
            log: None,
            fail: true,
        }
    }
}

impl InPlaceKernel for RecordingKernel {
    fn name(&self) -> &'static str {
        self.step.name()
    }

    fn configure(&mut self, _shape: [usize; 3], params: &StepParams) -> anyhow::Result<()> {
        if let Some(log) = &self.log {
            log.0.borrow_mut().configured.push((self.step, params.sub_region));
        }
        Ok(())
    }

    fn apply(&mut self, mut chunk: ArrayViewMut3<f32>, projections: Range<usize>) -> anyhow::Result<()> {
        if self.fail {
            bail!("simulated {} failure", self.step);
        }
        if let Some(log) = &self.log {
            let (a, b, c) = chunk.dim();
            log.0.borrow_mut().applied.push((self.step, [a, b, c]));
        }
        let per_projection = self.step.domain() == StepDomain::Projection;
        let bias = self.step.index() as f32;
        for (i, mut plane) in chunk.axis_iter_mut(Axis(0)).enumerate() {
            let offset = if per_projection {
                bias + (projections.start + i) as f32
            } else {
                bias
            };
            plane.mapv_inplace(|v| 0.5 * v + offset);
        }
        Ok(())
    }
}

/// Each pixel is the sum over angles of one sinogram column.
#[derive(Default)]
pub struct SumReconstructor {
    sino_shape: Option<(usize, usize)>,
}

impl Reconstructor for SumReconstructor {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn configure(&mut self, sino_shape: (usize, usize), _params: &ReconParams) -> anyhow::Result<()> {
        self.sino_shape = Some(sino_shape);
        Ok(())
    }

    fn reconstruct(&mut self, sino: ArrayView2<f32>, mut slice: ArrayViewMut2<f32>) -> anyhow::Result<()> {
        ensure!(
            self.sino_shape == Some(sino.dim()),
            "sinogram {:?} but configured for {:?}",
            sino.dim(),
            self.sino_shape
        );
        let width = sino.ncols();
        let sums: Vec<f32> = sino.axis_iter(Axis(1)).map(|col| col.sum()).collect();
        for ((y, x), value) in slice.indexed_iter_mut() {
            *value = sums[(x + y) % width];
        }
        Ok(())
    }
}

/// Keeps written stacks in the log instead of on disk.
pub struct RecordingWriter {
    log: RecordingLog,
}

impl RecordingWriter {
    pub fn new(log: &RecordingLog) -> Self {
        Self { log: log.clone() }
    }
}

impl VolumeWriter for RecordingWriter {
    fn write(
        &mut self,
        volume: ArrayView3<f32>,
        start_index: usize,
        metadata: &WriteMetadata,
    ) -> anyhow::Result<WrittenChunk> {
        self.log
            .0
            .borrow_mut()
            .written
            .push((start_index, volume.to_owned(), metadata.clone()));
        Ok(WrittenChunk {
            path: metadata
                .location
                .join(PathBuf::from(format!("{}.raw", metadata.file_prefix))),
            start_index,
            n_slices: volume.len_of(Axis(0)),
            histogram_path: None,
        })
    }

    fn write_histogram(&mut self, histogram: &Histogram, chunk: &WrittenChunk) -> anyhow::Result<PathBuf> {
        let path = chunk.path.with_extension("hist");
        self.log
            .0
            .borrow_mut()
            .histograms
            .push((path.clone(), histogram.clone()));
        Ok(path)
    }
}

/// Stubs for every step enabled in `config`.
pub fn stub_kernels(config: &ReconstructionConfig, log: &RecordingLog) -> KernelSet {
    let ds = &config.dataset;
    let mut kernels = KernelSet::new()
        .with_reader(Box::new(MemoryReader::ramp(ds.n_angles, ds.n_z, ds.n_cols).with_log(log)))
        .with_reconstructor(Box::new(SumReconstructor::default()))
        .with_writer(Box::new(RecordingWriter::new(log)));
    if let Some(h) = &config.histogram {
        kernels = kernels.with_histogram(Box::new(FixedBinsHistogram::new(
            h.bins,
            h.range.unwrap_or([-1.0e6, 1.0e6]),
        )));
    }
    for step in config.steps.iter().filter(|s| KernelSet::is_in_place(*s)) {
        kernels.set_in_place(step, Box::new(RecordingKernel::new(step, log)));
    }
    kernels
}
