// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::ops::Range;

use ndarray::{ArrayView2, ArrayView3, ArrayViewMut2, ArrayViewMut3};

use crate::config::SliceRoi;
use crate::engine::{Margin, Step, StepSet};
use crate::histogram::Histogram;
use crate::preproc::FlatTable;
use crate::traits::{ChunkReader, VolumeWriter};

/// What an in-place kernel needs to know about the chunk it will process.
#[derive(Debug, Clone, Copy)]
pub struct StepParams<'a> {
    /// Detector rows held by the chunk, margins included
    pub sub_region: (usize, usize),
    pub margin: Margin,
    /// Flat interpolation weights, one entry per projection of the task
    pub flat_table: &'a FlatTable,
}

/// A processing step that rewrites its input array.
///
/// `configure` is called when a pipeline is built (and again for the
/// flat-field when the pipeline moves to another sub-region). `apply` may
/// then be called any number of times, possibly with a subset of the
/// configured projections: `projections` gives the position of the chunk's
/// first axis within the task's projection list.
pub trait InPlaceKernel {
    fn name(&self) -> &'static str;

    fn configure(&mut self, shape: [usize; 3], params: &StepParams) -> anyhow::Result<()>;

    fn apply(&mut self, chunk: ArrayViewMut3<f32>, projections: Range<usize>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconParams {
    pub rotation_center: f64,
    pub roi: SliceRoi,
}

/// Reconstructs one slice from one sinogram.
pub trait Reconstructor {
    fn name(&self) -> &'static str;

    fn configure(&mut self, sino_shape: (usize, usize), params: &ReconParams) -> anyhow::Result<()>;

    fn reconstruct(&mut self, sino: ArrayView2<f32>, slice: ArrayViewMut2<f32>) -> anyhow::Result<()>;
}

pub trait HistogramKernel {
    fn name(&self) -> &'static str;

    fn compute(&mut self, volume: ArrayView3<f32>) -> anyhow::Result<Histogram>;
}

/// The collaborators a pipeline is built from: one optional slot per step
/// kind, plus the reader and writer.
///
/// Building a set is the dependency-injection point: which implementation
/// backs a step is decided here, never inside the pipeline.
#[derive(Default)]
pub struct KernelSet {
    reader: Option<Box<dyn ChunkReader>>,
    in_place: BTreeMap<Step, Box<dyn InPlaceKernel>>,
    reconstructor: Option<Box<dyn Reconstructor>>,
    histogram: Option<Box<dyn HistogramKernel>>,
    writer: Option<Box<dyn VolumeWriter>>,
}

impl KernelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps backed by an `InPlaceKernel`.
    pub fn is_in_place(step: Step) -> bool {
        matches!(
            step,
            Step::Flatfield
                | Step::DoubleFlatfield
                | Step::CcdCorrection
                | Step::PhaseRetrieval
                | Step::UnsharpMask
                | Step::TakeLog
                | Step::RadiosMovement
                | Step::SinoNormalization
        )
    }

    pub fn with_reader(mut self, reader: Box<dyn ChunkReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn with_writer(mut self, writer: Box<dyn VolumeWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_reconstructor(mut self, reconstructor: Box<dyn Reconstructor>) -> Self {
        self.reconstructor = Some(reconstructor);
        self
    }

    pub fn with_histogram(mut self, histogram: Box<dyn HistogramKernel>) -> Self {
        self.histogram = Some(histogram);
        self
    }

    /// Sets the kernel for an in-place step. Other steps are ignored and
    /// returned as `false`.
    pub fn set_in_place(&mut self, step: Step, kernel: Box<dyn InPlaceKernel>) -> bool {
        if !Self::is_in_place(step) {
            return false;
        }
        self.in_place.insert(step, kernel);
        true
    }

    pub fn with_in_place(mut self, step: Step, kernel: Box<dyn InPlaceKernel>) -> Self {
        self.set_in_place(step, kernel);
        self
    }

    pub fn has(&self, step: Step) -> bool {
        match step {
            Step::Read => self.reader.is_some(),
            Step::BuildSino => true,
            Step::Reconstruction => self.reconstructor.is_some(),
            Step::Histogram => self.histogram.is_some(),
            Step::Write => self.writer.is_some(),
            other => self.in_place.contains_key(&other),
        }
    }

    /// Enabled steps with no collaborator, in execution order.
    pub fn missing(&self, steps: &StepSet) -> Vec<Step> {
        steps.iter().filter(|s| !self.has(*s)).collect()
    }

    pub fn in_place_mut(&mut self, step: Step) -> Option<&mut (dyn InPlaceKernel + 'static)> {
        self.in_place.get_mut(&step).map(|k| k.as_mut())
    }

    pub fn reader_mut(&mut self) -> Option<&mut (dyn ChunkReader + 'static)> {
        self.reader.as_deref_mut()
    }

    pub fn reconstructor_mut(&mut self) -> Option<&mut (dyn Reconstructor + 'static)> {
        self.reconstructor.as_deref_mut()
    }

    pub fn histogram_mut(&mut self) -> Option<&mut (dyn HistogramKernel + 'static)> {
        self.histogram.as_deref_mut()
    }

    pub fn writer_mut(&mut self) -> Option<&mut (dyn VolumeWriter + 'static)> {
        self.writer.as_deref_mut()
    }
}

impl std::fmt::Debug for KernelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSet")
            .field("reader", &self.reader.is_some())
            .field(
                "in_place",
                &self.in_place.iter().map(|(s, k)| (*s, k.name())).collect::<Vec<_>>(),
            )
            .field("reconstructor", &self.reconstructor.as_ref().map(|r| r.name()))
            .field("histogram", &self.histogram.as_ref().map(|h| h.name()))
            .field("writer", &self.writer.is_some())
            .finish()
    }
}
