// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use ndarray::{Array3, ArrayView3};
use serde::Serialize;

use crate::config::{OutputScheme, Sampling};
use crate::histogram::Histogram;

/// Source of radios.
pub trait ChunkReader {
    /// Loads the radios of the half-open row range `sub_region`.
    ///
    /// Rows are counted after binning: the reader reads detector rows
    /// `z_start * binning.rows .. z_end * binning.rows`, averages each
    /// `binning.rows x binning.cols` block and keeps one projection out of
    /// `subsampling`. The result has shape
    /// `(ceil(n_angles / subsampling), z_end - z_start, n_cols / binning.cols)`.
    fn load(&mut self, sub_region: (usize, usize), sampling: Sampling) -> anyhow::Result<Array3<f32>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteMetadata {
    pub location: PathBuf,
    pub file_prefix: String,
    pub scheme: OutputScheme,
    /// Axis used to reconstruct the stack
    pub rotation_center: f64,
}

/// Descriptor of one written stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenChunk {
    pub path: PathBuf,
    pub start_index: usize,
    pub n_slices: usize,
    /// Where the stack's histogram went, if one was computed
    pub histogram_path: Option<PathBuf>,
}

/// Sink for reconstructed slices, called once per task.
pub trait VolumeWriter {
    fn write(
        &mut self,
        volume: ArrayView3<f32>,
        start_index: usize,
        metadata: &WriteMetadata,
    ) -> anyhow::Result<WrittenChunk>;

    /// Persists the histogram of the stack described by `chunk`, next to it.
    /// Called right after [`write`](Self::write) when the histogram step is
    /// enabled, so every finished task leaves its histogram behind.
    fn write_histogram(&mut self, histogram: &Histogram, chunk: &WrittenChunk) -> anyhow::Result<PathBuf>;
}
