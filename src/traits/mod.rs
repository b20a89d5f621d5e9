// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Collaborator interfaces the pipeline is assembled from.

pub mod io;
pub mod kernel;

pub use io::{ChunkReader, VolumeWriter, WriteMetadata, WrittenChunk};
pub use kernel::{
    HistogramKernel, InPlaceKernel, KernelSet, ReconParams, Reconstructor, StepParams,
};
