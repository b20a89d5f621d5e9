// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Chunk-size estimation.
//!
//! The estimator answers "how many contiguous detector rows can be processed
//! at once within this many bytes". The footprint of a chunk is not a smooth
//! function of its height because phase retrieval pads to FFT-friendly sizes,
//! so the answer comes from a monotone linear search rather than a solve.

use crate::config::consts::{BYTES_PER_ELEMENT, DEFAULT_ESTIMATOR_STEP, MAX_TRANSFER_BYTES};
use crate::config::ReconstructionConfig;
use crate::engine::{Step, StepSet};
use crate::observability::messages::{memory::ChunkSizeEstimated, StructuredLog};

/// Dataset and output dimensions the footprint depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatorParams {
    pub n_angles: usize,
    /// Height of the whole volume; chunks never exceed it
    pub n_z: usize,
    pub n_cols: usize,
    pub n_flats: usize,
    pub n_darks: usize,
    /// Projections per sinogram after building (halved by half-tomography)
    pub sino_angles: usize,
    /// Sinogram width after building (widened by half-tomography)
    pub sino_width: usize,
    /// Reconstructed slice shape `(ny, nx)`
    pub rec_shape: (usize, usize),
}

impl EstimatorParams {
    pub fn from_config(cfg: &ReconstructionConfig) -> Self {
        let ds = &cfg.dataset;
        let geo = ds.geometry();
        let (sino_angles, sino_width) = if cfg.build_sino.enable_halftomo {
            let center = cfg.build_sino.rotation_center(geo.n_cols);
            (geo.n_angles / 2, crate::sino::halftomo_output_width(geo.n_cols, center))
        } else {
            (geo.n_angles, geo.n_cols)
        };
        Self {
            n_angles: geo.n_angles,
            n_z: geo.n_z,
            n_cols: geo.n_cols,
            n_flats: ds.n_flats(),
            n_darks: ds.n_darks,
            sino_angles,
            sino_width,
            rec_shape: cfg.reconstruction.roi(sino_width).shape(),
        }
    }
}

/// Smallest `m >= n` whose prime factors are all in {2, 3, 5, 7}.
pub fn next_nice_size(n: usize) -> usize {
    fn is_nice(mut m: usize) -> bool {
        for p in [2, 3, 5, 7] {
            while m % p == 0 {
                m /= p;
            }
        }
        m == 1
    }
    let mut m = n.max(1);
    while !is_nice(m) {
        m += 1;
    }
    m
}

/// Footprint model for a fixed set of steps and dataset.
#[derive(Debug, Clone)]
pub struct MemoryEstimator {
    steps: StepSet,
    params: EstimatorParams,
    step_rows: usize,
}

impl MemoryEstimator {
    pub fn new(steps: StepSet, params: EstimatorParams) -> Self {
        Self {
            steps,
            params,
            step_rows: DEFAULT_ESTIMATOR_STEP,
        }
    }

    pub fn from_config(cfg: &ReconstructionConfig) -> Self {
        Self::new(cfg.steps.clone(), EstimatorParams::from_config(cfg))
            .with_step(cfg.resources.estimator_step)
    }

    /// Rows added per search iteration.
    pub fn with_step(mut self, rows: usize) -> Self {
        self.step_rows = rows.max(1);
        self
    }

    pub fn step_rows(&self) -> usize {
        self.step_rows
    }

    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    /// Size of the radios chunk alone, i.e. the largest single transfer.
    pub fn transfer_bytes(&self, rows: usize) -> u64 {
        let p = &self.params;
        (p.n_angles * rows * p.n_cols) as u64 * BYTES_PER_ELEMENT
    }

    /// Peak bytes needed to process a chunk of `rows` detector rows.
    pub fn required_memory(&self, rows: usize) -> u64 {
        let p = &self.params;
        let radio = (rows * p.n_cols) as u64;
        let mut elements = p.n_angles as u64 * radio;

        for step in self.steps.iter() {
            elements += match step {
                Step::Flatfield => (p.n_flats + p.n_darks) as u64 * radio,
                Step::DoubleFlatfield | Step::CcdCorrection | Step::UnsharpMask => radio,
                Step::PhaseRetrieval => {
                    let padded_rows = next_nice_size(2 * rows) as u64;
                    let padded_cols = next_nice_size(2 * p.n_cols) as u64;
                    // real input plus half-spectrum complex output
                    padded_rows * padded_cols + padded_rows * (padded_cols / 2 + 1) * 2
                }
                Step::BuildSino => (rows * p.sino_angles * p.sino_width) as u64,
                Step::Reconstruction => {
                    let (ny, nx) = p.rec_shape;
                    let filter_width = next_nice_size(2 * p.sino_width) as u64;
                    (rows * ny * nx) as u64 + p.sino_angles as u64 * filter_width
                }
                _ => 0,
            };
        }
        elements * BYTES_PER_ELEMENT
    }

    fn fits(&self, rows: usize, budget_bytes: u64) -> bool {
        self.required_memory(rows) <= budget_bytes
            && self.transfer_bytes(rows) <= MAX_TRANSFER_BYTES
    }

    /// Largest chunk height that fits in `budget_bytes`, or 0 if even the
    /// first trial size does not fit.
    pub fn max_chunk_size(&self, budget_bytes: u64) -> usize {
        let n_z = self.params.n_z;
        let mut fitting = 0;
        let mut trial = self.step_rows.min(n_z);
        while trial > 0 && self.fits(trial, budget_bytes) {
            fitting = trial;
            if trial >= n_z {
                break;
            }
            trial = (trial + self.step_rows).min(n_z);
        }
        fitting
    }

    /// Same as `max_chunk_size`, logged under `device`.
    pub fn estimate(&self, device: &'static str, budget_bytes: u64) -> usize {
        let chunk_size = self.max_chunk_size(budget_bytes);
        ChunkSizeEstimated {
            device,
            budget_bytes,
            chunk_size,
            required_bytes: self.required_memory(chunk_size.max(self.first_trial())),
        }
        .log();
        chunk_size
    }

    /// Smallest chunk the search ever tries.
    pub fn first_trial(&self) -> usize {
        self.step_rows.min(self.params.n_z)
    }
}

/// Largest number of rows the enabled `steps` can process within `budget_bytes`.
pub fn estimate_max_chunk_size(budget_bytes: u64, steps: &StepSet, params: &EstimatorParams) -> usize {
    MemoryEstimator::new(steps.clone(), params.clone()).max_chunk_size(budget_bytes)
}
