// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::ops::Range;

use anyhow::{ensure, Context};
use ndarray::{s, Array2, Array3, ArrayViewMut3, Axis, Zip};

use crate::preproc::FlatWeights;
use crate::traits::{InPlaceKernel, StepParams};

/// Reference frames of the whole detector.
#[derive(Debug, Clone)]
pub struct ReferenceFrames {
    /// Mean dark, `(n_z, n_cols)`
    pub dark: Array2<f32>,
    /// One frame per flat acquisition, `(n_flats, n_z, n_cols)`
    pub flats: Array3<f32>,
}

impl ReferenceFrames {
    pub fn new(dark: Array2<f32>, flats: Array3<f32>) -> anyhow::Result<Self> {
        ensure!(
            flats.shape()[1..] == *dark.shape(),
            "flats {:?} do not match dark {:?}",
            flats.shape(),
            dark.shape()
        );
        Ok(Self { dark, flats })
    }

    /// Zero dark and unit flats: flat-fielding leaves data untouched.
    pub fn neutral(n_flats: usize, n_z: usize, n_cols: usize) -> Self {
        Self {
            dark: Array2::zeros((n_z, n_cols)),
            flats: Array3::ones((n_flats.max(1), n_z, n_cols)),
        }
    }
}

/// `(radio - dark) / (flat - dark)` with the flat interpolated per projection.
#[derive(Debug)]
pub struct FlatFieldNormalizer {
    frames: ReferenceFrames,
    dark: Array2<f32>,
    flats: Array3<f32>,
    weights: Vec<FlatWeights>,
}

impl FlatFieldNormalizer {
    pub fn new(frames: ReferenceFrames) -> Self {
        Self {
            frames,
            dark: Array2::zeros((0, 0)),
            flats: Array3::zeros((0, 0, 0)),
            weights: Vec::new(),
        }
    }
}

impl InPlaceKernel for FlatFieldNormalizer {
    fn name(&self) -> &'static str {
        "flatfield"
    }

    fn configure(&mut self, shape: [usize; 3], params: &StepParams) -> anyhow::Result<()> {
        let (z0, z1) = params.sub_region;
        let (n_z, n_cols) = self.frames.dark.dim();
        ensure!(
            z1 <= n_z && z0 < z1,
            "rows [{}, {}) outside the {} reference rows",
            z0,
            z1,
            n_z
        );
        ensure!(
            shape[1] == z1 - z0 && shape[2] == n_cols,
            "radios {:?} do not match reference rows [{}, {}) x {}",
            shape,
            z0,
            z1,
            n_cols
        );
        ensure!(
            params.flat_table.len() >= shape[0],
            "{} flat weights for {} projections",
            params.flat_table.len(),
            shape[0]
        );
        self.dark = self.frames.dark.slice(s![z0..z1, ..]).to_owned();
        self.flats = self.frames.flats.slice(s![.., z0..z1, ..]).to_owned();
        self.weights = params.flat_table.weights().to_vec();
        Ok(())
    }

    fn apply(&mut self, mut chunk: ArrayViewMut3<f32>, projections: Range<usize>) -> anyhow::Result<()> {
        let weights = self
            .weights
            .get(projections.clone())
            .with_context(|| format!("no flat weights for projections {:?}", projections))?;
        ensure!(
            chunk.len_of(Axis(0)) == weights.len(),
            "{} projections given for range {:?}",
            chunk.len_of(Axis(0)),
            projections
        );
        for (mut radio, w) in chunk.axis_iter_mut(Axis(0)).zip(weights) {
            let prev = self.flats.index_axis(Axis(0), w.prev);
            let next = self.flats.index_axis(Axis(0), w.next);
            Zip::from(&mut radio)
                .and(&self.dark)
                .and(&prev)
                .and(&next)
                .for_each(|value, &dark, &flat_prev, &flat_next| {
                    let flat = (1.0 - w.weight) * flat_prev + w.weight * flat_next;
                    let denom = flat - dark;
                    *value = if denom.abs() > f32::EPSILON {
                        (*value - dark) / denom
                    } else {
                        1.0
                    };
                });
        }
        Ok(())
    }
}
