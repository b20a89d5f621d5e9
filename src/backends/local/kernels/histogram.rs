// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use ndarray::ArrayView3;

use crate::histogram::Histogram;
use crate::traits::HistogramKernel;

/// Histogram of a slice stack over a fixed value range.
///
/// The range is shared by every call so histograms of different groups or
/// tasks have identical edges and can be summed.
#[derive(Debug, Clone, Copy)]
pub struct FixedBinsHistogram {
    bins: usize,
    range: [f64; 2],
}

impl FixedBinsHistogram {
    pub fn new(bins: usize, range: [f64; 2]) -> Self {
        Self { bins, range }
    }
}

impl HistogramKernel for FixedBinsHistogram {
    fn name(&self) -> &'static str {
        "histogram"
    }

    fn compute(&mut self, volume: ArrayView3<f32>) -> anyhow::Result<Histogram> {
        Ok(Histogram::from_values(volume.iter(), self.bins, self.range)?)
    }
}
