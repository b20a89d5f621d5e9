// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Fixed-range histograms of reconstructed values.
//!
//! Partial histograms computed over disjoint groups of slices can only be
//! summed when they share their bin edges, so every histogram in a job is
//! built over the same configured `[min, max]` range and bin count.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistogramError {
    #[error("A histogram needs at least one bin")]
    NoBins,

    #[error("Invalid histogram range [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },

    #[error("Cannot merge histograms with {left} and {right} bins")]
    BinCountMismatch { left: usize, right: usize },

    #[error("Histogram edge {index} differs ({left} vs {right}) beyond tolerance {tolerance}")]
    EdgeMismatch {
        index: usize,
        left: f64,
        right: f64,
        tolerance: f64,
    },

    #[error("No partial histograms to merge")]
    NothingToMerge,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    counts: Vec<u64>,
    edges: Vec<f64>,
}

impl Histogram {
    /// Empty histogram of `bins` equal bins over `[min, max]`.
    pub fn with_range(bins: usize, range: [f64; 2]) -> Result<Self, HistogramError> {
        let [min, max] = range;
        if bins == 0 {
            return Err(HistogramError::NoBins);
        }
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(HistogramError::InvalidRange { min, max });
        }
        let width = (max - min) / bins as f64;
        let mut edges: Vec<f64> = (0..bins).map(|i| min + i as f64 * width).collect();
        edges.push(max);
        Ok(Self {
            counts: vec![0; bins],
            edges,
        })
    }

    pub fn from_values<'a, I>(values: I, bins: usize, range: [f64; 2]) -> Result<Self, HistogramError>
    where
        I: IntoIterator<Item = &'a f32>,
    {
        let mut hist = Self::with_range(bins, range)?;
        hist.extend(values);
        Ok(hist)
    }

    /// Counts `value`. Values outside the range, and NaN, are ignored; the
    /// last bin includes the upper edge.
    pub fn add(&mut self, value: f32) {
        let value = value as f64;
        let min = self.edges[0];
        let max = self.edges[self.edges.len() - 1];
        if !(min..=max).contains(&value) {
            return;
        }
        let bins = self.counts.len();
        let index = (((value - min) / (max - min)) * bins as f64).floor() as usize;
        self.counts[index.min(bins - 1)] += 1;
    }

    pub fn extend<'a, I: IntoIterator<Item = &'a f32>>(&mut self, values: I) {
        for &v in values {
            self.add(v);
        }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Adds `other` into `self` after checking the edges agree within
    /// `tolerance`.
    pub fn merge(&mut self, other: &Histogram, tolerance: f64) -> Result<(), HistogramError> {
        if self.bins() != other.bins() {
            return Err(HistogramError::BinCountMismatch {
                left: self.bins(),
                right: other.bins(),
            });
        }
        if let Some((index, (&left, &right))) = self
            .edges
            .iter()
            .zip(other.edges.iter())
            .enumerate()
            .find(|(_, (a, b))| (*a - *b).abs() > tolerance)
        {
            return Err(HistogramError::EdgeMismatch {
                index,
                left,
                right,
                tolerance,
            });
        }
        for (c, o) in self.counts.iter_mut().zip(other.counts.iter()) {
            *c += o;
        }
        Ok(())
    }
}

/// Sums partial histograms that share their bin edges.
pub fn merge_histograms(parts: &[Histogram], tolerance: f64) -> Result<Histogram, HistogramError> {
    let (first, rest) = parts.split_first().ok_or(HistogramError::NothingToMerge)?;
    let mut merged = first.clone();
    for part in rest {
        merged.merge(part, tolerance)?;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binning_and_bounds() {
        let values = [0.0f32, 0.5, 1.0, 9.99, 10.0, -0.1, 10.1, f32::NAN];
        let hist = Histogram::from_values(values.iter(), 10, [0.0, 10.0]).unwrap();
        assert_eq!(hist.edges().len(), 11);
        assert_eq!(hist.counts()[0], 2);
        assert_eq!(hist.counts()[1], 1);
        assert_eq!(hist.counts()[9], 2);
        assert_eq!(hist.total(), 5);
    }

    #[test]
    fn test_invalid_construction() {
        assert_eq!(
            Histogram::with_range(0, [0.0, 1.0]).unwrap_err(),
            HistogramError::NoBins
        );
        assert!(matches!(
            Histogram::with_range(4, [1.0, 1.0]),
            Err(HistogramError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_merge_of_disjoint_groups_equals_single_pass() {
        let values: Vec<f32> = (0..1000).map(|i| ((i * 37) % 200) as f32 / 10.0).collect();
        let whole = Histogram::from_values(values.iter(), 16, [0.0, 20.0]).unwrap();
        let parts: Vec<Histogram> = values
            .chunks(300)
            .map(|c| Histogram::from_values(c.iter(), 16, [0.0, 20.0]).unwrap())
            .collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(merge_histograms(&parts, 1e-6).unwrap(), whole);
    }

    #[test]
    fn test_merge_rejects_different_edges() {
        let a = Histogram::with_range(4, [0.0, 1.0]).unwrap();
        let b = Histogram::with_range(4, [0.0, 2.0]).unwrap();
        let c = Histogram::with_range(5, [0.0, 1.0]).unwrap();
        assert!(matches!(
            merge_histograms(&[a.clone(), b], 1e-6),
            Err(HistogramError::EdgeMismatch { index: 1, .. })
        ));
        assert!(matches!(
            merge_histograms(&[a, c], 1e-6),
            Err(HistogramError::BinCountMismatch { left: 4, right: 5 })
        ));
        assert_eq!(
            merge_histograms(&[], 1e-6).unwrap_err(),
            HistogramError::NothingToMerge
        );
    }

    #[test]
    fn test_merge_tolerates_small_edge_noise() {
        let a = Histogram::with_range(4, [0.0, 1.0]).unwrap();
        let b = Histogram::with_range(4, [0.0, 1.0 + 1e-9]).unwrap();
        assert!(merge_histograms(&[a, b], 1e-6).is_ok());
    }
}
