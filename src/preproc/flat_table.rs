// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::ops::Range;

use serde::Serialize;

/// Which flats to blend for one projection: `(1 - weight) * flats[prev] + weight * flats[next]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlatWeights {
    pub prev: usize,
    pub next: usize,
    pub weight: f32,
}

/// Per-projection flat interpolation weights.
///
/// Flats are acquired at a few points during the scan; each projection uses
/// the linear interpolation of the two flats bracketing its acquisition
/// index. Projections before the first (after the last) flat use the first
/// (last) flat alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlatTable {
    weights: Vec<FlatWeights>,
}

impl FlatTable {
    /// `flat_positions` are acquisition indices, not necessarily sorted;
    /// the returned `prev`/`next` index into that same list.
    pub fn new(flat_positions: &[usize], projection_indices: &[usize]) -> Self {
        let mut order: Vec<usize> = (0..flat_positions.len()).collect();
        order.sort_by_key(|&i| flat_positions[i]);

        let weights = projection_indices
            .iter()
            .map(|&p| Self::bracket(flat_positions, &order, p))
            .collect();
        Self { weights }
    }

    fn bracket(positions: &[usize], order: &[usize], p: usize) -> FlatWeights {
        let Some((&first, &last)) = order.first().zip(order.last()) else {
            return FlatWeights {
                prev: 0,
                next: 0,
                weight: 0.0,
            };
        };
        if p <= positions[first] {
            return FlatWeights {
                prev: first,
                next: first,
                weight: 0.0,
            };
        }
        if p >= positions[last] {
            return FlatWeights {
                prev: last,
                next: last,
                weight: 0.0,
            };
        }
        let k = order.partition_point(|&i| positions[i] <= p);
        let (prev, next) = (order[k - 1], order[k]);
        let span = (positions[next] - positions[prev]) as f32;
        FlatWeights {
            prev,
            next,
            weight: (p - positions[prev]) as f32 / span,
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &[FlatWeights] {
        &self.weights
    }

    /// Weights for a contiguous group of projections.
    pub fn slice(&self, projections: Range<usize>) -> &[FlatWeights] {
        let end = projections.end.min(self.weights.len());
        let start = projections.start.min(end);
        &self.weights[start..end]
    }
}
