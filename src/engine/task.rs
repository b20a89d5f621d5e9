// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::ops::Range;

use serde::Serialize;

use crate::errors::ReconError;

/// Extra rows (and columns) loaded around a task so sliding-window filters
/// see valid support at the task edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Margin {
    pub up: usize,
    pub down: usize,
    pub left: usize,
    pub right: usize,
}

impl Margin {
    pub fn vertical(up: usize, down: usize) -> Self {
        Self {
            up,
            down,
            ..Default::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// One contiguous range of slices to reconstruct, plus its margins.
///
/// `sub_region` is the half-open range of slices the task produces. The
/// rows actually loaded extend it by the vertical margins, which are always
/// clamped to the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Task {
    pub(crate) sub_region: (usize, usize),
    pub(crate) margin: Margin,
}

impl Task {
    /// Fails unless the range is non-empty and the upper margin stays at or
    /// below row 0.
    pub fn new(z_start: usize, z_end: usize, margin: Margin) -> Result<Self, ReconError> {
        if z_end <= z_start || margin.up > z_start {
            return Err(ReconError::InvalidTask {
                z_start,
                z_end,
                margin_up: margin.up,
            });
        }
        Ok(Self {
            sub_region: (z_start, z_end),
            margin,
        })
    }

    /// A task whose vertical margin is `margin_v` cut back to stay inside
    /// `[0, n_z)`.
    pub fn with_clamped_margin(
        z_start: usize,
        z_end: usize,
        margin_v: usize,
        n_z: usize,
    ) -> Result<Self, ReconError> {
        let up = margin_v.min(z_start);
        let down = margin_v.min(n_z.saturating_sub(z_end));
        Self::new(z_start, z_end, Margin::vertical(up, down))
    }

    pub fn sub_region(&self) -> (usize, usize) {
        self.sub_region
    }

    pub fn margin(&self) -> Margin {
        self.margin
    }

    pub fn z_start(&self) -> usize {
        self.sub_region.0
    }

    pub fn z_end(&self) -> usize {
        self.sub_region.1
    }

    /// Rows to load, margins included.
    pub fn loaded_region(&self) -> (usize, usize) {
        (
            self.sub_region.0 - self.margin.up,
            self.sub_region.1 + self.margin.down,
        )
    }

    /// Height of the loaded chunk.
    pub fn delta_z(&self) -> usize {
        let (start, end) = self.loaded_region();
        end - start
    }

    /// Number of slices the task produces.
    pub fn n_recs(&self) -> usize {
        self.sub_region.1 - self.sub_region.0
    }

    /// Rows of the loaded chunk that survive the margin crop.
    pub fn inner_rows(&self) -> Range<usize> {
        self.margin.up..self.margin.up + self.n_recs()
    }
}

/// How a pipeline processes its chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// The whole chunk is processed in one go on the backend
    #[default]
    Full,
    /// The chunk is streamed through the backend in projection groups, then
    /// in sinogram groups
    LimitedMemory,
}

impl PipelineVariant {
    pub fn name(self) -> &'static str {
        match self {
            PipelineVariant::Full => "full",
            PipelineVariant::LimitedMemory => "limited_memory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedTask {
    pub task: Task,
    pub variant: PipelineVariant,
}
