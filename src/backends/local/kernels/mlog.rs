// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::ops::Range;

use anyhow::ensure;
use ndarray::ArrayViewMut3;

use crate::traits::{InPlaceKernel, StepParams};

/// `-ln(x)` of transmission values clipped to `[clip_min, clip_max]`.
#[derive(Debug, Clone, Copy)]
pub struct MinusLog {
    clip_min: f32,
    clip_max: f32,
}

impl MinusLog {
    pub fn new(clip_min: f32, clip_max: f32) -> anyhow::Result<Self> {
        ensure!(
            clip_min > 0.0 && clip_min < clip_max,
            "invalid clip range [{}, {}]",
            clip_min,
            clip_max
        );
        Ok(Self { clip_min, clip_max })
    }
}

impl Default for MinusLog {
    fn default() -> Self {
        Self {
            clip_min: 1e-6,
            clip_max: 10.0,
        }
    }
}

impl InPlaceKernel for MinusLog {
    fn name(&self) -> &'static str {
        "take_log"
    }

    fn configure(&mut self, _shape: [usize; 3], _params: &StepParams) -> anyhow::Result<()> {
        Ok(())
    }

    fn apply(&mut self, mut chunk: ArrayViewMut3<f32>, _projections: Range<usize>) -> anyhow::Result<()> {
        let (lo, hi) = (self.clip_min, self.clip_max);
        chunk.mapv_inplace(|v| -v.clamp(lo, hi).ln());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_clipped_minus_log() {
        let mut data = Array3::from_shape_vec((1, 1, 4), vec![1.0, 0.5, 0.0, 100.0]).unwrap();
        MinusLog::default().apply(data.view_mut(), 0..1).unwrap();
        assert_eq!(data[[0, 0, 0]], 0.0);
        assert!((data[[0, 0, 1]] - std::f32::consts::LN_2).abs() < 1e-6);
        assert!((data[[0, 0, 2]] - 1e-6f32.ln().abs()).abs() < 1e-3);
        assert!((data[[0, 0, 3]] + 10f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_non_positive_clip() {
        assert!(MinusLog::new(0.0, 1.0).is_err());
        assert!(MinusLog::new(2.0, 1.0).is_err());
    }
}
