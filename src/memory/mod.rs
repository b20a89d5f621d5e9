// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Memory accounting: budgets, the chunk-size estimator, the named buffer
//! pool and the explicit device context.

mod context;
mod estimator;
mod pool;

pub use context::{DeviceClaim, DeviceContext};
pub use estimator::{
    estimate_max_chunk_size, next_nice_size, EstimatorParams, MemoryEstimator,
};
pub use pool::{BufferPool, PoolKind, PoolStats, RADIOS, RECS, SINOS};

use serde::{Deserialize, Serialize};

use crate::config::consts::DEFAULT_MEMORY_FRACTION;

/// Memory available to one side (host or device) and how much of it to plan for.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MemoryBudget {
    #[serde(default)]
    pub available_bytes: u64,
    #[serde(default = "default_fraction")]
    pub fraction_to_use: f64,
}

fn default_fraction() -> f64 {
    DEFAULT_MEMORY_FRACTION
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            available_bytes: 0,
            fraction_to_use: DEFAULT_MEMORY_FRACTION,
        }
    }
}

impl MemoryBudget {
    pub fn new(available_bytes: u64, fraction_to_use: f64) -> Self {
        Self {
            available_bytes,
            fraction_to_use,
        }
    }

    /// Bytes the scheduler may plan against.
    pub fn budget_bytes(&self) -> u64 {
        let fraction = self.fraction_to_use.clamp(0.0, 1.0);
        (self.available_bytes as f64 * fraction).floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_applies_fraction() {
        assert_eq!(MemoryBudget::new(1000, 0.9).budget_bytes(), 900);
        assert_eq!(MemoryBudget::new(1000, 1.5).budget_bytes(), 1000);
        assert_eq!(MemoryBudget::default().budget_bytes(), 0);
    }
}
