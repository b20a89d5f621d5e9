// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Pre-processing helpers shared by the flat-field kernels and the schedulers.

mod flat_table;

pub use flat_table::{FlatTable, FlatWeights};
