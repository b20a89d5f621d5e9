// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod loader;
mod validation;

pub mod consts;

pub use loader::{
    load_and_validate_config, load_config, Binning, DatasetConfig, Geometry, HistogramOptions,
    MarginFallback, OutputOptions, OutputScheme, PhaseOptions, ReconstructionConfig,
    ReconstructionOptions, ResourceOptions, Sampling, SinoOptions, SliceRoi, UnsharpOptions,
};
pub use validation::validate_config;
