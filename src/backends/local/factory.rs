// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use super::kernels::*;
use crate::config::ReconstructionConfig;
use crate::engine::Step;
use crate::traits::{HistogramKernel, InPlaceKernel, KernelSet};

/// Factory for the in-process reference kernels.
///
/// Covers the steps that need no accelerator:
/// - `flatfield` -> FlatFieldNormalizer (requires reference frames)
/// - `take_log` -> MinusLog
/// - `histogram` -> FixedBinsHistogram (requires a fixed range)
///
/// Other steps are left empty; the caller supplies them before building a
/// pipeline.
pub struct LocalKernelFactory;

impl LocalKernelFactory {
    /// Create the kernel for an in-place step.
    pub fn create_in_place(
        step: Step,
        config: &ReconstructionConfig,
        frames: Option<&ReferenceFrames>,
    ) -> Result<Box<dyn InPlaceKernel>, String> {
        match step {
            Step::Flatfield => {
                let frames = frames
                    .ok_or_else(|| "Local flatfield requires dark and flat frames".to_string())?;
                let ds = &config.dataset;
                let geo = ds.geometry();
                // frames are binned like the radios
                if frames.dark.dim() != (geo.n_z, geo.n_cols) {
                    return Err(format!(
                        "Reference frames {:?} do not match the binned detector ({}, {})",
                        frames.dark.dim(),
                        geo.n_z,
                        geo.n_cols
                    ));
                }
                if frames.flats.shape()[0] < ds.n_flats() {
                    return Err(format!(
                        "{} flat frames given for {} flat acquisitions",
                        frames.flats.shape()[0],
                        ds.n_flats()
                    ));
                }
                Ok(Box::new(FlatFieldNormalizer::new(frames.clone())))
            }
            Step::TakeLog => Ok(Box::new(MinusLog::default())),
            _ => Err(format!("No local implementation for step '{}'", step)),
        }
    }

    pub fn create_histogram(config: &ReconstructionConfig) -> Result<Box<dyn HistogramKernel>, String> {
        let options = config
            .histogram
            .as_ref()
            .ok_or_else(|| "Histogram step enabled without histogram options".to_string())?;
        let range = options
            .range
            .ok_or_else(|| "Local histogram requires a fixed value range".to_string())?;
        Ok(Box::new(FixedBinsHistogram::new(options.bins, range)))
    }

    /// A kernel set holding every enabled step this factory covers.
    pub fn build_kernels(
        config: &ReconstructionConfig,
        frames: Option<&ReferenceFrames>,
    ) -> Result<KernelSet, String> {
        let mut kernels = KernelSet::new();
        for step in config.steps.iter().filter(|s| Self::is_implementation_available(*s)) {
            if step == Step::Histogram {
                kernels = kernels.with_histogram(Self::create_histogram(config)?);
            } else {
                kernels.set_in_place(step, Self::create_in_place(step, config, frames)?);
            }
        }
        Ok(kernels)
    }

    /// List all steps with a local implementation
    pub fn list_available_implementations() -> Vec<Step> {
        vec![Step::Flatfield, Step::TakeLog, Step::Histogram]
    }

    pub fn is_implementation_available(step: Step) -> bool {
        Self::list_available_implementations().contains(&step)
    }
}
