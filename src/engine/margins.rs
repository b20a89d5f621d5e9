// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Vertical margins needed by the sliding-window filters.

use std::f64::consts::PI;

use crate::config::consts::{HC_KEV_M, UNSHARP_TRUNCATE_SIGMAS};
use crate::config::{PhaseOptions, ReconstructionConfig};
use crate::engine::Step;

/// Rows of support the Paganin filter needs on each side of a chunk.
///
/// The filter is a Lorentzian in Fourier space whose real-space kernel
/// decays like `exp(-|x| / L)` with `L = sqrt(distance * wavelength *
/// delta/beta / 4π)`. Support is kept until the kernel falls below
/// `margin_threshold` of its peak.
pub fn paganin_margin(options: &PhaseOptions) -> usize {
    if options.energy_kev <= 0.0 || options.pixel_size_m <= 0.0 || options.margin_threshold <= 0.0 {
        return 0;
    }
    let wavelength_m = HC_KEV_M / options.energy_kev;
    let length_m =
        (options.distance_m * wavelength_m * options.delta_beta / (4.0 * PI)).max(0.0).sqrt();
    let length_px = length_m / options.pixel_size_m;
    let decay = (1.0 / options.margin_threshold).ln().max(0.0);
    (length_px * decay).ceil() as usize
}

/// Rows of support the unsharp mask's Gaussian needs on each side.
pub fn unsharp_margin(sigma: f64) -> usize {
    (UNSHARP_TRUNCATE_SIGMAS * sigma.max(0.0)).ceil() as usize
}

/// Largest margin among the enabled filters.
pub fn filter_margin(config: &ReconstructionConfig) -> usize {
    let mut margin = 0;
    if config.steps.contains(Step::PhaseRetrieval) {
        if let Some(phase) = &config.phase {
            margin = margin.max(paganin_margin(phase));
        }
    }
    if config.steps.contains(Step::UnsharpMask) {
        if let Some(unsharp) = &config.unsharp {
            margin = margin.max(unsharp_margin(unsharp.sigma));
        }
    }
    margin
}
