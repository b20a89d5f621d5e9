// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

/// Rows added per iteration of the chunk-size search
pub const DEFAULT_ESTIMATOR_STEP: usize = 10;
/// Largest single contiguous host/device transfer the accelerator accepts (bytes)
pub const MAX_TRANSFER_BYTES: u64 = (1 << 32) - 1;
/// Fraction of the available memory the scheduler plans against
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.9;
/// Minimum distance (pixels) between rotation axis and detector center for half-tomography
pub const DEFAULT_HALFTOMO_TOLERANCE: f64 = 1.0;
/// Relative value below which the Paganin kernel is considered negligible
pub const DEFAULT_PAGANIN_MARGIN_THRESHOLD: f64 = 1e-3;
/// Gaussian truncation radius of the unsharp mask, in sigmas
pub const UNSHARP_TRUNCATE_SIGMAS: f64 = 4.0;
/// Default number of histogram bins
pub const DEFAULT_HISTOGRAM_BINS: usize = 1_000;
/// Absolute tolerance when comparing histogram bin edges
pub const DEFAULT_HISTOGRAM_EDGE_TOLERANCE: f64 = 1e-6;
/// Default output file prefix
pub const DEFAULT_FILE_PREFIX: &str = "rec";
/// Planck constant times speed of light, in keV·m (wavelength = HC / energy)
pub const HC_KEV_M: f64 = 1.239_841_93e-9;
/// Bytes per element of every processed array (f32)
pub const BYTES_PER_ELEMENT: u64 = 4;
