// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

use crate::engine::Step;

/// Problems found while validating a reconstruction configuration.
///
/// Validation accumulates every finding instead of stopping at the first one,
/// so a single run reports everything that must be fixed before any task runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The `read` step is disabled; nothing can be processed.
    ReadStepMissing,
    /// An enabled step needs another step that is disabled.
    MissingPrerequisite {
        step: Step,
        requires: Step,
    },
    /// A memory budget resolves to zero usable bytes.
    ZeroMemoryBudget {
        /// "device" or "host"
        device: &'static str,
    },
    /// The requested z-range is empty or outside the volume.
    InvalidZRange {
        z_min: usize,
        z_max: usize,
        n_z: usize,
    },
    /// Half-tomography requested with the rotation axis on the detector center.
    HalftomoAxisTooCentered {
        rotation_center: f64,
        detector_center: f64,
        tolerance: f64,
    },
    /// Half-tomography needs an even number of projections.
    HalftomoOddAngles {
        n_angles: usize,
    },
    /// Flat-field enabled without any flat acquisition.
    MissingFlats,
    /// A step is enabled but its options section is absent.
    MissingOptions {
        step: Step,
    },
    /// The histogram step needs a fixed value range so partial results merge.
    HistogramRangeMissing,
    /// The reconstruction region of interest is empty or out of bounds.
    InvalidRoi {
        reason: String,
    },
    /// The dataset geometry has a zero dimension.
    EmptyGeometry,
    /// Binning factors and projection subsampling must be at least 1.
    InvalidSampling {
        binning_rows: usize,
        binning_cols: usize,
        subsampling: usize,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ReadStepMissing => {
                write!(f, "Cannot proceed without the 'read' step")
            }
            ValidationError::MissingPrerequisite { step, requires } => {
                write!(
                    f,
                    "Step '{}' requires step '{}' which is not enabled",
                    step, requires
                )
            }
            ValidationError::ZeroMemoryBudget { device } => {
                write!(f, "The {} memory budget is zero", device)
            }
            ValidationError::InvalidZRange { z_min, z_max, n_z } => {
                write!(
                    f,
                    "Invalid z-range [{}, {}) for a volume of {} rows",
                    z_min, z_max, n_z
                )
            }
            ValidationError::HalftomoAxisTooCentered {
                rotation_center,
                detector_center,
                tolerance,
            } => {
                write!(
                    f,
                    "Rotation axis {} is within {} px of the detector center {}: half-tomography is not possible",
                    rotation_center, tolerance, detector_center
                )
            }
            ValidationError::HalftomoOddAngles { n_angles } => {
                write!(
                    f,
                    "Half-tomography needs an even number of projections, got {}",
                    n_angles
                )
            }
            ValidationError::MissingFlats => {
                write!(f, "Flat-field is enabled but the dataset has no flats")
            }
            ValidationError::MissingOptions { step } => {
                write!(f, "Step '{}' is enabled but has no options section", step)
            }
            ValidationError::HistogramRangeMissing => {
                write!(
                    f,
                    "The 'histogram' step needs a fixed value range so partial histograms can be merged"
                )
            }
            ValidationError::InvalidRoi { reason } => {
                write!(f, "Invalid reconstruction region: {}", reason)
            }
            ValidationError::EmptyGeometry => {
                write!(f, "Dataset geometry has a zero dimension")
            }
            ValidationError::InvalidSampling {
                binning_rows,
                binning_cols,
                subsampling,
            } => {
                write!(
                    f,
                    "Binning {}x{} and projection subsampling {} must all be at least 1",
                    binning_rows, binning_cols, subsampling
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}
