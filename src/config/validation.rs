// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Configuration validation, run once before any task is planned.
//!
//! Validation is split into independent checks whose findings are
//! accumulated, so a single call reports every problem at once:
//!
//! 1. **Step graph**: `read` is enabled and every enabled step has its
//!    prerequisite (`reconstruction` needs `build_sino`, `histogram` and
//!    `write` need `reconstruction`).
//! 2. **Step options**: filters that are enabled have their parameters, the
//!    flat-field has flats, the histogram has a fixed range.
//! 3. **Geometry**: binning and subsampling of at least 1, a non-empty
//!    binned dataset, a z-range inside the binned volume, a reconstruction
//!    ROI inside the slice, half-tomography feasibility.
//! 4. **Resources**: neither memory budget resolves to zero bytes.
//!
//! # Example
//! ```rust
//! use chunked_tomo::config::{validate_config, ReconstructionConfig};
//!
//! let cfg: ReconstructionConfig = serde_yaml::from_str(r#"
//! dataset: { n_angles: 180, n_z: 100, n_cols: 64 }
//! steps: [read, reconstruction]
//! resources:
//!   device: { available_bytes: 1000000 }
//!   host: { available_bytes: 1000000 }
//! "#).unwrap();
//!
//! let errors = validate_config(&cfg).unwrap_err();
//! assert_eq!(errors.len(), 1);
//! assert!(errors[0].to_string().contains("requires step 'build_sino'"));
//! ```

use crate::config::ReconstructionConfig;
use crate::engine::Step;
use crate::errors::ValidationError;

/// Validates a configuration, returning every problem found.
pub fn validate_config(config: &ReconstructionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for check in [
        validate_step_graph,
        validate_step_options,
        validate_geometry,
        validate_resources,
    ] {
        if let Err(found) = check(config) {
            errors.extend(found);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn collect(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// The reader is mandatory and prerequisites must be present.
fn validate_step_graph(config: &ReconstructionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if !config.steps.contains(Step::Read) {
        errors.push(ValidationError::ReadStepMissing);
    }
    for (step, requires) in config.steps.missing_prerequisites() {
        errors.push(ValidationError::MissingPrerequisite { step, requires });
    }
    collect(errors)
}

fn validate_step_options(config: &ReconstructionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let steps = &config.steps;

    if steps.contains(Step::PhaseRetrieval) && config.phase.is_none() {
        errors.push(ValidationError::MissingOptions {
            step: Step::PhaseRetrieval,
        });
    }
    if steps.contains(Step::UnsharpMask) && config.unsharp.is_none() {
        errors.push(ValidationError::MissingOptions {
            step: Step::UnsharpMask,
        });
    }
    if steps.contains(Step::Flatfield) && config.dataset.flat_positions.is_empty() {
        errors.push(ValidationError::MissingFlats);
    }
    if steps.contains(Step::Histogram) {
        match &config.histogram {
            None => errors.push(ValidationError::MissingOptions {
                step: Step::Histogram,
            }),
            Some(h) if h.range.is_none() => errors.push(ValidationError::HistogramRangeMissing),
            Some(_) => {}
        }
    }
    collect(errors)
}

fn validate_geometry(config: &ReconstructionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let ds = &config.dataset;

    if ds.binning.rows == 0 || ds.binning.cols == 0 || ds.subsampling == 0 {
        return Err(vec![ValidationError::InvalidSampling {
            binning_rows: ds.binning.rows,
            binning_cols: ds.binning.cols,
            subsampling: ds.subsampling,
        }]);
    }
    let geo = ds.geometry();
    if geo.n_angles == 0 || geo.n_z == 0 || geo.n_cols == 0 {
        return Err(vec![ValidationError::EmptyGeometry]);
    }

    let (z_min, z_max) = config.reconstruction.z_range(geo.n_z);
    if z_min >= z_max || z_max > geo.n_z {
        errors.push(ValidationError::InvalidZRange {
            z_min,
            z_max,
            n_z: geo.n_z,
        });
    }

    if let Some(indices) = &ds.projection_indices {
        if indices.len() != ds.n_angles {
            errors.push(ValidationError::EmptyGeometry);
        }
    }

    let mut sino_width = geo.n_cols;
    if config.build_sino.enable_halftomo {
        if geo.n_angles % 2 != 0 {
            errors.push(ValidationError::HalftomoOddAngles {
                n_angles: geo.n_angles,
            });
        }
        let rotation_center = config.build_sino.rotation_center(geo.n_cols);
        let detector_center = (geo.n_cols as f64 - 1.0) / 2.0;
        let tolerance = config.build_sino.halftomo_tolerance;
        if (rotation_center - detector_center).abs() < tolerance {
            errors.push(ValidationError::HalftomoAxisTooCentered {
                rotation_center,
                detector_center,
                tolerance,
            });
        } else {
            sino_width = crate::sino::halftomo_output_width(geo.n_cols, rotation_center);
        }
    }

    if config.steps.contains(Step::Reconstruction) {
        let roi = config.reconstruction.roi(sino_width);
        if roi.x.0 >= roi.x.1 || roi.y.0 >= roi.y.1 {
            errors.push(ValidationError::InvalidRoi {
                reason: format!("empty region x={:?} y={:?}", roi.x, roi.y),
            });
        } else if roi.x.1 > sino_width || roi.y.1 > sino_width {
            errors.push(ValidationError::InvalidRoi {
                reason: format!(
                    "region x={:?} y={:?} exceeds the {}-pixel slice",
                    roi.x, roi.y, sino_width
                ),
            });
        }
    }

    collect(errors)
}

fn validate_resources(config: &ReconstructionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if config.resources.device.budget_bytes() == 0 {
        errors.push(ValidationError::ZeroMemoryBudget { device: "device" });
    }
    if config.resources.host.budget_bytes() == 0 {
        errors.push(ValidationError::ZeroMemoryBudget { device: "host" });
    }
    collect(errors)
}
