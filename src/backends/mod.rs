// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Kernel implementations the pipeline can be assembled from.
//!
//! # Available Backends
//!
//! ## Local Backend
//! In-process reference kernels for the steps that need no accelerator:
//! - **FlatFieldNormalizer**: dark/flat correction with per-projection flat interpolation
//! - **MinusLog**: clipped `-ln` of transmission values
//! - **FixedBinsHistogram**: histogram over a fixed range, mergeable across groups and tasks
//!
//! ## Stub Backend (Test-Only)
//! Deterministic in-memory collaborators for scheduler tests: a synthetic
//! reader, recording kernels and writer, and a column-sum reconstructor.
//! NOT available in production builds.
//!
//! # Examples
//!
//! ```rust
//! use chunked_tomo::backends::local::{LocalKernelFactory, ReferenceFrames};
//! use chunked_tomo::config::ReconstructionConfig;
//! use chunked_tomo::engine::Step;
//!
//! let config: ReconstructionConfig = serde_yaml::from_str(
//!     "dataset: { n_angles: 8, n_z: 4, n_cols: 4, flat_positions: [0] }\n\
//!      steps: [read, flatfield, take_log]",
//! )
//! .unwrap();
//! let frames = ReferenceFrames::neutral(1, 4, 4);
//! let kernels = LocalKernelFactory::build_kernels(&config, Some(&frames))?;
//! assert!(kernels.has(Step::Flatfield));
//! assert_eq!(kernels.missing(&config.steps), vec![Step::Read]);
//! # Ok::<(), String>(())
//! ```

pub mod local;
#[cfg(test)]
pub mod stub;
