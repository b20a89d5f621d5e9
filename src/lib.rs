// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod backends;      // reference kernels and test stubs
pub mod config;        // job configuration and validation
pub mod engine;        // planner, pipeline, limited-memory streaming
pub mod errors;        // error handling
pub mod histogram;     // mergeable fixed-bin histograms
pub mod memory;        // budgets, estimator, buffer pools
pub mod observability; // structured log messages
pub mod preproc;       // flat-field weight tables
pub mod sino;          // sinogram building and half-tomography
pub mod traits;        // collaborator interfaces
