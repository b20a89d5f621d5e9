// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Sinogram construction from radios, including half-tomography.

mod builder;
mod halftomo;

pub use builder::SinoBuilder;
pub use halftomo::{halftomo_output_width, HalftomoError, HalftomoTransform};
