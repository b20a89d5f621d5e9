// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod flatfield;
pub mod histogram;
pub mod mlog;

pub use flatfield::{FlatFieldNormalizer, ReferenceFrames};
pub use histogram::FixedBinsHistogram;
pub use mlog::MinusLog;
