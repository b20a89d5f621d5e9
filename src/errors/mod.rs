// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod config;
mod execution;
mod loading;

pub use config::ValidationError;
pub use execution::{ErrorKind, ReconError};
pub use loading::ConfigError;
