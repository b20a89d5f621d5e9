// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! Diagnostic output goes through `tracing`. Message types live in
//! [`messages`], one struct per event, so log lines are defined once and
//! carry the same structured fields wherever they are emitted.
//!
//! # Level policy
//!
//! * `info!` - plan and task lifecycle, chunk-size estimates
//! * `debug!` - step start and end, buffer allocation and release
//! * `warn!` - margin fallbacks, chunk-size overrides, hook overwrites
//! * `error!` - the failure that aborts a job
//!
//! # Usage
//!
//! ```rust
//! use chunked_tomo::observability::init_tracing;
//!
//! // RUST_LOG takes precedence over the default directive
//! init_tracing("chunked_tomo=info");
//! ```

use std::io::IsTerminal;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub mod messages;

/// Installs a formatting subscriber filtered by `RUST_LOG`, or by
/// `default_directive` when the variable is unset or invalid.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_installs_once() {
        init_tracing("chunked_tomo=debug");
        assert!(!init_tracing("chunked_tomo=info"));
        tracing::debug!("subscriber installed");
    }
}
