// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message is a plain struct with a `Display` implementation for the
//! human-readable line and a [`StructuredLog`] implementation that emits the
//! same event with its fields attached, at the level the message belongs to.
//!
//! # Organization
//!
//! * `memory` - chunk-size estimation and buffer pool traffic
//! * `planner` - task planning, margin fallbacks, pipeline lifecycle
//! * `pipeline` - step execution, crop transitions, hooks, sub-chunking
//!
//! # Usage Pattern
//!
//! ```rust
//! use chunked_tomo::observability::messages::{planner::TaskStarted, StructuredLog};
//!
//! let msg = TaskStarted {
//!     index: 0,
//!     total: 4,
//!     z_start: 100,
//!     z_end: 360,
//!     delta_z: 300,
//! };
//!
//! msg.log();
//! assert_eq!(msg.to_string(), "Task 1/4: slices [100, 360), 300 rows loaded");
//! ```

use tracing::Span;

pub mod memory;
pub mod pipeline;
pub mod planner;

/// A message that knows its own log level and structured fields.
pub trait StructuredLog {
    /// Emits the message as an event.
    fn log(&self);

    /// Opens a span carrying the message fields.
    fn span(&self, name: &str) -> Span;
}
