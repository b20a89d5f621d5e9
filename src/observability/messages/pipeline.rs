// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for step execution inside a pipeline.

use crate::engine::Step;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;
use tracing::Span;

/// # Log Level
/// `debug!` - Step detail
pub struct StepStarted {
    pub step: Step,
    pub z_start: usize,
}

impl Display for StepStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Running step '{}' (slice {})", self.step, self.z_start)
    }
}

impl StructuredLog for StepStarted {
    fn log(&self) {
        tracing::debug!(step = self.step.name(), z_start = self.z_start, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "step",
            span_name = name,
            step = self.step.name(),
            z_start = self.z_start,
        )
    }
}

/// # Log Level
/// `debug!` - Step detail
pub struct StepCompleted {
    pub step: Step,
    pub duration: Duration,
}

impl Display for StepCompleted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Step '{}' completed in {:?}", self.step, self.duration)
    }
}

impl StructuredLog for StepCompleted {
    fn log(&self) {
        tracing::debug!(
            step = self.step.name(),
            duration_us = self.duration.as_micros() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "step_completed",
            span_name = name,
            step = self.step.name(),
            duration = ?self.duration,
        )
    }
}

/// The margin rows were cut from the radios.
///
/// # Log Level
/// `debug!` - Buffer traffic
pub struct RadiosCropped {
    pub up: usize,
    pub down: usize,
    pub rows: usize,
}

impl Display for RadiosCropped {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Cropped radios margins (up {}, down {}) to {} rows",
            self.up, self.down, self.rows
        )
    }
}

impl StructuredLog for RadiosCropped {
    fn log(&self) {
        tracing::debug!(up = self.up, down = self.down, rows = self.rows, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("radios_cropped", span_name = name, rows = self.rows)
    }
}

/// A post-step hook replaced an existing one.
///
/// # Log Level
/// `warn!` - The replaced hook will not run
pub struct HookOverwritten {
    pub step: Step,
}

impl Display for HookOverwritten {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Overwriting existing hook for step '{}'", self.step)
    }
}

impl StructuredLog for HookOverwritten {
    fn log(&self) {
        tracing::warn!(step = self.step.name(), "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("hook_overwritten", span_name = name, step = self.step.name())
    }
}

/// One pass of the limited-memory variant is starting.
///
/// # Log Level
/// `debug!` - Sub-chunking detail
pub struct SubchunkPassStarted {
    pub pass: usize,
    pub groups: usize,
    pub group_size: usize,
}

impl Display for SubchunkPassStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Limited-memory pass {}: {} groups of up to {}",
            self.pass, self.groups, self.group_size
        )
    }
}

impl StructuredLog for SubchunkPassStarted {
    fn log(&self) {
        tracing::debug!(
            pass = self.pass,
            groups = self.groups,
            group_size = self.group_size,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "subchunk_pass",
            span_name = name,
            pass = self.pass,
            groups = self.groups,
        )
    }
}


/// A task's slices, and their histogram if any, were handed to the writer.
///
/// # Log Level
/// `info!` - Output produced
pub struct ChunkWritten<'a> {
    pub path: &'a Path,
    pub start_index: usize,
    pub n_slices: usize,
    pub histogram: Option<&'a Path>,
}

impl Display for ChunkWritten<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Wrote {} slices from {} to {}",
            self.n_slices,
            self.start_index,
            self.path.display()
        )?;
        if let Some(histogram) = self.histogram {
            write!(f, " (histogram in {})", histogram.display())?;
        }
        Ok(())
    }
}

impl StructuredLog for ChunkWritten<'_> {
    fn log(&self) {
        tracing::info!(
            path = %self.path.display(),
            start_index = self.start_index,
            n_slices = self.n_slices,
            histogram = self.histogram.is_some(),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "chunk_written",
            span_name = name,
            start_index = self.start_index,
            n_slices = self.n_slices,
        )
    }
}
