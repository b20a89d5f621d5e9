// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::consts::{
    DEFAULT_ESTIMATOR_STEP, DEFAULT_FILE_PREFIX, DEFAULT_HALFTOMO_TOLERANCE,
    DEFAULT_HISTOGRAM_BINS, DEFAULT_HISTOGRAM_EDGE_TOLERANCE, DEFAULT_PAGANIN_MARGIN_THRESHOLD,
};
use crate::engine::StepSet;
use crate::errors::ConfigError;
use crate::memory::MemoryBudget;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Complete description of one reconstruction job.
///
/// Loaded from YAML or TOML. Only `dataset` and `steps` are mandatory; every
/// other section falls back to defaults, and `validate_config` rejects
/// combinations that cannot run.
///
/// # Example
/// ```yaml
/// dataset:
///   n_angles: 1800
///   n_z: 2048
///   n_cols: 2048
///   flat_positions: [0, 1800]
///   n_darks: 1
/// steps: [read, flatfield, phase_retrieval, take_log, build_sino, reconstruction, write]
/// phase:
///   distance_m: 0.5
///   energy_kev: 35.0
///   delta_beta: 100.0
///   pixel_size_m: 1.0e-6
/// resources:
///   device:
///     available_bytes: 8589934592
///   host:
///     available_bytes: 68719476736
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconstructionConfig {
    pub dataset: DatasetConfig,
    pub steps: StepSet,
    #[serde(default)]
    pub phase: Option<PhaseOptions>,
    #[serde(default)]
    pub unsharp: Option<UnsharpOptions>,
    #[serde(default)]
    pub build_sino: SinoOptions,
    #[serde(default)]
    pub reconstruction: ReconstructionOptions,
    #[serde(default)]
    pub histogram: Option<HistogramOptions>,
    #[serde(default)]
    pub resources: ResourceOptions,
    #[serde(default)]
    pub output: OutputOptions,
}

/// Acquisition geometry, as discovered from the dataset metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetConfig {
    /// Number of projections
    pub n_angles: usize,
    /// Detector rows, i.e. height of the whole volume
    pub n_z: usize,
    /// Detector columns
    pub n_cols: usize,
    /// Acquisition index of each projection; defaults to `0..n_angles`
    #[serde(default)]
    pub projection_indices: Option<Vec<usize>>,
    /// Acquisition indices at which flat fields were taken
    #[serde(default)]
    pub flat_positions: Vec<usize>,
    #[serde(default)]
    pub n_darks: usize,
    /// Detector binning the reader applies
    #[serde(default)]
    pub binning: Binning,
    /// Keep one projection out of `subsampling`
    #[serde(default = "default_subsampling")]
    pub subsampling: usize,
}

/// Pixels averaged together by the reader, along detector rows and columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Binning {
    pub rows: usize,
    pub cols: usize,
}

impl Default for Binning {
    fn default() -> Self {
        Self { rows: 1, cols: 1 }
    }
}

/// How the reader reduces the acquisition before handing radios over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sampling {
    pub binning: Binning,
    pub subsampling: usize,
}

/// Shape of the radios the pipeline works on, once binned and subsampled.
///
/// Every row index the scheduler handles (tasks, margins, z-ranges) is a
/// row of this geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub n_angles: usize,
    pub n_z: usize,
    pub n_cols: usize,
}

impl DatasetConfig {
    /// Acquisition index of each processed projection.
    pub fn projection_indices(&self) -> Vec<usize> {
        let step = self.subsampling.max(1);
        match &self.projection_indices {
            Some(indices) => indices.iter().copied().step_by(step).collect(),
            None => (0..self.n_angles).step_by(step).collect(),
        }
    }

    pub fn sampling(&self) -> Sampling {
        Sampling {
            binning: self.binning,
            subsampling: self.subsampling,
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            n_angles: self.n_angles.div_ceil(self.subsampling.max(1)),
            n_z: self.n_z / self.binning.rows.max(1),
            n_cols: self.n_cols / self.binning.cols.max(1),
        }
    }

    pub fn n_flats(&self) -> usize {
        self.flat_positions.len()
    }
}

/// Paganin phase retrieval parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhaseOptions {
    pub distance_m: f64,
    pub energy_kev: f64,
    pub delta_beta: f64,
    pub pixel_size_m: f64,
    /// Kernel values below this fraction of the peak do not need support
    #[serde(default = "default_paganin_threshold")]
    pub margin_threshold: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnsharpOptions {
    pub sigma: f64,
    pub coeff: f64,
}

/// Sinogram building options.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinoOptions {
    /// Horizontal position of the rotation axis in pixels; defaults to the
    /// detector center
    #[serde(default)]
    pub rotation_axis_position: Option<f64>,
    #[serde(default)]
    pub enable_halftomo: bool,
    /// Minimum axis distance from the detector center for half-tomography
    #[serde(default = "default_halftomo_tolerance")]
    pub halftomo_tolerance: f64,
}

impl Default for SinoOptions {
    fn default() -> Self {
        Self {
            rotation_axis_position: None,
            enable_halftomo: false,
            halftomo_tolerance: DEFAULT_HALFTOMO_TOLERANCE,
        }
    }
}

impl SinoOptions {
    pub fn rotation_center(&self, n_cols: usize) -> f64 {
        self.rotation_axis_position
            .unwrap_or((n_cols as f64 - 1.0) / 2.0)
    }
}

/// Region to reconstruct. Horizontal bounds are inclusive like the slice
/// ROI of the reconstruction kernel; z bounds are a half-open row range.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReconstructionOptions {
    pub start_x: Option<usize>,
    pub end_x: Option<usize>,
    pub start_y: Option<usize>,
    pub end_y: Option<usize>,
    pub start_z: Option<usize>,
    pub end_z: Option<usize>,
}

/// Half-open slice region `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SliceRoi {
    pub x: (usize, usize),
    pub y: (usize, usize),
}

impl SliceRoi {
    pub fn shape(&self) -> (usize, usize) {
        (self.y.1 - self.y.0, self.x.1 - self.x.0)
    }
}

impl ReconstructionOptions {
    /// Slice region for sinograms `width` pixels wide.
    pub fn roi(&self, width: usize) -> SliceRoi {
        let last = width.saturating_sub(1);
        let x0 = self.start_x.unwrap_or(0);
        let x1 = self.end_x.unwrap_or(last) + 1;
        let y0 = self.start_y.unwrap_or(0);
        let y1 = self.end_y.unwrap_or(last) + 1;
        SliceRoi {
            x: (x0, x1),
            y: (y0, y1),
        }
    }

    pub fn z_range(&self, n_z: usize) -> (usize, usize) {
        (self.start_z.unwrap_or(0), self.end_z.unwrap_or(n_z))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistogramOptions {
    #[serde(default = "default_histogram_bins")]
    pub bins: usize,
    /// Fixed `[min, max]` value range shared by every partial histogram
    #[serde(default)]
    pub range: Option<[f64; 2]>,
    #[serde(default = "default_edge_tolerance")]
    pub edge_tolerance: f64,
}

/// What to do when the filter margin does not fit in a device chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginFallback {
    /// Keep the margin and stream oversized tasks through the limited-memory variant
    LimitedMemory,
    /// Use no margin; results near task boundaries lose accuracy
    #[default]
    DropMargin,
    /// Abort planning
    Fail,
}

/// Memory budgets and sizing overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceOptions {
    #[serde(default)]
    pub device: MemoryBudget,
    #[serde(default)]
    pub host: MemoryBudget,
    /// Device chunk size in rows, bypassing the estimator
    #[serde(default)]
    pub chunk_size: Option<usize>,
    /// Vertical margin in rows, bypassing the filter-derived one
    #[serde(default)]
    pub margin: Option<usize>,
    /// Process without any margin; sliding-window filters pad at chunk edges
    #[serde(default)]
    pub disable_margin: bool,
    #[serde(default)]
    pub on_insufficient_margin: MarginFallback,
    #[serde(default = "default_estimator_step")]
    pub estimator_step: usize,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            device: MemoryBudget::default(),
            host: MemoryBudget::default(),
            chunk_size: None,
            margin: None,
            disable_margin: false,
            on_insufficient_margin: MarginFallback::default(),
            estimator_step: DEFAULT_ESTIMATOR_STEP,
        }
    }
}

/// How per-task output files are named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputScheme {
    /// One file per task, prefix suffixed with the task's first slice index
    #[default]
    Mergeable,
    /// Numbered slices under the original prefix
    Standalone,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputOptions {
    #[serde(default)]
    pub location: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default)]
    pub scheme: OutputScheme,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            location: PathBuf::new(),
            file_prefix: default_file_prefix(),
            scheme: OutputScheme::default(),
        }
    }
}

fn default_subsampling() -> usize {
    1
}

fn default_paganin_threshold() -> f64 {
    DEFAULT_PAGANIN_MARGIN_THRESHOLD
}

fn default_halftomo_tolerance() -> f64 {
    DEFAULT_HALFTOMO_TOLERANCE
}

fn default_histogram_bins() -> usize {
    DEFAULT_HISTOGRAM_BINS
}

fn default_edge_tolerance() -> f64 {
    DEFAULT_HISTOGRAM_EDGE_TOLERANCE
}

fn default_estimator_step() -> usize {
    DEFAULT_ESTIMATOR_STEP
}

fn default_file_prefix() -> String {
    DEFAULT_FILE_PREFIX.to_string()
}

/// Load a config from a YAML or TOML file, chosen by extension.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ReconstructionConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
        "toml" => Ok(toml::from_str(&content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Load a config and reject it if it cannot run.
pub fn load_and_validate_config<P: AsRef<Path>>(
    path: P,
) -> Result<ReconstructionConfig, ConfigError> {
    let cfg = load_config(path)?;
    crate::config::validate_config(&cfg).map_err(ConfigError::Invalid)?;
    Ok(cfg)
}
