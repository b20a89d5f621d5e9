// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The fixed, total order of processing steps and the set of enabled ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A named processing step. The declaration order is the execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Read,
    Flatfield,
    DoubleFlatfield,
    CcdCorrection,
    PhaseRetrieval,
    UnsharpMask,
    TakeLog,
    RadiosMovement,
    SinoNormalization,
    BuildSino,
    Reconstruction,
    Histogram,
    Write,
}

/// Which array a step works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDomain {
    /// Projections `(n_angles, rows, cols)`.
    Projection,
    /// Sinograms `(rows, n_angles, cols)`.
    Sinogram,
    /// Reconstructed slices and their by-products.
    Volume,
}

impl Step {
    pub const ALL: [Step; 13] = [
        Step::Read,
        Step::Flatfield,
        Step::DoubleFlatfield,
        Step::CcdCorrection,
        Step::PhaseRetrieval,
        Step::UnsharpMask,
        Step::TakeLog,
        Step::RadiosMovement,
        Step::SinoNormalization,
        Step::BuildSino,
        Step::Reconstruction,
        Step::Histogram,
        Step::Write,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::Read => "read",
            Step::Flatfield => "flatfield",
            Step::DoubleFlatfield => "double_flatfield",
            Step::CcdCorrection => "ccd_correction",
            Step::PhaseRetrieval => "phase_retrieval",
            Step::UnsharpMask => "unsharp_mask",
            Step::TakeLog => "take_log",
            Step::RadiosMovement => "radios_movement",
            Step::SinoNormalization => "sino_normalization",
            Step::BuildSino => "build_sino",
            Step::Reconstruction => "reconstruction",
            Step::Histogram => "histogram",
            Step::Write => "write",
        }
    }

    /// Position in the total order.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn domain(self) -> StepDomain {
        match self {
            Step::Read
            | Step::Flatfield
            | Step::DoubleFlatfield
            | Step::CcdCorrection
            | Step::PhaseRetrieval
            | Step::UnsharpMask
            | Step::TakeLog
            | Step::RadiosMovement => StepDomain::Projection,
            Step::SinoNormalization | Step::BuildSino => StepDomain::Sinogram,
            Step::Reconstruction | Step::Histogram | Step::Write => StepDomain::Volume,
        }
    }

    /// Sliding-window filters that need rows around the chunk.
    pub fn needs_margin(self) -> bool {
        matches!(self, Step::PhaseRetrieval | Step::UnsharpMask)
    }

    /// The step that must also be enabled for this one to run, if any.
    pub fn prerequisite(self) -> Option<Step> {
        match self {
            Step::Reconstruction => Some(Step::BuildSino),
            Step::Histogram | Step::Write => Some(Step::Reconstruction),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of enabled steps, always iterated in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepSet(BTreeSet<Step>);

impl StepSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn all() -> Self {
        Self(Step::ALL.iter().copied().collect())
    }

    pub fn insert(&mut self, step: Step) {
        self.0.insert(step);
    }

    pub fn remove(&mut self, step: Step) {
        self.0.remove(&step);
    }

    pub fn contains(&self, step: Step) -> bool {
        self.0.contains(&step)
    }

    pub fn iter(&self) -> impl Iterator<Item = Step> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Enabled steps belonging to `domain`, in order.
    pub fn in_domain(&self, domain: StepDomain) -> Vec<Step> {
        self.iter().filter(|s| s.domain() == domain).collect()
    }

    /// Whether any margin-consuming filter is enabled.
    pub fn uses_margin(&self) -> bool {
        self.iter().any(Step::needs_margin)
    }

    /// The step after which the margin crop happens: unsharp mask if present,
    /// since it must see the uncropped edges, otherwise phase retrieval.
    pub fn crop_step(&self) -> Option<Step> {
        self.iter().filter(|s| s.needs_margin()).last()
    }

    /// Steps whose prerequisite is missing, as `(step, requires)` pairs.
    pub fn missing_prerequisites(&self) -> Vec<(Step, Step)> {
        self.iter()
            .filter_map(|s| s.prerequisite().map(|p| (s, p)))
            .filter(|(_, p)| !self.contains(*p))
            .collect()
    }
}

impl FromIterator<Step> for StepSet {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<Step>> for StepSet {
    fn from(steps: Vec<Step>) -> Self {
        steps.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_follows_declared_order() {
        let set: StepSet = vec![Step::Write, Step::Read, Step::TakeLog, Step::Flatfield].into();
        let order: Vec<Step> = set.iter().collect();
        assert_eq!(
            order,
            vec![Step::Read, Step::Flatfield, Step::TakeLog, Step::Write]
        );
    }

    #[test]
    fn test_crop_step_prefers_unsharp_mask() {
        let both: StepSet = vec![Step::Read, Step::PhaseRetrieval, Step::UnsharpMask].into();
        assert_eq!(both.crop_step(), Some(Step::UnsharpMask));

        let phase_only: StepSet = vec![Step::Read, Step::PhaseRetrieval].into();
        assert_eq!(phase_only.crop_step(), Some(Step::PhaseRetrieval));

        let none: StepSet = vec![Step::Read, Step::TakeLog].into();
        assert_eq!(none.crop_step(), None);
        assert!(!none.uses_margin());
    }

    #[test]
    fn test_missing_prerequisites() {
        let set: StepSet = vec![Step::Read, Step::Reconstruction, Step::Histogram].into();
        assert_eq!(
            set.missing_prerequisites(),
            vec![(Step::Reconstruction, Step::BuildSino)]
        );

        let complete: StepSet = vec![
            Step::Read,
            Step::BuildSino,
            Step::Reconstruction,
            Step::Histogram,
            Step::Write,
        ]
        .into();
        assert!(complete.missing_prerequisites().is_empty());
    }

    #[test]
    fn test_steps_deserialize_from_snake_case() {
        let set: StepSet =
            serde_yaml::from_str("[read, flatfield, phase_retrieval, build_sino]").unwrap();
        assert!(set.contains(Step::PhaseRetrieval));
        assert_eq!(set.len(), 4);
        assert_eq!(Step::CcdCorrection.to_string(), "ccd_correction");
    }
}
