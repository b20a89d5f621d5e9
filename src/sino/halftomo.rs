// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Half-tomography sinogram conversion.
//!
//! In a half-acquisition the rotation axis sits near one edge of the
//! detector, so each projection only sees half of the object. Over a full
//! turn, the projection at angle `θ + π` sees the other half, mirrored.
//! Pairing the first half of the angles with the column-reversed second half
//! yields a sinogram of half as many angles but nearly twice the width:
//!
//! ```text
//!  output column   0 ........... r ........ n_cols ........ 2r
//!                  |   sino1     |  blend    |    sino2     |
//! ```
//!
//! Over the overlap `[r, n_cols)` the two halves are blended with a weight
//! ramping linearly from 0 to 1 so no seam is visible. When the axis is left
//! of the detector center the sinogram is mirrored, converted, and mirrored
//! back, so the conversion itself only handles a right-hand axis.

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2, Axis};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HalftomoError {
    #[error("Half-tomography needs an even number of projections, got {n_angles}")]
    OddAngleCount { n_angles: usize },

    #[error(
        "Rotation axis {rotation_center} is within {tolerance} px of the detector center {detector_center}"
    )]
    AxisAtDetectorCenter {
        rotation_center: f64,
        detector_center: f64,
        tolerance: f64,
    },

    #[error("Rotation axis {rotation_center} lies outside a detector of {n_cols} columns")]
    AxisOutsideDetector { rotation_center: f64, n_cols: usize },

    #[error("Sinogram shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Axis position in the right-hand frame, and whether mirroring was needed.
fn right_hand_axis(n_cols: usize, rotation_center: f64) -> (usize, bool) {
    let detector_center = (n_cols as f64 - 1.0) / 2.0;
    let r = rotation_center.round().max(0.0) as usize;
    if rotation_center < detector_center {
        ((n_cols - 1).saturating_sub(r), true)
    } else {
        (r, false)
    }
}

/// Width of the converted sinogram for an axis at `rotation_center`.
pub fn halftomo_output_width(n_cols: usize, rotation_center: f64) -> usize {
    2 * right_hand_axis(n_cols, rotation_center).0
}

/// A half-tomography conversion for fixed sinogram dimensions.
#[derive(Debug, Clone)]
pub struct HalftomoTransform {
    n_angles: usize,
    n_cols: usize,
    /// Axis in the right-hand frame
    r: usize,
    mirrored: bool,
    weights: Vec<f32>,
}

impl HalftomoTransform {
    pub fn new(
        n_angles: usize,
        n_cols: usize,
        rotation_center: f64,
        tolerance: f64,
    ) -> Result<Self, HalftomoError> {
        if n_angles % 2 != 0 {
            return Err(HalftomoError::OddAngleCount { n_angles });
        }
        if !(0.0..n_cols as f64).contains(&rotation_center) {
            return Err(HalftomoError::AxisOutsideDetector {
                rotation_center,
                n_cols,
            });
        }
        let detector_center = (n_cols as f64 - 1.0) / 2.0;
        let (r, mirrored) = right_hand_axis(n_cols, rotation_center);
        // an integer axis on the center of an odd detector has no overlap to blend
        if (rotation_center - detector_center).abs() < tolerance || 2 * r < n_cols {
            return Err(HalftomoError::AxisAtDetectorCenter {
                rotation_center,
                detector_center,
                tolerance,
            });
        }
        if r >= n_cols {
            return Err(HalftomoError::AxisOutsideDetector {
                rotation_center,
                n_cols,
            });
        }

        let d = n_cols - r;
        let weights = if d == 1 {
            vec![0.0]
        } else {
            (0..d).map(|i| i as f32 / (d - 1) as f32).collect()
        };

        Ok(Self {
            n_angles,
            n_cols,
            r,
            mirrored,
            weights,
        })
    }

    /// `(n_angles / 2, 2r)`
    pub fn output_shape(&self) -> (usize, usize) {
        (self.n_angles / 2, 2 * self.r)
    }

    pub fn input_shape(&self) -> (usize, usize) {
        (self.n_angles, self.n_cols)
    }

    /// Rotation axis position in the converted sinogram.
    pub fn output_rotation_center(&self) -> f64 {
        self.r as f64
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    /// Converts `sino` into `out`.
    pub fn apply(&self, sino: ArrayView2<f32>, out: ArrayViewMut2<f32>) -> Result<(), HalftomoError> {
        check_shape(self.input_shape(), sino.dim())?;
        check_shape(self.output_shape(), out.dim())?;
        if self.mirrored {
            self.convert(sino.slice(s![.., ..;-1]), out.slice_move(s![.., ..;-1]));
        } else {
            self.convert(sino, out);
        }
        Ok(())
    }

    pub fn transform(&self, sino: ArrayView2<f32>) -> Result<Array2<f32>, HalftomoError> {
        let mut out = Array2::zeros(self.output_shape());
        self.apply(sino, out.view_mut())?;
        Ok(out)
    }

    fn convert(&self, sino: ArrayView2<f32>, mut out: ArrayViewMut2<f32>) {
        let half = self.n_angles / 2;
        let n = self.n_cols;
        let r = self.r;
        // sino2 column j lands on output column j + offset
        let offset = 2 * r - n;

        let sino1 = sino.slice(s![..half, ..]);
        let sino2 = sino.slice(s![half.., ..;-1]);

        out.slice_mut(s![.., ..r]).assign(&sino1.slice(s![.., ..r]));

        for (i, c) in (r..n).enumerate() {
            let w = self.weights[i];
            let mut column = out.index_axis_mut(Axis(1), c);
            let a = sino1.index_axis(Axis(1), c);
            let b = sino2.index_axis(Axis(1), c - offset);
            ndarray::Zip::from(&mut column)
                .and(&a)
                .and(&b)
                .for_each(|o, &x, &y| *o = (1.0 - w) * x + w * y);
        }

        out.slice_mut(s![.., n..])
            .assign(&sino2.slice(s![.., n - offset..]));
    }
}

fn check_shape(expected: (usize, usize), actual: (usize, usize)) -> Result<(), HalftomoError> {
    if expected != actual {
        return Err(HalftomoError::ShapeMismatch {
            expected: vec![expected.0, expected.1],
            actual: vec![actual.0, actual.1],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn ramp(n_angles: usize, n_cols: usize) -> Array2<f32> {
        Array2::from_shape_fn((n_angles, n_cols), |(a, c)| (a * 1000 + c) as f32)
    }

    #[test]
    fn test_output_width_is_twice_axis() {
        let t = HalftomoTransform::new(4, 512, 300.0, 1.0).unwrap();
        assert_eq!(t.output_shape(), (2, 600));
        assert_eq!(halftomo_output_width(512, 300.0), 600);
        assert!(!t.is_mirrored());
    }

    #[test]
    fn test_axis_on_detector_center_is_rejected() {
        assert!(matches!(
            HalftomoTransform::new(4, 511, 255.0, 1.0),
            Err(HalftomoError::AxisAtDetectorCenter { .. })
        ));
        // even without tolerance there is nothing to blend
        assert!(matches!(
            HalftomoTransform::new(4, 511, 255.0, 0.0),
            Err(HalftomoError::AxisAtDetectorCenter { .. })
        ));
        assert!(matches!(
            HalftomoTransform::new(4, 512, 256.0, 1.0),
            Err(HalftomoError::AxisAtDetectorCenter { .. })
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(
            HalftomoTransform::new(5, 512, 300.0, 1.0).unwrap_err(),
            HalftomoError::OddAngleCount { n_angles: 5 }
        );
        assert!(matches!(
            HalftomoTransform::new(4, 512, 512.0, 1.0),
            Err(HalftomoError::AxisOutsideDetector { .. })
        ));
    }

    #[test]
    fn test_regions_of_the_core_case() {
        let (n_angles, n_cols, r) = (4, 8, 6);
        let sino = ramp(n_angles, n_cols);
        let t = HalftomoTransform::new(n_angles, n_cols, r as f64, 1.0).unwrap();
        let out = t.transform(sino.view()).unwrap();
        assert_eq!(out.dim(), (2, 12));

        // offset = 2r - n = 4; sino2[a, j] = sino[a + 2, n - 1 - j]
        let sino2 = |a: usize, j: usize| sino[[a + 2, n_cols - 1 - j]];
        for a in 0..2 {
            for c in 0..r {
                assert_eq!(out[[a, c]], sino[[a, c]]);
            }
            // overlap [6, 8): weights 0 then 1
            assert_eq!(out[[a, 6]], sino[[a, 6]]);
            assert_eq!(out[[a, 7]], sino2(a, 3));
            for c in 8..12 {
                assert_eq!(out[[a, c]], sino2(a, c - 4));
            }
        }
    }

    #[test]
    fn test_symmetric_input_blends_to_itself() {
        // sino2 shifted equals sino1 everywhere when each row is constant
        // and both halves of the angles agree
        let n_cols = 16;
        let sino = Array2::from_shape_fn((6, n_cols), |(a, _)| (a % 3) as f32 + 1.0);
        let t = HalftomoTransform::new(6, n_cols, 11.0, 1.0).unwrap();
        let out = t.transform(sino.view()).unwrap();
        for a in 0..3 {
            for c in 11..n_cols {
                assert!((out[[a, c]] - sino[[a, c]]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_mirror_case_matches_reversed_core_case() {
        let (n_angles, n_cols) = (4, 10);
        let sino = ramp(n_angles, n_cols);
        let left = HalftomoTransform::new(n_angles, n_cols, 2.0, 1.0).unwrap();
        assert!(left.is_mirrored());
        assert_eq!(left.output_shape(), (2, 14));

        let reversed = sino.slice(s![.., ..;-1]).to_owned();
        let right = HalftomoTransform::new(n_angles, n_cols, 7.0, 1.0).unwrap();
        let expected = right.transform(reversed.view()).unwrap();

        let out = left.transform(sino.view()).unwrap();
        assert_eq!(out, expected.slice(s![.., ..;-1]));
    }

    #[test]
    fn test_wrong_output_shape_is_reported() {
        let t = HalftomoTransform::new(4, 8, 6.0, 1.0).unwrap();
        let sino = ramp(4, 8);
        let mut out = Array2::zeros((2, 11));
        assert!(matches!(
            t.apply(sino.view(), out.view_mut()),
            Err(HalftomoError::ShapeMismatch { .. })
        ));
    }
}
