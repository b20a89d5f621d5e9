// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use ndarray::{Array3, ArrayView3, ArrayViewMut3, Axis};

use crate::config::SinoOptions;
use crate::sino::{HalftomoError, HalftomoTransform};

/// Turns a stack of radios `(n_angles, rows, n_cols)` into a stack of
/// sinograms `(rows, angles, width)`, converting half-acquisitions on the way.
#[derive(Debug, Clone)]
pub struct SinoBuilder {
    n_angles: usize,
    n_cols: usize,
    rotation_center: f64,
    halftomo: Option<HalftomoTransform>,
}

impl SinoBuilder {
    pub fn new(n_angles: usize, n_cols: usize, options: &SinoOptions) -> Result<Self, HalftomoError> {
        let rotation_center = options.rotation_center(n_cols);
        let halftomo = if options.enable_halftomo {
            Some(HalftomoTransform::new(
                n_angles,
                n_cols,
                rotation_center,
                options.halftomo_tolerance,
            )?)
        } else {
            None
        };
        Ok(Self {
            n_angles,
            n_cols,
            rotation_center,
            halftomo,
        })
    }

    /// `(angles, width)` of one output sinogram.
    pub fn sino_shape(&self) -> (usize, usize) {
        match &self.halftomo {
            Some(t) => t.output_shape(),
            None => (self.n_angles, self.n_cols),
        }
    }

    pub fn output_shape(&self, rows: usize) -> [usize; 3] {
        let (angles, width) = self.sino_shape();
        [rows, angles, width]
    }

    /// Axis position the reconstructor must use for the built sinograms.
    pub fn rotation_center(&self) -> f64 {
        match &self.halftomo {
            Some(t) => t.output_rotation_center(),
            None => self.rotation_center,
        }
    }

    pub fn is_halftomo(&self) -> bool {
        self.halftomo.is_some()
    }

    pub fn build_into(
        &self,
        radios: ArrayView3<f32>,
        mut out: ArrayViewMut3<f32>,
    ) -> Result<(), HalftomoError> {
        let (angles, rows, cols) = radios.dim();
        if (angles, cols) != (self.n_angles, self.n_cols) {
            return Err(HalftomoError::ShapeMismatch {
                expected: vec![self.n_angles, rows, self.n_cols],
                actual: vec![angles, rows, cols],
            });
        }
        let expected = self.output_shape(rows);
        let (a, b, c) = out.dim();
        if [a, b, c] != expected {
            return Err(HalftomoError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: vec![a, b, c],
            });
        }

        for (z, target) in out.axis_iter_mut(Axis(0)).enumerate() {
            let sino = radios.index_axis(Axis(1), z);
            match &self.halftomo {
                Some(t) => t.apply(sino, target)?,
                None => {
                    let mut target = target;
                    target.assign(&sino);
                }
            }
        }
        Ok(())
    }

    pub fn build(&self, radios: ArrayView3<f32>) -> Result<Array3<f32>, HalftomoError> {
        let [a, b, c] = self.output_shape(radios.dim().1);
        let mut out = Array3::zeros((a, b, c));
        self.build_into(radios, out.view_mut())?;
        Ok(out)
    }
}
