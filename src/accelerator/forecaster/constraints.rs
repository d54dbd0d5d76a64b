/*
Copyright 2021 Jakub Lewandowski

This file is part of Ocean Spin-up Accelerator (OSA).

Ocean Spin-up Accelerator (OSA) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

Ocean Spin-up Accelerator (OSA) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with Ocean Spin-up Accelerator (OSA). If not, see https://www.gnu.org/licenses/.
*/

//! Physical admissibility of forecast fields.

use crate::accelerator::catalogue::Bounds;
use crate::Float;
use ndarray::{Array3, Zip};

/// Count of wet cells clamped to a bound.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct ClipReport {
    pub clipped: usize,
    pub wet: usize,
}

impl ClipReport {
    pub fn fraction(&self) -> Float {
        if self.wet == 0 {
            0.0
        } else {
            self.clipped as Float / self.wet as Float
        }
    }
}

/// Zeroes the cells that are dry in `original` and clamps
/// the remaining ones into `bounds`.
pub fn enforce(field: &mut Array3<Float>, original: &Array3<Float>, bounds: Bounds) -> ClipReport {
    let mut report = ClipReport::default();

    Zip::from(field).and(original).for_each(|value, &reference| {
        if reference == 0.0 {
            *value = 0.0;
            return;
        }

        report.wet += 1;

        let mut clamped = *value;
        if let Some(min) = bounds.min {
            clamped = clamped.max(min);
        }
        if let Some(max) = bounds.max {
            clamped = clamped.min(max);
        }
        if !clamped.is_finite() {
            clamped = reference;
        }

        if clamped != *value {
            report.clipped += 1;
            *value = clamped;
        }
    });

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::catalogue::lookup;
    use float_cmp::approx_eq;

    #[test]
    fn clamps_and_masks() {
        let original = Array3::from_shape_vec((1, 1, 4), vec![0.0, 35.0, 35.0, 35.0]).unwrap();
        let mut field = Array3::from_shape_vec((1, 1, 4), vec![5.0, -3.0, 120.0, 36.0]).unwrap();

        let report = enforce(&mut field, &original, lookup("so").unwrap().bounds);

        assert_eq!(field.into_raw_vec(), vec![0.0, 0.0, 100.0, 36.0]);
        assert_eq!(report, ClipReport { clipped: 2, wet: 3 });
        assert!(approx_eq!(Float, report.fraction(), 2.0 / 3.0));
    }

    #[test]
    fn temperature_floor_only() {
        let original = Array3::from_elem((1, 1, 2), 4.0);
        let mut field = Array3::from_shape_vec((1, 1, 2), vec![-4.0, 40.0]).unwrap();

        let report = enforce(&mut field, &original, lookup("thetao").unwrap().bounds);

        assert!(approx_eq!(Float, field[[0, 0, 0]], -2.5));
        assert!(approx_eq!(Float, field[[0, 0, 1]], 40.0));
        assert_eq!(report.clipped, 1);
    }

    #[test]
    fn non_finite_values_fall_back() {
        let original = Array3::from_elem((1, 1, 1), 0.3);
        let mut field = Array3::from_elem((1, 1, 1), Float::NAN);

        let report = enforce(&mut field, &original, lookup("wo").unwrap().bounds);

        assert!(approx_eq!(Float, field[[0, 0, 0]], 0.3));
        assert_eq!(report.clipped, 1);
        assert_eq!(ClipReport::default().fraction(), 0.0);
    }
}
