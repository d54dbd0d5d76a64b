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

//! Half-cell interpolation of staggered fields onto the T-grid
//! and the formulas of derived variables.
//!
//! Zero marks a dry cell, so averages only involve wet neighbours.

use crate::accelerator::catalogue::{Formula, Regrid};
use crate::constants::{EOS_ALPHA, EOS_BETA, EOS_S_0, EOS_T_0, RHO_0};
use crate::Float;
use ndarray::{Array4, Zip};

pub fn to_t_grid(field: &Array4<Float>, shift: Regrid) -> Array4<Float> {
    let (nt, nz, ny, nx) = field.dim();

    match shift {
        Regrid::None => field.clone(),
        Regrid::ShiftX => Array4::from_shape_fn((nt, nz, ny, nx), |(t, k, j, i)| {
            let west = if i == 0 { nx - 1 } else { i - 1 };
            wet_mean(field[[t, k, j, west]], field[[t, k, j, i]])
        }),
        Regrid::ShiftY => Array4::from_shape_fn((nt, nz, ny, nx), |(t, k, j, i)| {
            if j == 0 {
                field[[t, k, j, i]]
            } else {
                wet_mean(field[[t, k, j - 1, i]], field[[t, k, j, i]])
            }
        }),
        Regrid::ShiftZ => Array4::from_shape_fn((nt, nz, ny, nx), |(t, k, j, i)| {
            if k + 1 == nz {
                field[[t, k, j, i]]
            } else {
                wet_mean(field[[t, k, j, i]], field[[t, k + 1, j, i]])
            }
        }),
    }
}

fn wet_mean(a: Float, b: Float) -> Float {
    match (a == 0.0, b == 0.0) {
        (true, true) => 0.0,
        (true, false) => b,
        (false, true) => a,
        (false, false) => 0.5 * (a + b),
    }
}

/// Linear equation of state, zero where salinity is zero.
pub fn density(temperature: Float, salinity: Float) -> Float {
    if salinity == 0.0 {
        return 0.0;
    }

    RHO_0 * (1.0 - EOS_ALPHA * (temperature - EOS_T_0) + EOS_BETA * (salinity - EOS_S_0))
}

/// Applies the formula of a derived variable to its T-grid inputs.
///
/// On shape disagreement returns the offending and the expected shape.
pub fn combine(
    formula: Formula,
    inputs: &[Array4<Float>],
) -> Result<Array4<Float>, (Vec<usize>, Vec<usize>)> {
    let (first, second) = match inputs {
        [first, second] => (first, second),
        _ => return Err((vec![inputs.len()], vec![2])),
    };

    if first.dim() != second.dim() {
        return Err((second.shape().to_vec(), first.shape().to_vec()));
    }

    let combined = match formula {
        Formula::KineticEnergy => {
            Zip::from(first)
                .and(second)
                .map_collect(|&u, &v| 0.5 * (u * u + v * v))
        }
        Formula::Density => Zip::from(first).and(second).map_collect(|&t, &s| density(t, s)),
    };

    Ok(combined)
}
