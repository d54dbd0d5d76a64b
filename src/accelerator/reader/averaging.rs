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
//! Masked averaging operators over `(time, z, y, x)` fields.
//!
//! Every operator takes the wet mask of the field next to its values.
//! A cell contributes to an average only when it is wet there and has
//! positive grid weight, so a wet cell holding zero (a metric product
//! equal to its reference, say) still counts. Averages over no
//! contributing cells are zero.

use crate::accelerator::catalogue::Dimensionality;
use crate::accelerator::domain::Grid;
use crate::{errors::ReaderError, Float};
use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView3, Axis, Zip};

/// Wet mask of raw model output, where dry cells are exactly zero.
pub fn wet_cells(field: &Array4<Float>) -> Array4<bool> {
    field.mapv(|v| v != 0.0)
}

/// Mean over time of every cell.
pub fn timemean(field: &Array4<Float>, wet: &Array4<bool>) -> Result<Array3<Float>, ReaderError> {
    check_mask(field, wet)?;

    let (_, nz, ny, nx) = field.dim();
    let mut sums = Array3::<Float>::zeros((nz, ny, nx));
    let mut counts = Array3::<Float>::zeros((nz, ny, nx));

    for (snapshot, wet) in field.axis_iter(Axis(0)).zip(wet.axis_iter(Axis(0))) {
        Zip::from(&mut sums)
            .and(&mut counts)
            .and(&snapshot)
            .and(&wet)
            .for_each(|sum, count, &v, &is_wet| {
                if is_wet {
                    *sum += v;
                    *count += 1.0;
                }
            });
    }

    Ok(Zip::from(&sums)
        .and(&counts)
        .map_collect(|&sum, &count| if count > 0.0 { sum / count } else { 0.0 }))
}

/// Weighted spatial mean of every time record, optionally limited
/// to the inclusive level range `levels`.
pub fn spacemean(
    field: &Array4<Float>,
    wet: &Array4<bool>,
    grid: &Grid,
    dim: Dimensionality,
    levels: Option<(usize, usize)>,
) -> Result<Array1<Float>, ReaderError> {
    check_mask(field, wet)?;
    let weights = weights_for(field, grid, dim)?;
    let (z1, z2) = levels.unwrap_or((0, weights.dim().0 - 1));

    let weights = weights.slice(s![z1..=z2, .., ..]);

    let means = field
        .axis_iter(Axis(0))
        .zip(wet.axis_iter(Axis(0)))
        .map(|(snapshot, wet)| {
            weighted_mean(
                &snapshot.slice(s![z1..=z2, .., ..]),
                &wet.slice(s![z1..=z2, .., ..]),
                &weights,
            )
        })
        .collect();

    Ok(means)
}

/// Weighted mean over space and time.
pub fn globalmean(
    field: &Array4<Float>,
    wet: &Array4<bool>,
    grid: &Grid,
    dim: Dimensionality,
    levels: Option<(usize, usize)>,
) -> Result<Float, ReaderError> {
    check_mask(field, wet)?;
    let weights = weights_for(field, grid, dim)?;
    let (z1, z2) = levels.unwrap_or((0, weights.dim().0 - 1));

    let weights = weights.slice(s![z1..=z2, .., ..]);

    let (mut total, mut norm) = (0.0, 0.0);
    for (snapshot, wet) in field.axis_iter(Axis(0)).zip(wet.axis_iter(Axis(0))) {
        let (t, n) = weighted_sums(
            &snapshot.slice(s![z1..=z2, .., ..]),
            &wet.slice(s![z1..=z2, .., ..]),
            &weights,
        );
        total += t;
        norm += n;
    }

    Ok(if norm > 0.0 { total / norm } else { 0.0 })
}

/// Area-weighted mean of every level of every time record, `(time, z)`.
pub fn horizontal_mean(
    field: &Array4<Float>,
    wet: &Array4<bool>,
    grid: &Grid,
) -> Result<Array2<Float>, ReaderError> {
    check_shape(field, grid.shape())?;
    check_mask(field, wet)?;
    let areas = grid.level_areas();
    let (nt, nz, _, _) = field.dim();

    Ok(Array2::from_shape_fn((nt, nz), |(t, k)| {
        weighted_mean(
            &field.slice(s![t, k..=k, .., ..]),
            &wet.slice(s![t, k..=k, .., ..]),
            &areas.slice(s![k..=k, .., ..]),
        )
    }))
}

/// Area-weighted mean of every level over all time records.
pub fn profile(
    field: &Array4<Float>,
    wet: &Array4<bool>,
    grid: &Grid,
) -> Result<Array1<Float>, ReaderError> {
    check_shape(field, grid.shape())?;
    check_mask(field, wet)?;
    let areas = grid.level_areas();
    let (nt, nz, _, _) = field.dim();

    Ok(Array1::from_shape_fn(nz, |k| {
        let weights = areas.slice(s![k..=k, .., ..]);
        let (mut total, mut norm) = (0.0, 0.0);

        for t in 0..nt {
            let (sum, n) = weighted_sums(
                &field.slice(s![t, k..=k, .., ..]),
                &wet.slice(s![t, k..=k, .., ..]),
                &weights,
            );
            total += sum;
            norm += n;
        }

        if norm > 0.0 {
            total / norm
        } else {
            0.0
        }
    }))
}

/// Thickness-weighted column mean over all time records, `(y, x)`.
pub fn column_mean(
    field: &Array4<Float>,
    wet: &Array4<bool>,
    grid: &Grid,
) -> Result<Array2<Float>, ReaderError> {
    check_shape(field, grid.shape())?;
    check_mask(field, wet)?;
    let thickness = &grid.dz * &grid.tmask;
    let (nt, _, ny, nx) = field.dim();

    Ok(Array2::from_shape_fn((ny, nx), |(j, i)| {
        let weights = thickness.slice(s![.., j..=j, i..=i]);
        let (mut total, mut norm) = (0.0, 0.0);

        for t in 0..nt {
            let (sum, n) = weighted_sums(
                &field.slice(s![t, .., j..=j, i..=i]),
                &wet.slice(s![t, .., j..=j, i..=i]),
                &weights,
            );
            total += sum;
            norm += n;
        }

        if norm > 0.0 {
            total / norm
        } else {
            0.0
        }
    }))
}

/// Centred moving average of odd `window` with edge padding.
///
/// The first and last `window / 2` samples lean on padded
/// values, consumers discard them.
pub fn movave(series: &[Float], window: usize) -> Vec<Float> {
    if series.is_empty() || window <= 1 {
        return series.to_vec();
    }

    let half = window / 2;
    let last = series.len() - 1;

    (0..series.len())
        .map(|n| {
            let sum: Float = (0..window)
                .map(|w| {
                    let index = (n + w).saturating_sub(half).min(last);
                    series[index]
                })
                .sum();
            sum / window as Float
        })
        .collect()
}

/// Running mean of all samples up to and including each one.
pub fn cumave(series: &[Float]) -> Vec<Float> {
    let mut total = 0.0;

    series
        .iter()
        .enumerate()
        .map(|(n, v)| {
            total += v;
            total / (n + 1) as Float
        })
        .collect()
}

fn weights_for(
    field: &Array4<Float>,
    grid: &Grid,
    dim: Dimensionality,
) -> Result<Array3<Float>, ReaderError> {
    match dim {
        Dimensionality::Volume => {
            check_shape(field, grid.shape())?;
            Ok(grid.volume.clone())
        }
        Dimensionality::Surface => {
            let (ny, nx) = grid.area.dim();
            check_shape(field, (1, ny, nx))?;
            Ok(grid.area.clone().insert_axis(Axis(0)))
        }
    }
}

fn check_shape(field: &Array4<Float>, expected: (usize, usize, usize)) -> Result<(), ReaderError> {
    let (_, nz, ny, nx) = field.dim();

    if (nz, ny, nx) != expected {
        return Err(ReaderError::GridMismatch {
            found: vec![nz, ny, nx],
            expected: vec![expected.0, expected.1, expected.2],
        });
    }

    Ok(())
}

fn check_mask(field: &Array4<Float>, wet: &Array4<bool>) -> Result<(), ReaderError> {
    if field.dim() != wet.dim() {
        return Err(ReaderError::GridMismatch {
            found: wet.shape().to_vec(),
            expected: field.shape().to_vec(),
        });
    }

    Ok(())
}

fn weighted_sums(
    values: &ArrayView3<Float>,
    wet: &ArrayView3<bool>,
    weights: &ArrayView3<Float>,
) -> (Float, Float) {
    values
        .iter()
        .zip(wet.iter())
        .zip(weights.iter())
        .filter(|((_, is_wet), w)| **is_wet && **w > 0.0)
        .fold((0.0, 0.0), |(total, norm), ((v, _), w)| (total + v * w, norm + w))
}

fn weighted_mean(
    values: &ArrayView3<Float>,
    wet: &ArrayView3<bool>,
    weights: &ArrayView3<Float>,
) -> Float {
    let (total, norm) = weighted_sums(values, wet, weights);

    if norm > 0.0 {
        total / norm
    } else {
        0.0
    }
}
