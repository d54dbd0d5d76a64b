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

//! Forecast kernels. Each one turns past information about a
//! variable into a single predicted `(z, y, x)` field.

use super::regression::LinearFit;
use super::Mode;
use crate::accelerator::catalogue::Dimensionality;
use crate::accelerator::domain::Grid;
use crate::accelerator::eof::EofProduct;
use crate::accelerator::reader::averaging::{globalmean, spacemean, timemean, wet_cells};
use crate::{errors::ForecastError, Float};
use log::{debug, info};
use ndarray::{Array3, Array4, Axis, Zip};

/// Recomposes the EOF modes at `foreyear`.
///
/// In `Full` mode every coefficient series is extrapolated linearly,
/// in `Reco` mode the coefficients of the last winter are used.
pub fn eof(product: &EofProduct, mode: Mode, foreyear: i32) -> Result<Array3<Float>, ForecastError> {
    let years: Vec<Float> = product.years.iter().map(|&y| Float::from(y)).collect();

    let coefficients = product
        .tseries
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(k, series)| {
            let series = series.to_vec();

            match mode {
                Mode::Full => LinearFit::fit(&years, &series)
                    .map(|fit| fit.eval(Float::from(foreyear)))
                    .ok_or_else(|| ForecastError::NotEnoughSamples(format!("{} mode {}", product.label, k))),
                Mode::Reco => series
                    .last()
                    .copied()
                    .ok_or_else(|| ForecastError::NotEnoughSamples(format!("{} mode {}", product.label, k))),
            }
        })
        .collect::<Result<Vec<Float>, ForecastError>>()?;

    debug!("{} coefficients at {}: {:?}", product.label, foreyear, coefficients);

    Ok(product.compose(&coefficients))
}

/// Kind of local adjustment applied after fitting the global mean.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum GlobalAdjustment {
    /// Every wet cell is shifted by the change of the global mean.
    Shift,
    /// Every wet cell is scaled by `1 ± r`, `r` being the relative
    /// change of the global mean, on the sign of its recent anomaly.
    Scale,
}

/// Fits the weighted global mean of the annual means linearly in time.
pub fn global_mean(
    years: &[i32],
    annual: &Array4<Float>,
    grid: &Grid,
    dim: Dimensionality,
    foreyear: i32,
    adjustment: GlobalAdjustment,
    label: &str,
) -> Result<Array3<Float>, ForecastError> {
    let wet = wet_cells(annual);
    let means = spacemean(annual, &wet, grid, dim, None)?;
    let x: Vec<Float> = years.iter().map(|&y| Float::from(y)).collect();

    let fit = LinearFit::fit(&x, &means.to_vec())
        .ok_or_else(|| ForecastError::NotEnoughSamples(label.to_string()))?;

    let current = means.iter().last().copied().unwrap_or(0.0);
    let forecast = fit.eval(Float::from(foreyear));
    let delta = forecast - current;

    info!(
        "Global mean of {} is {:.4} over the window, goes from {:.4} to {:.4} at {}",
        label,
        globalmean(annual, &wet, grid, dim, None)?,
        current,
        forecast,
        foreyear
    );

    let last = annual.index_axis(Axis(0), annual.dim().0 - 1).to_owned();

    let field = match adjustment {
        GlobalAdjustment::Shift => last.mapv(|v| if v == 0.0 { 0.0 } else { v + delta }),
        GlobalAdjustment::Scale => {
            let ratio = if forecast == 0.0 {
                0.0
            } else {
                (delta / forecast).abs()
            };
            let climatology = timemean(annual, &wet)?;

            let mut field = last.clone();
            Zip::from(&mut field)
                .and(&climatology)
                .for_each(|v, &c| {
                    if *v != 0.0 {
                        let factor = if *v - c >= 0.0 { 1.0 + ratio } else { 1.0 - ratio };
                        *v *= factor;
                    }
                });
            field
        }
    };

    Ok(field)
}

/// Per-cell linear extrapolation of the annual means.
///
/// Where the projection falls below `floor` the last annual mean
/// of the cell is kept. Returns the field and the count of such cells.
pub fn pointwise(
    years: &[i32],
    annual: &Array4<Float>,
    foreyear: i32,
    floor: Option<Float>,
) -> Result<(Array3<Float>, usize), ForecastError> {
    let (nt, nz, ny, nx) = annual.dim();
    if nt < 2 || years.len() != nt {
        return Err(ForecastError::NotEnoughSamples("pointwise fit".to_string()));
    }

    let x: Vec<Float> = years.iter().map(|&y| Float::from(y)).collect();
    let mut field = Array3::<Float>::zeros((nz, ny, nx));
    let mut fallback = Array3::<u8>::zeros((nz, ny, nx));

    Zip::indexed(&mut field)
        .and(&mut fallback)
        .par_for_each(|(k, j, i), value, fell_back| {
            let series: Vec<Float> = (0..nt).map(|t| annual[[t, k, j, i]]).collect();
            let last = series[nt - 1];

            if last == 0.0 {
                *value = 0.0;
                return;
            }

            let projected = LinearFit::fit(&x, &series)
                .map(|fit| fit.eval(Float::from(foreyear)))
                .unwrap_or(last);

            *value = match floor {
                Some(floor) if projected < floor => {
                    *fell_back = 1;
                    last
                }
                _ => projected,
            };
        });

    let count = fallback.iter().filter(|f| **f == 1).count();
    Ok((field, count))
}

/// `now + leap (now - earlier) / window`, dry where `now` is dry.
pub fn interpolation(
    now: &Array3<Float>,
    earlier: &Array3<Float>,
    window: u32,
    leap: u32,
) -> Array3<Float> {
    let rate = Float::from(leap) / Float::from(window.max(1));

    Zip::from(now)
        .and(earlier)
        .map_collect(|&n, &e| if n == 0.0 { 0.0 } else { n + rate * (n - e) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::domain::tests::sample_grid;
    use float_cmp::approx_eq;
    use ndarray::{Array1, Array2};

    fn linear_annual(nz: usize, ny: usize, nx: usize) -> (Vec<i32>, Array4<Float>) {
        let years: Vec<i32> = (1991..=2000).collect();
        let annual = Array4::from_shape_fn((10, nz, ny, nx), |(t, k, j, i)| {
            if j == 0 && i == 0 {
                0.0
            } else {
                5.0 + k as Float + 0.1 * t as Float
            }
        });
        (years, annual)
    }

    #[test]
    fn eof_modes() {
        let product = EofProduct {
            label: "thetao".to_string(),
            years: vec![1991, 1992, 1993],
            climatology: Array3::from_shape_vec((1, 1, 2), vec![0.0, 10.0]).unwrap(),
            patterns: Array4::from_shape_vec((1, 1, 1, 2), vec![0.0, 1.0]).unwrap(),
            variances: Array1::from(vec![1.0]),
            tseries: Array2::from_shape_vec((1, 3), vec![-1.0, 0.0, 1.0]).unwrap(),
        };

        let full = eof(&product, Mode::Full, 2003).unwrap();
        assert!(approx_eq!(Float, full[[0, 0, 1]], 21.0, epsilon = 1e-9));
        assert!(approx_eq!(Float, full[[0, 0, 0]], 0.0));

        let reco = eof(&product, Mode::Reco, 1993).unwrap();
        assert!(approx_eq!(Float, reco[[0, 0, 1]], 11.0));
    }

    #[test]
    fn global_mean_adjustments() {
        let grid = sample_grid(2, 2, 2);
        let (years, annual) = linear_annual(2, 2, 2);

        // the global mean grows by 0.1 per year, 20 years ahead
        let shifted = global_mean(&years, &annual, &grid, Dimensionality::Volume, 2020, GlobalAdjustment::Shift, "thetao").unwrap();
        assert!(approx_eq!(Float, shifted[[0, 1, 1]], 5.9 + 2.0, epsilon = 1e-9));
        assert!(approx_eq!(Float, shifted[[1, 0, 0]], 0.0));

        let scaled = global_mean(&years, &annual, &grid, Dimensionality::Volume, 2020, GlobalAdjustment::Scale, "thetao").unwrap();
        // last year is above the window mean everywhere
        assert!(scaled[[0, 1, 1]] > 5.9);
        assert!(approx_eq!(Float, scaled[[1, 0, 0]], 0.0));
    }

    #[test]
    fn pointwise_with_floor() {
        let years: Vec<i32> = vec![1991, 1992, 1993];
        let annual = Array4::from_shape_vec(
            (3, 1, 1, 3),
            vec![0.0, 1.0, 3.0, 0.0, 0.0, 2.0, 0.0, -1.0, 1.0],
        )
        .unwrap();

        let (field, fallback) = pointwise(&years, &annual, 1996, Some(-2.5)).unwrap();

        assert!(approx_eq!(Float, field[[0, 0, 0]], 0.0));
        // 1, 0, -1 heads to -4 and falls back to the last value
        assert!(approx_eq!(Float, field[[0, 0, 1]], -1.0));
        assert!(approx_eq!(Float, field[[0, 0, 2]], -2.0, epsilon = 1e-9));
        assert_eq!(fallback, 1);

        assert!(pointwise(&years[..1], &annual, 1996, None).is_err());
    }

    #[test]
    fn restart_interpolation() {
        let now = Array3::from_shape_vec((1, 1, 2), vec![0.0, 12.0]).unwrap();
        let earlier = Array3::from_shape_vec((1, 1, 2), vec![0.0, 10.0]).unwrap();

        let field = interpolation(&now, &earlier, 10, 20);
        assert!(approx_eq!(Float, field[[0, 0, 1]], 16.0));
        assert!(approx_eq!(Float, field[[0, 0, 0]], 0.0));
    }
}
