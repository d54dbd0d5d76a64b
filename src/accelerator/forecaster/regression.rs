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

use crate::Float;

/// Ordinary least-squares straight line `y = slope x + intercept`.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct LinearFit {
    pub slope: Float,
    pub intercept: Float,
}

impl LinearFit {
    /// `None` with fewer than two samples or a degenerate abscissa.
    pub fn fit(x: &[Float], y: &[Float]) -> Option<Self> {
        let n = x.len().min(y.len());
        if n < 2 {
            return None;
        }

        let (x, y) = (&x[..n], &y[..n]);
        let mean_x = x.iter().sum::<Float>() / n as Float;
        let mean_y = y.iter().sum::<Float>() / n as Float;

        let (sxy, sxx) = x
            .iter()
            .zip(y)
            .fold((0.0, 0.0), |(sxy, sxx), (xi, yi)| {
                (
                    sxy + (xi - mean_x) * (yi - mean_y),
                    sxx + (xi - mean_x).powi(2),
                )
            });

        if sxx == 0.0 {
            return None;
        }

        let slope = sxy / sxx;

        Some(LinearFit {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn eval(&self, x: Float) -> Float {
        self.slope * x + self.intercept
    }
}
