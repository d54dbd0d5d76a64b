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

//! Numeric primitives used by the EOF engine.
//!
//! The pipeline only talks to the [`Toolkit`] trait, [`InProcess`]
//! implements it with `nalgebra` and `rayon` without any external tool.
//! Samples are `(sample, z, y, x)` arrays. Raw samples are zero on dry
//! cells, derived fields such as anomalies carry their wet mask apart
//! since a wet anomaly may be exactly zero.

use crate::constants::EIGEN_CUTOFF;
use crate::{errors::EofError, Float};
use log::debug;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, Array3, Array4, Axis, Zip};
use rayon::prelude::*;

/// Spatial modes and their eigenvalues, strongest first.
#[derive(Clone, PartialEq, Debug)]
pub struct Decomposition {
    /// `(mode, z, y, x)`, orthonormal with respect to the normalised weights.
    pub patterns: Array4<Float>,
    pub variances: Array1<Float>,
}

pub trait Toolkit {
    fn time_mean(&self, samples: &Array4<Float>) -> Array3<Float>;

    /// Anomalies of the samples on the wet cells, dry cells stay zero.
    fn subtract(
        &self,
        samples: &Array4<Float>,
        mean: &Array3<Float>,
        wet: &Array3<bool>,
    ) -> Array4<Float>;

    /// Weighted EOF decomposition with as many modes as samples.
    fn eof(&self, anomalies: &Array4<Float>, weights: &Array3<Float>)
        -> Result<Decomposition, EofError>;

    /// Coefficients `(mode, sample)` of the anomalies on the patterns.
    fn project(
        &self,
        anomalies: &Array4<Float>,
        patterns: &Array4<Float>,
        weights: &Array3<Float>,
    ) -> Array2<Float>;

    /// Horizontal smoothing of a `(z, y, x)` field over its wet cells.
    fn smooth(&self, field: &Array3<Float>, wet: &Array3<bool>) -> Array3<Float>;
}

/// Cells wet in any of the raw samples.
pub fn sample_mask(samples: &Array4<Float>) -> Array3<bool> {
    samples.map_axis(Axis(0), |column| column.iter().any(|v| *v != 0.0))
}

/// Toolkit computing everything in the current process.
#[derive(Copy, Clone, Debug, Default)]
pub struct InProcess;

impl InProcess {
    /// Flat indices and normalised weights of the cells with positive weight.
    fn wet_cells(weights: &Array3<Float>) -> (Vec<usize>, Vec<Float>) {
        let (cells, raw): (Vec<usize>, Vec<Float>) = weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0.0)
            .map(|(c, w)| (c, *w))
            .unzip();

        let total: Float = raw.iter().sum();
        let normalised = raw.iter().map(|w| w / total).collect();

        (cells, normalised)
    }
}

impl Toolkit for InProcess {
    fn time_mean(&self, samples: &Array4<Float>) -> Array3<Float> {
        let (_, nz, ny, nx) = samples.dim();

        samples
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array3::zeros((nz, ny, nx)))
    }

    fn subtract(
        &self,
        samples: &Array4<Float>,
        mean: &Array3<Float>,
        wet: &Array3<bool>,
    ) -> Array4<Float> {
        let mut anomalies = samples.clone();

        for mut sample in anomalies.axis_iter_mut(Axis(0)) {
            Zip::from(&mut sample)
                .and(mean)
                .and(wet)
                .for_each(|x, &m, &is_wet| *x = if is_wet { *x - m } else { 0.0 });
        }

        anomalies
    }

    fn eof(
        &self,
        anomalies: &Array4<Float>,
        weights: &Array3<Float>,
    ) -> Result<Decomposition, EofError> {
        let (nt, nz, ny, nx) = anomalies.dim();

        if weights.dim() != (nz, ny, nx) {
            return Err(EofError::ShapeMismatch {
                weights: weights.shape().to_vec(),
                samples: anomalies.shape().to_vec(),
            });
        }

        let (cells, w) = InProcess::wet_cells(weights);
        if cells.is_empty() {
            return Err(EofError::NoWetCells(format!("{:?}", anomalies.shape())));
        }

        let flat: Vec<Vec<Float>> = anomalies
            .axis_iter(Axis(0))
            .map(|sample| {
                let values: Vec<Float> = sample.iter().copied().collect();
                cells.iter().map(|&c| values[c]).collect()
            })
            .collect();

        // t x t weighted covariance of the snapshots
        let rows: Vec<Vec<Float>> = (0..nt)
            .into_par_iter()
            .map(|i| {
                (0..nt)
                    .map(|j| {
                        flat[i]
                            .iter()
                            .zip(&flat[j])
                            .zip(&w)
                            .map(|((a, b), w)| a * b * w)
                            .sum()
                    })
                    .collect()
            })
            .collect();

        let covariance = DMatrix::from_fn(nt, nt, |i, j| rows[i][j]);
        let eigen = SymmetricEigen::new(covariance);

        let mut order: Vec<usize> = (0..nt).collect();
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .partial_cmp(&eigen.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let leading = order
            .first()
            .map(|&k| eigen.eigenvalues[k])
            .unwrap_or(0.0)
            .max(0.0);

        let mut patterns = Array4::<Float>::zeros((nt, nz, ny, nx));
        let mut variances = Array1::<Float>::zeros(nt);

        for (mode, &k) in order.iter().enumerate() {
            let lambda = eigen.eigenvalues[k];

            if lambda <= EIGEN_CUTOFF * leading || lambda <= 0.0 {
                debug!("Mode {} has negligible eigenvalue {:e}", mode, lambda);
                continue;
            }

            let mut vector: Vec<Float> = eigen.eigenvectors.column(k).iter().copied().collect();

            // sign convention: largest loading is positive
            let largest = vector
                .iter()
                .copied()
                .fold(0.0, |acc: Float, v| if v.abs() > acc.abs() { v } else { acc });
            if largest < 0.0 {
                vector.iter_mut().for_each(|v| *v = -*v);
            }

            let scale = lambda.sqrt();
            let values: Vec<Float> = (0..cells.len())
                .into_par_iter()
                .map(|c| {
                    vector
                        .iter()
                        .zip(&flat)
                        .map(|(a, sample)| a * sample[c])
                        .sum::<Float>()
                        / scale
                })
                .collect();

            let mut pattern = patterns.index_axis_mut(Axis(0), mode);
            let pattern = pattern
                .as_slice_mut()
                .ok_or_else(|| EofError::NoWetCells("non-contiguous pattern".to_string()))?;
            for (&c, v) in cells.iter().zip(values) {
                pattern[c] = v;
            }

            variances[mode] = lambda;
        }

        Ok(Decomposition {
            patterns,
            variances,
        })
    }

    fn project(
        &self,
        anomalies: &Array4<Float>,
        patterns: &Array4<Float>,
        weights: &Array3<Float>,
    ) -> Array2<Float> {
        let (cells, w) = InProcess::wet_cells(weights);
        let nmodes = patterns.dim().0;
        let nt = anomalies.dim().0;

        let flatten = |field: ndarray::ArrayView3<Float>| -> Vec<Float> {
            let values: Vec<Float> = field.iter().copied().collect();
            cells.iter().map(|&c| values[c]).collect()
        };

        let samples: Vec<Vec<Float>> = anomalies.axis_iter(Axis(0)).map(flatten).collect();
        let modes: Vec<Vec<Float>> = patterns.axis_iter(Axis(0)).map(flatten).collect();

        let coefficients: Vec<Float> = (0..nmodes * nt)
            .into_par_iter()
            .map(|n| {
                let (k, t) = (n / nt, n % nt);
                samples[t]
                    .iter()
                    .zip(&modes[k])
                    .zip(&w)
                    .map(|((a, p), w)| a * p * w)
                    .sum()
            })
            .collect();

        Array2::from_shape_vec((nmodes, nt), coefficients)
            .unwrap_or_else(|_| Array2::zeros((nmodes, nt)))
    }

    fn smooth(&self, field: &Array3<Float>, wet: &Array3<bool>) -> Array3<Float> {
        let (nz, ny, nx) = field.dim();

        Array3::from_shape_fn((nz, ny, nx), |(k, j, i)| {
            if !wet[[k, j, i]] {
                return 0.0;
            }

            let (mut sum, mut count) = (0.0, 0.0);
            for jj in j.saturating_sub(1)..=(j + 1).min(ny - 1) {
                for ii in i.saturating_sub(1)..=(i + 1).min(nx - 1) {
                    if wet[[k, jj, ii]] {
                        sum += field[[k, jj, ii]];
                        count += 1.0;
                    }
                }
            }

            sum / count
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn samples() -> Array4<Float> {
        // two spatial signals with distinct amplitudes over four samples,
        // dry cell at (0, 0, 0)
        Array4::from_shape_fn((4, 1, 2, 3), |(t, _, j, i)| {
            if j == 0 && i == 0 {
                return 0.0;
            }
            let s1 = [1.0, -1.0, 2.0, -2.0][t];
            let s2 = [0.5, 0.5, -0.5, -0.5][t];
            10.0 + s1 * (i as Float + 1.0) + s2 * (j as Float - 0.5)
        })
    }

    #[test]
    fn mean_and_anomalies() {
        let toolkit = InProcess;
        let samples = samples();
        let mean = toolkit.time_mean(&samples);
        let wet = sample_mask(&samples);
        let anomalies = toolkit.subtract(&samples, &mean, &wet);

        assert!(!wet[[0, 0, 0]] && wet[[0, 1, 2]]);
        assert!(approx_eq!(Float, mean[[0, 1, 2]], 10.0, epsilon = 1e-12));
        assert!(approx_eq!(Float, anomalies[[0, 0, 0, 0]], 0.0));
        assert!(approx_eq!(Float, anomalies.sum(), 0.0, epsilon = 1e-9));
    }

    #[test]
    fn decomposition_reconstructs_anomalies() {
        let toolkit = InProcess;
        let samples = samples();
        let weights = Array3::from_shape_fn((1, 2, 3), |(_, j, i)| {
            if j == 0 && i == 0 {
                0.0
            } else {
                1.0 + i as Float
            }
        });

        let mean = toolkit.time_mean(&samples);
        let anomalies = toolkit.subtract(&samples, &mean, &sample_mask(&samples));
        let decomposition = toolkit.eof(&anomalies, &weights).unwrap();
        let coefficients = toolkit.project(&anomalies, &decomposition.patterns, &weights);

        assert_eq!(decomposition.patterns.dim(), (4, 1, 2, 3));
        assert!(decomposition.variances[0] >= decomposition.variances[1]);
        // detrended samples span at most three directions
        assert!(approx_eq!(Float, decomposition.variances[3], 0.0));

        for t in 0..4 {
            for j in 0..2 {
                for i in 0..3 {
                    let rebuilt: Float = (0..4)
                        .map(|k| coefficients[[k, t]] * decomposition.patterns[[k, 0, j, i]])
                        .sum();
                    assert!(approx_eq!(
                        Float,
                        rebuilt,
                        anomalies[[t, 0, j, i]],
                        epsilon = 1e-9
                    ));
                }
            }
        }

        // patterns are orthonormal under the normalised weights
        let total: Float = weights.sum();
        let dot = |a: usize, b: usize| -> Float {
            Zip::from(&decomposition.patterns.index_axis(Axis(0), a))
                .and(&decomposition.patterns.index_axis(Axis(0), b))
                .and(&weights)
                .fold(0.0, |acc, p, q, w| acc + p * q * w / total)
        };
        assert!(approx_eq!(Float, dot(0, 0), 1.0, epsilon = 1e-9));
        assert!(approx_eq!(Float, dot(0, 1), 0.0, epsilon = 1e-9));
    }

    #[test]
    fn rejects_bad_weights() {
        let toolkit = InProcess;
        let anomalies = Array4::zeros((2, 1, 2, 2));

        assert!(matches!(
            toolkit.eof(&anomalies, &Array3::zeros((1, 2, 2))),
            Err(EofError::NoWetCells(_))
        ));
        assert!(matches!(
            toolkit.eof(&anomalies, &Array3::ones((2, 2, 2))),
            Err(EofError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn masked_smoother() {
        let toolkit = InProcess;
        let mut field = Array3::from_shape_fn((1, 3, 3), |(_, j, i)| (j * 3 + i) as Float);
        field[[0, 0, 0]] = 0.0;

        let mut wet = Array3::from_elem((1, 3, 3), true);
        wet[[0, 0, 0]] = false;

        let smooth = toolkit.smooth(&field, &wet);
        assert!(approx_eq!(Float, smooth[[0, 0, 0]], 0.0));
        assert!(approx_eq!(Float, smooth[[0, 1, 1]], 36.0 / 8.0));
        assert!(approx_eq!(Float, smooth[[0, 2, 2]], 6.0));
    }

    #[test]
    fn wet_zero_anomalies_are_smoothed() {
        let toolkit = InProcess;
        // a single warm anomaly among wet cells with no anomaly
        let mut anomaly = Array3::zeros((1, 3, 3));
        anomaly[[0, 1, 1]] = 9.0;
        let mut wet = Array3::from_elem((1, 3, 3), true);
        wet[[0, 2, 2]] = false;

        let smooth = toolkit.smooth(&anomaly, &wet);
        assert!(approx_eq!(Float, smooth[[0, 1, 1]], 9.0 / 8.0));
        assert!(approx_eq!(Float, smooth[[0, 0, 0]], 9.0 / 4.0));
        assert!(approx_eq!(Float, smooth[[0, 2, 2]], 0.0));

        // zero anomalies on wet cells are kept, dry cells are zeroed
        let samples = Array4::from_shape_fn((2, 1, 1, 2), |(t, _, _, i)| {
            if i == 0 {
                0.0
            } else {
                [1.0, 3.0][t]
            }
        });
        let mut mean = Array3::zeros((1, 1, 2));
        mean[[0, 0, 0]] = 5.0;
        mean[[0, 0, 1]] = 1.0;
        let anomalies = toolkit.subtract(&samples, &mean, &sample_mask(&samples));
        assert!(approx_eq!(Float, anomalies[[0, 0, 0, 1]], 0.0));
        assert!(approx_eq!(Float, anomalies[[1, 0, 0, 1]], 2.0));
        assert!(approx_eq!(Float, anomalies[[0, 0, 0, 0]], 0.0));
    }
}
