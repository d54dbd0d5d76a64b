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

//! Module computing EOFs of detrended winter means.
//!
//! Winter `y` is the mean of December `y - 1` and January `y`.
//! For a window `[start, end]` the engine collects the winters
//! `start ..= end`, removes their time mean, decomposes the anomalies
//! and projects them back on the modes.

use super::catalogue::{Dimensionality, Variable};
use super::dataset::{NcDataset, NcVariable};
use super::domain::Grid;
use super::experiment::ensure_dir;
use super::forecaster::Smoothing;
use super::reader::OutputReader;
use super::toolkit::{sample_mask, Toolkit};
use crate::{errors::EofError, Float};
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, Array3, Array4, Axis, Zip};
use rustc_hash::FxHashMap;
use std::path::Path;

/// EOF artifacts of one variable over one window.
#[derive(Clone, PartialEq, Debug)]
pub struct EofProduct {
    pub label: String,
    /// Winter years, one per sample.
    pub years: Vec<i32>,
    /// Time mean of the winter samples, `(z, y, x)`.
    pub climatology: Array3<Float>,
    /// `(mode, z, y, x)`
    pub patterns: Array4<Float>,
    pub variances: Array1<Float>,
    /// `(mode, year)`
    pub tseries: Array2<Float>,
}

impl EofProduct {
    pub fn modes(&self) -> usize {
        self.patterns.dim().0
    }

    /// `Σ_k θ_k pattern_k + climatology`, dry where the climatology is dry.
    pub fn compose(&self, coefficients: &[Float]) -> Array3<Float> {
        let mut field = self.climatology.clone();

        for (pattern, theta) in self.patterns.axis_iter(Axis(0)).zip(coefficients) {
            Zip::from(&mut field)
                .and(&pattern)
                .for_each(|f, &p| *f += theta * p);
        }

        Zip::from(&mut field)
            .and(&self.climatology)
            .for_each(|f, &c| {
                if c == 0.0 {
                    *f = 0.0
                }
            });

        field
    }

    /// Writes pattern, variance, mean and per-mode time series files to `dir`.
    pub fn write(&self, dir: &Path) -> Result<(), EofError> {
        let (nmodes, nz, ny, nx) = self.patterns.dim();
        let years: Array1<Float> = self.years.iter().map(|&y| Float::from(y)).collect();

        let mut pattern = NcDataset::default();
        pattern.add_dimension("mode", nmodes, true);
        pattern.add_dimension("z", nz, false);
        pattern.add_dimension("y", ny, false);
        pattern.add_dimension("x", nx, false);
        pattern.add_variable(NcVariable::new(
            &self.label,
            &["mode", "z", "y", "x"],
            self.patterns.clone().into_dyn(),
        ));
        pattern.write(&dir.join(format!("{}_pattern.nc", self.label)))?;

        let mut variance = NcDataset::default();
        variance.add_dimension("mode", nmodes, true);
        variance.add_variable(NcVariable::new(
            &self.label,
            &["mode"],
            self.variances.clone().into_dyn(),
        ));
        variance.write(&dir.join(format!("{}_variance.nc", self.label)))?;

        let mut mean = NcDataset::default();
        mean.add_dimension("z", nz, false);
        mean.add_dimension("y", ny, false);
        mean.add_dimension("x", nx, false);
        mean.add_variable(NcVariable::new(
            &self.label,
            &["z", "y", "x"],
            self.climatology.clone().into_dyn(),
        ));
        mean.write(&dir.join(format!("{}_mean.nc", self.label)))?;

        for (k, series) in self.tseries.axis_iter(Axis(0)).enumerate() {
            let mut tseries = NcDataset::default();
            tseries.add_dimension("time", series.len(), true);
            tseries.add_variable(NcVariable::new("time", &["time"], years.clone().into_dyn()));
            tseries.add_variable(NcVariable::new(
                &self.label,
                &["time"],
                series.to_owned().into_dyn(),
            ));
            tseries.write(&dir.join(format!("{}_timeseries_{:05}.nc", self.label, k)))?;
        }

        debug!("Wrote {} EOF artifacts to {}", self.label, dir.display());
        Ok(())
    }
}

/// Reasons a window of winters cannot be formed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WinterGap {
    /// Winter of that year is incomplete with complete winters on both sides.
    Interior(i32),
    TooShort(usize),
}

/// Complete winters of `[start, end]` given which `(year, month)`
/// records exist. Incomplete winters at either edge are dropped.
pub fn winter_years<F>(start: i32, end: i32, has_month: F) -> Result<Vec<i32>, WinterGap>
where
    F: Fn(i32, u32) -> bool,
{
    let complete: Vec<(i32, bool)> = (start..=end)
        .map(|y| (y, has_month(y - 1, 12) && has_month(y, 1)))
        .collect();

    let first = complete.iter().position(|(_, ok)| *ok);
    let last = complete.iter().rposition(|(_, ok)| *ok);

    let winters: Vec<i32> = match (first, last) {
        (Some(first), Some(last)) => {
            if let Some((year, _)) = complete[first..=last].iter().find(|(_, ok)| !ok) {
                return Err(WinterGap::Interior(*year));
            }
            complete[first..=last].iter().map(|(y, _)| *y).collect()
        }
        _ => vec![],
    };

    if winters.len() < 2 {
        return Err(WinterGap::TooShort(winters.len()));
    }

    Ok(winters)
}

pub struct EofEngine<'a> {
    reader: &'a OutputReader<'a>,
    grid: &'a Grid,
    toolkit: &'a dyn Toolkit,
    smoothing: Smoothing,
}

impl<'a> EofEngine<'a> {
    pub fn new(
        reader: &'a OutputReader<'a>,
        grid: &'a Grid,
        toolkit: &'a dyn Toolkit,
        smoothing: Smoothing,
    ) -> Self {
        EofEngine {
            reader,
            grid,
            toolkit,
            smoothing,
        }
    }

    /// Winter-mean samples `(winter, z, y, x)` of the window.
    pub fn winters(
        &self,
        variable: &'static Variable,
        start: i32,
        end: i32,
    ) -> Result<(Vec<i32>, Array4<Float>), EofError> {
        let mut fields: FxHashMap<i32, Array4<Float>> = FxHashMap::default();

        for year in start - 1..=end {
            if let Some(field) = self.reader.read_year(variable, year)? {
                fields.insert(year, field);
            }
        }

        let has_month = |year: i32, month: u32| {
            fields
                .get(&year)
                .map(|f| f.dim().0 >= month as usize)
                .unwrap_or(false)
        };

        let years = winter_years(start, end, has_month).map_err(|gap| match gap {
            WinterGap::Interior(year) => EofError::PartialYear {
                variable: variable.label.to_string(),
                year,
                path: if fields.contains_key(&(year - 1)) {
                    self.reader.file_path(variable.grid, year)
                } else {
                    self.reader.file_path(variable.grid, year - 1)
                },
            },
            WinterGap::TooShort(count) => EofError::WindowTooShort {
                variable: variable.label.to_string(),
                start,
                end,
                count,
            },
        })?;

        if years.first() != Some(&start) || years.last() != Some(&end) {
            warn!(
                "Winters of {} only available for {}-{} of requested {}-{}",
                variable.label,
                years.first().copied().unwrap_or(start),
                years.last().copied().unwrap_or(end),
                start,
                end
            );
        }

        let mut samples = vec![];
        for year in &years {
            let (december, january) = match (fields.get(&(year - 1)), fields.get(year)) {
                (Some(d), Some(j)) => (d.slice(s![11, .., .., ..]), j.slice(s![0, .., .., ..])),
                _ => continue,
            };

            if december.dim() != january.dim() {
                return Err(EofError::ShapeMismatch {
                    weights: december.shape().to_vec(),
                    samples: january.shape().to_vec(),
                });
            }

            let mut winter = Array3::<Float>::zeros(december.dim());
            Zip::from(&mut winter)
                .and(&december)
                .and(&january)
                .for_each(|w, &d, &j| *w = 0.5 * (d + j));

            if !same_mask(&december, &january) {
                return Err(EofError::MaskMismatch {
                    variable: variable.label.to_string(),
                    year: *year,
                    reference: *year,
                });
            }

            samples.push(winter);
        }

        for (year, sample) in years.iter().zip(&samples).skip(1) {
            if sample.dim() != samples[0].dim() || !same_mask(&sample.view(), &samples[0].view()) {
                return Err(EofError::MaskMismatch {
                    variable: variable.label.to_string(),
                    year: *year,
                    reference: years[0],
                });
            }
        }

        let views: Vec<_> = samples.iter().map(|s| s.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views).map_err(|_| EofError::ShapeMismatch {
            weights: vec![],
            samples: samples[0].shape().to_vec(),
        })?;

        Ok((years, stacked))
    }

    /// EOF product of `variable` over the winters of `[start, end]`.
    pub fn compute(
        &self,
        variable: &'static Variable,
        start: i32,
        end: i32,
    ) -> Result<EofProduct, EofError> {
        info!("Computing EOFs of {} for winters {}-{}", variable.label, start, end);

        let (years, samples) = self.winters(variable, start, end)?;

        let wet = sample_mask(&samples);
        let climatology = self.toolkit.time_mean(&samples);
        let mut anomalies = self.toolkit.subtract(&samples, &climatology, &wet);

        if self.smoothing == Smoothing::Anomalies {
            debug!("Smoothing {} anomalies", variable.label);
            for mut anomaly in anomalies.axis_iter_mut(Axis(0)) {
                let smooth = self.toolkit.smooth(&anomaly.to_owned(), &wet);
                anomaly.assign(&smooth);
            }
        }

        let weights = match variable.dim {
            Dimensionality::Volume => self.grid.volume.clone(),
            Dimensionality::Surface => self.grid.area.clone().insert_axis(Axis(0)),
        };

        let decomposition = self.toolkit.eof(&anomalies, &weights)?;
        let tseries = self
            .toolkit
            .project(&anomalies, &decomposition.patterns, &weights);

        info!(
            "Leading EOF of {} explains {:.1}% of the winter variance",
            variable.label,
            100.0 * decomposition.variances[0] / decomposition.variances.sum().max(Float::MIN_POSITIVE)
        );

        Ok(EofProduct {
            label: variable.label.to_string(),
            years,
            climatology,
            patterns: decomposition.patterns,
            variances: decomposition.variances,
            tseries,
        })
    }

    /// Computes the product and writes its artifacts into `dir`.
    pub fn compute_and_write(
        &self,
        variable: &'static Variable,
        start: i32,
        end: i32,
        dir: &Path,
    ) -> Result<EofProduct, EofError> {
        let product = self.compute(variable, start, end)?;

        ensure_dir(dir).map_err(|e| EofError::Reader(e.into()))?;
        product.write(dir)?;

        Ok(product)
    }
}

fn same_mask(a: &ndarray::ArrayView3<Float>, b: &ndarray::ArrayView3<Float>) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (*x == 0.0) == (*y == 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::catalogue;
    use crate::accelerator::configuration::Paths;
    use crate::accelerator::domain::tests::sample_grid;
    use crate::accelerator::experiment::Experiment;
    use crate::accelerator::reader::tests::write_year;
    use crate::accelerator::toolkit::InProcess;
    use float_cmp::approx_eq;
    use tempfile::TempDir;

    #[test]
    fn pairing_winters() {
        let all = |_: i32, _: u32| true;
        assert_eq!(winter_years(1991, 1994, all).unwrap(), vec![1991, 1992, 1993, 1994]);

        // no December before the window: leading winter dropped
        let no_lead = |y: i32, _: u32| y >= 1991;
        assert_eq!(winter_years(1991, 1994, no_lead).unwrap(), vec![1992, 1993, 1994]);

        // last year missing: trailing winter dropped
        let no_tail = |y: i32, _: u32| y <= 1993;
        assert_eq!(winter_years(1991, 1994, no_tail).unwrap(), vec![1991, 1992, 1993]);

        let hole = |y: i32, _: u32| y != 1992;
        assert_eq!(winter_years(1990, 1995, hole), Err(WinterGap::Interior(1992)));

        let short = |y: i32, m: u32| y == 1990 || (y == 1991 && m == 1);
        assert_eq!(winter_years(1991, 1994, short), Err(WinterGap::TooShort(1)));
    }

    fn setup(dir: &TempDir) -> Experiment {
        let paths = Paths {
            root: dir.path().to_path_buf(),
            scratch: dir.path().join("scratch"),
            post: dir.path().join("post"),
            rebuild_tool: dir.path().join("rebuild_nemo"),
        };
        Experiment::new("lfr0", &paths).unwrap()
    }

    /// Warming trend with a spatial pattern, dry column at (0, 0).
    fn thetao(year: i32, month: usize, k: usize, j: usize, i: usize) -> Float {
        if j == 0 && i == 0 {
            return 0.0;
        }
        let t = (year - 1990) as Float + month as Float / 12.0;
        10.0 - k as Float + 0.1 * t * (1.0 + i as Float) + 0.05 * ((year % 3) as Float) * j as Float
    }

    #[test]
    fn decomposition_of_winters() {
        let dir = TempDir::new().unwrap();
        let exp = setup(&dir);
        let reader = OutputReader::new(&exp, "oce", "1m");
        let grid = sample_grid(2, 2, 3);

        for year in 1990..=1995 {
            write_year(&reader, "thetao", year, (2, 2, 3), |m, k, j, i| thetao(year, m, k, j, i));
        }

        let toolkit = InProcess;
        let engine = EofEngine::new(&reader, &grid, &toolkit, Smoothing::Off);
        let variable = catalogue::lookup("thetao").unwrap();

        let (years, samples) = engine.winters(variable, 1991, 1995).unwrap();
        assert_eq!(years, vec![1991, 1992, 1993, 1994, 1995]);
        let expected = 0.5 * (thetao(1990, 11, 1, 1, 2) + thetao(1991, 0, 1, 1, 2));
        assert!(approx_eq!(Float, samples[[0, 1, 1, 2]], expected, epsilon = 1e-12));

        let product = engine
            .compute_and_write(variable, 1991, 1995, &exp.tmp_dir(6).join("eof"))
            .unwrap();
        assert_eq!(product.modes(), 5);
        assert_eq!(product.tseries.dim(), (5, 5));

        // reconstruction of every winter
        for (t, _) in years.iter().enumerate() {
            let coefficients: Vec<Float> = product.tseries.column(t).to_vec();
            let rebuilt = product.compose(&coefficients);
            for ((k, j, i), value) in rebuilt.indexed_iter() {
                assert!(approx_eq!(Float, *value, samples[[t, k, j, i]], epsilon = 1e-9));
            }
        }

        let eof_dir = exp.tmp_dir(6).join("eof");
        assert!(eof_dir.join("thetao_pattern.nc").is_file());
        assert!(eof_dir.join("thetao_variance.nc").is_file());
        assert!(eof_dir.join("thetao_timeseries_00000.nc").is_file());
        assert!(eof_dir.join("thetao_timeseries_00004.nc").is_file());
    }

    #[test]
    fn window_failures() {
        let dir = TempDir::new().unwrap();
        let exp = setup(&dir);
        let reader = OutputReader::new(&exp, "oce", "1m");
        let grid = sample_grid(2, 2, 3);
        let toolkit = InProcess;
        let engine = EofEngine::new(&reader, &grid, &toolkit, Smoothing::Off);
        let variable = catalogue::lookup("thetao").unwrap();

        for year in [1990, 1991, 1993, 1994] {
            write_year(&reader, "thetao", year, (2, 2, 3), |m, k, j, i| thetao(year, m, k, j, i));
        }

        assert!(matches!(
            engine.winters(variable, 1991, 1994),
            Err(EofError::PartialYear { year: 1992, .. })
        ));
        assert!(matches!(
            engine.winters(variable, 1991, 1991),
            Err(EofError::WindowTooShort { count: 1, .. })
        ));

        // a cell that dries up in the last year
        write_year(&reader, "thetao", 1992, (2, 2, 3), |m, k, j, i| thetao(1992, m, k, j, i));
        write_year(&reader, "thetao", 1994, (2, 2, 3), |m, k, j, i| {
            if k == 1 && j == 1 && i == 1 {
                0.0
            } else {
                thetao(1994, m, k, j, i)
            }
        });
        assert!(matches!(
            engine.winters(variable, 1991, 1993),
            Ok((ref years, _)) if years.len() == 3
        ));
        assert!(matches!(
            engine.winters(variable, 1991, 1994),
            Err(EofError::MaskMismatch { year: 1994, .. })
        ));
    }
}
