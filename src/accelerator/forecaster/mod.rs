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

//! Module responsible for producing the forecast restart.
//!
//! For every requested variable a kernel predicts one `(z, y, x)`
//! field. The field is optionally smoothed, masked with the land mask
//! of the rebuilt restart, clamped to physical bounds and written into
//! both prognostic slots. The result is `restart.nc` next to the
//! rebuilt restart, together with an unchanged copy of the ice restart.

mod constraints;
mod kernels;
mod regression;
pub(crate) mod restart;

pub use constraints::ClipReport;

use kernels::GlobalAdjustment;
use restart::RestartFile;

use super::catalogue::Variable;
use super::domain::Grid;
use super::eof::EofEngine;
use super::experiment::Experiment;
use super::legs::{earlier_leg, forecast_year, start_year, year_of_leg};
use super::reader::OutputReader;
use super::toolkit::Toolkit;
use crate::errors::{ForecastError, IoContext};
use crate::Float;
use log::{debug, info, warn};
use ndarray::{Array3, Zip};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Forecasting kernel.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    /// Linear extrapolation of the EOF coefficients.
    #[default]
    Eof,
    /// Linear fit of the global mean, applied as a uniform shift.
    GlobalShift,
    /// Linear fit of the global mean, applied as a local scaling.
    GlobalScale,
    /// Per-cell linear fit.
    Pointwise,
    /// Extrapolation between two restarts.
    Interpolation,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Eof => "eof",
            Method::GlobalShift => "global-shift",
            Method::GlobalScale => "global-scale",
            Method::Pointwise => "pointwise",
            Method::Interpolation => "interpolation",
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Project forward to the forecast year.
    #[default]
    Full,
    /// Reconstruct the present state.
    Reco,
}

/// Where the horizontal smoother is applied.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Smoothing {
    #[default]
    Off,
    /// Winter anomalies before the decomposition.
    Anomalies,
    /// The forecast field before write-out.
    Forecast,
}

/// Everything the forecaster needs to know about one run.
#[derive(Clone, PartialEq, Debug)]
pub struct Request {
    pub endleg: u32,
    pub yearspan: u32,
    pub yearleap: u32,
    pub variables: Vec<&'static Variable>,
    pub method: Method,
    pub mode: Mode,
    pub smoothing: Smoothing,
}

/// Outcome of the forecast of one variable.
#[derive(Clone, PartialEq, Debug)]
pub struct SummaryRow {
    pub variable: &'static str,
    pub method: Method,
    pub report: ClipReport,
    /// Mean change over wet cells with respect to the rebuilt restart.
    pub mean_change: Float,
}

pub struct Forecaster<'a> {
    experiment: &'a Experiment,
    reader: &'a OutputReader<'a>,
    grid: &'a Grid,
    toolkit: &'a dyn Toolkit,
    year_zero: i32,
}

impl<'a> Forecaster<'a> {
    pub fn new(
        experiment: &'a Experiment,
        reader: &'a OutputReader<'a>,
        grid: &'a Grid,
        toolkit: &'a dyn Toolkit,
        year_zero: i32,
    ) -> Self {
        Forecaster {
            experiment,
            reader,
            grid,
            toolkit,
            year_zero,
        }
    }

    /// Builds `restart.nc` and `restart_ice.nc` in the scratch
    /// directory of `request.endleg`.
    pub fn run(&self, request: &Request) -> Result<Vec<SummaryRow>, ForecastError> {
        let endyear = year_of_leg(request.endleg, self.year_zero);
        let startyear = start_year(endyear, request.yearspan);
        let foreyear = forecast_year(endyear, request.yearleap);

        info!(
            "Forecasting {} with {} ({:?}) from window {}-{} to {}",
            request
                .variables
                .iter()
                .map(|v| v.label)
                .collect::<Vec<_>>()
                .join(", "),
            request.method.name(),
            request.mode,
            startyear,
            endyear,
            foreyear
        );

        let dir = self.experiment.tmp_dir(request.endleg);
        let (ocean, ice) = restart::locate(&dir, &self.experiment.name)?;
        let mut restart = RestartFile::open(&ocean)?;

        let mut summary = vec![];

        for &variable in &request.variables {
            let slots = variable
                .slots
                .ok_or_else(|| ForecastError::NoRestartSlot(variable.label.to_string()))?;

            if variable.is_derived() {
                warn!(
                    "{} is a derived variable, its forecast only fills the diagnostic slot {}",
                    variable.label, slots.now
                );
            }

            let original = restart.slot(slots.now)?;
            let mut field = self.kernel(variable, request, startyear, endyear, foreyear, &original)?;

            if field.dim() != original.dim() {
                return Err(ForecastError::ShapeMismatch {
                    variable: variable.label.to_string(),
                    slot: slots.now.to_string(),
                    found: field.shape().to_vec(),
                    expected: original.shape().to_vec(),
                });
            }

            if request.smoothing == Smoothing::Forecast {
                debug!("Smoothing forecast of {}", variable.label);
                let wet = original.mapv(|v| v != 0.0);
                field = self.toolkit.smooth(&field, &wet);
            }

            let report = constraints::enforce(&mut field, &original, variable.bounds);
            if report.clipped > 0 {
                warn!(
                    "Clipped {} of {} wet cells ({:.4}%) of {} to physical bounds",
                    report.clipped,
                    report.wet,
                    100.0 * report.fraction(),
                    variable.label
                );
            } else {
                info!("No cell of {} needed clipping", variable.label);
            }

            for name in slots.names() {
                restart.set_slot(variable.label, name, &field)?;
            }

            summary.push(SummaryRow {
                variable: variable.label,
                method: request.method,
                report,
                mean_change: mean_change(&field, &original),
            });
        }

        let target = dir.join("restart.nc");
        restart.write(&target)?;
        info!("Wrote forecast restart {}", target.display());

        let ice_target = dir.join("restart_ice.nc");
        fs::copy(&ice, &ice_target).at_path(&ice)?;
        debug!("Copied {} to {}", ice.display(), ice_target.display());

        write_summary(&dir.join("forecast_summary.csv"), &summary)?;

        Ok(summary)
    }

    fn kernel(
        &self,
        variable: &'static Variable,
        request: &Request,
        startyear: i32,
        endyear: i32,
        foreyear: i32,
        now: &Array3<Float>,
    ) -> Result<Array3<Float>, ForecastError> {
        let target_year = match request.mode {
            Mode::Full => foreyear,
            Mode::Reco => endyear,
        };

        match request.method {
            Method::Eof => {
                let engine = EofEngine::new(self.reader, self.grid, self.toolkit, request.smoothing);
                let eof_dir = self.experiment.tmp_dir(request.endleg).join("eof");
                let product = engine.compute_and_write(variable, startyear, endyear, &eof_dir)?;

                kernels::eof(&product, request.mode, target_year)
            }
            Method::GlobalShift | Method::GlobalScale => {
                let adjustment = if request.method == Method::GlobalShift {
                    GlobalAdjustment::Shift
                } else {
                    GlobalAdjustment::Scale
                };

                let series = self.reader.read_range(variable, startyear, endyear)?;
                let (years, annual) = series.annual_means();

                kernels::global_mean(
                    &years,
                    &annual,
                    self.grid,
                    variable.dim,
                    target_year,
                    adjustment,
                    variable.label,
                )
            }
            Method::Pointwise => {
                let series = self.reader.read_range(variable, startyear, endyear)?;
                let (years, annual) = series.annual_means();

                let (field, fallback) =
                    kernels::pointwise(&years, &annual, target_year, variable.bounds.min)?;

                let cells = field.iter().filter(|v| **v != 0.0).count().max(1);
                info!(
                    "Pointwise fit of {} kept the last value in {:.4}% of wet cells",
                    variable.label,
                    100.0 * fallback as Float / cells as Float
                );

                Ok(field)
            }
            Method::Interpolation => {
                let leg = earlier_leg(request.endleg, request.yearspan)?;

                let (earlier, _) =
                    restart::locate(&self.experiment.tmp_dir(leg), &self.experiment.name)?;
                let slots = variable
                    .slots
                    .ok_or_else(|| ForecastError::NoRestartSlot(variable.label.to_string()))?;
                let earlier = RestartFile::open(&earlier)?.slot(slots.now)?;

                let leap = match request.mode {
                    Mode::Full => request.yearleap,
                    Mode::Reco => 0,
                };

                Ok(kernels::interpolation(now, &earlier, request.yearspan, leap))
            }
        }
    }
}

fn mean_change(field: &Array3<Float>, original: &Array3<Float>) -> Float {
    let (mut total, mut count) = (0.0, 0usize);

    Zip::from(field).and(original).for_each(|&f, &o| {
        if o != 0.0 {
            total += f - o;
            count += 1;
        }
    });

    if count == 0 {
        0.0
    } else {
        total / count as Float
    }
}

fn write_summary(path: &Path, summary: &[SummaryRow]) -> Result<(), ForecastError> {
    let summary_err = |source| ForecastError::Summary {
        path: path.to_path_buf(),
        source,
    };

    let mut out_file = csv::Writer::from_path(path).map_err(summary_err)?;

    out_file
        .write_record(&[
            "variable",
            "method",
            "clippedCells",
            "wetCells",
            "clippedFraction",
            "meanChange",
        ])
        .map_err(summary_err)?;

    for row in summary {
        out_file
            .write_record(&[
                row.variable.to_string(),
                row.method.name().to_string(),
                row.report.clipped.to_string(),
                row.report.wet.to_string(),
                row.report.fraction().to_string(),
                row.mean_change.to_string(),
            ])
            .map_err(summary_err)?;
    }

    out_file
        .flush()
        .map_err(|e| ForecastError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::catalogue;

    #[test]
    fn summary_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("forecast_summary.csv");

        write_summary(
            &path,
            &[SummaryRow {
                variable: catalogue::lookup("thetao").unwrap().label,
                method: Method::GlobalShift,
                report: ClipReport { clipped: 1, wet: 4 },
                mean_change: 0.5,
            }],
        )
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "variable,method,clippedCells,wetCells,clippedFraction,meanChange");
        assert_eq!(lines[1], "thetao,global-shift,1,4,0.25,0.5");
    }

    #[test]
    fn wet_mean_change() {
        let original = Array3::from_shape_vec((1, 1, 3), vec![0.0, 1.0, 2.0]).unwrap();
        let field = Array3::from_shape_vec((1, 1, 3), vec![0.0, 2.0, 4.0]).unwrap();

        assert!(float_cmp::approx_eq!(Float, mean_change(&field, &original), 1.5));
    }

    #[test]
    fn method_names() {
        use clap::ValueEnum;

        for method in Method::value_variants() {
            let parsed = Method::from_str(method.name(), false).unwrap();
            assert_eq!(&parsed, method);
        }
    }
}
