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

//! Module responsible for reading monthly ocean output
//! and turning it into a common in-memory representation.
//!
//! Output files follow `<exp>_<component>_<freq>_<grid>_<year>-<year>.nc`,
//! one file per year. Whatever names the model gave to the dimensions,
//! a field is always handed out as a `(time, z, y, x)` array with
//! surface variables carrying a single level. Dry cells are zero.

pub mod averaging;
pub mod diagnostics;
mod regrid;

use super::catalogue::{self, Dimensionality, Stagger, Variable};
use super::dataset::read_variable;
use super::experiment::Experiment;
use super::legs::{season_of_month, Season};
use crate::constants::FILL_THRESHOLD;
use crate::{errors::ReaderError, Float};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ndarray::{concatenate, Array4, ArrayD, Axis, Ix4};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Monthly samples of one variable over a range of years.
#[derive(Clone, PartialEq, Debug)]
pub struct Series {
    pub variable: &'static Variable,
    /// `(year, month)` of every time record.
    pub stamps: Vec<(i32, u32)>,
    pub data: Array4<Float>,
}

impl Series {
    /// Distinct years present in the series, ascending.
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.stamps.iter().map(|(y, _)| *y).collect();
        years.dedup();
        years
    }

    /// Time coordinate in fractional years (mid-month).
    pub fn time_axis(&self) -> Vec<Float> {
        self.stamps
            .iter()
            .map(|&(y, m)| Float::from(y) + (Float::from(m) - 0.5) / 12.0)
            .collect()
    }

    /// Mean of the monthly records of every year.
    pub fn annual_means(&self) -> (Vec<i32>, Array4<Float>) {
        let years = self.years();
        let (_, nz, ny, nx) = self.data.dim();

        let mut counts: FxHashMap<i32, usize> = FxHashMap::default();
        let mut means = Array4::<Float>::zeros((years.len(), nz, ny, nx));

        for (t, (year, _)) in self.stamps.iter().enumerate() {
            // stamps are ordered so the position of a year is stable
            if let Some(index) = years.iter().position(|y| y == year) {
                let mut slot = means.index_axis_mut(Axis(0), index);
                slot += &self.data.index_axis(Axis(0), t);
                *counts.entry(*year).or_insert(0) += 1;
            }
        }

        for (index, year) in years.iter().enumerate() {
            let count = counts.get(year).copied().unwrap_or(1) as Float;
            means
                .index_axis_mut(Axis(0), index)
                .mapv_inplace(|v| v / count);
        }

        (years, means)
    }
}

/// Reader of one experiment's ocean output.
#[derive(Clone, Debug)]
pub struct OutputReader<'a> {
    experiment: &'a Experiment,
    component: String,
    freq: String,
}

impl<'a> OutputReader<'a> {
    pub fn new(experiment: &'a Experiment, component: &str, freq: &str) -> Self {
        OutputReader {
            experiment,
            component: component.to_string(),
            freq: freq.to_string(),
        }
    }

    pub fn experiment(&self) -> &Experiment {
        self.experiment
    }

    pub fn file_path(&self, grid: Stagger, year: i32) -> PathBuf {
        self.experiment.nemo.join(format!(
            "{}_{}_{}_{}_{}-{}.nc",
            self.experiment.name,
            self.component,
            self.freq,
            grid.token(),
            year,
            year
        ))
    }

    /// Reads one year of a variable, `None` when the
    /// output file (of any input) is missing.
    pub fn read_year(
        &self,
        variable: &'static Variable,
        year: i32,
    ) -> Result<Option<Array4<Float>>, ReaderError> {
        match variable.recipe {
            None => {
                let path = self.file_path(variable.grid, year);

                if !path.is_file() {
                    return Ok(None);
                }

                read_raw(&path, variable).map(Some)
            }
            Some(recipe) => {
                let mut inputs = Vec::with_capacity(recipe.inputs.len());

                for (label, shift) in recipe.inputs {
                    let input = catalogue::lookup(label)?;

                    match self.read_year(input, year)? {
                        Some(field) => inputs.push(regrid::to_t_grid(&field, *shift)),
                        None => return Ok(None),
                    }
                }

                regrid::combine(recipe.formula, &inputs)
                    .map(Some)
                    .map_err(|(found, expected)| ReaderError::ShapeMismatch {
                        variable: variable.label.to_string(),
                        path: self.experiment.nemo.clone(),
                        found,
                        expected,
                    })
            }
        }
    }

    /// Reads and concatenates all available years of `[start, end]`.
    ///
    /// Missing years are tolerated (and logged), an entirely
    /// empty range is an error.
    pub fn read_range(
        &self,
        variable: &'static Variable,
        start: i32,
        end: i32,
    ) -> Result<Series, ReaderError> {
        info!(
            "Reading {} of {} for {}-{}",
            variable.label, self.experiment.name, start, end
        );

        let years_bar = ProgressBar::new((end - start + 1).max(0) as u64);
        years_bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
                .progress_chars("#>-"),
        );
        years_bar.set_prefix(format!("Reading {}", variable.label));

        let mut fields = vec![];
        let mut stamps = vec![];
        let mut available = vec![];

        for year in start..=end {
            if let Some(field) = self.read_year(variable, year)? {
                if let Some(first) = fields.first() {
                    check_same_shape(variable, &self.file_path(variable.grid, year), first, &field)?;
                }

                let records = field.dim().0;
                if records != 12 {
                    let missing: Vec<Season> = [Season::Djf, Season::Mam, Season::Jja, Season::Son]
                        .into_iter()
                        .filter(|s| !(1..=records as u32).any(|m| season_of_month(m) == Some(*s)))
                        .collect();

                    warn!(
                        "{} of {} holds {} records instead of 12 monthly ones, seasons without data: {:?}",
                        variable.label, year, records, missing
                    );
                }

                stamps.extend((1..=records as u32).map(|m| (year, m)));
                available.push(year);
                fields.push(field);
            }
            years_bar.inc(1);
        }

        years_bar.finish_and_clear();

        if fields.is_empty() {
            return Err(ReaderError::EmptyRange {
                variable: variable.label.to_string(),
                start,
                end,
                dir: self.experiment.nemo.clone(),
            });
        }

        if available.len() as i32 != end - start + 1 {
            warn!(
                "Only {} of {} requested years of {} available: {}-{}",
                available.len(),
                end - start + 1,
                variable.label,
                available.first().copied().unwrap_or(start),
                available.last().copied().unwrap_or(end)
            );
        }

        let views: Vec<_> = fields.iter().map(|f| f.view()).collect();
        let data = concatenate(Axis(0), &views).map_err(|_| ReaderError::ShapeMismatch {
            variable: variable.label.to_string(),
            path: self.experiment.nemo.clone(),
            found: fields[0].shape().to_vec(),
            expected: fields[0].shape().to_vec(),
        })?;

        Ok(Series {
            variable,
            stamps,
            data,
        })
    }
}

/// Reads a variable from a single output file and brings it
/// to the `(time, z, y, x)` layout.
fn read_raw(path: &Path, variable: &Variable) -> Result<Array4<Float>, ReaderError> {
    let raw = read_variable(path, variable.aliases)?;

    let unified: Vec<&str> = raw.dims.iter().map(|d| unify_dimension(d)).collect();
    debug!("{} dimensions {:?} unified to {:?}", raw.name, raw.dims, unified);

    let shape_err = |data: &ArrayD<Float>| ReaderError::ShapeMismatch {
        variable: variable.label.to_string(),
        path: path.to_path_buf(),
        found: data.shape().to_vec(),
        expected: match variable.dim {
            Dimensionality::Surface => vec![0, 0, 0],
            Dimensionality::Volume => vec![0, 0, 0, 0],
        },
    };

    let mut data = raw.data;

    let expected: &[&str] = match variable.dim {
        Dimensionality::Surface => &["time", "y", "x"],
        Dimensionality::Volume => &["time", "z", "y", "x"],
    };

    if unified != expected {
        return Err(shape_err(&data));
    }

    if variable.dim == Dimensionality::Surface {
        data = data.insert_axis(Axis(1));
    }

    data.mapv_inplace(|v| {
        if !v.is_finite() || v.abs() >= FILL_THRESHOLD {
            0.0
        } else {
            v
        }
    });

    let err = shape_err(&data);
    data.into_dimensionality::<Ix4>().map_err(|_| err)
}

/// Maps model-specific dimension names onto the common
/// `time, z, y, x, lat, lon` vocabulary.
pub fn unify_dimension(name: &str) -> &str {
    match name {
        "time_counter" | "time" | "t" => "time",
        "deptht" | "depthu" | "depthv" | "depthw" | "nav_lev" | "olevel" | "z" | "lev" => "z",
        "y" | "j" | "nj" => "y",
        "x" | "i" | "ni" => "x",
        "nav_lat" | "lat" | "latitude" => "lat",
        "nav_lon" | "lon" | "longitude" => "lon",
        other => other,
    }
}

fn check_same_shape(
    variable: &Variable,
    path: &Path,
    first: &Array4<Float>,
    field: &Array4<Float>,
) -> Result<(), ReaderError> {
    if first.shape()[1..] != field.shape()[1..] {
        return Err(ReaderError::ShapeMismatch {
            variable: variable.label.to_string(),
            path: path.to_path_buf(),
            found: field.shape().to_vec(),
            expected: first.shape().to_vec(),
        });
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::accelerator::dataset::{NcDataset, NcVariable};
    use float_cmp::approx_eq;
    use ndarray::{Array, IxDyn};

    /// Writes one year of synthetic monthly output of `label`
    /// with values produced by `value(month, z, y, x)`.
    pub(crate) fn write_year<F>(
        reader: &OutputReader,
        label: &str,
        year: i32,
        shape: (usize, usize, usize),
        value: F,
    ) where
        F: Fn(usize, usize, usize, usize) -> Float,
    {
        let variable = catalogue::lookup(label).unwrap();
        let (nz, ny, nx) = shape;
        let path = reader.file_path(variable.grid, year);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let mut dataset = if path.is_file() {
            NcDataset::read(&path).unwrap()
        } else {
            NcDataset::default()
        };

        dataset.add_dimension("time_counter", 12, true);
        dataset.add_dimension("deptht", nz, false);
        dataset.add_dimension("y", ny, false);
        dataset.add_dimension("x", nx, false);

        let variable = match variable.dim {
            Dimensionality::Volume => NcVariable::new(
                label,
                &["time_counter", "deptht", "y", "x"],
                Array::from_shape_fn(IxDyn(&[12, nz, ny, nx]), |ix| {
                    value(ix[0], ix[1], ix[2], ix[3])
                }),
            ),
            Dimensionality::Surface => NcVariable::new(
                label,
                &["time_counter", "y", "x"],
                Array::from_shape_fn(IxDyn(&[12, ny, nx]), |ix| value(ix[0], 0, ix[1], ix[2])),
            ),
        };

        dataset.variables.retain(|v| v.name != label);
        dataset.add_variable(variable);
        dataset.write(&path).unwrap();
    }

    #[test]
    fn dimension_vocabulary() {
        assert_eq!(unify_dimension("time_counter"), "time");
        assert_eq!(unify_dimension("deptht"), "z");
        assert_eq!(unify_dimension("nav_lat"), "lat");
        assert_eq!(unify_dimension("y"), "y");
        assert_eq!(unify_dimension("axis_nbounds"), "axis_nbounds");
    }

    #[test]
    fn annual_means() {
        let variable = catalogue::lookup("thetao").unwrap();
        let stamps: Vec<(i32, u32)> = (0..24).map(|t| (2000 + t / 12, (t % 12 + 1) as u32)).collect();
        let data = Array4::from_shape_fn((24, 1, 1, 1), |(t, _, _, _)| t as Float);

        let series = Series {
            variable,
            stamps,
            data,
        };

        assert_eq!(series.years(), vec![2000, 2001]);
        assert!(approx_eq!(Float, series.time_axis()[0], 2000.0 + 0.5 / 12.0));

        let (years, means) = series.annual_means();
        assert_eq!(years, vec![2000, 2001]);
        assert!(approx_eq!(Float, means[[0, 0, 0, 0]], 5.5));
        assert!(approx_eq!(Float, means[[1, 0, 0, 0]], 17.5));
    }

    #[test]
    fn read_range_with_gaps() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = crate::accelerator::configuration::Paths {
            root: dir.path().to_path_buf(),
            scratch: dir.path().join("scratch"),
            post: dir.path().join("post"),
            rebuild_tool: dir.path().join("rebuild_nemo"),
        };
        let exp = Experiment::new("lfr0", &paths).unwrap();
        let reader = OutputReader::new(&exp, "oce", "1m");

        for year in [1990, 1992] {
            write_year(&reader, "thetao", year, (2, 2, 3), |m, _, j, i| {
                if j == 0 && i == 0 {
                    1.0e20
                } else {
                    10.0 + m as Float
                }
            });
        }

        let thetao = catalogue::lookup("thetao").unwrap();
        let series = reader.read_range(thetao, 1990, 1992).unwrap();

        assert_eq!(series.data.dim(), (24, 2, 2, 3));
        assert_eq!(series.years(), vec![1990, 1992]);
        // fill values become dry cells
        assert!(approx_eq!(Float, series.data[[0, 0, 0, 0]], 0.0));
        assert!(approx_eq!(Float, series.data[[13, 1, 1, 2]], 11.0));

        assert!(matches!(
            reader.read_range(thetao, 2000, 2001),
            Err(ReaderError::EmptyRange { .. })
        ));
    }

    #[test]
    fn derived_density() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = crate::accelerator::configuration::Paths {
            root: dir.path().to_path_buf(),
            scratch: dir.path().join("scratch"),
            post: dir.path().join("post"),
            rebuild_tool: dir.path().join("rebuild_nemo"),
        };
        let exp = Experiment::new("lfr0", &paths).unwrap();
        let reader = OutputReader::new(&exp, "oce", "1m");

        write_year(&reader, "thetao", 1990, (1, 1, 2), |_, _, _, i| {
            if i == 0 {
                0.0
            } else {
                10.0
            }
        });
        write_year(&reader, "so", 1990, (1, 1, 2), |_, _, _, i| {
            if i == 0 {
                0.0
            } else {
                35.0
            }
        });

        let rhop = catalogue::lookup("rhop").unwrap();
        let field = reader.read_year(rhop, 1990).unwrap().unwrap();

        assert!(approx_eq!(Float, field[[0, 0, 0, 0]], 0.0));
        assert!(approx_eq!(Float, field[[3, 0, 0, 1]], 1026.0));
        assert!(reader.read_year(rhop, 1991).unwrap().is_none());
    }
}
