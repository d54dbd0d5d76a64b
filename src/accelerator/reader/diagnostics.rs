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

//! Diagnostic averaging products and their on-disk cache.
//!
//! A product is keyed by `(diagnostic, variable, metric, start, end)`
//! and lives as a NetCDF file in the experiment's post directory.
//! Once written it is only recomputed when `replace` is requested.

use super::averaging::{
    column_mean, cumave, horizontal_mean, movave, profile, spacemean, timemean, wet_cells,
};
use super::OutputReader;
use crate::accelerator::catalogue::{Dimensionality, Variable};
use crate::accelerator::configuration::{Model, Paths, Reference};
use crate::accelerator::dataset::{NcDataset, NcVariable};
use crate::accelerator::domain::{Grid, VerticalRegion};
use crate::accelerator::experiment::{ensure_dir, Experiment};
use crate::{errors::ReaderError, Float};
use log::{debug, info, warn};
use ndarray::{Array1, Array3, Array4, ArrayD, Axis, Ix2, Ix3, Zip};
use std::path::PathBuf;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Diagnostic {
    Timeseries,
    Profile,
    Hovmoller,
    Map,
    Field,
}

impl Diagnostic {
    pub fn parse(name: &str) -> Result<Self, ReaderError> {
        match name {
            "timeseries" => Ok(Diagnostic::Timeseries),
            "profile" => Ok(Diagnostic::Profile),
            "hovmoller" => Ok(Diagnostic::Hovmoller),
            "map" => Ok(Diagnostic::Map),
            "field" => Ok(Diagnostic::Field),
            _ => Err(ReaderError::UnknownKey {
                kind: "diagnostic",
                value: name.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Diagnostic::Timeseries => "timeseries",
            Diagnostic::Profile => "profile",
            Diagnostic::Hovmoller => "hovmoller",
            Diagnostic::Map => "map",
            Diagnostic::Field => "field",
        }
    }

    fn has_time(&self) -> bool {
        matches!(self, Diagnostic::Timeseries | Diagnostic::Hovmoller)
    }

    fn dims(&self, dim: Dimensionality) -> &'static [&'static str] {
        match (self, dim) {
            (Diagnostic::Timeseries, _) => &["time"],
            (Diagnostic::Profile, _) => &["z"],
            (Diagnostic::Hovmoller, _) => &["time", "z"],
            (Diagnostic::Map, _) | (Diagnostic::Field, Dimensionality::Surface) => &["y", "x"],
            (Diagnostic::Field, Dimensionality::Volume) => &["z", "y", "x"],
        }
    }
}

/// Point-wise distance of a field `x` to the reference field `R`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Metric {
    Base,
    Norm,
    Diff,
    Rdiff,
    Abs,
    Rel,
    Var,
    Rvar,
}

impl Metric {
    pub fn parse(name: &str) -> Result<Self, ReaderError> {
        match name {
            "base" => Ok(Metric::Base),
            "norm" => Ok(Metric::Norm),
            "diff" => Ok(Metric::Diff),
            "rdiff" => Ok(Metric::Rdiff),
            "abs" => Ok(Metric::Abs),
            "rel" => Ok(Metric::Rel),
            "var" => Ok(Metric::Var),
            "rvar" => Ok(Metric::Rvar),
            _ => Err(ReaderError::UnknownKey {
                kind: "metric",
                value: name.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Base => "base",
            Metric::Norm => "norm",
            Metric::Diff => "diff",
            Metric::Rdiff => "rdiff",
            Metric::Abs => "abs",
            Metric::Rel => "rel",
            Metric::Var => "var",
            Metric::Rvar => "rvar",
        }
    }

    /// Dry cells of either `x` or `r` stay dry.
    pub fn apply(&self, x: Float, r: Float) -> Float {
        if *self == Metric::Base {
            return x;
        }

        if x == 0.0 || r == 0.0 {
            return 0.0;
        }

        match self {
            Metric::Base => x,
            Metric::Norm => x / r,
            Metric::Diff => x - r,
            Metric::Rdiff => (x - r) / r.abs(),
            Metric::Abs => (x - r).abs(),
            Metric::Rel => (x - r).abs() / r.abs(),
            Metric::Var => (x - r).powi(2),
            Metric::Rvar => (x - r).powi(2) / r.powi(2),
        }
    }
}

/// Averaged diagnostic product of one variable over a year range.
#[derive(Clone, PartialEq, Debug)]
pub struct Product {
    pub diagnostic: Diagnostic,
    pub label: String,
    pub metric: Metric,
    pub start: i32,
    pub end: i32,
    /// Time coordinate in fractional years, empty for time-less products.
    pub time: Vec<Float>,
    pub data: ArrayD<Float>,
}

impl Product {
    /// Moving average of a timeseries with the padded edges discarded.
    pub fn smoothed(&self, window: usize) -> Vec<Float> {
        let values: Vec<Float> = self.data.iter().copied().collect();
        let half = window / 2;

        if values.len() <= 2 * half {
            return vec![];
        }

        let smooth = movave(&values, window);
        smooth[half..smooth.len() - half].to_vec()
    }

    pub fn running_mean(&self) -> Vec<Float> {
        let values: Vec<Float> = self.data.iter().copied().collect();
        cumave(&values)
    }

    fn write(&self, path: &std::path::Path, variable: &Variable) -> Result<(), ReaderError> {
        let dims = self.diagnostic.dims(variable.dim);
        let mut dataset = NcDataset::default();

        for (name, len) in dims.iter().zip(self.data.shape()) {
            dataset.add_dimension(name, *len, false);
        }

        if self.diagnostic.has_time() {
            dataset.add_variable(
                NcVariable::new("time", &["time"], Array1::from(self.time.clone()).into_dyn())
                    .with_attribute("units", "years"),
            );
        }

        dataset.add_variable(
            NcVariable::new(&self.label, dims, self.data.clone())
                .with_attribute("units", variable.unit)
                .with_attribute("long_name", variable.long_name)
                .with_attribute("metric", self.metric.name()),
        );

        dataset.write(path)?;
        Ok(())
    }
}

/// Computes diagnostic products of one experiment, reusing the cache.
pub struct Averager<'a> {
    reader: OutputReader<'a>,
    grid: &'a Grid,
    model: &'a Model,
    reference: Option<&'a Reference>,
    paths: &'a Paths,
}

impl<'a> Averager<'a> {
    pub fn new(
        experiment: &'a Experiment,
        grid: &'a Grid,
        model: &'a Model,
        reference: Option<&'a Reference>,
        paths: &'a Paths,
    ) -> Self {
        Averager {
            reader: OutputReader::new(experiment, &model.component, &model.freq),
            grid,
            model,
            reference,
            paths,
        }
    }

    pub fn cache_path(
        &self,
        diagnostic: Diagnostic,
        label: &str,
        metric: Metric,
        start: i32,
        end: i32,
    ) -> PathBuf {
        self.reader.experiment().post.join(format!(
            "{}_{}_{}_{}-{}.nc",
            diagnostic.name(),
            label,
            metric.name(),
            start,
            end
        ))
    }

    /// Returns the cached product or computes and caches it.
    ///
    /// `region` restricts the spatial mean of timeseries to
    /// a vertical sub-region and is part of the cache label.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        &self,
        variable: &'static Variable,
        start: i32,
        end: i32,
        diagnostic: Diagnostic,
        metric: Metric,
        region: Option<VerticalRegion>,
        replace: bool,
    ) -> Result<Product, ReaderError> {
        let label = match region {
            Some(region) => format!("{}-{}", variable.label, region.name()),
            None => variable.label.to_string(),
        };

        let path = self.cache_path(diagnostic, &label, metric, start, end);

        if path.is_file() && !replace {
            info!("Reusing cached {}", path.display());
            return read_product(&path, diagnostic, &label, metric, start, end);
        }

        info!(
            "Computing {} of {} ({}) for {}-{}",
            diagnostic.name(),
            label,
            metric.name(),
            start,
            end
        );

        let series = self.reader.read_range(variable, start, end)?;
        let mut data = series.data.clone();
        let mut wet = wet_cells(&data);

        if metric != Metric::Base {
            let reference = self.reference_field(variable, metric)?;
            apply_metric(&mut data, &mut wet, &reference, metric)?;
        }

        let levels = match region {
            Some(region) => Some(region.levels(self.model, data.dim().1)?),
            None => None,
        };

        let (time, values) = match diagnostic {
            Diagnostic::Timeseries => (
                series.time_axis(),
                spacemean(&data, &wet, self.grid, variable.dim, levels)?.into_dyn(),
            ),
            Diagnostic::Profile => (vec![], profile(&data, &wet, self.grid)?.into_dyn()),
            Diagnostic::Hovmoller => (
                series.time_axis(),
                horizontal_mean(&data, &wet, self.grid)?.into_dyn(),
            ),
            Diagnostic::Map => match variable.dim {
                Dimensionality::Surface => (
                    vec![],
                    timemean(&data, &wet)?.index_axis_move(Axis(0), 0).into_dyn(),
                ),
                Dimensionality::Volume => (vec![], column_mean(&data, &wet, self.grid)?.into_dyn()),
            },
            Diagnostic::Field => match variable.dim {
                Dimensionality::Surface => (
                    vec![],
                    timemean(&data, &wet)?.index_axis_move(Axis(0), 0).into_dyn(),
                ),
                Dimensionality::Volume => (vec![], timemean(&data, &wet)?.into_dyn()),
            },
        };

        let product = Product {
            diagnostic,
            label,
            metric,
            start,
            end,
            time,
            data: values,
        };

        ensure_dir(&self.reader.experiment().post)?;
        product.write(&path, variable)?;
        debug!("Cached {}", path.display());

        Ok(product)
    }

    /// Time-mean field of the reference experiment, `(z, y, x)`.
    fn reference_field(
        &self,
        variable: &'static Variable,
        metric: Metric,
    ) -> Result<Array3<Float>, ReaderError> {
        let reference = self
            .reference
            .ok_or(ReaderError::MissingReference(metric.name()))?;

        if reference.orca != self.model.orca {
            return Err(ReaderError::ReferenceMismatch {
                expected: self.model.orca.clone(),
                found: reference.orca.clone(),
            });
        }

        if reference.grid != variable.grid.token() {
            warn!(
                "Reference is declared on grid {} but {} lives on grid {}",
                reference.grid,
                variable.label,
                variable.grid.token()
            );
        }

        let experiment = Experiment::new(&reference.expname, self.paths)?;
        let averager = Averager {
            reader: OutputReader::new(&experiment, &self.model.component, &reference.freq),
            grid: self.grid,
            model: self.model,
            reference: None,
            paths: self.paths,
        };

        let field = averager.compute(
            variable,
            reference.startyear,
            reference.endyear,
            Diagnostic::Field,
            Metric::Base,
            None,
            reference.replace,
        )?;

        let shape = field.data.shape().to_vec();
        let mismatch = || ReaderError::GridMismatch {
            found: shape.clone(),
            expected: vec![self.grid.shape().0, self.grid.shape().1, self.grid.shape().2],
        };

        match variable.dim {
            Dimensionality::Surface => field
                .data
                .into_dimensionality::<Ix2>()
                .map(|d| d.insert_axis(Axis(0)))
                .map_err(|_| mismatch()),
            Dimensionality::Volume => field
                .data
                .into_dimensionality::<Ix3>()
                .map_err(|_| mismatch()),
        }
    }
}

/// Replaces `data` by its metric against `reference`. Cells dry in
/// the reference leave the wet mask.
fn apply_metric(
    data: &mut Array4<Float>,
    wet: &mut Array4<bool>,
    reference: &Array3<Float>,
    metric: Metric,
) -> Result<(), ReaderError> {
    let (_, nz, ny, nx) = data.dim();

    if reference.dim() != (nz, ny, nx) {
        return Err(ReaderError::GridMismatch {
            found: vec![nz, ny, nx],
            expected: reference.shape().to_vec(),
        });
    }

    for (mut snapshot, mut wet) in data.axis_iter_mut(Axis(0)).zip(wet.axis_iter_mut(Axis(0))) {
        Zip::from(&mut snapshot)
            .and(&mut wet)
            .and(reference)
            .for_each(|x, is_wet, &r| {
                *x = metric.apply(*x, r);
                *is_wet = *is_wet && r != 0.0;
            });
    }

    Ok(())
}

fn read_product(
    path: &std::path::Path,
    diagnostic: Diagnostic,
    label: &str,
    metric: Metric,
    start: i32,
    end: i32,
) -> Result<Product, ReaderError> {
    let dataset = NcDataset::read(path)?;

    let data = dataset
        .variable(label)
        .map(|v| v.data.clone())
        .ok_or_else(|| crate::errors::DatasetError::MissingVariable {
            path: path.to_path_buf(),
            names: vec![label.to_string()],
        })?;

    let time = dataset
        .variable("time")
        .map(|v| v.data.iter().copied().collect())
        .unwrap_or_default();

    Ok(Product {
        diagnostic,
        label: label.to_string(),
        metric,
        start,
        end,
        time,
        data,
    })
}
