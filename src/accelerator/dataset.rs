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

//! Module isolating all NetCDF file access.
//!
//! Files are read into (and written from) a plain in-memory
//! [`NcDataset`] so that the rest of the accelerator only deals
//! with `ndarray` arrays. All numeric data is handled as `Float`
//! in memory and written back with the storage type it was read with.

use crate::{errors::DatasetError, Float};
use log::debug;
use ndarray::{ArrayD, Axis};
use netcdf::types::{FloatType, NcVariableType};
use std::path::Path;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NcDimension {
    pub name: String,
    pub len: usize,
    pub unlimited: bool,
}

#[derive(Clone, PartialEq, Debug)]
pub struct NcVariable {
    pub name: String,
    pub dims: Vec<String>,
    pub data: ArrayD<Float>,
    pub attributes: Vec<(String, String)>,

    /// Storage type in the file, `Float` data is converted on write.
    pub vartype: NcVariableType,
}

impl NcVariable {
    pub fn new(name: &str, dims: &[&str], data: ArrayD<Float>) -> Self {
        NcVariable {
            name: name.to_string(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            data,
            attributes: vec![],
            vartype: NcVariableType::Float(FloatType::F64),
        }
    }

    pub fn with_type(mut self, vartype: NcVariableType) -> Self {
        self.vartype = vartype;
        self
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.push((name.to_string(), value.to_string()));
        self
    }
}

/// In-memory image of a NetCDF file.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct NcDataset {
    pub dimensions: Vec<NcDimension>,
    pub variables: Vec<NcVariable>,
}

impl NcDataset {
    /// Reads every variable of a file, without attributes.
    pub fn read(path: &Path) -> Result<Self, DatasetError> {
        debug!("Reading whole dataset {}", path.display());

        let file = open(path)?;

        let dimensions = file
            .dimensions()
            .map(|d| NcDimension {
                name: d.name(),
                len: d.len(),
                unlimited: d.is_unlimited(),
            })
            .collect();

        let mut variables = vec![];

        for var in file.variables() {
            let name = var.name();
            let data = var
                .get::<Float, _>(..)
                .map_err(|source| DatasetError::CantRead {
                    path: path.to_path_buf(),
                    name: name.clone(),
                    source,
                })?;

            variables.push(NcVariable {
                dims: var.dimensions().iter().map(|d| d.name()).collect(),
                name,
                data,
                attributes: vec![],
                vartype: var.vartype(),
            });
        }

        Ok(NcDataset {
            dimensions,
            variables,
        })
    }

    /// Writes the dataset to a new file, replacing any existing one.
    pub fn write(&self, path: &Path) -> Result<(), DatasetError> {
        debug!("Writing dataset {}", path.display());

        let write_err = |name: &str| {
            let path = path.to_path_buf();
            let name = name.to_string();
            move |source| DatasetError::CantWrite { path, name, source }
        };

        let mut file = netcdf::create(path).map_err(write_err("<file>"))?;

        for dim in &self.dimensions {
            if dim.unlimited {
                file.add_unlimited_dimension(&dim.name)
                    .map_err(write_err(&dim.name))?;
            } else {
                file.add_dimension(&dim.name, dim.len)
                    .map_err(write_err(&dim.name))?;
            }
        }

        for var in &self.variables {
            let dims: Vec<&str> = var.dims.iter().map(String::as_str).collect();

            let mut nc_var = file
                .add_variable_with_type(&var.name, &dims, &var.vartype)
                .map_err(write_err(&var.name))?;

            for (name, value) in &var.attributes {
                nc_var
                    .put_attribute(name, value.as_str())
                    .map_err(write_err(&var.name))?;
            }

            nc_var
                .put(.., var.data.view())
                .map_err(write_err(&var.name))?;
        }

        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&NcVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut NcVariable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    pub fn dimension(&self, name: &str) -> Option<&NcDimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Adds a dimension unless one with the same name exists.
    pub fn add_dimension(&mut self, name: &str, len: usize, unlimited: bool) {
        if self.dimension(name).is_none() {
            self.dimensions.push(NcDimension {
                name: name.to_string(),
                len,
                unlimited,
            });
        }
    }

    pub fn add_variable(&mut self, variable: NcVariable) {
        self.variables.push(variable);
    }
}

/// Reads the first variable found under one of `names`.
pub fn read_variable(path: &Path, names: &[&str]) -> Result<NcVariable, DatasetError> {
    let file = open(path)?;

    let var = names
        .iter()
        .find_map(|name| file.variable(name))
        .ok_or_else(|| DatasetError::MissingVariable {
            path: path.to_path_buf(),
            names: names.iter().map(|n| n.to_string()).collect(),
        })?;

    let name = var.name();
    debug!("Reading {} from {}", name, path.display());

    let data = var
        .get::<Float, _>(..)
        .map_err(|source| DatasetError::CantRead {
            path: path.to_path_buf(),
            name: name.clone(),
            source,
        })?;

    Ok(NcVariable {
        dims: var.dimensions().iter().map(|d| d.name()).collect(),
        name,
        data,
        attributes: vec![],
        vartype: var.vartype(),
    })
}

/// Removes leading axes of length one until `ndim` axes remain.
pub fn squeeze_leading(mut data: ArrayD<Float>, ndim: usize) -> ArrayD<Float> {
    while data.ndim() > ndim && data.shape()[0] == 1 {
        data = data.index_axis_move(Axis(0), 0);
    }

    data
}

fn open(path: &Path) -> Result<netcdf::File, DatasetError> {
    netcdf::open(path).map_err(|source| DatasetError::CantOpen {
        path: path.to_path_buf(),
        source,
    })
}
