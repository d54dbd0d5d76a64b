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

//! Access to the prognostic slots of a rebuilt ocean restart.

use crate::accelerator::dataset::NcDataset;
use crate::accelerator::reader::unify_dimension;
use crate::errors::{ForecastError, IoContext};
use crate::Float;
use log::debug;
use ndarray::{Array3, Axis, Ix2, Ix3};
use std::fs;
use std::path::{Path, PathBuf};

/// Finds the rebuilt `<exp>_<timestep>_restart.nc` and its ice
/// counterpart in `dir`.
pub fn locate(dir: &Path, expname: &str) -> Result<(PathBuf, PathBuf), ForecastError> {
    let mut ocean = None;
    let mut ice = None;

    let prefix = format!("{}_", expname);

    for entry in fs::read_dir(dir).at_path(dir)? {
        let path = entry.at_path(dir)?.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        let stem = match name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".nc"))
        {
            Some(stem) => stem,
            None => continue,
        };

        let (timestep, kind) = match stem.split_once('_') {
            Some(parts) => parts,
            None => continue,
        };

        if timestep.is_empty() || !timestep.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        match kind {
            "restart" => ocean = Some(path),
            "restart_ice" => ice = Some(path),
            _ => {}
        }
    }

    let ocean = ocean.ok_or_else(|| ForecastError::MissingRestart {
        kind: "ocean",
        dir: dir.to_path_buf(),
    })?;
    let ice = ice.ok_or_else(|| ForecastError::MissingRestart {
        kind: "ice",
        dir: dir.to_path_buf(),
    })?;

    Ok((ocean, ice))
}

/// In-memory ocean restart with its slots exposed as `(z, y, x)` fields.
#[derive(Clone, Debug)]
pub struct RestartFile {
    path: PathBuf,
    dataset: NcDataset,
}

impl RestartFile {
    pub fn open(path: &Path) -> Result<Self, ForecastError> {
        debug!("Loading restart {}", path.display());

        Ok(RestartFile {
            path: path.to_path_buf(),
            dataset: NcDataset::read(path)?,
        })
    }

    /// Slot without its time axis, surface slots carry a single level.
    pub fn slot(&self, name: &str) -> Result<Array3<Float>, ForecastError> {
        let var = self
            .dataset
            .variable(name)
            .ok_or_else(|| ForecastError::MissingSlot {
                path: self.path.clone(),
                name: name.to_string(),
            })?;

        let mut data = var.data.clone();
        if var.dims.first().map(|d| unify_dimension(d)) == Some("time") {
            data = data.index_axis_move(Axis(0), 0);
        }

        let shape = data.shape().to_vec();
        let mismatch = || ForecastError::ShapeMismatch {
            variable: name.to_string(),
            slot: name.to_string(),
            found: shape.clone(),
            expected: vec![0, 0, 0],
        };

        match data.ndim() {
            2 => data
                .into_dimensionality::<Ix2>()
                .map(|d| d.insert_axis(Axis(0)))
                .map_err(|_| mismatch()),
            3 => data.into_dimensionality::<Ix3>().map_err(|_| mismatch()),
            _ => Err(mismatch()),
        }
    }

    /// Overwrites a slot, keeping its on-disk shape.
    pub fn set_slot(
        &mut self,
        label: &str,
        name: &str,
        field: &Array3<Float>,
    ) -> Result<(), ForecastError> {
        let current = self.slot(name)?;

        if current.dim() != field.dim() {
            return Err(ForecastError::ShapeMismatch {
                variable: label.to_string(),
                slot: name.to_string(),
                found: field.shape().to_vec(),
                expected: current.shape().to_vec(),
            });
        }

        let var = self
            .dataset
            .variable_mut(name)
            .ok_or_else(|| ForecastError::MissingSlot {
                path: self.path.clone(),
                name: name.to_string(),
            })?;

        let raw_shape = var.data.shape().to_vec();
        var.data = field
            .as_standard_layout()
            .to_owned()
            .into_shape(raw_shape.clone())
            .map_err(|_| ForecastError::ShapeMismatch {
                variable: label.to_string(),
                slot: name.to_string(),
                found: field.shape().to_vec(),
                expected: raw_shape,
            })?
            .into_dyn();

        debug!("Overwrote slot {} with {}", name, label);
        Ok(())
    }

    /// Writes the restart with an unlimited `time_counter` and
    /// no variable attributes.
    pub fn write(&self, path: &Path) -> Result<(), ForecastError> {
        let mut dataset = self.dataset.clone();

        for dim in dataset.dimensions.iter_mut() {
            dim.unlimited = dim.name == "time_counter";
        }
        for var in dataset.variables.iter_mut() {
            var.attributes.clear();
        }

        dataset.write(path)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::accelerator::dataset::NcVariable;
    use ndarray::{Array, IxDyn};
    use netcdf::types::{FloatType, IntType, NcVariableType};
    use tempfile::TempDir;

    /// Writes a minimal rebuilt ocean restart whose slots hold
    /// `value(z, y, x)`, dry where it returns zero.
    pub(crate) fn write_restart<F>(path: &Path, shape: (usize, usize, usize), value: F)
    where
        F: Fn(usize, usize, usize) -> Float,
    {
        let (nz, ny, nx) = shape;
        let mut dataset = NcDataset::default();
        dataset.add_dimension("time_counter", 1, false);
        dataset.add_dimension("nav_lev", nz, false);
        dataset.add_dimension("y", ny, false);
        dataset.add_dimension("x", nx, false);

        let volume = Array::from_shape_fn(IxDyn(&[1, nz, ny, nx]), |ix| value(ix[1], ix[2], ix[3]));
        let surface = Array::from_shape_fn(IxDyn(&[1, ny, nx]), |ix| value(0, ix[1], ix[2]) * 0.01);

        for name in ["tn", "tb", "sn", "sb", "un", "ub"] {
            dataset.add_variable(
                NcVariable::new(name, &["time_counter", "nav_lev", "y", "x"], volume.clone())
                    .with_attribute("units", "whatever"),
            );
        }
        for name in ["sshn", "sshb"] {
            dataset.add_variable(NcVariable::new(name, &["time_counter", "y", "x"], surface.clone()));
        }
        dataset.add_variable(
            NcVariable::new("kt", &["time_counter"], Array::from_elem(IxDyn(&[1]), 43800.0))
                .with_type(NcVariableType::Int(IntType::I32)),
        );

        dataset.write(path).unwrap();
    }

    #[test]
    fn locates_rebuilt_files() {
        let dir = TempDir::new().unwrap();
        for name in [
            "lfr0_00043800_restart.nc",
            "lfr0_00043800_restart_ice.nc",
            "lfr0_00043800_restart_0000.nc",
            "other_00043800_restart.nc",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let (ocean, ice) = locate(dir.path(), "lfr0").unwrap();
        assert!(ocean.ends_with("lfr0_00043800_restart.nc"));
        assert!(ice.ends_with("lfr0_00043800_restart_ice.nc"));

        fs::remove_file(&ice).unwrap();
        assert!(matches!(
            locate(dir.path(), "lfr0"),
            Err(ForecastError::MissingRestart { kind: "ice", .. })
        ));
    }

    #[test]
    fn slots_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lfr0_00043800_restart.nc");
        write_restart(&path, (2, 2, 3), |k, _, i| (k * 3 + i) as Float);

        let mut restart = RestartFile::open(&path).unwrap();
        assert_eq!(restart.slot("tn").unwrap().dim(), (2, 2, 3));
        assert_eq!(restart.slot("sshn").unwrap().dim(), (1, 2, 3));

        let field = Array3::from_elem((2, 2, 3), 7.0);
        restart.set_slot("thetao", "tn", &field).unwrap();
        assert!(matches!(
            restart.set_slot("zos", "sshn", &field),
            Err(ForecastError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            restart.slot("rhop"),
            Err(ForecastError::MissingSlot { .. })
        ));

        let out = dir.path().join("restart.nc");
        restart.write(&out).unwrap();

        let written = NcDataset::read(&out).unwrap();
        assert!(written.dimension("time_counter").unwrap().unlimited);
        assert_eq!(written.variable("tn").unwrap().data.shape(), &[1, 2, 2, 3]);
        assert!(written.variable("tn").unwrap().data.iter().all(|v| *v == 7.0));
        assert_eq!(
            written.variable("sb").unwrap().data,
            NcDataset::read(&path).unwrap().variable("sb").unwrap().data
        );
        assert_eq!(
            written.variable("tn").unwrap().vartype,
            NcVariableType::Float(FloatType::F64)
        );

        let kt = written.variable("kt").unwrap();
        assert_eq!(kt.vartype, NcVariableType::Int(IntType::I32));
        assert!(kt.data.iter().all(|v| *v == 43800.0));
    }
}
