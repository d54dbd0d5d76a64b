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

//! Module with the static grid description of an ocean
//! configuration and its vertical sub-regions.

use super::configuration::{Model, Regions};
use super::dataset::{read_variable, squeeze_leading};
use crate::{errors::ReaderError, Float};
use log::debug;
use ndarray::{Array2, Array3, Axis, Ix2, Ix3};
use std::path::Path;

/// Grid-cell metrics of the T-grid. Immutable after load.
#[derive(Clone, PartialEq, Debug)]
pub struct Grid {
    pub dx: Array2<Float>,
    pub dy: Array2<Float>,
    pub dz: Array3<Float>,
    /// Wet cells are `1.0`, dry cells `0.0`.
    pub tmask: Array3<Float>,
    /// Horizontal cell area `e1 e2` of the surface level, zero on land.
    pub area: Array2<Float>,
    /// Cell volume `e1 e2 e3_0`, zero on land.
    pub volume: Array3<Float>,
}

impl Grid {
    /// Reads metrics from a NEMO mesh/domain file.
    pub fn from_mesh_file(path: &Path) -> Result<Self, ReaderError> {
        debug!("Reading grid metrics from {}", path.display());

        let e1 = read_2d(path, &["e1t"])?;
        let e2 = read_2d(path, &["e2t"])?;
        let e3 = read_3d(path, &["e3t_0", "e3t"])?;
        let tmask = read_3d(path, &["tmask"])?;

        Grid::from_metrics(e1, e2, e3, tmask).map_err(|reason| ReaderError::InvalidMesh {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_metrics(
        e1: Array2<Float>,
        e2: Array2<Float>,
        e3: Array3<Float>,
        tmask: Array3<Float>,
    ) -> Result<Self, &'static str> {
        if e1.dim() != e2.dim() {
            return Err("e1t and e2t shapes differ");
        }

        if e3.dim() != tmask.dim() {
            return Err("e3t_0 and tmask shapes differ");
        }

        let (_, ny, nx) = e3.dim();
        if (ny, nx) != e1.dim() {
            return Err("horizontal and vertical metrics shapes differ");
        }

        let tmask = tmask.mapv(|m| if m > 0.0 { 1.0 } else { 0.0 });
        let cell_area = &e1 * &e2;

        let volume = &e3 * &cell_area * &tmask;
        let area = &cell_area * &tmask.index_axis(Axis(0), 0);

        Ok(Grid {
            dx: e1,
            dy: e2,
            dz: e3,
            tmask,
            area,
            volume,
        })
    }

    /// Shape `(z, y, x)` of the T-grid.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.tmask.dim()
    }

    /// Area of every cell at every level, zero on land.
    pub fn level_areas(&self) -> Array3<Float> {
        let cell_area = &self.dx * &self.dy;
        &self.tmask * &cell_area
    }
}

fn read_2d(path: &Path, names: &[&str]) -> Result<Array2<Float>, ReaderError> {
    let var = read_variable(path, names)?;
    let data = squeeze_leading(var.data, 2);

    data.into_dimensionality::<Ix2>()
        .map_err(|_| ReaderError::InvalidMesh {
            path: path.to_path_buf(),
            reason: "horizontal metric is not two-dimensional",
        })
}

fn read_3d(path: &Path, names: &[&str]) -> Result<Array3<Float>, ReaderError> {
    let var = read_variable(path, names)?;
    let data = squeeze_leading(var.data, 3);

    data.into_dimensionality::<Ix3>()
        .map_err(|_| ReaderError::InvalidMesh {
            path: path.to_path_buf(),
            reason: "vertical metric is not three-dimensional",
        })
}

/// Vertical sub-region of the water column.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum VerticalRegion {
    Mixed,
    Pycnocline,
    Abyssal,
}

impl VerticalRegion {
    pub fn parse(name: &str) -> Result<Self, ReaderError> {
        match name {
            "mixed" => Ok(VerticalRegion::Mixed),
            "pycnocline" => Ok(VerticalRegion::Pycnocline),
            "abyssal" => Ok(VerticalRegion::Abyssal),
            _ => Err(ReaderError::UnknownKey {
                kind: "vertical region",
                value: name.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VerticalRegion::Mixed => "mixed",
            VerticalRegion::Pycnocline => "pycnocline",
            VerticalRegion::Abyssal => "abyssal",
        }
    }

    /// Inclusive level range `[z1, z2]` of the region
    /// for a configuration with `nz` levels.
    pub fn levels(&self, model: &Model, nz: usize) -> Result<(usize, usize), ReaderError> {
        let regions = model
            .regions
            .unwrap_or_else(|| default_regions(&model.orca, nz));

        let (z1, z2) = match self {
            VerticalRegion::Mixed => regions.mixed,
            VerticalRegion::Pycnocline => regions.pycnocline,
            VerticalRegion::Abyssal => regions.abyssal,
        };

        if z2 >= nz || z1 > z2 {
            return Err(ReaderError::RegionOutOfBounds {
                region: self.name(),
                z1,
                z2,
                nz,
            });
        }

        Ok((z1, z2))
    }
}

/// Region bounds of the known ORCA configurations,
/// thirds of the column for anything else.
fn default_regions(orca: &str, nz: usize) -> Regions {
    match (orca, nz) {
        ("ORCA2", 31) => Regions {
            mixed: (0, 9),
            pycnocline: (10, 19),
            abyssal: (20, 30),
        },
        ("eORCA1", 75) | ("ORCA1", 75) => Regions {
            mixed: (0, 22),
            pycnocline: (23, 45),
            abyssal: (46, 74),
        },
        _ => {
            let third = (nz / 3).max(1);
            Regions {
                mixed: (0, third - 1),
                pycnocline: (third, (2 * third - 1).max(third)),
                abyssal: ((2 * third).min(nz.saturating_sub(1)), nz.saturating_sub(1)),
            }
        }
    }
}
