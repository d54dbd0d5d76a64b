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

//! Module with the catalogue of ocean variables known to the accelerator.
//!
//! Every consumer (output reader, EOF engine, forecaster) looks
//! variables up here instead of branching on names.

use crate::constants::{MAX_SSH, MAX_VELOCITY, MIN_TEMPERATURE, SALINITY_RANGE};
use crate::errors::ReaderError;
use crate::Float;

/// Staggering of a variable on the Arakawa C-grid.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Stagger {
    T,
    U,
    V,
    W,
}

impl Stagger {
    /// Grid token used in output file names.
    pub fn token(&self) -> &'static str {
        match self {
            Stagger::T => "T",
            Stagger::U => "U",
            Stagger::V => "V",
            Stagger::W => "W",
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Dimensionality {
    Surface,
    Volume,
}

/// Names of the prognostic slots of a variable in the ocean restart.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RestartSlots {
    pub now: &'static str,
    pub before: Option<&'static str>,
}

impl RestartSlots {
    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.now).chain(self.before)
    }
}

/// Physical admissibility range enforced on forecasts.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct Bounds {
    pub min: Option<Float>,
    pub max: Option<Float>,
}

/// Half-cell shift bringing a staggered input onto the T-grid.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Regrid {
    None,
    ShiftX,
    ShiftY,
    ShiftZ,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Formula {
    /// `0.5 (u^2 + v^2)`
    KineticEnergy,
    /// Linear equation of state of temperature and salinity.
    Density,
}

/// How a derived variable is built from other catalogue entries.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Recipe {
    pub inputs: &'static [(&'static str, Regrid)],
    pub formula: Formula,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Variable {
    pub label: &'static str,
    /// Names under which the variable may appear in output files.
    pub aliases: &'static [&'static str],
    pub grid: Stagger,
    pub dim: Dimensionality,
    pub unit: &'static str,
    pub long_name: &'static str,
    pub slots: Option<RestartSlots>,
    pub bounds: Bounds,
    pub recipe: Option<Recipe>,
}

impl Variable {
    pub fn is_derived(&self) -> bool {
        self.recipe.is_some()
    }
}

pub static CATALOGUE: &[Variable] = &[
    Variable {
        label: "thetao",
        aliases: &["thetao", "votemper", "toce"],
        grid: Stagger::T,
        dim: Dimensionality::Volume,
        unit: "degC",
        long_name: "Sea Water Potential Temperature",
        slots: Some(RestartSlots {
            now: "tn",
            before: Some("tb"),
        }),
        bounds: Bounds {
            min: Some(MIN_TEMPERATURE),
            max: None,
        },
        recipe: None,
    },
    Variable {
        label: "so",
        aliases: &["so", "vosaline", "soce"],
        grid: Stagger::T,
        dim: Dimensionality::Volume,
        unit: "PSU",
        long_name: "Sea Water Salinity",
        slots: Some(RestartSlots {
            now: "sn",
            before: Some("sb"),
        }),
        bounds: Bounds {
            min: Some(SALINITY_RANGE.0),
            max: Some(SALINITY_RANGE.1),
        },
        recipe: None,
    },
    Variable {
        label: "zos",
        aliases: &["zos", "sossheig", "ssh"],
        grid: Stagger::T,
        dim: Dimensionality::Surface,
        unit: "m",
        long_name: "Sea Surface Height",
        slots: Some(RestartSlots {
            now: "sshn",
            before: Some("sshb"),
        }),
        bounds: Bounds {
            min: Some(-MAX_SSH),
            max: Some(MAX_SSH),
        },
        recipe: None,
    },
    Variable {
        label: "uo",
        aliases: &["uo", "vozocrtx", "uoce"],
        grid: Stagger::U,
        dim: Dimensionality::Volume,
        unit: "m/s",
        long_name: "Sea Water X Velocity",
        slots: Some(RestartSlots {
            now: "un",
            before: Some("ub"),
        }),
        bounds: Bounds {
            min: Some(-MAX_VELOCITY),
            max: Some(MAX_VELOCITY),
        },
        recipe: None,
    },
    Variable {
        label: "vo",
        aliases: &["vo", "vomecrty", "voce"],
        grid: Stagger::V,
        dim: Dimensionality::Volume,
        unit: "m/s",
        long_name: "Sea Water Y Velocity",
        slots: Some(RestartSlots {
            now: "vn",
            before: Some("vb"),
        }),
        bounds: Bounds {
            min: Some(-MAX_VELOCITY),
            max: Some(MAX_VELOCITY),
        },
        recipe: None,
    },
    Variable {
        label: "wo",
        aliases: &["wo", "vovecrtz", "woce"],
        grid: Stagger::W,
        dim: Dimensionality::Volume,
        unit: "m/s",
        long_name: "Sea Water Upward Velocity",
        slots: None,
        bounds: Bounds {
            min: None,
            max: None,
        },
        recipe: None,
    },
    Variable {
        label: "mlotst",
        aliases: &["mlotst", "somxl010"],
        grid: Stagger::T,
        dim: Dimensionality::Surface,
        unit: "m",
        long_name: "Ocean Mixed Layer Thickness",
        slots: None,
        bounds: Bounds {
            min: Some(0.0),
            max: None,
        },
        recipe: None,
    },
    Variable {
        label: "rhop",
        aliases: &["rhop"],
        grid: Stagger::T,
        dim: Dimensionality::Volume,
        unit: "kg/m3",
        long_name: "Sea Water Potential Density",
        slots: Some(RestartSlots {
            now: "rhop",
            before: None,
        }),
        bounds: Bounds {
            min: None,
            max: None,
        },
        recipe: Some(Recipe {
            inputs: &[("thetao", Regrid::None), ("so", Regrid::None)],
            formula: Formula::Density,
        }),
    },
    Variable {
        label: "ke",
        aliases: &["ke"],
        grid: Stagger::T,
        dim: Dimensionality::Volume,
        unit: "m2/s2",
        long_name: "Kinetic Energy",
        slots: None,
        bounds: Bounds {
            min: Some(0.0),
            max: None,
        },
        recipe: Some(Recipe {
            inputs: &[("uo", Regrid::ShiftX), ("vo", Regrid::ShiftY)],
            formula: Formula::KineticEnergy,
        }),
    },
];

/// Finds a catalogue entry by its label or by one of its aliases.
pub fn lookup(name: &str) -> Result<&'static Variable, ReaderError> {
    CATALOGUE
        .iter()
        .find(|v| v.label == name)
        .or_else(|| CATALOGUE.iter().find(|v| v.aliases.contains(&name)))
        .ok_or_else(|| ReaderError::UnknownVariable(name.to_string()))
}
