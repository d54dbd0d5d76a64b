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

//! Module containing constants used by the accelerator.

use crate::Float;

/// Calendar year assigned to leg 1 unless configured otherwise.
pub const YEAR_ZERO: i32 = 1990;

/// Ocean model timesteps per day unless configured otherwise.
pub const STEPS_PER_DAY: u32 = 16;

/// Lowest admissible potential temperature (degC) in a forecast restart.
pub const MIN_TEMPERATURE: Float = -2.5;

/// Admissible salinity range (PSU) in a forecast restart.
pub const SALINITY_RANGE: (Float, Float) = (0.0, 100.0);

/// Largest admissible magnitude of sea-surface height (m).
pub const MAX_SSH: Float = 20.0;

/// Largest admissible magnitude of horizontal velocity (m/s).
pub const MAX_VELOCITY: Float = 10.0;

/// Values at or above this magnitude are NEMO fill values
/// and are treated as dry cells.
pub const FILL_THRESHOLD: Float = 1.0e19;

/// Relative eigenvalue threshold below which an EOF mode
/// is considered degenerate.
pub const EIGEN_CUTOFF: Float = 1.0e-12;

///Reference density of the linear equation of state (kg/m3)
pub const RHO_0: Float = 1026.0;

///Reference temperature of the linear equation of state (degC)
pub const EOS_T_0: Float = 10.0;

///Reference salinity of the linear equation of state (PSU)
pub const EOS_S_0: Float = 35.0;

///Thermal expansion coefficient (1/degC)
pub const EOS_ALPHA: Float = 2.0e-4;

///Haline contraction coefficient (1/PSU)
pub const EOS_BETA: Float = 7.7e-4;

/// Suffix of the directory holding a whole-tree experiment backup.
pub const BACKUP_SUFFIX: &str = "-backup";
