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

//! Module responsible for parsing and checking the configuration file.
//!
//! To provide meaningful error messages. The configuration file uses
//! [YAML](https://en.wikipedia.org/wiki/YAML) and `serde` to enforce
//! strong typing and automatic type checking.
//!
//! The structures and their fields in this module directly correspond to
//! the fields inside `config.yaml` so you can check this documentation
//! for more details how to set the config file.

use super::catalogue;
use super::forecaster::{Method, Mode, Smoothing};
use crate::constants::{STEPS_PER_DAY, YEAR_ZERO};
use crate::errors::ConfigError;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Filesystem roots shared by all experiments.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Paths {
    /// Directory holding one run directory per experiment.
    pub root: PathBuf,

    /// Root of the per-experiment scratch workspaces.
    /// Everything below it is safe to delete.
    pub scratch: PathBuf,

    /// Root of the averaging cache (post-processed products).
    pub post: PathBuf,

    /// Path to the external tile-merge executable.
    pub rebuild_tool: PathBuf,
}

/// Fields with information about time used by the ocean model.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize)]
pub struct Time {
    /// _(Optional)_ Calendar year of leg 1.
    ///
    /// Defaults to `1990`.
    #[serde(default = "Time::default_year_zero")]
    pub year_zero: i32,

    /// _(Optional)_ Number of ocean timesteps per simulated day.
    ///
    /// Cannot be less than `1`. Defaults to `16`.
    #[serde(default = "Time::default_steps_per_day")]
    pub steps_per_day: u32,
}

impl Time {
    fn default_year_zero() -> i32 {
        YEAR_ZERO
    }

    fn default_steps_per_day() -> u32 {
        STEPS_PER_DAY
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.steps_per_day < 1 {
            return Err(ConfigError::OutOfBounds(
                "Timesteps per day cannot be less than 1",
            ));
        }

        if !(0..10_000).contains(&self.year_zero) {
            return Err(ConfigError::OutOfBounds(
                "Year zero must be between 0 and 9999",
            ));
        }

        Ok(())
    }
}

impl Default for Time {
    fn default() -> Self {
        Time {
            year_zero: Time::default_year_zero(),
            steps_per_day: Time::default_steps_per_day(),
        }
    }
}

/// Explicit vertical sub-region bounds (inclusive level indices).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct Regions {
    pub mixed: (usize, usize),
    pub pycnocline: (usize, usize),
    pub abyssal: (usize, usize),
}

/// Fields describing the ocean configuration and its output.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Model {
    /// Name of the ORCA configuration, e.g. `ORCA2` or `eORCA1`.
    pub orca: String,

    /// NetCDF file with the grid metrics `e1t`, `e2t`, `e3t_0`
    /// and the land-sea mask `tmask`.
    pub mesh_file: PathBuf,

    /// _(Optional)_ Component token in output file names.
    ///
    /// Defaults to `oce`.
    #[serde(default = "Model::default_component")]
    pub component: String,

    /// _(Optional)_ Output frequency token in output file names.
    ///
    /// Defaults to `1m`. The EOF engine requires monthly output.
    #[serde(default = "Model::default_freq")]
    pub freq: String,

    /// _(Optional)_ Vertical sub-regions. When absent they
    /// are derived from `orca`.
    #[serde(default)]
    pub regions: Option<Regions>,
}

impl Model {
    fn default_component() -> String {
        "oce".to_string()
    }

    fn default_freq() -> String {
        "1m".to_string()
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.orca.is_empty() {
            return Err(ConfigError::OutOfBounds("ORCA name cannot be empty"));
        }

        if let Some(regions) = self.regions {
            for (z1, z2) in [regions.mixed, regions.pycnocline, regions.abyssal] {
                if z1 > z2 {
                    return Err(ConfigError::OutOfBounds(
                        "Vertical region must have its top above its bottom",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// _(Optional)_ Default forecast settings,
/// each of them can be overridden from the command line.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Forecast {
    /// Variables forecasted in one run.
    ///
    /// Defaults to `[thetao, so]`.
    #[serde(default = "Forecast::default_variables")]
    pub variables: Vec<String>,

    /// Forecasting kernel. Defaults to `eof`.
    #[serde(default)]
    pub method: Method,

    /// `full` projects forward, `reco` reconstructs
    /// the present state. Defaults to `full`.
    #[serde(default)]
    pub mode: Mode,

    /// Where the horizontal smoother is applied. Defaults to `off`.
    #[serde(default)]
    pub smoothing: Smoothing,
}

impl Forecast {
    fn default_variables() -> Vec<String> {
        vec!["thetao".to_string(), "so".to_string()]
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.variables.is_empty() {
            return Err(ConfigError::OutOfBounds(
                "Forecast variables list cannot be empty",
            ));
        }

        if let Some(unknown) = self
            .variables
            .iter()
            .find(|name| catalogue::lookup(name).is_err())
        {
            return Err(ConfigError::UnknownValue {
                key: "forecast.variables",
                value: unknown.clone(),
            });
        }

        Ok(())
    }
}

impl Default for Forecast {
    fn default() -> Self {
        Forecast {
            variables: Forecast::default_variables(),
            method: Method::default(),
            mode: Mode::default(),
            smoothing: Smoothing::default(),
        }
    }
}

/// Experiment and period defining the mean field
/// against which metrics are computed.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Reference {
    pub expname: String,
    pub startyear: i32,
    pub endyear: i32,
    pub orca: String,
    pub grid: String,
    pub freq: String,

    /// Recompute the reference even if it is cached.
    #[serde(default)]
    pub replace: bool,
}

impl Reference {
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.startyear > self.endyear {
            return Err(ConfigError::OutOfBounds(
                "Reference start year cannot be after its end year",
            ));
        }

        Ok(())
    }
}

/// _(Optional)_ Fields with information about
/// resources available for the accelerator.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct Resources {
    /// _(Optional)_ Thread count used by numeric kernels.
    ///
    /// Cannot be less than `1`. Defaults to `1`.
    #[serde(default = "Resources::default_threads")]
    pub threads: u16,

    /// _(Optional)_ Heap memory limit in MB.
    ///
    /// Cannot be less than `128`. Defaults to `8192`, the peak
    /// resident set expected for a typical ocean configuration.
    /// When the cap is hit the allocator aborts with an
    /// out-of-memory message instead of the process being
    /// silently killed by the system.
    #[serde(default = "Resources::default_memory")]
    pub memory: usize,
}

impl Resources {
    fn default_threads() -> u16 {
        1
    }

    fn default_memory() -> usize {
        8192
    }

    /// Checks if thread count and memory limit are
    /// above limits.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.threads < 1 {
            return Err(ConfigError::OutOfBounds(
                "Available threads cannot be less than 1",
            ));
        }

        if self.memory < 128 {
            return Err(ConfigError::OutOfBounds(
                "Available memory cannot be less than 128 MB",
            ));
        }

        Ok(())
    }
}

impl Default for Resources {
    fn default() -> Self {
        Resources {
            threads: Resources::default_threads(),
            memory: Resources::default_memory(),
        }
    }
}

/// Main config structure representing the fields in
/// configuration file.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Config {
    pub paths: Paths,

    #[serde(default)]
    pub time: Time,

    pub model: Model,

    #[serde(default)]
    pub forecast: Forecast,

    #[serde(default)]
    pub reference: Option<Reference>,

    #[serde(default)]
    pub resources: Resources,
}

impl Config {
    /// Config structure constructor, responsible for
    /// deserializing configuration and checking it.
    pub fn new_from_file(file_path: &Path) -> Result<Config, ConfigError> {
        let data = fs::read(file_path)?;
        Config::new_from_slice(data.as_slice())
    }

    pub fn new_from_slice(data: &[u8]) -> Result<Config, ConfigError> {
        let config: Config = serde_yaml::from_slice(data)?;

        config.time.check_bounds()?;
        config.model.check_bounds()?;
        config.forecast.check_bounds()?;
        config.resources.check_bounds()?;

        if let Some(reference) = &config.reference {
            reference.check_bounds()?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::accelerator::forecaster::{Method, Mode, Smoothing};
    use crate::errors::ConfigError;

    const MINIMAL: &str = "
paths:
  root: /data/ece3
  scratch: /scratch/osa
  post: /scratch/osa/post
  rebuild_tool: /opt/nemo/rebuild_nemo
model:
  orca: ORCA2
  mesh_file: /data/ORCA2/mesh_mask.nc
";

    #[test]
    fn defaults() {
        let config = Config::new_from_slice(MINIMAL.as_bytes()).unwrap();

        assert_eq!(config.time.year_zero, 1990);
        assert_eq!(config.time.steps_per_day, 16);
        assert_eq!(config.model.component, "oce");
        assert_eq!(config.model.freq, "1m");
        assert_eq!(config.forecast.variables, vec!["thetao", "so"]);
        assert_eq!(config.forecast.method, Method::Eof);
        assert_eq!(config.forecast.mode, Mode::Full);
        assert_eq!(config.forecast.smoothing, Smoothing::Off);
        assert_eq!(config.resources.threads, 1);
        assert!(config.reference.is_none());
    }

    #[test]
    fn full_document() {
        let document = format!(
            "{}{}",
            MINIMAL,
            "
time:
  year_zero: 1850
  steps_per_day: 32
forecast:
  variables: [thetao]
  method: pointwise
  mode: reco
  smoothing: anomalies
reference:
  expname: ref0
  startyear: 1990
  endyear: 1999
  orca: ORCA2
  grid: T
  freq: 1m
  replace: true
resources:
  threads: 4
  memory: 2048
"
        );

        let config = Config::new_from_slice(document.as_bytes()).unwrap();

        assert_eq!(config.time.year_zero, 1850);
        assert_eq!(config.forecast.method, Method::Pointwise);
        assert_eq!(config.forecast.mode, Mode::Reco);
        assert_eq!(config.forecast.smoothing, Smoothing::Anomalies);
        assert!(config.reference.unwrap().replace);
        assert_eq!(config.resources.threads, 4);
    }

    #[test]
    fn rejects_out_of_bounds() {
        let document = format!("{}{}", MINIMAL, "resources:\n  memory: 64\n");
        assert!(Config::new_from_slice(document.as_bytes()).is_err());

        let document = format!("{}{}", MINIMAL, "forecast:\n  variables: []\n");
        assert!(Config::new_from_slice(document.as_bytes()).is_err());
    }

    #[test]
    fn rejects_unknown_forecast_variable() {
        let document = format!("{}{}", MINIMAL, "forecast:\n  variables: [thetao, tos]\n");
        match Config::new_from_slice(document.as_bytes()) {
            Err(ConfigError::UnknownValue { key, value }) => {
                assert_eq!(key, "forecast.variables");
                assert_eq!(value, "tos");
            }
            other => panic!("unexpected result {:?}", other),
        }

        let document = format!("{}{}", MINIMAL, "forecast:\n  variables: [votemper]\n");
        assert!(Config::new_from_slice(document.as_bytes()).is_ok());
    }
}
