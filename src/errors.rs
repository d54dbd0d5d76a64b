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

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OsaError {
    #[error("Error while reading config.yaml: {0}")]
    Config(#[from] ConfigError),

    #[error("Error while resolving experiment layout: {0}")]
    Layout(#[from] LayoutError),

    #[error("Error in leg bookkeeping: {0}")]
    Leg(#[from] LegError),

    #[error("Restart rebuild stage failed: {0}")]
    Rebuild(#[from] RebuildError),

    #[error("Output averaging stage failed: {0}")]
    Reader(#[from] ReaderError),

    #[error("EOF stage failed: {0}")]
    Eof(#[from] EofError),

    #[error("Forecast stage failed: {0}")]
    Forecast(#[from] ForecastError),

    #[error("Restart installation failed: {0}")]
    Install(#[from] InstallError),

    #[error("Error while creating ThreadPool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Cannot set memory limit of {0} MB")]
    MemoryLimit(usize),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot open config.yaml: {0}")]
    CantOpenFile(#[from] std::io::Error),

    #[error("Cannot deserialize config.yaml: {0}")]
    CantDeserialize(#[from] serde_yaml::Error),

    #[error("Configuration component is out of bounds {0}")]
    OutOfBounds(&'static str),

    #[error("Unknown value {value} for {key}")]
    UnknownValue { key: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Invalid experiment name \"{0}\": must match [a-zA-Z0-9_-]+")]
    InvalidName(String),

    #[error("Experiment directory {0} does not exist")]
    MissingDir(PathBuf),

    #[error("Cannot create directory {path}: {source}")]
    CantCreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LegError {
    #[error("Leg descriptor {0} is missing")]
    MissingDescriptor(PathBuf),

    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse leg descriptor {path}: {source}")]
    CantDeserialize {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Leg descriptor {path} has no valid field {key}")]
    MissingKey { path: PathBuf, key: &'static str },

    #[error("Cannot parse start date \"{0}\" in leg descriptor")]
    InvalidDate(String),

    #[error("Cannot parse timestep \"{content}\" in {path}")]
    InvalidTimestep { path: PathBuf, content: String },

    #[error("Refusing to move experiment forward from leg {current} to leg {requested}")]
    RewindForward { current: u32, requested: u32 },

    #[error("Leg number {0} is out of bounds")]
    OutOfBounds(i64),
}

#[derive(Error, Debug)]
pub enum RebuildError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("No {kind} restart tiles found in {dir}")]
    MissingKind { kind: &'static str, dir: PathBuf },

    #[error("Restart tiles in {dir} carry inconsistent timesteps {first} and {other}")]
    InconsistentTimestep {
        dir: PathBuf,
        first: String,
        other: String,
    },

    #[error("Rank {rank} of the {kind} restart tiles is missing in {dir}")]
    MissingRank {
        kind: &'static str,
        rank: usize,
        dir: PathBuf,
    },

    #[error("Cannot parse timestep token {0} of restart tiles")]
    InvalidTimestep(String),

    #[error("Tile-merge tool {tool} failed with {status} on {prefix}: {stderr}")]
    ToolFailed {
        tool: PathBuf,
        prefix: String,
        status: String,
        stderr: String,
    },

    #[error("Tile-merge tool did not produce {0}")]
    MissingOutput(PathBuf),
}

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Cannot open NetCDF file {path}: {source}")]
    CantOpen {
        path: PathBuf,
        source: netcdf::Error,
    },

    #[error("Cannot read {name} from {path}: {source}")]
    CantRead {
        path: PathBuf,
        name: String,
        source: netcdf::Error,
    },

    #[error("Cannot write {name} to {path}: {source}")]
    CantWrite {
        path: PathBuf,
        name: String,
        source: netcdf::Error,
    },

    #[error("None of the variables {names:?} found in {path}")]
    MissingVariable { path: PathBuf, names: Vec<String> },
}

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Unknown variable {0}")]
    UnknownVariable(String),

    #[error("No output files for {variable} between {start} and {end} in {dir}")]
    EmptyRange {
        variable: String,
        start: i32,
        end: i32,
        dir: PathBuf,
    },

    #[error("Shape of {variable} in {path} is {found:?}, expected {expected:?}")]
    ShapeMismatch {
        variable: String,
        path: PathBuf,
        found: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("Mesh file {path} is inconsistent: {reason}")]
    InvalidMesh { path: PathBuf, reason: &'static str },

    #[error("Unknown {kind} \"{value}\"")]
    UnknownKey { kind: &'static str, value: String },

    #[error("Field of shape {found:?} does not match the grid shape {expected:?}")]
    GridMismatch {
        found: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("Metric {0} needs a reference field but no reference is configured")]
    MissingReference(&'static str),

    #[error("Reference experiment uses {found}, the accelerator is configured for {expected}")]
    ReferenceMismatch { expected: String, found: String },

    #[error("Vertical region {region} resolves to levels {z1}..={z2} outside {nz} levels")]
    RegionOutOfBounds {
        region: &'static str,
        z1: usize,
        z2: usize,
        nz: usize,
    },
}

#[derive(Error, Debug)]
pub enum EofError {
    #[error("Output reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Window {start}-{end} of {variable} holds {count} complete winters, at least 2 needed")]
    WindowTooShort {
        variable: String,
        start: i32,
        end: i32,
        count: usize,
    },

    #[error("Winter {year} of {variable} is incomplete inside the window ({path})")]
    PartialYear {
        variable: String,
        year: i32,
        path: PathBuf,
    },

    #[error("Land mask of winter {year} of {variable} differs from winter {reference}")]
    MaskMismatch {
        variable: String,
        year: i32,
        reference: i32,
    },

    #[error("Weights of shape {weights:?} do not match samples of shape {samples:?}")]
    ShapeMismatch {
        weights: Vec<usize>,
        samples: Vec<usize>,
    },

    #[error("Cannot decompose {0}: no wet cells")]
    NoWetCells(String),
}

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("EOF error: {0}")]
    Eof(#[from] EofError),

    #[error("Output reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Leg error: {0}")]
    Leg(#[from] LegError),

    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write forecast summary {path}: {source}")]
    Summary { path: PathBuf, source: csv::Error },

    #[error("No rebuilt {kind} restart in {dir}, run the rebuild first")]
    MissingRestart { kind: &'static str, dir: PathBuf },

    #[error("Variable {0} has no prognostic slot in the restart")]
    NoRestartSlot(String),

    #[error("Restart {path} has no variable {name}")]
    MissingSlot { path: PathBuf, name: String },

    #[error("Forecast of {variable} has shape {found:?}, restart slot {slot} has {expected:?}")]
    ShapeMismatch {
        variable: String,
        slot: String,
        found: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("Cannot fit {0}: fewer than 2 samples")]
    NotEnoughSamples(String),
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Leg error: {0}")]
    Leg(#[from] LegError),

    #[error("Rebuild error: {0}")]
    Rebuild(#[from] RebuildError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Expected file {0} is missing")]
    MissingFile(PathBuf),

    #[error("Leg {leg} has no full restart tile set in {dir}")]
    IncompleteTileSet { leg: u32, dir: PathBuf },

    #[error("Run directory {dir} holds a partial restart installation: {detail}")]
    PartialInstall { dir: PathBuf, detail: String },

    #[error("Backup directory {0} does not exist")]
    MissingBackup(PathBuf),
}

/// An [`std::io::Error`] annotated with the path that triggered it.
#[derive(Error, Debug)]
#[error("{path}: {source}")]
pub struct PathIoError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

/// Attaches the offending path to a bare [`std::io::Error`].
pub trait IoContext<T> {
    fn at_path<P: Into<PathBuf>>(self, path: P) -> Result<T, PathIoError>;
}

impl<T> IoContext<T> for Result<T, std::io::Error> {
    fn at_path<P: Into<PathBuf>>(self, path: P) -> Result<T, PathIoError> {
        self.map_err(|source| PathIoError {
            path: path.into(),
            source,
        })
    }
}

impl From<PathIoError> for LegError {
    fn from(err: PathIoError) -> Self {
        LegError::Io {
            path: err.path,
            source: err.source,
        }
    }
}

impl From<PathIoError> for RebuildError {
    fn from(err: PathIoError) -> Self {
        RebuildError::Io {
            path: err.path,
            source: err.source,
        }
    }
}

impl From<PathIoError> for ForecastError {
    fn from(err: PathIoError) -> Self {
        ForecastError::Io {
            path: err.path,
            source: err.source,
        }
    }
}

impl From<PathIoError> for InstallError {
    fn from(err: PathIoError) -> Self {
        InstallError::Io {
            path: err.path,
            source: err.source,
        }
    }
}

impl From<PathIoError> for LayoutError {
    fn from(err: PathIoError) -> Self {
        LayoutError::CantCreateDir {
            path: err.path,
            source: err.source,
        }
    }
}
