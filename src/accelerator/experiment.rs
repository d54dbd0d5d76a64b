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

//! Module resolving the on-disk layout of an experiment.
//!
//! Other parts of the accelerator never build paths by hand,
//! they ask the [`Experiment`] for them.

use super::configuration::Paths;
use crate::errors::{IoContext, LayoutError};
use log::debug;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Path bundle of a single experiment.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Experiment {
    pub name: String,
    /// Run directory read by the model at launch.
    pub exp: PathBuf,
    pub nemo: PathBuf,
    pub oifs: PathBuf,
    pub restart: PathBuf,
    pub log: PathBuf,
    pub tmp: PathBuf,
    pub rebuild_tool: PathBuf,
    pub post: PathBuf,
}

impl Experiment {
    pub fn new(name: &str, paths: &Paths) -> Result<Self, LayoutError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(LayoutError::InvalidName(name.to_string()));
        }

        let exp = paths.root.join(name);

        Ok(Experiment {
            name: name.to_string(),
            nemo: exp.join("output").join("nemo"),
            oifs: exp.join("output").join("oifs"),
            restart: exp.join("restart"),
            log: exp.join("log"),
            tmp: paths.scratch.join(name),
            rebuild_tool: paths.rebuild_tool.clone(),
            post: paths.post.join(name),
            exp,
        })
    }

    /// Fails when the run directory is absent.
    pub fn check_exists(&self) -> Result<(), LayoutError> {
        if self.exp.is_dir() {
            Ok(())
        } else {
            Err(LayoutError::MissingDir(self.exp.clone()))
        }
    }

    pub fn restart_dir(&self, leg: u32) -> PathBuf {
        self.restart.join(leg_token(leg))
    }

    pub fn log_dir(&self, leg: u32) -> PathBuf {
        self.log.join(leg_token(leg))
    }

    pub fn tmp_dir(&self, leg: u32) -> PathBuf {
        self.tmp.join(leg_token(leg))
    }

    pub fn leginfo(&self) -> PathBuf {
        self.exp.join("leginfo.yml")
    }

    pub fn timestep_file(&self) -> PathBuf {
        self.exp.join("time.step")
    }

    pub fn backup(&self) -> PathBuf {
        let mut name = self.exp.as_os_str().to_owned();
        name.push(crate::constants::BACKUP_SUFFIX);
        PathBuf::from(name)
    }

    /// Layout of the whole-tree backup, sharing scratch and post directories.
    pub fn backup_layout(&self) -> Experiment {
        let exp = self.backup();

        Experiment {
            name: self.name.clone(),
            nemo: exp.join("output").join("nemo"),
            oifs: exp.join("output").join("oifs"),
            restart: exp.join("restart"),
            log: exp.join("log"),
            tmp: self.tmp.clone(),
            rebuild_tool: self.rebuild_tool.clone(),
            post: self.post.clone(),
            exp,
        }
    }
}

/// Zero-padded three-digit leg directory name.
pub fn leg_token(leg: u32) -> String {
    format!("{:03}", leg)
}

/// Parses a leg directory name back into a leg number.
pub fn parse_leg_token(name: &str) -> Option<u32> {
    if name.len() == 3 && name.chars().all(|c| c.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

/// Creates the directory (and parents) if it does not exist yet.
pub fn ensure_dir(path: &Path) -> Result<(), LayoutError> {
    if !path.is_dir() {
        debug!("Creating directory {}", path.display());
        fs::create_dir_all(path).at_path(path)?;
    }

    Ok(())
}
