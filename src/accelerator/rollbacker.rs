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

//! Module rewinding an experiment to an earlier leg.
//!
//! Everything that could make the rewind partial is checked before
//! the first file is touched.

use super::experiment::{parse_leg_token, Experiment};
use super::legs::{shift_start, write_leg, write_timestep, year_of_leg, LegInfo};
use super::rebuilder::{find_both, parse_tile_name, Kind, TileSet};
use crate::errors::{InstallError, IoContext, LegError};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

/// What to do with the whole-tree backup `<exp>-backup`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct BackupPolicy {
    /// Restore the experiment from the backup before rewinding.
    pub restore: bool,
    /// Take a fresh backup before rewinding.
    pub take: bool,
}

pub struct Rollbacker<'a> {
    experiment: &'a Experiment,
    year_zero: i32,
}

impl<'a> Rollbacker<'a> {
    pub fn new(experiment: &'a Experiment, year_zero: i32) -> Self {
        Rollbacker {
            experiment,
            year_zero,
        }
    }

    pub fn rollback(&self, target: u32, backup: BackupPolicy) -> Result<(), InstallError> {
        let exp = self.experiment;

        if backup.restore {
            let layout = exp.backup_layout();
            if !layout.exp.is_dir() {
                return Err(InstallError::MissingBackup(layout.exp));
            }

            // checked against the backup before it replaces the run directory
            plan(&layout, target)?;
            self.restore_backup()?;
        }

        let Plan {
            current,
            target_dir,
            ocean,
            ice,
            timestep,
            new_start,
        } = plan(exp, target)?;

        info!(
            "Rolling {} back from leg {} to leg {}",
            exp.name, current.num, target
        );

        if backup.take {
            self.take_backup()?;
        }

        purge_run_dir(&exp.exp)?;
        remove_rebuilt(&target_dir, &exp.name)?;
        remove_legs_after(&exp.restart, target)?;
        remove_legs_after(&exp.log, target.saturating_sub(1))?;

        let last_year = year_of_leg(target, self.year_zero);
        for dir in [&exp.nemo, &exp.oifs] {
            remove_outputs_after(dir, last_year)?;
        }

        write_timestep(exp, timestep)?;
        write_leg(exp, target, new_start)?;

        self.restage(&target_dir, &ocean, &ice)?;

        info!(
            "Experiment {} now starts leg {} at timestep {}",
            exp.name, target, timestep
        );

        Ok(())
    }

    /// Copies coupler files, links surface restarts and links the
    /// ocean and ice tiles under their short names.
    fn restage(&self, target_dir: &Path, ocean: &TileSet, ice: &TileSet) -> Result<(), InstallError> {
        let run_dir = &self.experiment.exp;

        for entry in fs::read_dir(target_dir).at_path(target_dir)? {
            let path = entry.at_path(target_dir)?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            if (name.starts_with("rst") && name.ends_with(".nc")) || name == "rcf" {
                let copy = run_dir.join(&name);
                fs::copy(&path, &copy).at_path(&copy)?;
            } else if name.starts_with("srf") {
                let link = run_dir.join(&name);
                symlink(&path, &link).at_path(&link)?;
            }
        }

        for set in [ocean, ice] {
            for (rank, tile) in set.tiles.iter().enumerate() {
                let link = run_dir.join(short_name(set.kind, rank, set.tiles.len()));
                symlink(tile, &link).at_path(&link)?;
                debug!("Linked {} to {}", link.display(), tile.display());
            }
        }

        Ok(())
    }

    fn take_backup(&self) -> Result<(), InstallError> {
        let backup = self.experiment.backup();
        info!("Taking backup {}", backup.display());

        if backup.exists() {
            fs::remove_dir_all(&backup).at_path(&backup)?;
        }

        copy_tree(&self.experiment.exp, &backup)
    }

    fn restore_backup(&self) -> Result<(), InstallError> {
        let backup = self.experiment.backup();

        if !backup.is_dir() {
            return Err(InstallError::MissingBackup(backup));
        }

        warn!(
            "Restoring {} from backup {}",
            self.experiment.exp.display(),
            backup.display()
        );

        if self.experiment.exp.exists() {
            fs::remove_dir_all(&self.experiment.exp).at_path(&self.experiment.exp)?;
        }

        copy_tree(&backup, &self.experiment.exp)
    }
}

/// Everything a rewind needs, gathered before the first file is touched.
struct Plan {
    current: LegInfo,
    target_dir: PathBuf,
    ocean: TileSet,
    ice: TileSet,
    timestep: u64,
    new_start: NaiveDateTime,
}

fn plan(layout: &Experiment, target: u32) -> Result<Plan, InstallError> {
    let current = LegInfo::read(layout)?;

    if target == 0 {
        return Err(LegError::OutOfBounds(0).into());
    }
    if target > current.num {
        return Err(LegError::RewindForward {
            current: current.num,
            requested: target,
        }
        .into());
    }

    let target_dir = layout.restart_dir(target);
    let (ocean, ice) = find_both(&target_dir, &layout.name).map_err(|_| {
        InstallError::IncompleteTileSet {
            leg: target,
            dir: target_dir.clone(),
        }
    })?;
    let timestep = ocean.timestep_value()?;
    let new_start = shift_start(current.start, current.num - target)?;

    Ok(Plan {
        current,
        target_dir,
        ocean,
        ice,
        timestep,
        new_start,
    })
}

/// Run-directory name of a tile, `restart.nc` style for single-rank sets.
pub fn short_name(kind: Kind, rank: usize, ranks: usize) -> String {
    if ranks == 1 {
        format!("{}.nc", kind.tag())
    } else {
        format!("{}_{:04}.nc", kind.tag(), rank)
    }
}

/// Removes coupler restarts, surface restarts, ocean and ice
/// restarts and the coupler token from the run directory.
fn purge_run_dir(run_dir: &Path) -> Result<(), InstallError> {
    for entry in fs::read_dir(run_dir).at_path(run_dir)? {
        let path = entry.at_path(run_dir)?.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        let transient = (name.starts_with("rst") && name.ends_with(".nc"))
            || name.starts_with("srf")
            || (name.contains("restart") && name.ends_with(".nc"))
            || name == "rcf";

        let is_dir = path
            .symlink_metadata()
            .map(|m| m.is_dir())
            .unwrap_or(false);

        if transient && !is_dir {
            debug!("Purging {}", path.display());
            fs::remove_file(&path).at_path(&path)?;
        }
    }

    Ok(())
}

/// Removes the merged (non-tile) restarts of a restart directory.
fn remove_rebuilt(dir: &Path, expname: &str) -> Result<(), InstallError> {
    for entry in fs::read_dir(dir).at_path(dir)? {
        let path = entry.at_path(dir)?.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        if name.contains("restart")
            && name.ends_with(".nc")
            && parse_tile_name(expname, &name).is_none()
        {
            debug!("Removing rebuilt restart {}", path.display());
            fs::remove_file(&path).at_path(&path)?;
        }
    }

    Ok(())
}

/// Removes every `NNN` leg directory with `NNN > last`.
fn remove_legs_after(dir: &Path, last: u32) -> Result<(), InstallError> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(dir).at_path(dir)? {
        let path = entry.at_path(dir)?.path();
        let leg = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_leg_token);

        if matches!(leg, Some(leg) if leg > last) && path.is_dir() {
            debug!("Removing {}", path.display());
            fs::remove_dir_all(&path).at_path(&path)?;
        }
    }

    Ok(())
}

/// Last year of an output file named `..._<y1>-<y2>.nc`.
pub fn output_end_year(name: &str) -> Option<i32> {
    let stem = name.strip_suffix(".nc")?;
    let (_, range) = stem.rsplit_once('_')?;
    let (first, last) = range.split_once('-')?;

    first.parse::<i32>().ok()?;
    last.parse().ok()
}

fn remove_outputs_after(dir: &Path, last_year: i32) -> Result<(), InstallError> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(dir).at_path(dir)? {
        let path = entry.at_path(dir)?.path();
        let end = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(output_end_year);

        if matches!(end, Some(end) if end > last_year) && path.is_file() {
            debug!("Removing output {}", path.display());
            fs::remove_file(&path).at_path(&path)?;
        }
    }

    Ok(())
}

/// Recursive copy keeping symbolic links as links.
fn copy_tree(from: &Path, to: &Path) -> Result<(), InstallError> {
    fs::create_dir_all(to).at_path(to)?;

    for entry in fs::read_dir(from).at_path(from)? {
        let entry = entry.at_path(from)?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        let file_type = entry.file_type().at_path(&source)?;

        if file_type.is_symlink() {
            let pointee = fs::read_link(&source).at_path(&source)?;
            symlink(&pointee, &target).at_path(&target)?;
        } else if file_type.is_dir() {
            copy_tree(&source, &target)?;
        } else {
            fs::copy(&source, &target).at_path(&target)?;
        }
    }

    Ok(())
}
