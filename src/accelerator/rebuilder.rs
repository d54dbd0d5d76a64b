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

//! Module merging per-rank restart tiles with the external
//! tile-merge tool.
//!
//! Tiles `<exp>_<timestep>_restart[_ice]_<RRRR>.nc` of a leg are linked
//! into the scratch directory of that leg, where the tool is invoked as
//! `<tool> -m <prefix> <N>` and leaves `<prefix>.nc` behind.

use super::experiment::{ensure_dir, Experiment};
use crate::errors::{IoContext, RebuildError};
use log::{debug, error, info};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Kind {
    Ocean,
    Ice,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Ocean => "ocean",
            Kind::Ice => "ice",
        }
    }

    /// Part of the file name following the timestep.
    pub fn tag(&self) -> &'static str {
        match self {
            Kind::Ocean => "restart",
            Kind::Ice => "restart_ice",
        }
    }
}

/// Complete set of tiles of one kind, ordered by rank.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TileSet {
    pub kind: Kind,
    pub timestep: String,
    pub tiles: Vec<PathBuf>,
}

impl TileSet {
    /// File prefix shared by the tiles and the merged file.
    pub fn prefix(&self, expname: &str) -> String {
        format!("{}_{}_{}", expname, self.timestep, self.kind.tag())
    }

    pub fn timestep_value(&self) -> Result<u64, RebuildError> {
        self.timestep
            .parse()
            .map_err(|_| RebuildError::InvalidTimestep(self.timestep.clone()))
    }
}

/// Splits a tile file name into timestep, kind and rank.
pub fn parse_tile_name(expname: &str, name: &str) -> Option<(String, Kind, usize)> {
    let stem = name.strip_prefix(expname)?.strip_prefix('_')?.strip_suffix(".nc")?;

    let (timestep, rest) = stem.split_once('_')?;
    let (tag, rank) = rest.rsplit_once('_')?;

    if timestep.is_empty()
        || !timestep.chars().all(|c| c.is_ascii_digit())
        || rank.len() != 4
        || !rank.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let kind = match tag {
        "restart" => Kind::Ocean,
        "restart_ice" => Kind::Ice,
        _ => return None,
    };

    Some((timestep.to_string(), kind, rank.parse().ok()?))
}

/// Tiles of `kind` in `dir`, `None` when there are none.
pub fn find_tiles(dir: &Path, expname: &str, kind: Kind) -> Result<Option<TileSet>, RebuildError> {
    let mut found: Vec<(usize, String, PathBuf)> = vec![];

    for entry in fs::read_dir(dir).at_path(dir)? {
        let path = entry.at_path(dir)?.path();

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        if let Some((timestep, tile_kind, rank)) = parse_tile_name(expname, &name) {
            if tile_kind == kind {
                found.push((rank, timestep, path));
            }
        }
    }

    if found.is_empty() {
        return Ok(None);
    }

    found.sort_by_key(|(rank, _, _)| *rank);

    let timestep = found[0].1.clone();
    if let Some((_, other, _)) = found.iter().find(|(_, ts, _)| *ts != timestep) {
        return Err(RebuildError::InconsistentTimestep {
            dir: dir.to_path_buf(),
            first: timestep,
            other: other.clone(),
        });
    }

    for (expected, (rank, _, _)) in found.iter().enumerate() {
        if *rank != expected {
            return Err(RebuildError::MissingRank {
                kind: kind.name(),
                rank: expected,
                dir: dir.to_path_buf(),
            });
        }
    }

    Ok(Some(TileSet {
        kind,
        timestep,
        tiles: found.into_iter().map(|(_, _, path)| path).collect(),
    }))
}

/// Both tile sets of a leg, failing when either kind is absent.
pub fn find_both(dir: &Path, expname: &str) -> Result<(TileSet, TileSet), RebuildError> {
    let ocean = find_tiles(dir, expname, Kind::Ocean)?;
    let ice = find_tiles(dir, expname, Kind::Ice)?;

    match (ocean, ice) {
        (Some(ocean), Some(ice)) => Ok((ocean, ice)),
        (None, _) => Err(RebuildError::MissingKind {
            kind: Kind::Ocean.name(),
            dir: dir.to_path_buf(),
        }),
        (_, None) => Err(RebuildError::MissingKind {
            kind: Kind::Ice.name(),
            dir: dir.to_path_buf(),
        }),
    }
}

/// Merged restarts of one leg.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Rebuilt {
    pub ocean: PathBuf,
    pub ice: PathBuf,
    pub timestep: u64,
}

pub struct Rebuilder<'a> {
    experiment: &'a Experiment,
}

impl<'a> Rebuilder<'a> {
    pub fn new(experiment: &'a Experiment) -> Self {
        Rebuilder { experiment }
    }

    /// Merges the ocean and ice tiles of `leg` into `tmp/<leg>` and
    /// keeps a copy of the merged files in `restart/<leg>`.
    pub fn rebuild(&self, leg: u32) -> Result<Rebuilt, RebuildError> {
        let restart_dir = self.experiment.restart_dir(leg);
        let tmp_dir = self.experiment.tmp_dir(leg);

        info!("Rebuilding restarts of leg {} of {}", leg, self.experiment.name);

        ensure_dir(&tmp_dir)?;
        let (ocean_tiles, ice_tiles) = find_both(&restart_dir, &self.experiment.name)?;
        let timestep = ocean_tiles.timestep_value()?;

        Ok(Rebuilt {
            ocean: self.merge(&ocean_tiles, &tmp_dir, &restart_dir)?,
            ice: self.merge(&ice_tiles, &tmp_dir, &restart_dir)?,
            timestep,
        })
    }

    fn merge(&self, set: &TileSet, tmp_dir: &Path, restart_dir: &Path) -> Result<PathBuf, RebuildError> {
        let prefix = set.prefix(&self.experiment.name);
        debug!("Merging {} {} tiles of {}", set.tiles.len(), set.kind.name(), prefix);

        let mut links = vec![];
        for tile in &set.tiles {
            let link = match tile.file_name() {
                Some(name) => tmp_dir.join(name),
                None => continue,
            };

            if link.symlink_metadata().is_ok() {
                fs::remove_file(&link).at_path(&link)?;
            }
            symlink(tile, &link).at_path(&link)?;
            links.push(link);
        }

        let output = Command::new(&self.experiment.rebuild_tool)
            .arg("-m")
            .arg(&prefix)
            .arg(set.tiles.len().to_string())
            .current_dir(tmp_dir)
            .output();

        for link in &links {
            fs::remove_file(link).at_path(link)?;
        }
        remove_namelists(tmp_dir)?;
        if let Ok(cwd) = std::env::current_dir() {
            remove_namelists(&cwd)?;
        }

        let output = output.at_path(&self.experiment.rebuild_tool)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("Tile-merge of {} failed: {}", prefix, stderr);

            return Err(RebuildError::ToolFailed {
                tool: self.experiment.rebuild_tool.clone(),
                prefix,
                status: output.status.to_string(),
                stderr,
            });
        }

        let merged = tmp_dir.join(format!("{}.nc", prefix));
        if !merged.is_file() {
            return Err(RebuildError::MissingOutput(merged));
        }

        let kept = restart_dir.join(format!("{}.nc", prefix));
        fs::copy(&merged, &kept).at_path(&kept)?;
        info!("Rebuilt {}", merged.display());

        Ok(merged)
    }
}

/// Deletes the `nam_rebuild*` files the tool drops in its working directory.
fn remove_namelists(dir: &Path) -> Result<(), RebuildError> {
    for entry in fs::read_dir(dir).at_path(dir)? {
        let path = entry.at_path(dir)?.path();

        let is_namelist = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("nam_rebuild"))
            .unwrap_or(false);

        if is_namelist && path.is_file() {
            debug!("Removing {}", path.display());
            fs::remove_file(&path).at_path(&path)?;
        }
    }

    Ok(())
}
