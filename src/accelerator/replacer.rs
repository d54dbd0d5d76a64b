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

//! Module installing a forecast restart into the run directory.
//!
//! The canonical copy always lands in `restart/<leg>` first, the run
//! directory only receives symbolic links to it.

use super::experiment::{ensure_dir, Experiment};
use crate::errors::{InstallError, IoContext};
use log::{debug, info};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

pub const OCEAN_RESTART: &str = "restart.nc";
pub const ICE_RESTART: &str = "restart_ice.nc";

/// Replaces the restarts of the run directory with
/// the forecast built in the scratch directory of `leg`.
pub fn replace(experiment: &Experiment, leg: u32) -> Result<(), InstallError> {
    let source_dir = experiment.tmp_dir(leg);
    let target_dir = experiment.restart_dir(leg);

    info!(
        "Installing forecast restart of leg {} into {}",
        leg,
        experiment.exp.display()
    );

    let sources: Vec<_> = [OCEAN_RESTART, ICE_RESTART]
        .iter()
        .map(|name| source_dir.join(name))
        .collect();

    if let Some(missing) = sources.iter().find(|s| !s.is_file()) {
        return Err(InstallError::MissingFile(missing.clone()));
    }

    remove_restarts(&experiment.exp)?;
    ensure_dir(&target_dir)?;

    for (source, name) in sources.iter().zip([OCEAN_RESTART, ICE_RESTART]) {
        let canonical = target_dir.join(name);
        fs::copy(source, &canonical).at_path(&canonical)?;

        let link = experiment.exp.join(name);
        symlink(&canonical, &link).at_path(&link)?;
        debug!("Linked {} to {}", link.display(), canonical.display());
    }

    Ok(())
}

/// Removes `restart*.nc` entries of the run directory.
fn remove_restarts(dir: &Path) -> Result<(), InstallError> {
    for entry in fs::read_dir(dir).at_path(dir)? {
        let path = entry.at_path(dir)?.path();

        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("restart") && n.ends_with(".nc"))
            .unwrap_or(false);

        if matches {
            debug!("Removing {}", path.display());
            fs::remove_file(&path).at_path(&path)?;
        }
    }

    Ok(())
}

/// Fails when the run directory holds only one of the two restarts
/// or when one of them is a dangling link.
pub fn check_run_dir(experiment: &Experiment) -> Result<(), InstallError> {
    let mut present = vec![];

    for name in [OCEAN_RESTART, ICE_RESTART] {
        let path = experiment.exp.join(name);

        if path.symlink_metadata().is_ok() {
            if fs::metadata(&path).is_err() {
                return Err(InstallError::PartialInstall {
                    dir: experiment.exp.clone(),
                    detail: format!("{} is a dangling link", name),
                });
            }
            present.push(name);
        }
    }

    if present.len() == 1 {
        return Err(InstallError::PartialInstall {
            dir: experiment.exp.clone(),
            detail: format!("only {} is present", present[0]),
        });
    }

    info!(
        "Run directory {} holds {} restarts",
        experiment.exp.display(),
        if present.is_empty() { "no" } else { "both" }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::configuration::Paths;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> Experiment {
        let paths = Paths {
            root: dir.path().join("exps"),
            scratch: dir.path().join("scratch"),
            post: dir.path().join("post"),
            rebuild_tool: dir.path().join("rebuild_nemo"),
        };
        let exp = Experiment::new("lfr0", &paths).unwrap();
        fs::create_dir_all(&exp.exp).unwrap();
        fs::create_dir_all(exp.tmp_dir(11)).unwrap();
        exp
    }

    #[test]
    fn installs_links() {
        let dir = TempDir::new().unwrap();
        let exp = setup(&dir);

        fs::write(exp.tmp_dir(11).join(OCEAN_RESTART), b"ocean").unwrap();
        fs::write(exp.tmp_dir(11).join(ICE_RESTART), b"ice").unwrap();
        fs::write(exp.exp.join("restart_0000.nc"), b"old").unwrap();
        fs::write(exp.exp.join("namelist_cfg"), b"keep").unwrap();

        replace(&exp, 11).unwrap();

        let link = exp.exp.join(OCEAN_RESTART);
        assert_eq!(fs::read_link(&link).unwrap(), exp.restart_dir(11).join(OCEAN_RESTART));
        assert_eq!(fs::read(&link).unwrap(), b"ocean");
        assert_eq!(fs::read(exp.exp.join(ICE_RESTART)).unwrap(), b"ice");
        assert!(!exp.exp.join("restart_0000.nc").exists());
        assert!(exp.exp.join("namelist_cfg").is_file());

        check_run_dir(&exp).unwrap();

        // second installation replaces the links
        replace(&exp, 11).unwrap();
        check_run_dir(&exp).unwrap();
    }

    #[test]
    fn refuses_missing_forecast() {
        let dir = TempDir::new().unwrap();
        let exp = setup(&dir);
        fs::write(exp.tmp_dir(11).join(OCEAN_RESTART), b"ocean").unwrap();
        fs::write(exp.exp.join("restart.nc"), b"old").unwrap();

        assert!(matches!(replace(&exp, 11), Err(InstallError::MissingFile(_))));
        // nothing was touched
        assert!(exp.exp.join("restart.nc").is_file());
    }

    #[test]
    fn detects_partial_install() {
        let dir = TempDir::new().unwrap();
        let exp = setup(&dir);

        check_run_dir(&exp).unwrap();

        fs::write(exp.exp.join(OCEAN_RESTART), b"ocean").unwrap();
        assert!(matches!(
            check_run_dir(&exp),
            Err(InstallError::PartialInstall { .. })
        ));

        symlink(exp.restart_dir(3).join(ICE_RESTART), exp.exp.join(ICE_RESTART)).unwrap();
        assert!(matches!(
            check_run_dir(&exp),
            Err(InstallError::PartialInstall { .. })
        ));
    }
}
