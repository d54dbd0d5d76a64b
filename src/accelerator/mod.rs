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

//! Module containing the spin-up accelerator itself.
//!
//! One run of the accelerator walks the stages requested on the
//! command line in a fixed order: restore, rebuild, diagnostic,
//! forecast and replace. Every stage either completes or aborts the
//! run, so a later stage never reads half-written output of an
//! earlier one.
//!
//! The numeric stages (averaging, decomposition and forecasting) run
//! inside the thread pool owned by the [`Session`], so the thread count
//! set in the configuration bounds the parallelism of the whole run.

pub mod catalogue;
pub mod configuration;
pub mod dataset;
pub mod domain;
pub mod eof;
pub mod experiment;
pub mod forecaster;
pub mod legs;
pub mod reader;
pub mod rebuilder;
pub mod replacer;
pub mod rollbacker;
pub mod toolkit;

use crate::{errors::OsaError, ALLOCATOR};
use catalogue::Variable;
use chrono::Datelike;
use clap::Parser;
use configuration::Config;
use domain::{Grid, VerticalRegion};
use experiment::Experiment;
use forecaster::{Forecaster, Method, Mode, Request, Smoothing};
use legs::{
    count_timesteps, earlier_leg, leg_of_year, read_timestep, start_leg, start_year, year_of_leg,
    LegInfo,
};
use log::{debug, info, warn};
use reader::diagnostics::{Averager, Diagnostic, Metric};
use reader::OutputReader;
use rebuilder::Rebuilder;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rollbacker::{BackupPolicy, Rollbacker};
use std::path::PathBuf;
use toolkit::InProcess;

/// Window of the moving average reported for timeseries, in months.
const TIMESERIES_WINDOW: usize = 12;

/// Command line of one accelerator run.
#[derive(Parser, Clone, PartialEq, Debug)]
#[command(name = "osa")]
#[command(about = "Ocean spin-up accelerator: forecast, install and roll back ocean restarts")]
#[command(version)]
pub struct Task {
    /// Name of the experiment
    pub expname: String,

    /// Leg closing the analysis window (or rollback target)
    pub leg: u32,

    /// Length of the analysis window in years
    pub yearspan: u32,

    /// Number of years to project forward
    pub yearleap: u32,

    /// Merge the restart tiles of the leg
    #[arg(long, default_value_t = false)]
    pub rebuild: bool,

    /// Build the forecast restart
    #[arg(long, default_value_t = false)]
    pub forecast: bool,

    /// Install the forecast restart into the run directory
    #[arg(long, default_value_t = false)]
    pub replace: bool,

    /// Roll the experiment back to the leg
    #[arg(long, default_value_t = false)]
    pub restore: bool,

    /// Take a whole-tree backup before rolling back
    #[arg(long, default_value_t = false)]
    pub backup: bool,

    /// Restore the experiment tree from its backup before rolling back
    #[arg(long, default_value_t = false)]
    pub from_backup: bool,

    /// Only verify the restarts of the run directory
    #[arg(long, default_value_t = false)]
    pub check: bool,

    /// Comma-separated variables, overriding the configuration
    #[arg(long, value_delimiter = ',')]
    pub variables: Option<Vec<String>>,

    /// Forecasting kernel, overriding the configuration
    #[arg(long, value_enum)]
    pub method: Option<Method>,

    /// Projection mode, overriding the configuration
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Smoothing switch, overriding the configuration
    #[arg(long, value_enum)]
    pub smoothing: Option<Smoothing>,

    /// Diagnostic product to compute over the window
    #[arg(long)]
    pub diagnostic: Option<String>,

    /// Metric of the diagnostic product
    #[arg(long, default_value = "base")]
    pub metric: String,

    /// Vertical region of timeseries (mixed, pycnocline, abyssal)
    #[arg(long)]
    pub region: Option<String>,

    /// Recompute cached diagnostic products
    #[arg(long, default_value_t = false)]
    pub recompute: bool,

    /// Path of the configuration file
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,
}

/// Main accelerator function, running every requested stage.
pub fn main(task: &Task) -> Result<(), OsaError> {
    info!("Preparing the accelerator session");

    let session = Session::new(task)?;

    session.threadpool.install(|| session.run(task))
}

/// Configuration, experiment layout and thread pool of one run.
#[derive(Debug)]
pub struct Session {
    pub config: Config,
    pub experiment: Experiment,
    pub threadpool: ThreadPool,
}

impl Session {
    /// Reads and checks the configuration, caps the memory
    /// and prepares the thread pool.
    pub fn new(task: &Task) -> Result<Self, OsaError> {
        debug!("Reading configuration from {}", task.config.display());
        let config = Config::new_from_file(&task.config)?;

        Session::from_config(config, &task.expname)
    }

    pub fn from_config(config: Config, expname: &str) -> Result<Self, OsaError> {
        debug!("Setting memory limit");
        ALLOCATOR
            .set_limit(config.resources.memory * 1024 * 1024)
            .map_err(|_| OsaError::MemoryLimit(config.resources.memory))?;

        debug!("Setting up ThreadPool");
        let threadpool = ThreadPoolBuilder::new()
            .num_threads(config.resources.threads as usize)
            .stack_size(2 * 1024 * 1024)
            .build()?;

        let experiment = Experiment::new(expname, &config.paths)?;

        Ok(Session {
            config,
            experiment,
            threadpool,
        })
    }

    pub fn run(&self, task: &Task) -> Result<(), OsaError> {
        let exp = &self.experiment;
        let year_zero = self.config.time.year_zero;

        exp.check_exists()?;

        if task.check {
            self.check()?;
            return Ok(());
        }

        let method = task.method.unwrap_or(self.config.forecast.method);

        if task.restore {
            Rollbacker::new(exp, year_zero).rollback(
                task.leg,
                BackupPolicy {
                    restore: task.from_backup,
                    take: task.backup,
                },
            )?;
        }

        if task.rebuild {
            let rebuilder = Rebuilder::new(exp);
            let mut legs = vec![task.leg];

            if task.forecast && method == Method::Interpolation {
                legs.push(earlier_leg(task.leg, task.yearspan)?);
            }

            for leg in legs {
                let rebuilt = rebuilder.rebuild(leg)?;
                info!(
                    "Leg {} rebuilt at timestep {} into {} and {}",
                    leg,
                    rebuilt.timestep,
                    rebuilt.ocean.display(),
                    rebuilt.ice.display()
                );
            }
        }

        if task.diagnostic.is_none() && !task.forecast {
            if task.replace {
                self.replace(task.leg)?;
            }
            return Ok(());
        }

        start_leg(task.leg, task.yearspan)?;
        let endyear = year_of_leg(task.leg, year_zero);
        let startyear = start_year(endyear, task.yearspan);

        let variables = self.variables(task)?;

        debug!("Reading grid from {}", self.config.model.mesh_file.display());
        let grid = Grid::from_mesh_file(&self.config.model.mesh_file)?;

        if let Some(name) = &task.diagnostic {
            self.diagnose(task, name, &grid, &variables, startyear, endyear)?;
        }

        if task.forecast {
            let request = Request {
                endleg: task.leg,
                yearspan: task.yearspan,
                yearleap: task.yearleap,
                variables,
                method,
                mode: task.mode.unwrap_or(self.config.forecast.mode),
                smoothing: task.smoothing.unwrap_or(self.config.forecast.smoothing),
            };

            self.forecast(&request, &grid)?;
        }

        if task.replace {
            self.replace(task.leg)?;
        }

        Ok(())
    }

    /// Reports the leg bookkeeping and verifies the run-directory restarts.
    fn check(&self) -> Result<(), OsaError> {
        let exp = &self.experiment;
        let time = self.config.time;

        let leg = LegInfo::read(exp)?;
        let timestep = read_timestep(exp)?;

        info!(
            "Experiment {} is at leg {} starting {} with timestep {}",
            exp.name, leg.num, leg.start, timestep
        );

        let start_leg = leg_of_year(leg.start.year(), time.year_zero)?;
        if start_leg != leg.num {
            warn!(
                "Leg {} starts in {} which belongs to leg {}",
                leg.num,
                leg.start.year(),
                start_leg
            );
        }

        let elapsed = count_timesteps(
            time.year_zero,
            year_of_leg(leg.num, time.year_zero) - 1,
            time.steps_per_day,
        );
        if elapsed != timestep {
            warn!(
                "time.step holds {} but {} timesteps precede leg {} from year {}",
                timestep, elapsed, leg.num, time.year_zero
            );
        }

        replacer::check_run_dir(exp)?;

        Ok(())
    }

    /// Variables requested on the command line or in the configuration.
    fn variables(&self, task: &Task) -> Result<Vec<&'static Variable>, OsaError> {
        let names = task
            .variables
            .as_ref()
            .unwrap_or(&self.config.forecast.variables);

        let variables = names
            .iter()
            .map(|name| catalogue::lookup(name.trim()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(variables)
    }

    fn diagnose(
        &self,
        task: &Task,
        name: &str,
        grid: &Grid,
        variables: &[&'static Variable],
        startyear: i32,
        endyear: i32,
    ) -> Result<(), OsaError> {
        let diagnostic = Diagnostic::parse(name)?;
        let metric = Metric::parse(&task.metric)?;

        let mut region = task
            .region
            .as_deref()
            .map(VerticalRegion::parse)
            .transpose()?;

        if region.is_some() && diagnostic != Diagnostic::Timeseries {
            warn!("Vertical region only applies to timeseries, ignoring it");
            region = None;
        }

        let averager = Averager::new(
            &self.experiment,
            grid,
            &self.config.model,
            self.config.reference.as_ref(),
            &self.config.paths,
        );

        for &variable in variables {
            let product = averager.compute(
                variable, startyear, endyear, diagnostic, metric, region, task.recompute,
            )?;

            if diagnostic == Diagnostic::Timeseries {
                let smoothed = product.smoothed(TIMESERIES_WINDOW);
                let running = product.running_mean();

                if let (Some(first), Some(last)) = (smoothed.first(), smoothed.last()) {
                    info!(
                        "{} moving mean went from {:.6} to {:.6}",
                        product.label, first, last
                    );
                }
                if let Some(last) = running.last() {
                    info!("{} running mean is {:.6}", product.label, last);
                }
            }
        }

        Ok(())
    }

    fn forecast(&self, request: &Request, grid: &Grid) -> Result<(), OsaError> {
        let model = &self.config.model;
        let reader = OutputReader::new(&self.experiment, &model.component, &model.freq);
        let toolkit = InProcess;

        let forecaster = Forecaster::new(
            &self.experiment,
            &reader,
            grid,
            &toolkit,
            self.config.time.year_zero,
        );

        for row in forecaster.run(request)? {
            info!(
                "{} forecast with {} changed wet cells by {:.6} on average",
                row.variable,
                row.method.name(),
                row.mean_change
            );
        }

        Ok(())
    }

    fn replace(&self, leg: u32) -> Result<(), OsaError> {
        replacer::replace(&self.experiment, leg)?;
        replacer::check_run_dir(&self.experiment)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line() {
        let task = Task::try_parse_from([
            "osa",
            "lfr0",
            "11",
            "10",
            "100",
            "--rebuild",
            "--forecast",
            "--variables",
            "thetao,so",
            "--method",
            "global-shift",
            "--mode",
            "reco",
            "--recompute",
        ])
        .unwrap();

        assert_eq!(task.expname, "lfr0");
        assert_eq!((task.leg, task.yearspan, task.yearleap), (11, 10, 100));
        assert!(task.rebuild && task.forecast && !task.replace);
        assert_eq!(
            task.variables,
            Some(vec!["thetao".to_string(), "so".to_string()])
        );
        assert_eq!(task.method, Some(Method::GlobalShift));
        assert_eq!(task.mode, Some(Mode::Reco));
        assert_eq!(task.smoothing, None);
        assert_eq!(task.metric, "base");
        assert!(task.recompute);
        assert_eq!(task.config, PathBuf::from("config.yaml"));
    }

    #[test]
    fn command_line_rejects_unknown_method() {
        assert!(Task::try_parse_from(["osa", "lfr0", "11", "10", "100", "--method", "magic"]).is_err());
        assert!(Task::try_parse_from(["osa", "lfr0", "11"]).is_err());
    }
}
