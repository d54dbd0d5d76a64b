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

//! Ocean Spin-up Accelerator (OSA) shortens the multi-millennial
//! equilibration of the ocean component of a coupled Earth-system
//! model by periodically projecting the ocean state far into the
//! future and restarting the model from the projection.
//!
//! Each run of the accelerator can merge per-rank restart tiles,
//! compute averaged diagnostics of the monthly output, forecast the
//! ocean state from the winter variability of a window of years,
//! install the forecast restart and roll an experiment back to an
//! earlier leg.

mod accelerator;
mod constants;
mod errors;


use accelerator::Task;
use cap::Cap;
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::{alloc, process};

type Float = f64;

/// Global allocator used by the accelerator.
///
/// Use of static global allocator allows for capping the memory to the limit set by user
/// in configuration file and in effect provide better [OOM error](https://en.wikipedia.org/wiki/Out_of_memory) handling.
#[global_allocator]
static ALLOCATOR: Cap<alloc::System> = Cap::new(alloc::System, usize::MAX);

/// The main program function.
/// Prepares the runtime environment and calls the [`accelerator::main`].
///
/// To provide meaningful and high-quality error messages the `env_logger`
/// needs to be initiated before any log messages are possible to occur.
/// A failed stage ends the process with a nonzero exit status so that
/// job scripts can stop the experiment.
fn main() {
    #[cfg(not(feature = "debug"))]
    let logger_env = Env::new().filter_or("OSA_LOG_LEVEL", "info");

    #[cfg(feature = "debug")]
    let logger_env = Env::new().filter_or("OSA_LOG_LEVEL", "debug");

    env_logger::Builder::from_env(logger_env)
        .format_timestamp_millis()
        .init();

    let task = Task::parse();

    match accelerator::main(&task) {
        Ok(_) => info!("Accelerator run finished. Check the scratch directory and log."),
        Err(err) => {
            error!("Accelerator run failed with error: {}", err);
            process::exit(1);
        }
    }
}
