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

//! Module mapping between leg numbers, calendar years
//! and ocean timesteps, and keeping the leg descriptor
//! (`leginfo.yml`) and `time.step` in sync.
//!
//! Leg to year mapping is affine: `year = year_zero + leg - 1`.

use super::experiment::Experiment;
use crate::errors::{IoContext, LegError};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use log::{debug, info};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Calendar year simulated by a given leg.
pub fn year_of_leg(leg: u32, year_zero: i32) -> i32 {
    year_zero + leg as i32 - 1
}

/// Leg simulating a given calendar year.
pub fn leg_of_year(year: i32, year_zero: i32) -> Result<u32, LegError> {
    let leg = i64::from(year) - i64::from(year_zero) + 1;

    if leg < 1 {
        return Err(LegError::OutOfBounds(leg));
    }

    Ok(leg as u32)
}

/// First leg of a window of `yearspan` legs ending at `endleg`.
pub fn start_leg(endleg: u32, yearspan: u32) -> Result<u32, LegError> {
    let leg = i64::from(endleg) - i64::from(yearspan) + 1;

    if leg < 1 {
        return Err(LegError::OutOfBounds(leg));
    }

    Ok(leg as u32)
}

/// Leg whose restart is `yearspan` legs before `endleg`.
pub fn earlier_leg(endleg: u32, yearspan: u32) -> Result<u32, LegError> {
    let leg = i64::from(endleg) - i64::from(yearspan);

    if leg < 1 {
        return Err(LegError::OutOfBounds(leg));
    }

    Ok(leg as u32)
}

/// First year of a window of `yearspan` years ending at `endyear`.
pub fn start_year(endyear: i32, yearspan: u32) -> i32 {
    endyear - yearspan as i32 + 1
}

pub fn forecast_year(year: i32, leap: u32) -> i32 {
    year + leap as i32
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Number of leap years in `[start, end]`.
pub fn count_leap_years(start: i32, end: i32) -> u32 {
    (start..=end).filter(|&y| is_leap_year(y)).count() as u32
}

/// Total number of model timesteps in the years `[start, end]`.
pub fn count_timesteps(start: i32, end: i32, steps_per_day: u32) -> u64 {
    if end < start {
        return 0;
    }

    let years = (end - start + 1) as u64;
    let days = years * 365 + u64::from(count_leap_years(start, end));

    days * u64::from(steps_per_day)
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Season {
    Djf,
    Mam,
    Jja,
    Son,
}

/// Maps a month number (1-12) to its meteorological season.
pub fn season_of_month(month: u32) -> Option<Season> {
    match month {
        12 | 1 | 2 => Some(Season::Djf),
        3..=5 => Some(Season::Mam),
        6..=8 => Some(Season::Jja),
        9..=11 => Some(Season::Son),
        _ => None,
    }
}

/// Current leg as recorded in the leg descriptor.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LegInfo {
    pub num: u32,
    pub start: NaiveDateTime,
}

impl LegInfo {
    pub fn read(experiment: &Experiment) -> Result<Self, LegError> {
        let path = experiment.leginfo();
        let document = read_descriptor(&path)?;

        LegInfo::from_document(&document, path)
    }

    fn from_document(document: &Value, path: PathBuf) -> Result<Self, LegError> {
        let leg = match leg_node(document) {
            Some(leg) if leg.is_mapping() => leg,
            _ => {
                return Err(LegError::MissingKey {
                    path,
                    key: "base.context.experiment.schedule.leg",
                })
            }
        };

        let num = leg
            .get("num")
            .and_then(Value::as_u64)
            .ok_or_else(|| LegError::MissingKey {
                path: path.clone(),
                key: "leg.num",
            })?;

        let start = match leg.get("start") {
            Some(Value::String(start)) => parse_date(start)?,
            _ => {
                return Err(LegError::MissingKey {
                    path,
                    key: "leg.start",
                })
            }
        };

        Ok(LegInfo {
            num: num as u32,
            start,
        })
    }
}

/// Rewrites the leg descriptor with a new leg number and start date.
///
/// Only rewinding (or staying) is allowed, moving forward
/// is the job of the model itself.
pub fn write_leg(
    experiment: &Experiment,
    new_num: u32,
    new_start: NaiveDateTime,
) -> Result<(), LegError> {
    let path = experiment.leginfo();
    let mut document = read_descriptor(&path)?;
    let current = LegInfo::from_document(&document, path.clone())?;

    if new_num > current.num {
        return Err(LegError::RewindForward {
            current: current.num,
            requested: new_num,
        });
    }

    let leg = match leg_node_mut(&mut document) {
        Some(Value::Mapping(leg)) => leg,
        _ => {
            return Err(LegError::MissingKey {
                path,
                key: "base.context.experiment.schedule.leg",
            })
        }
    };

    leg.insert(Value::from("num"), Value::from(u64::from(new_num)));
    leg.insert(
        Value::from("start"),
        Value::from(new_start.format(DATE_FORMAT).to_string()),
    );

    let content = serde_yaml::to_string(&document).map_err(|source| LegError::CantDeserialize {
        path: path.clone(),
        source,
    })?;

    fs::write(&path, content).at_path(&path)?;

    info!(
        "Leg descriptor rewound from leg {} to leg {} starting {}",
        current.num, new_num, new_start
    );

    Ok(())
}

/// Start date moved back by whole years, keeping month and day.
pub fn shift_start(start: NaiveDateTime, years_back: u32) -> Result<NaiveDateTime, LegError> {
    let year = start.year() - years_back as i32;

    start
        .date()
        .with_year(year)
        // 29 February falls back to 28 February in common years
        .or_else(|| NaiveDate::from_ymd_opt(year, start.month(), 28))
        .map(|date| date.and_time(start.time()))
        .ok_or_else(|| LegError::InvalidDate(start.to_string()))
}

pub fn read_timestep(experiment: &Experiment) -> Result<u64, LegError> {
    let path = experiment.timestep_file();
    let content = fs::read_to_string(&path).at_path(&path)?;

    content
        .trim()
        .parse()
        .map_err(|_| LegError::InvalidTimestep {
            path,
            content: content.trim().to_string(),
        })
}

pub fn write_timestep(experiment: &Experiment, timestep: u64) -> Result<(), LegError> {
    let path = experiment.timestep_file();
    debug!("Writing timestep {} to {}", timestep, path.display());

    fs::write(&path, format!("{}\n", timestep)).at_path(&path)?;

    Ok(())
}

fn read_descriptor(path: &Path) -> Result<Value, LegError> {
    if !path.is_file() {
        return Err(LegError::MissingDescriptor(path.to_path_buf()));
    }

    let data = fs::read(path).at_path(path)?;

    serde_yaml::from_slice(&data).map_err(|source| LegError::CantDeserialize {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_date(value: &str) -> Result<NaiveDateTime, LegError> {
    let value = value.trim();

    NaiveDateTime::parse_from_str(value, DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d").map(|date| date.and_hms(0, 0, 0))
        })
        .map_err(|_| LegError::InvalidDate(value.to_string()))
}

// the descriptor is written by the run scripts either with a dotted
// `base.context` key or with nested `base` and `context` mappings
fn leg_node(document: &Value) -> Option<&Value> {
    let context = document
        .get("base.context")
        .or_else(|| document.get("base").and_then(|base| base.get("context")))?;

    context.get("experiment")?.get("schedule")?.get("leg")
}

fn leg_node_mut(document: &mut Value) -> Option<&mut Value> {
    let context = if document.get("base.context").is_some() {
        document.get_mut("base.context")?
    } else {
        document.get_mut("base")?.get_mut("context")?
    };

    context
        .get_mut("experiment")?
        .get_mut("schedule")?
        .get_mut("leg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::configuration::Paths;
    use tempfile::TempDir;

    fn leginfo_document(num: u32, start: &str) -> String {
        format!(
            "base.context:\n  experiment:\n    schedule:\n      leg:\n        num: {}\n        start: \"{}\"\n        end: \"2100-01-01 00:00:00\"\n",
            num, start
        )
    }

    fn experiment(dir: &TempDir) -> Experiment {
        let paths = Paths {
            root: dir.path().to_path_buf(),
            scratch: dir.path().join("scratch"),
            post: dir.path().join("post"),
            rebuild_tool: dir.path().join("rebuild_nemo"),
        };
        let exp = Experiment::new("lfr0", &paths).unwrap();
        fs::create_dir_all(&exp.exp).unwrap();
        exp
    }

    #[test]
    fn year_and_leg() {
        assert_eq!(year_of_leg(1, 1990), 1990);
        assert_eq!(year_of_leg(11, 1990), 2000);
        assert_eq!(leg_of_year(2000, 1990).unwrap(), 11);
        assert!(leg_of_year(1989, 1990).is_err());
        assert_eq!(start_leg(11, 10).unwrap(), 2);
        assert!(start_leg(3, 10).is_err());
        assert_eq!(earlier_leg(11, 10).unwrap(), 1);
        assert!(earlier_leg(10, 10).is_err());
        assert_eq!(start_year(2000, 10), 1991);
        assert_eq!(forecast_year(2000, 20), 2020);
    }

    #[test]
    fn calendar() {
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
        assert!(is_leap_year(1992));
        assert_eq!(count_leap_years(1990, 2000), 3);
        assert_eq!(count_timesteps(1990, 1990, 16), 365 * 16);
        assert_eq!(count_timesteps(1992, 1993, 1), 731);
        assert_eq!(count_timesteps(1993, 1992, 1), 0);
        assert_eq!(season_of_month(12), Some(Season::Djf));
        assert_eq!(season_of_month(1), Some(Season::Djf));
        assert_eq!(season_of_month(7), Some(Season::Jja));
        assert_eq!(season_of_month(13), None);
    }

    #[test]
    fn read_and_rewind() {
        let dir = TempDir::new().unwrap();
        let exp = experiment(&dir);
        fs::write(exp.leginfo(), leginfo_document(12, "2001-01-01 00:00:00")).unwrap();

        let info = LegInfo::read(&exp).unwrap();
        assert_eq!(info.num, 12);
        assert_eq!(info.start.year(), 2001);

        let new_start = shift_start(info.start, 7).unwrap();
        write_leg(&exp, 5, new_start).unwrap();

        let info = LegInfo::read(&exp).unwrap();
        assert_eq!(info.num, 5);
        assert_eq!(info.start.year(), 1994);

        // other keys survive the rewrite
        let content = fs::read_to_string(exp.leginfo()).unwrap();
        assert!(content.contains("2100-01-01"));
    }

    #[test]
    fn refuses_forward() {
        let dir = TempDir::new().unwrap();
        let exp = experiment(&dir);
        fs::write(exp.leginfo(), leginfo_document(3, "1992-01-01")).unwrap();

        let start = LegInfo::read(&exp).unwrap().start;
        let result = write_leg(&exp, 10, start);

        assert!(matches!(
            result,
            Err(LegError::RewindForward {
                current: 3,
                requested: 10
            })
        ));
        assert_eq!(LegInfo::read(&exp).unwrap().num, 3);
    }

    #[test]
    fn missing_descriptor() {
        let dir = TempDir::new().unwrap();
        let exp = experiment(&dir);

        assert!(matches!(
            LegInfo::read(&exp),
            Err(LegError::MissingDescriptor(_))
        ));
    }

    #[test]
    fn leg_must_be_a_mapping() {
        let dir = TempDir::new().unwrap();
        let exp = experiment(&dir);
        let document = "base.context:\n  experiment:\n    schedule:\n      leg: [4, 1993-01-01]\n";
        fs::write(exp.leginfo(), document).unwrap();

        assert!(matches!(
            LegInfo::read(&exp),
            Err(LegError::MissingKey { .. })
        ));

        let start = NaiveDate::from_ymd(1990, 1, 1).and_hms(0, 0, 0);
        assert!(matches!(
            write_leg(&exp, 1, start),
            Err(LegError::MissingKey { .. })
        ));
        assert_eq!(fs::read_to_string(exp.leginfo()).unwrap(), document);
    }

    #[test]
    fn nested_context() {
        let dir = TempDir::new().unwrap();
        let exp = experiment(&dir);
        fs::write(
            exp.leginfo(),
            "base:\n  context:\n    experiment:\n      schedule:\n        leg:\n          num: 4\n          start: 1993-01-01T00:00:00\n",
        )
        .unwrap();

        assert_eq!(LegInfo::read(&exp).unwrap().num, 4);
    }

    #[test]
    fn timestep_file() {
        let dir = TempDir::new().unwrap();
        let exp = experiment(&dir);

        write_timestep(&exp, 43800).unwrap();
        assert_eq!(read_timestep(&exp).unwrap(), 43800);
    }

    #[test]
    fn leap_day_shift() {
        let start = NaiveDate::from_ymd(1992, 2, 29).and_hms(0, 0, 0);
        let shifted = shift_start(start, 1).unwrap();
        assert_eq!(shifted.date(), NaiveDate::from_ymd(1991, 2, 28));
    }
}
