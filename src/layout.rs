use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::{
    error::ArchError,
    remote::{FileReference, RemoteFile},
};

static YEAR_DOY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"A(\d{7})").expect("static regex"));

/// Where a product family hides the acquisition date in its file names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateScheme {
    /// `...A2020001...`: year and day of year after a literal `A`.
    YearDayOfYear,
    /// Third `_` separated field starts with `YYYYmMMDD`, e.g. `2018m0101t0059-o71600`.
    UnderscoreYearMonth,
}

impl DateScheme {
    pub fn parse(self, filename: &str) -> Result<NaiveDate, ArchError> {
        match self {
            DateScheme::YearDayOfYear => parse_year_doy(filename),
            DateScheme::UnderscoreYearMonth => parse_underscore_year_month(filename),
        }
    }
}

fn parse_year_doy(filename: &str) -> Result<NaiveDate, ArchError> {
    let token = YEAR_DOY_RE
        .captures(filename)
        .map(|caps| caps[1].to_owned())
        .ok_or_else(|| ArchError::malformed(filename, "missing A<yyyyddd> token"))?;

    let year: i32 = token[..4]
        .parse()
        .map_err(|_| ArchError::malformed(filename, "bad year"))?;
    let doy: u32 = token[4..]
        .parse()
        .map_err(|_| ArchError::malformed(filename, "bad day of year"))?;

    NaiveDate::from_yo_opt(year, doy)
        .ok_or_else(|| ArchError::malformed(filename, format!("day of year {} out of range", doy)))
}

fn parse_underscore_year_month(filename: &str) -> Result<NaiveDate, ArchError> {
    let field = filename
        .split('_')
        .nth(2)
        .ok_or_else(|| ArchError::malformed(filename, "fewer than three '_' fields"))?;

    let digits = |range: std::ops::Range<usize>| -> Option<u32> {
        let s = field.get(range)?;
        if s.chars().all(|c| c.is_ascii_digit()) {
            s.parse().ok()
        } else {
            None
        }
    };

    let year = digits(0..4).ok_or_else(|| ArchError::malformed(filename, "bad year"))?;
    let month = digits(5..7)
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| ArchError::malformed(filename, "bad month"))?;
    // Month granularity is all the layout needs; the day is kept when present.
    let day = digits(7..9).unwrap_or(1);

    NaiveDate::from_ymd_opt(year as i32, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year as i32, month, 1))
        .ok_or_else(|| ArchError::malformed(filename, "invalid calendar date"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirPolicy {
    /// `<root>/<yyyy>/`
    Year,
    /// `<root>/<yyyy>/<mm>/`
    YearMonth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreatePolicy {
    /// Create one missing level at a time; the parent of the archive root must exist.
    SingleLevel,
    Recursive,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivePath {
    pub dir: PathBuf,
    pub file: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub scheme: DateScheme,
    pub dirs: DirPolicy,
    pub create: CreatePolicy,
}

impl ArchiveLayout {
    pub fn new(scheme: DateScheme, dirs: DirPolicy, create: CreatePolicy) -> Self {
        Self {
            scheme,
            dirs,
            create,
        }
    }

    /// Attach the embedded date to a listed file.
    pub fn reference(&self, remote: RemoteFile) -> Result<FileReference, ArchError> {
        FileReference::parse(remote, self.scheme)
    }

    /// Pure: the same root and reference always give the same path.
    pub fn resolve_path(&self, root: &Path, reference: &FileReference) -> ArchivePath {
        let date = reference.embedded_date;

        let mut dir = root.to_path_buf();
        dir.push(format!("{:04}", date.year()));
        if self.dirs == DirPolicy::YearMonth {
            dir.push(format!("{:02}", date.month()));
        }

        let file = dir.join(&reference.remote.filename);
        ArchivePath { dir, file }
    }

    pub fn prepare_root(&self, root: &Path) -> Result<(), ArchError> {
        match self.create {
            CreatePolicy::Recursive => create_all(root),
            CreatePolicy::SingleLevel => create_level(root),
        }
    }

    /// Create whatever directory levels of `path.dir` are missing.
    pub fn prepare(&self, root: &Path, path: &ArchivePath) -> Result<(), ArchError> {
        match self.create {
            CreatePolicy::Recursive => create_all(&path.dir),
            CreatePolicy::SingleLevel => {
                create_level(root)?;

                let relative = path.dir.strip_prefix(root).unwrap_or_else(|_| Path::new(""));
                let mut current = root.to_path_buf();
                for component in relative.components() {
                    current.push(component);
                    create_level(&current)?;
                }

                Ok(())
            }
        }
    }
}

fn create_all(dir: &Path) -> Result<(), ArchError> {
    if dir.is_dir() {
        return Ok(());
    }

    log::debug!("Creating path: {:?}", dir);
    fs::create_dir_all(dir).map_err(|err| ArchError::io(dir, err))
}

fn create_level(dir: &Path) -> Result<(), ArchError> {
    if dir.is_dir() {
        return Ok(());
    }

    log::debug!("Creating directory: {:?}", dir);
    match fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(ArchError::io(dir, err)),
    }
}
