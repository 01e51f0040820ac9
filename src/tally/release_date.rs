// Release date of an export, copied into the pages that describe the results.
//
// Export directories are named after the time of the release, for example
// CVR_Export_20251107150911 for Nov 7th, 2025 at 3:09 PM.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::{NoExpand, Regex};
use snafu::ResultExt;

use std::fs;
use std::path::Path;

use crate::tally::*;

lazy_static! {
    static ref EXPORT_DIR_RE: Regex =
        Regex::new(r"CVR_Export_(\d{4})(\d{2})(\d{2})(\d{2})(\d{2})(\d{2})").unwrap();
    static ref README_RE: Regex = Regex::new(
        r"The data in it comes from a ACVote's (?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) \d+(?:st|nd|rd|th)?, \d{4} @ \d+:\d+ (?:AM|PM) data release\."
    )
    .unwrap();
    static ref INDEX_RE: Regex = Regex::new(
        r"Data updated (?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) \d+, \d{4} •"
    )
    .unwrap();
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ReleaseDate {
    /// "Nov 7, 2025"
    pub date: String,
    /// "Nov 7th, 2025"
    pub date_with_suffix: String,
    /// "3:09 PM"
    pub time: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum PatchOutcome {
    Updated,
    MissingFile,
    NoMatch,
}

fn ordinal_suffix(day: u32) -> &'static str {
    if (11..=13).contains(&(day % 100)) {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

impl ReleaseDate {
    pub fn from_datetime(dt: &NaiveDateTime) -> ReleaseDate {
        let month = dt.format("%b").to_string();
        let day = dt.day();
        let year = dt.year();
        let hour12 = match dt.hour() % 12 {
            0 => 12,
            h => h,
        };
        let am_pm = if dt.hour() >= 12 { "PM" } else { "AM" };
        ReleaseDate {
            date: format!("{} {}, {}", month, day, year),
            date_with_suffix: format!("{} {}{}, {}", month, day, ordinal_suffix(day), year),
            time: format!("{}:{:02} {}", hour12, dt.minute(), am_pm),
        }
    }

    /// Reads the release date from the name of an export directory.
    pub fn from_dir_name(dir: &Path) -> Option<ReleaseDate> {
        let name = dir.file_name()?.to_str()?;
        let caps = EXPORT_DIR_RE.captures(name)?;
        let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let dt = NaiveDate::from_ymd_opt(field(1)? as i32, field(2)?, field(3)?)?
            .and_hms_opt(field(4)?, field(5)?, field(6)?)?;
        Some(ReleaseDate::from_datetime(&dt))
    }
}

/// Replaces the first match of `re` in the file, if the file exists.
fn patch_file(path: &Path, re: &Regex, replacement: &str) -> BTallyResult<PatchOutcome> {
    if !path.is_file() {
        return Ok(PatchOutcome::MissingFile);
    }
    let display = path.display().to_string();
    let content = fs::read_to_string(path).context(OpeningJsonSnafu {
        path: display.clone(),
    })?;
    if !re.is_match(&content) {
        return Ok(PatchOutcome::NoMatch);
    }
    let patched = re.replace(&content, NoExpand(replacement));
    fs::write(path, patched.as_bytes()).context(WritingResultsSnafu { path: display })?;
    Ok(PatchOutcome::Updated)
}

pub fn update_readme(site_root: &Path, rd: &ReleaseDate) -> BTallyResult<PatchOutcome> {
    let line = format!(
        "The data in it comes from a ACVote's {} @ {} data release.",
        rd.date_with_suffix, rd.time
    );
    patch_file(&site_root.join("README.md"), &README_RE, &line)
}

pub fn update_index_html(site_root: &Path, rd: &ReleaseDate) -> BTallyResult<PatchOutcome> {
    let line = format!("Data updated {} •", rd.date);
    patch_file(&site_root.join("index.html"), &INDEX_RE, &line)
}

fn report(file_name: &str, shown: &str, outcome: BTallyResult<PatchOutcome>) {
    match outcome {
        Ok(PatchOutcome::Updated) => println!("Updated {} with date: {}", file_name, shown),
        Ok(PatchOutcome::MissingFile) => println!("{} not found, skipping update", file_name),
        Ok(PatchOutcome::NoMatch) => {
            info!("{}: no release date line found, skipping update", file_name)
        }
        Err(e) => warn!("Could not update {}: {}", file_name, e),
    }
}

/// Best effort: nothing here can fail the run.
pub fn patch_release_date(input_dir: &Path, site_root: &Path) {
    let rd = match ReleaseDate::from_dir_name(input_dir) {
        Some(rd) => rd,
        None => {
            println!(
                "Could not extract date from folder path. Expected format: CVR_Export_YYYYMMDDHHMMSS"
            );
            return;
        }
    };
    info!("patch_release_date: {:?}", rd);
    let readme_shown = format!("{} @ {}", rd.date_with_suffix, rd.time);
    report("README.md", &readme_shown, update_readme(site_root, &rd));
    report("index.html", &rd.date, update_index_html(site_root, &rd));
}
