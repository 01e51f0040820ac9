use log::{debug, info};

use precinct_tally::*;
use snafu::Snafu;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

mod io_cvr;
mod io_manifest;
mod io_results;
mod release_date;

use crate::tally::io_cvr::{locate_export, open_sessions};
use crate::tally::io_manifest::{read_reference_tables, ManifestPaths};
use crate::tally::io_results::{compare_with_reference, render_results, write_results};
use crate::tally::release_date::patch_release_date;

#[derive(Debug, Snafu)]
pub enum TallyError {
    #[snafu(display("Input path does not exist: {path}"))]
    MissingInputDir { path: String },
    #[snafu(display("Input path is not a directory: {path}"))]
    NotADirectory { path: String },
    #[snafu(display("Missing required file: {path}"))]
    MissingReferenceFile { path: String },
    #[snafu(display(
        "Could not find CVR export file. Expected 'CvrExport.json' or 'CVR_Export*.json' in {dir}"
    ))]
    MissingExportFile { dir: String },
    #[snafu(display("Error listing directory {path}: {source}"))]
    ReadingDir {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error opening file {path}: {source}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing file {path}: {source}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Malformed export file {path}: {reason}"))]
    MalformedExportFile { path: String, reason: String },
    #[snafu(display("Error parsing ballot record #{index}: {source}"))]
    ParsingRecord {
        source: serde_json::Error,
        index: u64,
    },
    #[snafu(display("Error reading the export: {source}"))]
    ReadingExport { source: std::io::Error },
    #[snafu(display("Error rendering the results: {source}"))]
    RenderingResults { source: serde_json::Error },
    #[snafu(display("Error writing {path}: {source}"))]
    WritingResults {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Difference detected between the results and the reference {path}"))]
    ReferenceMismatch { path: String },
}

pub type TallyResult<T> = Result<T, TallyError>;
pub type BTallyResult<T> = Result<T, Box<TallyError>>;

const PROGRESS_INTERVAL: u64 = 100_000;

/// One run of the program.
#[derive(Debug, Clone)]
pub struct TallyJob {
    pub input_dir: PathBuf,
    pub output: PathBuf,
    /// Results of a previous run that the new results must match.
    pub reference: Option<PathBuf>,
    /// Where README.md and index.html live.
    pub site_root: PathBuf,
    pub settings: TallySettings,
}

#[derive(Debug, Clone)]
pub struct TallyOutcome {
    pub records_read: u64,
    /// Ballots without a precinct.
    pub records_skipped: u64,
    pub precincts_with_votes: usize,
    pub manifest_precincts: usize,
    pub results: Vec<OutputRecord>,
}

/// 1234567 -> "1,234,567"
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut res = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, c) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            res.push(',');
        }
        res.push(c);
    }
    res
}

fn check_input_dir(dir: &Path) -> BTallyResult<()> {
    let path = dir.display().to_string();
    if !dir.exists() {
        return Err(Box::new(TallyError::MissingInputDir { path }));
    }
    if !dir.is_dir() {
        return Err(Box::new(TallyError::NotADirectory { path }));
    }
    Ok(())
}

/// Reads the manifests and the export of a directory and tallies the ballots.
///
/// Nothing is written: this is the whole pipeline up to the results list.
pub fn tally_directory(input_dir: &Path, settings: &TallySettings) -> BTallyResult<TallyOutcome> {
    check_input_dir(input_dir)?;
    let export_path = locate_export(input_dir)?;
    let manifests = ManifestPaths::in_dir(input_dir);
    manifests.check_present()?;

    println!("Loading manifest files...");
    let tables = read_reference_tables(&manifests, settings.contest_id)?;
    let candidates: BTreeMap<&u32, &String> = tables.candidate_name_by_id.iter().collect();
    info!("Contest {} candidates: {:?}", settings.contest_id, candidates);
    let groups: BTreeMap<&u32, &String> = tables.counting_group_name_by_id.iter().collect();
    info!("Counting groups: {:?}", groups);

    println!("Processing CVR export (streaming)...");
    let resolver = RecordResolver::new(&tables, settings);
    let mut agg = Aggregator::new();
    let mut records_read: u64 = 0;
    let mut records_skipped: u64 = 0;
    for record_r in open_sessions(&export_path)? {
        let record = record_r?;
        records_read += 1;
        if records_read % PROGRESS_INTERVAL == 0 {
            println!("  Processed {} records...", group_thousands(records_read));
        }
        if !resolver.apply(&record, &mut agg) {
            records_skipped += 1;
        }
    }
    debug!(
        "tally_directory: read {} records, {} without precinct",
        records_read, records_skipped
    );

    let tally = agg.finish();
    let precincts_with_votes = tally.num_observed_precincts();
    println!("\nFound votes in {} precincts", precincts_with_votes);

    let manifest_names: HashSet<&str> = tables.precinct_names().collect();
    println!("Total precincts in manifest: {}", manifest_names.len());
    let results = build_results(&tally, manifest_names.iter().copied());
    println!("Total precincts in results: {}", results.len());

    Ok(TallyOutcome {
        records_read,
        records_skipped,
        precincts_with_votes,
        manifest_precincts: manifest_names.len(),
        results,
    })
}

/// Tallies the export, writes the results file and patches the release date.
pub fn run_tally(job: &TallyJob) -> BTallyResult<TallyOutcome> {
    info!("run_tally: {:?}", job);
    let outcome = tally_directory(&job.input_dir, &job.settings)?;
    let text = render_results(&outcome.results)?;

    // The reference check runs first so that a mismatch leaves no output behind.
    if let Some(reference) = &job.reference {
        compare_with_reference(reference, &text)?;
    }

    write_results(&job.output, &text)?;
    println!("\nResults saved to {}", job.output.display());

    patch_release_date(&job.input_dir, &job.site_root);
    Ok(outcome)
}
