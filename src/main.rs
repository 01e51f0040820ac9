mod args;
mod tally;

use clap::Parser;
use log::{debug, info};

use precinct_tally::TallySettings;
use std::fs;
use std::path::PathBuf;

use crate::args::Args;
use crate::tally::{run_tally, TallyJob};

fn job_from_args(args: &Args) -> TallyJob {
    let input = PathBuf::from(&args.input);
    // Only used for naming: a missing directory is reported by the tally itself.
    let input_dir = fs::canonicalize(&input).unwrap_or(input);
    TallyJob {
        input_dir,
        output: PathBuf::from(args.out.clone().unwrap_or_else(|| "results.json".to_string())),
        reference: args.reference.as_ref().map(PathBuf::from),
        site_root: PathBuf::from(args.site_root.clone().unwrap_or_else(|| ".".to_string())),
        settings: TallySettings {
            contest_id: args.contest_id,
            yes_candidate_id: args.yes_candidate_id,
            no_candidate_id: args.no_candidate_id,
        },
    }
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    debug!("args: {:?}", args);

    let job = job_from_args(&args);
    match run_tally(&job) {
        Ok(outcome) => info!(
            "Tallied {} ballots ({} without precinct) over {} precincts",
            outcome.records_read,
            outcome.records_skipped,
            outcome.results.len()
        ),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
