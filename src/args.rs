use clap::Parser;

/// Tallies a yes/no contest by precinct and voting method from a cast vote record export.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (directory path) The directory of the export. It must contain CvrExport.json (or a
    /// CVR_Export*.json file) and the four manifests PrecinctPortionManifest.json,
    /// PrecinctManifest.json, CandidateManifest.json and CountingGroupManifest.json.
    /// When the directory is named CVR_Export_YYYYMMDDHHMMSS, the release date is also
    /// written into README.md and index.html.
    #[clap(value_parser)]
    pub input: String,

    /// (default 1) The id of the contest to tally. All the other contests are ignored.
    #[clap(long, value_parser, default_value_t = 1)]
    pub contest_id: u32,

    /// (default 2) The candidate id that stands for a yes vote in the contest.
    #[clap(long, value_parser, default_value_t = 2)]
    pub yes_candidate_id: u32,

    /// (default 1) The candidate id that stands for a no vote in the contest.
    #[clap(long, value_parser, default_value_t = 1)]
    pub no_candidate_id: u32,

    /// (file path, default results.json) Where the results are written.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A results file from a previous run. If provided, the new results must be
    /// identical to it, otherwise the differences are printed and the program fails.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (directory path, default the current directory) The directory holding the README.md
    /// and index.html files that receive the release date.
    #[clap(long, value_parser)]
    pub site_root: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on debug logging.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
