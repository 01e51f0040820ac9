use log::{debug, info};

use std::collections::BTreeSet;

use crate::aggregate::FrozenTally;
use crate::config::*;

/// Rounds to two decimals, ties away from zero.
///
/// The inputs are shares of vote counts, so they are never negative and this
/// is the same as rounding half up.
pub fn round_percentage(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `count / total` in percent, or zero when nothing was counted.
pub fn percentage(count: u64, total: u64) -> Percentage {
    if total > 0 {
        Percentage(round_percentage(count as f64 / total as f64 * 100.0))
    } else {
        Percentage::ZERO
    }
}

fn split(counts: &VoteCounts) -> PercentageSplit {
    PercentageSplit {
        yes: percentage(counts.yes, counts.total),
        no: percentage(counts.no, counts.total),
    }
}

fn method_result(counts: VoteCounts, precinct_total: u64) -> MethodResult {
    MethodResult {
        votes: counts,
        percentage: split(&counts),
        percentage_of_total: percentage(counts.total, precinct_total),
    }
}

/// Builds one output record per precinct, for the union of the precincts seen
/// in the ballots and the precincts of the manifest.
///
/// Records are sorted by precinct name, comparing the raw bytes of the names.
pub fn build_results<'a, I>(tally: &FrozenTally<'a>, manifest_precincts: I) -> Vec<OutputRecord>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut names: BTreeSet<&'a str> = tally.observed_precincts().collect();
    let num_observed = names.len();
    names.extend(manifest_precincts);
    info!(
        "build_results: {} precincts with votes, {} precincts in the results",
        num_observed,
        names.len()
    );

    names
        .into_iter()
        .map(|name| {
            let totals = tally.precinct(name);
            let mail_in = tally.method(name, MAIL_IN_GROUP_ID);
            let in_person = tally.method(name, IN_PERSON_GROUP_ID);
            let record = OutputRecord {
                precinct: name.to_string(),
                votes: totals,
                percentage: split(&totals),
                vote_method: VoteMethods {
                    mail_in: method_result(mail_in, totals.total),
                    in_person: method_result(in_person, totals.total),
                },
            };
            debug!("build_results: {:?}", record);
            record
        })
        .collect()
}
