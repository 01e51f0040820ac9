use log::debug;

use std::collections::HashMap;

use crate::config::*;

/// Per-precinct counters, keyed by precinct name.
pub type PrecinctTally<'a> = HashMap<&'a str, VoteCounts>;

/// Per-precinct, per-counting-group counters.
pub type PrecinctMethodTally<'a> = HashMap<&'a str, HashMap<u32, VoteCounts>>;

/// Accumulates the votes while the ballots are streamed.
///
/// There is exactly one writer for the whole pass. The counters can only be
/// read once the aggregator has been turned into a `FrozenTally`.
///
/// ```
/// use precinct_tally::{Aggregator, VoteKind};
///
/// let mut agg = Aggregator::new();
/// agg.record_precinct_vote("North", VoteKind::Yes);
/// agg.record_method_vote("North", 2, VoteKind::Yes);
/// let tally = agg.finish();
/// assert_eq!(tally.precinct("North").total, 1);
/// ```
#[derive(Debug, Default)]
pub struct Aggregator<'a> {
    precincts: PrecinctTally<'a>,
    methods: PrecinctMethodTally<'a>,
}

impl<'a> Aggregator<'a> {
    pub fn new() -> Aggregator<'a> {
        Aggregator::default()
    }

    /// Creates zeroed counters for the precinct if they do not exist yet.
    pub fn open_precinct(&mut self, precinct: &'a str) {
        self.precincts.entry(precinct).or_default();
        self.methods.entry(precinct).or_default();
    }

    /// Creates zeroed counters for the (precinct, method) pair if they do not
    /// exist yet.
    pub fn open_method(&mut self, precinct: &'a str, method_id: u32) {
        self.methods
            .entry(precinct)
            .or_default()
            .entry(method_id)
            .or_default();
    }

    pub fn record_precinct_vote(&mut self, precinct: &'a str, kind: VoteKind) {
        self.precincts.entry(precinct).or_default().record(kind);
    }

    pub fn record_method_vote(&mut self, precinct: &'a str, method_id: u32, kind: VoteKind) {
        self.methods
            .entry(precinct)
            .or_default()
            .entry(method_id)
            .or_default()
            .record(kind);
    }

    /// Ends the pass. No more votes can be added after this point.
    pub fn finish(self) -> FrozenTally<'a> {
        debug!(
            "finish: {} precincts, {} precincts with method counters",
            self.precincts.len(),
            self.methods.len()
        );
        FrozenTally {
            precincts: self.precincts,
            methods: self.methods,
        }
    }
}

/// The counters at the end of the stream. Read-only.
#[derive(Debug, Clone, Default)]
pub struct FrozenTally<'a> {
    precincts: PrecinctTally<'a>,
    methods: PrecinctMethodTally<'a>,
}

impl<'a> FrozenTally<'a> {
    /// The counters of a precinct, zero if it never received a vote.
    pub fn precinct(&self, precinct: &str) -> VoteCounts {
        self.precincts
            .get(precinct)
            .copied()
            .unwrap_or(VoteCounts::EMPTY)
    }

    /// The counters of a voting method in a precinct, zero if never seen.
    pub fn method(&self, precinct: &str, method_id: u32) -> VoteCounts {
        self.methods
            .get(precinct)
            .and_then(|m| m.get(&method_id))
            .copied()
            .unwrap_or(VoteCounts::EMPTY)
    }

    /// The precincts for which at least one mark of the contest was seen.
    pub fn observed_precincts(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.precincts.keys().copied()
    }

    pub fn num_observed_precincts(&self) -> usize {
        self.precincts.len()
    }

    pub fn has_method(&self, precinct: &str, method_id: u32) -> bool {
        self.methods
            .get(precinct)
            .map(|m| m.contains_key(&method_id))
            .unwrap_or(false)
    }
}

/// Attributes the marks of a ballot to a precinct and a voting method.
pub struct RecordResolver<'a> {
    tables: &'a ReferenceTables,
    settings: &'a TallySettings,
}

impl<'a> RecordResolver<'a> {
    pub fn new(tables: &'a ReferenceTables, settings: &'a TallySettings) -> RecordResolver<'a> {
        RecordResolver { tables, settings }
    }

    /// portion -> precinct id -> precinct name. Any missing hop means that
    /// the ballot has no precinct.
    pub fn resolve_precinct(&self, record: &BallotRecord) -> Option<&'a str> {
        let portion_id = record.precinct_portion_id?;
        self.tables.precinct_name(portion_id)
    }

    /// Adds the votes of one ballot to the aggregator.
    ///
    /// Returns false when the ballot was skipped because it has no precinct.
    pub fn apply(&self, record: &BallotRecord, agg: &mut Aggregator<'a>) -> bool {
        let precinct = match self.resolve_precinct(record) {
            Some(p) => p,
            None => return false,
        };
        let method_id = record.counting_group_id;

        for card in record.cards.iter() {
            for contest in card.contests.iter() {
                if contest.id != Some(self.settings.contest_id) {
                    continue;
                }
                if contest.marks.is_empty() {
                    continue;
                }

                agg.open_precinct(precinct);
                if let Some(mid) = method_id {
                    agg.open_method(precinct, mid);
                }

                for mark in contest.marks.iter().flatten() {
                    if !mark.is_vote {
                        continue;
                    }
                    let kind = match mark.candidate_id.and_then(|c| self.settings.vote_kind(c)) {
                        Some(k) => k,
                        None => continue,
                    };
                    agg.record_precinct_vote(precinct, kind);
                    if let Some(mid) = method_id {
                        agg.record_method_vote(precinct, mid, kind);
                    }
                }
            }
        }
        true
    }
}
