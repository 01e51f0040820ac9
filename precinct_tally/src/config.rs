// ********* Reference data ***********

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Counting group used by the voting system for ballots cast in person.
pub const IN_PERSON_GROUP_ID: u32 = 1;
/// Counting group used by the voting system for mail-in ballots.
pub const MAIL_IN_GROUP_ID: u32 = 2;

/// The lookup tables built from the four reference manifests.
///
/// They are filled once before any ballot is read and are only read afterwards.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ReferenceTables {
    pub portion_to_precinct_id: HashMap<u32, u32>,
    pub precinct_id_to_name: HashMap<u32, String>,
    /// Only the candidates of the target contest.
    pub candidate_name_by_id: HashMap<u32, String>,
    pub counting_group_name_by_id: HashMap<u32, String>,
}

impl ReferenceTables {
    /// Follows a precinct portion to the name of its precinct.
    ///
    /// Returns None for the zero id, which the voting system uses for
    /// ballots without a precinct attribution.
    pub fn precinct_name(&self, portion_id: u32) -> Option<&str> {
        if portion_id == 0 {
            return None;
        }
        let precinct_id = self.portion_to_precinct_id.get(&portion_id)?;
        if *precinct_id == 0 {
            return None;
        }
        self.precinct_id_to_name
            .get(precinct_id)
            .map(|name| name.as_str())
    }

    /// All the precinct names of the manifest, each name once.
    pub fn precinct_names(&self) -> impl Iterator<Item = &str> {
        self.precinct_id_to_name.values().map(|name| name.as_str())
    }
}

// ********* Input data structures ***********

/// A ballot, as read from the export.
///
/// Fields that were absent or of the wrong type are already None.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct BallotRecord {
    pub precinct_portion_id: Option<u32>,
    pub counting_group_id: Option<u32>,
    pub cards: Vec<Card>,
}

#[derive(PartialEq, Debug, Clone, Default)]
pub struct Card {
    pub contests: Vec<Contest>,
}

#[derive(PartialEq, Debug, Clone, Default)]
pub struct Contest {
    pub id: Option<u32>,
    /// A mark that could not be read is kept as None: it still counts as a
    /// recorded mark for the contest, but it is never tallied.
    pub marks: Vec<Option<Mark>>,
}

#[derive(PartialEq, Debug, Clone, Default)]
pub struct Mark {
    pub candidate_id: Option<u32>,
    pub is_vote: bool,
    /// Not used by the tally.
    pub mark_density: Option<f64>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum VoteKind {
    Yes,
    No,
}

// ********* Configuration **********

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct TallySettings {
    /// The only contest that is counted.
    pub contest_id: u32,
    pub yes_candidate_id: u32,
    pub no_candidate_id: u32,
}

impl TallySettings {
    pub const DEFAULT_SETTINGS: TallySettings = TallySettings {
        contest_id: 1,
        yes_candidate_id: 2,
        no_candidate_id: 1,
    };

    pub fn vote_kind(&self, candidate_id: u32) -> Option<VoteKind> {
        if candidate_id == self.yes_candidate_id {
            Some(VoteKind::Yes)
        } else if candidate_id == self.no_candidate_id {
            Some(VoteKind::No)
        } else {
            None
        }
    }
}

impl Default for TallySettings {
    fn default() -> Self {
        TallySettings::DEFAULT_SETTINGS
    }
}

// ******** Output data structures *********

/// Running counters for one precinct, or one voting method of a precinct.
///
/// Invariant: `total == yes + no`. The only way to change the counts is
/// `record`, which moves `total` together with one of the two others.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VoteCounts {
    pub yes: u64,
    pub no: u64,
    pub total: u64,
}

impl VoteCounts {
    pub const EMPTY: VoteCounts = VoteCounts {
        yes: 0,
        no: 0,
        total: 0,
    };

    pub fn record(&mut self, kind: VoteKind) {
        match kind {
            VoteKind::Yes => self.yes += 1,
            VoteKind::No => self.no += 1,
        }
        self.total += 1;
    }
}

/// A share expressed in percent, already rounded to two decimals.
///
/// Vote counts are plain integers; this type marks the numbers that the
/// output must always write with a fractional part.
#[derive(PartialEq, PartialOrd, Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(pub f64);

impl Percentage {
    pub const ZERO: Percentage = Percentage(0.0);
}

#[derive(PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PercentageSplit {
    pub yes: Percentage,
    pub no: Percentage,
}

/// The results of one voting method inside a precinct.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodResult {
    pub votes: VoteCounts,
    pub percentage: PercentageSplit,
    /// Share of the precinct's votes cast with this method.
    pub percentage_of_total: Percentage,
}

#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteMethods {
    pub mail_in: MethodResult,
    pub in_person: MethodResult,
}

/// One entry of the results file.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputRecord {
    pub precinct: String,
    pub votes: VoteCounts,
    pub percentage: PercentageSplit,
    pub vote_method: VoteMethods,
}
