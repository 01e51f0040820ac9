//! Precinct-level tally of a single yes/no contest.
//!
//! The ballots are fed one at a time through a [`RecordResolver`] into an
//! [`Aggregator`]. Once the stream is exhausted, the aggregator is frozen and
//! [`build_results`] turns the counters into the sorted list of
//! [`OutputRecord`]s, one per precinct.
//!
//! This crate does no IO: reading the exports and writing the results is left
//! to the caller.

mod aggregate;
mod config;
mod results;

pub use crate::aggregate::*;
pub use crate::config::*;
pub use crate::results::*;
