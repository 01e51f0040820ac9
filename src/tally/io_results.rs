// Writing the results file.
//
// Percentages are f64 values and vote counts are u64 values in the output
// structures, so the formatter can tell them apart by type alone: every float
// gets at least one decimal, integers are written as they are.

use log::{info, warn};
use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter, Serializer};
use snafu::ResultExt;
use text_diff::print_diff;

use std::fs;
use std::io;
use std::path::Path;

use precinct_tally::OutputRecord;

use crate::tally::*;

/// "100" -> "100.0", "66.67" stays as it is.
fn decimal_text(value: f64) -> String {
    let mut s = format!("{}", value);
    if !s.contains('.') {
        s.push_str(".0");
    }
    s
}

/// Two-space indentation, with a decimal point on every float.
struct DecimalFormatter<'a> {
    pretty: PrettyFormatter<'a>,
}

impl<'a> DecimalFormatter<'a> {
    fn new() -> DecimalFormatter<'a> {
        DecimalFormatter {
            pretty: PrettyFormatter::with_indent(b"  "),
        }
    }
}

impl<'a> Formatter for DecimalFormatter<'a> {
    fn write_f32<W>(&mut self, writer: &mut W, value: f32) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_f64(writer, value as f64)
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(decimal_text(value).as_bytes())
    }

    fn begin_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.pretty.begin_array(writer)
    }

    fn end_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.pretty.end_array(writer)
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.pretty.begin_array_value(writer, first)
    }

    fn end_array_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.pretty.end_array_value(writer)
    }

    fn begin_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.pretty.begin_object(writer)
    }

    fn end_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.pretty.end_object(writer)
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.pretty.begin_object_key(writer, first)
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.pretty.begin_object_value(writer)
    }

    fn end_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.pretty.end_object_value(writer)
    }
}

/// Renders the results as the text of the results file (no trailing newline).
pub fn render_results(results: &[OutputRecord]) -> TallyResult<String> {
    let mut out: Vec<u8> = Vec::new();
    let mut ser = Serializer::with_formatter(&mut out, DecimalFormatter::new());
    results
        .serialize(&mut ser)
        .context(RenderingResultsSnafu {})?;
    // serde_json only writes valid UTF-8.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

pub fn write_results(path: &Path, text: &str) -> BTallyResult<()> {
    let display = path.display().to_string();
    info!("Writing results to {:?}", display);
    fs::write(path, text).context(WritingResultsSnafu { path: display })?;
    Ok(())
}

/// Fails if `text` differs from the content of the reference file.
pub fn compare_with_reference(reference: &Path, text: &str) -> BTallyResult<()> {
    let display = reference.display().to_string();
    info!("Comparing the results with {:?}", display);
    let expected = fs::read_to_string(reference).context(OpeningJsonSnafu {
        path: display.clone(),
    })?;
    if expected != text {
        warn!("Found differences with the reference results");
        print_diff(expected.as_str(), text, "\n");
        return Err(Box::new(TallyError::ReferenceMismatch { path: display }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, votes: VoteCounts) -> OutputRecord {
        OutputRecord {
            precinct: name.to_string(),
            votes,
            percentage: PercentageSplit {
                yes: percentage(votes.yes, votes.total),
                no: percentage(votes.no, votes.total),
            },
            vote_method: VoteMethods {
                mail_in: MethodResult {
                    votes,
                    percentage: PercentageSplit {
                        yes: percentage(votes.yes, votes.total),
                        no: percentage(votes.no, votes.total),
                    },
                    percentage_of_total: percentage(votes.total, votes.total),
                },
                in_person: MethodResult::default(),
            },
        }
    }

    const EXPECTED: &str = r#"[
  {
    "precinct": "North \"7\"",
    "votes": {
      "yes": 2,
      "no": 0,
      "total": 2
    },
    "percentage": {
      "yes": 100.0,
      "no": 0.0
    },
    "vote_method": {
      "mail_in": {
        "votes": {
          "yes": 2,
          "no": 0,
          "total": 2
        },
        "percentage": {
          "yes": 100.0,
          "no": 0.0
        },
        "percentage_of_total": 100.0
      },
      "in_person": {
        "votes": {
          "yes": 0,
          "no": 0,
          "total": 0
        },
        "percentage": {
          "yes": 0.0,
          "no": 0.0
        },
        "percentage_of_total": 0.0
      }
    }
  }
]"#;

    #[test]
    fn decimals() {
        assert_eq!(decimal_text(100.0), "100.0");
        assert_eq!(decimal_text(0.0), "0.0");
        assert_eq!(decimal_text(66.67), "66.67");
        assert_eq!(decimal_text(33.33), "33.33");
        assert_eq!(decimal_text(0.01), "0.01");
        assert_eq!(decimal_text(12.5), "12.5");
    }

    #[test]
    fn renders_counts_and_percentages() {
        let votes = VoteCounts {
            yes: 2,
            no: 0,
            total: 2,
        };
        let text = render_results(&[record("North \"7\"", votes)]).unwrap();
        assert_eq!(text, EXPECTED);
    }

    #[test]
    fn fractions_are_kept() {
        let votes = VoteCounts {
            yes: 2,
            no: 1,
            total: 3,
        };
        let text = render_results(&[record("A", votes)]).unwrap();
        assert!(text.contains("\"yes\": 66.67,\n"));
        assert!(text.contains("\"no\": 33.33\n"));
        assert!(text.contains("\"total\": 3\n"));
    }

    #[test]
    fn empty_results() {
        assert_eq!(render_results(&[]).unwrap(), "[]");
    }

    #[test]
    fn rendering_is_idempotent() {
        let votes = VoteCounts {
            yes: 1,
            no: 2,
            total: 3,
        };
        let first = render_results(&[record("A", votes), record("B", VoteCounts::EMPTY)]).unwrap();
        let parsed: Vec<OutputRecord> = serde_json::from_str(&first).unwrap();
        let second = render_results(&parsed).unwrap();
        assert_eq!(first, second);
        let parsed_again: Vec<OutputRecord> = serde_json::from_str(EXPECTED).unwrap();
        assert_eq!(render_results(&parsed_again).unwrap(), EXPECTED);
    }

    #[test]
    fn reference_check() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ref.json");
        fs::write(&p, EXPECTED).unwrap();
        assert!(compare_with_reference(&p, EXPECTED).is_ok());
        let err = compare_with_reference(&p, "[]").unwrap_err();
        assert!(matches!(*err, TallyError::ReferenceMismatch { .. }));
        let missing = dir.path().join("missing.json");
        let err = compare_with_reference(&missing, "[]").unwrap_err();
        assert!(matches!(*err, TallyError::OpeningJson { .. }));
    }
}
