// Streaming reader for the Dominion CVR export.
//
// The export is a single JSON object that can hold millions of ballots under
// its "Sessions" key. The file is scanned byte by byte: only the bytes of the
// current session are kept, and each session is handed to serde_json on its
// own.

use log::{debug, info};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value as JSValue;
use snafu::ResultExt;

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use precinct_tally::{BallotRecord, Card, Contest, Mark};

use crate::tally::*;

const SESSIONS_KEY: &str = "Sessions";

/// Finds the export in a directory: CvrExport.json, or else the first file
/// (by name) matching CVR_Export*.json, ignoring case.
pub fn locate_export(dir: &Path) -> BTallyResult<PathBuf> {
    let direct = dir.join("CvrExport.json");
    if direct.is_file() {
        return Ok(direct);
    }
    let dir_display = dir.display().to_string();
    let entries = fs::read_dir(dir).context(ReadingDirSnafu {
        path: dir_display.clone(),
    })?;
    let mut candidates: Vec<String> = Vec::new();
    for entry_r in entries {
        let entry = entry_r.context(ReadingDirSnafu {
            path: dir_display.clone(),
        })?;
        let name = entry.file_name().to_string_lossy().to_string();
        if is_export_name(&name) {
            candidates.push(name);
        }
    }
    candidates.sort();
    match candidates.first() {
        Some(name) => {
            info!("Using export file {:?}", name);
            Ok(dir.join(name))
        }
        None => Err(Box::new(TallyError::MissingExportFile { dir: dir_display })),
    }
}

fn is_export_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with("cvr_export") && lower.ends_with(".json")
}

pub fn open_sessions(path: &Path) -> BTallyResult<SessionStream<BufReader<File>>> {
    let display = path.display().to_string();
    info!("Attempting to read export file {:?}", display);
    let file = File::open(path).context(OpeningJsonSnafu {
        path: display.clone(),
    })?;
    Ok(SessionStream::new(BufReader::new(file), display))
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
enum StreamState {
    /// Nothing read yet.
    Start,
    /// Inside the sessions array. The flag is true before the first element.
    InSessions(bool),
    Done,
}

/// The ballots of an export, one at a time.
///
/// At most one session is held in memory. The iterator stops after the first
/// error.
pub struct SessionStream<R> {
    reader: R,
    label: String,
    state: StreamState,
    buf: Vec<u8>,
    num_read: u64,
}

impl<R: BufRead> SessionStream<R> {
    /// `label` names the source in error messages.
    pub fn new(reader: R, label: String) -> SessionStream<R> {
        SessionStream {
            reader,
            label,
            state: StreamState::Start,
            buf: Vec::new(),
            num_read: 0,
        }
    }

    fn malformed<T>(&self, reason: &str) -> TallyResult<T> {
        Err(TallyError::MalformedExportFile {
            path: self.label.clone(),
            reason: format!("{} (after {} sessions)", reason, self.num_read),
        })
    }

    fn peek(&mut self) -> TallyResult<Option<u8>> {
        let available = self.reader.fill_buf().context(ReadingExportSnafu {})?;
        Ok(available.first().copied())
    }

    fn bump(&mut self) {
        self.reader.consume(1);
    }

    fn next_byte(&mut self, capture: bool) -> TallyResult<u8> {
        match self.peek()? {
            Some(b) => {
                self.bump();
                if capture {
                    self.buf.push(b);
                }
                Ok(b)
            }
            None => self.malformed("unexpected end of file"),
        }
    }

    /// Skips the whitespace and returns the next byte without consuming it.
    fn skip_whitespace(&mut self) -> TallyResult<Option<u8>> {
        loop {
            match self.peek()? {
                Some(b' ' | b'\t' | b'\n' | b'\r') => self.bump(),
                other => return Ok(other),
            }
        }
    }

    fn expect(&mut self, expected: u8, reason: &str) -> TallyResult<()> {
        match self.skip_whitespace()? {
            Some(b) if b == expected => {
                self.bump();
                Ok(())
            }
            _ => self.malformed(reason),
        }
    }

    fn skip_byte_order_mark(&mut self) -> TallyResult<()> {
        if self.peek()? == Some(0xEF) {
            for expected in [0xEF, 0xBB, 0xBF] {
                if self.next_byte(false)? != expected {
                    return self.malformed("invalid byte order mark");
                }
            }
        }
        Ok(())
    }

    // The opening quote has already been read.
    fn scan_string_tail(&mut self, capture: bool) -> TallyResult<()> {
        loop {
            match self.next_byte(capture)? {
                b'\\' => {
                    self.next_byte(capture)?;
                }
                b'"' => return Ok(()),
                _ => {}
            }
        }
    }

    /// Reads (or skips) one complete value. Leading whitespace must already
    /// be consumed. Nested containers are checked for balance, scalars are
    /// only delimited: serde_json validates whatever is captured.
    fn scan_value(&mut self, capture: bool) -> TallyResult<()> {
        let first = match self.peek()? {
            Some(b'}' | b']' | b',' | b':') | None => {
                return self.malformed("expected a value");
            }
            Some(_) => self.next_byte(capture)?,
        };
        match first {
            b'"' => self.scan_string_tail(capture),
            b'{' | b'[' => {
                let mut open: Vec<u8> = vec![first];
                while let Some(top) = open.last().copied() {
                    match self.next_byte(capture)? {
                        b'"' => self.scan_string_tail(capture)?,
                        b @ (b'{' | b'[') => open.push(b),
                        b'}' if top == b'{' => {
                            open.pop();
                        }
                        b']' if top == b'[' => {
                            open.pop();
                        }
                        b'}' | b']' => return self.malformed("unbalanced brackets"),
                        _ => {}
                    }
                }
                Ok(())
            }
            _ => {
                while let Some(b) = self.peek()? {
                    if matches!(b, b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r') {
                        break;
                    }
                    self.bump();
                    if capture {
                        self.buf.push(b);
                    }
                }
                Ok(())
            }
        }
    }

    fn read_key(&mut self) -> TallyResult<String> {
        if self.skip_whitespace()? != Some(b'"') {
            return self.malformed("expected an object key");
        }
        self.buf.clear();
        self.next_byte(true)?;
        self.scan_string_tail(true)?;
        match serde_json::from_slice::<String>(&self.buf) {
            Ok(key) => Ok(key),
            Err(_) => self.malformed("invalid object key"),
        }
    }

    /// Walks the top-level object up to the opening bracket of the sessions.
    fn open_sessions_array(&mut self) -> TallyResult<()> {
        self.skip_byte_order_mark()?;
        self.expect(b'{', "the export is not a JSON object")?;
        let mut first = true;
        loop {
            match self.skip_whitespace()? {
                Some(b'}') if first => {
                    return self.malformed("no Sessions array");
                }
                Some(b',') if !first => self.bump(),
                _ if first => {}
                Some(b'}') => return self.malformed("no Sessions array"),
                _ => return self.malformed("expected ',' or '}' in the top-level object"),
            }
            first = false;
            let key = self.read_key()?;
            self.expect(b':', "expected ':' after an object key")?;
            self.skip_whitespace()?;
            if key == SESSIONS_KEY {
                return self.expect(b'[', "Sessions is not an array");
            }
            debug!("open_sessions_array: skipping top-level key {:?}", key);
            self.scan_value(false)?;
        }
    }

    /// Checks the rest of the top-level object once the sessions are read.
    fn close_document(&mut self) -> TallyResult<()> {
        loop {
            match self.skip_whitespace()? {
                Some(b'}') => {
                    self.bump();
                    break;
                }
                Some(b',') => {
                    self.bump();
                    self.read_key()?;
                    self.expect(b':', "expected ':' after an object key")?;
                    self.skip_whitespace()?;
                    self.scan_value(false)?;
                }
                _ => return self.malformed("expected ',' or '}' after the sessions"),
            }
        }
        match self.skip_whitespace()? {
            None => Ok(()),
            Some(_) => self.malformed("trailing content after the top-level object"),
        }
    }

    fn next_session(&mut self) -> TallyResult<Option<BallotRecord>> {
        if self.state == StreamState::Start {
            self.open_sessions_array()?;
            self.state = StreamState::InSessions(true);
        }
        let first = match self.state {
            StreamState::InSessions(first) => first,
            _ => return Ok(None),
        };
        match self.skip_whitespace()? {
            Some(b']') => {
                self.bump();
                self.close_document()?;
                self.state = StreamState::Done;
                return Ok(None);
            }
            Some(b',') if !first => {
                self.bump();
                self.skip_whitespace()?;
            }
            Some(_) if first => {}
            _ => return self.malformed("expected ',' or ']' in Sessions"),
        }
        self.state = StreamState::InSessions(false);

        self.buf.clear();
        self.scan_value(true)?;
        self.num_read += 1;
        let value: JSValue = serde_json::from_slice(&self.buf).context(ParsingRecordSnafu {
            index: self.num_read,
        })?;
        Ok(Some(session_from_value(value).into()))
    }
}

impl<R: BufRead> Iterator for SessionStream<R> {
    type Item = TallyResult<BallotRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_session() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.state = StreamState::Done;
                Some(Err(e))
            }
        }
    }
}

// ********* Wire format **********
//
// Dominion fields of the wrong type are read as missing instead of failing
// the whole export.

/// A session that is not an object (null, a number, a string...) has no
/// precinct: it is read as an empty ballot.
fn session_from_value(value: JSValue) -> Session {
    if value.is_object() {
        serde_json::from_value(value).unwrap_or_default()
    } else {
        Session::default()
    }
}

/// 7 and 7.0 are the same id.
fn id_from_value(v: &JSValue) -> Option<u32> {
    if let Some(x) = v.as_u64() {
        return u32::try_from(x).ok();
    }
    let f = v.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && f >= 0.0 && f <= u32::MAX as f64 {
        Some(f as u32)
    } else {
        None
    }
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let v = JSValue::deserialize(d)?;
    Ok(id_from_value(&v))
}

fn lenient_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let v = JSValue::deserialize(d)?;
    Ok(v.as_bool().unwrap_or(false))
}

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let v = JSValue::deserialize(d)?;
    Ok(v.as_f64())
}

/// Objects of the array that match `T`. Anything that is not an array is empty.
fn lenient_seq<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let v = JSValue::deserialize(d)?;
    let res = match v {
        JSValue::Array(items) => items
            .into_iter()
            .filter(|item| item.is_object())
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => vec![],
    };
    Ok(res)
}

/// Marks that cannot be read are kept as None.
fn lenient_marks<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Option<WireMark>>, D::Error> {
    let v = JSValue::deserialize(d)?;
    let res = match v {
        JSValue::Array(items) => items
            .into_iter()
            .map(|item| {
                if item.is_object() {
                    serde_json::from_value(item).ok()
                } else {
                    None
                }
            })
            .collect(),
        _ => vec![],
    };
    Ok(res)
}

fn lenient_original<'de, D: Deserializer<'de>>(d: D) -> Result<OriginalBallot, D::Error> {
    let v = JSValue::deserialize(d)?;
    Ok(serde_json::from_value(v).unwrap_or_default())
}

#[derive(PartialEq, Debug, Clone, Default, Deserialize)]
struct WireMark {
    #[serde(rename = "CandidateId", default, deserialize_with = "lenient_id")]
    pub candidate_id: Option<u32>,
    #[serde(rename = "IsVote", default, deserialize_with = "lenient_flag")]
    pub is_vote: bool,
    #[serde(rename = "MarkDensity", default, deserialize_with = "lenient_number")]
    pub mark_density: Option<f64>,
}

#[derive(PartialEq, Debug, Clone, Default, Deserialize)]
struct WireContest {
    #[serde(rename = "Id", default, deserialize_with = "lenient_id")]
    pub id: Option<u32>,
    #[serde(rename = "Marks", default, deserialize_with = "lenient_marks")]
    pub marks: Vec<Option<WireMark>>,
}

#[derive(PartialEq, Debug, Clone, Default, Deserialize)]
struct WireCard {
    #[serde(rename = "Contests", default, deserialize_with = "lenient_seq")]
    pub contests: Vec<WireContest>,
}

#[derive(PartialEq, Debug, Clone, Default, Deserialize)]
struct OriginalBallot {
    #[serde(rename = "PrecinctPortionId", default, deserialize_with = "lenient_id")]
    pub precinct_portion_id: Option<u32>,
    #[serde(rename = "Cards", default, deserialize_with = "lenient_seq")]
    pub cards: Vec<WireCard>,
}

#[derive(PartialEq, Debug, Clone, Default, Deserialize)]
struct Session {
    #[serde(rename = "CountingGroupId", default, deserialize_with = "lenient_id")]
    pub counting_group_id: Option<u32>,
    #[serde(rename = "Original", default, deserialize_with = "lenient_original")]
    pub original: OriginalBallot,
}

impl From<WireMark> for Mark {
    fn from(m: WireMark) -> Mark {
        Mark {
            candidate_id: m.candidate_id,
            is_vote: m.is_vote,
            mark_density: m.mark_density,
        }
    }
}

impl From<Session> for BallotRecord {
    fn from(s: Session) -> BallotRecord {
        BallotRecord {
            precinct_portion_id: s.original.precinct_portion_id,
            counting_group_id: s.counting_group_id,
            cards: s
                .original
                .cards
                .into_iter()
                .map(|card| Card {
                    contests: card
                        .contests
                        .into_iter()
                        .map(|contest| Contest {
                            id: contest.id,
                            marks: contest
                                .marks
                                .into_iter()
                                .map(|m| m.map(Mark::from))
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, Read};

    fn stream(s: &str) -> SessionStream<Cursor<Vec<u8>>> {
        SessionStream::new(Cursor::new(s.as_bytes().to_vec()), "test".to_string())
    }

    fn read_all(s: &str) -> TallyResult<Vec<BallotRecord>> {
        stream(s).collect()
    }

    #[test]
    fn reads_nested_sessions() {
        let export = r#"{
            "Version": "5.10.50.85",
            "ElectionId": "General {with} [brackets] \"and quotes\"",
            "Nested": {"Sessions": [1, 2, 3], "x": [{}, []]},
            "Sessions": [
                {"CountingGroupId": 2, "Original": {"PrecinctPortionId": 7, "Cards": [
                    {"Contests": [{"Id": 1, "Marks": [{"CandidateId": 2, "IsVote": true, "MarkDensity": 88}]}]}
                ]}},
                {"CountingGroupId": "mail", "Original": {"PrecinctPortionId": 8, "Cards": []}}
            ],
            "Trailer": null
        }"#;
        let records = read_all(export).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].precinct_portion_id, Some(7));
        assert_eq!(records[0].counting_group_id, Some(2));
        let mark = records[0].cards[0].contests[0].marks[0].clone().unwrap();
        assert_eq!(mark.candidate_id, Some(2));
        assert!(mark.is_vote);
        assert_eq!(mark.mark_density, Some(88.0));
        // A counting group that is not a number is dropped.
        assert_eq!(records[1].counting_group_id, None);
        assert_eq!(records[1].precinct_portion_id, Some(8));
    }

    #[test]
    fn empty_sessions() {
        assert_eq!(read_all(r#"{"Sessions": []}"#).unwrap().len(), 0);
        assert_eq!(read_all("\u{feff} {\"Sessions\" : [ ] } \n").unwrap().len(), 0);
    }

    #[test]
    fn lenient_ballot_shapes() {
        let export = r#"{"Sessions": [
            {},
            {"Original": 3},
            {"Original": {"PrecinctPortionId": null, "Cards": {"not": "an array"}}},
            {"Original": {"PrecinctPortionId": 4, "Cards": [5, {"Contests": [
                {"Id": 1, "Marks": [null, "x", {"CandidateId": "2", "IsVote": true}, {"CandidateId": 1, "IsVote": 1}]}
            ]}]}}
        ]}"#;
        let records = read_all(export).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0], BallotRecord::default());
        assert_eq!(records[1], BallotRecord::default());
        assert_eq!(records[2], BallotRecord::default());
        let r = &records[3];
        assert_eq!(r.precinct_portion_id, Some(4));
        assert_eq!(r.cards.len(), 1);
        let marks = &r.cards[0].contests[0].marks;
        assert_eq!(marks.len(), 4);
        assert_eq!(marks[0], None);
        assert_eq!(marks[1], None);
        let m2 = marks[2].clone().unwrap();
        assert_eq!(m2.candidate_id, None);
        assert!(m2.is_vote);
        let m3 = marks[3].clone().unwrap();
        assert_eq!(m3.candidate_id, Some(1));
        assert!(!m3.is_vote);
    }

    #[test]
    fn sessions_that_are_not_objects() {
        let records =
            read_all(r#"{"Sessions": [null, 1, "x", {"CountingGroupId": 1}, [2]]}"#).unwrap();
        assert_eq!(records.len(), 5);
        for i in [0, 1, 2, 4] {
            assert_eq!(records[i], BallotRecord::default());
        }
        assert_eq!(records[3].counting_group_id, Some(1));
    }

    #[test]
    fn integral_float_ids() {
        let export = r#"{"Sessions": [
            {"CountingGroupId": 1.0, "Original": {"PrecinctPortionId": 7.0, "Cards": [
                {"Contests": [{"Id": 1.0, "Marks": [{"CandidateId": 2.0, "IsVote": true}]}]}
            ]}},
            {"CountingGroupId": 1.5, "Original": {"PrecinctPortionId": -7.0}},
            {"CountingGroupId": 1e12, "Original": {"PrecinctPortionId": 4294967296}}
        ]}"#;
        let records = read_all(export).unwrap();
        let r = &records[0];
        assert_eq!(r.counting_group_id, Some(1));
        assert_eq!(r.precinct_portion_id, Some(7));
        assert_eq!(r.cards[0].contests[0].id, Some(1));
        let mark = r.cards[0].contests[0].marks[0].clone().unwrap();
        assert_eq!(mark.candidate_id, Some(2));
        assert_eq!(records[1].counting_group_id, None);
        assert_eq!(records[1].precinct_portion_id, None);
        assert_eq!(records[2].counting_group_id, None);
        assert_eq!(records[2].precinct_portion_id, None);
    }

    struct Unplugged;

    impl Read for Unplugged {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device unplugged"))
        }
    }

    #[test]
    fn read_failure_ends_the_stream() {
        let head = r#"{"Sessions": [{"CountingGroupId": 1}, {"CountingGroupId": 2}, "#;
        let inner = Cursor::new(head.as_bytes().to_vec()).chain(Unplugged);
        let reader = BufReader::with_capacity(8, inner);
        let mut s = SessionStream::new(reader, "test".to_string());
        assert_eq!(s.next().unwrap().unwrap().counting_group_id, Some(1));
        assert_eq!(s.next().unwrap().unwrap().counting_group_id, Some(2));
        match s.next() {
            Some(Err(TallyError::ReadingExport { .. })) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(s.next().is_none());
    }

    #[test]
    fn pulls_one_session_at_a_time() {
        let mut s = stream(r#"{"Sessions": [{"CountingGroupId": 1}, {"CountingGroupId": 2}, oops"#);
        assert_eq!(s.next().unwrap().unwrap().counting_group_id, Some(1));
        assert_eq!(s.next().unwrap().unwrap().counting_group_id, Some(2));
        // The broken element only fails when it is reached.
        assert!(s.next().unwrap().is_err());
        assert!(s.next().is_none());
    }

    #[test]
    fn malformed_top_level() {
        for bad in [
            "",
            "[]",
            "{}",
            r#"{"Sessions": {}}"#,
            r#"{"Version": 1 "Sessions": []}"#,
            r#"{"Sessions": [{}] "#,
            r#"{"Sessions": [{},]}"#,
            r#"{"Sessions": [{}]} {}"#,
            r#"{"Other": [}, "Sessions": []}"#,
        ] {
            let res = read_all(bad);
            assert!(
                matches!(res, Err(TallyError::MalformedExportFile { .. })),
                "{:?} -> {:?}",
                bad,
                res
            );
        }
    }

    #[test]
    fn broken_session_is_an_error() {
        let res = read_all(r#"{"Sessions": [{"CountingGroupId": 1,}]}"#);
        assert!(matches!(res, Err(TallyError::ParsingRecord { index: 1, .. })));
    }

    #[test]
    fn finds_the_export() {
        let dir = tempfile::tempdir().unwrap();
        let err = locate_export(dir.path()).unwrap_err();
        assert!(matches!(*err, TallyError::MissingExportFile { .. }));

        fs::write(dir.path().join("cvr_export_2.JSON"), "{}").unwrap();
        fs::write(dir.path().join("CVR_Export_1.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.json"), "{}").unwrap();
        let p = locate_export(dir.path()).unwrap();
        assert_eq!(p.file_name().unwrap(), "CVR_Export_1.json");

        fs::write(dir.path().join("CvrExport.json"), "{}").unwrap();
        let p = locate_export(dir.path()).unwrap();
        assert_eq!(p.file_name().unwrap(), "CvrExport.json");
    }

    #[test]
    fn streams_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CvrExport.json");
        let sessions: Vec<String> = (0..1000)
            .map(|i| format!(r#"{{"CountingGroupId": {}, "Original": {{"PrecinctPortionId": 7}}}}"#, i % 2 + 1))
            .collect();
        fs::write(&path, format!(r#"{{"Sessions": [{}]}}"#, sessions.join(","))).unwrap();
        let records: Vec<BallotRecord> = open_sessions(&path)
            .unwrap()
            .collect::<TallyResult<Vec<BallotRecord>>>()
            .unwrap();
        assert_eq!(records.len(), 1000);
        assert_eq!(records[999].counting_group_id, Some(2));
    }
}
