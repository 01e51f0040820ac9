// Readers for the Dominion manifest files.

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use snafu::ResultExt;

use std::fs;
use std::path::{Path, PathBuf};

use precinct_tally::ReferenceTables;

use crate::tally::*;

/// The locations of the four manifests of an export directory.
#[derive(Debug, Clone)]
pub struct ManifestPaths {
    pub portions: PathBuf,
    pub precincts: PathBuf,
    pub candidates: PathBuf,
    pub counting_groups: PathBuf,
}

impl ManifestPaths {
    pub fn in_dir(dir: &Path) -> ManifestPaths {
        ManifestPaths {
            portions: dir.join("PrecinctPortionManifest.json"),
            precincts: dir.join("PrecinctManifest.json"),
            candidates: dir.join("CandidateManifest.json"),
            counting_groups: dir.join("CountingGroupManifest.json"),
        }
    }

    fn all(&self) -> [&Path; 4] {
        [
            self.portions.as_path(),
            self.precincts.as_path(),
            self.candidates.as_path(),
            self.counting_groups.as_path(),
        ]
    }

    /// All four manifests are required.
    pub fn check_present(&self) -> BTallyResult<()> {
        for p in self.all() {
            if !p.is_file() {
                return Err(Box::new(TallyError::MissingReferenceFile {
                    path: p.display().to_string(),
                }));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Manifest<T> {
    #[serde(rename = "List")]
    pub list: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct PrecinctPortion {
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(rename = "PrecinctId")]
    pub precinct_id: u32,
}

/// Precincts and counting groups share the same shape.
#[derive(Debug, Clone, Deserialize)]
struct Described {
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(rename = "Description")]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(rename = "ContestId")]
    pub contest_id: u32,
    #[serde(rename = "Description")]
    pub description: String,
}

fn read_manifest<T: DeserializeOwned>(path: &Path) -> BTallyResult<Vec<T>> {
    let display = path.display().to_string();
    info!("Attempting to read manifest file {:?}", display);
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu {
        path: display.clone(),
    })?;
    // Some exporters start their files with a byte order mark.
    let manifest: Manifest<T> = serde_json::from_str(contents.trim_start_matches('\u{feff}'))
        .context(ParsingJsonSnafu { path: display.clone() })?;
    debug!("Read {} entries from {:?}", manifest.list.len(), display);
    Ok(manifest.list)
}

/// Loads the four manifests into lookup tables.
///
/// Only the candidates of `contest_id` are kept.
pub fn read_reference_tables(
    paths: &ManifestPaths,
    contest_id: u32,
) -> BTallyResult<ReferenceTables> {
    paths.check_present()?;

    let portions: Vec<PrecinctPortion> = read_manifest(&paths.portions)?;
    let precincts: Vec<Described> = read_manifest(&paths.precincts)?;
    let candidates: Vec<Candidate> = read_manifest(&paths.candidates)?;
    let groups: Vec<Described> = read_manifest(&paths.counting_groups)?;

    let tables = ReferenceTables {
        portion_to_precinct_id: portions.iter().map(|p| (p.id, p.precinct_id)).collect(),
        precinct_id_to_name: precincts
            .into_iter()
            .map(|p| (p.id, p.description))
            .collect(),
        candidate_name_by_id: candidates
            .into_iter()
            .filter(|c| c.contest_id == contest_id)
            .map(|c| (c.id, c.description))
            .collect(),
        counting_group_name_by_id: groups.into_iter().map(|g| (g.id, g.description)).collect(),
    };
    info!(
        "Loaded {} precinct portions, {} precincts, {} candidates for contest {}, {} counting groups",
        tables.portion_to_precinct_id.len(),
        tables.precinct_id_to_name.len(),
        tables.candidate_name_by_id.len(),
        contest_id,
        tables.counting_group_name_by_id.len()
    );
    Ok(tables)
}
