//! Per-file delta selection between a client's reported state and the latest
//! update.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::ReportError;
use crate::ident::{is_file_name, Checksum, FileName, UpdateId};
use crate::storage::ArtifactStore;

/// Reserved wire key carrying the update the client believes it matches.
pub const UPDATE_HASH_KEY: &str = "*update_hash";

/// What a client says it currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientReport {
    /// `None` when the client's claim could not be parsed.
    pub claimed_update: Option<UpdateId>,
    /// Reported checksums. Values are kept verbatim: a malformed checksum is
    /// simply one that never matches.
    pub files: BTreeMap<FileName, String>,
}

impl ClientReport {
    pub fn new(claimed_update: Option<UpdateId>, files: BTreeMap<FileName, String>) -> Self {
        Self {
            claimed_update,
            files,
        }
    }

    /// Split the flat wire map into the claimed update and the file entries.
    ///
    /// Other `*`-prefixed keys are reserved and ignored. Keys that are not
    /// valid file names are dropped so they can never reach an archive entry.
    pub fn from_wire(mut map: BTreeMap<String, String>) -> Result<Self, ReportError> {
        let raw = map
            .remove(UPDATE_HASH_KEY)
            .ok_or(ReportError::MissingUpdateHash)?;
        let claimed_update = raw
            .parse::<UpdateId>()
            .map_err(|_| ReportError::MalformedUpdateHash(raw))?;

        let files = map
            .into_iter()
            .filter(|(key, _)| !key.starts_with('*'))
            .filter_map(|(key, checksum)| {
                if is_file_name(&key) {
                    FileName::new(key).ok().map(|name| (name, checksum))
                } else {
                    debug!(key = %key, "dropping report entry with invalid file name");
                    None
                }
            })
            .collect();

        Ok(Self {
            claimed_update: Some(claimed_update),
            files,
        })
    }
}

/// Action for one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeltaDecision {
    /// Client already holds the latest content.
    Skip { file: FileName },
    /// Ship the stored patch from `source` to latest.
    Patch { source: Checksum, file: FileName },
    /// Ship the whole file from the latest update.
    FullFile { file: FileName },
    /// Client holds a file the latest update does not have.
    Delete { file: FileName },
}

impl DeltaDecision {
    pub fn file(&self) -> &FileName {
        match self {
            Self::Skip { file }
            | Self::Patch { file, .. }
            | Self::FullFile { file }
            | Self::Delete { file } => file,
        }
    }
}

/// Decision counts for one selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeltaSummary {
    pub skipped: usize,
    pub patched: usize,
    pub full_files: usize,
    pub deleted: usize,
}

impl DeltaSummary {
    pub fn of(decisions: &[DeltaDecision]) -> Self {
        let mut summary = Self::default();
        for d in decisions {
            match d {
                DeltaDecision::Skip { .. } => summary.skipped += 1,
                DeltaDecision::Patch { .. } => summary.patched += 1,
                DeltaDecision::FullFile { .. } => summary.full_files += 1,
                DeltaDecision::Delete { .. } => summary.deleted += 1,
            }
        }
        summary
    }

    /// True if nothing needs to be shipped.
    pub fn is_noop(&self) -> bool {
        self.patched == 0 && self.full_files == 0 && self.deleted == 0
    }
}

/// Decide what the client needs to reach the latest update.
///
/// Files of the latest manifest come first, in manifest order, followed by a
/// `Delete` for every reported file the latest update lacks. A patch is only
/// considered when the client claims a concrete update id held by `catalog`;
/// otherwise (including a `latest` claim) every changed or missing file is
/// sent whole. Patch availability
/// probes are independent and run in parallel.
pub fn select_deltas(
    catalog: &Catalog,
    report: &ClientReport,
    store: &dyn ArtifactStore,
) -> Vec<DeltaDecision> {
    let latest = catalog.latest();
    let client = report
        .claimed_update
        .as_ref()
        .and_then(|id| catalog.known_update(id));

    let mut decisions: Vec<DeltaDecision> = latest
        .par_iter()
        .map(|(name, checksum)| match report.files.get(name) {
            Some(reported) if reported == checksum.as_str() => DeltaDecision::Skip { file: name.clone() },
            Some(_) => match client {
                Some(source) if store.has_patch(source, name) => DeltaDecision::Patch {
                    source: source.clone(),
                    file: name.clone(),
                },
                Some(source) => {
                    debug!(file = %name, source = %source, "no patch available, sending full file");
                    DeltaDecision::FullFile { file: name.clone() }
                }
                None => DeltaDecision::FullFile { file: name.clone() },
            },
            None => DeltaDecision::FullFile { file: name.clone() },
        })
        .collect();

    let claimed: BTreeSet<&FileName> = report
        .files
        .keys()
        .filter(|name| latest.contains_key(*name))
        .collect();
    decisions.extend(
        report
            .files
            .keys()
            .filter(|name| !claimed.contains(name))
            .map(|name| DeltaDecision::Delete { file: name.clone() }),
    );

    decisions
}
