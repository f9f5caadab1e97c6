//! Zip assembly of delta decisions.
//!
//! Entry naming on the wire:
//! - full file: `<name>`
//! - patch: `<name>.patch`
//! - delete marker: empty `<name>.patch`

use std::io::{Seek, Write};
use tracing::{debug, info, warn};
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::catalog::Catalog;
use crate::delta::{select_deltas, ClientReport, DeltaDecision, DeltaSummary};
use crate::ident::{Checksum, FileName};
use crate::storage::{Artifact, ArtifactStore};

/// Size of a zip with no entries: just the end-of-central-directory record.
/// An archive at or below this size carries nothing to update.
pub const EMPTY_ARCHIVE_LEN: u64 = 22;

pub fn is_empty_archive(len: u64) -> bool {
    len <= EMPTY_ARCHIVE_LEN
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
}

impl From<Compression> for CompressionMethod {
    fn from(c: Compression) -> Self {
        match c {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// What actually landed in the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub patches: usize,
    pub full_files: usize,
    pub deletes: usize,
    /// Patches that could not be read and were sent as full files instead.
    pub fallbacks: usize,
    /// Entries dropped because their backing file could not be read.
    pub omitted: usize,
}

impl ArchiveSummary {
    pub fn entries(&self) -> usize {
        self.patches + self.full_files + self.deletes
    }
}

/// Write one entry per non-skip decision into a zip on `out`.
///
/// Full files come from the `latest` update. A patch that cannot be opened is
/// retried as a full file; a full file that cannot be opened is left out.
/// Neither case fails the archive. Artifacts are copied one at a time, so at
/// most one storage handle is open at any point.
pub fn assemble<W: Write + Seek>(
    decisions: &[DeltaDecision],
    latest: &Checksum,
    store: &dyn ArtifactStore,
    out: W,
    compression: Compression,
) -> ZipResult<(W, ArchiveSummary)> {
    let options = SimpleFileOptions::default().compression_method(compression.into());
    let mut zip = ZipWriter::new(out);
    let mut summary = ArchiveSummary::default();

    for decision in decisions {
        match decision {
            DeltaDecision::Skip { .. } => {}
            DeltaDecision::Patch { source, file } => match store.open_patch(source, file) {
                Ok(patch) => {
                    if write_entry(&mut zip, file.patch_name(), patch, options)? {
                        summary.patches += 1;
                    } else {
                        summary.omitted += 1;
                    }
                }
                Err(e) => {
                    debug!(file = %file, error = %e, "patch unreadable, falling back to full file");
                    summary.fallbacks += 1;
                    add_full_file(&mut zip, latest, file, store, options, &mut summary)?;
                }
            },
            DeltaDecision::FullFile { file } => {
                add_full_file(&mut zip, latest, file, store, options, &mut summary)?;
            }
            DeltaDecision::Delete { file } => {
                zip.start_file(file.patch_name(), options)?;
                summary.deletes += 1;
            }
        }
    }

    let out = zip.finish()?;
    Ok((out, summary))
}

/// Select deltas for `report` against `catalog` and assemble them onto `out`.
pub fn build_update<W: Write + Seek>(
    catalog: &Catalog,
    report: &ClientReport,
    store: &dyn ArtifactStore,
    out: W,
    compression: Compression,
) -> ZipResult<(W, ArchiveSummary)> {
    let decisions = select_deltas(catalog, report, store);
    let selected = DeltaSummary::of(&decisions);
    let (out, summary) = assemble(&decisions, catalog.latest_id(), store, out, compression)?;
    info!(
        skipped = selected.skipped,
        patches = summary.patches,
        full_files = summary.full_files,
        deletes = summary.deletes,
        fallbacks = summary.fallbacks,
        omitted = summary.omitted,
        "update assembled"
    );
    Ok((out, summary))
}

fn add_full_file<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    latest: &Checksum,
    file: &FileName,
    store: &dyn ArtifactStore,
    options: SimpleFileOptions,
    summary: &mut ArchiveSummary,
) -> ZipResult<()> {
    match store.open_file(latest, file) {
        Ok(data) => {
            if write_entry(zip, file.to_string(), data, options)? {
                summary.full_files += 1;
            } else {
                summary.omitted += 1;
            }
        }
        Err(e) => {
            warn!(file = %file, update = %latest, error = %e, "backing file missing, omitting entry");
            summary.omitted += 1;
        }
    }
    Ok(())
}

/// Copy `data` into a new entry. Returns `false` if the copy failed midway,
/// in which case the partial entry is removed again.
fn write_entry<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    name: String,
    mut data: Artifact,
    options: SimpleFileOptions,
) -> ZipResult<bool> {
    zip.start_file(name.as_str(), options)?;
    match std::io::copy(&mut data, zip) {
        Ok(_) => Ok(true),
        Err(e) => {
            warn!(entry = %name, error = %e, "read failed while archiving, omitting entry");
            zip.abort_file()?;
            Ok(false)
        }
    }
}
