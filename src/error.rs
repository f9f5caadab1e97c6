use std::path::PathBuf;

/// A string failed identifier validation.
#[derive(Debug, thiserror::Error)]
pub enum IdentError {
    #[error("not a 64-digit lowercase hex checksum: {0:?}")]
    Checksum(String),
    #[error("not a valid file name: {0:?}")]
    FileName(String),
    #[error("not a valid update id: {0:?}")]
    UpdateId(String),
}

/// Conditions that make a catalog unusable. Every variant is fatal: the
/// process must not serve traffic from a catalog that failed to load.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("could not list update directories of {path}")]
    ListRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("root info file {path} was not found or could not be read")]
    RootInfo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("root info file {path} has no mapping for the latest update")]
    NoLatest { path: PathBuf },
    #[error("latest update {0} has no manifest in the catalog")]
    LatestMissing(String),
    #[error("latest update {0} has no files")]
    LatestEmpty(String),
}

/// A client report that must be rejected before selection.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("request is missing the *update_hash key")]
    MissingUpdateHash,
    #[error("*update_hash is not a valid update id: {0:?}")]
    MalformedUpdateHash(String),
}

/// A stored artifact could not be opened.
#[derive(Debug, thiserror::Error)]
#[error("artifact {path} unavailable")]
pub struct ArtifactError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
