//! Incremental update distribution.
//!
//! A catalog root holds one directory per update plus a pointer to the
//! latest. Clients report the checksums they hold; [`delta::select_deltas`]
//! decides per file whether to skip it, ship a stored patch, ship the whole
//! file, or tell the client to delete it, and [`archive::assemble`] packs the
//! result into a zip.

pub mod archive;
pub mod catalog;
pub mod delta;
pub mod error;
pub mod ident;
pub mod manifest;
pub mod server;
pub mod storage;
mod util;
