//! Manifest: the append-only log of version edits.
//!
//! The manifest is the source of truth for which files exist in which tier.
//!
//! ## Layout
//!
//! - `edit.rs`: the version edit record and its tagged binary codec
//! - `log.rs`: checksummed framing of records in the manifest file
//! - `version.rs`: the live file set rebuilt from the log, and its single writer

pub mod edit;
pub mod log;
pub mod version;

pub use edit::{LocalFile, RemoteFile, VersionEdit};
pub use version::{Version, VersionSet, MANIFEST_FILE};
