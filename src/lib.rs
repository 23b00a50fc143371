//! # cloudtier - Two-Tier Storage for an LSM-Tree Engine
//!
//! cloudtier lets the data files of a LevelDB-style storage engine live in two
//! tiers: a fast local tier and a durable remote object-storage tier.
//! Compactions into the remote tier can run in a stateless compute function or
//! a standalone worker process instead of the process that owns the manifest.
//!
//! ## Architecture
//!
//! - **Manifest**: Append-only log of version edits, extended with
//!   remote-tier records (`manifest`)
//! - **File identity**: Numbers below 1,000,000 are local files, numbers at or
//!   above it are remote objects (`filename`)
//! - **Transfer codec**: JSON documents for compaction jobs, results and
//!   point lookups, binary fields in base64 (`transfer`)
//! - **Gateway**: Upload, download, invoke compaction, invoke point lookup
//!   (`cloud`)
//! - **Coordinator**: Selects inputs, runs the job, commits one version edit
//!   (`compaction`)
//! - **Worker**: Runs a job against a private scratch tier (`worker`)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cloudtier::cloud::{CloudManager, MemoryObjectStore, NoCompute};
//! use cloudtier::compaction::{CloudCompactor, InProcessWorkerExecutor};
//! use cloudtier::manifest::VersionSet;
//! use cloudtier::table::SortedTableMerger;
//! use cloudtier::{CloudOptions, Options};
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), cloudtier::Error> {
//! let versions = Arc::new(Mutex::new(VersionSet::open("./data", Options::default())?));
//! let cloud = CloudOptions::default().location("us-east-1", "my-bucket");
//! let gateway = CloudManager::new(cloud, Arc::new(MemoryObjectStore::new()), Arc::new(NoCompute));
//!
//! let engine = Arc::new(SortedTableMerger::new(2 * 1024 * 1024, 10));
//! let executor = InProcessWorkerExecutor::new(gateway.clone(), engine, "./data");
//! let compactor = CloudCompactor::new(versions, gateway, Box::new(executor));
//!
//! if let Some(stats) = compactor.maybe_offload()? {
//!     println!("moved {} bytes to the remote tier", stats.input_bytes);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod cloud;
pub mod coding;
pub mod compaction;
pub mod compute;
pub mod config;
pub mod error;
pub mod filename;
pub mod filter;
pub mod key;
pub mod manifest;
pub mod retry;
pub mod table;
pub mod transfer;
pub mod worker;

// Re-exports
pub use cloud::{CloudManager, CloudReader, ComputeInvoker, ObjectStore};
pub use compaction::{CloudCompactor, CompactionExecutor, CompactionStats, OffloadPolicy};
pub use config::{CloudOptions, Options};
pub use error::{Error, Result};
pub use filename::{classify, object_name, Tier};
pub use manifest::{LocalFile, RemoteFile, VersionEdit, VersionSet};
pub use transfer::{CompactionJob, CompactionResult, LookupOutcome};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
