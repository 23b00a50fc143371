//! Offload decision and input selection.
//!
//! Data leaves the local tier from its last level. The [`OffloadPolicy`]
//! decides whether enough work is pending there; the [`InputSelector`] picks
//! one file at that level, starting after the cloud compaction pointer, plus
//! every remote file its key range overlaps.

use crate::key::{EncodedKey, KeyComparator};
use crate::manifest::{LocalFile, RemoteFile, Version};
use std::cmp::Ordering;

/// Snapshot of the work waiting to be pushed to the remote tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCloudWork {
    /// Level whose files move to the remote tier
    pub offload_level: u32,
    /// Bytes at the offload level
    pub offload_level_bytes: u64,
    /// Files at the offload level
    pub offload_level_files: usize,
    /// Bytes in the remote tier
    pub remote_bytes: u64,
    /// Files in the remote tier
    pub remote_files: usize,
    /// Where the previous offloaded compaction stopped
    pub cloud_compact_pointer: Option<EncodedKey>,
}

impl PendingCloudWork {
    /// Measures `version`, offloading from its last level.
    pub fn measure(version: &Version, cloud_compact_pointer: Option<&EncodedKey>) -> Self {
        let offload_level = (version.levels().len() as u32).saturating_sub(1);
        Self {
            offload_level,
            offload_level_bytes: version.level_size(offload_level),
            offload_level_files: version.level(offload_level).len(),
            remote_bytes: version.remote_size(),
            remote_files: version.num_remote_files(),
            cloud_compact_pointer: cloud_compact_pointer.cloned(),
        }
    }
}

/// Decides whether to offload a compaction now.
pub trait OffloadPolicy: Send + Sync {
    /// True when pending work justifies a remote compaction.
    fn should_offload(&self, work: &PendingCloudWork) -> bool;
}

impl<F> OffloadPolicy for F
where
    F: Fn(&PendingCloudWork) -> bool + Send + Sync,
{
    fn should_offload(&self, work: &PendingCloudWork) -> bool {
        self(work)
    }
}

/// Offloads once the offload level holds at least `threshold_bytes`.
#[derive(Debug, Clone, Copy)]
pub struct SizeThresholdPolicy {
    threshold_bytes: u64,
}

impl SizeThresholdPolicy {
    /// Creates the policy.
    pub fn new(threshold_bytes: u64) -> Self {
        Self { threshold_bytes }
    }
}

impl OffloadPolicy for SizeThresholdPolicy {
    fn should_offload(&self, work: &PendingCloudWork) -> bool {
        work.offload_level_files > 0 && work.offload_level_bytes >= self.threshold_bytes
    }
}

/// Inputs chosen for one offloaded compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Level of the local inputs
    pub level: u32,
    /// Local inputs
    pub local: Vec<LocalFile>,
    /// Overlapping remote inputs
    pub remote: Vec<RemoteFile>,
}

impl Selection {
    /// Largest key over all inputs, the next cloud compaction pointer.
    pub fn largest_key(&self, cmp: &dyn KeyComparator) -> Option<EncodedKey> {
        self.local
            .iter()
            .map(|f| &f.largest)
            .chain(self.remote.iter().map(|f| &f.largest))
            .max_by(|a, b| cmp.compare(a.as_bytes(), b.as_bytes()))
            .cloned()
    }

    /// Every input file number.
    pub fn numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.local.iter().map(|f| f.number).chain(self.remote.iter().map(|f| f.number))
    }
}

/// Chooses the inputs of an offloaded compaction.
pub trait InputSelector: Send + Sync {
    /// Picks inputs from `version`, or `None` when nothing is eligible.
    fn select(&self, version: &Version, cmp: &dyn KeyComparator, work: &PendingCloudWork) -> Option<Selection>;
}

/// The standard LSM overlap rule: one seed file plus every overlapping file
/// of the level below, here the remote tier. Files holding references are
/// never selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapSelector;

impl OverlapSelector {
    fn overlapping_remote(
        version: &Version,
        cmp: &dyn KeyComparator,
        seed: &LocalFile,
    ) -> Option<Vec<RemoteFile>> {
        let mut inputs = Vec::new();
        for file in version.remote_files() {
            if !ranges_overlap(cmp, &seed.smallest, &seed.largest, &file.smallest, &file.largest) {
                continue;
            }
            if file.refs > 0 {
                // Busy in another job: this seed must wait.
                return None;
            }
            inputs.push(file.clone());
        }
        Some(inputs)
    }
}

impl InputSelector for OverlapSelector {
    fn select(&self, version: &Version, cmp: &dyn KeyComparator, work: &PendingCloudWork) -> Option<Selection> {
        let files = version.level(work.offload_level);
        let after_pointer = |f: &&LocalFile| match &work.cloud_compact_pointer {
            Some(pointer) => cmp.compare(f.largest.as_bytes(), pointer.as_bytes()) == Ordering::Greater,
            None => true,
        };

        // Round robin: first file past the pointer, then wrap around.
        let candidates = files.iter().filter(after_pointer).chain(files.iter().filter(|f| !after_pointer(f)));
        for seed in candidates.filter(|f| f.refs == 0) {
            if let Some(remote) = Self::overlapping_remote(version, cmp, seed) {
                log::debug!(
                    "Selected file {} at level {} with {} overlapping remote files",
                    seed.number,
                    work.offload_level,
                    remote.len()
                );
                return Some(Selection { level: work.offload_level, local: vec![seed.clone()], remote });
            }
        }
        None
    }
}

/// Whether `[a_lo, a_hi]` and `[b_lo, b_hi]` share a user key.
pub fn ranges_overlap(
    cmp: &dyn KeyComparator,
    a_lo: &EncodedKey,
    a_hi: &EncodedKey,
    b_lo: &EncodedKey,
    b_hi: &EncodedKey,
) -> bool {
    cmp.compare_user_keys(a_lo.as_bytes(), b_hi.as_bytes()) != Ordering::Greater
        && cmp.compare_user_keys(b_lo.as_bytes(), a_hi.as_bytes()) != Ordering::Greater
}
