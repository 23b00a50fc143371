//! Filters that let readers skip remote objects.
//!
//! Filters are built per remote object and travel through the object store
//! as a side channel next to the object they describe.

pub mod bloom;

pub use bloom::BloomFilter;

/// Approximate membership over the user keys of one table.
pub trait Filter: Send + Sync {
    /// False only if `user_key` was never added.
    fn may_contain(&self, user_key: &[u8]) -> bool;

    /// Records `user_key`.
    fn add(&mut self, user_key: &[u8]);

    /// Bytes stored under the table's bloom object name.
    fn encode(&self) -> Vec<u8>;

    /// Parses a blob produced by [`Filter::encode`]. A truncated or
    /// inconsistent blob is `Corruption`.
    fn decode(data: &[u8]) -> crate::Result<Self>
    where
        Self: Sized;
}
