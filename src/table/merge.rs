//! Multi-way merge over tables and the reference merge engine.
//!
//! The remote tier is the bottom of the tree, so a merge into it keeps only
//! the newest version of every user key and drops tombstones outright.

use crate::error::Result;
use crate::filename::object_name;
use crate::filter::{BloomFilter, Filter};
use crate::key::{InternalKey, ValueType};
use crate::manifest::RemoteFile;
use crate::table::{TableBuilder, TableReader};
use crate::transfer::LookupOutcome;
use crate::worker::{MergeEngine, MergeInput, MergeOutput};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};

/// Entry in the merge heap
struct MergeEntry {
    key: InternalKey,
    value: Vec<u8>,
    source: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap and we want the smallest key first.
        // Identical keys prefer the earlier source.
        other.key.cmp(&self.key).then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges several tables into one stream ordered by internal key.
pub struct MergeIterator {
    heap: BinaryHeap<MergeEntry>,
    sources: Vec<std::vec::IntoIter<(InternalKey, Vec<u8>)>>,
}

impl MergeIterator {
    /// Creates a merge over `tables`.
    pub fn new(tables: Vec<TableReader>) -> Self {
        let mut sources: Vec<_> = tables.into_iter().map(|t| t.into_entries().into_iter()).collect();
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, iter) in sources.iter_mut().enumerate() {
            if let Some((key, value)) = iter.next() {
                heap.push(MergeEntry { key, value, source });
            }
        }
        Self { heap, sources }
    }
}

impl Iterator for MergeIterator {
    type Item = (InternalKey, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.heap.pop()?;
        if let Some((key, value)) = self.sources[entry.source].next() {
            self.heap.push(MergeEntry { key, value, source: entry.source });
        }
        Some((entry.key, entry.value))
    }
}

/// Merge engine over the reference table format.
#[derive(Debug, Clone)]
pub struct SortedTableMerger {
    target_file_size: u64,
    bloom_bits_per_key: usize,
}

impl SortedTableMerger {
    /// Creates a merger that cuts outputs at `target_file_size` bytes.
    pub fn new(target_file_size: u64, bloom_bits_per_key: usize) -> Self {
        Self { target_file_size: target_file_size.max(1), bloom_bits_per_key }
    }
}

/// An output table being written.
struct OpenOutput {
    number: u64,
    builder: TableBuilder,
    user_keys: Vec<Vec<u8>>,
}

impl SortedTableMerger {
    fn open_output(&self, output_dir: &Path, number: u64) -> Result<OpenOutput> {
        let path = output_dir.join(object_name(number)?);
        Ok(OpenOutput { number, builder: TableBuilder::new(path)?, user_keys: Vec::new() })
    }

    fn close_output(&self, output: OpenOutput) -> Result<MergeOutput> {
        let path: PathBuf = output.builder.path().to_path_buf();
        let info = output.builder.finish()?;
        let bloom = (self.bloom_bits_per_key > 0).then(|| {
            BloomFilter::build(output.user_keys.iter().map(Vec::as_slice), self.bloom_bits_per_key).encode()
        });
        log::debug!("Finished output {} ({} entries, {} bytes)", output.number, info.entries, info.file_size);

        Ok(MergeOutput {
            file: RemoteFile::new(output.number, info.file_size, info.smallest, info.largest),
            path,
            bloom,
        })
    }
}

impl MergeEngine for SortedTableMerger {
    fn merge(&self, inputs: &[MergeInput], output_dir: &Path, first_number: u64) -> Result<Vec<MergeOutput>> {
        let tables = inputs
            .iter()
            .map(|input| TableReader::open(&input.path))
            .collect::<Result<Vec<_>>>()?;
        let total_entries: usize = tables.iter().map(TableReader::len).sum();
        log::info!("Merging {} tables ({} entries)", tables.len(), total_entries);

        let mut outputs = Vec::new();
        let mut current: Option<OpenOutput> = None;
        let mut next_number = first_number;
        let mut last_user_key: Option<Vec<u8>> = None;
        let mut dropped = 0usize;

        for (key, value) in MergeIterator::new(tables) {
            if last_user_key.as_deref() == Some(key.user_key()) {
                dropped += 1;
                continue;
            }
            last_user_key = Some(key.user_key().to_vec());

            if key.value_type() == ValueType::Deletion {
                dropped += 1;
                continue;
            }

            if current.is_none() {
                current = Some(self.open_output(output_dir, next_number)?);
                next_number += 1;
            }
            let full = match current.as_mut() {
                Some(output) => {
                    output.builder.add(&key, &value)?;
                    output.user_keys.push(key.user_key().to_vec());
                    output.builder.current_size() >= self.target_file_size
                }
                None => false,
            };
            if full {
                if let Some(output) = current.take() {
                    outputs.push(self.close_output(output)?);
                }
            }
        }

        if let Some(output) = current.take() {
            outputs.push(self.close_output(output)?);
        }

        log::info!("Merge produced {} outputs, dropped {} entries", outputs.len(), dropped);
        Ok(outputs)
    }

    fn point_lookup(&self, table: &Path, user_key: &[u8]) -> Result<LookupOutcome> {
        Ok(TableReader::open(table)?.get(user_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::EncodedKey;
    use tempfile::TempDir;

    fn write_table(dir: &Path, name: &str, entries: &[(&str, u64, ValueType, &str)]) -> PathBuf {
        let path = dir.join(name);
        let mut builder = TableBuilder::new(&path).unwrap();
        for (user, seq, value_type, value) in entries {
            builder.add(&InternalKey::new(user.as_bytes().to_vec(), *seq, *value_type), value.as_bytes()).unwrap();
        }
        builder.finish().unwrap();
        path
    }

    #[test]
    fn test_merge_iterator_interleaves() {
        let dir = TempDir::new().unwrap();
        let a = write_table(dir.path(), "a", &[("a", 1, ValueType::Value, "1"), ("c", 1, ValueType::Value, "3")]);
        let b = write_table(dir.path(), "b", &[("b", 1, ValueType::Value, "2"), ("d", 1, ValueType::Value, "4")]);

        let tables = vec![TableReader::open(a).unwrap(), TableReader::open(b).unwrap()];
        let keys: Vec<Vec<u8>> = MergeIterator::new(tables).map(|(k, _)| k.user_key().to_vec()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn test_merge_keeps_newest_and_drops_tombstones() {
        let dir = TempDir::new().unwrap();
        let old = write_table(
            dir.path(),
            "old",
            &[("k1", 1, ValueType::Value, "old"), ("k2", 2, ValueType::Value, "keep"), ("k3", 3, ValueType::Value, "gone")],
        );
        let new = write_table(dir.path(), "new", &[("k1", 10, ValueType::Value, "new"), ("k3", 11, ValueType::Deletion, "")]);

        let out = TempDir::new().unwrap();
        let merger = SortedTableMerger::new(1 << 20, 10);
        let inputs = vec![MergeInput { number: 3, path: old }, MergeInput { number: 4, path: new }];
        let outputs = merger.merge(&inputs, out.path(), 1_000_000).unwrap();

        assert_eq!(outputs.len(), 1);
        let output = &outputs[0];
        assert_eq!(output.file.number, 1_000_000);
        assert_eq!(output.path, out.path().join("1000000.ldb"));

        let table = TableReader::open(&output.path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(b"k1"), LookupOutcome::Found(b"new".to_vec()));
        assert_eq!(table.get(b"k2"), LookupOutcome::Found(b"keep".to_vec()));
        assert_eq!(table.get(b"k3"), LookupOutcome::NotFound);

        let bloom = BloomFilter::decode(output.bloom.as_ref().unwrap()).unwrap();
        assert!(bloom.may_contain(b"k1"));
        assert!(bloom.may_contain(b"k2"));

        let first = table.iter().next().map(|(k, _)| EncodedKey::from(k)).unwrap();
        let last = table.iter().last().map(|(k, _)| EncodedKey::from(k)).unwrap();
        assert_eq!(output.file.smallest, first);
        assert_eq!(output.file.largest, last);
    }

    #[test]
    fn test_merge_splits_outputs() {
        let dir = TempDir::new().unwrap();
        let entries: Vec<(String, String)> = (0..100).map(|i| (format!("key{:04}", i), "x".repeat(64))).collect();
        let refs: Vec<(&str, u64, ValueType, &str)> =
            entries.iter().map(|(k, v)| (k.as_str(), 1, ValueType::Value, v.as_str())).collect();
        let input = write_table(dir.path(), "in", &refs);

        let out = TempDir::new().unwrap();
        let merger = SortedTableMerger::new(1024, 0);
        let outputs = merger.merge(&[MergeInput { number: 1, path: input }], out.path(), 1_000_010).unwrap();

        assert!(outputs.len() > 1);
        for (i, output) in outputs.iter().enumerate() {
            assert_eq!(output.file.number, 1_000_010 + i as u64);
            assert!(output.bloom.is_none());
        }
        let total: usize = outputs.iter().map(|o| TableReader::open(&o.path).unwrap().len()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_merge_of_only_tombstones_is_empty() {
        let dir = TempDir::new().unwrap();
        let input = write_table(dir.path(), "in", &[("a", 5, ValueType::Deletion, "")]);
        let out = TempDir::new().unwrap();
        let outputs = SortedTableMerger::new(1 << 20, 10)
            .merge(&[MergeInput { number: 1, path: input }], out.path(), 1_000_000)
            .unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_point_lookup() {
        let dir = TempDir::new().unwrap();
        let table = write_table(dir.path(), "t", &[("a", 2, ValueType::Deletion, ""), ("a", 1, ValueType::Value, "v")]);
        let merger = SortedTableMerger::new(1 << 20, 10);
        assert_eq!(merger.point_lookup(&table, b"a").unwrap(), LookupOutcome::Deleted);
        assert_eq!(merger.point_lookup(&table, b"b").unwrap(), LookupOutcome::NotFound);
    }
}
