//! Reference table format used by the standalone merge engine.
//!
//! A table is a flat run of entries sorted by internal key, followed by a
//! fixed trailer:
//!
//! ```text
//! entry   = [key_len: varint32][internal key][value_len: varint32][value]
//! trailer = [entry_count: u32 LE][crc32 of entries: u32 LE][magic: u64 LE]
//! ```
//!
//! Tables are small (bounded by the target output size), so the reader loads
//! and verifies a whole table at open.

pub mod merge;

pub use merge::{MergeIterator, SortedTableMerger};

use crate::coding::{get_length_prefixed_slice, put_length_prefixed_slice};
use crate::error::{Error, Result};
use crate::key::{EncodedKey, InternalKey, ValueType};
use crate::transfer::LookupOutcome;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Magic number closing every table.
pub const TABLE_MAGIC: u64 = 0x636c_6f75_6474_6272;

/// Size of the trailer in bytes.
pub const TRAILER_SIZE: usize = 16;

/// Summary of a finished table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Total bytes written, trailer included
    pub file_size: u64,
    /// Encoded first key
    pub smallest: EncodedKey,
    /// Encoded last key
    pub largest: EncodedKey,
    /// Number of entries
    pub entries: u32,
}

/// Writes a table file.
///
/// ```no_run
/// use cloudtier::key::{InternalKey, ValueType};
/// use cloudtier::table::TableBuilder;
///
/// let mut builder = TableBuilder::new("1000000.ldb").unwrap();
/// builder.add(&InternalKey::new(b"a".to_vec(), 1, ValueType::Value), b"v").unwrap();
/// let info = builder.finish().unwrap();
/// assert_eq!(info.entries, 1);
/// ```
pub struct TableBuilder {
    writer: BufWriter<File>,
    path: PathBuf,
    hasher: crc32fast::Hasher,
    offset: u64,
    entries: u32,
    smallest: Option<InternalKey>,
    last_key: Option<InternalKey>,
    scratch: Vec<u8>,
}

impl TableBuilder {
    /// Creates the table file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            hasher: crc32fast::Hasher::new(),
            offset: 0,
            entries: 0,
            smallest: None,
            last_key: None,
            scratch: Vec::new(),
        })
    }

    /// Appends an entry. Keys must be strictly increasing.
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last {
                return Err(Error::invalid_argument("table keys must be added in sorted order"));
            }
        }

        self.scratch.clear();
        put_length_prefixed_slice(&mut self.scratch, &key.encode());
        put_length_prefixed_slice(&mut self.scratch, value);
        self.writer.write_all(&self.scratch)?;
        self.hasher.update(&self.scratch);
        self.offset += self.scratch.len() as u64;
        self.entries += 1;

        if self.smallest.is_none() {
            self.smallest = Some(key.clone());
        }
        self.last_key = Some(key.clone());
        Ok(())
    }

    /// Bytes written so far, excluding the trailer.
    pub fn current_size(&self) -> u64 {
        self.offset
    }

    /// Number of entries added.
    pub fn num_entries(&self) -> u32 {
        self.entries
    }

    /// Path of the table being built.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the trailer and syncs the file. Empty tables are rejected.
    pub fn finish(mut self) -> Result<TableInfo> {
        let (smallest, largest) = match (self.smallest.take(), self.last_key.take()) {
            (Some(smallest), Some(largest)) => (smallest, largest),
            _ => return Err(Error::invalid_state("cannot finish an empty table")),
        };

        let checksum = self.hasher.clone().finalize();
        self.writer.write_all(&self.entries.to_le_bytes())?;
        self.writer.write_all(&checksum.to_le_bytes())?;
        self.writer.write_all(&TABLE_MAGIC.to_le_bytes())?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(TableInfo {
            file_size: self.offset + TRAILER_SIZE as u64,
            smallest: EncodedKey::from(&smallest),
            largest: EncodedKey::from(&largest),
            entries: self.entries,
        })
    }

    /// Drops the partial table and removes its file.
    pub fn abandon(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// A fully loaded, verified table.
#[derive(Debug, Clone)]
pub struct TableReader {
    entries: Vec<(InternalKey, Vec<u8>)>,
}

impl TableReader {
    /// Opens and verifies the table at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Parses a table held in memory.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < TRAILER_SIZE {
            return Err(Error::corruption("table too small to hold a trailer"));
        }
        let (body, trailer) = data.split_at(data.len() - TRAILER_SIZE);
        let count = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let checksum = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&trailer[8..]);
        if u64::from_le_bytes(magic) != TABLE_MAGIC {
            return Err(Error::corruption("bad table magic number"));
        }
        if crc32fast::hash(body) != checksum {
            return Err(Error::corruption("table checksum mismatch"));
        }

        let mut input = body;
        let mut entries = Vec::with_capacity(count as usize);
        while !input.is_empty() {
            let key = get_length_prefixed_slice(&mut input)
                .ok_or_else(|| Error::corruption("truncated table key"))?;
            let key = InternalKey::decode(key)
                .ok_or_else(|| Error::corruption("table key is not an internal key"))?;
            let value = get_length_prefixed_slice(&mut input)
                .ok_or_else(|| Error::corruption("truncated table value"))?;
            entries.push((key, value.to_vec()));
        }
        if entries.len() != count as usize {
            return Err(Error::corruption(format!(
                "table holds {} entries, trailer says {}",
                entries.len(),
                count
            )));
        }
        Ok(Self { entries })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&InternalKey, &[u8])> + '_ {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Consumes the reader, yielding its entries in key order.
    pub fn into_entries(self) -> Vec<(InternalKey, Vec<u8>)> {
        self.entries
    }

    /// Looks up the newest entry for `user_key`.
    pub fn get(&self, user_key: &[u8]) -> LookupOutcome {
        let idx = self.entries.partition_point(|(k, _)| k.user_key() < user_key);
        match self.entries.get(idx) {
            Some((key, value)) if key.user_key() == user_key => match key.value_type() {
                ValueType::Value => LookupOutcome::Found(value.clone()),
                ValueType::Deletion => LookupOutcome::Deleted,
            },
            _ => LookupOutcome::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ikey(user: &str, seq: u64, value_type: ValueType) -> InternalKey {
        InternalKey::new(user.as_bytes().to_vec(), seq, value_type)
    }

    #[test]
    fn test_build_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1000000.ldb");

        let mut builder = TableBuilder::new(&path).unwrap();
        builder.add(&ikey("apple", 3, ValueType::Value), b"red").unwrap();
        builder.add(&ikey("banana", 9, ValueType::Value), b"yellow").unwrap();
        builder.add(&ikey("banana", 4, ValueType::Value), b"green").unwrap();
        builder.add(&ikey("cherry", 5, ValueType::Deletion), b"").unwrap();
        let info = builder.finish().unwrap();

        assert_eq!(info.entries, 4);
        assert_eq!(info.file_size, std::fs::metadata(&path).unwrap().len());
        assert_eq!(info.smallest, EncodedKey::from(&ikey("apple", 3, ValueType::Value)));
        assert_eq!(info.largest, EncodedKey::from(&ikey("cherry", 5, ValueType::Deletion)));

        let reader = TableReader::open(&path).unwrap();
        assert_eq!(reader.len(), 4);
        assert_eq!(reader.get(b"apple"), LookupOutcome::Found(b"red".to_vec()));
        assert_eq!(reader.get(b"banana"), LookupOutcome::Found(b"yellow".to_vec()));
        assert_eq!(reader.get(b"cherry"), LookupOutcome::Deleted);
        assert_eq!(reader.get(b"durian"), LookupOutcome::NotFound);
        assert_eq!(reader.get(b"aardvark"), LookupOutcome::NotFound);
    }

    #[test]
    fn test_rejects_unsorted_keys() {
        let dir = TempDir::new().unwrap();
        let mut builder = TableBuilder::new(dir.path().join("t.ldb")).unwrap();
        builder.add(&ikey("b", 1, ValueType::Value), b"1").unwrap();
        assert!(builder.add(&ikey("a", 1, ValueType::Value), b"2").is_err());
        assert!(builder.add(&ikey("b", 1, ValueType::Value), b"2").is_err());
    }

    #[test]
    fn test_empty_table_rejected() {
        let dir = TempDir::new().unwrap();
        let builder = TableBuilder::new(dir.path().join("t.ldb")).unwrap();
        assert!(matches!(builder.finish(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_abandon_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.ldb");
        let mut builder = TableBuilder::new(&path).unwrap();
        builder.add(&ikey("a", 1, ValueType::Value), b"1").unwrap();
        builder.abandon().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.ldb");
        let mut builder = TableBuilder::new(&path).unwrap();
        builder.add(&ikey("key", 1, ValueType::Value), b"value").unwrap();
        builder.finish().unwrap();

        let mut data = std::fs::read(&path).unwrap();
        data[2] ^= 0xff;
        assert!(matches!(TableReader::from_bytes(&data), Err(Error::Corruption(_))));
        assert!(matches!(TableReader::from_bytes(&data[..10]), Err(Error::Corruption(_))));
    }
}
