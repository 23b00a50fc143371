//! Version edit: one delta record of the manifest, and its binary codec.
//!
//! Every field is preceded by a varint32 tag. Tags are written to disk and
//! must never be renumbered. Decoding accepts any subset of fields in any
//! order, and rejects unknown tags, truncated fields and out-of-range levels.

use crate::coding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice,
    put_varint32, put_varint64,
};
use crate::error::{Error, Result};
use crate::key::EncodedKey;
use bytes::BytesMut;
use std::collections::BTreeSet;
use std::fmt;

/// Seeks a freshly decoded local file is granted before the engine considers
/// compacting it. Replaced on apply by a size-derived budget.
pub const DEFAULT_ALLOWED_SEEKS: u32 = 1 << 30;

/// On-disk tag numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum Tag {
    Comparator = 1,
    LogNumber = 2,
    NextFileNumber = 3,
    LastSequence = 4,
    CompactPointer = 5,
    DeletedFile = 6,
    NewFile = 7,
    // 8 was used for large value refs
    PrevLogNumber = 9,
    NewCloudFile = 10,
    DeletedCloudFile = 11,
    CloudCompactPointer = 12,
    NextCloudFileNumber = 13,
}

impl Tag {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Tag::Comparator),
            2 => Some(Tag::LogNumber),
            3 => Some(Tag::NextFileNumber),
            4 => Some(Tag::LastSequence),
            5 => Some(Tag::CompactPointer),
            6 => Some(Tag::DeletedFile),
            7 => Some(Tag::NewFile),
            9 => Some(Tag::PrevLogNumber),
            10 => Some(Tag::NewCloudFile),
            11 => Some(Tag::DeletedCloudFile),
            12 => Some(Tag::CloudCompactPointer),
            13 => Some(Tag::NextCloudFileNumber),
            _ => None,
        }
    }
}

/// A table resident in the local tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// File number, below the remote threshold
    pub number: u64,
    /// Size of the file in bytes
    pub file_size: u64,
    /// Smallest key served by the table
    pub smallest: EncodedKey,
    /// Largest key served by the table
    pub largest: EncodedKey,
    /// Outstanding references (compactions, readers)
    pub refs: u32,
    /// Seeks allowed until the engine schedules a compaction
    pub allowed_seeks: u32,
}

impl LocalFile {
    /// Creates an unreferenced local file descriptor.
    pub fn new(number: u64, file_size: u64, smallest: EncodedKey, largest: EncodedKey) -> Self {
        Self { number, file_size, smallest, largest, refs: 0, allowed_seeks: DEFAULT_ALLOWED_SEEKS }
    }
}

/// An object resident in the remote tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Object number, at or above the remote threshold
    pub number: u64,
    /// Size of the object in bytes
    pub file_size: u64,
    /// Smallest key served by the object
    pub smallest: EncodedKey,
    /// Largest key served by the object
    pub largest: EncodedKey,
    /// Outstanding references
    pub refs: u32,
}

impl RemoteFile {
    /// Creates an unreferenced remote file descriptor.
    pub fn new(number: u64, file_size: u64, smallest: EncodedKey, largest: EncodedKey) -> Self {
        Self { number, file_size, smallest, largest, refs: 0 }
    }
}

/// A delta applied to the file set and counters of the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionEdit {
    comparator: Option<String>,
    log_number: Option<u64>,
    prev_log_number: Option<u64>,
    next_file_number: Option<u64>,
    next_remote_number: Option<u64>,
    last_sequence: Option<u64>,
    compact_pointers: Vec<(u32, EncodedKey)>,
    cloud_compact_pointer: Option<EncodedKey>,
    deleted_files: BTreeSet<(u32, u64)>,
    new_files: Vec<(u32, LocalFile)>,
    new_remote_files: Vec<RemoteFile>,
    deleted_remote_files: Vec<u64>,
}

impl VersionEdit {
    /// Creates an empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the comparator name.
    pub fn set_comparator_name(&mut self, name: impl Into<String>) {
        self.comparator = Some(name.into());
    }

    /// Records the current write-ahead log number.
    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    /// Records the previous write-ahead log number.
    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    /// Records the next local file number.
    pub fn set_next_file_number(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    /// Records the next remote object number.
    pub fn set_next_remote_number(&mut self, number: u64) {
        self.next_remote_number = Some(number);
    }

    /// Records the last sequence number.
    pub fn set_last_sequence(&mut self, sequence: u64) {
        self.last_sequence = Some(sequence);
    }

    /// Records where the next compaction of `level` should start.
    pub fn set_compact_pointer(&mut self, level: u32, key: EncodedKey) {
        self.compact_pointers.push((level, key));
    }

    /// Records where the next remote-tier compaction should start.
    pub fn set_cloud_compact_pointer(&mut self, key: EncodedKey) {
        self.cloud_compact_pointer = Some(key);
    }

    /// Adds a local file at `level`.
    pub fn add_file(&mut self, level: u32, file: LocalFile) {
        self.new_files.push((level, file));
    }

    /// Removes local file `number` from `level`.
    pub fn delete_file(&mut self, level: u32, number: u64) {
        self.deleted_files.insert((level, number));
    }

    /// Adds a remote object.
    pub fn add_remote_file(&mut self, file: RemoteFile) {
        self.new_remote_files.push(file);
    }

    /// Removes remote object `number`.
    pub fn delete_remote_file(&mut self, number: u64) {
        self.deleted_remote_files.push(number);
    }

    /// Comparator name, if recorded.
    pub fn comparator_name(&self) -> Option<&str> {
        self.comparator.as_deref()
    }

    /// Write-ahead log number, if recorded.
    pub fn log_number(&self) -> Option<u64> {
        self.log_number
    }

    /// Previous write-ahead log number, if recorded.
    pub fn prev_log_number(&self) -> Option<u64> {
        self.prev_log_number
    }

    /// Next local file number, if recorded.
    pub fn next_file_number(&self) -> Option<u64> {
        self.next_file_number
    }

    /// Next remote object number, if recorded.
    pub fn next_remote_number(&self) -> Option<u64> {
        self.next_remote_number
    }

    /// Last sequence number, if recorded.
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Per-level compaction pointers in record order.
    pub fn compact_pointers(&self) -> &[(u32, EncodedKey)] {
        &self.compact_pointers
    }

    /// Remote-tier compaction pointer.
    pub fn cloud_compact_pointer(&self) -> Option<&EncodedKey> {
        self.cloud_compact_pointer.as_ref()
    }

    /// Deleted local files as (level, number) pairs, sorted and unique.
    pub fn deleted_files(&self) -> &BTreeSet<(u32, u64)> {
        &self.deleted_files
    }

    /// Added local files with their levels.
    pub fn new_files(&self) -> &[(u32, LocalFile)] {
        &self.new_files
    }

    /// Added remote objects.
    pub fn new_remote_files(&self) -> &[RemoteFile] {
        &self.new_remote_files
    }

    /// Deleted remote object numbers.
    pub fn deleted_remote_files(&self) -> &[u64] {
        &self.deleted_remote_files
    }

    /// Whether the edit changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Encodes the edit into its tagged binary form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(64);

        if let Some(ref name) = self.comparator {
            put_varint32(&mut buf, Tag::Comparator as u32);
            put_length_prefixed_slice(&mut buf, name.as_bytes());
        }
        if let Some(number) = self.log_number {
            put_varint32(&mut buf, Tag::LogNumber as u32);
            put_varint64(&mut buf, number);
        }
        if let Some(number) = self.prev_log_number {
            put_varint32(&mut buf, Tag::PrevLogNumber as u32);
            put_varint64(&mut buf, number);
        }
        if let Some(number) = self.next_file_number {
            put_varint32(&mut buf, Tag::NextFileNumber as u32);
            put_varint64(&mut buf, number);
        }
        if let Some(sequence) = self.last_sequence {
            put_varint32(&mut buf, Tag::LastSequence as u32);
            put_varint64(&mut buf, sequence);
        }
        if let Some(number) = self.next_remote_number {
            put_varint32(&mut buf, Tag::NextCloudFileNumber as u32);
            put_varint64(&mut buf, number);
        }

        for (level, key) in &self.compact_pointers {
            put_varint32(&mut buf, Tag::CompactPointer as u32);
            put_varint32(&mut buf, *level);
            put_length_prefixed_slice(&mut buf, key.as_bytes());
        }

        if let Some(ref key) = self.cloud_compact_pointer {
            put_varint32(&mut buf, Tag::CloudCompactPointer as u32);
            put_length_prefixed_slice(&mut buf, key.as_bytes());
        }

        for (level, number) in &self.deleted_files {
            put_varint32(&mut buf, Tag::DeletedFile as u32);
            put_varint32(&mut buf, *level);
            put_varint64(&mut buf, *number);
        }

        for (level, file) in &self.new_files {
            put_varint32(&mut buf, Tag::NewFile as u32);
            put_varint32(&mut buf, *level);
            put_varint64(&mut buf, file.number);
            put_varint64(&mut buf, file.file_size);
            put_length_prefixed_slice(&mut buf, file.smallest.as_bytes());
            put_length_prefixed_slice(&mut buf, file.largest.as_bytes());
        }

        for file in &self.new_remote_files {
            put_varint32(&mut buf, Tag::NewCloudFile as u32);
            put_varint64(&mut buf, file.number);
            put_varint64(&mut buf, file.file_size);
            put_length_prefixed_slice(&mut buf, file.smallest.as_bytes());
            put_length_prefixed_slice(&mut buf, file.largest.as_bytes());
        }

        for number in &self.deleted_remote_files {
            put_varint32(&mut buf, Tag::DeletedCloudFile as u32);
            put_varint64(&mut buf, *number);
        }

        buf.to_vec()
    }

    /// Decodes an edit. Level indices must be below `num_levels`.
    ///
    /// The result is built in a fresh edit and returned only once the whole
    /// record parsed; nothing is handed back on failure.
    pub fn decode(src: &[u8], num_levels: u32) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut input = src;

        while !input.is_empty() {
            let tag = get_varint32(&mut input).ok_or_else(|| corrupt("invalid tag"))?;
            let tag = Tag::from_u32(tag)
                .ok_or_else(|| Error::corruption(format!("VersionEdit: unknown tag {}", tag)))?;

            match tag {
                Tag::Comparator => {
                    let name =
                        get_length_prefixed_slice(&mut input).ok_or_else(|| corrupt("comparator name"))?;
                    let name = String::from_utf8(name.to_vec())
                        .map_err(|_| corrupt("comparator name is not UTF-8"))?;
                    edit.comparator = Some(name);
                }
                Tag::LogNumber => {
                    edit.log_number =
                        Some(get_varint64(&mut input).ok_or_else(|| corrupt("log number"))?);
                }
                Tag::PrevLogNumber => {
                    edit.prev_log_number =
                        Some(get_varint64(&mut input).ok_or_else(|| corrupt("previous log number"))?);
                }
                Tag::NextFileNumber => {
                    edit.next_file_number =
                        Some(get_varint64(&mut input).ok_or_else(|| corrupt("next file number"))?);
                }
                Tag::LastSequence => {
                    edit.last_sequence =
                        Some(get_varint64(&mut input).ok_or_else(|| corrupt("last sequence number"))?);
                }
                Tag::NextCloudFileNumber => {
                    edit.next_remote_number = Some(
                        get_varint64(&mut input).ok_or_else(|| corrupt("next cloud file number"))?,
                    );
                }
                Tag::CompactPointer => {
                    let level = get_level(&mut input, num_levels, "compaction pointer")?;
                    let key = get_key(&mut input).ok_or_else(|| corrupt("compaction pointer"))?;
                    edit.compact_pointers.push((level, key));
                }
                Tag::CloudCompactPointer => {
                    let key = get_key(&mut input).ok_or_else(|| corrupt("cloud compaction pointer"))?;
                    edit.cloud_compact_pointer = Some(key);
                }
                Tag::DeletedFile => {
                    let level = get_level(&mut input, num_levels, "deleted file")?;
                    let number = get_varint64(&mut input).ok_or_else(|| corrupt("deleted file"))?;
                    edit.deleted_files.insert((level, number));
                }
                Tag::NewFile => {
                    let level = get_level(&mut input, num_levels, "new-file entry")?;
                    let (number, file_size, smallest, largest) =
                        get_file_body(&mut input).ok_or_else(|| corrupt("new-file entry"))?;
                    edit.new_files.push((level, LocalFile::new(number, file_size, smallest, largest)));
                }
                Tag::NewCloudFile => {
                    let (number, file_size, smallest, largest) =
                        get_file_body(&mut input).ok_or_else(|| corrupt("new-cloud-file entry"))?;
                    edit.new_remote_files.push(RemoteFile::new(number, file_size, smallest, largest));
                }
                Tag::DeletedCloudFile => {
                    let number =
                        get_varint64(&mut input).ok_or_else(|| corrupt("deleted cloud file"))?;
                    edit.deleted_remote_files.push(number);
                }
            }
        }

        Ok(edit)
    }
}

fn corrupt(what: &str) -> Error {
    Error::corruption(format!("VersionEdit: {}", what))
}

fn get_level(input: &mut &[u8], num_levels: u32, what: &str) -> Result<u32> {
    let level = get_varint32(input).ok_or_else(|| corrupt(what))?;
    if level >= num_levels {
        return Err(Error::corruption(format!(
            "VersionEdit: {}: level {} out of range (levels: {})",
            what, level, num_levels
        )));
    }
    Ok(level)
}

fn get_key(input: &mut &[u8]) -> Option<EncodedKey> {
    get_length_prefixed_slice(input).map(|bytes| EncodedKey::new(bytes.to_vec()))
}

fn get_file_body(input: &mut &[u8]) -> Option<(u64, u64, EncodedKey, EncodedKey)> {
    let number = get_varint64(input)?;
    let file_size = get_varint64(input)?;
    let smallest = get_key(input)?;
    let largest = get_key(input)?;
    Some((number, file_size, smallest, largest))
}

impl fmt::Display for VersionEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionEdit {{")?;
        if let Some(ref name) = self.comparator {
            write!(f, "\n  Comparator: {}", name)?;
        }
        if let Some(number) = self.log_number {
            write!(f, "\n  LogNumber: {}", number)?;
        }
        if let Some(number) = self.prev_log_number {
            write!(f, "\n  PrevLogNumber: {}", number)?;
        }
        if let Some(number) = self.next_file_number {
            write!(f, "\n  NextFile: {}", number)?;
        }
        if let Some(number) = self.next_remote_number {
            write!(f, "\n  NextCloudFile: {}", number)?;
        }
        if let Some(sequence) = self.last_sequence {
            write!(f, "\n  LastSeq: {}", sequence)?;
        }
        for (level, key) in &self.compact_pointers {
            write!(f, "\n  CompactPointer: {} {:?}", level, key)?;
        }
        if let Some(ref key) = self.cloud_compact_pointer {
            write!(f, "\n  CloudCompactPointer: {:?}", key)?;
        }
        for (level, number) in &self.deleted_files {
            write!(f, "\n  DeleteFile: {} {}", level, number)?;
        }
        for (level, file) in &self.new_files {
            write!(
                f,
                "\n  AddFile: {} {} {} {:?} .. {:?}",
                level, file.number, file.file_size, file.smallest, file.largest
            )?;
        }
        for file in &self.new_remote_files {
            write!(
                f,
                "\n  AddCloudFile: {} {} {:?} .. {:?}",
                file.number, file.file_size, file.smallest, file.largest
            )?;
        }
        for number in &self.deleted_remote_files {
            write!(f, "\n  DeleteCloudFile: {}", number)?;
        }
        writeln!(f, "\n}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{InternalKey, ValueType};
    use proptest::prelude::*;

    const LEVELS: u32 = 7;

    fn ikey(user_key: &[u8], sequence: u64) -> EncodedKey {
        EncodedKey::from(&InternalKey::new(user_key.to_vec(), sequence, ValueType::Value))
    }

    fn full_edit() -> VersionEdit {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name("leveldb.InternalKeyComparator");
        edit.set_log_number(10);
        edit.set_prev_log_number(9);
        edit.set_next_file_number(42);
        edit.set_next_remote_number(1_000_100);
        edit.set_last_sequence(987_654);
        edit.set_compact_pointer(2, ikey(b"m", 17));
        edit.set_cloud_compact_pointer(ikey(b"q", 3));
        edit.delete_file(1, 7);
        edit.delete_file(0, 5);
        edit.add_file(3, LocalFile::new(40, 4096, ikey(b"a", 1), ikey(b"f", 2)));
        edit.add_remote_file(RemoteFile::new(1_000_050, 8192, ikey(b"g", 4), ikey(b"k", 5)));
        edit.delete_remote_file(1_000_001);
        edit
    }

    #[test]
    fn test_roundtrip_mixed_tags() {
        let edit = full_edit();
        let decoded = VersionEdit::decode(&edit.encode(), LEVELS).unwrap();
        assert_eq!(decoded, edit);
        assert_eq!(decoded.new_remote_files().len(), 1);
        assert_eq!(decoded.deleted_remote_files(), &[1_000_001]);
    }

    #[test]
    fn test_roundtrip_empty() {
        let edit = VersionEdit::new();
        assert!(edit.encode().is_empty());
        assert_eq!(VersionEdit::decode(&[], LEVELS).unwrap(), edit);
    }

    #[test]
    fn test_new_cloud_file_then_deleted_cloud_file() {
        // Hand-built record: one tag 10 followed by one tag 11.
        let mut buf = Vec::new();
        put_varint32(&mut buf, 10);
        put_varint64(&mut buf, 1_000_007);
        put_varint64(&mut buf, 512);
        put_length_prefixed_slice(&mut buf, &[0x01]);
        put_length_prefixed_slice(&mut buf, &[0x02]);
        put_varint32(&mut buf, 11);
        put_varint64(&mut buf, 1_000_003);

        let edit = VersionEdit::decode(&buf, LEVELS).unwrap();
        assert_eq!(edit.new_remote_files().len(), 1);
        assert_eq!(edit.new_remote_files()[0].number, 1_000_007);
        assert_eq!(edit.new_remote_files()[0].file_size, 512);
        assert_eq!(edit.new_remote_files()[0].smallest.as_bytes(), &[0x01]);
        assert_eq!(edit.deleted_remote_files(), &[1_000_003]);
    }

    #[test]
    fn test_cloud_tags_between_ordinary_tags() {
        let mut buf = Vec::new();
        put_varint32(&mut buf, Tag::DeletedCloudFile as u32);
        put_varint64(&mut buf, 1_000_001);
        put_varint32(&mut buf, Tag::LogNumber as u32);
        put_varint64(&mut buf, 3);
        put_varint32(&mut buf, Tag::NewCloudFile as u32);
        put_varint64(&mut buf, 1_000_002);
        put_varint64(&mut buf, 1);
        put_length_prefixed_slice(&mut buf, b"a");
        put_length_prefixed_slice(&mut buf, b"b");
        put_varint32(&mut buf, Tag::NextFileNumber as u32);
        put_varint64(&mut buf, 8);

        let edit = VersionEdit::decode(&buf, LEVELS).unwrap();
        assert_eq!(edit.log_number(), Some(3));
        assert_eq!(edit.next_file_number(), Some(8));
        assert_eq!(edit.new_remote_files()[0].number, 1_000_002);
        assert_eq!(edit.deleted_remote_files(), &[1_000_001]);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut buf = Vec::new();
        put_varint32(&mut buf, 8);
        put_varint64(&mut buf, 1);
        let err = VersionEdit::decode(&buf, LEVELS).unwrap_err();
        assert!(matches!(err, Error::Corruption(ref msg) if msg.contains("unknown tag")));
    }

    #[test]
    fn test_level_out_of_range_rejected() {
        let mut edit = VersionEdit::new();
        edit.delete_file(6, 1);
        let encoded = edit.encode();

        assert!(VersionEdit::decode(&encoded, 7).is_ok());
        let err = VersionEdit::decode(&encoded, 6).unwrap_err();
        assert!(matches!(err, Error::Corruption(ref msg) if msg.contains("out of range")));
    }

    #[test]
    fn test_truncated_record_rejected() {
        let encoded = full_edit().encode();
        // Every strict prefix that cuts a field in half must fail.
        let mut failures = 0;
        for len in 1..encoded.len() {
            if VersionEdit::decode(&encoded[..len], LEVELS).is_err() {
                failures += 1;
            }
        }
        assert!(failures > 0);
        assert!(VersionEdit::decode(&encoded[..encoded.len() - 1], LEVELS).is_err());
    }

    #[test]
    fn test_deleted_files_are_a_set() {
        let mut edit = VersionEdit::new();
        edit.delete_file(1, 9);
        edit.delete_file(1, 9);
        edit.delete_file(0, 12);
        let decoded = VersionEdit::decode(&edit.encode(), LEVELS).unwrap();
        let pairs: Vec<_> = decoded.deleted_files().iter().copied().collect();
        assert_eq!(pairs, vec![(0, 12), (1, 9)]);
    }

    #[test]
    fn test_display_includes_cloud_fields() {
        let text = full_edit().to_string();
        assert!(text.starts_with("VersionEdit {"));
        assert!(text.contains("NextCloudFile: 1000100"));
        assert!(text.contains("AddCloudFile: 1000050"));
        assert!(text.contains("DeleteCloudFile: 1000001"));
    }

    fn key_strategy() -> impl Strategy<Value = EncodedKey> {
        proptest::collection::vec(any::<u8>(), 0..24).prop_map(EncodedKey::new)
    }

    fn local_strategy() -> impl Strategy<Value = (u32, LocalFile)> {
        (0..LEVELS, 0u64..1_000_000, any::<u64>(), key_strategy(), key_strategy())
            .prop_map(|(level, n, size, s, l)| (level, LocalFile::new(n, size, s, l)))
    }

    fn remote_strategy() -> impl Strategy<Value = RemoteFile> {
        (1_000_000u64..10_000_000, any::<u64>(), key_strategy(), key_strategy())
            .prop_map(|(n, size, s, l)| RemoteFile::new(n, size, s, l))
    }

    prop_compose! {
        fn edit_strategy()(
            comparator in proptest::option::of(any::<String>()),
            log in proptest::option::of(any::<u64>()),
            prev_log in proptest::option::of(any::<u64>()),
            next_file in proptest::option::of(any::<u64>()),
            next_remote in proptest::option::of(any::<u64>()),
            seq in proptest::option::of(any::<u64>()),
            pointer in proptest::option::of(key_strategy()),
            level_pointers in proptest::collection::vec((0..LEVELS, key_strategy()), 0..4),
            deleted in proptest::collection::vec((0..LEVELS, any::<u64>()), 0..4),
            added in proptest::collection::vec(local_strategy(), 0..4),
            remote_added in proptest::collection::vec(remote_strategy(), 0..4),
            remote_deleted in proptest::collection::vec(any::<u64>(), 0..4),
        ) -> VersionEdit {
            let mut edit = VersionEdit::new();
            if let Some(name) = comparator { edit.set_comparator_name(name); }
            if let Some(n) = log { edit.set_log_number(n); }
            if let Some(n) = prev_log { edit.set_prev_log_number(n); }
            if let Some(n) = next_file { edit.set_next_file_number(n); }
            if let Some(n) = next_remote { edit.set_next_remote_number(n); }
            if let Some(n) = seq { edit.set_last_sequence(n); }
            for (level, k) in level_pointers { edit.set_compact_pointer(level, k); }
            if let Some(k) = pointer { edit.set_cloud_compact_pointer(k); }
            for (level, n) in deleted { edit.delete_file(level, n); }
            for (level, f) in added { edit.add_file(level, f); }
            for f in remote_added { edit.add_remote_file(f); }
            for n in remote_deleted { edit.delete_remote_file(n); }
            edit
        }
    }

    proptest! {
        #[test]
        fn prop_edit_roundtrip(edit in edit_strategy()) {
            let decoded = VersionEdit::decode(&edit.encode(), LEVELS).unwrap();
            prop_assert_eq!(decoded, edit);
        }
    }
}
