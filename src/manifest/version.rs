//! Version and version set.
//!
//! A [`Version`] is the live file set of both tiers at one point of the
//! manifest. The [`VersionSet`] owns the current version, the counters the
//! manifest carries, and the single manifest writer. Every change goes through
//! [`VersionSet::log_and_apply`]: validate, append and sync, then mutate.

use crate::config::Options;
use crate::error::{Error, Result};
use crate::filename::{require_tier, Tier, REMOTE_NUMBER_START};
use crate::key::{EncodedKey, InternalKeyComparator, KeyComparator};
use crate::manifest::edit::{LocalFile, RemoteFile, VersionEdit};
use crate::manifest::log::{read_manifest, ManifestWriter};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the manifest log inside the database directory.
pub const MANIFEST_FILE: &str = "MANIFEST";

/// Minimum seek budget granted to a local file on apply.
const MIN_ALLOWED_SEEKS: u64 = 100;

/// The set of live files in both tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    levels: Vec<Vec<LocalFile>>,
    remote: Vec<RemoteFile>,
}

impl Version {
    /// Creates an empty version with `num_levels` levels.
    pub fn new(num_levels: u32) -> Self {
        Self { levels: vec![Vec::new(); num_levels as usize], remote: Vec::new() }
    }

    /// Local files of every level.
    pub fn levels(&self) -> &[Vec<LocalFile>] {
        &self.levels
    }

    /// Local files of one level. Empty for levels out of range.
    pub fn level(&self, level: u32) -> &[LocalFile] {
        self.levels.get(level as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remote files, ordered by smallest key.
    pub fn remote_files(&self) -> &[RemoteFile] {
        &self.remote
    }

    /// Number of local files.
    pub fn num_files(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Number of remote files.
    pub fn num_remote_files(&self) -> usize {
        self.remote.len()
    }

    /// Total bytes of the local files at `level`.
    pub fn level_size(&self, level: u32) -> u64 {
        self.level(level).iter().map(|f| f.file_size).sum()
    }

    /// Total bytes in the remote tier.
    pub fn remote_size(&self) -> u64 {
        self.remote.iter().map(|f| f.file_size).sum()
    }

    /// Looks up a live local file.
    pub fn find_local(&self, number: u64) -> Option<(u32, &LocalFile)> {
        self.levels.iter().enumerate().find_map(|(level, files)| {
            files.iter().find(|f| f.number == number).map(|f| (level as u32, f))
        })
    }

    /// Looks up a live remote file.
    pub fn find_remote(&self, number: u64) -> Option<&RemoteFile> {
        self.remote.iter().find(|f| f.number == number)
    }

    fn find_local_mut(&mut self, number: u64) -> Option<&mut LocalFile> {
        self.levels.iter_mut().flat_map(|files| files.iter_mut()).find(|f| f.number == number)
    }

    fn find_remote_mut(&mut self, number: u64) -> Option<&mut RemoteFile> {
        self.remote.iter_mut().find(|f| f.number == number)
    }
}

/// Owner of the manifest log and the current version.
pub struct VersionSet {
    dir: PathBuf,
    options: Options,
    comparator: Arc<dyn KeyComparator>,
    writer: Option<ManifestWriter>,
    current: Version,
    log_number: u64,
    prev_log_number: u64,
    next_file_number: u64,
    next_remote_number: u64,
    last_sequence: u64,
    compact_pointers: Vec<Option<EncodedKey>>,
    cloud_compact_pointer: Option<EncodedKey>,
    /// Files dropped from the live set while still referenced
    retired: HashMap<u64, u32>,
    /// Files dropped from the live set with no references left
    obsolete: Vec<u64>,
}

impl VersionSet {
    /// Opens the manifest in `dir`, replaying it if present, creating it otherwise.
    pub fn open<P: AsRef<Path>>(dir: P, options: Options) -> Result<Self> {
        Self::open_with_comparator(dir, options, Arc::new(InternalKeyComparator))
    }

    /// Like [`VersionSet::open`] with an explicit key comparator.
    pub fn open_with_comparator<P: AsRef<Path>>(
        dir: P,
        options: Options,
        comparator: Arc<dyn KeyComparator>,
    ) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let num_levels = options.num_levels;
        let mut versions = Self {
            dir,
            comparator,
            writer: None,
            current: Version::new(num_levels),
            log_number: 0,
            prev_log_number: 0,
            next_file_number: 1,
            next_remote_number: REMOTE_NUMBER_START,
            last_sequence: 0,
            compact_pointers: vec![None; num_levels as usize],
            cloud_compact_pointer: None,
            retired: HashMap::new(),
            obsolete: Vec::new(),
            options,
        };

        if versions.manifest_path().exists() {
            versions.recover()?;
        } else {
            versions.create_manifest()?;
        }

        Ok(versions)
    }

    fn recover(&mut self) -> Result<()> {
        let path = self.manifest_path();
        log::info!("Recovering from manifest: {:?}", path);

        let contents = read_manifest(&path)?;
        for record in &contents.records {
            let edit = VersionEdit::decode(record, self.options.num_levels)?;
            self.validate(&edit)?;
            self.apply(&edit);
        }
        // Nothing is referenced right after a replay.
        self.obsolete.clear();

        self.writer = Some(ManifestWriter::reopen(&path, contents.valid_len, self.options.sync_manifest)?);

        log::info!(
            "Recovered {} edits: {} local files, {} remote files, next remote number {}",
            contents.records.len(),
            self.current.num_files(),
            self.current.num_remote_files(),
            self.next_remote_number
        );
        Ok(())
    }

    fn create_manifest(&mut self) -> Result<()> {
        let path = self.manifest_path();
        log::info!("Creating new manifest: {:?}", path);

        self.writer = Some(ManifestWriter::create(&path, self.options.sync_manifest)?);

        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.options.comparator_name.clone());
        edit.set_log_number(self.log_number);
        self.log_and_apply(edit)
    }

    /// Validates `edit`, appends it to the manifest, then applies it.
    ///
    /// Missing counters are filled in from the current state so each record is
    /// self-describing. If validation or the append fails the version set is
    /// left exactly as it was.
    pub fn log_and_apply(&mut self, mut edit: VersionEdit) -> Result<()> {
        if edit.next_file_number().is_none() {
            edit.set_next_file_number(self.next_file_number);
        }
        if edit.next_remote_number().is_none() {
            let highest = edit.new_remote_files().iter().map(|f| f.number + 1).max();
            edit.set_next_remote_number(highest.unwrap_or(0).max(self.next_remote_number));
        }
        if edit.last_sequence().is_none() {
            edit.set_last_sequence(self.last_sequence);
        }

        self.validate(&edit)?;

        let payload = edit.encode();
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::invalid_state("manifest writer is not open"))?;
        writer.append(&payload)?;

        self.apply(&edit);
        log::debug!("Applied {}", edit);
        Ok(())
    }

    /// Checks an edit against the state it will be applied to.
    fn validate(&self, edit: &VersionEdit) -> Result<()> {
        if let Some(name) = edit.comparator_name() {
            if name != self.options.comparator_name {
                return Err(Error::invalid_argument(format!(
                    "comparator mismatch: manifest uses {}, options use {}",
                    name, self.options.comparator_name
                )));
            }
        }

        for (level, file) in edit.new_files() {
            self.check_level(*level)?;
            require_tier(file.number, Tier::Local)?;
        }
        for (level, number) in edit.deleted_files() {
            self.check_level(*level)?;
            require_tier(*number, Tier::Local)?;
        }

        let mut added = HashSet::new();
        for file in edit.new_remote_files() {
            require_tier(file.number, Tier::Remote)?;
            if file.number < self.next_remote_number {
                return Err(Error::invalid_argument(format!(
                    "remote object {} is below the next remote number {}",
                    file.number, self.next_remote_number
                )));
            }
            if !added.insert(file.number) {
                return Err(Error::invalid_argument(format!(
                    "remote object {} added twice",
                    file.number
                )));
            }
        }
        for number in edit.deleted_remote_files() {
            require_tier(*number, Tier::Remote)?;
        }

        if let Some(next) = edit.next_remote_number() {
            if next < self.next_remote_number {
                return Err(Error::invalid_argument(format!(
                    "next remote number moves backwards: {} -> {}",
                    self.next_remote_number, next
                )));
            }
            if let Some(highest) = added.iter().max() {
                if next <= *highest {
                    return Err(Error::invalid_argument(format!(
                        "next remote number {} does not advance past added object {}",
                        next, highest
                    )));
                }
            }
        }
        if let Some(next) = edit.next_file_number() {
            if next > REMOTE_NUMBER_START {
                return Err(Error::invalid_argument(format!(
                    "next local file number {} leaves the local numbering space",
                    next
                )));
            }
        }

        Ok(())
    }

    fn check_level(&self, level: u32) -> Result<()> {
        if level >= self.options.num_levels {
            return Err(Error::invalid_argument(format!(
                "level {} out of range (levels: {})",
                level, self.options.num_levels
            )));
        }
        Ok(())
    }

    /// Applies a validated edit to the in-memory state.
    fn apply(&mut self, edit: &VersionEdit) {
        if let Some(number) = edit.log_number() {
            self.log_number = number;
        }
        if let Some(number) = edit.prev_log_number() {
            self.prev_log_number = number;
        }
        if let Some(number) = edit.next_file_number() {
            self.next_file_number = number;
        }
        if let Some(number) = edit.next_remote_number() {
            self.next_remote_number = number;
        }
        if let Some(sequence) = edit.last_sequence() {
            self.last_sequence = sequence;
        }
        for (level, key) in edit.compact_pointers() {
            self.compact_pointers[*level as usize] = Some(key.clone());
        }
        if let Some(key) = edit.cloud_compact_pointer() {
            self.cloud_compact_pointer = Some(key.clone());
        }

        let mut removed = Vec::new();
        for (level, number) in edit.deleted_files() {
            let files = &mut self.current.levels[*level as usize];
            if let Some(pos) = files.iter().position(|f| f.number == *number) {
                removed.push((*number, files.remove(pos).refs));
            }
        }
        for number in edit.deleted_remote_files() {
            if let Some(pos) = self.current.remote.iter().position(|f| f.number == *number) {
                removed.push((*number, self.current.remote.remove(pos).refs));
            }
        }
        for (number, refs) in removed {
            if refs == 0 {
                self.obsolete.push(number);
            } else {
                self.retired.insert(number, refs);
            }
        }

        let cmp = Arc::clone(&self.comparator);
        for (level, file) in edit.new_files() {
            let mut file = file.clone();
            file.refs = 0;
            file.allowed_seeks = (file.file_size / 16384).clamp(MIN_ALLOWED_SEEKS, u32::MAX as u64) as u32;
            let files = &mut self.current.levels[*level as usize];
            files.push(file);
            // Level 0 files may overlap and stay in arrival order.
            if *level > 0 {
                files.sort_by(|a, b| by_smallest(cmp.as_ref(), &a.smallest, &b.smallest));
            }
        }
        if !edit.new_remote_files().is_empty() {
            for file in edit.new_remote_files() {
                let mut file = file.clone();
                file.refs = 0;
                self.current.remote.push(file);
            }
            self.current
                .remote
                .sort_by(|a, b| by_smallest(cmp.as_ref(), &a.smallest, &b.smallest));
        }
    }

    /// Takes a reference on a live file of either tier.
    pub fn acquire(&mut self, number: u64) -> Result<()> {
        let refs = match Tier::of(number) {
            Tier::Local => self.current.find_local_mut(number).map(|f| &mut f.refs),
            Tier::Remote => self.current.find_remote_mut(number).map(|f| &mut f.refs),
        };
        match refs {
            Some(refs) => {
                *refs += 1;
                Ok(())
            }
            None => Err(Error::invalid_state(format!("file {} is not live", number))),
        }
    }

    /// Drops a reference. A file no longer live becomes obsolete at zero.
    pub fn release(&mut self, number: u64) {
        let refs = match Tier::of(number) {
            Tier::Local => self.current.find_local_mut(number).map(|f| &mut f.refs),
            Tier::Remote => self.current.find_remote_mut(number).map(|f| &mut f.refs),
        };
        if let Some(refs) = refs {
            *refs = refs.saturating_sub(1);
            return;
        }

        if let Some(refs) = self.retired.get_mut(&number) {
            *refs = refs.saturating_sub(1);
            if *refs == 0 {
                self.retired.remove(&number);
                self.obsolete.push(number);
            }
        }
    }

    /// Files absent from the live set with no references, for unlinking.
    pub fn take_obsolete_files(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.obsolete)
    }

    /// Allocates a local file number.
    pub fn new_file_number(&mut self) -> Result<u64> {
        if self.next_file_number >= REMOTE_NUMBER_START {
            return Err(Error::invalid_state("local file numbering space exhausted"));
        }
        let number = self.next_file_number;
        self.next_file_number += 1;
        Ok(number)
    }

    /// The current version.
    pub fn current(&self) -> &Version {
        &self.current
    }

    /// The key comparator.
    pub fn comparator(&self) -> Arc<dyn KeyComparator> {
        Arc::clone(&self.comparator)
    }

    /// The engine options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Next local file number.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number
    }

    /// Next remote object number.
    pub fn next_remote_number(&self) -> u64 {
        self.next_remote_number
    }

    /// Current write-ahead log number.
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    /// Previous write-ahead log number.
    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    /// Last sequence number.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Compaction pointer of `level`.
    pub fn compact_pointer(&self, level: u32) -> Option<&EncodedKey> {
        self.compact_pointers.get(level as usize).and_then(Option::as_ref)
    }

    /// Remote-tier compaction pointer.
    pub fn cloud_compact_pointer(&self) -> Option<&EncodedKey> {
        self.cloud_compact_pointer.as_ref()
    }

    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to the manifest file.
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }
}

fn by_smallest(cmp: &dyn KeyComparator, a: &EncodedKey, b: &EncodedKey) -> Ordering {
    cmp.compare(a.as_bytes(), b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{InternalKey, ValueType};
    use tempfile::TempDir;

    fn ikey(user_key: &[u8]) -> EncodedKey {
        EncodedKey::from(&InternalKey::new(user_key.to_vec(), 1, ValueType::Value))
    }

    fn local(number: u64, lo: &[u8], hi: &[u8]) -> LocalFile {
        LocalFile::new(number, 1024, ikey(lo), ikey(hi))
    }

    fn remote(number: u64, lo: &[u8], hi: &[u8]) -> RemoteFile {
        RemoteFile::new(number, 4096, ikey(lo), ikey(hi))
    }

    #[test]
    fn test_version_set_create() {
        let temp_dir = TempDir::new().unwrap();
        let versions = VersionSet::open(temp_dir.path(), Options::default()).unwrap();

        assert_eq!(versions.current().num_files(), 0);
        assert_eq!(versions.next_remote_number(), REMOTE_NUMBER_START);
        assert!(versions.manifest_path().exists());
    }

    #[test]
    fn test_log_and_apply_both_tiers() {
        let temp_dir = TempDir::new().unwrap();
        let mut versions = VersionSet::open(temp_dir.path(), Options::default()).unwrap();

        let mut edit = VersionEdit::new();
        edit.add_file(6, local(3, b"a", b"c"));
        edit.add_remote_file(remote(1_000_000, b"d", b"f"));
        versions.log_and_apply(edit).unwrap();

        assert_eq!(versions.current().level(6).len(), 1);
        assert_eq!(versions.current().num_remote_files(), 1);
        assert_eq!(versions.next_remote_number(), 1_000_001);
        assert_eq!(versions.current().level(6)[0].allowed_seeks, 100);
    }

    #[test]
    fn test_recover_replays_cloud_edits() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut versions = VersionSet::open(temp_dir.path(), Options::default()).unwrap();
            for i in 0..3u64 {
                let mut edit = VersionEdit::new();
                edit.add_remote_file(remote(1_000_000 + i, b"a", b"z"));
                versions.log_and_apply(edit).unwrap();
            }
            let mut edit = VersionEdit::new();
            edit.delete_remote_file(1_000_001);
            edit.add_file(2, local(5, b"k", b"m"));
            versions.log_and_apply(edit).unwrap();
        }

        let versions = VersionSet::open(temp_dir.path(), Options::default()).unwrap();
        let numbers: Vec<u64> = versions.current().remote_files().iter().map(|f| f.number).collect();
        assert_eq!(numbers.len(), 2);
        assert!(numbers.contains(&1_000_000));
        assert!(numbers.contains(&1_000_002));
        assert_eq!(versions.next_remote_number(), 1_000_003);
        assert_eq!(versions.current().level(2).len(), 1);
    }

    #[test]
    fn test_reject_stale_remote_number() {
        let temp_dir = TempDir::new().unwrap();
        let mut versions = VersionSet::open(temp_dir.path(), Options::default()).unwrap();

        let mut edit = VersionEdit::new();
        edit.add_remote_file(remote(1_000_005, b"a", b"b"));
        versions.log_and_apply(edit).unwrap();

        let len_before = std::fs::metadata(versions.manifest_path()).unwrap().len();
        let mut edit = VersionEdit::new();
        edit.add_remote_file(remote(1_000_002, b"c", b"d"));
        assert!(matches!(versions.log_and_apply(edit), Err(Error::InvalidArgument(_))));

        // Nothing written, nothing applied
        assert_eq!(std::fs::metadata(versions.manifest_path()).unwrap().len(), len_before);
        assert_eq!(versions.current().num_remote_files(), 1);
    }

    #[test]
    fn test_reject_tier_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let mut versions = VersionSet::open(temp_dir.path(), Options::default()).unwrap();

        let mut edit = VersionEdit::new();
        edit.add_remote_file(remote(17, b"a", b"b"));
        assert!(matches!(versions.log_and_apply(edit), Err(Error::InvalidArgument(_))));

        let mut edit = VersionEdit::new();
        edit.add_file(0, local(1_000_017, b"a", b"b"));
        assert!(matches!(versions.log_and_apply(edit), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_refs_gate_obsolete_files() {
        let temp_dir = TempDir::new().unwrap();
        let mut versions = VersionSet::open(temp_dir.path(), Options::default()).unwrap();

        let mut edit = VersionEdit::new();
        edit.add_file(6, local(3, b"a", b"c"));
        edit.add_file(6, local(4, b"d", b"f"));
        versions.log_and_apply(edit).unwrap();

        versions.acquire(3).unwrap();
        let mut edit = VersionEdit::new();
        edit.delete_file(6, 3);
        edit.delete_file(6, 4);
        versions.log_and_apply(edit).unwrap();

        // 4 had no references, 3 waits for its release
        assert_eq!(versions.take_obsolete_files(), vec![4]);
        versions.release(3);
        assert_eq!(versions.take_obsolete_files(), vec![3]);
    }

    #[test]
    fn test_acquire_unknown_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut versions = VersionSet::open(temp_dir.path(), Options::default()).unwrap();
        assert!(matches!(versions.acquire(99), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_allocate_file_number() {
        let temp_dir = TempDir::new().unwrap();
        let mut versions = VersionSet::open(temp_dir.path(), Options::default()).unwrap();

        assert_eq!(versions.new_file_number().unwrap(), 1);
        assert_eq!(versions.new_file_number().unwrap(), 2);
        assert_eq!(versions.next_file_number(), 3);
    }

    #[test]
    fn test_comparator_mismatch_on_recover() {
        let temp_dir = TempDir::new().unwrap();
        VersionSet::open(temp_dir.path(), Options::default()).unwrap();

        let mut options = Options::default();
        options.comparator_name = "other.Comparator".to_string();
        assert!(matches!(VersionSet::open(temp_dir.path(), options), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_remote_files_sorted_by_smallest() {
        let temp_dir = TempDir::new().unwrap();
        let mut versions = VersionSet::open(temp_dir.path(), Options::default()).unwrap();

        let mut edit = VersionEdit::new();
        edit.add_remote_file(remote(1_000_000, b"x", b"z"));
        edit.add_remote_file(remote(1_000_001, b"a", b"c"));
        versions.log_and_apply(edit).unwrap();

        let files = versions.current().remote_files();
        assert_eq!(files[0].number, 1_000_001);
        assert_eq!(files[1].number, 1_000_000);
    }
}
