//! Remote point lookups guarded by the bloom side channel.
//!
//! Before invoking the remote lookup function for an object, the reader
//! consults that object's bloom filter. Decoded filters are kept in a
//! byte-bounded LRU cache; the least recently used filters are dropped first.
//! When a filter cannot be fetched the reader falls back to the direct
//! remote lookup.

use crate::cloud::CloudManager;
use crate::error::Result;
use crate::filter::{BloomFilter, Filter};
use crate::manifest::RemoteFile;
use crate::retry::with_retries;
use crate::transfer::LookupOutcome;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// LRU cache of decoded filters keyed by object number, bounded by the
/// encoded size of the cached filters.
#[derive(Debug)]
struct FilterCache {
    capacity: usize,
    size: usize,
    entries: HashMap<u64, (Arc<BloomFilter>, usize)>,
    /// Most recently used at the back
    lru_queue: VecDeque<u64>,
}

impl FilterCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, size: 0, entries: HashMap::new(), lru_queue: VecDeque::new() }
    }

    fn get(&mut self, number: u64) -> Option<Arc<BloomFilter>> {
        let filter = Arc::clone(&self.entries.get(&number)?.0);
        if let Some(pos) = self.lru_queue.iter().position(|&n| n == number) {
            self.lru_queue.remove(pos);
        }
        self.lru_queue.push_back(number);
        Some(filter)
    }

    fn insert(&mut self, number: u64, filter: Arc<BloomFilter>, charge: usize) {
        // Filters larger than the whole cache are not cached
        if charge > self.capacity {
            return;
        }
        self.remove(number);
        while self.size + charge > self.capacity {
            match self.lru_queue.pop_front() {
                Some(victim) => {
                    if let Some((_, victim_charge)) = self.entries.remove(&victim) {
                        self.size -= victim_charge;
                    }
                }
                None => break,
            }
        }
        self.entries.insert(number, (filter, charge));
        self.lru_queue.push_back(number);
        self.size += charge;
    }

    fn remove(&mut self, number: u64) {
        if let Some((_, charge)) = self.entries.remove(&number) {
            self.size -= charge;
            self.lru_queue.retain(|&n| n != number);
        }
    }
}

/// Point-lookup client for the remote tier.
pub struct CloudReader {
    gateway: CloudManager,
    filters: Mutex<FilterCache>,
    filter_skips: AtomicU64,
    remote_lookups: AtomicU64,
}

impl CloudReader {
    /// Creates a reader over `gateway` whose filter cache holds up to
    /// `filter_cache_bytes` of the gateway's options.
    pub fn new(gateway: CloudManager) -> Self {
        let capacity = gateway.options().filter_cache_bytes;
        Self {
            gateway,
            filters: Mutex::new(FilterCache::new(capacity)),
            filter_skips: AtomicU64::new(0),
            remote_lookups: AtomicU64::new(0),
        }
    }

    /// Looks `user_key` up in one remote object.
    pub fn get(&self, user_key: &[u8], file: &RemoteFile) -> Result<LookupOutcome> {
        if let Some(filter) = self.filter(file.number) {
            if !filter.may_contain(user_key) {
                self.filter_skips.fetch_add(1, Ordering::Relaxed);
                return Ok(LookupOutcome::NotFound);
            }
        }

        self.remote_lookups.fetch_add(1, Ordering::Relaxed);
        let retries = self.gateway.options().max_transport_retries;
        with_retries(retries, &format!("lookup in {}", file.number), || {
            self.gateway.invoke_point_lookup(user_key, file)
        })
    }

    /// Looks `user_key` up across the remote tier, searching only objects whose
    /// key range may hold it. Remote objects do not overlap, so the first
    /// definite answer wins.
    pub fn lookup(&self, user_key: &[u8], files: &[RemoteFile]) -> Result<LookupOutcome> {
        for file in files.iter().filter(|f| may_hold(f, user_key)) {
            match self.get(user_key, file)? {
                LookupOutcome::NotFound => continue,
                outcome => return Ok(outcome),
            }
        }
        Ok(LookupOutcome::NotFound)
    }

    /// Drops the cached filter of a deleted object.
    pub fn evict(&self, number: u64) {
        self.filters.lock().remove(number);
    }

    /// Whether the filter of `number` is cached.
    pub fn is_filter_cached(&self, number: u64) -> bool {
        self.filters.lock().entries.contains_key(&number)
    }

    /// Encoded bytes of the filters currently cached.
    pub fn filter_cache_size(&self) -> usize {
        self.filters.lock().size
    }

    /// Lookups answered by a filter without a remote call.
    pub fn filter_skips(&self) -> u64 {
        self.filter_skips.load(Ordering::Relaxed)
    }

    /// Remote lookup invocations issued.
    pub fn remote_lookups(&self) -> u64 {
        self.remote_lookups.load(Ordering::Relaxed)
    }

    fn filter(&self, number: u64) -> Option<Arc<BloomFilter>> {
        if let Some(filter) = self.filters.lock().get(number) {
            return Some(filter);
        }

        let blob = match self.gateway.fetch_bloom_filter(number) {
            Ok(blob) => blob,
            Err(e) => {
                log::debug!("No filter for {}, reading directly: {}", number, e);
                return None;
            }
        };
        match BloomFilter::decode(&blob) {
            Ok(filter) => {
                let filter = Arc::new(filter);
                self.filters.lock().insert(number, Arc::clone(&filter), blob.len());
                Some(filter)
            }
            Err(e) => {
                log::warn!("Ignoring unreadable filter for {}: {}", number, e);
                None
            }
        }
    }
}

/// Whether `file`'s key range may contain `user_key`. Bounds that are not
/// internal keys never exclude a file.
fn may_hold(file: &RemoteFile, user_key: &[u8]) -> bool {
    let above_smallest = file.smallest.user_key().map_or(true, |s| s <= user_key);
    let below_largest = file.largest.user_key().map_or(true, |l| user_key <= l);
    above_smallest && below_largest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{ComputeInvoker, MemoryObjectStore};
    use crate::config::CloudOptions;
    use crate::key::{EncodedKey, InternalKey, ValueType};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Answers every lookup with a hit and counts calls.
    #[derive(Default)]
    struct AlwaysFound(AtomicUsize);

    impl ComputeInvoker for AlwaysFound {
        fn invoke(&self, _function: &str, _payload: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(br#"{"status":0,"value":"dg=="}"#.to_vec())
        }
    }

    fn remote(number: u64, smallest: &str, largest: &str) -> RemoteFile {
        RemoteFile::new(
            number,
            100,
            EncodedKey::from(&InternalKey::new(smallest.as_bytes().to_vec(), 1, ValueType::Value)),
            EncodedKey::from(&InternalKey::new(largest.as_bytes().to_vec(), 1, ValueType::Value)),
        )
    }

    fn reader() -> (CloudReader, MemoryObjectStore, Arc<AlwaysFound>) {
        reader_with(CloudOptions::default())
    }

    fn reader_with(options: CloudOptions) -> (CloudReader, MemoryObjectStore, Arc<AlwaysFound>) {
        let store = MemoryObjectStore::new();
        let invoker = Arc::new(AlwaysFound::default());
        let gateway = CloudManager::new(options, Arc::new(store.clone()), invoker.clone());
        (CloudReader::new(gateway), store, invoker)
    }

    #[test]
    fn test_filter_skips_remote_call() {
        let (reader, _store, invoker) = reader();
        let filter = BloomFilter::build([&b"present"[..]], 10);
        reader.gateway.upload_bloom(1_000_000, &filter.encode()).unwrap();

        let file = remote(1_000_000, "a", "z");
        assert_eq!(reader.get(b"present", &file).unwrap(), LookupOutcome::Found(b"v".to_vec()));
        assert_eq!(invoker.0.load(Ordering::SeqCst), 1);

        assert_eq!(reader.get(b"absent", &file).unwrap(), LookupOutcome::NotFound);
        assert_eq!(invoker.0.load(Ordering::SeqCst), 1);
        assert_eq!(reader.filter_skips(), 1);
    }

    #[test]
    fn test_missing_filter_falls_back() {
        let (reader, _store, invoker) = reader();
        let file = remote(1_000_001, "a", "z");
        assert_eq!(reader.get(b"anything", &file).unwrap(), LookupOutcome::Found(b"v".to_vec()));
        assert_eq!(invoker.0.load(Ordering::SeqCst), 1);
        assert_eq!(reader.filter_skips(), 0);
    }

    #[test]
    fn test_lookup_checks_key_ranges() {
        let (reader, _store, invoker) = reader();
        let files = vec![remote(1_000_000, "a", "f"), remote(1_000_001, "g", "m")];

        assert_eq!(reader.lookup(b"h", &files).unwrap(), LookupOutcome::Found(b"v".to_vec()));
        assert_eq!(invoker.0.load(Ordering::SeqCst), 1);

        assert_eq!(reader.lookup(b"zz", &files).unwrap(), LookupOutcome::NotFound);
        assert_eq!(invoker.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_evict_refetches_filter() {
        let (reader, store, _invoker) = reader();
        let filter = BloomFilter::build([&b"k"[..]], 10);
        reader.gateway.upload_bloom(1_000_002, &filter.encode()).unwrap();
        let file = remote(1_000_002, "a", "z");

        reader.get(b"k", &file).unwrap();
        crate::cloud::ObjectStore::delete(&store, "bloom1000002.ldb").unwrap();
        reader.evict(1_000_002);
        reader.get(b"k", &file).unwrap();
        assert_eq!(reader.remote_lookups(), 2);
    }

    #[test]
    fn test_filter_cache_is_bounded() {
        let blob = BloomFilter::build([&b"k"[..]], 10).encode();
        // Room for two filters
        let (reader, _store, _invoker) = reader_with(CloudOptions::default().filter_cache_bytes(blob.len() * 2));
        for number in [1_000_000, 1_000_001, 1_000_002] {
            reader.gateway.upload_bloom(number, &blob).unwrap();
        }

        reader.get(b"k", &remote(1_000_000, "a", "z")).unwrap();
        reader.get(b"k", &remote(1_000_001, "a", "z")).unwrap();
        // Touch 1_000_000 so 1_000_001 is the least recently used
        reader.get(b"k", &remote(1_000_000, "a", "z")).unwrap();
        reader.get(b"k", &remote(1_000_002, "a", "z")).unwrap();

        assert!(reader.is_filter_cached(1_000_000));
        assert!(!reader.is_filter_cached(1_000_001));
        assert!(reader.is_filter_cached(1_000_002));
        assert_eq!(reader.filter_cache_size(), blob.len() * 2);
    }

    #[test]
    fn test_zero_capacity_disables_filter_cache() {
        let (reader, _store, _invoker) = reader_with(CloudOptions::default().filter_cache_bytes(0));
        let filter = BloomFilter::build([&b"k"[..]], 10);
        reader.gateway.upload_bloom(1_000_003, &filter.encode()).unwrap();

        // The filter is still consulted, just not kept
        assert_eq!(reader.get(b"absent", &remote(1_000_003, "a", "z")).unwrap(), LookupOutcome::NotFound);
        assert_eq!(reader.filter_skips(), 1);
        assert!(!reader.is_filter_cached(1_000_003));
    }
}
