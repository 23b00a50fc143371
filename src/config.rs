//! Configuration options for the cloud tier.

use std::path::PathBuf;
use std::time::Duration;

/// Number of LSM levels a manifest may reference.
pub const DEFAULT_NUM_LEVELS: u32 = 7;

/// Configuration of the local engine the cloud tier extends.
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of levels. Level indices in manifest records must be below this.
    /// Default: 7 (Level 0 through Level 6)
    pub num_levels: u32,

    /// Name of the key comparator recorded in the manifest.
    /// Default: "leveldb.InternalKeyComparator"
    pub comparator_name: String,

    /// Sync the manifest log after every append.
    /// Default: true
    pub sync_manifest: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            num_levels: DEFAULT_NUM_LEVELS,
            comparator_name: "leveldb.InternalKeyComparator".to_string(),
            sync_manifest: true,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of levels.
    pub fn num_levels(mut self, levels: u32) -> Self {
        self.num_levels = levels;
        self
    }

    /// Sets whether every manifest append is synced.
    pub fn sync_manifest(mut self, value: bool) -> Self {
        self.sync_manifest = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_levels == 0 {
            return Err(crate::Error::invalid_argument("num_levels must be > 0"));
        }
        if self.comparator_name.is_empty() {
            return Err(crate::Error::invalid_argument("comparator_name must not be empty"));
        }
        Ok(())
    }
}

/// Configuration of the remote tier: object store, compute functions, retry policy.
#[derive(Debug, Clone)]
pub struct CloudOptions {
    /// Region of the object store and compute endpoint.
    pub region: String,

    /// Bucket holding remote-tier objects.
    pub bucket: String,

    /// Name of the remote compaction function.
    /// Default: "leveldb_compact"
    pub compaction_function: String,

    /// Name of the remote point-lookup function.
    /// Default: "leveldb_get"
    pub lookup_function: String,

    /// Upper bound on a single remote invocation.
    /// Default: 5 minutes
    pub invoke_timeout: Duration,

    /// Number of times a failed transport call is re-issued before giving up.
    /// Default: 3
    pub max_transport_retries: u32,

    /// Bytes of local data at the offload level required before a job is offloaded.
    /// Default: 64MB
    pub offload_threshold_bytes: u64,

    /// Target size of each file produced by a remote compaction.
    /// Default: 2MB
    pub target_file_size: u64,

    /// Bits per key of the bloom filter uploaded next to each remote file.
    /// 0 uploads no filters.
    /// Default: 10
    pub bloom_bits_per_key: usize,

    /// Bytes of decoded bloom filters a reader keeps cached.
    /// Set to 0 to disable the cache.
    /// Default: 8MB
    pub filter_cache_bytes: usize,

    /// Parent directory of private scratch tiers. `None` uses the system temp dir.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for CloudOptions {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            bucket: "cloudtier".to_string(),
            compaction_function: "leveldb_compact".to_string(),
            lookup_function: "leveldb_get".to_string(),
            invoke_timeout: Duration::from_secs(5 * 60),
            max_transport_retries: 3,
            offload_threshold_bytes: 64 * 1024 * 1024, // 64MB
            target_file_size: 2 * 1024 * 1024,         // 2MB
            bloom_bits_per_key: 10,
            filter_cache_bytes: 8 * 1024 * 1024, // 8MB
            scratch_dir: None,
        }
    }
}

impl CloudOptions {
    /// Creates a new CloudOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets region and bucket.
    pub fn location(mut self, region: impl Into<String>, bucket: impl Into<String>) -> Self {
        self.region = region.into();
        self.bucket = bucket.into();
        self
    }

    /// Sets the invocation timeout.
    pub fn invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    /// Sets the bounded retry count for transport calls.
    pub fn max_transport_retries(mut self, retries: u32) -> Self {
        self.max_transport_retries = retries;
        self
    }

    /// Sets the offload threshold.
    pub fn offload_threshold_bytes(mut self, bytes: u64) -> Self {
        self.offload_threshold_bytes = bytes;
        self
    }

    /// Sets the target output file size.
    pub fn target_file_size(mut self, bytes: u64) -> Self {
        self.target_file_size = bytes;
        self
    }

    /// Sets the bloom filter density; 0 disables filters.
    pub fn bloom_bits_per_key(mut self, bits: usize) -> Self {
        self.bloom_bits_per_key = bits;
        self
    }

    /// Sets the reader's filter cache capacity in bytes.
    pub fn filter_cache_bytes(mut self, bytes: usize) -> Self {
        self.filter_cache_bytes = bytes;
        self
    }

    /// Sets the parent directory for scratch tiers.
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.bucket.is_empty() {
            return Err(crate::Error::invalid_argument("bucket must not be empty"));
        }
        if self.invoke_timeout.is_zero() {
            return Err(crate::Error::invalid_argument("invoke_timeout must be > 0"));
        }
        if self.target_file_size == 0 {
            return Err(crate::Error::invalid_argument("target_file_size must be > 0"));
        }
        Ok(())
    }
}
