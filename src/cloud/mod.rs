//! Transport gateway between the local tier and the remote tier.
//!
//! The gateway owns the two transport clients for the lifetime of the
//! process: an [`ObjectStore`] for objects and a [`ComputeInvoker`] for the
//! remote compaction and point-lookup functions. It performs exactly one
//! attempt per call; retry policy belongs to the caller.
//!
//! ## Layout
//!
//! - `store.rs`: directory-backed and in-memory object stores
//! - `invoker.rs`: subprocess and in-process compute invokers
//! - `reader.rs`: remote point lookups behind the bloom side channel

pub mod invoker;
pub mod reader;
pub mod store;

pub use invoker::{HandlerInvoker, ProcessInvoker};
pub use reader::CloudReader;
pub use store::{LocalObjectStore, MemoryObjectStore};

use crate::config::CloudOptions;
use crate::error::{Error, Result};
use crate::filename::{bloom_object_name, object_name, require_tier, Tier};
use crate::manifest::RemoteFile;
use crate::transfer::{
    decode_result, encode_job, CompactionJob, CompactionResponse, CompactionResult,
    InvocationEnvelope, LookupOutcome, LookupRequest, LookupResponse,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Flat key/value object storage.
pub trait ObjectStore: Send + Sync {
    /// Stores `data` under `key`, replacing any previous object.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Fetches the object under `key`. A missing object is `NotFound`.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Removes the object under `key`. Removing a missing object succeeds.
    fn delete(&self, key: &str) -> Result<()>;

    /// Whether an object exists under `key`.
    fn exists(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Uploads the file at `path` under `key`.
    fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let data = fs::read(path)?;
        self.put(key, &data)
    }

    /// Downloads `key` into `path`, replacing the file atomically.
    fn get_to_file(&self, key: &str, path: &Path) -> Result<()> {
        let data = self.get(key)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".download");
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Synchronous request/response invocation of a named remote function.
pub trait ComputeInvoker: Send + Sync {
    /// Invokes `function` with `payload` and returns its response body.
    ///
    /// Exceeding `timeout` is a `Transport` error; the call is not revoked.
    fn invoke(&self, function: &str, payload: &[u8], timeout: Duration) -> Result<Vec<u8>>;
}

/// Invoker for deployments without remote compute.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompute;

impl ComputeInvoker for NoCompute {
    fn invoke(&self, function: &str, _payload: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        Err(Error::transport(format!("no compute endpoint configured for `{}`", function)))
    }
}

/// The transport gateway.
#[derive(Clone)]
pub struct CloudManager {
    options: CloudOptions,
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn ComputeInvoker>,
}

impl CloudManager {
    /// Creates a gateway over the given transports.
    pub fn new(options: CloudOptions, store: Arc<dyn ObjectStore>, invoker: Arc<dyn ComputeInvoker>) -> Self {
        Self { options, store, invoker }
    }

    /// Creates a gateway that can move objects but not invoke functions.
    pub fn storage_only(options: CloudOptions, store: Arc<dyn ObjectStore>) -> Self {
        Self::new(options, store, Arc::new(NoCompute))
    }

    /// Options in force.
    pub fn options(&self) -> &CloudOptions {
        &self.options
    }

    /// The object store client.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Uploads `<local_base>/<object_name(number)>` under its object name.
    pub fn upload(&self, number: u64, local_base: &Path) -> Result<()> {
        let key = object_name(number)?;
        let path = local_base.join(&key);
        self.store
            .put_file(&key, &path)
            .map_err(|e| transport_error("upload", &key, e))?;
        log::info!("Uploaded {} from {}", key, local_base.display());
        Ok(())
    }

    /// Downloads `object_name(number)` into `dest_base`.
    pub fn download(&self, number: u64, dest_base: &Path) -> Result<()> {
        let key = object_name(number)?;
        let path = dest_base.join(&key);
        self.store
            .get_to_file(&key, &path)
            .map_err(|e| transport_error("download", &key, e))?;
        log::info!("Downloaded {} into {}", key, dest_base.display());
        Ok(())
    }

    /// Publishes the bloom filter of a remote object.
    pub fn upload_bloom(&self, number: u64, filter: &[u8]) -> Result<()> {
        let key = bloom_object_name(number)?;
        self.store.put(&key, filter).map_err(|e| transport_error("upload", &key, e))?;
        log::debug!("Uploaded filter {} ({} bytes)", key, filter.len());
        Ok(())
    }

    /// Fetches the bloom filter blob of a remote object. Performs no fallback.
    pub fn fetch_bloom_filter(&self, number: u64) -> Result<Vec<u8>> {
        let key = bloom_object_name(number)?;
        self.store.get(&key).map_err(|e| transport_error("fetch", &key, e))
    }

    /// Deletes an object and, for remote objects, its bloom filter.
    pub fn delete_object(&self, number: u64) -> Result<()> {
        let key = object_name(number)?;
        self.store.delete(&key).map_err(|e| transport_error("delete", &key, e))?;
        if Tier::of(number) == Tier::Remote {
            let bloom = bloom_object_name(number)?;
            self.store.delete(&bloom).map_err(|e| transport_error("delete", &bloom, e))?;
        }
        log::info!("Deleted object {}", key);
        Ok(())
    }

    /// Runs `job` on the remote compaction function.
    ///
    /// A failed invocation or a malformed result document is a `Transport`
    /// error; a partial result is never returned.
    pub fn invoke_compaction(&self, job: &CompactionJob) -> Result<CompactionResult> {
        let document = encode_job(job);
        log::debug!("Compaction job: {}", document);
        let payload = serde_json::to_vec(&InvocationEnvelope { data: document })
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let function = &self.options.compaction_function;
        log::info!(
            "Invoking {} with {} inputs ({} bytes)",
            function,
            job.num_inputs(),
            job.input_bytes()
        );
        let body = self
            .invoker
            .invoke(function, &payload, self.options.invoke_timeout)
            .map_err(|e| transport_error("invoke", function, e))?;

        let result = parse_compaction_response(&body)
            .map_err(|e| Error::transport(format!("malformed compaction result from {}: {}", function, e)))?;
        log::info!("{} returned {} files", function, result.new_remote_files.len());
        Ok(result)
    }

    /// Looks `user_key` up in one remote object through the lookup function.
    ///
    /// Absence of the key is `Ok(LookupOutcome::NotFound)`, not an error.
    pub fn invoke_point_lookup(&self, user_key: &[u8], target: &RemoteFile) -> Result<LookupOutcome> {
        require_tier(target.number, Tier::Remote)?;
        let request = LookupRequest { user_key: user_key.to_vec(), number: target.number };
        let function = &self.options.lookup_function;

        let body = self
            .invoker
            .invoke(function, request.encode().as_bytes(), self.options.invoke_timeout)
            .map_err(|e| transport_error("invoke", function, e))?;
        let text = std::str::from_utf8(&body)
            .map_err(|e| Error::transport(format!("{} returned non-UTF-8 body: {}", function, e)))?;
        let response = LookupResponse::decode(text)
            .map_err(|e| Error::transport(format!("bad lookup response from {}: {}", function, e)))?;
        Ok(response.outcome)
    }
}

fn parse_compaction_response(body: &[u8]) -> Result<CompactionResult> {
    let response: CompactionResponse = serde_json::from_slice(body)?;
    log::info!(
        "Remote compaction timings: download {:.3}s, merge {:.3}s, upload {:.3}s",
        response.download_time,
        response.merge_time,
        response.upload_time
    );
    decode_result(&response.data)
}

fn transport_error(op: &str, key: &str, err: Error) -> Error {
    match err {
        Error::Transport(_) | Error::InvalidArgument(_) => err,
        other => Error::transport(format!("{} {} failed: {}", op, key, other)),
    }
}
