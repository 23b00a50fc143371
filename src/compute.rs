//! Bodies of the remote compute functions.
//!
//! The compaction function receives `{"data": "<job document>"}`, runs the
//! job in a fresh private tier with every input fetched from the object
//! store, and replies with the result document plus phase timings. The
//! lookup function receives a lookup request and replies with a lookup
//! response.

use crate::cloud::CloudManager;
use crate::error::{Error, Result};
use crate::filename::table_file_path;
use crate::retry::with_retries;
use crate::transfer::{
    decode_job, encode_result, CompactionResponse, InvocationEnvelope, LookupRequest,
    LookupResponse,
};
use crate::worker::{scratch_tier, MergeEngine, Worker};
use std::path::PathBuf;
use std::sync::Arc;

/// Handles one compaction invocation.
#[derive(Clone)]
pub struct CompactionHandler {
    gateway: CloudManager,
    engine: Arc<dyn MergeEngine>,
}

impl CompactionHandler {
    /// Creates a handler.
    pub fn new(gateway: CloudManager, engine: Arc<dyn MergeEngine>) -> Self {
        Self { gateway, engine }
    }

    /// Runs the job carried by `event` and returns the response body.
    pub fn handle(&self, event: &[u8]) -> Result<Vec<u8>> {
        let envelope: InvocationEnvelope = serde_json::from_slice(event)?;
        let job = decode_job(&envelope.data)?;
        log::debug!("Compaction event: {}", envelope.data);

        // Every input, local tier included, comes from the object store.
        let mut worker = Worker::new(self.gateway.clone(), Arc::clone(&self.engine), PathBuf::new())
            .fetch_local_inputs(true);
        let result = worker.run(&job)?;
        let timings = worker.timings();

        let response = CompactionResponse {
            data: encode_result(&result),
            download_time: timings.download.as_secs_f64(),
            merge_time: timings.merge.as_secs_f64(),
            upload_time: timings.upload.as_secs_f64(),
        };
        Ok(serde_json::to_vec(&response)?)
    }
}

/// Handles one point-lookup invocation.
#[derive(Clone)]
pub struct LookupHandler {
    gateway: CloudManager,
    engine: Arc<dyn MergeEngine>,
}

impl LookupHandler {
    /// Creates a handler.
    pub fn new(gateway: CloudManager, engine: Arc<dyn MergeEngine>) -> Self {
        Self { gateway, engine }
    }

    /// Answers the lookup carried by `event`.
    ///
    /// A table that cannot be read is reported in-band as corrupt; failing to
    /// fetch the table is an error of the invocation itself.
    pub fn handle(&self, event: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(event)
            .map_err(|e| Error::corruption(format!("lookup request is not UTF-8: {}", e)))?;
        let request = LookupRequest::decode(text)?;

        let scratch = scratch_tier(self.gateway.options(), "cloudtier-lookup-")?;
        let retries = self.gateway.options().max_transport_retries;
        with_retries(retries, &format!("download {}", request.number), || {
            self.gateway.download(request.number, scratch.path())
        })?;

        let table = table_file_path(scratch.path(), request.number)?;
        let response = match self.engine.point_lookup(&table, &request.user_key) {
            Ok(outcome) => LookupResponse::new(outcome).to_transfer(),
            Err(e) => {
                log::warn!("Lookup in {} failed: {}", request.number, e);
                LookupResponse::corrupt()
            }
        };
        Ok(response.to_string().into_bytes())
    }
}
