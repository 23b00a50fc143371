//! Compaction job and result documents.
//!
//! ```text
//! job    = { "local_files": [FileEntry], "cloud_files": [FileEntry], "next_cloud_file_num": u64 }
//! result = [FileEntry]   (remote tier only)
//! ```

use crate::error::{Error, Result};
use crate::filename::{require_tier, Tier};
use crate::manifest::{LocalFile, RemoteFile};
use crate::transfer::{
    as_object, local_file_from_transfer, local_file_to_transfer, remote_file_from_transfer,
    remote_file_to_transfer, required_array, required_u64,
};
use serde_json::{json, Value};

/// Inputs of one offloaded compaction. A value: never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionJob {
    /// Local-tier inputs
    pub local_inputs: Vec<LocalFile>,
    /// Remote-tier inputs
    pub remote_inputs: Vec<RemoteFile>,
    /// First object number the compute side may assign to outputs
    pub next_object_number: u64,
}

impl CompactionJob {
    /// Builds a job from copies of the selected inputs.
    ///
    /// Runtime bookkeeping (reference counts) is not part of the job.
    pub fn new(local_inputs: &[LocalFile], remote_inputs: &[RemoteFile], next_object_number: u64) -> Self {
        let local_inputs = local_inputs
            .iter()
            .map(|f| LocalFile::new(f.number, f.file_size, f.smallest.clone(), f.largest.clone()))
            .collect();
        let remote_inputs = remote_inputs
            .iter()
            .map(|f| RemoteFile::new(f.number, f.file_size, f.smallest.clone(), f.largest.clone()))
            .collect();
        Self { local_inputs, remote_inputs, next_object_number }
    }

    /// Total input bytes.
    pub fn input_bytes(&self) -> u64 {
        self.local_inputs.iter().map(|f| f.file_size).sum::<u64>()
            + self.remote_inputs.iter().map(|f| f.file_size).sum::<u64>()
    }

    /// Number of input files.
    pub fn num_inputs(&self) -> usize {
        self.local_inputs.len() + self.remote_inputs.len()
    }
}

/// Remote files produced by a compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// New remote files, in output order
    pub new_remote_files: Vec<RemoteFile>,
}

impl CompactionResult {
    /// Highest object number in the result.
    pub fn max_number(&self) -> Option<u64> {
        self.new_remote_files.iter().map(|f| f.number).max()
    }
}

/// Builds the transfer form of a job.
pub fn job_to_transfer(job: &CompactionJob) -> Value {
    json!({
        "local_files": job.local_inputs.iter().map(local_file_to_transfer).collect::<Vec<_>>(),
        "cloud_files": job.remote_inputs.iter().map(remote_file_to_transfer).collect::<Vec<_>>(),
        "next_cloud_file_num": job.next_object_number,
    })
}

/// Rebuilds a job from its transfer form.
pub fn job_from_transfer(value: &Value) -> Result<CompactionJob> {
    let object = as_object(value, "job document")?;
    let local_inputs = required_array(object, "local_files")?
        .iter()
        .map(local_file_from_transfer)
        .collect::<Result<Vec<_>>>()?;
    let remote_inputs = required_array(object, "cloud_files")?
        .iter()
        .map(remote_file_from_transfer)
        .collect::<Result<Vec<_>>>()?;
    let next_object_number = required_u64(object, "next_cloud_file_num")?;
    require_tier(next_object_number, Tier::Remote)?;

    Ok(CompactionJob { local_inputs, remote_inputs, next_object_number })
}

/// Builds the transfer form of a result.
pub fn result_to_transfer(result: &CompactionResult) -> Value {
    Value::Array(result.new_remote_files.iter().map(remote_file_to_transfer).collect())
}

/// Rebuilds a result from its transfer form.
pub fn result_from_transfer(value: &Value) -> Result<CompactionResult> {
    let entries = value
        .as_array()
        .ok_or_else(|| Error::corruption("result document is not a JSON array"))?;
    let new_remote_files = entries.iter().map(remote_file_from_transfer).collect::<Result<Vec<_>>>()?;
    Ok(CompactionResult { new_remote_files })
}

/// Serializes a job to document text.
pub fn encode_job(job: &CompactionJob) -> String {
    job_to_transfer(job).to_string()
}

/// Parses job document text.
pub fn decode_job(text: &str) -> Result<CompactionJob> {
    job_from_transfer(&serde_json::from_str(text)?)
}

/// Serializes a result to document text.
pub fn encode_result(result: &CompactionResult) -> String {
    result_to_transfer(result).to_string()
}

/// Parses result document text.
pub fn decode_result(text: &str) -> Result<CompactionResult> {
    result_from_transfer(&serde_json::from_str(text)?)
}
