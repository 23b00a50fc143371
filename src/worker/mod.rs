//! Standalone compaction worker.
//!
//! A worker executes one [`CompactionJob`] against a private local tier and
//! reports the produced remote files. It never touches the manifest: the
//! coordinator that handed out the job is the only party that folds the
//! result into a version edit.
//!
//! ```text
//! AwaitJob ──> FetchInputs ──> RunLocalMerge ──> Emit ──> Done
//! ```
//!
//! - `AwaitJob`: read the job document
//! - `FetchInputs`: download remote inputs (and, on the compute side, local
//!   inputs) into the private tier
//! - `RunLocalMerge`: run the merge engine over all inputs
//! - `Emit`: upload outputs and their filters, write the result document

use crate::cloud::CloudManager;
use crate::config::CloudOptions;
use crate::error::{Error, Result};
use crate::filename::{object_name, table_file_path, Tier};
use crate::manifest::RemoteFile;
use crate::retry::with_retries;
use crate::transfer::{decode_job, encode_result, CompactionJob, CompactionResult, LookupOutcome};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One input table handed to a merge engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeInput {
    /// File number of the input
    pub number: u64,
    /// Where the table is resident
    pub path: PathBuf,
}

/// One table produced by a merge engine.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    /// Descriptor of the produced remote file
    pub file: RemoteFile,
    /// Where the table was written
    pub path: PathBuf,
    /// Encoded bloom filter over the table's user keys
    pub bloom: Option<Vec<u8>>,
}

/// The LSM merge entry point: run a compaction over these inputs, produce
/// these outputs.
pub trait MergeEngine: Send + Sync {
    /// Merges `inputs` into tables written under `output_dir`, numbered
    /// consecutively from `first_number`.
    fn merge(&self, inputs: &[MergeInput], output_dir: &Path, first_number: u64) -> Result<Vec<MergeOutput>>;

    /// Looks up the newest entry for `user_key` in one table.
    fn point_lookup(&self, table: &Path, user_key: &[u8]) -> Result<LookupOutcome>;
}

/// Progress of a worker through one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a job document
    AwaitJob,
    /// Downloading inputs
    FetchInputs,
    /// Merging
    RunLocalMerge,
    /// Uploading outputs
    Emit,
    /// Finished the job
    Done,
}

/// Time spent in each phase of the last job.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkerTimings {
    /// Fetching inputs
    pub download: Duration,
    /// Merging
    pub merge: Duration,
    /// Uploading outputs
    pub upload: Duration,
}

/// Executes compaction jobs against a private local tier.
pub struct Worker {
    gateway: CloudManager,
    engine: Arc<dyn MergeEngine>,
    local_dir: PathBuf,
    fetch_local_inputs: bool,
    state: WorkerState,
    timings: WorkerTimings,
}

impl Worker {
    /// Creates a worker that finds local inputs resident in `local_dir`.
    pub fn new(gateway: CloudManager, engine: Arc<dyn MergeEngine>, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            engine,
            local_dir: local_dir.into(),
            fetch_local_inputs: false,
            state: WorkerState::AwaitJob,
            timings: WorkerTimings::default(),
        }
    }

    /// Also download local inputs from the object store instead of reading
    /// them from the local directory.
    pub fn fetch_local_inputs(mut self, value: bool) -> Self {
        self.fetch_local_inputs = value;
        self
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Phase timings of the last job.
    pub fn timings(&self) -> WorkerTimings {
        self.timings
    }

    /// Reads the job at `job_path`, runs it and writes the result document
    /// to `result_path`.
    pub fn run_job_file(&mut self, job_path: &Path, result_path: &Path) -> Result<CompactionResult> {
        self.state = WorkerState::AwaitJob;
        let text = fs::read_to_string(job_path)?;
        let job = decode_job(&text)?;
        log::info!("Loaded job from {}", job_path.display());

        let result = self.run(&job)?;

        let mut tmp = result_path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, encode_result(&result))?;
        fs::rename(&tmp, result_path)?;
        log::info!("Wrote result to {}", result_path.display());
        Ok(result)
    }

    /// Runs one job to completion.
    pub fn run(&mut self, job: &CompactionJob) -> Result<CompactionResult> {
        self.timings = WorkerTimings::default();
        let scratch = scratch_tier(self.gateway.options(), "cloudtier-job-")?;
        let input_dir = scratch.path().join("inputs");
        let output_dir = scratch.path().join("outputs");
        fs::create_dir_all(&input_dir)?;
        fs::create_dir_all(&output_dir)?;

        self.state = WorkerState::FetchInputs;
        let started = Instant::now();
        let inputs = self.fetch_inputs(job, &input_dir)?;
        self.timings.download = started.elapsed();

        self.state = WorkerState::RunLocalMerge;
        let started = Instant::now();
        let outputs = self.engine.merge(&inputs, &output_dir, job.next_object_number)?;
        self.timings.merge = started.elapsed();
        check_outputs(job, &outputs)?;

        self.state = WorkerState::Emit;
        let started = Instant::now();
        let result = self.emit(outputs, &output_dir)?;
        self.timings.upload = started.elapsed();

        self.state = WorkerState::Done;
        log::info!(
            "Job done: {} inputs -> {} outputs (download {:?}, merge {:?}, upload {:?})",
            inputs.len(),
            result.new_remote_files.len(),
            self.timings.download,
            self.timings.merge,
            self.timings.upload
        );
        Ok(result)
    }

    fn fetch_inputs(&self, job: &CompactionJob, input_dir: &Path) -> Result<Vec<MergeInput>> {
        let retries = self.gateway.options().max_transport_retries;
        let mut inputs = Vec::with_capacity(job.num_inputs());

        for file in &job.local_inputs {
            let path = if self.fetch_local_inputs {
                self.fetch(file.number, input_dir, retries)?
            } else {
                let path = table_file_path(&self.local_dir, file.number)?;
                if !path.is_file() {
                    return Err(Error::not_found(format!("local input {}", path.display())));
                }
                path
            };
            inputs.push(MergeInput { number: file.number, path });
        }
        for file in &job.remote_inputs {
            let path = self.fetch(file.number, input_dir, retries)?;
            inputs.push(MergeInput { number: file.number, path });
        }
        Ok(inputs)
    }

    fn fetch(&self, number: u64, dir: &Path, retries: u32) -> Result<PathBuf> {
        let what = format!("download {}", number);
        with_retries(retries, &what, || self.gateway.download(number, dir))?;
        Ok(dir.join(object_name(number)?))
    }

    fn emit(&self, outputs: Vec<MergeOutput>, output_dir: &Path) -> Result<CompactionResult> {
        let retries = self.gateway.options().max_transport_retries;
        let mut new_remote_files = Vec::with_capacity(outputs.len());

        for output in outputs {
            let number = output.file.number;
            let base = output.path.parent().unwrap_or(output_dir);
            with_retries(retries, &format!("upload {}", number), || self.gateway.upload(number, base))?;
            if let Some(bloom) = &output.bloom {
                with_retries(retries, &format!("upload filter {}", number), || {
                    self.gateway.upload_bloom(number, bloom)
                })?;
            }
            new_remote_files.push(output.file);
        }
        Ok(CompactionResult { new_remote_files })
    }
}

/// Creates a private directory under `options.scratch_dir`, or under the
/// system temp dir when none is set. Removed when dropped.
pub(crate) fn scratch_tier(options: &CloudOptions, prefix: &str) -> Result<tempfile::TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    let dir = match &options.scratch_dir {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            builder.tempdir_in(parent)?
        }
        None => builder.tempdir()?,
    };
    Ok(dir)
}

/// Rejects outputs a merge engine should never produce.
fn check_outputs(job: &CompactionJob, outputs: &[MergeOutput]) -> Result<()> {
    for output in outputs {
        let number = output.file.number;
        if Tier::of(number) != Tier::Remote || number < job.next_object_number {
            return Err(Error::internal(format!(
                "merge produced file {} outside the assigned range starting at {}",
                number, job.next_object_number
            )));
        }
    }
    Ok(())
}
