//! Execution paths of an offloaded compaction.
//!
//! Every executor takes a job and returns the produced remote files, or an
//! error that leaves nothing for the coordinator to commit.

use crate::cloud::invoker::run_with_deadline;
use crate::cloud::CloudManager;
use crate::error::{Error, Result};
use crate::retry::with_retries;
use crate::transfer::{decode_result, encode_job, CompactionJob, CompactionResult};
use crate::worker::{MergeEngine, Worker};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Job document written for a worker process, relative to its work directory.
pub const JOB_FILE: &str = "compaction_job.json";

/// Result document a worker process writes back.
pub const RESULT_FILE: &str = "compaction_result.json";

/// Runs a compaction job somewhere and reports its result.
pub trait CompactionExecutor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Executes `job`. Must not touch the manifest.
    fn execute(&self, job: &CompactionJob) -> Result<CompactionResult>;
}

/// Ships local inputs to the object store and invokes the remote function.
pub struct RemoteExecutor {
    gateway: CloudManager,
    local_dir: PathBuf,
}

impl RemoteExecutor {
    /// Creates an executor reading local inputs from `local_dir`.
    pub fn new(gateway: CloudManager, local_dir: impl Into<PathBuf>) -> Self {
        Self { gateway, local_dir: local_dir.into() }
    }

    fn remove_staged(&self, numbers: &[u64]) {
        for &number in numbers {
            if let Err(e) = self.gateway.delete_object(number) {
                log::warn!("Failed to remove staged input {}: {}", number, e);
            }
        }
    }
}

impl CompactionExecutor for RemoteExecutor {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn execute(&self, job: &CompactionJob) -> Result<CompactionResult> {
        let retries = self.gateway.options().max_transport_retries;
        let mut staged = Vec::with_capacity(job.local_inputs.len());

        for file in &job.local_inputs {
            let uploaded = with_retries(retries, &format!("upload {}", file.number), || {
                self.gateway.upload(file.number, &self.local_dir)
            });
            if let Err(e) = uploaded {
                self.remove_staged(&staged);
                return Err(e);
            }
            staged.push(file.number);
        }

        let result = self.gateway.invoke_compaction(job);
        // The staged copies are only needed by the invocation.
        self.remove_staged(&staged);
        result
    }
}

/// Runs the worker state machine inside the current process.
pub struct InProcessWorkerExecutor {
    gateway: CloudManager,
    engine: Arc<dyn MergeEngine>,
    local_dir: PathBuf,
}

impl InProcessWorkerExecutor {
    /// Creates an executor whose local inputs are resident in `local_dir`.
    pub fn new(gateway: CloudManager, engine: Arc<dyn MergeEngine>, local_dir: impl Into<PathBuf>) -> Self {
        Self { gateway, engine, local_dir: local_dir.into() }
    }
}

impl CompactionExecutor for InProcessWorkerExecutor {
    fn name(&self) -> &'static str {
        "in-process worker"
    }

    fn execute(&self, job: &CompactionJob) -> Result<CompactionResult> {
        Worker::new(self.gateway.clone(), Arc::clone(&self.engine), &self.local_dir).run(job)
    }
}

/// Launches `cloudtier-worker merge` as a child process.
///
/// The job is written to `<work_dir>/compaction_job.json`; the worker writes
/// its result to `<work_dir>/compaction_result.json`.
pub struct ProcessWorkerExecutor {
    binary: PathBuf,
    work_dir: PathBuf,
    local_dir: PathBuf,
    store_dir: PathBuf,
    gateway: CloudManager,
}

impl ProcessWorkerExecutor {
    /// Creates an executor running `binary` against the directory-backed
    /// object store at `store_dir`.
    pub fn new(
        binary: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        local_dir: impl Into<PathBuf>,
        store_dir: impl Into<PathBuf>,
        gateway: CloudManager,
    ) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
            local_dir: local_dir.into(),
            store_dir: store_dir.into(),
            gateway,
        }
    }

    fn command(&self, job_path: &Path, result_path: &Path) -> Command {
        let options = self.gateway.options();
        let mut command = Command::new(&self.binary);
        command
            .arg("merge")
            .arg("--job")
            .arg(job_path)
            .arg("--result")
            .arg(result_path)
            .arg("--local-dir")
            .arg(&self.local_dir)
            .arg("--store-dir")
            .arg(&self.store_dir)
            .arg("--region")
            .arg(&options.region)
            .arg("--bucket")
            .arg(&options.bucket)
            .arg("--target-file-size")
            .arg(options.target_file_size.to_string())
            .arg("--bloom-bits-per-key")
            .arg(options.bloom_bits_per_key.to_string());
        if let Some(scratch) = &options.scratch_dir {
            command.arg("--scratch-dir").arg(scratch);
        }
        command
    }
}

impl CompactionExecutor for ProcessWorkerExecutor {
    fn name(&self) -> &'static str {
        "worker process"
    }

    fn execute(&self, job: &CompactionJob) -> Result<CompactionResult> {
        fs::create_dir_all(&self.work_dir)?;
        let job_path = self.work_dir.join(JOB_FILE);
        let result_path = self.work_dir.join(RESULT_FILE);
        match fs::remove_file(&result_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        fs::write(&job_path, encode_job(job))?;

        let command = self.command(&job_path, &result_path);
        let timeout = self.gateway.options().invoke_timeout;
        run_with_deadline("worker", command, &[], timeout)?;

        let text = fs::read_to_string(&result_path)
            .map_err(|e| Error::transport(format!("worker left no result: {}", e)))?;
        decode_result(&text).map_err(|e| Error::transport(format!("malformed worker result: {}", e)))
    }
}
