//! Offloaded compaction.
//!
//! The coordinator moves data from the last local level into the remote tier:
//!
//! 1. Ask the [`OffloadPolicy`] whether enough work is pending (picker.rs)
//! 2. Select inputs with the [`InputSelector`] and take references on them
//! 3. Hand the job to a [`CompactionExecutor`] (executor.rs) with the
//!    manifest unlocked
//! 4. Validate the result and fold it into one version edit
//! 5. Release references and delete obsolete files
//!
//! A failed execution leaves the file set untouched. It may still be
//! running somewhere, so the remote numbers it was handed are retired by
//! advancing the next remote number past them before any later job starts.
//! Retryable failures are retried with a fresh selection, since the file set
//! may have moved on.

pub mod executor;
pub mod picker;

pub use executor::{
    CompactionExecutor, InProcessWorkerExecutor, ProcessWorkerExecutor, RemoteExecutor,
};
pub use picker::{
    InputSelector, OffloadPolicy, OverlapSelector, PendingCloudWork, Selection,
    SizeThresholdPolicy,
};

use crate::cloud::{CloudManager, CloudReader};
use crate::error::{Error, Result};
use crate::filename::{require_tier, table_file_path, Tier};
use crate::key::KeyComparator;
use crate::manifest::{VersionEdit, VersionSet};
use crate::retry::backoff_delay;
use crate::transfer::{CompactionJob, CompactionResult};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

/// Summary of one committed offloaded compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Local input files removed
    pub local_inputs: usize,
    /// Remote input objects removed
    pub remote_inputs: usize,
    /// Remote objects added
    pub outputs: usize,
    /// Total input bytes
    pub input_bytes: u64,
    /// Total output bytes
    pub output_bytes: u64,
    /// Executions attempted, including the successful one
    pub attempts: u32,
}

/// Drives offloaded compactions against a shared version set.
pub struct CloudCompactor {
    versions: Arc<Mutex<VersionSet>>,
    gateway: CloudManager,
    executor: Box<dyn CompactionExecutor>,
    policy: Box<dyn OffloadPolicy>,
    selector: Box<dyn InputSelector>,
    /// Reader whose cached filters are dropped with their objects
    reader: Option<Arc<CloudReader>>,
    /// One offloaded compaction at a time
    run_lock: Mutex<()>,
}

impl CloudCompactor {
    /// Creates a coordinator with the size-threshold policy and the overlap
    /// selector.
    pub fn new(
        versions: Arc<Mutex<VersionSet>>,
        gateway: CloudManager,
        executor: Box<dyn CompactionExecutor>,
    ) -> Self {
        let threshold = gateway.options().offload_threshold_bytes;
        Self {
            versions,
            gateway,
            executor,
            policy: Box::new(SizeThresholdPolicy::new(threshold)),
            selector: Box::new(OverlapSelector),
            reader: None,
            run_lock: Mutex::new(()),
        }
    }

    /// Replaces the offload policy.
    pub fn with_policy(mut self, policy: impl OffloadPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Replaces the input selector.
    pub fn with_selector(mut self, selector: impl InputSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Evicts filters of deleted remote objects from `reader`.
    pub fn with_reader(mut self, reader: Arc<CloudReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Work currently waiting for the remote tier.
    pub fn pending_work(&self) -> PendingCloudWork {
        let versions = self.versions.lock();
        PendingCloudWork::measure(versions.current(), versions.cloud_compact_pointer())
    }

    /// Compacts into the remote tier if the policy asks for it.
    pub fn maybe_offload(&self) -> Result<Option<CompactionStats>> {
        let work = self.pending_work();
        if !self.policy.should_offload(&work) {
            log::debug!(
                "No offload: level {} holds {} bytes in {} files",
                work.offload_level,
                work.offload_level_bytes,
                work.offload_level_files
            );
            return Ok(None);
        }
        self.compact()
    }

    /// Runs one offloaded compaction. Returns `None` when no input is
    /// eligible.
    pub fn compact(&self) -> Result<Option<CompactionStats>> {
        let _running = self.run_lock.lock();
        let max_attempts = self.gateway.options().max_transport_retries + 1;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let (selection, job) = match self.prepare()? {
                Some(prepared) => prepared,
                None => return Ok(None),
            };

            log::info!(
                "Offloading compaction via {}: {} local + {} remote inputs, {} bytes (attempt {})",
                self.executor.name(),
                job.local_inputs.len(),
                job.remote_inputs.len(),
                job.input_bytes(),
                attempt
            );

            match self.executor.execute(&job) {
                Ok(result) => {
                    let mut stats = self.commit(&selection, &job, &result)?;
                    stats.attempts = attempt;
                    log::info!(
                        "Offloaded compaction done: {} inputs -> {} remote objects, {} -> {} bytes",
                        job.num_inputs(),
                        stats.outputs,
                        stats.input_bytes,
                        stats.output_bytes
                    );
                    return Ok(Some(stats));
                }
                Err(e) => {
                    self.release(&selection);
                    if let Err(retire) = self.retire_numbers(&job) {
                        log::warn!("Offloaded compaction attempt {} failed: {}", attempt, e);
                        return Err(retire);
                    }
                    if e.is_retryable() && attempt < max_attempts {
                        let delay = backoff_delay(attempt);
                        log::warn!(
                            "Offloaded compaction attempt {} failed, retrying in {:?}: {}",
                            attempt,
                            delay,
                            e
                        );
                        thread::sleep(delay);
                        continue;
                    }
                    log::warn!("Offloaded compaction failed after {} attempts: {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    /// Selects inputs, pins them and builds the job.
    fn prepare(&self) -> Result<Option<(Selection, CompactionJob)>> {
        let mut versions = self.versions.lock();
        let work = PendingCloudWork::measure(versions.current(), versions.cloud_compact_pointer());
        let cmp = versions.comparator();
        let selection = match self.selector.select(versions.current(), cmp.as_ref(), &work) {
            Some(selection) => selection,
            None => return Ok(None),
        };

        let mut pinned = Vec::new();
        for number in selection.numbers() {
            if let Err(e) = versions.acquire(number) {
                for &n in &pinned {
                    versions.release(n);
                }
                return Err(e);
            }
            pinned.push(number);
        }

        let job = CompactionJob::new(&selection.local, &selection.remote, versions.next_remote_number());
        Ok(Some((selection, job)))
    }

    fn release(&self, selection: &Selection) {
        let mut versions = self.versions.lock();
        for number in selection.numbers() {
            versions.release(number);
        }
    }

    /// Advances the next remote number past every object `job` could still
    /// write, and makes that durable before another job is built.
    fn retire_numbers(&self, job: &CompactionJob) -> Result<()> {
        let span = output_reservation(job, self.gateway.options().target_file_size);
        let next = job.next_object_number.saturating_add(span);

        let mut versions = self.versions.lock();
        if next <= versions.next_remote_number() {
            return Ok(());
        }
        let mut edit = VersionEdit::new();
        edit.set_next_remote_number(next);
        versions.log_and_apply(edit)?;
        log::info!("Retired remote numbers {}..{} of a failed job", job.next_object_number, next);
        Ok(())
    }

    /// Validates `result` and appends the edit that installs it.
    fn commit(&self, selection: &Selection, job: &CompactionJob, result: &CompactionResult) -> Result<CompactionStats> {
        let obsolete = {
            let mut versions = self.versions.lock();
            let cmp = versions.comparator();

            let checked = check_result(job, result, cmp.as_ref()).and_then(|()| {
                let current = versions.current();
                let live = selection.local.iter().all(|f| current.find_local(f.number).is_some())
                    && selection.remote.iter().all(|f| current.find_remote(f.number).is_some());
                if live {
                    Ok(())
                } else {
                    Err(Error::invalid_state("compaction inputs changed while the job ran"))
                }
            });
            if let Err(e) = checked {
                for number in selection.numbers() {
                    versions.release(number);
                }
                drop(versions);
                self.discard_outputs(job, result);
                return Err(e);
            }

            let mut edit = VersionEdit::new();
            for file in &selection.local {
                edit.delete_file(selection.level, file.number);
            }
            for file in &selection.remote {
                edit.delete_remote_file(file.number);
            }
            for file in &result.new_remote_files {
                edit.add_remote_file(file.clone());
            }
            let next = result
                .max_number()
                .map_or(job.next_object_number, |n| n + 1)
                .max(versions.next_remote_number());
            edit.set_next_remote_number(next);
            if let Some(key) = selection.largest_key(cmp.as_ref()) {
                edit.set_cloud_compact_pointer(key);
            }

            let applied = versions.log_and_apply(edit);
            // References go only after the edit is durable.
            for number in selection.numbers() {
                versions.release(number);
            }
            if let Err(e) = applied {
                drop(versions);
                self.discard_outputs(job, result);
                return Err(e);
            }
            versions.take_obsolete_files()
        };

        self.delete_obsolete(&obsolete);

        Ok(CompactionStats {
            local_inputs: selection.local.len(),
            remote_inputs: selection.remote.len(),
            outputs: result.new_remote_files.len(),
            input_bytes: job.input_bytes(),
            output_bytes: result.new_remote_files.iter().map(|f| f.file_size).sum(),
            attempts: 0,
        })
    }

    /// Deletes uploaded outputs that will never be committed. Only numbers
    /// reserved for this job are touched.
    fn discard_outputs(&self, job: &CompactionJob, result: &CompactionResult) {
        for file in &result.new_remote_files {
            if file.number < job.next_object_number || require_tier(file.number, Tier::Remote).is_err() {
                continue;
            }
            if let Err(e) = self.gateway.delete_object(file.number) {
                log::warn!("Failed to discard uncommitted object {}: {}", file.number, e);
            }
        }
    }

    fn delete_obsolete(&self, numbers: &[u64]) {
        let dir = self.versions.lock().dir().to_path_buf();
        for &number in numbers {
            let deleted = match Tier::of(number) {
                Tier::Local => table_file_path(&dir, number).and_then(|path| {
                    match std::fs::remove_file(path) {
                        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                        _ => Ok(()),
                    }
                }),
                Tier::Remote => {
                    if let Some(reader) = &self.reader {
                        reader.evict(number);
                    }
                    self.gateway.delete_object(number)
                }
            };
            match deleted {
                Ok(()) => log::debug!("Deleted obsolete file {}", number),
                Err(e) => log::warn!("Failed to delete obsolete file {}: {}", number, e),
            }
        }
    }
}

/// Upper bound on the objects one job can produce. Every output but the last
/// holds at least `target_file_size` bytes of input.
fn output_reservation(job: &CompactionJob, target_file_size: u64) -> u64 {
    job.input_bytes() / target_file_size.max(1) + job.num_inputs() as u64 + 1
}

/// Checks the compute side's answer before it can reach the manifest.
fn check_result(job: &CompactionJob, result: &CompactionResult, cmp: &dyn KeyComparator) -> Result<()> {
    let mut seen = HashSet::new();
    for file in &result.new_remote_files {
        require_tier(file.number, Tier::Remote)
            .map_err(|_| Error::corruption(format!("result names non-remote file {}", file.number)))?;
        if file.number < job.next_object_number {
            return Err(Error::corruption(format!(
                "result object {} is below the job's next object number {}",
                file.number, job.next_object_number
            )));
        }
        if !seen.insert(file.number) {
            return Err(Error::corruption(format!("result names object {} twice", file.number)));
        }
        if cmp.compare(file.smallest.as_bytes(), file.largest.as_bytes()) == Ordering::Greater {
            return Err(Error::corruption(format!("result object {} has inverted key range", file.number)));
        }
    }
    Ok(())
}
