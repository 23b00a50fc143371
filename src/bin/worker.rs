//! cloudtier worker
//!
//! Runs offloaded compactions outside the process that owns the manifest.
//! `merge` executes one job document; `serve-compaction` and `serve-lookup`
//! answer a single invocation read from stdin, the way a remote compute
//! function would.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cloudtier::cloud::{CloudManager, LocalObjectStore};
use cloudtier::compute::{CompactionHandler, LookupHandler};
use cloudtier::table::SortedTableMerger;
use cloudtier::worker::{MergeEngine, Worker};
use cloudtier::CloudOptions;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// cloudtier worker
#[derive(Parser, Debug)]
#[command(name = "cloudtier-worker")]
#[command(about = "Standalone compaction worker for the remote tier")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the compaction job at --job and write the result to --result
    Merge {
        /// Job document
        #[arg(long)]
        job: PathBuf,

        /// Where to write the result document
        #[arg(long)]
        result: PathBuf,

        /// Directory holding the job's local inputs
        #[arg(long)]
        local_dir: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Answer one compaction invocation read from stdin
    ServeCompaction {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Answer one point-lookup invocation read from stdin
    ServeLookup {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Root of the directory-backed object store
    #[arg(long)]
    store_dir: PathBuf,

    /// Object store region
    #[arg(long, env = "CLOUDTIER_REGION", default_value = "us-east-1")]
    region: String,

    /// Object store bucket
    #[arg(long, env = "CLOUDTIER_BUCKET", default_value = "cloudtier")]
    bucket: String,

    /// Parent directory of the private scratch tier
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Target size of each output file in bytes
    #[arg(long, default_value = "2097152")]
    target_file_size: u64,

    /// Bloom filter bits per key, 0 disables filters
    #[arg(long, default_value = "10")]
    bloom_bits_per_key: usize,
}

impl CommonArgs {
    fn options(&self) -> CloudOptions {
        let mut options = CloudOptions::new()
            .location(&self.region, &self.bucket)
            .target_file_size(self.target_file_size);
        options.bloom_bits_per_key = self.bloom_bits_per_key;
        if let Some(dir) = &self.scratch_dir {
            options = options.scratch_dir(dir);
        }
        options
    }

    fn open(&self) -> anyhow::Result<(CloudManager, Arc<dyn MergeEngine>)> {
        let options = self.options();
        options.validate()?;
        let store = LocalObjectStore::for_bucket(&self.store_dir, &options.region, &options.bucket)
            .with_context(|| format!("cannot open object store at {}", self.store_dir.display()))?;
        let engine: Arc<dyn MergeEngine> =
            Arc::new(SortedTableMerger::new(options.target_file_size, options.bloom_bits_per_key));
        Ok((CloudManager::storage_only(options, Arc::new(store)), engine))
    }
}

fn read_stdin() -> anyhow::Result<Vec<u8>> {
    let mut event = Vec::new();
    std::io::stdin().read_to_end(&mut event).context("cannot read invocation from stdin")?;
    Ok(event)
}

fn write_stdout(body: &[u8]) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(body)?;
    stdout.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Merge { job, result, local_dir, common } => {
            let (gateway, engine) = common.open()?;
            let mut worker = Worker::new(gateway, engine, local_dir);
            let outcome = worker
                .run_job_file(&job, &result)
                .with_context(|| format!("job {} failed", job.display()))?;
            let timings = worker.timings();
            log::info!(
                "Produced {} remote files (download {:?}, merge {:?}, upload {:?})",
                outcome.new_remote_files.len(),
                timings.download,
                timings.merge,
                timings.upload
            );
        }
        Commands::ServeCompaction { common } => {
            let (gateway, engine) = common.open()?;
            let body = CompactionHandler::new(gateway, engine).handle(&read_stdin()?)?;
            write_stdout(&body)?;
        }
        Commands::ServeLookup { common } => {
            let (gateway, engine) = common.open()?;
            let body = LookupHandler::new(gateway, engine).handle(&read_stdin()?)?;
            write_stdout(&body)?;
        }
    }
    Ok(())
}
