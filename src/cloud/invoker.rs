//! Compute invokers.
//!
//! [`ProcessInvoker`] maps each function name to a command line: the payload
//! is written to the child's stdin and its stdout is the response.
//! [`HandlerInvoker`] dispatches to the compute handlers inside the current
//! process. Both bound the call by the invoke timeout. An expired child
//! process is killed; an expired in-process handler is abandoned.

use crate::cloud::{CloudManager, ComputeInvoker};
use crate::compute::{CompactionHandler, LookupHandler};
use crate::config::CloudOptions;
use crate::error::{Error, Result};
use crate::worker::MergeEngine;
use crossbeam::channel;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How often a running child is checked for exit.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs `f` on a helper thread, giving up after `timeout`.
pub(crate) fn call_with_timeout<F>(function: &str, timeout: Duration, f: F) -> Result<Vec<u8>>
where
    F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
{
    let (tx, rx) = channel::bounded(1);
    thread::Builder::new()
        .name(format!("invoke-{}", function))
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| Error::transport(format!("cannot start invocation of {}: {}", function, e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(channel::RecvTimeoutError::Timeout) => {
            Err(Error::transport(format!("{} timed out after {:?}", function, timeout)))
        }
        Err(channel::RecvTimeoutError::Disconnected) => {
            Err(Error::transport(format!("{} terminated without a response", function)))
        }
    }
}

/// Runs `command` with `input` on its stdin and returns its stdout.
///
/// A child still running after `timeout` is killed and reaped. A non-zero
/// exit is a transport error carrying the last line of stderr.
pub(crate) fn run_with_deadline(function: &str, mut command: Command, input: &[u8], timeout: Duration) -> Result<Vec<u8>> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::transport(format!("cannot spawn {}: {}", function, e)))?;

    // Pipes are serviced on helper threads so a chatty child cannot block
    // on a full pipe while we wait for it.
    if let Some(mut stdin) = child.stdin.take() {
        let payload = input.to_vec();
        thread::spawn(move || {
            // A child that exits without reading its input closes the pipe.
            let _ = stdin.write_all(&payload);
        });
    }
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                kill(&mut child, function);
                return Err(Error::transport(format!("{} timed out after {:?}", function, timeout)));
            }
            Ok(None) => thread::sleep(CHILD_POLL_INTERVAL),
            Err(e) => {
                kill(&mut child, function);
                return Err(Error::transport(format!("{} failed: {}", function, e)));
            }
        }
    };

    let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr);
        let last = stderr.lines().last().unwrap_or("").trim().to_string();
        return Err(Error::transport(format!("{} exited with {}: {}", function, status, last)));
    }
    Ok(stdout)
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn kill(child: &mut Child, function: &str) {
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill {} (pid {}): {}", function, child.id(), e);
    }
    if let Err(e) = child.wait() {
        log::warn!("Failed to reap {} (pid {}): {}", function, child.id(), e);
    }
}

/// Command line registered for one function.
#[derive(Debug, Clone)]
struct FunctionCommand {
    program: OsString,
    args: Vec<OsString>,
}

/// Invokes functions by running a child process per call.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    commands: HashMap<String, FunctionCommand>,
}

impl ProcessInvoker {
    /// Creates an invoker with no registered functions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the command line that implements `function`.
    pub fn register<I, S>(mut self, function: impl Into<String>, program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let command = FunctionCommand {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        };
        self.commands.insert(function.into(), command);
        self
    }

    /// Registers the worker binary's `serve-compaction` and `serve-lookup`
    /// subcommands under the configured function names.
    pub fn for_worker_binary(binary: &Path, store_dir: &Path, options: &CloudOptions) -> Self {
        let common = |subcommand: &str| -> Vec<OsString> {
            vec![
                subcommand.into(),
                "--store-dir".into(),
                store_dir.as_os_str().to_owned(),
                "--region".into(),
                options.region.clone().into(),
                "--bucket".into(),
                options.bucket.clone().into(),
            ]
        };
        Self::new()
            .register(&options.compaction_function, binary, common("serve-compaction"))
            .register(&options.lookup_function, binary, common("serve-lookup"))
    }
}

impl ComputeInvoker for ProcessInvoker {
    fn invoke(&self, function: &str, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let command = self
            .commands
            .get(function)
            .ok_or_else(|| Error::transport(format!("unknown function `{}`", function)))?;
        let mut child = Command::new(&command.program);
        child.args(&command.args);
        run_with_deadline(function, child, payload, timeout)
    }
}

/// Invokes the compute handlers in the current process.
#[derive(Clone)]
pub struct HandlerInvoker {
    compaction_function: String,
    lookup_function: String,
    compaction: Arc<CompactionHandler>,
    lookup: Arc<LookupHandler>,
}

impl HandlerInvoker {
    /// Serves both functions from `gateway`'s object store with `engine`.
    pub fn new(gateway: CloudManager, engine: Arc<dyn MergeEngine>) -> Self {
        let options = gateway.options().clone();
        Self {
            compaction_function: options.compaction_function,
            lookup_function: options.lookup_function,
            compaction: Arc::new(CompactionHandler::new(gateway.clone(), Arc::clone(&engine))),
            lookup: Arc::new(LookupHandler::new(gateway, engine)),
        }
    }
}

impl ComputeInvoker for HandlerInvoker {
    fn invoke(&self, function: &str, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let payload = payload.to_vec();
        if function == self.compaction_function {
            let handler = Arc::clone(&self.compaction);
            call_with_timeout(function, timeout, move || handler.handle(&payload))
        } else if function == self.lookup_function {
            let handler = Arc::clone(&self.lookup);
            call_with_timeout(function, timeout, move || handler.handle(&payload))
        } else {
            Err(Error::transport(format!("unknown function `{}`", function)))
        }
    }
}
