use std::ffi::OsStr;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time;
use tracing::{debug, warn};

use crate::command::ValidatedCommand;
use crate::error::ExecutionError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Resource bounds for one scanner process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    pub timeout: Duration,
    /// Applies to stdout and stderr combined.
    pub max_output_bytes: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Captured output of a process that exited successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    /// Non-empty stderr of a successful run.
    pub warning: Option<String>,
}

/// Something that can carry out a validated scan.
#[async_trait]
pub trait ScanRunner: Send + Sync {
    async fn run(&self, command: &ValidatedCommand) -> Result<RawOutput, ExecutionError>;
}

/// Runs nmap as a real subprocess.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    limits: ExecLimits,
}

impl ProcessRunner {
    pub fn new(limits: ExecLimits) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl ScanRunner for ProcessRunner {
    async fn run(&self, command: &ValidatedCommand) -> Result<RawOutput, ExecutionError> {
        run(command.program(), command.args(), &self.limits).await
    }
}

/// Run `program` with `args` (no shell involved), enforcing `limits`.
///
/// - stdin is closed; stdout and stderr are drained concurrently.
/// - On timeout or oversized output the child is killed and reaped before returning.
/// - A non-zero exit is an error carrying stderr; stderr on success becomes a warning.
pub async fn run<I, S>(program: impl AsRef<OsStr>, args: I, limits: &ExecLimits) -> Result<RawOutput, ExecutionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ExecutionError::Spawn)?;
    debug!(pid = ?child.id(), "scanner process started");

    let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
    let used = AtomicUsize::new(0);
    let max = limits.max_output_bytes;

    let work = async {
        let (out, err) = tokio::try_join!(
            read_capped(stdout, &used, max),
            read_capped(stderr, &used, max)
        )?;
        let status = child.wait().await?;
        Ok::<_, ExecutionError>((status, out, err))
    };
    let outcome = time::timeout(limits.timeout, work).await;

    let (status, out, err) = match outcome {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => {
            terminate(&mut child).await;
            return Err(e);
        }
        Err(_) => {
            terminate(&mut child).await;
            return Err(ExecutionError::Timeout(limits.timeout));
        }
    };

    let stderr = String::from_utf8_lossy(&err).trim().to_string();
    if !status.success() {
        return Err(ExecutionError::ExecutionFailed { status, stderr });
    }
    if !stderr.is_empty() {
        warn!("scanner wrote to stderr: {stderr}");
    }
    Ok(RawOutput {
        stdout: String::from_utf8_lossy(&out).into_owned(),
        warning: (!stderr.is_empty()).then_some(stderr),
    })
}

/// Drain `reader`, failing once the shared byte count passes `max`.
async fn read_capped<R>(mut reader: R, used: &AtomicUsize, max: usize) -> Result<Vec<u8>, ExecutionError>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        if used.fetch_add(n, Ordering::Relaxed) + n > max {
            return Err(ExecutionError::OutputTooLarge { limit: max });
        }
        out.extend_from_slice(&buf[..n]);
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("kill failed (process may have exited): {e}");
    }
    if let Err(e) = child.wait().await {
        warn!("failed to reap scanner process: {e}");
    }
}

fn missing_pipe(name: &str) -> ExecutionError {
    ExecutionError::Io(std::io::Error::other(format!("{name} pipe was not captured")))
}
