//! Command-line slicer backend
//!
//! Runs a PrusaSlicer / OrcaSlicer style binary as a child process.
//!
//! # Invocation
//! The argument vector comes from a template; `{settings}`, `{model}`,
//! `{output}` and `{output_dir}` are replaced with the job's paths. The child
//! gets a null stdin and its stdout/stderr are drained concurrently into
//! bounded buffers, so a chatty slicer can neither block on a full pipe nor
//! grow memory without limit.
//!
//! # Timeout
//! On unix the child leads its own process group, so wrapper scripts and
//! launchers take their children down with them. On expiry the group
//! receives SIGTERM, gets `kill_grace` to exit, then SIGKILL. `invoke` only
//! returns once the direct child has been reaped.

use crate::types::{CapturedOutput, ExitOutcome, ProbeReport, ProcessResult, SlicerBackend, SpawnError};
use async_trait::async_trait;
use slicemetrics_common::config::SlicerConfig;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to wait for pipe readers after the child exits
///
/// A grandchild that inherited the pipes can keep them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 8 * 1024;

pub struct CliSlicer {
    binary: PathBuf,
    args: Vec<String>,
    kill_grace: Duration,
    capture_limit: usize,
}

impl CliSlicer {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
            kill_grace: Duration::from_secs(2),
            capture_limit: 64 * 1024,
        }
    }

    pub fn from_config(config: &SlicerConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            args: config.args.clone(),
            kill_grace: Duration::from_millis(config.kill_grace_ms),
            capture_limit: config.capture_limit_bytes,
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = limit;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Expand the argument template for one invocation
    ///
    /// An argument that is exactly a placeholder is passed as the raw path,
    /// so non-UTF-8 paths survive. Placeholders embedded in a longer argument
    /// are substituted textually.
    pub fn build_args(&self, settings: &Path, model: &Path, output: &Path) -> Vec<OsString> {
        let output_dir = output.parent().unwrap_or_else(|| Path::new("."));
        let placeholders: [(&str, &Path); 4] = [
            ("{settings}", settings),
            ("{model}", model),
            ("{output}", output),
            ("{output_dir}", output_dir),
        ];

        self.args
            .iter()
            .map(|arg| {
                if let Some((_, path)) = placeholders.iter().find(|(p, _)| arg == p) {
                    return path.as_os_str().to_os_string();
                }
                let mut expanded = arg.clone();
                for (placeholder, path) in &placeholders {
                    if expanded.contains(placeholder) {
                        expanded = expanded.replace(placeholder, &path.to_string_lossy());
                    }
                }
                OsString::from(expanded)
            })
            .collect()
    }

    /// Stop a child that overran its deadline and reap it
    async fn terminate(&self, child: &mut Child) -> Result<(), SpawnError> {
        #[cfg(unix)]
        {
            if let Some(pgid) = child.id() {
                if signal_group(pgid, "-TERM").await {
                    match tokio::time::timeout(self.kill_grace, child.wait()).await {
                        Ok(Ok(_)) => debug!(pgid, "Slicer exited after SIGTERM"),
                        _ => debug!(pgid, grace_ms = self.kill_grace.as_millis() as u64, "Slicer ignored SIGTERM"),
                    }
                }
                // Anything the slicer forked may outlive the group leader
                signal_group(pgid, "-KILL").await;
            }
        }

        match child.kill().await {
            Ok(()) => Ok(()),
            // Already reaped during the grace wait
            Err(_) if matches!(child.try_wait(), Ok(Some(_))) => Ok(()),
            Err(e) => Err(SpawnError::Reap(e.to_string())),
        }
    }

    /// Locate the binary, searching PATH for bare names
    fn locate_binary(&self) -> Option<PathBuf> {
        let is_bare = self.binary.components().count() == 1 && !self.binary.is_absolute();
        if !is_bare {
            return Some(self.binary.clone());
        }

        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(&self.binary))
            .find(|candidate| candidate.is_file())
    }
}

#[async_trait]
impl SlicerBackend for CliSlicer {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn invoke(
        &self,
        settings_path: &Path,
        model_path: &Path,
        output_path: &Path,
        timeout: Duration,
    ) -> Result<ProcessResult, SpawnError> {
        let args = self.build_args(settings_path, model_path, output_path);
        debug!(binary = %self.binary.display(), ?args, "Spawning slicer");

        let mut std_command = std::process::Command::new(&self.binary);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }
        let mut command = Command::from(std_command);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = output_path.parent() {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = command.spawn()?;
        let pid = child.id();

        let stdout_task = spawn_drain(child.stdout.take(), BoundedBuffer::head(self.capture_limit));
        // The diagnostic that matters is usually the last thing a slicer prints
        let stderr_task = spawn_drain(child.stderr.take(), BoundedBuffer::tail(self.capture_limit));

        let outcome = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => match status.code() {
                Some(code) => ExitOutcome::Exited(code),
                None => ExitOutcome::Signaled,
            },
            Ok(Err(e)) => {
                // kill_on_drop takes care of the leader when we bail out here
                #[cfg(unix)]
                {
                    if let Some(pgid) = pid {
                        signal_group(pgid, "-KILL").await;
                    }
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(SpawnError::Reap(e.to_string()));
            }
            Err(_elapsed) => {
                warn!(pid, timeout_ms = timeout.as_millis() as u64, "Slicer timed out, terminating");
                self.terminate(&mut child).await?;
                ExitOutcome::TimedOut
            }
        };

        let stdout = collect_drain(stdout_task).await;
        let stderr = collect_drain(stderr_task).await;
        let elapsed = started.elapsed();

        info!(
            pid,
            outcome = ?outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            stderr_truncated = stderr.truncated_bytes,
            "Slicer process finished"
        );

        Ok(ProcessResult {
            outcome,
            stdout,
            stderr,
            elapsed,
        })
    }

    async fn probe(&self) -> ProbeReport {
        let Some(path) = self.locate_binary() else {
            return ProbeReport::unavailable(format!(
                "{} not found on PATH",
                self.binary.display()
            ));
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                return ProbeReport::unavailable(format!("{}: {}", path.display(), e));
            }
        };
        if !metadata.is_file() {
            return ProbeReport::unavailable(format!("{} is not a regular file", path.display()));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return ProbeReport::unavailable(format!("{} is not executable", path.display()));
            }
        }

        ProbeReport::available(path.display().to_string())
    }
}

/// Send `signal` to every process in the group led by `pgid`
#[cfg(unix)]
async fn signal_group(pgid: u32, signal: &str) -> bool {
    let sent = Command::new("kill")
        .arg(signal)
        .arg("--")
        .arg(format!("-{}", pgid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match sent {
        Ok(status) => status.success(),
        Err(e) => {
            debug!(pgid, signal, error = %e, "Could not run kill");
            false
        }
    }
}

/// Keeps `limit` bytes of a stream, from its start or its end, and counts
/// the rest
#[derive(Debug)]
struct BoundedBuffer {
    kept: VecDeque<u8>,
    limit: usize,
    keep_tail: bool,
    dropped: usize,
}

impl BoundedBuffer {
    fn head(limit: usize) -> Self {
        Self {
            kept: VecDeque::new(),
            limit,
            keep_tail: false,
            dropped: 0,
        }
    }

    fn tail(limit: usize) -> Self {
        Self {
            keep_tail: true,
            ..Self::head(limit)
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        if self.keep_tail {
            self.kept.extend(bytes);
            let excess = self.kept.len().saturating_sub(self.limit);
            self.kept.drain(..excess);
            self.dropped += excess;
        } else {
            let room = self.limit.saturating_sub(self.kept.len());
            let take = room.min(bytes.len());
            self.kept.extend(&bytes[..take]);
            self.dropped += bytes.len() - take;
        }
    }

    fn finish(self) -> CapturedOutput {
        let kept: Vec<u8> = self.kept.into();
        let body = String::from_utf8_lossy(&kept);
        let text = match (self.dropped, self.keep_tail) {
            (0, _) => body.into_owned(),
            (n, false) => format!("{}…[truncated {} bytes]", body, n),
            (n, true) => format!("…[truncated {} bytes]{}", n, body),
        };
        CapturedOutput {
            text,
            truncated_bytes: self.dropped,
        }
    }
}

fn spawn_drain<R>(stream: Option<R>, mut buffer: BoundedBuffer) -> JoinHandle<CapturedOutput>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut stream) = stream else {
            return buffer.finish();
        };

        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.push(&chunk[..n]),
                Err(e) => {
                    debug!(error = %e, "Slicer pipe read failed");
                    break;
                }
            }
        }
        buffer.finish()
    })
}

async fn collect_drain(mut task: JoinHandle<CapturedOutput>) -> CapturedOutput {
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            debug!(error = %e, "Pipe drain task failed");
            CapturedOutput::default()
        }
        Err(_) => {
            task.abort();
            debug!("Pipe still open after slicer exit, giving up on remaining output");
            CapturedOutput::default()
        }
    }
}
