//! Child process runner
//!
//! Every production adapter drives a CLI (`git`, `podman`, `kubectl`). This
//! module spawns the process, optionally feeds it stdin, streams its output
//! line by line into an execution log, and kills it when the cancel signal
//! fires or the caller drops the future.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use super::{AdapterError, AdapterErrorKind, AdapterResult};
use crate::service::cancel::CancelSignal;
use crate::service::log_sink::ExecutionLog;

/// Upper bound on captured output kept per stream
const MAX_CAPTURE_BYTES: usize = 256 * 1024;

/// Bytes of stderr quoted in a failure message
const ERROR_TAIL_BYTES: usize = 800;

/// What to run
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, envs: Vec<(String, String)>) -> Self {
        self.envs.extend(envs);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Command line as shown in logs; environment values are never included
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a successful run
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `spec` to completion
///
/// When `log` is given both output streams are appended to it as they are
/// produced. A non-zero exit is classified by `classify`, which receives the
/// lowercased stderr (or stdout when stderr is empty).
pub async fn run(
    spec: &ProcessSpec,
    log: Option<&ExecutionLog>,
    cancel: &CancelSignal,
    classify: fn(&str) -> AdapterErrorKind,
) -> AdapterResult<ProcessOutput> {
    if cancel.is_cancelled() {
        return Err(AdapterError::cancelled());
    }

    debug!("Running {}", spec.display());

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &spec.cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            AdapterError::invalid_input(format!("'{}' is not installed: {}", spec.program, e))
        }
        _ => AdapterError::transient(format!("failed to start '{}': {}", spec.program, e)),
    })?;

    if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
        let program = spec.program.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!("Writing stdin of {} failed: {}", program, e);
            }
            // Dropping stdin closes the pipe
        });
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let finished = {
        let work = async {
            tokio::join!(
                drain(stdout, log),
                drain(stderr, log),
                child.wait()
            )
        };

        tokio::select! {
            _ = cancel.cancelled() => None,
            result = work => Some(result),
        }
    };

    let Some((stdout, stderr, status)) = finished else {
        let _ = child.start_kill();
        debug!("Killed {} after cancellation", spec.program);
        return Err(AdapterError::cancelled());
    };

    let status = status.map_err(|e| {
        AdapterError::transient(format!("waiting for '{}' failed: {}", spec.program, e))
    })?;

    if !status.success() {
        let detail = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        let kind = classify(&detail.to_lowercase());
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "a signal".to_string());

        return Err(AdapterError::new(
            kind,
            format!(
                "{} exited with {}: {}",
                spec.program,
                code,
                tail(detail, ERROR_TAIL_BYTES)
            ),
        ));
    }

    Ok(ProcessOutput { stdout, stderr })
}

/// Reads a stream to its end, forwarding each line to `log`
///
/// Lines are split on raw bytes so output that is not valid UTF-8 is logged
/// lossily instead of ending the read and closing the pipe on the child.
async fn drain<R>(stream: Option<R>, log: Option<&ExecutionLog>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return String::new();
    };

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut captured = String::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if let Some(log) = log {
                    log.info(line);
                }
                captured.push_str(line);
                captured.push('\n');

                if captured.len() > MAX_CAPTURE_BYTES {
                    let mut cut = captured.len() - MAX_CAPTURE_BYTES;
                    while !captured.is_char_boundary(cut) {
                        cut += 1;
                    }
                    captured.drain(..cut);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Stopped reading child output: {}", e);
                break;
            }
        }
    }

    captured
}

/// Last `max` bytes of `text`, on a char boundary
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
