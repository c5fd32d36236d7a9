use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use rusty_pool::ThreadPool;
use serde::Deserialize;
use tempfile::TempPath;
use tokio::sync::Semaphore;

use crate::{config::Config, error::Error};

const FFPROBE: &str = "ffprobe";
const FFMPEG: &str = "ffmpeg";
const PROCESSING_SUFFIX: &str = ".processing";

/// Geometry of the first video stream of a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    pub width: u32,
    pub height: u32,
}

/// External media tools the video pipeline depends on.
#[async_trait]
pub trait MediaTools: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeResult, Error>;

    /// Rewrite the file for fast start without re-encoding, returning the path of the new file
    /// next to the input. The input is left untouched.
    async fn remux(&self, input: &Path) -> Result<PathBuf, Error>;
}

/// Runs `ffprobe` and `ffmpeg` as child processes, waiting on a dedicated thread pool.
pub struct FfmpegTools {
    pool: ThreadPool,
    semaphore: Semaphore,
    process_timeout: Option<Duration>,
}

impl FfmpegTools {
    pub fn new(config: &Config) -> Self {
        log::info!(
            "CONCURRENT_PROCESS_LIMIT set to {}",
            config.concurrent_process_limit
        );
        Self {
            pool: rusty_pool::Builder::new()
                .name(String::from("encode_pool"))
                .build(),
            semaphore: Semaphore::new(config.concurrent_process_limit),
            process_timeout: config.process_timeout,
        }
    }

    async fn spawn_blocking<R: Send + 'static>(
        &self,
        task: impl FnOnce() -> Result<R, Error> + Send + 'static,
    ) -> Result<R, Error> {
        let join_handle = self.pool.evaluate(task);

        match join_handle.receiver.await {
            Ok(t) => t,
            Err(_) => Err(Error::CancellationError),
        }
    }

    /// Run a process to completion. A non success exit status is reported with the process's
    /// stderr through `error`.
    async fn run_process(
        &self,
        program: &'static str,
        args: Vec<OsString>,
        error: fn(String) -> Error,
    ) -> Result<Output, Error> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::CancellationError)?;

        log::debug!("Spawning {program} with args {:?}", &args);
        let process = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| error(format!("Failed to spawn {program} process: {e}")))?;
        let pid = process.id();

        let wait = self.spawn_blocking(move || {
            process
                .wait_with_output()
                .map_err(|e| error(format!("Failed to get {program} process output: {e}")))
        });

        let output = match self.process_timeout {
            Some(process_timeout) => match tokio::time::timeout(process_timeout, wait).await {
                Ok(output) => output,
                Err(_) => {
                    log::warn!("{program} process {pid} timed out after {process_timeout:?}, killing it");
                    kill_process(pid);
                    return Err(Error::ProcessTimeoutError(program, process_timeout));
                }
            },
            None => wait.await,
        }?;

        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            return Err(error(format!(
                "{program} failed with status {}: {}",
                output.status,
                error_msg.trim()
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaTools for FfmpegTools {
    async fn probe(&self, path: &Path) -> Result<ProbeResult, Error> {
        let args = vec![
            OsString::from("-v"),
            OsString::from("error"),
            OsString::from("-select_streams"),
            OsString::from("v:0"),
            OsString::from("-print_format"),
            OsString::from("json"),
            OsString::from("-show_streams"),
            path.as_os_str().to_owned(),
        ];

        let output = self.run_process(FFPROBE, args, Error::ProbeError).await?;
        parse_probe_output(&output.stdout)
    }

    async fn remux(&self, input: &Path) -> Result<PathBuf, Error> {
        let output_path = processing_path(input);
        // removes partial output unless the remux succeeds
        let output_guard = TempPath::try_from_path(&output_path).map_err(|e| {
            Error::RemuxError(format!(
                "Failed to guard output path {}: {e}",
                output_path.display()
            ))
        })?;

        let args = vec![
            OsString::from("-v"),
            OsString::from("error"),
            OsString::from("-i"),
            input.as_os_str().to_owned(),
            OsString::from("-c"),
            OsString::from("copy"),
            OsString::from("-movflags"),
            OsString::from("faststart"),
            OsString::from("-f"),
            OsString::from("mp4"),
            output_path.as_os_str().to_owned(),
        ];

        let start_time = Instant::now();
        self.run_process(FFMPEG, args, Error::RemuxError).await?;
        log::debug!(
            "Remuxed {} for fast start in {:?}",
            input.display(),
            start_time.elapsed()
        );

        output_guard
            .keep()
            .map_err(|e| Error::RemuxError(format!("Failed to keep remuxed file: {e}")))
    }
}

/// `<input>.processing`
pub fn processing_path(input: &Path) -> PathBuf {
    let mut path = input.as_os_str().to_owned();
    path.push(PROCESSING_SUFFIX);
    PathBuf::from(path)
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    use nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    };

    let Ok(raw_pid) = i32::try_from(pid) else {
        log::error!("Cannot kill process {pid}, pid out of range");
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw_pid), Signal::SIGKILL) {
        log::error!("Failed to kill process {pid}: {e}");
    }
}

#[cfg(not(unix))]
fn kill_process(pid: u32) {
    log::warn!("Killing timed out process {pid} is not supported on the current platform");
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    width: Option<i64>,
    height: Option<i64>,
}

pub fn parse_probe_output(stdout: &[u8]) -> Result<ProbeResult, Error> {
    let ffprobe_output = serde_json::from_slice::<FfprobeOutput>(stdout).map_err(|e| {
        Error::MalformedProbeOutputError(format!("Failed to deserialize ffprobe output: {e}"))
    })?;

    let stream = ffprobe_output.streams.first().ok_or_else(|| {
        Error::MalformedProbeOutputError(String::from("ffprobe reported no streams"))
    })?;

    let dimension = |name: &str, value: Option<i64>| {
        value
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or_else(|| {
                Error::MalformedProbeOutputError(format!(
                    "Invalid {name} for first stream: {value:?}"
                ))
            })
    };

    Ok(ProbeResult {
        width: dimension("width", stream.width)?,
        height: dimension("height", stream.height)?,
    })
}
