//! Thin adapter around the `yt-dlp` executable.
//!
//! yt-dlp is treated as a black box: it is asked either for a JSON metadata
//! dump or to write media into a directory. Nothing here understands site
//! pages or formats. All calls block the current thread, so async callers are
//! expected to go through `spawn_blocking`.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::DownloadError;
use crate::validator::is_supported_url;

pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";

/// Filename template handed to yt-dlp; the engine picks title and extension.
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_UPLOADER: &str = "Unknown Uploader";
const NO_DESCRIPTION: &str = "No description available";

/// Everything the adapter needs to know about how to run the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub program: PathBuf,
    /// Outbound proxy applied to every invocation, probe and fetch alike.
    pub proxy: Option<String>,
    /// Passes `--verbose` to fetches so yt-dlp's diagnostics end up in our logs.
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_YTDLP_BIN),
            proxy: None,
            verbose: false,
        }
    }
}

/// The subset of yt-dlp's metadata that ends up in a `VideoRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub duration: u64,
    pub uploader: String,
    pub description: String,
}

/// Fields read from `yt-dlp --dump-single-json`. yt-dlp omits or nulls
/// anything the site does not expose, hence the options everywhere.
#[derive(Debug, Default, Deserialize)]
struct ProbeResponse {
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    description: Option<String>,
}

impl From<ProbeResponse> for VideoMetadata {
    fn from(info: ProbeResponse) -> Self {
        Self {
            title: info.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            duration: info
                .duration
                .filter(|value| value.is_finite() && *value > 0.0)
                .map(|value| value as u64)
                .unwrap_or(0),
            uploader: info.uploader.unwrap_or_else(|| UNKNOWN_UPLOADER.to_string()),
            description: info
                .description
                .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    config: EngineConfig,
}

impl YtDlp {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `<program> --version` so a missing install is noticed at startup
    /// rather than on the first submission.
    pub fn version(&self) -> Result<String> {
        let output = Command::new(&self.config.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("running {} --version", self.config.program.display()))?;
        if !output.status.success() {
            bail!(
                "{} --version exited with {}",
                self.config.program.display(),
                output.status
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Fetches metadata for `url` without downloading any media.
    pub fn probe(&self, url: &str) -> Result<VideoMetadata, DownloadError> {
        if !is_supported_url(url) {
            return Err(DownloadError::InvalidUrl);
        }

        info!(url, "probing video metadata");
        let mut command = self.command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg(url);

        let output = run(command).map_err(|err| DownloadError::ExtractionFailed(err.to_string()))?;
        if !output.status.success() {
            return Err(DownloadError::ExtractionFailed(failure_message(&output)));
        }

        let info: ProbeResponse = serde_json::from_slice(&output.stdout).map_err(|err| {
            DownloadError::ExtractionFailed(format!("unreadable metadata response: {err}"))
        })?;
        let metadata = VideoMetadata::from(info);
        debug!(?metadata, "probe finished");
        Ok(metadata)
    }

    /// Downloads the best combined format of `url` into `destination`.
    ///
    /// Whatever files yt-dlp decides to write stay in `destination`; callers
    /// have to look for them afterwards.
    pub fn fetch(&self, url: &str, destination: &Path) -> Result<(), DownloadError> {
        let template = destination.join(OUTPUT_TEMPLATE);
        info!(url, destination = %destination.display(), "starting download");

        let mut command = self.command();
        command
            .arg("--format")
            .arg("best")
            .arg("--output")
            .arg(&template)
            .arg("--no-playlist");
        if self.config.verbose {
            command.arg("--verbose");
        }
        command.arg(url);

        let output = run(command).map_err(|err| DownloadError::DownloadFailed(err.to_string()))?;
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!(target: "tubegrab::yt_dlp", "{line}");
        }
        if !output.status.success() {
            return Err(DownloadError::DownloadFailed(failure_message(&output)));
        }

        info!(destination = %destination.display(), "download finished");
        Ok(())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.program);
        command.stdin(Stdio::null());
        if let Some(proxy) = &self.config.proxy {
            command.arg("--proxy").arg(proxy);
        }
        command
    }
}

fn run(mut command: Command) -> Result<Output> {
    let program = command.get_program().to_string_lossy().into_owned();
    command
        .output()
        .with_context(|| format!("launching {program}"))
}

/// Exit status plus the last non-empty stderr line, which is where yt-dlp
/// prints its `ERROR:` summary.
fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    match stderr.lines().rev().map(str::trim).find(|line| !line.is_empty()) {
        Some(line) => format!("yt-dlp exited with {}: {line}", output.status),
        None => format!("yt-dlp exited with {}", output.status),
    }
}
