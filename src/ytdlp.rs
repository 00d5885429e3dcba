// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! External tool wrapper.
//!
//! `yt-dlp` is invoked as a black box in two modes: a metadata probe
//! (`--dump-json`) and an actual fetch, either to a reserved output path or
//! streamed to stdout. Its probing, muxing, and codec logic are out of
//! scope here; a non-zero exit or unparseable output is just an error to
//! the caller.

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStdout, Command};

/// Handle to the external download tool.
#[derive(Debug, Clone)]
pub struct YtDlp {
    bin: String,
}

impl YtDlp {
    /// Create a wrapper around the given binary name or path.
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// The binary this wrapper invokes.
    pub fn bin(&self) -> &str {
        &self.bin
    }

    /// Query metadata for a URL without downloading anything.
    pub async fn probe(&self, url: &str) -> Result<VideoProbe> {
        let output = Command::new(&self.bin)
            .arg("--dump-json")
            .arg("--no-warnings")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} probe exited with {}: {}",
                self.bin,
                output.status,
                stderr.trim()
            );
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("{} produced unparseable metadata", self.bin))
    }

    /// Fetch a URL in the selected format to the given output path.
    ///
    /// The tool merges video+audio selectors itself when asked to; by the
    /// time this returns Ok the file at `output` is complete.
    pub async fn fetch_to_file(&self, url: &str, format: &str, output: &Path) -> Result<()> {
        let result = Command::new(&self.bin)
            .arg("-f")
            .arg(format)
            .arg("-o")
            .arg(output)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.bin))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!(
                "{} fetch exited with {}: {}",
                self.bin,
                result.status,
                stderr.trim()
            );
        }
        Ok(())
    }

    /// Spawn a fetch that writes the media bytes to stdout.
    ///
    /// Returns the child (the caller is responsible for reaping it) and its
    /// piped stdout for body streaming.
    pub fn stream(&self, url: &str, format: &str) -> Result<(Child, ChildStdout)> {
        let mut child = Command::new(&self.bin)
            .arg("-f")
            .arg(format)
            .arg("-o")
            .arg("-")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.bin))?;

        let stdout = child
            .stdout
            .take()
            .context("child process stdout was not captured")?;
        Ok((child, stdout))
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

// =============================================================================
// Metadata Types
// =============================================================================

/// Parsed output of a metadata probe.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoProbe {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

/// One format entry exactly as the tool reports it.
///
/// The tool's schema is loose; everything beyond `format_id` defaults so a
/// sparse entry never fails the whole probe.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFormat {
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl RawFormat {
    /// True when the entry carries a video track.
    pub fn has_video(&self) -> bool {
        self.vcodec.as_deref().is_some_and(|v| v != "none")
    }

    /// True when the entry carries an audio track.
    pub fn has_audio(&self) -> bool {
        self.acodec.as_deref().is_some_and(|a| a != "none")
    }

    /// Known container type with at least one media track.
    fn is_servable(&self) -> bool {
        self.ext == "mp4" && (self.has_video() || self.has_audio())
    }
}

/// Reduced format projection returned by info lookup.
#[derive(Debug, Clone, Serialize)]
pub struct FormatSummary {
    pub format_id: String,
    pub resolution: Option<String>,
    pub fps: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
    pub filesize: Option<u64>,
    pub filesize_pretty: String,
    pub note: Option<String>,
    pub url: Option<String>,
}

impl From<RawFormat> for FormatSummary {
    fn from(f: RawFormat) -> Self {
        Self {
            has_video: f.has_video(),
            has_audio: f.has_audio(),
            filesize_pretty: pretty_size(f.filesize),
            format_id: f.format_id,
            resolution: f.resolution,
            fps: f.fps,
            filesize: f.filesize,
            note: f.format_note,
            url: f.url,
        }
    }
}

impl VideoProbe {
    /// Filter to servable formats and project them for the API response.
    pub fn servable_formats(self) -> Vec<FormatSummary> {
        self.formats
            .into_iter()
            .filter(RawFormat::is_servable)
            .map(FormatSummary::from)
            .collect()
    }
}

fn pretty_size(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) => format!("{:.2} MB", b as f64 / 1024.0 / 1024.0),
        None => "N/A".to_string(),
    }
}
