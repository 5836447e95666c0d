use super::{TrackExtractor, TrackInfo};
use crate::config::Config;
use crate::error::{Result, SubsearchError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Track extraction through the `ffprobe` and `ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    probe_timeout: Duration,
    extract_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: usize,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl ProbeStream {
    fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl FfmpegExtractor {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            probe_timeout: config.probe_timeout(),
            extract_timeout: config.extract_timeout(),
        }
    }

    /// Check that both binaries can be launched.
    pub async fn check_available(&self) -> Result<()> {
        for tool in [&self.ffprobe, &self.ffmpeg] {
            let mut cmd = Command::new(tool);
            cmd.arg("-version");
            run(cmd, self.probe_timeout, tool).await?;
        }
        debug!("FFmpeg and FFprobe are available");
        Ok(())
    }
}

#[async_trait]
impl TrackExtractor for FfmpegExtractor {
    async fn enumerate_tracks(&self, container: &Path) -> Result<Vec<TrackInfo>> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-select_streams",
            "s",
        ])
        .arg(container);

        let output = run(cmd, self.probe_timeout, &self.ffprobe).await?;
        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn extract_track(
        &self,
        container: &Path,
        track: &TrackInfo,
        output: &Path,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-y", "-v", "error", "-i"])
            .arg(container)
            .arg("-map")
            .arg(format!("0:s:{}", track.index));
        if track.needs_conversion() {
            cmd.args(["-c:s", "srt"]);
        } else {
            cmd.args(["-c", "copy"]);
        }
        cmd.arg(output);

        run(cmd, self.extract_timeout, &self.ffmpeg).await?;

        let written = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(SubsearchError::ExtractionFailed(format!(
                "ffmpeg produced no output for track {} of {}",
                track.index,
                container.display()
            )));
        }
        debug!(
            "Extracted track {} ({} bytes) from {}",
            track.index,
            written,
            container.display()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

async fn run(mut cmd: Command, timeout: Duration, tool: &Path) -> Result<Output> {
    cmd.kill_on_drop(true);
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| {
            SubsearchError::ExtractionFailed(format!("Failed to run {}: {e}", tool.display()))
        })?,
        Err(_) => {
            warn!("{} timed out after {:?}", tool.display(), timeout);
            return Err(SubsearchError::ExtractionFailed(format!(
                "{} timed out after {} seconds",
                tool.display(),
                timeout.as_secs()
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SubsearchError::ExtractionFailed(format!(
            "{} failed: {}",
            tool.display(),
            stderr.trim()
        )));
    }
    Ok(output)
}

/// Turn ffprobe's JSON stream listing into tracks, numbered in order.
fn parse_probe_output(stdout: &str) -> Result<Vec<TrackInfo>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let probe: ProbeOutput = serde_json::from_str(stdout)?;

    let tracks = probe
        .streams
        .iter()
        .enumerate()
        .map(|(index, stream)| {
            let codec = stream.codec_name.as_deref().unwrap_or("unknown");
            let mut track = TrackInfo::new(index, stream.index, stream.tag("language"), codec);
            track.title = stream.tag("title").map(str::to_string);
            track
        })
        .collect();
    Ok(tracks)
}
